//! 2-D multiplexed register accessor: a strided view over a
//! channel-interleaved memory region, one pitched iterator per channel.

use std::sync::Arc;

use crate::accessor::RegisterAccessor;
use crate::backend::transfer_element::LowLevelTransferElement;
use crate::backend::DeviceBackend;
use crate::error::{CoreError, Result};
use crate::raw::{ConverterLoop, RawConverter};
use crate::register::info::RegisterInfo;
use crate::user_type::{UserTypeTag, UserValue};
use crate::version::{Validity, VersionNumber};

fn raw_word_bytes(raw_type_bits: u8) -> usize {
    match raw_type_bits {
        0..=8 => 1,
        9..=16 => 2,
        17..=32 => 4,
        _ => 8,
    }
}

fn read_word(window: &[u8], byte_offset: usize, word_bytes: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf[..word_bytes].copy_from_slice(&window[byte_offset..byte_offset + word_bytes]);
    u64::from_le_bytes(buf)
}

fn write_word(window: &mut [u8], byte_offset: usize, word_bytes: usize, value: u64) {
    let bytes = value.to_le_bytes();
    window[byte_offset..byte_offset + word_bytes].copy_from_slice(&bytes[..word_bytes]);
}

pub struct MuxedAccessor {
    low_level: LowLevelTransferElement,
    info: RegisterInfo,
    /// One converter loop per channel, chosen once at construction per
    /// the channel's numeric shape, so per-sample conversion never
    /// re-classifies it.
    loops: Vec<ConverterLoop>,
    /// `[channel][sample]`.
    cooked: Vec<Vec<UserValue>>,
    /// Per-channel raw-word scratch buffer, reused across reads/writes.
    raw_scratch: Vec<Vec<u64>>,
    pitch_bytes: usize,
    n_elements: usize,
    validity: Validity,
}

impl MuxedAccessor {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        info: RegisterInfo,
        user_types: Vec<UserTypeTag>,
        element_offset: usize,
        n_elements: usize,
    ) -> Result<Self> {
        if info.channels.len() != user_types.len() {
            return Err(CoreError::logic(format!(
                        "register {}: {} channels but {} user types given",
                        info.path,
                        info.channels.len(),
                        user_types.len()
            )));
        }
        if info.element_pitch_bits % 8 != 0 {
            return Err(CoreError::logic(format!(
                        "register {}: elementPitchBits not byte-aligned",
                        info.path
            )));
        }
        for channel in &info.channels {
            if channel.bit_offset % 8 != 0 {
                return Err(CoreError::logic(format!(
                            "register {}: channel bitOffset {} not byte-aligned",
                            info.path, channel.bit_offset
                )));
            }
        }
        if element_offset + n_elements > info.n_elements {
            return Err(CoreError::logic(format!(
                        "register {}: window [{element_offset}, {}) exceeds nElements {}",
                        info.path,
                        element_offset + n_elements,
                        info.n_elements
            )));
        }

        let pitch_bytes = info.element_pitch_bytes();
        let loops: Vec<ConverterLoop> = info
        .channels
        .iter()
        .zip(&user_types)
        .map(|(channel, tag)| ConverterLoop::new(RawConverter::new(channel, *tag)))
        .collect();

        let raw_len = n_elements * pitch_bytes;
        let rounded_len = raw_len.div_ceil(4) * 4;
        let low_level = LowLevelTransferElement::new(
            backend,
            info.bar,
            info.address + (element_offset as u64 * pitch_bytes as u64),
            rounded_len,
        );

        let cooked = user_types
        .iter()
        .map(|_| vec![UserValue::Void; n_elements])
        .collect();
        let raw_scratch = vec![vec![0u64; n_elements]; loops.len()];

        Ok(MuxedAccessor {
                low_level,
                info,
                loops,
                cooked,
                raw_scratch,
                pitch_bytes,
                n_elements,
                validity: Validity::Ok,
        })
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn n_channels(&self) -> usize {
        self.loops.len()
    }

    pub fn n_elements(&self) -> usize {
        self.n_elements
    }

    pub fn get(&self, channel: usize, sample: usize) -> &UserValue {
        &self.cooked[channel][sample]
    }

    pub fn set(&mut self, channel: usize, sample: usize, value: UserValue) {
        self.cooked[channel][sample] = value;
    }

    pub fn row(&self, channel: usize) -> &[UserValue] {
        &self.cooked[channel]
    }
}

impl RegisterAccessor for MuxedAccessor {
    fn pre_read(&mut self) -> Result<()> {
        Ok(())
    }

    fn do_read_transfer(&mut self) -> Result<()> {
        let result = self.low_level.read();
        if result.is_err() {
            self.validity = Validity::Faulty;
            return result;
        }
        self.validity = Validity::Ok;
        let window = self.low_level.requested_window().to_vec();

        for (c, channel) in self.info.channels.iter().enumerate() {
            let word_bytes = raw_word_bytes(channel.raw_type);
            let channel_byte_offset = (channel.bit_offset / 8) as usize;
            for (sample, raw) in self.raw_scratch[c].iter_mut().enumerate() {
                let byte_offset = sample * self.pitch_bytes + channel_byte_offset;
                *raw = read_word(&window, byte_offset, word_bytes);
            }
            self.loops[c].to_cooked_buffer(&self.raw_scratch[c], &mut self.cooked[c]);
        }
        Ok(())
    }

    fn post_read(&mut self) -> Result<()> {
        Ok(())
    }

    fn pre_write(&mut self) -> Result<()> {
        if !self.is_writeable() {
            return Err(CoreError::logic(format!(
                        "register {} is not writeable",
                        self.info.path
            )));
        }
        self.low_level.pre_write()
    }

    fn do_write_transfer(&mut self) -> Result<()> {
        for (c, channel) in self.info.channels.iter().enumerate() {
            let word_bytes = raw_word_bytes(channel.raw_type);
            let channel_byte_offset = (channel.bit_offset / 8) as usize;
            self.loops[c].to_raw_buffer(&self.cooked[c], &mut self.raw_scratch[c]);
            for (sample, &raw) in self.raw_scratch[c].iter().enumerate() {
                let byte_offset = sample * self.pitch_bytes + channel_byte_offset;
                let window = self.low_level.requested_window_mut();
                write_word(window, byte_offset, word_bytes, raw);
            }
        }
        self.low_level.do_write_transfer()
    }

    fn post_write(&mut self, succeeded: bool) {
        self.low_level.post_write(succeeded);
    }

    fn is_readable(&self) -> bool {
        self.info.access.is_readable()
    }

    fn is_writeable(&self) -> bool {
        self.info.access.is_writable()
    }

    fn version_number(&self) -> VersionNumber {
        self.low_level.version()
    }

    fn validity(&self) -> Validity {
        self.validity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::register::info::{AccessMode, ChannelInfo, DataType};

    #[test]
    fn multiplexed_read_matches_scenario() {
        let info = RegisterInfo {
            path: "/APP/MUX".to_string(),
            n_elements: 4,
            element_pitch_bits: 64,
            bar: 0,
            address: 0,
            access: AccessMode::ReadWrite,
            interrupt_id: vec![],
            channels: vec![
                ChannelInfo {
                    bit_offset: 0,
                    data_type: DataType::FixedPoint,
                    width: 16,
                    n_fractional_bits: 0,
                    signed: true,
                    raw_type: 16,
                },
                ChannelInfo {
                    bit_offset: 32,
                    data_type: DataType::IEEE754,
                    width: 32,
                    n_fractional_bits: 0,
                    signed: false,
                    raw_type: 32,
                },
            ],
            double_buffer: None,
        };

        let backend: Arc<dyn DeviceBackend> = Arc::new(InMemoryBackend::new(1, 4096));
        #[rustfmt::skip]
        let rows: [[u8; 8]; 4] = [
            [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x3F],
            [0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40],
            [0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x40, 0x40],
            [0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x80, 0x40],
        ];
        let mut flat = Vec::new();
        for row in rows {
            flat.extend_from_slice(&row);
        }
        backend.write(0, 0, &flat).unwrap();

        let mut accessor = MuxedAccessor::new(
            backend,
            info,
            vec![UserTypeTag::Int32, UserTypeTag::Float64],
            0,
            4,
        )
        .unwrap();
        accessor.read().unwrap();

        assert_eq!(
            accessor.row(0),
            &[
                UserValue::Int32(1),
                UserValue::Int32(2),
                UserValue::Int32(-1),
                UserValue::Int32(-32768),
            ]
        );
        assert_eq!(
            accessor.row(1),
            &[
                UserValue::Float64(1.0),
                UserValue::Float64(2.0),
                UserValue::Float64(3.0),
                UserValue::Float64(4.0),
            ]
        );
    }
}
