//! Scalar/1-D register accessor.

use std::sync::Arc;

use crate::accessor::double_buffer::DoubleBufferHandshake;
use crate::accessor::double_buffer::DoubleBufferShared;
use crate::accessor::RegisterAccessor;
use crate::backend::transfer_element::LowLevelTransferElement;
use crate::backend::DeviceBackend;
use crate::error::{CoreError, Result};
use crate::raw::RawConverter;
use crate::register::info::{AccessMode, RegisterInfo};
use crate::user_type::{UserTypeTag, UserValue};
use crate::version::{Validity, VersionNumber};

/// `Accessor<UserType, isRaw>` generalized: `raw_mode == true` requires the
/// caller's `UserTypeTag` to equal the register's raw integer type and
/// bypasses conversion (a plain memcpy between the low-level buffer and
/// the cooked buffer); `raw_mode == false` always converts through a
/// [`RawConverter`].
pub struct ScalarAccessor {
    low_level: LowLevelTransferElement,
    info: RegisterInfo,
    raw_mode: bool,
    converter: Option<RawConverter>,
    /// One channel x `number_of_words` samples, to present a uniform shape
    /// with the 2-D accessor.
    cooked: Vec<UserValue>,
    number_of_words: usize,
    raw_word_bytes: usize,
    double_buffer: Option<DoubleBufferHandshake>,
    validity: Validity,
}

fn raw_word_size_bytes(raw_type_bits: u8) -> usize {
    match raw_type_bits {
        0..=8 => 1,
        9..=16 => 2,
        17..=32 => 4,
        _ => 8,
    }
}

fn default_zero(tag: UserTypeTag) -> UserValue {
    UserValue::zero_for(tag)
}

impl ScalarAccessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        info: RegisterInfo,
        user_type: UserTypeTag,
        raw_mode: bool,
        word_offset: usize,
        number_of_words: usize,
        double_buffer: Option<Arc<DoubleBufferShared>>,
    ) -> Result<Self> {
        if info.is_muxed() {
            return Err(CoreError::logic(format!(
                        "register {} has more than one channel; use a 2-D accessor",
                        info.path
            )));
        }
        if info.element_pitch_bits % 8 != 0 {
            return Err(CoreError::logic(format!(
                        "register {} elementPitchBits is not byte-aligned",
                        info.path
            )));
        }
        let channel = info.channels.first().cloned().ok_or_else(|| {
                CoreError::logic(format!("register {} declares no channels", info.path))
        })?;
        if channel.bit_offset != 0 {
            return Err(CoreError::logic(format!(
                        "register {} channel bitOffset {} != 0: scalar accessor cannot slice sub-bytes",
                        info.path, channel.bit_offset
            )));
        }

        let is_void = matches!(channel.data_type, crate::register::info::DataType::Void);
        let (word_offset, number_of_words) = if is_void {
            (0, 1)
        } else {
            (word_offset, number_of_words)
        };
        if !is_void && word_offset + number_of_words > info.n_elements {
            return Err(CoreError::logic(format!(
                        "register {}: window [{word_offset}, {}) exceeds nElements {}",
                        info.path,
                        word_offset + number_of_words,
                        info.n_elements
            )));
        }

        let raw_word_bytes = info.element_pitch_bytes();

        let converter = if raw_mode {
            let expected = expected_raw_user_type(channel.width, channel.signed);
            if Some(user_type) != expected {
                return Err(CoreError::logic(format!(
                            "register {}: raw mode requires user type {:?}, got {user_type:?}",
                            info.path, expected
                )));
            }
            None
        } else {
            Some(RawConverter::new(&channel, user_type))
        };

        let low_level = LowLevelTransferElement::new(
            backend,
            info.bar,
            info.address + (word_offset as u64 * raw_word_bytes as u64),
            number_of_words * raw_word_bytes,
        );

        let double_buffer = double_buffer.map(DoubleBufferHandshake::new);

        Ok(ScalarAccessor {
                low_level,
                info,
                raw_mode,
                converter,
                cooked: vec![default_zero(user_type); number_of_words],
                number_of_words,
                raw_word_bytes,
                double_buffer,
                validity: Validity::Ok,
        })
    }

    pub fn path(&self) -> &str {
        &self.info.path
    }

    pub fn len(&self) -> usize {
        self.number_of_words
    }

    pub fn is_empty(&self) -> bool {
        self.number_of_words == 0
    }

    pub fn get(&self, sample: usize) -> &UserValue {
        &self.cooked[sample]
    }

    pub fn set(&mut self, sample: usize, value: UserValue) {
        self.cooked[sample] = value;
    }

    /// `getAsCooked<T>(channel, sample)`: applies the converter to a single
    /// raw word without moving data to/from hardware. Only available in
    /// raw mode.
    pub fn get_as_cooked(&self, sample: usize, converter: &RawConverter) -> Result<UserValue> {
        if !self.raw_mode {
            return Err(CoreError::logic(
                    "getAsCooked is only available on raw-mode accessors".to_string(),
            ));
        }
        let window = self.low_level.requested_window();
        let raw = read_raw_word(window, sample, self.raw_word_bytes);
        Ok(converter.to_cooked(raw))
    }

    /// `setAsCooked<T>(channel, sample, value)`: reverses the converter
    /// into the raw buffer, without I/O. Only available in raw mode.
    pub fn set_as_cooked(&mut self, sample: usize, value: &UserValue, converter: &RawConverter) -> Result<()> {
        if !self.raw_mode {
            return Err(CoreError::logic(
                    "setAsCooked is only available on raw-mode accessors".to_string(),
            ));
        }
        let raw = converter.to_raw(value);
        let window = self.low_level.requested_window_mut();
        write_raw_word(window, sample, self.raw_word_bytes, raw);
        Ok(())
    }
}

fn read_raw_word(window: &[u8], sample: usize, word_bytes: usize) -> u64 {
    let start = sample * word_bytes;
    let mut buf = [0u8; 8];
    buf[..word_bytes].copy_from_slice(&window[start..start + word_bytes]);
    u64::from_le_bytes(buf)
}

fn write_raw_word(window: &mut [u8], sample: usize, word_bytes: usize, value: u64) {
    let start = sample * word_bytes;
    let bytes = value.to_le_bytes();
    window[start..start + word_bytes].copy_from_slice(&bytes[..word_bytes]);
}

fn expected_raw_user_type(width: u8, signed: bool) -> Option<UserTypeTag> {
    Some(match (width, signed) {
            (8, true) => UserTypeTag::Int8,
            (8, false) => UserTypeTag::UInt8,
            (16, true) => UserTypeTag::Int16,
            (16, false) => UserTypeTag::UInt16,
            (32, true) => UserTypeTag::Int32,
            (32, false) => UserTypeTag::UInt32,
            (64, true) => UserTypeTag::Int64,
            (64, false) => UserTypeTag::UInt64,
            _ => return None,
    })
}

impl RegisterAccessor for ScalarAccessor {
    fn pre_read(&mut self) -> Result<()> {
        if let Some(db) = &mut self.double_buffer {
            db.pre_read()?;
        }
        Ok(())
    }

    fn do_read_transfer(&mut self) -> Result<()> {
        let result = self.low_level.read();
        if result.is_err() {
            self.validity = Validity::Faulty;
        } else {
            self.validity = Validity::Ok;
            let window = self.low_level.requested_window().to_vec();
            for sample in 0..self.number_of_words {
                if self.raw_mode {
                    let raw = read_raw_word(&window, sample, self.raw_word_bytes);
                    self.cooked[sample] = raw_to_user_value(raw, self.cooked[sample].tag());
                } else if let Some(conv) = &self.converter {
                    let raw = read_raw_word(&window, sample, self.raw_word_bytes);
                    self.cooked[sample] = conv.to_cooked(raw);
                }
            }
        }
        result
    }

    fn post_read(&mut self) -> Result<()> {
        if let Some(db) = &mut self.double_buffer {
            db.post_read()?;
        }
        Ok(())
    }

    fn pre_write(&mut self) -> Result<()> {
        if !self.is_writeable() {
            return Err(CoreError::logic(format!(
                        "register {} is not writeable (access={:?})",
                        self.info.path, self.info.access
            )));
        }
        if self.double_buffer.is_some() {
            return Err(CoreError::logic(format!(
                        "register {}: double-buffered accessors cannot write",
                        self.info.path
            )));
        }
        self.low_level.pre_write()
    }

    fn do_write_transfer(&mut self) -> Result<()> {
        for sample in 0..self.number_of_words {
            let raw = if self.raw_mode {
                user_value_to_raw(&self.cooked[sample])
            } else if let Some(conv) = &self.converter {
                conv.to_raw(&self.cooked[sample])
            } else {
                0
            };
            let window = self.low_level.requested_window_mut();
            write_raw_word(window, sample, self.raw_word_bytes, raw);
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

fn raw_to_user_value(raw: u64, tag: UserTypeTag) -> UserValue {
    match tag {
        UserTypeTag::Int8 => UserValue::Int8(raw as i8),
        UserTypeTag::UInt8 => UserValue::UInt8(raw as u8),
        UserTypeTag::Int16 => UserValue::Int16(raw as i16),
        UserTypeTag::UInt16 => UserValue::UInt16(raw as u16),
        UserTypeTag::Int32 => UserValue::Int32(raw as i32),
        UserTypeTag::UInt32 => UserValue::UInt32(raw as u32),
        UserTypeTag::Int64 => UserValue::Int64(raw as i64),
        UserTypeTag::UInt64 => UserValue::UInt64(raw),
        _ => UserValue::UInt64(raw),
    }
}

fn user_value_to_raw(value: &UserValue) -> u64 {
    match value {
        UserValue::Int8(v) => *v as u8 as u64,
        UserValue::UInt8(v) => *v as u64,
        UserValue::Int16(v) => *v as u16 as u64,
        UserValue::UInt16(v) => *v as u64,
        UserValue::Int32(v) => *v as u32 as u64,
        UserValue::UInt32(v) => *v as u64,
        UserValue::Int64(v) => *v as u64,
        UserValue::UInt64(v) => *v,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::register::info::{AccessMode, ChannelInfo, DataType};

    fn reg(access: AccessMode) -> RegisterInfo {
        RegisterInfo {
            path: "/APP/X".to_string(),
            n_elements: 4,
            element_pitch_bits: 32,
            bar: 0,
            address: 0x100,
            access,
            interrupt_id: vec![],
            channels: vec![ChannelInfo {
                    bit_offset: 0,
                    data_type: DataType::FixedPoint,
                    width: 32,
                    n_fractional_bits: 0,
                    signed: true,
                    raw_type: 32,
            }],
            double_buffer: None,
        }
    }

    #[test]
    fn write_then_read_round_trips_cooked_value() {
        let backend: Arc<dyn DeviceBackend> = Arc::new(InMemoryBackend::new(1, 4096));
        let mut writer = ScalarAccessor::new(
            backend.clone(),
            reg(AccessMode::ReadWrite),
            UserTypeTag::Int32,
            false,
            0,
            4,
            None,
        )
        .unwrap();
        writer.set(0, UserValue::Int32(42));
        writer.write().unwrap();

        let mut reader =
        ScalarAccessor::new(backend, reg(AccessMode::ReadWrite), UserTypeTag::Int32, false, 0, 4, None)
        .unwrap();
        reader.read().unwrap();
        assert_eq!(*reader.get(0), UserValue::Int32(42));
    }

    #[test]
    fn write_on_read_only_register_fails_before_io() {
        let backend: Arc<dyn DeviceBackend> = Arc::new(InMemoryBackend::new(1, 4096));
        let mut accessor =
        ScalarAccessor::new(backend, reg(AccessMode::ReadOnly), UserTypeTag::Int32, false, 0, 4, None)
        .unwrap();
        assert!(accessor.write().is_err());
    }

    #[test]
    fn raw_mode_requires_matching_user_type() {
        let backend: Arc<dyn DeviceBackend> = Arc::new(InMemoryBackend::new(1, 4096));
        let err = ScalarAccessor::new(backend, reg(AccessMode::ReadWrite), UserTypeTag::Float64, true, 0, 4, None);
        assert!(err.is_err());
    }
}
