//! Register and channel descriptors.

use crate::error::{CoreError, Result};

/// Per-channel wire format. Ordered so that, when heterogeneous channels
/// share a 2-D register, the "largest" wins for the exported type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataType {
    Void,
    FixedPoint,
    ASCII,
    IEEE754,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
    Interrupt,
}

impl AccessMode {
    pub fn is_readable(&self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite | AccessMode::Interrupt)
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }
}

/// One channel of a register: `bitOffset` must be byte-aligned, `width` is
/// the number of significant bits (0-64), `nFractionalBits` may run outside
/// `[0, width]` in either direction within +/-64.
#[derive(Debug, Clone, Copy)]
pub struct ChannelInfo {
    pub bit_offset: u32,
    pub data_type: DataType,
    pub width: u8,
    pub n_fractional_bits: i32,
    pub signed: bool,
    /// Width of the containing raw slot (8/16/32/64).
    pub raw_type: u8,
}

impl ChannelInfo {
    pub fn validate(&self) -> Result<()> {
        if self.bit_offset % 8 != 0 {
            return Err(CoreError::logic(format!(
                        "channel bitOffset {} is not byte-aligned",
                        self.bit_offset
            )));
        }
        if self.width > 64 {
            return Err(CoreError::logic(format!(
                        "channel width {} exceeds 64 bits",
                        self.width
            )));
        }
        let lower = -(64 - self.width as i64);
        let upper = self.width as i64;
        if (self.n_fractional_bits as i64) < lower || (self.n_fractional_bits as i64) > upper {
            return Err(CoreError::logic(format!(
                        "nFractionalBits {} outside allowed range [{}, {}] for width {}",
                        self.n_fractional_bits, lower, upper, self.width
            )));
        }
        Ok(())
    }
}

/// Optional double-buffer descriptor: an enable register, an
/// inactive-buffer indicator register, and which buffer index this
/// accessor should read under the handshake.
#[derive(Debug, Clone)]
pub struct DoubleBufferDescriptor {
    pub enable_register_path: String,
    pub indicator_register_path: String,
    pub index: usize,
}

/// An ordered sequence of non-negative integers identifying a hierarchical
/// interrupt path `!a:b:c`. Empty unless `access == Interrupt`.
pub type InterruptId = Vec<u32>;

#[derive(Debug, Clone)]
pub struct RegisterInfo {
    pub path: String,
    pub n_elements: usize,
    pub element_pitch_bits: u32,
    pub bar: u64,
    pub address: u64,
    pub access: AccessMode,
    pub interrupt_id: InterruptId,
    pub channels: Vec<ChannelInfo>,
    pub double_buffer: Option<DoubleBufferDescriptor>,
}

impl RegisterInfo {
    pub fn validate(&self) -> Result<()> {
        if self.element_pitch_bits % 8 != 0 {
            return Err(CoreError::logic(format!(
                        "register {} elementPitchBits {} is not byte-aligned",
                        self.path, self.element_pitch_bits
            )));
        }
        if self.access != AccessMode::Interrupt && !self.interrupt_id.is_empty() {
            return Err(CoreError::logic(format!(
                        "register {} has an interruptId but access is not Interrupt",
                        self.path
            )));
        }
        for ch in &self.channels {
            ch.validate()?;
        }
        Ok(())
    }

    pub fn is_scalar(&self) -> bool {
        self.channels.len() == 1
    }

    pub fn is_muxed(&self) -> bool {
        self.channels.len() > 1
    }

    /// The exported channel/data type for the whole register: the
    /// "largest" `DataType` among its channels.
    pub fn exported_data_type(&self) -> DataType {
        self.channels
        .iter()
        .map(|c| c.data_type)
        .max()
        .unwrap_or(DataType::Void)
    }

    pub fn element_pitch_bytes(&self) -> usize {
        (self.element_pitch_bits / 8) as usize
    }
}
