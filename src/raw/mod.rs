//! Bit-exact cooked<->raw conversion over arbitrary-width raw words.
//!
//! The implementation is selected once, at construction, by the triple
//! (significant-bits case, fractional case, signed flag) so that the inner
//! loop over a buffer never re-inspects the channel's numeric shape per
//! sample: the classification happens exactly once, and the resulting
//! min/max bounds are cached, so `to_cooked`/`to_raw` themselves are
//! branch-light arithmetic, not re-classification.

mod buffer;

pub use buffer::ConverterLoop;

use crate::register::info::{ChannelInfo, DataType};
use crate::user_type::{UserTypeTag, UserValue};

/// Which bit-width fast path a converter picked — purely informational,
/// recorded so tests and debug output can see the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignificantBitsCase {
    Bit8,
    Bit16,
    Bit32,
    Bit64,
    Generic,
}

impl SignificantBitsCase {
    fn classify(width: u8) -> Self {
        match width {
            8 => SignificantBitsCase::Bit8,
            16 => SignificantBitsCase::Bit16,
            32 => SignificantBitsCase::Bit32,
            64 => SignificantBitsCase::Bit64,
            _ => SignificantBitsCase::Generic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FractionalCase {
    Integer,
    FixedPositive,
    FixedNegative,
    Ieee754_32,
}

impl FractionalCase {
    fn classify(data_type: DataType, n_fractional_bits: i32) -> Self {
        if data_type == DataType::IEEE754 {
            FractionalCase::Ieee754_32
        } else if n_fractional_bits > 0 {
            FractionalCase::FixedPositive
        } else if n_fractional_bits < 0 {
            FractionalCase::FixedNegative
        } else {
            FractionalCase::Integer
        }
    }
}

/// A bit-exact converter for one channel, bound to a target [`UserTypeTag`].
#[derive(Debug, Clone)]
pub struct RawConverter {
    width: u8,
    n_fractional_bits: i32,
    signed: bool,
    significant_bits_case: SignificantBitsCase,
    fractional_case: FractionalCase,
    user_type: UserTypeTag,
    min_raw: u64,
    max_raw: u64,
    min_cooked: f64,
    max_cooked: f64,
}

fn width_mask(width: u8) -> u64 {
    if width == 0 {
        0
    } else if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn sign_extend(raw_masked: u64, width: u8) -> i64 {
    if width == 0 {
        return 0;
    }
    if width >= 64 {
        return raw_masked as i64;
    }
    let sign_bit = 1u64 << (width - 1);
    (raw_masked ^ sign_bit).wrapping_sub(sign_bit) as i64
}

fn scale_factor(n_fractional_bits: i32) -> f64 {
    2f64.powi(-n_fractional_bits)
}

impl RawConverter {
    pub fn new(channel: &ChannelInfo, user_type: UserTypeTag) -> Self {
        let width = channel.width;
        let significant_bits_case = SignificantBitsCase::classify(width);
        let fractional_case = FractionalCase::classify(channel.data_type, channel.n_fractional_bits);

        let mut converter = RawConverter {
            width,
            n_fractional_bits: channel.n_fractional_bits,
            signed: channel.signed,
            significant_bits_case,
            fractional_case,
            user_type,
            min_raw: 0,
            max_raw: width_mask(width),
            min_cooked: 0.0,
            max_cooked: 0.0,
        };

        if channel.signed && width > 0 {
            converter.min_raw = 1u64 << (width - 1);
            converter.max_raw = width_mask(width) >> 1;
        }

        // Round-trip the extremal raw values through the numeric core to
        // get min/max cooked bounds for saturation.
        converter.min_cooked = converter.raw_to_f64(converter.min_raw);
        converter.max_cooked = converter.raw_to_f64(converter.max_raw);
        if converter.min_cooked > converter.max_cooked {
            std::mem::swap(&mut converter.min_cooked, &mut converter.max_cooked);
        }
        converter
    }

    pub fn significant_bits_case(&self) -> SignificantBitsCase {
        self.significant_bits_case
    }

    pub fn fractional_case(&self) -> FractionalCase {
        self.fractional_case
    }

    /// Interprets a raw word (sign-extended or zero-extended as needed) as
    /// the converter's numeric intermediate, before the target-type cast.
    fn raw_to_f64(&self, raw: u64) -> f64 {
        let masked = raw & width_mask(self.width);

        if self.fractional_case == FractionalCase::Ieee754_32 {
            return f32::from_bits(masked as u32) as f64;
        }

        let signed_value = if self.signed {
            sign_extend(masked, self.width) as f64
        } else {
            masked as f64
        };

        match self.fractional_case {
            FractionalCase::Integer => signed_value,
            FractionalCase::FixedPositive => signed_value * scale_factor(self.n_fractional_bits),
            FractionalCase::FixedNegative => {
                // Left shift by |nFractionalBits|; expressed as the same
                // scaling-by-factor path so integer and floating user
                // types share one formula.
                signed_value * scale_factor(self.n_fractional_bits)
            }
            FractionalCase::Ieee754_32 => unreachable!(),
        }
    }

    fn f64_to_raw_unclamped(&self, cooked: f64) -> i128 {
        if self.fractional_case == FractionalCase::Ieee754_32 {
            return (cooked as f32).to_bits() as i128;
        }

        let scaled = match self.fractional_case {
            FractionalCase::Integer => cooked,
            FractionalCase::FixedPositive | FractionalCase::FixedNegative => {
                cooked / scale_factor(self.n_fractional_bits)
            }
            FractionalCase::Ieee754_32 => unreachable!(),
        };
        scaled.round() as i128
    }

    /// `toCooked(raw) -> UserType`.
    pub fn to_cooked(&self, raw: u64) -> UserValue {
        if self.user_type == UserTypeTag::Void {
            return UserValue::Void;
        }

        let value = self.raw_to_f64(raw);

        match self.user_type {
            UserTypeTag::Int8 => UserValue::Int8(clamp_round(value, i8::MIN as f64, i8::MAX as f64) as i8),
            UserTypeTag::UInt8 => UserValue::UInt8(clamp_round(value, u8::MIN as f64, u8::MAX as f64) as u8),
            UserTypeTag::Int16 => UserValue::Int16(clamp_round(value, i16::MIN as f64, i16::MAX as f64) as i16),
            UserTypeTag::UInt16 => UserValue::UInt16(clamp_round(value, u16::MIN as f64, u16::MAX as f64) as u16),
            UserTypeTag::Int32 => UserValue::Int32(clamp_round(value, i32::MIN as f64, i32::MAX as f64) as i32),
            UserTypeTag::UInt32 => UserValue::UInt32(clamp_round(value, u32::MIN as f64, u32::MAX as f64) as u32),
            UserTypeTag::Int64 => UserValue::Int64(value.round() as i64),
            UserTypeTag::UInt64 => UserValue::UInt64(value.max(0.0).round() as u64),
            UserTypeTag::Float32 => UserValue::Float32(value as f32),
            UserTypeTag::Float64 => UserValue::Float64(value),
            UserTypeTag::Bool => UserValue::Bool(value != 0.0),
            UserTypeTag::Str => UserValue::Str(format_cooked(value, self.n_fractional_bits)),
            UserTypeTag::Void | UserTypeTag::Any => UserValue::Void,
        }
    }

    /// `toRaw(UserType) -> raw`. Range violations saturate, they never fail.
    pub fn to_raw(&self, value: &UserValue) -> u64 {
        if matches!(value, UserValue::Void) {
            return 0;
        }

        let numeric = match value {
            UserValue::Str(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            other => other.as_f64().unwrap_or(0.0),
        };

        // IEEE754 channels reinterpret bits rather than scale into a
        // numeric range, and `max_cooked` is NaN for them (derived from
        // `f32::from_bits(0xFFFFFFFF)`), so `f64::clamp` would panic.
        let clamped = if self.fractional_case == FractionalCase::Ieee754_32 {
            numeric
        } else {
            numeric.clamp(self.min_cooked, self.max_cooked)
        };
        let raw_signed = self.f64_to_raw_unclamped(clamped);
        let raw_unsigned = if raw_signed < 0 {
            (raw_signed + (1i128 << 64)) as u64
        } else {
            raw_signed as u64
        };
        raw_unsigned & width_mask(self.width)
    }

    pub fn min_cooked(&self) -> f64 {
        self.min_cooked
    }

    pub fn max_cooked(&self) -> f64 {
        self.max_cooked
    }
}

fn clamp_round(value: f64, min: f64, max: f64) -> f64 {
    value.clamp(min, max).round()
}

fn format_cooked(value: f64, n_fractional_bits: i32) -> String {
    if n_fractional_bits == 0 {
        format!("{}", value.round() as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::info::DataType;

    fn channel(width: u8, n_fractional_bits: i32, signed: bool, data_type: DataType) -> ChannelInfo {
        ChannelInfo {
            bit_offset: 0,
            data_type,
            width,
            n_fractional_bits,
            signed,
            raw_type: 16,
        }
    }

    #[test]
    fn fixed_point_round_trip_scenario() {
        let ch = channel(12, 3, true, DataType::FixedPoint);
        let conv = RawConverter::new(&ch, UserTypeTag::Float64);

        assert_eq!(conv.to_cooked(0x7FF), UserValue::Float64(255.875));
        assert_eq!(conv.to_cooked(0x800), UserValue::Float64(-256.0));
        assert_eq!(conv.to_raw(&UserValue::Float64(1.125)), 0x009);
        assert_eq!(conv.to_raw(&UserValue::Float64(-1.0)), 0xFF8);
        assert_eq!(conv.to_raw(&UserValue::Float64(300.0)), 0x7FF);
        assert_eq!(conv.to_raw(&UserValue::Float64(-300.0)), 0x800);
    }

    #[test]
    fn ieee754_channel_reinterprets_bits() {
        let ch = channel(32, 0, false, DataType::IEEE754);
        let conv = RawConverter::new(&ch, UserTypeTag::Float64);
        let raw = 1.0f32.to_bits() as u64;
        assert_eq!(conv.to_cooked(raw), UserValue::Float64(1.0));
        assert_eq!(conv.to_raw(&UserValue::Float64(1.0)), raw);
    }

    #[test]
    fn integer_channel_round_trips_exactly() {
        let ch = channel(16, 0, true, DataType::FixedPoint);
        let conv = RawConverter::new(&ch, UserTypeTag::Int32);
        for raw in [0u64, 1, 0x7FFF, 0x8000, 0xFFFF] {
            let cooked = conv.to_cooked(raw);
            let back = conv.to_raw(&cooked);
            assert_eq!(back, raw, "raw={raw:#x} cooked={cooked:?}");
        }
    }

    #[test]
    fn void_channel_is_zero_sized() {
        let ch = channel(0, 0, false, DataType::Void);
        let conv = RawConverter::new(&ch, UserTypeTag::Void);
        assert_eq!(conv.to_cooked(0xDEAD), UserValue::Void);
        assert_eq!(conv.to_raw(&UserValue::Void), 0);
    }

    #[test]
    fn string_channel_formats_decimal() {
        let ch = channel(8, 0, false, DataType::FixedPoint);
        let conv = RawConverter::new(&ch, UserTypeTag::Str);
        assert_eq!(conv.to_cooked(42), UserValue::Str("42".to_string()));
    }
}
