//! Applies one [`RawConverter`] across a whole buffer at a time, so
//! per-sample conversion never re-classifies the channel's numeric shape.

use super::RawConverter;
use crate::user_type::UserValue;

#[derive(Debug, Clone)]
pub struct ConverterLoop {
    converter: RawConverter,
}

impl ConverterLoop {
    pub fn new(converter: RawConverter) -> Self {
        ConverterLoop { converter }
    }

    pub fn converter(&self) -> &RawConverter {
        &self.converter
    }

    /// Converts every raw word in `raw` into `cooked`, in order.
    pub fn to_cooked_buffer(&self, raw: &[u64], cooked: &mut Vec<UserValue>) {
        cooked.clear();
        cooked.reserve(raw.len());
        for &word in raw {
            cooked.push(self.converter.to_cooked(word));
        }
    }

    /// Converts every cooked value in `cooked` into `raw`, in order.
    pub fn to_raw_buffer(&self, cooked: &[UserValue], raw: &mut Vec<u64>) {
        raw.clear();
        raw.reserve(cooked.len());
        for value in cooked {
            raw.push(self.converter.to_raw(value));
        }
    }
}
