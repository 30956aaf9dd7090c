//! In-memory model of a device's registers.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{CoreError, Result};
use crate::register::info::{AccessMode, ChannelInfo, DataType, InterruptId, RegisterInfo};

/// Prefix that selects a numeric-address synthetic register instead of a
/// catalogue lookup, e.g. `/BAR/0/0x1000*16`.
const NUMERIC_ADDRESS_PREFIX: &str = "/BAR/";

#[derive(Debug, Clone, Default)]
pub struct RegisterCatalogue {
    registers: BTreeMap<String, RegisterInfo>,
    metadata: HashMap<String, String>,
    /// Full interrupt-id vectors present in the catalogue.
    interrupts: BTreeSet<InterruptId>,
    /// Every prefix of every interrupt id, mapped back to the full id that
    /// introduced it.
    canonical_interrupts: HashMap<InterruptId, InterruptId>,
}

impl RegisterCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// `addRegister(info)`: canonicalises interrupt ids, inserting every
    /// prefix of `info.interruptId` into the canonical-interrupt set and
    /// the full id into the interrupt set.
    pub fn add_register(&mut self, info: RegisterInfo) -> Result<()> {
        info.validate()?;
        if self.registers.contains_key(&info.path) {
            return Err(CoreError::logic(format!(
                        "duplicate register path {}",
                        info.path
            )));
        }

        if !info.interrupt_id.is_empty() {
            self.interrupts.insert(info.interrupt_id.clone());
            for len in 1..=info.interrupt_id.len() {
                let prefix = info.interrupt_id[..len].to_vec();
                self.canonical_interrupts
                .entry(prefix)
                .or_insert_with(|| info.interrupt_id.clone());
            }
        }

        self.registers.insert(info.path.clone(), info);
        Ok(())
    }

    pub fn has_register(&self, path: &str) -> bool {
        self.registers.contains_key(path) || parse_numeric_address(path).is_some()
    }

    /// `getBackendRegister(path) -> info`: returns by value, synthesising a
    /// register on the fly for numeric-address paths without touching the
    /// stored catalogue.
    pub fn get_backend_register(&self, path: &str) -> Result<RegisterInfo> {
        if let Some(info) = parse_numeric_address(path) {
            return Ok(info);
        }
        self.registers
        .get(path)
        .cloned()
        .ok_or_else(|| CoreError::logic(format!("unknown register {path}")))
    }

    pub fn list_of_interrupts(&self) -> Vec<InterruptId> {
        self.interrupts.iter().cloned().collect()
    }

    pub fn canonical_interrupt_path(&self, prefix: &InterruptId) -> Option<&InterruptId> {
        self.canonical_interrupts.get(prefix)
    }

    pub fn registers(&self) -> impl Iterator<Item = &RegisterInfo> {
        self.registers.values()
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Deep copy, used when a backend exposes its catalogue to callers.
    pub fn clone_catalogue(&self) -> RegisterCatalogue {
        self.clone()
    }
}

/// Parses `/BAR/<bar>/<address>*<nElements>` into a synthetic
/// `RegisterInfo` with a single raw-typed channel. `<address>` accepts
/// decimal or `0x`-prefixed hexadecimal.
fn parse_numeric_address(path: &str) -> Option<RegisterInfo> {
    let rest = path.strip_prefix(NUMERIC_ADDRESS_PREFIX)?;
    let mut parts = rest.splitn(2, '/');
    let bar_str = parts.next()?;
    let tail = parts.next()?;
    let bar: u64 = bar_str.parse().ok()?;

    let (address_str, n_elements) = match tail.split_once('*') {
        Some((addr, n)) => (addr, n.parse::<usize>().ok()?),
        None => (tail, 1),
    };
    let address = parse_number(address_str)?;

    Some(RegisterInfo {
            path: path.to_string(),
            n_elements,
            element_pitch_bits: 32,
            bar,
            address,
            access: AccessMode::ReadWrite,
            interrupt_id: Vec::new(),
            channels: vec![ChannelInfo {
                    bit_offset: 0,
                    data_type: DataType::FixedPoint,
                    width: 32,
                    n_fractional_bits: 0,
                    signed: true,
                    raw_type: 32,
            }],
            double_buffer: None,
    })
}

pub(crate) fn parse_number(token: &str) -> Option<u64> {
    let token = token.trim();
    if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        token.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(path: &str, interrupt_id: InterruptId) -> RegisterInfo {
        let access = if interrupt_id.is_empty() {
            AccessMode::ReadOnly
        } else {
            AccessMode::Interrupt
        };
        RegisterInfo {
            path: path.to_string(),
            n_elements: 1,
            element_pitch_bits: 32,
            bar: 0,
            address: 0,
            access,
            interrupt_id,
            channels: vec![ChannelInfo {
                    bit_offset: 0,
                    data_type: DataType::FixedPoint,
                    width: 32,
                    n_fractional_bits: 0,
                    signed: false,
                    raw_type: 32,
            }],
            double_buffer: None,
        }
    }

    #[test]
    fn numeric_address_path_is_synthesised() {
        let cat = RegisterCatalogue::new();
        assert!(cat.has_register("/BAR/0/0x1000*16"));
        let info = cat.get_backend_register("/BAR/0/0x1000*16").unwrap();
        assert_eq!(info.bar, 0);
        assert_eq!(info.address, 0x1000);
        assert_eq!(info.n_elements, 16);
    }

    #[test]
    fn duplicate_path_is_rejected() {
        let mut cat = RegisterCatalogue::new();
        cat.add_register(reg("/a/b", vec![])).unwrap();
        assert!(cat.add_register(reg("/a/b", vec![])).is_err());
    }

    #[test]
    fn interrupt_prefixes_are_canonicalised() {
        let mut cat = RegisterCatalogue::new();
        cat.add_register(reg("/irq", vec![1, 2, 3])).unwrap();
        assert_eq!(
            cat.canonical_interrupt_path(&vec![1, 2]),
            Some(&vec![1, 2, 3])
        );
        assert_eq!(cat.list_of_interrupts(), vec![vec![1, 2, 3]]);
    }
}
