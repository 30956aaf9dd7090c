//! The device-backend contract the core consumes, and the
//! low-level transfer element built on top of it: one
//! numbered-BAR backend, synchronous read/write plus an async-interrupt
//! activation hook.

pub mod transfer_element;

use std::sync::Mutex;

use crate::error::Result;

/// Synchronous, blocking device transport. The core depends only on this
/// narrow contract; PCIe/Rebot/etc transports are external collaborators.
pub trait DeviceBackend: Send + Sync {
    fn read(&self, bar: u64, address: u64, out: &mut [u8]) -> Result<()>;
    fn write(&self, bar: u64, address: u64, data: &[u8]) -> Result<()>;

    /// Default accepts BARs 0..=5 and 13 (the DMA pseudo-BAR alias),
    /// matching the traditional map-file dialect's acceptance of BAR 13.
    fn bar_index_valid(&self, bar: u64) -> bool {
        (0..=5).contains(&bar) || bar == 13
    }

    fn minimum_transfer_alignment(&self, _bar: u64) -> usize {
        1
    }

    fn can_merge_requests(&self) -> bool {
        false
    }

    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    /// Activates async delivery for an interrupt-driven register. Backends
    /// that don't support interrupts may leave this a no-op.
    fn activate_async_read(&self, _interrupt_id: &[u32]) -> Result<()> {
        Ok(())
    }

    /// One mutex per backend, used only to serialise unaligned
    /// read-modify-write windows.
    fn unaligned_access_lock(&self) -> &Mutex<()>;
}

/// In-memory test double: a flat byte array per BAR.
pub struct InMemoryBackend {
    bars: Vec<Mutex<Vec<u8>>>,
    lock: Mutex<()>,
}

impl InMemoryBackend {
    pub fn new(bar_count: usize, bar_size: usize) -> Self {
        InMemoryBackend {
            bars: (0..bar_count).map(|_| Mutex::new(vec![0u8; bar_size])).collect(),
            lock: Mutex::new(()),
        }
    }
}

impl DeviceBackend for InMemoryBackend {
    fn can_merge_requests(&self) -> bool {
        true
    }

    fn read(&self, bar: u64, address: u64, out: &mut [u8]) -> Result<()> {
        let bar = self.bars.get(bar as usize).ok_or_else(|| {
                crate::error::CoreError::runtime(format!("read from invalid bar {bar}"))
        })?;
        let data = bar.lock().unwrap();
        let start = address as usize;
        let end = start + out.len();
        if end > data.len() {
            return Err(crate::error::CoreError::runtime(format!(
                        "read out of bounds: {start}..{end} > {}",
                        data.len()
            )));
        }
        out.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write(&self, bar: u64, address: u64, data_in: &[u8]) -> Result<()> {
        let bar = self.bars.get(bar as usize).ok_or_else(|| {
                crate::error::CoreError::runtime(format!("write to invalid bar {bar}"))
        })?;
        let mut data = bar.lock().unwrap();
        let start = address as usize;
        let end = start + data_in.len();
        if end > data.len() {
            return Err(crate::error::CoreError::runtime(format!(
                        "write out of bounds: {start}..{end} > {}",
                        data.len()
            )));
        }
        data[start..end].copy_from_slice(data_in);
        Ok(())
    }

    fn unaligned_access_lock(&self) -> &Mutex<()> {
        &self.lock
    }
}
