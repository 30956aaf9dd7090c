//! Byte-accurate aligned I/O against a device backend, merge-aware for
//! transfer groups.

use std::sync::Arc;

use crate::backend::DeviceBackend;
use crate::error::Result;
use crate::version::VersionNumber;

/// Transfers a contiguous byte region `[start_address, start_address +
/// number_of_bytes)` within a numbered BAR. Extends the region outward to
/// the backend's reported alignment at construction time; unaligned
/// accesses perform a read-modify-write under the backend's mutex.
pub struct LowLevelTransferElement {
    backend: Arc<dyn DeviceBackend>,
    bar: u64,
    /// Address/length as requested by the accessor.
    requested_address: u64,
    requested_len: usize,
    /// Address/length after alignment extension; what actually gets
    /// transferred.
    aligned_address: u64,
    buffer: Vec<u8>,
    unaligned: bool,
    version: VersionNumber,
    active_exception: Option<crate::error::CoreError>,
    pre_write_snapshot: Option<Vec<u8>>,
}

impl LowLevelTransferElement {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        bar: u64,
        address: u64,
        number_of_bytes: usize,
    ) -> Self {
        let alignment = backend.minimum_transfer_alignment(bar).max(1) as u64;
        let aligned_address = (address / alignment) * alignment;
        let aligned_end = {
            let requested_end = address + number_of_bytes as u64;
            requested_end.div_ceil(alignment) * alignment
        };
        let aligned_len = (aligned_end - aligned_address) as usize;
        let unaligned = aligned_address != address || aligned_len != number_of_bytes;

        LowLevelTransferElement {
            backend,
            bar,
            requested_address: address,
            requested_len: number_of_bytes,
            aligned_address,
            buffer: vec![0u8; aligned_len],
            unaligned,
            version: VersionNumber::none(),
            active_exception: None,
            pre_write_snapshot: None,
        }
    }

    pub fn is_unaligned(&self) -> bool {
        self.unaligned
    }

    pub fn version(&self) -> VersionNumber {
        self.version
    }

    /// Offset of the requested window within the (possibly wider) aligned
    /// buffer.
    fn requested_offset(&self) -> usize {
        (self.requested_address - self.aligned_address) as usize
    }

    /// The requested window, as a slice into the aligned buffer.
    pub fn requested_window(&self) -> &[u8] {
        let off = self.requested_offset();
        &self.buffer[off..off + self.requested_len]
    }

    pub fn requested_window_mut(&mut self) -> &mut [u8] {
        let off = self.requested_offset();
        &mut self.buffer[off..off + self.requested_len]
    }

    /// Translates an address inside the BAR into an offset in the (possibly
    /// merged) buffer; used by callers that held a pointer into a region
    /// before a merge replaced this element.
    pub fn begin(&self, address_in_bar: u64) -> Option<usize> {
        if address_in_bar < self.aligned_address {
            return None;
        }
        let offset = (address_in_bar - self.aligned_address) as usize;
        if offset > self.buffer.len() {
            return None;
        }
        Some(offset)
    }

    pub fn read(&mut self) -> Result<()> {
        let result = self.backend.read(self.bar, self.aligned_address, &mut self.buffer);
        match result {
            Ok(()) => {
                self.version = VersionNumber::new();
                self.active_exception = None;
                Ok(())
            }
            Err(e) => {
                self.active_exception = Some(e.clone());
                Err(e)
            }
        }
    }

    /// `preWrite`: for unaligned access, fetches the surrounding window so
    /// the eventual write is a correct read-modify-write. The caller is
    /// expected to hold `backend.unaligned_access_lock()` across
    /// `pre_write`..`post_write` for unaligned elements.
    pub fn pre_write(&mut self) -> Result<()> {
        if self.unaligned {
            self.backend.read(self.bar, self.aligned_address, &mut self.buffer)?;
            self.pre_write_snapshot = Some(self.buffer.clone());
        }
        Ok(())
    }

    pub fn do_write_transfer(&mut self) -> Result<()> {
        let result = self.backend.write(self.bar, self.aligned_address, &self.buffer);
        if let Err(e) = &result {
            self.active_exception = Some(e.clone());
        }
        result
    }

    /// `postWrite`: commits (drops the pre-write snapshot) on success, or
    /// reverts the buffer to its pre-write contents on exception.
    pub fn post_write(&mut self, succeeded: bool) {
        if succeeded {
            self.pre_write_snapshot = None;
        } else if let Some(snapshot) = self.pre_write_snapshot.take() {
            self.buffer = snapshot;
        }
    }

    /// Replays a previously stored backend exception at the next
    /// post-step boundary.
    pub fn take_active_exception(&mut self) -> Option<crate::error::CoreError> {
        self.active_exception.take()
    }

    /// `isMergeable(other)`: same backend and BAR, and `other`'s region is
    /// adjacent to or overlaps this one.
    pub fn is_mergeable(&self, other: &LowLevelTransferElement) -> bool {
        if !Arc::ptr_eq(&self.backend, &other.backend) || self.bar != other.bar {
            return false;
        }
        if !self.backend.can_merge_requests() {
            return false;
        }
        let a_end = self.aligned_address + self.buffer.len() as u64;
        let b_end = other.aligned_address + other.buffer.len() as u64;
        self.aligned_address <= b_end && other.aligned_address <= a_end
    }

    /// Merges `other` into `self`, returning a new element covering the
    /// union region. Callers holding a pointer into either old region
    /// translate it through the merged element's `begin`.
    pub fn merge(&self, other: &LowLevelTransferElement) -> LowLevelTransferElement {
        let start = self.aligned_address.min(other.aligned_address);
        let end = (self.aligned_address + self.buffer.len() as u64)
        .max(other.aligned_address + other.buffer.len() as u64);
        LowLevelTransferElement::new(
            self.backend.clone(),
            self.bar,
            start,
            (end - start) as usize,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    #[test]
    fn aligned_access_is_not_flagged_unaligned() {
        let backend: Arc<dyn DeviceBackend> = Arc::new(InMemoryBackend::new(1, 4096));
        let el = LowLevelTransferElement::new(backend, 0, 0x100, 4);
        assert!(!el.is_unaligned());
    }

    #[test]
    fn read_then_write_round_trips() {
        let backend: Arc<dyn DeviceBackend> = Arc::new(InMemoryBackend::new(1, 4096));
        let mut el = LowLevelTransferElement::new(backend, 0, 0x100, 4);
        el.requested_window_mut().copy_from_slice(&[1, 2, 3, 4]);
        el.pre_write().unwrap();
        el.do_write_transfer().unwrap();
        el.post_write(true);

        let mut el2 = LowLevelTransferElement::new(el_backend(&el), 0, 0x100, 4);
        el2.read().unwrap();
        assert_eq!(el2.requested_window(), &[1, 2, 3, 4]);
    }

    fn el_backend(el: &LowLevelTransferElement) -> Arc<dyn DeviceBackend> {
        el.backend.clone()
    }

    #[test]
    fn merge_covers_union_region() {
        let backend: Arc<dyn DeviceBackend> = Arc::new(InMemoryBackend::new(1, 4096));
        let a = LowLevelTransferElement::new(backend.clone(), 0, 0x100, 4);
        let b = LowLevelTransferElement::new(backend.clone(), 0, 0x104, 4);
        assert!(a.is_mergeable(&b));
        let merged = a.merge(&b);
        assert_eq!(merged.begin(0x100), Some(0));
        assert_eq!(merged.begin(0x104), Some(4));
    }
}
