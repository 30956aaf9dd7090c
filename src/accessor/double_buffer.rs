//! Double-buffer handshake decorator.
//!
//! States `{idle, locked, reading}`. `idle -> locked` on `pre_read` by
//! clearing the backend's swap-enable bit, but only when this accessor
//! holds the first reference (tracked by a shared, mutex-guarded reference
//! count). `locked -> reading` after reading the "current inactive
//! buffer" indicator register. `reading -> idle` on `post_read`,
//! re-enabling swap when the last reference drops.

use std::sync::{Arc, Mutex};

use crate::backend::DeviceBackend;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Locked,
    Reading,
}

/// State shared by every accessor that reads the same double-buffered
/// region: the enable/indicator registers and the reference count that
/// decides who clears/re-enables the swap bit.
pub struct DoubleBufferShared {
    backend: Arc<dyn DeviceBackend>,
    enable_bar: u64,
    enable_address: u64,
    indicator_bar: u64,
    indicator_address: u64,
    ref_count: Mutex<usize>,
}

impl DoubleBufferShared {
    pub fn new(
        backend: Arc<dyn DeviceBackend>,
        enable_bar: u64,
        enable_address: u64,
        indicator_bar: u64,
        indicator_address: u64,
    ) -> Arc<Self> {
        Arc::new(DoubleBufferShared {
                backend,
                enable_bar,
                enable_address,
                indicator_bar,
                indicator_address,
                ref_count: Mutex::new(0),
        })
    }
}

pub struct DoubleBufferHandshake {
    shared: Arc<DoubleBufferShared>,
    state: HandshakeState,
    /// Physical buffer index marked inactive by the indicator register,
    /// learned during the `Locked -> Reading` transition.
    pub active_buffer_index: usize,
}

impl DoubleBufferHandshake {
    pub fn new(shared: Arc<DoubleBufferShared>) -> Self {
        DoubleBufferHandshake {
            shared,
            state: HandshakeState::Idle,
            active_buffer_index: 0,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn pre_read(&mut self) -> Result<()> {
        {
            let mut count = self.shared.ref_count.lock().unwrap();
            if *count == 0 {
                self.shared
                .backend
                .write(self.shared.enable_bar, self.shared.enable_address, &[0, 0, 0, 0])?;
            }
            *count += 1;
        }
        self.state = HandshakeState::Locked;

        let mut indicator = [0u8; 4];
        self.shared
        .backend
        .read(self.shared.indicator_bar, self.shared.indicator_address, &mut indicator)?;
        self.active_buffer_index = u32::from_le_bytes(indicator) as usize;
        self.state = HandshakeState::Reading;
        Ok(())
    }

    pub fn post_read(&mut self) -> Result<()> {
        let mut count = self.shared.ref_count.lock().unwrap();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.shared
            .backend
            .write(self.shared.enable_bar, self.shared.enable_address, &[1, 0, 0, 0])?;
        }
        self.state = HandshakeState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;

    #[test]
    fn swap_bit_is_zero_only_while_a_reader_holds_it() {
        let backend: Arc<dyn DeviceBackend> = Arc::new(InMemoryBackend::new(1, 4096));
        backend.write(0, 0, &[1, 0, 0, 0]).unwrap();

        let shared = DoubleBufferShared::new(backend.clone(), 0, 0, 0, 8);
        let mut a = DoubleBufferHandshake::new(shared.clone());
        let mut b = DoubleBufferHandshake::new(shared.clone());

        a.pre_read().unwrap();
        let mut enable = [0u8; 4];
        backend.read(0, 0, &mut enable).unwrap();
        assert_eq!(enable, [0, 0, 0, 0]);

        b.pre_read().unwrap();
        a.post_read().unwrap();
        backend.read(0, 0, &mut enable).unwrap();
        assert_eq!(enable, [0, 0, 0, 0]); // b still holds it

        b.post_read().unwrap();
        backend.read(0, 0, &mut enable).unwrap();
        assert_eq!(enable, [1, 0, 0, 0]);
    }
}
