//! Typed register accessors: scalar/1-D and 2-D multiplexed, plus the
//! double-buffer handshake decorator they can opt into.

pub mod double_buffer;
pub mod muxed;
pub mod scalar;

pub use double_buffer::DoubleBufferShared;
pub use muxed::MuxedAccessor;
pub use scalar::ScalarAccessor;

use crate::error::Result;
use crate::version::{Validity, VersionNumber};

/// The common contract every register/variable accessor exposes to the
/// module-hierarchy I/O helpers.
pub trait RegisterAccessor {
    fn pre_read(&mut self) -> Result<()>;
    fn do_read_transfer(&mut self) -> Result<()>;
    fn post_read(&mut self) -> Result<()>;

    fn pre_write(&mut self) -> Result<()>;
    fn do_write_transfer(&mut self) -> Result<()>;
    fn post_write(&mut self, succeeded: bool);

    fn is_readable(&self) -> bool;
    fn is_writeable(&self) -> bool;

    fn version_number(&self) -> VersionNumber;
    fn validity(&self) -> Validity;

    /// Convenience composite of pre/do/post read.
    fn read(&mut self) -> Result<()> {
        self.pre_read()?;
        let result = self.do_read_transfer();
        self.post_read()?;
        result
    }

    /// Convenience composite of pre/do/post write.
    fn write(&mut self) -> Result<()> {
        self.pre_write()?;
        let result = self.do_write_transfer();
        self.post_write(result.is_ok());
        result
    }
}
