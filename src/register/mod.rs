//! The numerically addressed register layer: catalogue, map-file parsers,
//! and the channel/register descriptors they produce.

pub mod catalogue;
pub mod info;
pub mod parser;

pub use catalogue::RegisterCatalogue;
pub use info::{AccessMode, ChannelInfo, DataType, DoubleBufferDescriptor, InterruptId, RegisterInfo};
