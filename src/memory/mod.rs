//! Shared memory regions and the namespace they are published in

pub mod config;
pub mod namespace;
pub mod regions;

pub use config::RegionConfig;
pub use namespace::{ConnectionPaths, Namespace};
pub use regions::SharedMemoryRegion;
