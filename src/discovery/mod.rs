//! Reference corpus file discovery

pub mod scanner;

pub use scanner::{scan, track_id_for, DiscoveredFile};
