//! Filesystem watching and sync dispatch

pub mod coordinator;
pub mod ignore;

pub use coordinator::{SyncTrigger, WatchCoordinator};
pub use ignore::IgnoreList;
