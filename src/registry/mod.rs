//! Directory registry
//!
//! The registry tracks every configured directory server and the mount
//! entries listed there. [`store::DirectoryRegistry`] applies configuration
//! and change notifications under a write lock and runs the network pass
//! under a read lock; [`entry::MountEntry`] is the per-mount state machine
//! the pass drives.

pub mod entry;
pub mod server;
pub mod store;

pub use entry::{EntryState, MountEntry};
pub use server::{DirectoryServer, EntryHandle};
pub use store::DirectoryRegistry;
