//! # harbor-sync
//!
//! Directory synchronization engine.
//!
//! Build one [`DirSync`] per requested `(local, remote)` pair, drop the
//! redundant ones with [`prune`], then [`DirSync::start`] the survivors. Each
//! started sync runs a watch loop fed by a [`ChangeSource`] and a flush loop
//! that publishes buffered changes once per interval.

pub mod change;
pub mod dir_sync;
pub mod error;

pub use change::{Change, ChangeKind, ChangeSource, NotifyChangeSource};
pub use dir_sync::{prune, DirSync, SyncTasks};
pub use error::SyncError;
