//! Pinned-item arrangement and persistence for a start-menu style launcher.
//!
//! Pins live in tabs, optionally inside one level of groups, each placed on
//! a per-context grid. [`PinBoard`] is the entry point: it owns the current
//! [`Hierarchy`], saves it after every change and follows writes made by
//! other processes.

pub mod arrangement;
pub mod board;
pub mod config;
pub mod error;
pub mod hierarchy;
pub mod model;
pub mod store;
pub mod watcher;

pub use arrangement::{ArrangementEngine, LayoutMode};
pub use board::{Listener, PinBoard};
pub use config::Config;
pub use error::{PinError, StoreError};
pub use hierarchy::{EntryPatch, HierarchyManager};
pub use model::{
    Cell, Context, ElementId, Entry, EntryId, EntryType, Group, GroupId, Hierarchy, Tab, TabId,
};
pub use store::Store;
