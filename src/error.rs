use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::{EntryId, GroupId, TabId};

/// Why an operation was rejected. A rejected operation changed nothing: no
/// save happened and no notification was raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PinError {
    #[error("already pinned: {}", path.display())]
    DuplicatePin { path: PathBuf },

    #[error("not an existing file or directory: {}", path.display())]
    NonExistentTarget { path: PathBuf },

    #[error("unknown tab: {id}")]
    UnknownTab { id: TabId },

    #[error("unknown group: {id}")]
    UnknownGroup { id: GroupId },

    #[error("unknown entry: {id}")]
    UnknownEntry { id: EntryId },

    #[error("group {group} does not belong to tab {tab}")]
    GroupTabMismatch { group: GroupId, tab: TabId },

    #[error("groups cannot be nested")]
    NestedGroup,

    #[error("the last tab cannot be removed")]
    LastTab,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt pin record {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cannot watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
