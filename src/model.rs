use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use crate::arrangement::LayoutMode;

/// Name given to the tab of a fresh hierarchy.
pub const DEFAULT_TAB_NAME: &str = "Pinned";

/// File suffix that marks an internet shortcut.
const INTERNET_SHORTCUT_SUFFIX: &str = "url";

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// A fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

id_type!(
    /// Opaque identifier of a tab.
    TabId
);
id_type!(
    /// Opaque identifier of a group.
    GroupId
);
id_type!(
    /// Opaque identifier of a pinned entry.
    EntryId
);

/// A grid position. Ordering is row-major, which is the scan order used for
/// every placement decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub row: u32,
    pub column: u32,
}

impl Cell {
    pub const ORIGIN: Cell = Cell { row: 0, column: 0 };

    /// A cell at `row`, `column`.
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }

    /// The `index`-th cell of a row-major scan over `columns` columns.
    pub fn from_index(index: usize, columns: u32) -> Self {
        let columns = columns.max(1) as usize;
        Self {
            row: (index / columns) as u32,
            column: (index % columns) as u32,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.column)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    #[default]
    Application,
    Folder,
    InternetShortcut,
}

impl EntryType {
    /// Classify a target: directories are folders, `.url` files are internet
    /// shortcuts, anything else launches as an application.
    pub fn classify(path: &Path, is_dir: bool) -> Self {
        if is_dir {
            return EntryType::Folder;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case(INTERNET_SHORTCUT_SUFFIX) => {
                EntryType::InternetShortcut
            }
            _ => EntryType::Application,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tab {
    pub id: TabId,
    pub name: String,
    /// Dense, zero-based position among all tabs.
    pub order: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub tab_id: TabId,
    pub cell: Cell,
    pub is_expanded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub id: EntryId,
    /// Canonical name derived from the target.
    pub name: String,
    pub custom_name: Option<String>,
    pub path: PathBuf,
    pub entry_type: EntryType,
    pub tab_id: TabId,
    pub group_id: Option<GroupId>,
    pub cell: Cell,
}

impl Entry {
    /// The custom name if one is set, otherwise the canonical name.
    pub fn display_name(&self) -> &str {
        self.custom_name.as_deref().unwrap_or(&self.name)
    }

    /// The grid this entry lives in.
    pub fn context(&self) -> Context {
        match self.group_id {
            Some(group) => Context::Group(group),
            None => Context::TabTop(self.tab_id),
        }
    }
}

/// One independent grid: the top level of a tab, or the inside of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Context {
    TabTop(TabId),
    Group(GroupId),
}

/// Anything that occupies a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementId {
    Group(GroupId),
    Entry(EntryId),
}

/// The whole pinned-item hierarchy as flat collections keyed by id, plus
/// the layout policy every process applies to it.
///
/// `tabs` is kept sorted by `order`, and `order` always equals the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
    pub(crate) layout: LayoutMode,
    pub(crate) tabs: Vec<Tab>,
    pub(crate) groups: Vec<Group>,
    pub(crate) entries: Vec<Entry>,
}

impl Default for Hierarchy {
    fn default() -> Self {
        Self::with_layout(LayoutMode::default())
    }
}

impl Hierarchy {
    /// One empty tab under the given layout policy.
    pub fn with_layout(layout: LayoutMode) -> Self {
        Self {
            layout,
            tabs: vec![Tab {
                id: TabId::new(),
                name: DEFAULT_TAB_NAME.to_string(),
                order: 0,
            }],
            groups: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Layout policy stored with the record.
    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    /// Tabs in display order.
    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    /// All groups, in creation order.
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// All entries, in creation order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Look up a tab by id.
    pub fn tab(&self, id: TabId) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    /// Look up a group by id.
    pub fn group(&self, id: GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Look up an entry by id.
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// The tab with the lowest order.
    pub fn earliest_tab(&self) -> Option<&Tab> {
        self.tabs.first()
    }

    /// The entry pinning `path`, compared by normalized path key.
    pub fn entry_by_path(&self, path: &Path) -> Option<&Entry> {
        let key = path_key(path);
        self.entries.iter().find(|e| path_key(&e.path) == key)
    }

    /// Groups placed on a tab's top level.
    pub fn groups_in_tab(&self, tab: TabId) -> impl Iterator<Item = &Group> {
        self.groups.iter().filter(move |g| g.tab_id == tab)
    }

    /// Entries living directly in a context.
    pub fn entries_in(&self, context: Context) -> impl Iterator<Item = &Entry> {
        self.entries.iter().filter(move |e| e.context() == context)
    }

    /// Whether the context refers to a tab or group that exists.
    pub fn has_context(&self, context: Context) -> bool {
        match context {
            Context::TabTop(tab) => self.tab(tab).is_some(),
            Context::Group(group) => self.group(group).is_some(),
        }
    }

    /// No groups and no entries, whatever the tabs.
    pub fn has_no_content(&self) -> bool {
        self.groups.is_empty() && self.entries.is_empty()
    }

    pub(crate) fn tab_mut(&mut self, id: TabId) -> Option<&mut Tab> {
        self.tabs.iter_mut().find(|t| t.id == id)
    }

    pub(crate) fn group_mut(&mut self, id: GroupId) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.id == id)
    }

    pub(crate) fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub(crate) fn renumber_tabs(&mut self) {
        for (order, tab) in self.tabs.iter_mut().enumerate() {
            tab.order = order;
        }
    }
}

/// Make `path` absolute and lexically clean: `.` dropped, `..` resolved,
/// no trailing separator. The filesystem is not consulted, so paths to
/// targets that no longer exist still normalize.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Comparison key for de-duplicating pins. Case-insensitive where the
/// filesystem usually is.
pub fn path_key(path: &Path) -> String {
    let text = normalize_path(path).to_string_lossy().into_owned();
    if cfg!(windows) {
        text.to_lowercase()
    } else {
        text
    }
}

/// Display name derived from the target: the folder name for folders, the
/// file stem otherwise.
pub fn canonical_name(path: &Path, entry_type: EntryType) -> String {
    let part = match entry_type {
        EntryType::Folder => path.file_name(),
        EntryType::Application | EntryType::InternetShortcut => path.file_stem(),
    };
    part.and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}
