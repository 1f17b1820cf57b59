use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::arrangement::{ArrangementEngine, LayoutMode};
use crate::config::{Config, DEFAULT_COLUMNS};
use crate::error::StoreError;
use crate::model::{
    canonical_name, normalize_path, path_key, Cell, Context, Entry, EntryId, EntryType, Group,
    GroupId, Hierarchy, Tab, TabId,
};

pub const RECORD_FILE_NAME: &str = "pins.json";
pub const LEGACY_FILE_NAME: &str = "pinned.json";

const MIGRATED_SUFFIX: &str = "migrated";

/// Remembers when this process last wrote the record, so the change it
/// causes can be told apart from changes made by other processes.
#[derive(Debug, Clone)]
pub struct SelfWriteGuard {
    window: Duration,
    last_write: Arc<Mutex<Option<Instant>>>,
}

impl SelfWriteGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_write: Arc::new(Mutex::new(None)),
        }
    }

    /// Record that we are about to write.
    pub fn arm(&self) {
        *self.last_write.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Whether a change seen now is likely our own write.
    pub fn is_suppressed(&self) -> bool {
        let last_write = *self.last_write.lock().unwrap_or_else(PoisonError::into_inner);
        last_write.is_some_and(|at| at.elapsed() < self.window)
    }
}

// --- Persisted shape ---

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinRecord {
    /// Absent in records written before the layout was shared.
    #[serde(default)]
    layout: Option<LayoutMode>,
    #[serde(default)]
    tabs: Vec<TabRecord>,
    #[serde(default)]
    groups: Vec<GroupRecord>,
    #[serde(default)]
    items: Vec<ItemRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabRecord {
    id: TabId,
    name: String,
    #[serde(default)]
    order: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupRecord {
    id: GroupId,
    name: String,
    tab_id: TabId,
    #[serde(default)]
    grid_row: Option<u32>,
    #[serde(default)]
    grid_column: Option<u32>,
    #[serde(default)]
    is_expanded: bool,
    /// Placement hint from records written before grid coordinates.
    #[serde(default, skip_serializing)]
    global_order: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemRecord {
    id: EntryId,
    #[serde(default)]
    name: String,
    #[serde(default)]
    custom_name: Option<String>,
    path: PathBuf,
    #[serde(rename = "type", default)]
    entry_type: EntryType,
    tab_id: TabId,
    #[serde(default)]
    group_id: Option<GroupId>,
    #[serde(default)]
    grid_row: Option<u32>,
    #[serde(default)]
    grid_column: Option<u32>,
    #[serde(default, skip_serializing)]
    global_order: Option<i64>,
}

/// An entry of the older flat-list format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyEntry {
    path: PathBuf,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    custom_name: Option<String>,
    #[serde(rename = "type", default)]
    entry_type: Option<EntryType>,
    #[serde(default, alias = "globalOrder")]
    order: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRecord {
    Current(PinRecord),
    Legacy(Vec<LegacyEntry>),
}

fn cell_of(row: Option<u32>, column: Option<u32>) -> Option<Cell> {
    Some(Cell::new(row?, column?))
}

/// Sort key putting hinted elements first, in hint order.
fn order_key(order: Option<i64>) -> (bool, i64) {
    (order.is_none(), order.unwrap_or_default())
}

impl From<&Hierarchy> for PinRecord {
    fn from(hierarchy: &Hierarchy) -> Self {
        Self {
            layout: Some(hierarchy.layout()),
            tabs: hierarchy
                .tabs()
                .iter()
                .map(|t| TabRecord {
                    id: t.id,
                    name: t.name.clone(),
                    order: t.order,
                })
                .collect(),
            groups: hierarchy
                .groups()
                .iter()
                .map(|g| GroupRecord {
                    id: g.id,
                    name: g.name.clone(),
                    tab_id: g.tab_id,
                    grid_row: Some(g.cell.row),
                    grid_column: Some(g.cell.column),
                    is_expanded: g.is_expanded,
                    global_order: None,
                })
                .collect(),
            items: hierarchy
                .entries()
                .iter()
                .map(|e| ItemRecord {
                    id: e.id,
                    name: e.name.clone(),
                    custom_name: e.custom_name.clone(),
                    path: e.path.clone(),
                    entry_type: e.entry_type,
                    tab_id: e.tab_id,
                    group_id: e.group_id,
                    grid_row: Some(e.cell.row),
                    grid_column: Some(e.cell.column),
                    global_order: None,
                })
                .collect(),
        }
    }
}

/// An element still waiting for a cell.
enum Unplaced {
    Group(Group),
    Entry(Entry),
}

impl PinRecord {
    /// Build a consistent hierarchy, repairing whatever references do not
    /// resolve and placing elements that carry no coordinates or share a
    /// cell with an earlier element of their context.
    fn into_hierarchy(self, columns: u32, default_layout: LayoutMode) -> Hierarchy {
        let mut hierarchy = Hierarchy {
            layout: self.layout.unwrap_or(default_layout),
            tabs: Vec::new(),
            groups: Vec::new(),
            entries: Vec::new(),
        };

        let mut tabs = self.tabs;
        tabs.sort_by_key(|t| t.order);
        let mut seen_tabs = HashSet::new();
        for tab in tabs {
            if seen_tabs.insert(tab.id) {
                hierarchy.tabs.push(Tab {
                    id: tab.id,
                    name: tab.name,
                    order: 0,
                });
            } else {
                warn!(tab = %tab.id, "dropping duplicate tab");
            }
        }
        if hierarchy.tabs.is_empty() {
            hierarchy.tabs = Hierarchy::default().tabs;
        }
        hierarchy.renumber_tabs();
        let fallback_tab = hierarchy.tabs[0].id;

        let mut unplaced = Vec::new();
        // First occupant of a cell keeps it.
        let mut taken: HashSet<(Context, Cell)> = HashSet::new();

        for record in self.groups {
            if hierarchy.group(record.id).is_some() {
                warn!(group = %record.id, "dropping duplicate group");
                continue;
            }
            let tab_id = if hierarchy.tab(record.tab_id).is_some() {
                record.tab_id
            } else {
                warn!(group = %record.id, tab = %record.tab_id, "group refers to a missing tab");
                fallback_tab
            };
            let group = Group {
                id: record.id,
                name: record.name,
                tab_id,
                cell: Cell::ORIGIN,
                is_expanded: record.is_expanded,
            };
            match cell_of(record.grid_row, record.grid_column) {
                Some(cell) if tab_id == record.tab_id && taken.insert((Context::TabTop(tab_id), cell)) => {
                    hierarchy.groups.push(Group { cell, ..group })
                }
                Some(cell) if tab_id == record.tab_id => {
                    warn!(group = %group.id, %cell, "group shares a cell, placing it anew");
                    unplaced.push((order_key(record.global_order), Unplaced::Group(group)));
                }
                _ => unplaced.push((order_key(record.global_order), Unplaced::Group(group))),
            }
        }

        let mut seen_paths = HashSet::new();
        for record in self.items {
            if !seen_paths.insert(path_key(&record.path)) {
                warn!(path = %record.path.display(), "dropping duplicate pin");
                continue;
            }
            let mut relocated = false;
            let tab_id = if hierarchy.tab(record.tab_id).is_some() {
                record.tab_id
            } else {
                warn!(item = %record.id, tab = %record.tab_id, "item refers to a missing tab");
                relocated = true;
                fallback_tab
            };
            let group_id = match record.group_id {
                Some(group) if hierarchy.group(group).is_some_and(|g| g.tab_id == tab_id) => Some(group),
                // Groups still waiting for a cell are valid parents too.
                Some(group)
                    if unplaced.iter().any(
                        |(_, u)| matches!(u, Unplaced::Group(g) if g.id == group && g.tab_id == tab_id),
                    ) =>
                {
                    Some(group)
                }
                Some(group) => {
                    warn!(item = %record.id, %group, "item refers to a missing group");
                    relocated = true;
                    None
                }
                None => None,
            };
            let name = if record.name.is_empty() {
                canonical_name(&record.path, record.entry_type)
            } else {
                record.name
            };
            let entry = Entry {
                id: record.id,
                name,
                custom_name: record.custom_name,
                path: record.path,
                entry_type: record.entry_type,
                tab_id,
                group_id,
                cell: Cell::ORIGIN,
            };
            match cell_of(record.grid_row, record.grid_column) {
                Some(cell) if !relocated && taken.insert((entry.context(), cell)) => {
                    hierarchy.entries.push(Entry { cell, ..entry })
                }
                Some(cell) if !relocated => {
                    warn!(item = %entry.id, %cell, "item shares a cell, placing it anew");
                    unplaced.push((order_key(record.global_order), Unplaced::Entry(entry)));
                }
                _ => unplaced.push((order_key(record.global_order), Unplaced::Entry(entry))),
            }
        }

        // Groups and entries interleave by their hint; a group does not need
        // a cell before entries are placed inside it.
        unplaced.sort_by_key(|(key, _)| *key);
        for (_, element) in unplaced {
            match element {
                Unplaced::Group(group) => {
                    let cell = ArrangementEngine::next_free_cell(
                        &hierarchy,
                        Context::TabTop(group.tab_id),
                        columns,
                    );
                    hierarchy.groups.push(Group { cell, ..group });
                }
                Unplaced::Entry(entry) => {
                    let cell = ArrangementEngine::next_free_cell(&hierarchy, entry.context(), columns);
                    hierarchy.entries.push(Entry { cell, ..entry });
                }
            }
        }

        hierarchy
    }
}

/// Import a flat list of entries into a fresh hierarchy, all on the first
/// tab's top level, in legacy order.
fn migrate_legacy(mut legacy: Vec<LegacyEntry>, columns: u32, layout: LayoutMode) -> Hierarchy {
    let mut hierarchy = Hierarchy::with_layout(layout);
    let tab_id = hierarchy.tabs[0].id;
    let context = Context::TabTop(tab_id);

    legacy.sort_by_key(|entry| order_key(entry.order));

    let mut seen_paths = HashSet::new();
    for old in legacy {
        let path = normalize_path(&old.path);
        if !seen_paths.insert(path_key(&path)) {
            continue;
        }
        let entry_type = old
            .entry_type
            .unwrap_or_else(|| EntryType::classify(&path, path.is_dir()));
        let name = old
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| canonical_name(&path, entry_type));
        let cell = ArrangementEngine::next_free_cell(&hierarchy, context, columns);
        hierarchy.entries.push(Entry {
            id: EntryId::new(),
            name,
            custom_name: old.custom_name.filter(|n| !n.trim().is_empty()),
            path,
            entry_type,
            tab_id,
            group_id: None,
            cell,
        });
    }
    hierarchy
}

/// The durable pin record: one JSON document holding the whole hierarchy.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    legacy_path: Option<PathBuf>,
    migration_columns: u32,
    default_layout: LayoutMode,
    guard: SelfWriteGuard,
}

impl Store {
    /// A store at `path` with default placement settings and no legacy
    /// sibling.
    pub fn new(path: impl Into<PathBuf>, self_write_window: Duration) -> Self {
        Self {
            path: path.into(),
            legacy_path: None,
            migration_columns: DEFAULT_COLUMNS,
            default_layout: LayoutMode::default(),
            guard: SelfWriteGuard::new(self_write_window),
        }
    }

    /// A store for the configured record and legacy sibling.
    pub fn from_config(config: &Config) -> Self {
        Self {
            path: config.store_path.clone(),
            legacy_path: config.legacy_path.clone(),
            migration_columns: config.default_columns.max(1),
            default_layout: config.layout,
            guard: SelfWriteGuard::new(config.self_write_window),
        }
    }

    /// Layout given to a record that does not carry one yet.
    pub fn with_default_layout(mut self, layout: LayoutMode) -> Self {
        self.default_layout = layout;
        self
    }

    /// Column bound used to place elements that arrive without a cell.
    pub fn with_migration_columns(mut self, columns: u32) -> Self {
        self.migration_columns = columns.max(1);
        self
    }

    /// Location of the pin record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Handle on the window that marks this store's own writes.
    pub fn self_write_guard(&self) -> SelfWriteGuard {
        self.guard.clone()
    }

    /// Read the hierarchy. Never fails: a missing or unreadable record gives
    /// the default hierarchy. A legacy record is migrated and immediately
    /// written back in the current shape.
    pub fn load(&self) -> Hierarchy {
        let hierarchy = match self.read_record() {
            Ok(Some(RawRecord::Current(record))) => {
                record.into_hierarchy(self.migration_columns, self.default_layout)
            }
            Ok(Some(RawRecord::Legacy(legacy))) => {
                info!(path = %self.path.display(), count = legacy.len(), "migrating flat pin list");
                let hierarchy = migrate_legacy(legacy, self.migration_columns, self.default_layout);
                self.save_migrated(&hierarchy);
                return hierarchy;
            }
            Ok(None) => Hierarchy::with_layout(self.default_layout),
            Err(err) => {
                warn!(%err, "pin record unusable, starting from defaults");
                return Hierarchy::with_layout(self.default_layout);
            }
        };

        if hierarchy.has_no_content() {
            if let Some(migrated) = self.migrate_legacy_file() {
                return migrated;
            }
        }
        debug!(
            path = %self.path.display(),
            tabs = hierarchy.tabs().len(),
            groups = hierarchy.groups().len(),
            entries = hierarchy.entries().len(),
            "loaded pins"
        );
        hierarchy
    }

    /// Write the whole hierarchy through a temporary sibling file and a
    /// rename, then open the self-write window.
    pub fn save(&self, hierarchy: &Hierarchy) -> Result<(), StoreError> {
        let rendered = serde_json::to_vec_pretty(&PinRecord::from(hierarchy)).map_err(|source| {
            StoreError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
        }
        let temp_path = self.temp_path();
        fs::write(&temp_path, rendered).map_err(|err| StoreError::io(&temp_path, err))?;
        if let Err(err) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(StoreError::io(&self.path, err));
        }
        self.guard.arm();

        debug!(path = %self.path.display(), "saved pins");
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| RECORD_FILE_NAME.into());
        name.push(format!(".{}.tmp", std::process::id()));
        self.path.with_file_name(name)
    }

    fn read_record(&self) -> Result<Option<RawRecord>, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::io(&self.path, err)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    /// Import the sibling legacy file, if any, and retire it.
    fn migrate_legacy_file(&self) -> Option<Hierarchy> {
        let legacy_path = self.legacy_path.as_ref()?;
        let bytes = fs::read(legacy_path).ok()?;
        let legacy: Vec<LegacyEntry> = match serde_json::from_slice(&bytes) {
            Ok(legacy) => legacy,
            Err(err) => {
                warn!(path = %legacy_path.display(), %err, "ignoring unreadable legacy pin list");
                return None;
            }
        };

        info!(path = %legacy_path.display(), count = legacy.len(), "migrating legacy pin list");
        let hierarchy = migrate_legacy(legacy, self.migration_columns, self.default_layout);
        self.save_migrated(&hierarchy);

        let mut retired = legacy_path.clone().into_os_string();
        retired.push(format!(".{MIGRATED_SUFFIX}"));
        if let Err(err) = fs::rename(legacy_path, &retired) {
            warn!(path = %legacy_path.display(), %err, "cannot retire legacy pin list");
        }
        Some(hierarchy)
    }

    fn save_migrated(&self, hierarchy: &Hierarchy) {
        if let Err(err) = self.save(hierarchy) {
            warn!(%err, "cannot persist migrated pins");
        }
    }
}
