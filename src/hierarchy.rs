use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::arrangement::{ArrangementEngine, LayoutMode};
use crate::error::PinError;
use crate::model::{
    canonical_name, normalize_path, path_key, Cell, Context, ElementId, Entry, EntryId, EntryType,
    Group, GroupId, Hierarchy, Tab, TabId,
};
use crate::store::Store;

/// Field-level patch for an entry. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    /// `Some(None)` (or a blank name) clears the custom name.
    pub custom_name: Option<Option<String>>,
    /// New cell in the entry's current context; collisions swap.
    pub cell: Option<Cell>,
}

impl EntryPatch {
    /// Set the custom name.
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            custom_name: Some(Some(name.into())),
            ..Self::default()
        }
    }

    /// Drop the custom name.
    pub fn clear_name() -> Self {
        Self {
            custom_name: Some(None),
            ..Self::default()
        }
    }

    /// Move to `cell` within the current context.
    pub fn move_to(cell: Cell) -> Self {
        Self {
            cell: Some(cell),
            ..Self::default()
        }
    }
}

/// Operations over tabs, groups and entries.
///
/// The manager holds the current hierarchy behind an [`Arc`] and mutates it
/// copy-on-write, so handed-out snapshots never change. Every operation
/// validates first and only then touches the hierarchy; touching marks the
/// manager dirty, and [`HierarchyManager::commit`] turns a dirty state into
/// exactly one save. Rejected operations leave it clean.
pub struct HierarchyManager {
    hierarchy: Arc<Hierarchy>,
    store: Store,
    /// Column bound for operations that carry none, such as removals.
    columns: u32,
    dirty: bool,
}

impl HierarchyManager {
    /// Load the store's current state.
    pub fn new(store: Store, columns: u32) -> Self {
        let columns = columns.max(1);
        let hierarchy = Arc::new(load_settled(&store, columns));
        Self {
            hierarchy,
            store,
            columns,
            dirty: false,
        }
    }

    /// Shared handle on the current state.
    pub fn snapshot(&self) -> Arc<Hierarchy> {
        self.hierarchy.clone()
    }

    /// Borrow the current state.
    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// The store this manager saves to.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Layout policy of the loaded record.
    pub fn layout(&self) -> LayoutMode {
        self.hierarchy.layout()
    }

    /// Column bound used by operations that carry none.
    pub fn column_count(&self) -> u32 {
        self.columns
    }

    /// Remember the current column bound for operations that carry none.
    pub fn set_column_count(&mut self, columns: u32) {
        self.columns = columns.max(1);
    }

    /// Replace the in-memory state with whatever the store holds now.
    pub fn reload(&mut self) {
        self.hierarchy = Arc::new(load_settled(&self.store, self.columns));
        self.dirty = false;
        info!(entries = self.hierarchy.entries().len(), "reloaded pins");
    }

    /// Save if anything changed since the last commit. A failed save is
    /// logged and the in-memory state stays authoritative; the next commit
    /// writes everything again. Returns whether there was a change.
    pub fn commit(&mut self) -> bool {
        if !std::mem::take(&mut self.dirty) {
            return false;
        }
        if let Err(err) = self.store.save(&self.hierarchy) {
            warn!(%err, "cannot save pins, keeping them in memory");
        }
        true
    }

    fn hierarchy_mut(&mut self) -> &mut Hierarchy {
        self.dirty = true;
        Arc::make_mut(&mut self.hierarchy)
    }

    /// Compact the touched contexts when the layout derives coordinates.
    fn settle(&mut self, contexts: &[Context]) {
        if self.layout() != LayoutMode::Ordered {
            return;
        }
        let columns = self.columns;
        let hierarchy = self.hierarchy_mut();
        for &context in contexts {
            if hierarchy.has_context(context) {
                ArrangementEngine::compact_items(hierarchy, context, columns);
            }
        }
    }

    // --- Layout ---

    /// Switch the layout policy for every process sharing the record.
    /// Switching to Ordered compacts every context.
    pub fn set_layout_mode(&mut self, layout: LayoutMode, columns: u32) {
        if layout == self.layout() {
            return;
        }
        self.set_column_count(columns);
        let columns = self.columns;
        let hierarchy = self.hierarchy_mut();
        hierarchy.layout = layout;
        if layout == LayoutMode::Ordered {
            ArrangementEngine::compact_all(hierarchy, columns);
        }
        info!(?layout, "layout mode changed");
    }

    // --- Tabs ---

    /// Append a tab after the last one.
    pub fn add_tab(&mut self, name: &str) -> TabId {
        let id = TabId::new();
        let hierarchy = self.hierarchy_mut();
        let order = hierarchy.tabs.len();
        hierarchy.tabs.push(Tab {
            id,
            name: name.to_string(),
            order,
        });
        debug!(tab = %id, name, "added tab");
        id
    }

    /// Rename a tab.
    pub fn rename_tab(&mut self, id: TabId, name: &str) -> Result<(), PinError> {
        let tab = self.hierarchy.tab(id).ok_or(PinError::UnknownTab { id })?;
        if tab.name != name {
            if let Some(tab) = self.hierarchy_mut().tab_mut(id) {
                tab.name = name.to_string();
            }
        }
        Ok(())
    }

    /// Remove a tab. Its entries move to the top level of the earliest
    /// remaining tab, in their former order; its groups are deleted.
    /// Returns `Ok(false)` for an unknown tab.
    pub fn remove_tab(&mut self, id: TabId) -> Result<bool, PinError> {
        let Some(position) = self.hierarchy.tabs.iter().position(|t| t.id == id) else {
            return Ok(false);
        };
        if self.hierarchy.tabs.len() == 1 {
            return Err(PinError::LastTab);
        }

        let mut contexts = vec![Context::TabTop(id)];
        let mut groups: Vec<_> = self.hierarchy.groups_in_tab(id).collect();
        groups.sort_by_key(|g| g.cell);
        contexts.extend(groups.iter().map(|g| Context::Group(g.id)));
        let moving: Vec<EntryId> = contexts
            .iter()
            .flat_map(|&context| ArrangementEngine::ordered_entries(&self.hierarchy, context))
            .collect();

        let columns = self.columns;
        let hierarchy = self.hierarchy_mut();
        hierarchy.tabs.remove(position);
        hierarchy.renumber_tabs();
        hierarchy.groups.retain(|g| g.tab_id != id);
        let target = hierarchy.tabs[0].id;
        for entry_id in &moving {
            let cell = ArrangementEngine::next_free_cell(hierarchy, Context::TabTop(target), columns);
            if let Some(entry) = hierarchy.entry_mut(*entry_id) {
                entry.tab_id = target;
                entry.group_id = None;
                entry.cell = cell;
            }
        }
        self.settle(&[Context::TabTop(target)]);

        info!(tab = %id, %target, moved = moving.len(), "removed tab");
        Ok(true)
    }

    /// Move a tab to `index` in the tab order (clamped to the last slot).
    pub fn reorder_tab(&mut self, id: TabId, index: usize) -> Result<(), PinError> {
        let position = self
            .hierarchy
            .tabs
            .iter()
            .position(|t| t.id == id)
            .ok_or(PinError::UnknownTab { id })?;
        let index = index.min(self.hierarchy.tabs.len() - 1);
        if index == position {
            return Ok(());
        }
        let hierarchy = self.hierarchy_mut();
        let tab = hierarchy.tabs.remove(position);
        hierarchy.tabs.insert(index, tab);
        hierarchy.renumber_tabs();
        Ok(())
    }

    // --- Groups ---

    /// Create an empty, collapsed group at the tab's next free cell.
    pub fn add_group(&mut self, tab: TabId, name: &str, columns: u32) -> Result<GroupId, PinError> {
        if self.hierarchy.tab(tab).is_none() {
            return Err(PinError::UnknownTab { id: tab });
        }
        self.set_column_count(columns);
        let id = GroupId::new();
        let cell = ArrangementEngine::next_free_cell(&self.hierarchy, Context::TabTop(tab), self.columns);
        self.hierarchy_mut().groups.push(Group {
            id,
            name: name.to_string(),
            tab_id: tab,
            cell,
            is_expanded: false,
        });
        debug!(group = %id, %tab, %cell, "added group");
        Ok(id)
    }

    /// Rename a group.
    pub fn rename_group(&mut self, id: GroupId, name: &str) -> Result<(), PinError> {
        let group = self.hierarchy.group(id).ok_or(PinError::UnknownGroup { id })?;
        if group.name != name {
            if let Some(group) = self.hierarchy_mut().group_mut(id) {
                group.name = name.to_string();
            }
        }
        Ok(())
    }

    /// Remove a group, releasing its entries to the tab's top level. Each
    /// released entry gets the next free top-level cell, in the order the
    /// entries had inside the group, so nothing lands on an occupied cell.
    /// Returns `false` for an unknown group.
    pub fn remove_group(&mut self, id: GroupId) -> bool {
        let Some(tab) = self.hierarchy.group(id).map(|g| g.tab_id) else {
            return false;
        };
        let released = ArrangementEngine::ordered_entries(&self.hierarchy, Context::Group(id));

        let columns = self.columns;
        let hierarchy = self.hierarchy_mut();
        hierarchy.groups.retain(|g| g.id != id);
        for entry_id in &released {
            let cell = ArrangementEngine::next_free_cell(hierarchy, Context::TabTop(tab), columns);
            if let Some(entry) = hierarchy.entry_mut(*entry_id) {
                entry.group_id = None;
                entry.cell = cell;
            }
        }
        self.settle(&[Context::TabTop(tab)]);

        debug!(group = %id, released = released.len(), "removed group");
        true
    }

    /// Flip the presentation-only expanded flag. Returns the new state.
    pub fn toggle_group_expanded(&mut self, id: GroupId) -> Result<bool, PinError> {
        if self.hierarchy.group(id).is_none() {
            return Err(PinError::UnknownGroup { id });
        }
        let group = self
            .hierarchy_mut()
            .group_mut(id)
            .ok_or(PinError::UnknownGroup { id })?;
        group.is_expanded = !group.is_expanded;
        Ok(group.is_expanded)
    }

    /// Put a group at `index` among the groups of its tab, counted in
    /// row-major order. The cells the groups occupied are handed out again
    /// in the new order, so no entry moves.
    pub fn reorder_group(&mut self, id: GroupId, index: usize) -> Result<(), PinError> {
        let tab = self
            .hierarchy
            .group(id)
            .map(|g| g.tab_id)
            .ok_or(PinError::UnknownGroup { id })?;

        let mut siblings: Vec<(GroupId, Cell)> = self
            .hierarchy
            .groups_in_tab(tab)
            .map(|g| (g.id, g.cell))
            .collect();
        siblings.sort_by_key(|&(_, cell)| cell);
        let cells: Vec<Cell> = siblings.iter().map(|&(_, cell)| cell).collect();
        let mut order: Vec<GroupId> = siblings.into_iter().map(|(group, _)| group).collect();

        let Some(position) = order.iter().position(|&g| g == id) else {
            return Err(PinError::UnknownGroup { id });
        };
        let index = index.min(order.len() - 1);
        if index == position {
            return Ok(());
        }
        let moved = order.remove(position);
        order.insert(index, moved);

        let hierarchy = self.hierarchy_mut();
        for (group_id, cell) in order.into_iter().zip(cells) {
            if let Some(group) = hierarchy.group_mut(group_id) {
                group.cell = cell;
            }
        }
        Ok(())
    }

    // --- Entries ---

    /// Pin an existing file or directory.
    ///
    /// Without a tab the earliest tab is used; a group must belong to the
    /// given tab. The entry takes the next free cell of its context.
    pub fn add_pin(
        &mut self,
        path: &Path,
        tab: Option<TabId>,
        group: Option<GroupId>,
        columns: u32,
    ) -> Result<EntryId, PinError> {
        let path = normalize_path(path);
        if self.hierarchy.entry_by_path(&path).is_some() {
            return Err(PinError::DuplicatePin { path });
        }
        let is_dir = match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() || meta.is_file() => meta.is_dir(),
            _ => return Err(PinError::NonExistentTarget { path }),
        };

        let tab_id = match (tab, group) {
            (tab, Some(group)) => {
                let owner = self
                    .hierarchy
                    .group(group)
                    .map(|g| g.tab_id)
                    .ok_or(PinError::UnknownGroup { id: group })?;
                match tab {
                    Some(tab) if tab != owner => return Err(PinError::GroupTabMismatch { group, tab }),
                    _ => owner,
                }
            }
            (Some(tab), None) => self
                .hierarchy
                .tab(tab)
                .map(|t| t.id)
                .ok_or(PinError::UnknownTab { id: tab })?,
            (None, None) => self
                .hierarchy
                .earliest_tab()
                .map(|t| t.id)
                .ok_or(PinError::LastTab)?,
        };

        self.set_column_count(columns);
        let entry_type = EntryType::classify(&path, is_dir);
        let context = match group {
            Some(group) => Context::Group(group),
            None => Context::TabTop(tab_id),
        };
        let cell = ArrangementEngine::next_free_cell(&self.hierarchy, context, self.columns);
        let id = EntryId::new();
        let entry = Entry {
            id,
            name: canonical_name(&path, entry_type),
            custom_name: None,
            path,
            entry_type,
            tab_id,
            group_id: group,
            cell,
        };
        info!(entry = %id, path = %entry.path.display(), ?entry_type, %cell, "pinned");
        self.hierarchy_mut().entries.push(entry);
        Ok(id)
    }

    /// Whether some entry targets `path`.
    pub fn is_pinned(&self, path: &Path) -> bool {
        self.hierarchy.entry_by_path(path).is_some()
    }

    /// Unpin by target path. Returns `false` if it was not pinned.
    pub fn remove_pin(&mut self, path: &Path) -> bool {
        let key = path_key(path);
        match self.hierarchy.entries.iter().position(|e| path_key(&e.path) == key) {
            Some(index) => {
                self.remove_entry_at(index);
                true
            }
            None => false,
        }
    }

    /// Unpin by id. Returns `false` for an unknown id.
    pub fn remove_pin_by_id(&mut self, id: EntryId) -> bool {
        match self.hierarchy.entries.iter().position(|e| e.id == id) {
            Some(index) => {
                self.remove_entry_at(index);
                true
            }
            None => false,
        }
    }

    fn remove_entry_at(&mut self, index: usize) {
        let entry = self.hierarchy_mut().entries.remove(index);
        info!(entry = %entry.id, path = %entry.path.display(), "unpinned");
        self.settle(&[entry.context()]);
    }

    /// Apply a field-level patch. A cell change is a move within the
    /// entry's own context and swaps with any occupant.
    pub fn update_entry(&mut self, id: EntryId, patch: EntryPatch, columns: u32) -> Result<(), PinError> {
        let entry = self.hierarchy.entry(id).ok_or(PinError::UnknownEntry { id })?;
        let context = entry.context();
        let custom_name = patch
            .custom_name
            .map(|name| name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()));
        let rename = custom_name.filter(|name| *name != entry.custom_name);
        let target = patch.cell.filter(|&cell| cell != entry.cell);

        if let Some(name) = rename {
            if let Some(entry) = self.hierarchy_mut().entry_mut(id) {
                entry.custom_name = name;
            }
        }
        if let Some(cell) = target {
            self.set_column_count(columns);
            let columns = self.columns;
            ArrangementEngine::move_to_cell(self.hierarchy_mut(), ElementId::Entry(id), cell, context, columns)?;
            self.settle(&[context]);
        }
        Ok(())
    }

    /// Move an entry into another group of its tab, or to the tab's top
    /// level with `None`.
    pub fn move_item_to_group(
        &mut self,
        id: EntryId,
        group: Option<GroupId>,
        columns: u32,
    ) -> Result<(), PinError> {
        let entry = self.hierarchy.entry(id).ok_or(PinError::UnknownEntry { id })?;
        let target = match group {
            Some(group) => {
                let owner = self
                    .hierarchy
                    .group(group)
                    .map(|g| g.tab_id)
                    .ok_or(PinError::UnknownGroup { id: group })?;
                if owner != entry.tab_id {
                    return Err(PinError::GroupTabMismatch {
                        group,
                        tab: entry.tab_id,
                    });
                }
                Context::Group(group)
            }
            None => Context::TabTop(entry.tab_id),
        };
        if entry.context() == target {
            return Ok(());
        }
        self.relocate(ElementId::Entry(id), Cell::ORIGIN, target, columns)
    }

    /// Move an entry to the top level of another tab.
    pub fn move_item_to_tab(&mut self, id: EntryId, tab: TabId, columns: u32) -> Result<(), PinError> {
        let entry = self.hierarchy.entry(id).ok_or(PinError::UnknownEntry { id })?;
        let target = Context::TabTop(tab);
        if entry.context() == target {
            return Ok(());
        }
        self.relocate(ElementId::Entry(id), Cell::ORIGIN, target, columns)
    }

    /// Drag-and-drop placement of any element: swap within a context, next
    /// free cell across contexts.
    pub fn move_element_to_cell(
        &mut self,
        element: ElementId,
        cell: Cell,
        context: Context,
        columns: u32,
    ) -> Result<(), PinError> {
        self.relocate(element, cell, context, columns)
    }

    fn relocate(
        &mut self,
        element: ElementId,
        cell: Cell,
        context: Context,
        columns: u32,
    ) -> Result<(), PinError> {
        let current = ArrangementEngine::validate_move(&self.hierarchy, element, context)?;
        if current == context && ArrangementEngine::cell_of(&self.hierarchy, element) == Some(cell) {
            return Ok(());
        }
        self.set_column_count(columns);
        let columns = self.columns;
        ArrangementEngine::move_to_cell(self.hierarchy_mut(), element, cell, context, columns)?;
        self.settle(&[current, context]);
        debug!(?element, ?context, "moved element");
        Ok(())
    }
}

/// Load the record. Coordinates of an Ordered record are derived, so any
/// gaps it carries are closed in memory right away.
fn load_settled(store: &Store, columns: u32) -> Hierarchy {
    let mut hierarchy = store.load();
    if hierarchy.layout() == LayoutMode::Ordered && ArrangementEngine::compact_all(&mut hierarchy, columns) {
        debug!("closed gaps in loaded pins");
    }
    hierarchy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RECORD_FILE_NAME;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        manager: HierarchyManager,
    }

    impl Fixture {
        fn new(layout: LayoutMode) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Store::new(dir.path().join(RECORD_FILE_NAME), Duration::from_millis(200))
                .with_default_layout(layout);
            let manager = HierarchyManager::new(store, 4);
            Self { dir, manager }
        }

        fn target(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join("targets").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"").unwrap();
            path
        }

        fn folder(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join("targets").join(name);
            fs::create_dir_all(&path).unwrap();
            path
        }

        fn first_tab(&self) -> TabId {
            self.manager.hierarchy().tabs()[0].id
        }

        fn pin(&mut self, name: &str, tab: Option<TabId>, group: Option<GroupId>) -> EntryId {
            let path = self.target(name);
            let id = self.manager.add_pin(&path, tab, group, 4).unwrap();
            self.manager.commit();
            id
        }

        fn cell(&self, id: EntryId) -> Cell {
            self.manager.hierarchy().entry(id).unwrap().cell
        }

        fn assert_no_overlap(&self) {
            let hierarchy = self.manager.hierarchy();
            for context in ArrangementEngine::contexts(hierarchy) {
                let elements = ArrangementEngine::elements(hierarchy, context);
                let cells: HashSet<_> = elements.iter().map(|&(_, cell)| cell).collect();
                assert_eq!(cells.len(), elements.len(), "overlap in {context:?}");
            }
        }
    }

    #[test]
    fn test_add_pin_twice_is_rejected() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let tab = fx.first_tab();
        let path = fx.target("a.exe");

        fx.manager.add_pin(&path, Some(tab), None, 6).unwrap();
        assert!(fx.manager.commit());
        let second = fx.manager.add_pin(&path, Some(tab), None, 6);
        assert!(matches!(second, Err(PinError::DuplicatePin { .. })));
        assert!(!fx.manager.commit());

        let count = fx.manager.hierarchy().entries().iter().filter(|e| e.path == path).count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_add_pin_rejects_missing_target() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let missing = fx.dir.path().join("nope.exe");
        let result = fx.manager.add_pin(&missing, None, None, 4);
        assert!(matches!(result, Err(PinError::NonExistentTarget { .. })));
        assert!(!fx.manager.commit());
        assert!(fx.manager.hierarchy().entries().is_empty());
    }

    #[test]
    fn test_add_pin_classifies_and_places() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let app = fx.pin("Editor.exe", None, None);
        let link = fx.pin("site.url", None, None);
        let folder_path = fx.folder("Projects");
        let folder = fx.manager.add_pin(&folder_path, None, None, 4).unwrap();

        let hierarchy = fx.manager.hierarchy();
        assert_eq!(hierarchy.entry(app).unwrap().entry_type, EntryType::Application);
        assert_eq!(hierarchy.entry(app).unwrap().name, "Editor");
        assert_eq!(hierarchy.entry(link).unwrap().entry_type, EntryType::InternetShortcut);
        assert_eq!(hierarchy.entry(folder).unwrap().entry_type, EntryType::Folder);
        assert_eq!(hierarchy.entry(folder).unwrap().name, "Projects");
        assert_eq!(fx.cell(app), Cell::new(0, 0));
        assert_eq!(fx.cell(link), Cell::new(0, 1));
        assert_eq!(fx.cell(folder), Cell::new(0, 2));
    }

    #[test]
    fn test_add_pin_checks_group_tab() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let first = fx.first_tab();
        let second = fx.manager.add_tab("Second");
        let group = fx.manager.add_group(second, "Tools", 4).unwrap();
        let path = fx.target("tool.exe");

        let result = fx.manager.add_pin(&path, Some(first), Some(group), 4);
        assert_eq!(result, Err(PinError::GroupTabMismatch { group, tab: first }));

        let id = fx.manager.add_pin(&path, None, Some(group), 4).unwrap();
        let entry = fx.manager.hierarchy().entry(id).unwrap();
        assert_eq!(entry.tab_id, second);
        assert_eq!(entry.group_id, Some(group));
        assert_eq!(entry.cell, Cell::ORIGIN);
    }

    #[test]
    fn test_remove_pin_is_idempotent() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let path = fx.target("gone.exe");
        assert!(!fx.manager.is_pinned(&path));
        assert!(!fx.manager.remove_pin(&path));
        assert!(!fx.manager.commit());
        assert!(!fx.manager.is_pinned(&path));

        fx.manager.add_pin(&path, None, None, 4).unwrap();
        assert!(fx.manager.is_pinned(&path));
        assert!(fx.manager.remove_pin(&path));
        assert!(!fx.manager.is_pinned(&path));
        assert!(!fx.manager.remove_pin_by_id(EntryId::new()));
    }

    #[test]
    fn test_remove_compacts_in_ordered_mode() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let a = fx.pin("a.exe", None, None);
        let b = fx.pin("b.exe", None, None);
        let c = fx.pin("c.exe", None, None);

        assert!(fx.manager.remove_pin_by_id(a));
        assert_eq!(fx.cell(b), Cell::new(0, 0));
        assert_eq!(fx.cell(c), Cell::new(0, 1));
    }

    #[test]
    fn test_remove_keeps_gaps_in_free_form_mode() {
        let mut fx = Fixture::new(LayoutMode::FreeForm);
        let a = fx.pin("a.exe", None, None);
        let b = fx.pin("b.exe", None, None);

        assert!(fx.manager.remove_pin_by_id(a));
        assert_eq!(fx.cell(b), Cell::new(0, 1));
    }

    #[test]
    fn test_tabs_add_reorder_rename() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let first = fx.first_tab();
        let second = fx.manager.add_tab("Second");
        let third = fx.manager.add_tab("Third");
        assert_eq!(fx.manager.hierarchy().tab(third).unwrap().order, 2);

        fx.manager.reorder_tab(third, 0).unwrap();
        let order: Vec<_> = fx.manager.hierarchy().tabs().iter().map(|t| (t.id, t.order)).collect();
        assert_eq!(order, vec![(third, 0), (first, 1), (second, 2)]);

        fx.manager.reorder_tab(third, 99).unwrap();
        assert_eq!(fx.manager.hierarchy().tab(third).unwrap().order, 2);

        fx.manager.rename_tab(second, "Work").unwrap();
        assert_eq!(fx.manager.hierarchy().tab(second).unwrap().name, "Work");
        let unknown = TabId::new();
        assert_eq!(fx.manager.rename_tab(unknown, "x"), Err(PinError::UnknownTab { id: unknown }));
    }

    #[test]
    fn test_last_tab_cannot_be_removed() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let only = fx.first_tab();
        fx.manager.commit();
        assert_eq!(fx.manager.remove_tab(only), Err(PinError::LastTab));
        assert!(!fx.manager.commit());
        assert_eq!(fx.manager.remove_tab(TabId::new()), Ok(false));
    }

    #[test]
    fn test_remove_tab_reparents_to_earliest_tab() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let first = fx.first_tab();
        let second = fx.manager.add_tab("Second");
        let third = fx.manager.add_tab("Third");
        let kept = fx.pin("kept.exe", Some(first), None);
        let group = fx.manager.add_group(third, "Tools", 4).unwrap();
        let top = fx.pin("top.exe", Some(third), None);
        let inside = fx.pin("inside.exe", Some(third), Some(group));

        // Earliest remaining order wins, not tab creation.
        fx.manager.reorder_tab(second, 0).unwrap();
        assert_eq!(fx.manager.remove_tab(third), Ok(true));

        let hierarchy = fx.manager.hierarchy();
        assert!(hierarchy.tab(third).is_none());
        assert!(hierarchy.group(group).is_none());
        for id in [top, inside] {
            let entry = hierarchy.entry(id).unwrap();
            assert_eq!(entry.tab_id, second);
            assert_eq!(entry.group_id, None);
        }
        assert_eq!(fx.cell(top), Cell::new(0, 0));
        assert_eq!(fx.cell(inside), Cell::new(0, 1));
        assert_eq!(hierarchy.entry(kept).unwrap().tab_id, first);
        let orders: Vec<_> = hierarchy.tabs().iter().map(|t| t.order).collect();
        assert_eq!(orders, vec![0, 1]);
    }

    #[test]
    fn test_remove_group_releases_entries() {
        let mut fx = Fixture::new(LayoutMode::FreeForm);
        let tab = fx.first_tab();
        let group = fx.manager.add_group(tab, "G", 4).unwrap();
        let e1 = fx.pin("e1.exe", Some(tab), Some(group));
        let e2 = fx.pin("e2.exe", Some(tab), Some(group));
        let top = fx.pin("top.exe", Some(tab), None);
        assert_eq!(fx.cell(e1), Cell::new(0, 0));
        assert_eq!(fx.cell(e2), Cell::new(0, 1));
        assert_eq!(fx.cell(top), Cell::new(0, 1));

        assert!(fx.manager.remove_group(group));
        assert!(fx.manager.commit());
        for id in [e1, e2] {
            assert_eq!(fx.manager.hierarchy().entry(id).unwrap().group_id, None);
        }
        // Released entries do not land on existing top-level content.
        assert_eq!(fx.cell(e1), Cell::new(0, 0));
        assert_eq!(fx.cell(e2), Cell::new(0, 2));
        assert_eq!(fx.cell(top), Cell::new(0, 1));
        fx.assert_no_overlap();

        assert!(!fx.manager.remove_group(group));
        assert!(!fx.manager.commit());
    }

    #[test]
    fn test_toggle_and_rename_group() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let tab = fx.first_tab();
        let group = fx.manager.add_group(tab, "G", 4).unwrap();
        assert_eq!(fx.manager.toggle_group_expanded(group), Ok(true));
        assert_eq!(fx.manager.toggle_group_expanded(group), Ok(false));
        fx.manager.rename_group(group, "Games").unwrap();
        assert_eq!(fx.manager.hierarchy().group(group).unwrap().name, "Games");
        let unknown = GroupId::new();
        assert_eq!(fx.manager.toggle_group_expanded(unknown), Err(PinError::UnknownGroup { id: unknown }));
    }

    #[test]
    fn test_reorder_group_reuses_sibling_cells() {
        let mut fx = Fixture::new(LayoutMode::FreeForm);
        let tab = fx.first_tab();
        let g1 = fx.manager.add_group(tab, "one", 4).unwrap();
        let entry = fx.pin("between.exe", Some(tab), None);
        let g2 = fx.manager.add_group(tab, "two", 4).unwrap();
        let g3 = fx.manager.add_group(tab, "three", 4).unwrap();

        fx.manager.reorder_group(g3, 0).unwrap();
        let cell = |g: GroupId| fx.manager.hierarchy().group(g).unwrap().cell;
        assert_eq!(cell(g3), Cell::new(0, 0));
        assert_eq!(cell(g1), Cell::new(0, 2));
        assert_eq!(cell(g2), Cell::new(0, 3));
        assert_eq!(fx.cell(entry), Cell::new(0, 1));
    }

    #[test]
    fn test_update_entry_patches_fields() {
        let mut fx = Fixture::new(LayoutMode::FreeForm);
        let a = fx.pin("a.exe", None, None);
        let b = fx.pin("b.exe", None, None);

        fx.manager.update_entry(a, EntryPatch::rename("  Alpha "), 4).unwrap();
        assert_eq!(fx.manager.hierarchy().entry(a).unwrap().display_name(), "Alpha");
        fx.manager.update_entry(a, EntryPatch::rename("   "), 4).unwrap();
        assert_eq!(fx.manager.hierarchy().entry(a).unwrap().custom_name, None);

        fx.manager.update_entry(a, EntryPatch::move_to(Cell::new(0, 1)), 4).unwrap();
        assert_eq!(fx.cell(a), Cell::new(0, 1));
        assert_eq!(fx.cell(b), Cell::new(0, 0));

        fx.manager.commit();
        fx.manager.update_entry(a, EntryPatch::default(), 4).unwrap();
        assert!(!fx.manager.commit());
    }

    #[test]
    fn test_move_item_to_group_and_back() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let tab = fx.first_tab();
        let group = fx.manager.add_group(tab, "G", 4).unwrap();
        let a = fx.pin("a.exe", Some(tab), None);
        let b = fx.pin("b.exe", Some(tab), None);

        fx.manager.move_item_to_group(a, Some(group), 4).unwrap();
        assert_eq!(fx.manager.hierarchy().entry(a).unwrap().group_id, Some(group));
        assert_eq!(fx.cell(a), Cell::ORIGIN);
        // The top level closed the gap.
        assert_eq!(fx.cell(b), Cell::new(0, 1));

        fx.manager.move_item_to_group(a, None, 4).unwrap();
        assert_eq!(fx.manager.hierarchy().entry(a).unwrap().group_id, None);
        assert_eq!(fx.cell(a), Cell::new(0, 2));
        fx.assert_no_overlap();

        let other_tab = fx.manager.add_tab("Other");
        let foreign = fx.manager.add_group(other_tab, "F", 4).unwrap();
        assert_eq!(
            fx.manager.move_item_to_group(a, Some(foreign), 4),
            Err(PinError::GroupTabMismatch { group: foreign, tab })
        );
    }

    #[test]
    fn test_move_item_to_tab() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let tab1 = fx.first_tab();
        let tab2 = fx.manager.add_tab("Two");
        let a = fx.pin("a.exe", Some(tab1), None);
        let b = fx.pin("b.exe", Some(tab1), None);
        let c = fx.pin("c.exe", Some(tab1), None);
        let existing = fx.pin("x.exe", Some(tab2), None);

        fx.manager.move_item_to_tab(a, tab2, 4).unwrap();
        let moved = fx.manager.hierarchy().entry(a).unwrap();
        assert_eq!(moved.tab_id, tab2);
        assert_eq!(moved.group_id, None);
        assert_eq!(fx.cell(a), Cell::new(0, 1));
        assert_eq!(fx.cell(existing), Cell::new(0, 0));
        assert_eq!(fx.cell(b), Cell::new(0, 0));
        assert_eq!(fx.cell(c), Cell::new(0, 1));

        let group = fx.manager.add_group(tab2, "G", 4).unwrap();
        fx.manager.move_item_to_group(a, Some(group), 4).unwrap();
        fx.manager.move_item_to_tab(a, tab2, 4).unwrap();
        assert_eq!(fx.manager.hierarchy().entry(a).unwrap().group_id, None);
        fx.assert_no_overlap();
    }

    #[test]
    fn test_group_moves_to_other_tab_with_members() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let tab1 = fx.first_tab();
        let tab2 = fx.manager.add_tab("Two");
        let group = fx.manager.add_group(tab1, "G", 4).unwrap();
        let member = fx.pin("m.exe", Some(tab1), Some(group));

        fx.manager
            .move_element_to_cell(ElementId::Group(group), Cell::ORIGIN, Context::TabTop(tab2), 4)
            .unwrap();
        assert_eq!(fx.manager.hierarchy().group(group).unwrap().tab_id, tab2);
        assert_eq!(fx.manager.hierarchy().entry(member).unwrap().tab_id, tab2);
        assert_eq!(fx.manager.hierarchy().entry(member).unwrap().group_id, Some(group));
    }

    #[test]
    fn test_switch_to_ordered_compacts_everything() {
        let mut fx = Fixture::new(LayoutMode::FreeForm);
        let tab = fx.first_tab();
        let ids: Vec<_> = ["r0.exe", "r3.exe", "r7.exe"]
            .iter()
            .map(|name| fx.pin(name, Some(tab), None))
            .collect();
        for (id, row) in ids.iter().zip([0, 3, 7]) {
            fx.manager
                .update_entry(*id, EntryPatch::move_to(Cell::new(row, 0)), 4)
                .unwrap();
        }
        fx.manager.commit();
        assert_eq!(fx.cell(ids[2]), Cell::new(7, 0));

        fx.manager.set_layout_mode(LayoutMode::Ordered, 4);
        assert!(fx.manager.commit());
        let cells: Vec<_> = ids.iter().map(|&id| fx.cell(id)).collect();
        assert_eq!(cells, vec![Cell::new(0, 0), Cell::new(0, 1), Cell::new(0, 2)]);

        fx.manager.set_layout_mode(LayoutMode::Ordered, 4);
        assert!(!fx.manager.commit());
    }

    #[test]
    fn test_layout_is_shared_through_the_record() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        fx.manager.set_layout_mode(LayoutMode::FreeForm, 4);
        let a = fx.pin("a.exe", None, None);
        let b = fx.pin("b.exe", None, None);
        fx.manager.update_entry(b, EntryPatch::move_to(Cell::new(5, 3)), 4).unwrap();
        assert!(fx.manager.commit());

        // A second manager over the same record, given an Ordered default.
        let store = Store::new(fx.dir.path().join(RECORD_FILE_NAME), Duration::from_millis(200));
        let mut helper = HierarchyManager::new(store, 4);
        assert_eq!(helper.layout(), LayoutMode::FreeForm);
        assert!(helper.remove_pin_by_id(a));
        assert!(helper.commit());
        assert_eq!(helper.hierarchy().entry(b).unwrap().cell, Cell::new(5, 3));

        fx.manager.reload();
        assert_eq!(fx.manager.layout(), LayoutMode::FreeForm);
        assert_eq!(fx.cell(b), Cell::new(5, 3));
    }

    #[test]
    fn test_ordered_record_with_gaps_loads_compacted() {
        let mut fx = Fixture::new(LayoutMode::FreeForm);
        let a = fx.pin("a.exe", None, None);
        fx.manager.update_entry(a, EntryPatch::move_to(Cell::new(2, 2)), 4).unwrap();
        fx.manager.commit();

        // Rewrite the record as Ordered without touching the coordinates.
        let path = fx.dir.path().join(RECORD_FILE_NAME);
        let mut record: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        record["layout"] = serde_json::json!("Ordered");
        fs::write(&path, record.to_string()).unwrap();

        fx.manager.reload();
        assert_eq!(fx.manager.layout(), LayoutMode::Ordered);
        assert_eq!(fx.cell(a), Cell::ORIGIN);
    }

    #[test]
    fn test_ordered_operations_never_overlap() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let tab = fx.first_tab();
        let group = fx.manager.add_group(tab, "G", 3).unwrap();
        let ids: Vec<_> = (0..6).map(|i| fx.pin(&format!("{i}.exe"), Some(tab), None)).collect();

        fx.manager.move_item_to_group(ids[1], Some(group), 3).unwrap();
        fx.manager.update_entry(ids[2], EntryPatch::move_to(Cell::new(9, 9)), 3).unwrap();
        fx.manager.remove_pin_by_id(ids[4]);
        fx.manager
            .move_element_to_cell(ElementId::Group(group), Cell::new(1, 1), Context::TabTop(tab), 3)
            .unwrap();
        fx.manager.remove_group(group);
        fx.assert_no_overlap();

        let occupied = ArrangementEngine::occupied_cells(fx.manager.hierarchy(), Context::TabTop(tab));
        let expected: Vec<_> = (0..occupied.len()).map(|i| Cell::from_index(i, 3)).collect();
        assert_eq!(occupied.into_iter().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_commit_persists_once_and_survives_reload() {
        let mut fx = Fixture::new(LayoutMode::Ordered);
        let a = fx.pin("a.exe", None, None);
        let before = fx.manager.snapshot();

        fx.manager.update_entry(a, EntryPatch::rename("Renamed"), 4).unwrap();
        // Snapshots taken earlier do not see later changes.
        assert_eq!(before.entry(a).unwrap().custom_name, None);
        assert!(fx.manager.commit());

        fx.manager.reload();
        assert_eq!(fx.manager.hierarchy().entry(a).unwrap().display_name(), "Renamed");
    }
}
