use std::path::Path;
use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::arrangement::LayoutMode;
use crate::config::Config;
use crate::error::{PinError, StoreError};
use crate::hierarchy::{EntryPatch, HierarchyManager};
use crate::model::{Cell, Context, ElementId, EntryId, GroupId, Hierarchy, TabId};
use crate::store::Store;
use crate::watcher::{ChangeNotifier, ReloadSignal};

/// Called with no payload whenever the pin collection changed.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// The public surface over one pin record.
///
/// Every mutating call runs under one coarse lock, saves at most once and
/// notifies subscribers at most once, after the lock is released. A
/// watched board also picks up writes made by other processes; those are
/// applied on the caller's thread through [`PinBoard::poll_external_changes`]
/// or [`PinBoard::wait_for_external_change`].
pub struct PinBoard {
    manager: Mutex<HierarchyManager>,
    listeners: Mutex<Vec<Listener>>,
    reload_rx: Mutex<Option<Receiver<ReloadSignal>>>,
    notifier: Option<ChangeNotifier>,
}

impl PinBoard {
    /// Open the configured record without watching it. This is what
    /// short-lived helpers use.
    pub fn open(config: &Config) -> Self {
        Self::with_store(Store::from_config(config), config.default_columns)
    }

    /// Open the configured record and follow changes other processes make.
    pub fn open_watched(config: &Config) -> Result<Self, StoreError> {
        let mut board = Self::open(config);
        let (notifier, rx) = {
            let manager = board.lock_manager();
            let store = manager.store();
            ChangeNotifier::watch(store.path(), config.debounce, store.self_write_guard())?
        };
        board.notifier = Some(notifier);
        board.reload_rx = Mutex::new(Some(rx));
        Ok(board)
    }

    /// Open a board over an explicit store. `columns` is the bound used by
    /// operations that carry none until a caller supplies one.
    pub fn with_store(store: Store, columns: u32) -> Self {
        let manager = HierarchyManager::new(store, columns);
        info!(
            path = %manager.store().path().display(),
            entries = manager.hierarchy().entries().len(),
            layout = ?manager.layout(),
            "opened pin board"
        );
        Self {
            manager: Mutex::new(manager),
            listeners: Mutex::new(Vec::new()),
            reload_rx: Mutex::new(None),
            notifier: None,
        }
    }

    /// Whether external writes are followed.
    pub fn is_watching(&self) -> bool {
        self.notifier.is_some()
    }

    /// Register a listener called after every change, local or external.
    pub fn subscribe(&self, listener: impl Fn() + Send + Sync + 'static) {
        lock(&self.listeners).push(Arc::new(listener));
    }

    /// Immutable view of the current state.
    pub fn snapshot(&self) -> Arc<Hierarchy> {
        self.lock_manager().snapshot()
    }

    /// Layout policy stored with the record.
    pub fn layout(&self) -> LayoutMode {
        self.lock_manager().layout()
    }

    /// Re-read the record unconditionally and notify.
    pub fn reload(&self) {
        self.lock_manager().reload();
        self.notify();
    }

    /// Apply pending external changes without blocking. Returns whether a
    /// reload happened.
    pub fn poll_external_changes(&self) -> bool {
        let mut pending = false;
        let mut disconnected = false;
        {
            let mut rx = lock(&self.reload_rx);
            if let Some(receiver) = rx.as_ref() {
                loop {
                    match receiver.try_recv() {
                        Ok(ReloadSignal) => pending = true,
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            disconnected = true;
                            break;
                        }
                    }
                }
            }
            if disconnected {
                warn!("file watch stopped, external changes are no longer followed");
                *rx = None;
            }
        }
        if pending {
            self.reload();
        }
        pending
    }

    /// Block until an external change arrives or `timeout` passes, then
    /// apply it. Returns whether a reload happened.
    pub fn wait_for_external_change(&self, timeout: Duration) -> bool {
        let received = {
            let mut rx = lock(&self.reload_rx);
            let Some(receiver) = rx.as_ref() else {
                return false;
            };
            match receiver.recv_timeout(timeout) {
                Ok(ReloadSignal) => {
                    // Coalesce anything queued behind it.
                    while receiver.try_recv().is_ok() {}
                    true
                }
                Err(RecvTimeoutError::Timeout) => false,
                Err(RecvTimeoutError::Disconnected) => {
                    warn!("file watch stopped, external changes are no longer followed");
                    *rx = None;
                    false
                }
            }
        };
        if received {
            self.reload();
        }
        received
    }

    // --- Layout ---

    /// Switch the layout policy; Ordered compacts every context.
    pub fn set_layout_mode(&self, layout: LayoutMode, columns: u32) {
        self.mutate(|m| m.set_layout_mode(layout, columns));
    }

    // --- Tabs ---

    /// Append a tab.
    pub fn add_tab(&self, name: &str) -> TabId {
        self.mutate(|m| m.add_tab(name))
    }

    /// Rename a tab.
    pub fn rename_tab(&self, id: TabId, name: &str) -> Result<(), PinError> {
        self.mutate(|m| m.rename_tab(id, name))
    }

    /// Remove a tab, moving its entries to the earliest remaining tab.
    pub fn remove_tab(&self, id: TabId) -> Result<bool, PinError> {
        self.mutate(|m| m.remove_tab(id))
    }

    /// Move a tab to `index` in the tab order.
    pub fn reorder_tab(&self, id: TabId, index: usize) -> Result<(), PinError> {
        self.mutate(|m| m.reorder_tab(id, index))
    }

    // --- Groups ---

    /// Create an empty group on a tab's top level.
    pub fn add_group(&self, tab: TabId, name: &str, columns: u32) -> Result<GroupId, PinError> {
        self.mutate(|m| m.add_group(tab, name, columns))
    }

    /// Rename a group.
    pub fn rename_group(&self, id: GroupId, name: &str) -> Result<(), PinError> {
        self.mutate(|m| m.rename_group(id, name))
    }

    /// Remove a group, releasing its entries to the tab's top level.
    pub fn remove_group(&self, id: GroupId) -> bool {
        self.mutate(|m| m.remove_group(id))
    }

    /// Flip a group's expanded flag and return the new state.
    pub fn toggle_group_expanded(&self, id: GroupId) -> Result<bool, PinError> {
        self.mutate(|m| m.toggle_group_expanded(id))
    }

    /// Move a group to `index` among its tab's groups.
    pub fn reorder_group(&self, id: GroupId, index: usize) -> Result<(), PinError> {
        self.mutate(|m| m.reorder_group(id, index))
    }

    // --- Entries ---

    /// Pin an existing file or directory.
    pub fn add_pin(
        &self,
        path: &Path,
        tab: Option<TabId>,
        group: Option<GroupId>,
        columns: u32,
    ) -> Result<EntryId, PinError> {
        self.mutate(|m| m.add_pin(path, tab, group, columns))
    }

    /// Unpin by path. Returns whether something was pinned.
    pub fn remove_pin(&self, path: &Path) -> bool {
        self.mutate(|m| m.remove_pin(path))
    }

    /// Unpin by id. Returns whether the entry existed.
    pub fn remove_pin_by_id(&self, id: EntryId) -> bool {
        self.mutate(|m| m.remove_pin_by_id(id))
    }

    /// Whether `path` is pinned.
    pub fn is_pinned(&self, path: &Path) -> bool {
        self.lock_manager().is_pinned(path)
    }

    /// Apply a field-level patch to an entry.
    pub fn update_entry(&self, id: EntryId, patch: EntryPatch, columns: u32) -> Result<(), PinError> {
        self.mutate(|m| m.update_entry(id, patch, columns))
    }

    /// Move an entry into a group of its tab, or to its top level.
    pub fn move_item_to_group(
        &self,
        id: EntryId,
        group: Option<GroupId>,
        columns: u32,
    ) -> Result<(), PinError> {
        self.mutate(|m| m.move_item_to_group(id, group, columns))
    }

    /// Move an entry to another tab's top level.
    pub fn move_item_to_tab(&self, id: EntryId, tab: TabId, columns: u32) -> Result<(), PinError> {
        self.mutate(|m| m.move_item_to_tab(id, tab, columns))
    }

    /// Drag-and-drop placement of an entry or group.
    pub fn move_element_to_cell(
        &self,
        element: ElementId,
        cell: Cell,
        context: Context,
        columns: u32,
    ) -> Result<(), PinError> {
        self.mutate(|m| m.move_element_to_cell(element, cell, context, columns))
    }

    /// Run one logical operation: save once if it changed anything, then
    /// notify once with the lock released.
    fn mutate<T>(&self, op: impl FnOnce(&mut HierarchyManager) -> T) -> T {
        let (result, changed) = {
            let mut manager = self.lock_manager();
            let result = op(&mut manager);
            (result, manager.commit())
        };
        if changed {
            self.notify();
        }
        result
    }

    fn notify(&self) {
        // Clone out so a listener may subscribe or call back in.
        let listeners: Vec<Listener> = lock(&self.listeners).clone();
        debug!(listeners = listeners.len(), "pins changed");
        for listener in listeners {
            listener();
        }
    }

    fn lock_manager(&self) -> MutexGuard<'_, HierarchyManager> {
        lock(&self.manager)
    }
}

/// A panicking listener must not wedge the board.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
