use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::PinError;
use crate::model::{Cell, Context, ElementId, EntryId, Hierarchy};

/// How grid coordinates are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutMode {
    /// Coordinates are derived; every context is kept gap-free.
    #[default]
    Ordered,
    /// Coordinates are authoritative and persisted exactly as placed.
    FreeForm,
}

/// Grid placement over the contexts of a [`Hierarchy`].
///
/// Every context is an unbounded zero-based grid. The column count is an
/// upper bound supplied per call and only shapes the cells chosen by that
/// call; cells stored earlier are never reinterpreted.
pub struct ArrangementEngine;

impl ArrangementEngine {
    /// Elements of a context with their cells. Groups come first, then
    /// entries, each in collection order; this is the tie-break for
    /// elements sharing a cell.
    pub fn elements(hierarchy: &Hierarchy, context: Context) -> Vec<(ElementId, Cell)> {
        let groups: Vec<(ElementId, Cell)> = match context {
            Context::TabTop(tab) => hierarchy
                .groups_in_tab(tab)
                .map(|g| (ElementId::Group(g.id), g.cell))
                .collect(),
            Context::Group(_) => Vec::new(),
        };
        let entries = hierarchy
            .entries_in(context)
            .map(|e| (ElementId::Entry(e.id), e.cell));
        groups.into_iter().chain(entries).collect()
    }

    /// Elements of a context in row-major cell order.
    pub fn ordered_elements(hierarchy: &Hierarchy, context: Context) -> Vec<(ElementId, Cell)> {
        let mut elements = Self::elements(hierarchy, context);
        // Stable, so shared cells keep the tie-break order.
        elements.sort_by_key(|&(_, cell)| cell);
        elements
    }

    /// Entries of a context in row-major cell order.
    pub fn ordered_entries(hierarchy: &Hierarchy, context: Context) -> Vec<EntryId> {
        Self::ordered_elements(hierarchy, context)
            .into_iter()
            .filter_map(|(element, _)| match element {
                ElementId::Entry(id) => Some(id),
                ElementId::Group(_) => None,
            })
            .collect()
    }

    /// Cells held by any element of `context`.
    pub fn occupied_cells(hierarchy: &Hierarchy, context: Context) -> BTreeSet<Cell> {
        Self::elements(hierarchy, context)
            .into_iter()
            .map(|(_, cell)| cell)
            .collect()
    }

    /// First unoccupied cell of a row-major scan limited to `columns`
    /// columns per row.
    pub fn next_free_cell(hierarchy: &Hierarchy, context: Context, columns: u32) -> Cell {
        let occupied = Self::occupied_cells(hierarchy, context);
        (0..)
            .map(|index| Cell::from_index(index, columns))
            .find(|cell| !occupied.contains(cell))
            .unwrap_or_default()
    }

    /// The context an element currently lives in.
    pub fn context_of(hierarchy: &Hierarchy, element: ElementId) -> Option<Context> {
        match element {
            ElementId::Group(id) => hierarchy.group(id).map(|g| Context::TabTop(g.tab_id)),
            ElementId::Entry(id) => hierarchy.entry(id).map(|e| e.context()),
        }
    }

    /// The cell an element currently occupies.
    pub fn cell_of(hierarchy: &Hierarchy, element: ElementId) -> Option<Cell> {
        match element {
            ElementId::Group(id) => hierarchy.group(id).map(|g| g.cell),
            ElementId::Entry(id) => hierarchy.entry(id).map(|e| e.cell),
        }
    }

    /// Check that `element` may be moved into `context` and return the
    /// context it currently lives in.
    pub fn validate_move(
        hierarchy: &Hierarchy,
        element: ElementId,
        context: Context,
    ) -> Result<Context, PinError> {
        let current = Self::context_of(hierarchy, element).ok_or(match element {
            ElementId::Group(id) => PinError::UnknownGroup { id },
            ElementId::Entry(id) => PinError::UnknownEntry { id },
        })?;
        match context {
            Context::TabTop(id) if hierarchy.tab(id).is_none() => Err(PinError::UnknownTab { id }),
            Context::Group(id) if hierarchy.group(id).is_none() => {
                Err(PinError::UnknownGroup { id })
            }
            Context::Group(_) if matches!(element, ElementId::Group(_)) => {
                Err(PinError::NestedGroup)
            }
            _ => Ok(current),
        }
    }

    /// Place `element` at `target` inside `context`.
    ///
    /// Within the element's own context an occupied target is swapped: the
    /// occupant takes the mover's previous cell. Moving into another context
    /// vacates the old cell without any swap, and the target cell is ignored
    /// in favour of [`Self::next_free_cell`] of the new context.
    ///
    /// Returns whether anything changed.
    pub fn move_to_cell(
        hierarchy: &mut Hierarchy,
        element: ElementId,
        target: Cell,
        context: Context,
        columns: u32,
    ) -> Result<bool, PinError> {
        let current = Self::validate_move(hierarchy, element, context)?;
        if current != context {
            Self::reparent(hierarchy, element, context, columns);
            return Ok(true);
        }

        let Some(from) = Self::cell_of(hierarchy, element) else {
            return Ok(false);
        };
        if from == target {
            return Ok(false);
        }

        let occupant = Self::elements(hierarchy, context)
            .into_iter()
            .find(|&(other, cell)| other != element && cell == target);
        if let Some((other, _)) = occupant {
            Self::set_cell(hierarchy, other, from);
        }
        Self::set_cell(hierarchy, element, target);
        Ok(true)
    }

    /// Reassign consecutive cells from the origin, keeping row-major order.
    /// Returns whether any cell changed.
    pub fn compact_items(hierarchy: &mut Hierarchy, context: Context, columns: u32) -> bool {
        let mut changed = false;
        for (index, (element, cell)) in Self::ordered_elements(hierarchy, context)
            .into_iter()
            .enumerate()
        {
            let target = Cell::from_index(index, columns);
            if cell != target {
                Self::set_cell(hierarchy, element, target);
                changed = true;
            }
        }
        changed
    }

    /// Every context: each tab's top level followed by its groups.
    pub fn contexts(hierarchy: &Hierarchy) -> Vec<Context> {
        hierarchy
            .tabs()
            .iter()
            .flat_map(|tab| {
                std::iter::once(Context::TabTop(tab.id))
                    .chain(hierarchy.groups_in_tab(tab.id).map(|g| Context::Group(g.id)))
            })
            .collect()
    }

    /// Compact every context. Returns whether any cell changed.
    pub fn compact_all(hierarchy: &mut Hierarchy, columns: u32) -> bool {
        let mut changed = false;
        for context in Self::contexts(hierarchy) {
            changed |= Self::compact_items(hierarchy, context, columns);
        }
        changed
    }

    /// Move `element` into another context at its next free cell. The
    /// caller has validated the move.
    fn reparent(hierarchy: &mut Hierarchy, element: ElementId, context: Context, columns: u32) {
        let cell = Self::next_free_cell(hierarchy, context, columns);
        match (element, context) {
            (ElementId::Entry(id), Context::TabTop(tab)) => {
                if let Some(entry) = hierarchy.entry_mut(id) {
                    entry.tab_id = tab;
                    entry.group_id = None;
                    entry.cell = cell;
                }
            }
            (ElementId::Entry(id), Context::Group(group)) => {
                let Some(tab) = hierarchy.group(group).map(|g| g.tab_id) else {
                    return;
                };
                if let Some(entry) = hierarchy.entry_mut(id) {
                    entry.tab_id = tab;
                    entry.group_id = Some(group);
                    entry.cell = cell;
                }
            }
            (ElementId::Group(id), Context::TabTop(tab)) => {
                if let Some(group) = hierarchy.group_mut(id) {
                    group.tab_id = tab;
                    group.cell = cell;
                }
                // Members follow their group to the new tab.
                for entry in hierarchy.entries.iter_mut() {
                    if entry.group_id == Some(id) {
                        entry.tab_id = tab;
                    }
                }
            }
            (ElementId::Group(_), Context::Group(_)) => {}
        }
    }

    fn set_cell(hierarchy: &mut Hierarchy, element: ElementId, cell: Cell) {
        match element {
            ElementId::Group(id) => {
                if let Some(group) = hierarchy.group_mut(id) {
                    group.cell = cell;
                }
            }
            ElementId::Entry(id) => {
                if let Some(entry) = hierarchy.entry_mut(id) {
                    entry.cell = cell;
                }
            }
        }
    }
}
