//! Flattening of the forest into a level-annotated display list.

use std::collections::HashSet;

use generational_arena::Index;

use crate::domain::arena::ItemArena;
use crate::domain::entities::ItemId;
use crate::domain::error::DomainResult;

/// One visible row of the flattened tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatNode {
    pub id: ItemId,
    pub name: String,
    /// Depth from the root, roots are 0
    pub level: usize,
    /// The source item has at least one child
    pub expandable: bool,
    pub is_expanded: bool,
    /// Only non-root items may be deleted from a row
    pub deletable: bool,
    /// Non-owning handle back to the source node
    pub index: Index,
}

/// Set of expanded items. Purely presentational, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpansionState {
    expanded: HashSet<ItemId>,
}

impl ExpansionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, id: &ItemId) -> bool {
        self.expanded.contains(id)
    }

    /// Returns true if the item was collapsed before.
    pub fn expand(&mut self, id: ItemId) -> bool {
        self.expanded.insert(id)
    }

    /// Returns true if the item was expanded before.
    pub fn collapse(&mut self, id: &ItemId) -> bool {
        self.expanded.remove(id)
    }

    /// Flip the state of an item and return the new state.
    pub fn toggle(&mut self, id: ItemId) -> bool {
        if self.expanded.remove(&id) {
            false
        } else {
            self.expanded.insert(id);
            true
        }
    }

    /// Expand an item and every item below it.
    pub fn expand_descendants(&mut self, arena: &ItemArena, id: &ItemId) -> DomainResult<()> {
        let descendants = arena.descendants(id)?;
        self.expanded.insert(*id);
        self.expanded
            .extend(descendants.into_iter().filter_map(|idx| arena.id_of(idx)));
        Ok(())
    }

    pub fn expand_all(&mut self, arena: &ItemArena) {
        self.expanded.extend(arena.iter().map(|(_, node)| node.id));
    }

    pub fn collapse_all(&mut self) {
        self.expanded.clear();
    }

    /// Forget ids that no longer exist in the forest.
    pub fn retain_existing(&mut self, arena: &ItemArena) {
        self.expanded.retain(|id| arena.contains(id));
    }

    /// Carry the state over to a new identity of the same item.
    pub fn rename(&mut self, old: &ItemId, new: ItemId) {
        if self.expanded.remove(old) {
            self.expanded.insert(new);
        }
    }

    pub fn len(&self) -> usize {
        self.expanded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expanded.is_empty()
    }
}

/// Derive the visible rows of the forest.
///
/// Depth-first, children in order. Descendants of a collapsed item are
/// never visited, so the cost is proportional to the visible rows.
pub fn flatten(arena: &ItemArena, expansion: &ExpansionState) -> Vec<FlatNode> {
    let mut rows = Vec::new();
    let mut stack: Vec<(Index, usize)> = arena.roots().iter().rev().map(|&idx| (idx, 0)).collect();

    while let Some((idx, level)) = stack.pop() {
        let Some(node) = arena.get_node(idx) else {
            continue;
        };
        let is_expanded = expansion.is_expanded(&node.id);
        rows.push(FlatNode {
            id: node.id,
            name: node.fields.name.clone(),
            level,
            expandable: node.has_children(),
            is_expanded,
            deletable: node.parent.is_some(),
            index: idx,
        });
        if is_expanded {
            stack.extend(node.children.iter().rev().map(|&child| (child, level + 1)));
        }
    }
    rows
}
