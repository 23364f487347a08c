//! Reparent target filtering.

use std::collections::HashSet;

use generational_arena::Index;

use crate::domain::arena::ItemArena;
use crate::domain::entities::ItemId;
use crate::domain::error::DomainResult;

/// Every item that `id` may be moved under: the whole forest minus the item
/// itself and its descendants, in pre-order.
///
/// One traversal; the excluded subtree is skipped as a whole when the walk
/// reaches it.
pub fn eligible_targets(arena: &ItemArena, id: &ItemId) -> DomainResult<Vec<Index>> {
    let excluded = arena.index_of(id)?;
    let mut targets = Vec::with_capacity(arena.len().saturating_sub(1));
    let mut stack: Vec<Index> = arena.roots().iter().rev().copied().collect();

    while let Some(idx) = stack.pop() {
        if idx == excluded {
            continue;
        }
        if let Some(node) = arena.get_node(idx) {
            targets.push(idx);
            stack.extend(node.children.iter().rev());
        }
    }
    Ok(targets)
}

pub fn eligible_target_ids(arena: &ItemArena, id: &ItemId) -> DomainResult<Vec<ItemId>> {
    Ok(eligible_targets(arena, id)?
        .into_iter()
        .filter_map(|idx| arena.id_of(idx))
        .collect())
}

/// The item and all of its descendants.
pub fn excluded_set(arena: &ItemArena, id: &ItemId) -> DomainResult<HashSet<ItemId>> {
    let mut excluded: HashSet<ItemId> = arena
        .descendants(id)?
        .into_iter()
        .filter_map(|idx| arena.id_of(idx))
        .collect();
    excluded.insert(*id);
    Ok(excluded)
}
