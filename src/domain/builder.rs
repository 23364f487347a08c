//! Tree builder: materializes a nested forest into an arena.

use std::collections::HashSet;

use tracing::{debug, instrument};

use crate::domain::arena::ItemArena;
use crate::domain::entities::{ItemId, NestedItem};
use crate::domain::error::{DomainError, DomainResult};

/// Constructs an `ItemArena` from nested items.
///
/// Names are validated and normalized, and ids must be unique across the
/// whole forest. The input is checked completely before the arena is built,
/// so a rejected forest never yields a partial arena.
pub struct ItemTreeBuilder {
    visited_ids: HashSet<ItemId>,
}

impl Default for ItemTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemTreeBuilder {
    pub fn new() -> Self {
        Self {
            visited_ids: HashSet::new(),
        }
    }

    #[instrument(level = "debug", skip_all, fields(roots = items.len()))]
    pub fn build(&mut self, items: Vec<NestedItem>) -> DomainResult<ItemArena> {
        self.visited_ids.clear();
        let items = items
            .into_iter()
            .map(|item| self.check(item))
            .collect::<DomainResult<Vec<_>>>()?;

        let mut arena = ItemArena::new();
        for item in &items {
            arena.graft(item, None, None)?;
        }
        debug!("build: {} items in {} roots", arena.len(), items.len());
        Ok(arena)
    }

    /// Validate one tree iteratively, returning it with normalized fields.
    fn check(&mut self, mut root: NestedItem) -> DomainResult<NestedItem> {
        let mut stack = vec![&mut root];
        while let Some(current) = stack.pop() {
            if !self.visited_ids.insert(current.id) {
                return Err(DomainError::DuplicateId(current.id));
            }
            let fields = current.fields().validated().map_err(|e| match e {
                DomainError::InvalidInput(reason) => {
                    DomainError::InvalidInput(format!("item {}: {}", current.id, reason))
                }
                other => other,
            })?;
            current.name = fields.name;
            current.unit = fields.unit;
            stack.extend(current.children.iter_mut());
        }
        Ok(root)
    }
}
