//! Arena-backed item forest: the single source of truth for the tree.

use std::collections::{HashMap, HashSet};
use std::fmt;

use generational_arena::{Arena, Index};
use termtree::Tree;
use tracing::{debug, instrument};

use crate::domain::builder::ItemTreeBuilder;
use crate::domain::entities::{ItemDescriptor, ItemFields, ItemId, NestedItem};
use crate::domain::error::{DomainError, DomainResult};

/// Tree node in the arena-based forest.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: ItemId,
    pub fields: ItemFields,
    /// Index of parent node in the arena, None for root nodes
    pub parent: Option<Index>,
    /// Indices of child nodes in the arena, in display order
    pub children: Vec<Index>,
}

impl TreeNode {
    pub fn name(&self) -> &str {
        &self.fields.name
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// A subtree cut out of the forest, with enough context to put it back.
#[derive(Debug, Clone, PartialEq)]
pub struct DetachedSubtree {
    pub item: NestedItem,
    /// Former parent, None if the subtree was a root
    pub parent: Option<ItemId>,
    /// Former position among its siblings
    pub position: usize,
}

impl DetachedSubtree {
    /// Number of items removed, including the subtree root.
    pub fn item_count(&self) -> usize {
        self.item.subtree_len()
    }
}

/// Arena-based forest of items.
///
/// All nodes live in one generational arena; parent and children are stored
/// as indices, so ownership is never cyclic. Every node is listed exactly
/// once: in its parent's children or in the root list.
#[derive(Debug, Clone)]
pub struct ItemArena {
    arena: Arena<TreeNode>,
    roots: Vec<Index>,
    ids: HashMap<ItemId, Index>,
}

impl Default for ItemArena {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemArena {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            roots: Vec::new(),
            ids: HashMap::new(),
        }
    }

    /// Build a forest from its nested form.
    pub fn from_nested(items: Vec<NestedItem>) -> DomainResult<Self> {
        ItemTreeBuilder::new().build(items)
    }

    /// Replace the whole forest. On error the current forest is kept.
    #[instrument(level = "debug", skip_all, fields(roots = items.len()))]
    pub fn replace_all(&mut self, items: Vec<NestedItem>) -> DomainResult<()> {
        *self = Self::from_nested(items)?;
        debug!("replace_all: {} items", self.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn roots(&self) -> &[Index] {
        &self.roots
    }

    pub fn root_ids(&self) -> Vec<ItemId> {
        self.roots.iter().filter_map(|&idx| self.id_of(idx)).collect()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.ids.contains_key(id)
    }

    pub fn find_by_id(&self, id: &ItemId) -> Option<Index> {
        self.ids.get(id).copied()
    }

    /// Like `find_by_id`, but absence is an error.
    pub fn index_of(&self, id: &ItemId) -> DomainResult<Index> {
        self.find_by_id(id).ok_or(DomainError::NotFound(*id))
    }

    pub fn get(&self, id: &ItemId) -> DomainResult<&TreeNode> {
        let idx = self.index_of(id)?;
        self.node(idx)
    }

    pub fn get_node(&self, idx: Index) -> Option<&TreeNode> {
        self.arena.get(idx)
    }

    pub fn id_of(&self, idx: Index) -> Option<ItemId> {
        self.get_node(idx).map(|node| node.id)
    }

    pub fn children_ids(&self, id: &ItemId) -> DomainResult<Vec<ItemId>> {
        let node = self.get(id)?;
        Ok(node
            .children
            .iter()
            .filter_map(|&idx| self.id_of(idx))
            .collect())
    }

    /// Flat description of a node, including its parent id.
    pub fn descriptor(&self, idx: Index) -> Option<ItemDescriptor> {
        let node = self.get_node(idx)?;
        Some(ItemDescriptor {
            id: node.id,
            name: node.fields.name.clone(),
            quantity: node.fields.quantity,
            unit: node.fields.unit.clone(),
            parent_id: node.parent.and_then(|p| self.id_of(p)),
        })
    }

    fn node(&self, idx: Index) -> DomainResult<&TreeNode> {
        self.arena.get(idx).ok_or_else(|| {
            DomainError::InvariantViolated(format!("dangling arena index {:?}", idx))
        })
    }

    fn node_mut(&mut self, idx: Index) -> DomainResult<&mut TreeNode> {
        self.arena.get_mut(idx).ok_or_else(|| {
            DomainError::InvariantViolated(format!("dangling arena index {:?}", idx))
        })
    }

    // ------------------------------------------------------------
    // Structural mutation
    // ------------------------------------------------------------

    /// Append a new root item.
    #[instrument(level = "debug", skip(self, fields))]
    pub fn insert_root(&mut self, id: ItemId, fields: ItemFields) -> DomainResult<Index> {
        let fields = fields.validated()?;
        self.insert_at(id, fields, None, None)
    }

    /// Append a new item to the children of `parent_id`.
    #[instrument(level = "debug", skip(self, fields))]
    pub fn insert_child(
        &mut self,
        parent_id: &ItemId,
        id: ItemId,
        fields: ItemFields,
    ) -> DomainResult<Index> {
        let parent = self.index_of(parent_id)?;
        let fields = fields.validated()?;
        self.insert_at(id, fields, Some(parent), None)
    }

    pub(crate) fn insert_at(
        &mut self,
        id: ItemId,
        fields: ItemFields,
        parent: Option<Index>,
        position: Option<usize>,
    ) -> DomainResult<Index> {
        if self.ids.contains_key(&id) {
            return Err(DomainError::DuplicateId(id));
        }
        let idx = self.arena.insert(TreeNode {
            id,
            fields,
            parent: None,
            children: Vec::new(),
        });
        self.ids.insert(id, idx);
        self.attach(idx, parent, position)?;
        Ok(idx)
    }

    /// Remove an item together with all of its descendants.
    ///
    /// Returns a snapshot of the removed subtree and where it was attached,
    /// which `restore_subtree` accepts to undo the removal.
    #[instrument(level = "debug", skip(self))]
    pub fn remove_subtree(&mut self, id: &ItemId) -> DomainResult<DetachedSubtree> {
        let idx = self.index_of(id)?;
        let item = self.nested_at(idx)?;
        let parent = self.node(idx)?.parent.and_then(|p| self.id_of(p));
        let subtree = self.subtree_indices(idx);

        let position = self.detach(idx)?;
        for node_idx in subtree {
            if let Some(node) = self.arena.remove(node_idx) {
                self.ids.remove(&node.id);
            }
        }
        debug!("remove_subtree: removed {} items", item.subtree_len());

        Ok(DetachedSubtree {
            item,
            parent,
            position,
        })
    }

    /// Put a previously removed subtree back at its former position.
    ///
    /// The position is clamped to the current number of siblings. Fails with
    /// NotFound if the former parent is gone, and with DuplicateId if any id
    /// of the subtree exists again; in both cases nothing is changed.
    #[instrument(level = "debug", skip(self, detached), fields(id = %detached.item.id))]
    pub fn restore_subtree(&mut self, detached: DetachedSubtree) -> DomainResult<Index> {
        let parent = match &detached.parent {
            Some(parent_id) => Some(self.index_of(parent_id)?),
            None => None,
        };
        let mut seen = HashSet::new();
        for id in detached.item.ids() {
            if self.ids.contains_key(&id) || !seen.insert(id) {
                return Err(DomainError::DuplicateId(id));
            }
        }
        self.graft(&detached.item, parent, Some(detached.position))
    }

    /// Materialize a nested item (and its subtree) under `parent`.
    ///
    /// Callers guarantee the ids are not yet present.
    pub(crate) fn graft(
        &mut self,
        item: &NestedItem,
        parent: Option<Index>,
        position: Option<usize>,
    ) -> DomainResult<Index> {
        let top = self.insert_at(item.id, item.fields(), parent, position)?;
        // Popping in reverse keeps sibling order, since attach appends.
        let mut stack: Vec<(&NestedItem, Index)> =
            item.children.iter().rev().map(|child| (child, top)).collect();
        while let Some((current, parent_idx)) = stack.pop() {
            let idx = self.insert_at(current.id, current.fields(), Some(parent_idx), None)?;
            stack.extend(current.children.iter().rev().map(|child| (child, idx)));
        }
        Ok(top)
    }

    /// Move an item to the end of `new_parent`'s children, or to the end of
    /// the root list when `new_parent` is None.
    ///
    /// Fails with CycleRejected, before anything changes, if the new parent
    /// is the item itself or one of its descendants. Moving an item to its
    /// current parent keeps its position.
    #[instrument(level = "debug", skip(self))]
    pub fn reparent(&mut self, id: &ItemId, new_parent: Option<&ItemId>) -> DomainResult<()> {
        let (idx, target) = self.check_move(id, new_parent)?;
        if self.node(idx)?.parent == target {
            return Ok(());
        }
        self.detach(idx)?;
        self.attach(idx, target, None)
    }

    /// Move an item to an explicit position under `new_parent`.
    ///
    /// The position is clamped to the number of siblings after the item has
    /// been taken out of its old place.
    #[instrument(level = "debug", skip(self))]
    pub fn move_to(
        &mut self,
        id: &ItemId,
        new_parent: Option<&ItemId>,
        position: usize,
    ) -> DomainResult<()> {
        let (idx, target) = self.check_move(id, new_parent)?;
        self.detach(idx)?;
        self.attach(idx, target, Some(position))
    }

    fn check_move(
        &self,
        id: &ItemId,
        new_parent: Option<&ItemId>,
    ) -> DomainResult<(Index, Option<Index>)> {
        let idx = self.index_of(id)?;
        let target = match new_parent {
            Some(parent_id) => {
                let target = self.index_of(parent_id)?;
                if target == idx || self.is_ancestor_index(idx, target) {
                    return Err(DomainError::CycleRejected {
                        node: *id,
                        target: *parent_id,
                    });
                }
                Some(target)
            }
            None => None,
        };
        Ok((idx, target))
    }

    /// Parent id (None for roots) and position among siblings.
    pub fn location(&self, id: &ItemId) -> DomainResult<(Option<ItemId>, usize)> {
        let idx = self.index_of(id)?;
        let parent = self.node(idx)?.parent;
        let siblings = self.siblings(parent)?;
        let position = siblings
            .iter()
            .position(|&s| s == idx)
            .ok_or_else(|| DomainError::InvariantViolated(format!("{} not listed by its parent", id)))?;
        Ok((parent.and_then(|p| self.id_of(p)), position))
    }

    /// Replace the attributes of an item, returning the previous ones.
    /// Identity and position are unchanged.
    #[instrument(level = "debug", skip(self, fields))]
    pub fn update_fields(&mut self, id: &ItemId, fields: ItemFields) -> DomainResult<ItemFields> {
        let idx = self.index_of(id)?;
        let fields = fields.validated()?;
        let node = self.node_mut(idx)?;
        Ok(std::mem::replace(&mut node.fields, fields))
    }

    /// Give an item a new identity, keeping its place in the tree.
    /// Used when a placeholder id is answered with the server id.
    #[instrument(level = "debug", skip(self))]
    pub fn rename_id(&mut self, old: &ItemId, new: ItemId) -> DomainResult<()> {
        if *old == new {
            return Ok(());
        }
        let idx = self.index_of(old)?;
        if self.ids.contains_key(&new) {
            return Err(DomainError::DuplicateId(new));
        }
        self.node_mut(idx)?.id = new;
        self.ids.remove(old);
        self.ids.insert(new, idx);
        Ok(())
    }

    fn siblings(&self, parent: Option<Index>) -> DomainResult<&Vec<Index>> {
        match parent {
            Some(p) => Ok(&self.node(p)?.children),
            None => Ok(&self.roots),
        }
    }

    /// Take a node out of its parent's children (or the root list).
    /// Returns its former position. Must be followed by `attach` or by
    /// removal of the node within the same operation.
    fn detach(&mut self, idx: Index) -> DomainResult<usize> {
        let parent = self.node(idx)?.parent;
        let siblings = match parent {
            Some(p) => &mut self.node_mut(p)?.children,
            None => &mut self.roots,
        };
        let position = siblings.iter().position(|&s| s == idx).ok_or_else(|| {
            DomainError::InvariantViolated(format!("{:?} not listed by its parent", idx))
        })?;
        siblings.remove(position);
        self.node_mut(idx)?.parent = None;
        Ok(position)
    }

    fn attach(&mut self, idx: Index, parent: Option<Index>, position: Option<usize>) -> DomainResult<()> {
        let siblings = match parent {
            Some(p) => &mut self.node_mut(p)?.children,
            None => &mut self.roots,
        };
        let position = position.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(position, idx);
        self.node_mut(idx)?.parent = parent;
        Ok(())
    }

    // ------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------

    /// True if `ancestor` lies on the parent chain of `node`.
    pub fn is_ancestor(&self, ancestor: &ItemId, node: &ItemId) -> DomainResult<bool> {
        let ancestor = self.index_of(ancestor)?;
        let node = self.index_of(node)?;
        Ok(self.is_ancestor_index(ancestor, node))
    }

    fn is_ancestor_index(&self, ancestor: Index, node: Index) -> bool {
        let mut current = self.get_node(node).and_then(|n| n.parent);
        while let Some(idx) = current {
            if idx == ancestor {
                return true;
            }
            current = self.get_node(idx).and_then(|n| n.parent);
        }
        false
    }

    /// Ids from the root down to (and including) the item.
    pub fn path_to(&self, id: &ItemId) -> DomainResult<Vec<ItemId>> {
        let mut path = vec![*id];
        let mut current = self.get(id)?.parent;
        while let Some(idx) = current {
            let node = self.node(idx)?;
            path.push(node.id);
            current = node.parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Descendants of an item in pre-order, excluding the item itself.
    pub fn descendants(&self, id: &ItemId) -> DomainResult<Vec<Index>> {
        let idx = self.index_of(id)?;
        let mut all = self.subtree_indices(idx);
        all.remove(0);
        Ok(all)
    }

    pub fn count_descendants(&self, id: &ItemId) -> DomainResult<usize> {
        Ok(self.descendants(id)?.len())
    }

    /// The node and its descendants in pre-order.
    fn subtree_indices(&self, idx: Index) -> Vec<Index> {
        let mut out = Vec::new();
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.get_node(current) {
                out.push(current);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// Number of levels in the deepest tree of the forest; 0 when empty.
    #[instrument(level = "debug", skip(self))]
    pub fn depth(&self) -> usize {
        self.roots
            .iter()
            .map(|&root| self.calculate_depth(root))
            .max()
            .unwrap_or(0)
    }

    fn calculate_depth(&self, node_idx: Index) -> usize {
        if let Some(node) = self.get_node(node_idx) {
            1 + node
                .children
                .iter()
                .map(|&child| self.calculate_depth(child))
                .max()
                .unwrap_or(0)
        } else {
            0
        }
    }

    pub fn iter(&self) -> ForestIterator<'_> {
        ForestIterator::new(self)
    }

    pub fn iter_postorder(&self) -> PostOrderIterator<'_> {
        PostOrderIterator::new(self)
    }

    /// Nested snapshot of the whole forest.
    pub fn to_nested(&self) -> Vec<NestedItem> {
        self.roots
            .iter()
            .filter_map(|&root| self.nested_at(root).ok())
            .collect()
    }

    pub fn nested(&self, id: &ItemId) -> DomainResult<NestedItem> {
        let idx = self.index_of(id)?;
        self.nested_at(idx)
    }

    fn nested_at(&self, idx: Index) -> DomainResult<NestedItem> {
        let node = self.node(idx)?;
        let children = node
            .children
            .iter()
            .map(|&child| self.nested_at(child))
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(NestedItem::new(node.id, node.fields.clone()).with_children(children))
    }

    /// Verify uniqueness, acyclicity and parent consistency.
    pub fn check_invariants(&self) -> DomainResult<()> {
        let violation = |msg: String| Err(DomainError::InvariantViolated(msg));

        if self.ids.len() != self.arena.len() {
            return violation(format!(
                "id index has {} entries for {} nodes",
                self.ids.len(),
                self.arena.len()
            ));
        }

        let mut listed: HashSet<Index> = HashSet::new();
        for &root in &self.roots {
            match self.get_node(root) {
                Some(node) if node.parent.is_none() => {}
                _ => return violation(format!("root {:?} has a parent or is dangling", root)),
            }
            if !listed.insert(root) {
                return violation(format!("root {:?} listed twice", root));
            }
        }

        for (idx, node) in self.arena.iter() {
            if self.ids.get(&node.id) != Some(&idx) {
                return violation(format!("id {} not indexed", node.id));
            }
            for &child in &node.children {
                match self.get_node(child) {
                    Some(c) if c.parent == Some(idx) => {}
                    _ => return violation(format!("child of {} points elsewhere", node.id)),
                }
                if !listed.insert(child) {
                    return violation(format!("{:?} listed twice", child));
                }
            }
        }

        if listed.len() != self.arena.len() {
            return violation(format!(
                "{} of {} nodes reachable from a listing",
                listed.len(),
                self.arena.len()
            ));
        }

        // Every node listed exactly once and every listing consistent, so
        // a traversal from the roots that reaches all nodes rules out cycles.
        if self.iter().count() != self.arena.len() {
            return violation("forest contains a cycle".into());
        }
        Ok(())
    }

    /// Render the forest as a termtree, one line per item.
    pub fn to_tree_string(&self) -> Tree<String> {
        fn build_tree(arena: &ItemArena, node_idx: Index) -> Tree<String> {
            match arena.get_node(node_idx) {
                Some(node) => Tree::new(format!("{} [{}]", node.fields, node.id)).with_leaves(
                    node.children.iter().map(|&child| build_tree(arena, child)),
                ),
                None => Tree::new("?".to_string()),
            }
        }

        Tree::new("items".to_string())
            .with_leaves(self.roots.iter().map(|&root| build_tree(self, root)))
    }
}

impl fmt::Display for ItemArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_tree_string())
    }
}

/// Pre-order traversal over the whole forest, roots in order.
pub struct ForestIterator<'a> {
    arena: &'a ItemArena,
    stack: Vec<Index>,
}

impl<'a> ForestIterator<'a> {
    fn new(arena: &'a ItemArena) -> Self {
        let stack = arena.roots.iter().rev().copied().collect();
        Self { arena, stack }
    }
}

impl<'a> Iterator for ForestIterator<'a> {
    type Item = (Index, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current_idx) = self.stack.pop() {
            if let Some(node) = self.arena.get_node(current_idx) {
                // Push children in reverse order for left-to-right traversal
                self.stack.extend(node.children.iter().rev());
                return Some((current_idx, node));
            }
        }
        None
    }
}

pub struct PostOrderIterator<'a> {
    arena: &'a ItemArena,
    stack: Vec<(Index, bool)>,
}

impl<'a> PostOrderIterator<'a> {
    fn new(arena: &'a ItemArena) -> Self {
        let stack = arena.roots.iter().rev().map(|&root| (root, false)).collect();
        Self { arena, stack }
    }
}

impl<'a> Iterator for PostOrderIterator<'a> {
    type Item = (Index, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((current_idx, visited)) = self.stack.pop() {
            if let Some(node) = self.arena.get_node(current_idx) {
                if !visited {
                    self.stack.push((current_idx, true));
                    for &child in node.children.iter().rev() {
                        self.stack.push((child, false));
                    }
                } else {
                    return Some((current_idx, node));
                }
            }
        }
        None
    }
}
