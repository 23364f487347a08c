//! Tree mutation service
//!
//! Owns the item forest and the expansion state, applies user actions
//! optimistically and reconciles them with the remote side through a
//! `SyncAdapter`. A failed remote call is undone locally, or answered with a
//! full re-fetch when the local undo is no longer possible.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::{debug, instrument, warn};

use crate::application::{ApplicationError, ApplicationResult};
use crate::config::Settings;
use crate::domain::{
    filter, flatten, DetachedSubtree, DomainError, ExpansionState, FlatNode, ItemArena,
    ItemDescriptor, ItemFields, ItemId, NestedItem,
};
use crate::infrastructure::{SyncAdapter, SyncError, SyncResult};

/// Identifies one optimistic operation for stale-rollback detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpTicket {
    seq: u64,
    generation: u64,
}

#[derive(Debug, Default)]
struct TreeState {
    arena: ItemArena,
    expansion: ExpansionState,
    next_local_id: u64,
    next_op: u64,
    /// Last operation that touched an item
    touched: HashMap<ItemId, u64>,
    /// Bumped on every wholesale replacement of the forest
    generation: u64,
}

impl TreeState {
    fn allocate_local_id(&mut self) -> ItemId {
        self.next_local_id += 1;
        ItemId::Local(self.next_local_id)
    }

    fn touch(&mut self, ids: &[ItemId]) -> OpTicket {
        self.next_op += 1;
        for id in ids {
            self.touched.insert(*id, self.next_op);
        }
        OpTicket {
            seq: self.next_op,
            generation: self.generation,
        }
    }

    /// True if neither a refresh nor a later operation touched `ids` since
    /// the ticket was issued.
    fn is_current(&self, ticket: OpTicket, ids: &[ItemId]) -> bool {
        ticket.generation == self.generation
            && ids
                .iter()
                .all(|id| self.touched.get(id) == Some(&ticket.seq))
    }

    fn release(&mut self, ticket: OpTicket, ids: &[ItemId]) {
        for id in ids {
            if self.touched.get(id) == Some(&ticket.seq) {
                self.touched.remove(id);
            }
        }
    }

    fn replace(&mut self, arena: ItemArena) {
        self.arena = arena;
        self.generation += 1;
        self.touched.clear();
        self.expansion.retain_existing(&self.arena);
    }
}

/// Service owning the item tree.
///
/// Local mutations complete under the write lock and the lock is released
/// before any remote call, so readers never see a half-applied change.
pub struct TreeService {
    adapter: Arc<dyn SyncAdapter>,
    settings: Arc<Settings>,
    state: RwLock<TreeState>,
    changes: watch::Sender<u64>,
}

impl TreeService {
    /// Create a service with an empty tree. Call `load` to fetch the forest.
    pub fn new(adapter: Arc<dyn SyncAdapter>, settings: Arc<Settings>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            adapter,
            settings,
            state: RwLock::new(TreeState::default()),
            changes,
        }
    }

    /// Receiver that sees the revision counter after every committed change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.changes.borrow()
    }

    fn notify(&self) {
        self.changes.send_modify(|revision| *revision += 1);
    }

    // ------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------

    /// Fetch the forest and start with everything collapsed
    /// (or expanded, if configured).
    #[instrument(level = "debug", skip(self))]
    pub async fn load(&self) -> ApplicationResult<usize> {
        let arena = self.fetch().await?;
        let count = arena.len();
        {
            let mut state = self.state.write().await;
            state.expansion.collapse_all();
            state.replace(arena);
            if self.settings.view.expand_all_on_load {
                let TreeState {
                    arena, expansion, ..
                } = &mut *state;
                expansion.expand_all(arena);
            }
        }
        self.notify();
        debug!("load: {} items", count);
        Ok(count)
    }

    /// Replace the forest with the remote one, keeping the expansion of
    /// items that still exist. On failure the local tree is unchanged.
    #[instrument(level = "debug", skip(self))]
    pub async fn refresh(&self) -> ApplicationResult<usize> {
        let arena = self.fetch().await?;
        let count = arena.len();
        {
            let mut state = self.state.write().await;
            state.replace(arena);
            if self.settings.view.expand_all_on_load {
                let TreeState {
                    arena, expansion, ..
                } = &mut *state;
                expansion.expand_all(arena);
            }
        }
        self.notify();
        debug!("refresh: {} items", count);
        Ok(count)
    }

    async fn fetch(&self) -> ApplicationResult<ItemArena> {
        let items = self.adapter.fetch_tree().await.map_err(|source| {
            warn!("fetch failed: {}", source);
            sync_failed("fetch tree", source, true)
        })?;
        let arena = ItemArena::from_nested(items)
            .map_err(|e| sync_failed("fetch tree", SyncError::Malformed(e.to_string()), true))?;
        if let Some((_, node)) = arena.iter().find(|(_, node)| node.id.is_local()) {
            let source = SyncError::Malformed(format!("fetched item carries local id {}", node.id));
            return Err(sync_failed("fetch tree", source, true));
        }
        Ok(arena)
    }

    // ------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------

    /// Append a new item to the children of `parent_id`.
    ///
    /// Returns the server-assigned id.
    #[instrument(level = "debug", skip(self, fields))]
    pub async fn insert_child(
        &self,
        parent_id: &ItemId,
        fields: ItemFields,
    ) -> ApplicationResult<ItemId> {
        self.insert(Some(parent_id), fields).await
    }

    /// Append a new root item. Returns the server-assigned id.
    #[instrument(level = "debug", skip(self, fields))]
    pub async fn insert_root(&self, fields: ItemFields) -> ApplicationResult<ItemId> {
        self.insert(None, fields).await
    }

    async fn insert(
        &self,
        parent_id: Option<&ItemId>,
        fields: ItemFields,
    ) -> ApplicationResult<ItemId> {
        let fields = fields.validated()?;

        let (local_id, parent_remote, ticket) = {
            let mut state = self.state.write().await;
            let parent_remote = match parent_id {
                Some(parent) => {
                    state.arena.index_of(parent)?;
                    Some(persisted(parent)?)
                }
                None => None,
            };
            let local_id = state.allocate_local_id();
            match parent_id {
                Some(parent) => {
                    state.arena.insert_child(parent, local_id, fields.clone())?;
                    if self.settings.view.expand_parent_on_insert {
                        state.expansion.expand(*parent);
                    }
                }
                None => {
                    state.arena.insert_root(local_id, fields.clone())?;
                }
            }
            let ticket = state.touch(&[local_id]);
            (local_id, parent_remote, ticket)
        };
        self.notify();
        debug!("insert: optimistic {} under {:?}", local_id, parent_id);

        let result = self
            .adapter
            .create_item(&fields, parent_remote)
            .await
            .and_then(accept);

        match result {
            Ok(descriptor) => {
                self.reconcile_insert(local_id, ticket, &descriptor).await;
                self.notify();
                self.refresh_after_commit().await;
                Ok(descriptor.id)
            }
            Err(source) => {
                warn!("create of {} failed: {}", local_id, source);
                let undone = {
                    let mut state = self.state.write().await;
                    let undone = state.is_current(ticket, &[local_id])
                        && state.arena.remove_subtree(&local_id).is_ok();
                    if undone {
                        state.release(ticket, &[local_id]);
                    } else {
                        state.touch(&[local_id]);
                    }
                    undone
                };
                let rolled_back = self.settle(undone).await;
                Err(sync_failed(
                    format!("create item '{}'", fields.name),
                    source,
                    rolled_back,
                ))
            }
        }
    }

    /// Replace the placeholder with the server's answer.
    ///
    /// The item exists remotely at this point, so a local failure is not an
    /// error of the operation. It marks the ids as touched instead, which
    /// turns any pending rollback holding the placeholder into a re-fetch.
    async fn reconcile_insert(
        &self,
        local_id: ItemId,
        ticket: OpTicket,
        descriptor: &ItemDescriptor,
    ) {
        let mut state = self.state.write().await;
        state.release(ticket, &[local_id]);
        let fields = descriptor.fields();

        let applied = if state.arena.contains(&descriptor.id) {
            // A refresh already delivered the created item.
            if state.arena.contains(&local_id) {
                state.arena.remove_subtree(&local_id).map(|_| ())
            } else {
                Ok(())
            }
        } else if state.arena.contains(&local_id) {
            match state.arena.rename_id(&local_id, descriptor.id) {
                Ok(()) => {
                    state.expansion.rename(&local_id, descriptor.id);
                    state.arena.update_fields(&descriptor.id, fields).map(|_| ())
                }
                Err(e) => Err(e),
            }
        } else {
            // The placeholder was dropped by a refresh or by the removal of
            // an ancestor.
            match &descriptor.parent_id {
                Some(parent) if state.arena.contains(parent) => state
                    .arena
                    .insert_child(parent, descriptor.id, fields)
                    .map(|_| ()),
                Some(parent) => Err(DomainError::NotFound(*parent)),
                None => state.arena.insert_root(descriptor.id, fields).map(|_| ()),
            }
        };

        if let Err(e) = applied {
            warn!("created item {} not applied locally: {}", descriptor.id, e);
            state.touch(&[local_id, descriptor.id]);
        }
    }

    // ------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------

    /// Delete an item together with all of its descendants.
    ///
    /// Returns the number of removed items.
    #[instrument(level = "debug", skip(self))]
    pub async fn delete_with_descendants(&self, id: &ItemId) -> ApplicationResult<usize> {
        let (remote, detached, expanded, ticket) = {
            let mut state = self.state.write().await;
            state.arena.index_of(id)?;
            let remote = persisted(id)?;
            let detached = state.arena.remove_subtree(id)?;
            let expanded: Vec<ItemId> = detached
                .item
                .ids()
                .into_iter()
                .filter(|item| state.expansion.collapse(item))
                .collect();
            let ticket = state.touch(&detached.item.ids());
            (remote, detached, expanded, ticket)
        };
        let removed = detached.item_count();
        self.notify();
        debug!("delete: optimistic removal of {} items", removed);

        match self.adapter.delete_subtree(remote).await {
            Ok(()) => {
                let reappeared = {
                    let mut state = self.state.write().await;
                    state.release(ticket, &detached.item.ids());
                    // A refresh during the call may have brought it back.
                    state.arena.contains(id) && state.arena.remove_subtree(id).is_ok()
                };
                if reappeared {
                    self.notify();
                }
                self.refresh_after_commit().await;
                Ok(removed)
            }
            Err(source) => {
                warn!("delete of {} failed: {}", id, source);
                let undone = self.restore(detached, expanded, ticket).await;
                let rolled_back = self.settle(undone).await;
                Err(sync_failed(format!("delete item {}", id), source, rolled_back))
            }
        }
    }

    async fn restore(
        &self,
        detached: DetachedSubtree,
        expanded: Vec<ItemId>,
        ticket: OpTicket,
    ) -> bool {
        let id = detached.item.id;
        let ids = detached.item.ids();
        let mut state = self.state.write().await;
        if !state.is_current(ticket, &ids) {
            debug!("restore of {} is stale", id);
            return false;
        }
        state.release(ticket, &ids);
        match state.arena.restore_subtree(detached) {
            Ok(_) => {
                for item in expanded {
                    state.expansion.expand(item);
                }
                true
            }
            Err(e) => {
                warn!("cannot restore {}: {}", id, e);
                false
            }
        }
    }

    // ------------------------------------------------------------
    // Update
    // ------------------------------------------------------------

    /// Replace the attributes of an item and attach it to `parent`
    /// (None makes it a root).
    ///
    /// Moving an item under itself or one of its descendants fails with
    /// CycleRejected before anything changes. Keeping the current parent
    /// keeps the position.
    #[instrument(level = "debug", skip(self, fields))]
    pub async fn update(
        &self,
        id: &ItemId,
        fields: ItemFields,
        parent: Option<ItemId>,
    ) -> ApplicationResult<ItemDescriptor> {
        let fields = fields.validated()?;

        let (remote, parent_remote, previous, ticket) = {
            let mut state = self.state.write().await;
            state.arena.index_of(id)?;
            let remote = persisted(id)?;
            let parent_remote = match &parent {
                Some(p) => {
                    state.arena.index_of(p)?;
                    Some(persisted(p)?)
                }
                None => None,
            };
            let location = state.arena.location(id)?;
            state.arena.reparent(id, parent.as_ref())?;
            let previous_fields = state.arena.update_fields(id, fields.clone())?;
            let ticket = state.touch(&[*id]);
            (remote, parent_remote, (location, previous_fields), ticket)
        };
        self.notify();

        let result = self
            .adapter
            .update_item(remote, &fields, parent_remote)
            .await
            .and_then(accept);

        match result {
            Ok(descriptor) => {
                {
                    let mut state = self.state.write().await;
                    if state.is_current(ticket, &[*id]) {
                        if let Err(e) = state.arena.update_fields(id, descriptor.fields()) {
                            warn!("updated item {} not applied locally: {}", id, e);
                        }
                        state.release(ticket, &[*id]);
                    } else if !state.arena.contains(id) {
                        // Removed locally while the update was in flight; a
                        // pending rollback of that removal must not bring
                        // back the old state.
                        state.touch(&[*id]);
                    }
                }
                self.notify();
                self.refresh_after_commit().await;
                Ok(descriptor)
            }
            Err(source) => {
                warn!("update of {} failed: {}", id, source);
                let ((old_parent, position), old_fields) = previous;
                let undone = {
                    let mut state = self.state.write().await;
                    let undone = state.is_current(ticket, &[*id])
                        && state.arena.move_to(id, old_parent.as_ref(), position).is_ok()
                        && state.arena.update_fields(id, old_fields).is_ok();
                    state.release(ticket, &[*id]);
                    undone
                };
                let rolled_back = self.settle(undone).await;
                Err(sync_failed(format!("update item {}", id), source, rolled_back))
            }
        }
    }

    /// Notify about a local rollback, or fall back to a re-fetch.
    /// Returns whether the local tree no longer reflects the failed change.
    async fn settle(&self, undone: bool) -> bool {
        if undone {
            self.notify();
            return true;
        }
        if !self.settings.sync.refetch_on_rollback_failure {
            warn!("rollback not possible, local tree may diverge");
            return false;
        }
        match self.refresh().await {
            Ok(_) => true,
            Err(e) => {
                warn!("re-fetch after failed rollback failed: {}", e);
                false
            }
        }
    }

    async fn refresh_after_commit(&self) {
        if !self.settings.sync.refresh_after_commit {
            return;
        }
        if let Err(e) = self.refresh().await {
            warn!("refresh after commit failed: {}", e);
        }
    }

    // ------------------------------------------------------------
    // Expansion
    // ------------------------------------------------------------

    /// Flip the expansion of an item, returning the new state.
    pub async fn toggle(&self, id: &ItemId) -> ApplicationResult<bool> {
        self.with_expansion(id, |expansion, _| Ok(expansion.toggle(*id)))
            .await
    }

    pub async fn expand(&self, id: &ItemId) -> ApplicationResult<()> {
        self.with_expansion(id, |expansion, _| {
            expansion.expand(*id);
            Ok(())
        })
        .await
    }

    pub async fn collapse(&self, id: &ItemId) -> ApplicationResult<()> {
        self.with_expansion(id, |expansion, _| {
            expansion.collapse(id);
            Ok(())
        })
        .await
    }

    /// Expand an item and every item below it.
    pub async fn expand_descendants(&self, id: &ItemId) -> ApplicationResult<()> {
        self.with_expansion(id, |expansion, arena| {
            expansion.expand_descendants(arena, id)?;
            Ok(())
        })
        .await
    }

    pub async fn collapse_all(&self) {
        self.state.write().await.expansion.collapse_all();
        self.notify();
    }

    async fn with_expansion<R>(
        &self,
        id: &ItemId,
        f: impl FnOnce(&mut ExpansionState, &ItemArena) -> ApplicationResult<R>,
    ) -> ApplicationResult<R> {
        let result = {
            let mut state = self.state.write().await;
            state.arena.index_of(id)?;
            let TreeState {
                arena, expansion, ..
            } = &mut *state;
            f(expansion, arena)?
        };
        self.notify();
        Ok(result)
    }

    // ------------------------------------------------------------
    // Views
    // ------------------------------------------------------------

    /// Visible rows of the tree in display order.
    pub async fn current_flat_view(&self) -> Vec<FlatNode> {
        let state = self.state.read().await;
        flatten(&state.arena, &state.expansion)
    }

    /// Items that `id` may be moved under, in display order.
    pub async fn eligible_targets(&self, id: &ItemId) -> ApplicationResult<Vec<ItemDescriptor>> {
        let state = self.state.read().await;
        let targets = filter::eligible_targets(&state.arena, id)?;
        Ok(targets
            .into_iter()
            .filter_map(|idx| state.arena.descriptor(idx))
            .collect())
    }

    /// Nested copy of the current forest.
    pub async fn snapshot(&self) -> Vec<NestedItem> {
        self.state.read().await.arena.to_nested()
    }

    pub async fn is_expanded(&self, id: &ItemId) -> bool {
        self.state.read().await.expansion.is_expanded(id)
    }

    /// Run a read-only closure against the forest.
    pub async fn inspect<R>(&self, f: impl FnOnce(&ItemArena) -> R) -> R {
        let state = self.state.read().await;
        f(&state.arena)
    }
}

/// Remote id of an item; items still waiting for their server id cannot be
/// referenced remotely.
fn persisted(id: &ItemId) -> ApplicationResult<u64> {
    id.remote().ok_or_else(|| {
        DomainError::InvalidInput(format!("item {} not yet persisted", id)).into()
    })
}

/// Reject descriptors the local tree cannot hold.
fn accept(descriptor: ItemDescriptor) -> SyncResult<ItemDescriptor> {
    if descriptor.id.is_local() {
        return Err(SyncError::Malformed(format!(
            "descriptor carries local id {}",
            descriptor.id
        )));
    }
    if matches!(descriptor.parent_id, Some(p) if p.is_local()) {
        return Err(SyncError::Malformed(format!(
            "descriptor of {} names a local parent",
            descriptor.id
        )));
    }
    descriptor
        .fields()
        .validated()
        .map_err(|e| SyncError::Malformed(format!("descriptor of {}: {}", descriptor.id, e)))?;
    Ok(descriptor)
}

fn sync_failed(context: impl Into<String>, source: SyncError, rolled_back: bool) -> ApplicationError {
    ApplicationError::SyncFailed {
        context: context.into(),
        source,
        rolled_back,
    }
}
