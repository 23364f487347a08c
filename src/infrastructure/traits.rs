//! Remote boundary trait for testability
//!
//! The tree service talks to the remote item API only through `SyncAdapter`,
//! so it can be driven by the in-memory implementation below in tests or by
//! any transport a host application provides.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{DomainError, ItemArena, ItemDescriptor, ItemFields, ItemId, NestedItem};
use crate::infrastructure::error::{SyncError, SyncResult};

/// Remote CRUD operations on the item tree.
#[async_trait]
pub trait SyncAdapter: Send + Sync {
    /// Fetch the complete nested forest.
    async fn fetch_tree(&self) -> SyncResult<Vec<NestedItem>>;

    /// Create an item as the last child of `parent_id`, or as a root.
    async fn create_item(
        &self,
        fields: &ItemFields,
        parent_id: Option<u64>,
    ) -> SyncResult<ItemDescriptor>;

    /// Replace the attributes of an item and attach it to `parent_id`
    /// (None makes it a root).
    async fn update_item(
        &self,
        id: u64,
        fields: &ItemFields,
        parent_id: Option<u64>,
    ) -> SyncResult<ItemDescriptor>;

    /// Delete an item together with all of its descendants.
    async fn delete_subtree(&self, id: u64) -> SyncResult<()>;
}

/// Adapter operation, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncOp {
    Fetch,
    Create,
    Update,
    Delete,
}

// ============================================================
// IN-MEMORY IMPLEMENTATION
// ============================================================

/// In-memory stand-in for the remote item API.
///
/// Keeps its own forest, assigns increasing ids, cascades deletes, and
/// rejects moves that would create a cycle. Failures can be queued per
/// operation with `fail_next`.
#[derive(Debug)]
pub struct MemorySyncAdapter {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: ItemArena,
    next_id: u64,
    failures: Vec<(SyncOp, SyncError)>,
    calls: Vec<SyncOp>,
}

impl MemoryState {
    /// Record the call and pop a queued failure for it, if any.
    fn begin(&mut self, op: SyncOp) -> SyncResult<()> {
        self.calls.push(op);
        match self.failures.iter().position(|(o, _)| *o == op) {
            Some(pos) => Err(self.failures.remove(pos).1),
            None => Ok(()),
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn describe(&self, id: u64) -> SyncResult<ItemDescriptor> {
        self.items
            .find_by_id(&ItemId::Remote(id))
            .and_then(|idx| self.items.descriptor(idx))
            .ok_or(SyncError::NotFound(id))
    }
}

impl Default for MemorySyncAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySyncAdapter {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Start with an existing forest. New ids continue after the highest one.
    pub fn with_items(items: Vec<NestedItem>) -> SyncResult<Self> {
        let items = ItemArena::from_nested(items).map_err(|e| SyncError::Malformed(e.to_string()))?;
        if items.iter().any(|(_, node)| node.id.is_local()) {
            return Err(SyncError::Malformed("remote items must have remote ids".into()));
        }
        let next_id = items
            .iter()
            .filter_map(|(_, node)| node.id.remote())
            .max()
            .unwrap_or(0)
            + 1;
        Ok(Self {
            state: Mutex::new(MemoryState {
                items,
                next_id,
                ..Default::default()
            }),
        })
    }

    /// Make the next call of `op` fail as unavailable.
    pub async fn fail_next(&self, op: SyncOp) {
        self.fail_next_with(op, SyncError::Unavailable("injected failure".into()))
            .await;
    }

    pub async fn fail_next_with(&self, op: SyncOp, error: SyncError) {
        self.state.lock().await.failures.push((op, error));
    }

    /// The forest as the remote side currently holds it.
    pub async fn snapshot(&self) -> Vec<NestedItem> {
        self.state.lock().await.items.to_nested()
    }

    /// How often `op` has been called, failed calls included.
    pub async fn call_count(&self, op: SyncOp) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|&&c| c == op)
            .count()
    }
}

fn rejected(err: DomainError) -> SyncError {
    match err {
        DomainError::NotFound(ItemId::Remote(id)) => SyncError::NotFound(id),
        DomainError::CycleRejected { .. } => SyncError::Rejected {
            status: 409,
            message: err.to_string(),
        },
        other => SyncError::Rejected {
            status: 400,
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl SyncAdapter for MemorySyncAdapter {
    async fn fetch_tree(&self) -> SyncResult<Vec<NestedItem>> {
        let mut state = self.state.lock().await;
        state.begin(SyncOp::Fetch)?;
        Ok(state.items.to_nested())
    }

    async fn create_item(
        &self,
        fields: &ItemFields,
        parent_id: Option<u64>,
    ) -> SyncResult<ItemDescriptor> {
        let mut state = self.state.lock().await;
        state.begin(SyncOp::Create)?;
        let fields = fields.clone().validated().map_err(rejected)?;
        if let Some(parent) = parent_id {
            state.items.index_of(&ItemId::Remote(parent)).map_err(rejected)?;
        }

        let id = state.allocate_id();
        let inserted = match parent_id {
            Some(parent) => state
                .items
                .insert_child(&ItemId::Remote(parent), ItemId::Remote(id), fields),
            None => state.items.insert_root(ItemId::Remote(id), fields),
        };
        inserted.map_err(rejected)?;
        debug!("memory create: {} under {:?}", id, parent_id);
        state.describe(id)
    }

    async fn update_item(
        &self,
        id: u64,
        fields: &ItemFields,
        parent_id: Option<u64>,
    ) -> SyncResult<ItemDescriptor> {
        let mut state = self.state.lock().await;
        state.begin(SyncOp::Update)?;
        let fields = fields.clone().validated().map_err(rejected)?;
        let item = ItemId::Remote(id);
        let parent = parent_id.map(ItemId::Remote);

        state.items.reparent(&item, parent.as_ref()).map_err(rejected)?;
        state.items.update_fields(&item, fields).map_err(rejected)?;
        debug!("memory update: {} under {:?}", id, parent_id);
        state.describe(id)
    }

    async fn delete_subtree(&self, id: u64) -> SyncResult<()> {
        let mut state = self.state.lock().await;
        state.begin(SyncOp::Delete)?;
        let removed = state
            .items
            .remove_subtree(&ItemId::Remote(id))
            .map_err(rejected)?;
        debug!("memory delete: {} ({} items)", id, removed.item_count());
        Ok(())
    }
}
