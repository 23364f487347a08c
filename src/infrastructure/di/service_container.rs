//! Service container for dependency injection
//!
//! Wires settings, the sync adapter and the tree service together.

use std::sync::Arc;

use crate::application::services::TreeService;
use crate::config::Settings;
use crate::infrastructure::traits::{MemorySyncAdapter, SyncAdapter};

/// Container holding all application services.
pub struct ServiceContainer {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Remote boundary
    pub adapter: Arc<dyn SyncAdapter>,

    pub tree_service: Arc<TreeService>,
}

impl ServiceContainer {
    /// Create a container backed by the in-memory adapter.
    pub fn new(settings: Settings) -> Self {
        Self::with_deps(settings, Arc::new(MemorySyncAdapter::new()))
    }

    /// Create a container with a custom adapter (real transport or test double).
    pub fn with_deps(settings: Settings, adapter: Arc<dyn SyncAdapter>) -> Self {
        let settings = Arc::new(settings);
        let tree_service = Arc::new(TreeService::new(adapter.clone(), settings.clone()));

        Self {
            settings,
            adapter,
            tree_service,
        }
    }
}
