//! Shared application state wired once at startup and handed to every tool
//! and HTTP handler.

use std::path::PathBuf;
use std::sync::Arc;

use memoria_core::{IdentityChangeStore, MemoryKernel};
use tokio::sync::Mutex;

use crate::tools::checklist::ChecklistStore;

pub struct AppState {
    pub kernel: Arc<MemoryKernel>,
    pub identity_store: Arc<IdentityChangeStore>,
    pub checklist: Arc<Mutex<ChecklistStore>>,
    /// Optional bearer/API-key required on mutating HTTP endpoints.
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(
        kernel: Arc<MemoryKernel>,
        identity_store: Arc<IdentityChangeStore>,
        checklist_path: PathBuf,
        api_key: Option<String>,
    ) -> std::io::Result<Self> {
        let checklist = ChecklistStore::load(checklist_path)?;
        Ok(Self { kernel, identity_store, checklist: Arc::new(Mutex::new(checklist)), api_key })
    }
}
