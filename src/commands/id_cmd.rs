//! Commands for Id Allocation + Migration

use serde::{Deserialize, Serialize};

use crate::domain::{IdKind, WorkItem};
use crate::services::{IdScope, IdValidationReport, MigrationOptions, MigrationReport};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateRequest {
    pub scope: IdScope,
    pub kind: IdKind,
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

pub async fn allocate_id(state: &AppState, scope: IdScope, kind: IdKind) -> Result<String, String> {
    state
        .orchestrator
        .allocate_id(&scope, kind)
        .await
        .map_err(|e| e.to_string())
}

pub async fn allocate_ids(state: &AppState, request: AllocateRequest) -> Result<Vec<String>, String> {
    state
        .orchestrator
        .allocate_ids(&request.scope, request.kind, request.count)
        .await
        .map_err(|e| e.to_string())
}

/// Hand back ids that will not be used
pub async fn release_ids(state: &AppState, ids: Vec<String>) -> Result<(), String> {
    state.orchestrator.release_ids(&ids).await;
    Ok(())
}

pub async fn migrate(state: &AppState, options: MigrationOptions) -> Result<MigrationReport, String> {
    state
        .orchestrator
        .migrate(&options)
        .await
        .map_err(|e| e.to_string())
}

pub async fn validate_ids(state: &AppState) -> Result<IdValidationReport, String> {
    state
        .orchestrator
        .validate_ids()
        .await
        .map_err(|e| e.to_string())
}

/// Write a migration snapshot back over the store
pub async fn restore_snapshot(state: &AppState, snapshot: Vec<WorkItem>) -> Result<(), String> {
    state
        .orchestrator
        .restore_snapshot(&snapshot)
        .await
        .map_err(|e| e.to_string())
}
