//! Commands for Work Item CRUD + Hierarchy

use serde::{Deserialize, Serialize};

use crate::domain::{ParentFilter, WorkItem, WorkItemFilter};
use crate::services::{
    DeleteOutcome, FieldChangeOutcome, FieldChanges, NewWorkItem, RecalculationSummary,
};
use crate::AppState;

/// Query for `list_items`. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemsRequest {
    pub project_id: Option<String>,
    pub package: Option<String>,
    pub parent_id: Option<String>,
    /// Only items without a parent; ignored when `parent_id` is set
    #[serde(default)]
    pub roots_only: bool,
    pub id_prefix: Option<String>,
}

impl From<ListItemsRequest> for WorkItemFilter {
    fn from(request: ListItemsRequest) -> Self {
        let parent = match (request.parent_id, request.roots_only) {
            (Some(pid), _) => ParentFilter::Of(pid),
            (None, true) => ParentFilter::Root,
            (None, false) => ParentFilter::Any,
        };
        WorkItemFilter {
            project_id: request.project_id,
            package: request.package,
            parent,
            id_prefix: request.id_prefix,
        }
    }
}

/// One row of a rendered tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeRow {
    pub depth: usize,
    pub item: WorkItem,
}

/// Create an item or a child
pub async fn create_item(state: &AppState, request: NewWorkItem) -> Result<WorkItem, String> {
    state
        .orchestrator
        .create_item(&request)
        .await
        .map_err(|e| e.to_string())
}

/// Get item by ID
pub async fn get_item(state: &AppState, id: String) -> Result<WorkItem, String> {
    state.orchestrator.get_item(&id).await.map_err(|e| e.to_string())
}

pub async fn list_items(
    state: &AppState,
    request: ListItemsRequest,
) -> Result<Vec<WorkItem>, String> {
    state
        .orchestrator
        .list_items(&request.into())
        .await
        .map_err(|e| e.to_string())
}

/// Apply field edits; validation problems are reported in the outcome
pub async fn on_field_changed(
    state: &AppState,
    id: String,
    changes: FieldChanges,
) -> Result<FieldChangeOutcome, String> {
    state
        .orchestrator
        .on_field_changed(&id, &changes)
        .await
        .map_err(|e| e.to_string())
}

/// Delete item and its subtree
pub async fn delete_item(state: &AppState, id: String) -> Result<DeleteOutcome, String> {
    state
        .orchestrator
        .delete_item(&id)
        .await
        .map_err(|e| e.to_string())
}

/// Move item to a new parent (None = top level)
pub async fn move_item(
    state: &AppState,
    id: String,
    new_parent_id: Option<String>,
) -> Result<WorkItem, String> {
    state
        .orchestrator
        .move_item(&id, new_parent_id.as_deref())
        .await
        .map_err(|e| e.to_string())
}

pub async fn recalculate_ancestors(state: &AppState, id: String) -> Result<(), String> {
    state
        .orchestrator
        .recalculate_ancestors(&id)
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}

pub async fn recalculate_subtree(
    state: &AppState,
    root_id: String,
) -> Result<RecalculationSummary, String> {
    state
        .orchestrator
        .recalculate_subtree(&root_id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_tree(state: &AppState, root_id: Option<String>) -> Result<Vec<TreeRow>, String> {
    let rows = state
        .orchestrator
        .tree(root_id.as_deref())
        .await
        .map_err(|e| e.to_string())?;
    Ok(rows
        .into_iter()
        .map(|(item, depth)| TreeRow { depth, item })
        .collect())
}

/// Store records exactly as given
pub async fn import_items(state: &AppState, items: Vec<WorkItem>) -> Result<usize, String> {
    state
        .orchestrator
        .import_items(&items)
        .await
        .map_err(|e| e.to_string())
}

/// Import a JSON array of records, dates read with the configured rules
pub async fn import_json(state: &AppState, raw: String) -> Result<usize, String> {
    state
        .orchestrator
        .import_json(&raw)
        .await
        .map_err(|e| e.to_string())
}
