//! Work Item Repository Implementation
//!
//! SQLite-backed implementation of the work item store.

use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};

use super::db::SharedConnection;
use super::traits::{HierarchyRepository, Replacement, Repository, WorkItemStore};
use crate::domain::{
    DateNormalizer, DomainError, DomainResult, ParentFilter, WorkItem, WorkItemFilter,
    WorkItemPatch,
};

const SELECT_COLUMNS: &str = "SELECT id, title, completion, parent_id, start_date, finish_date, duration_days, project_id, created_at, updated_at, is_milestone, package, category FROM work_items";

const DESCENDANT_IDS: &str = "WITH RECURSIVE descendants(id) AS (
        SELECT id FROM work_items WHERE parent_id = ?1
        UNION
        SELECT w.id FROM work_items w JOIN descendants d ON w.parent_id = d.id
    )
    SELECT id FROM descendants";

/// SQLite implementation of the work item store
pub struct SqliteWorkItemRepository {
    conn: SharedConnection,
    dates: DateNormalizer,
}

impl SqliteWorkItemRepository {
    pub fn new(conn: SharedConnection) -> Self {
        Self {
            conn,
            dates: DateNormalizer::default(),
        }
    }

    /// Read stored date text with these placeholder rules
    pub fn with_date_normalizer(mut self, dates: DateNormalizer) -> Self {
        self.dates = dates;
        self
    }
}

fn internal(e: rusqlite::Error) -> DomainError {
    DomainError::Internal(e.to_string())
}

fn not_initialized() -> DomainError {
    DomainError::Internal("Database not initialized".to_string())
}

fn is_constraint(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation)
}

fn format_date(date: Option<NaiveDate>) -> Option<String> {
    date.map(|d| d.format("%Y-%m-%d").to_string())
}

fn parse_date_column(
    row: &Row<'_>,
    idx: usize,
    dates: &DateNormalizer,
) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(idx)?;
    let Some(raw) = raw else {
        return Ok(None);
    };
    dates
        .parse(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

/// Convert a database row to WorkItem
fn row_to_item(row: &Row<'_>, dates: &DateNormalizer) -> rusqlite::Result<WorkItem> {
    Ok(WorkItem {
        id: row.get(0)?,
        title: row.get(1)?,
        completion: row.get::<_, i64>(2)?.clamp(0, 100) as u8,
        parent_id: row.get(3)?,
        start_date: parse_date_column(row, 4, dates)?,
        finish_date: parse_date_column(row, 5, dates)?,
        duration_days: row
            .get::<_, Option<i64>>(6)?
            .filter(|d| *d > 0)
            .map(|d| d as u32),
        project_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        is_milestone: row.get::<_, i64>(10)? != 0,
        package: row.get(11)?,
        category: row.get(12)?,
    })
}

fn query_items<P: rusqlite::Params>(
    conn: &Connection,
    dates: &DateNormalizer,
    sql: &str,
    params: P,
) -> DomainResult<Vec<WorkItem>> {
    let mut stmt = conn.prepare(sql).map_err(internal)?;
    let rows = stmt
        .query_map(params, |row| row_to_item(row, dates))
        .map_err(internal)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(internal)
}

fn find_item(conn: &Connection, dates: &DateNormalizer, id: &str) -> DomainResult<Option<WorkItem>> {
    conn.query_row(
        &format!("{} WHERE id = ?1", SELECT_COLUMNS),
        params![id],
        |row| row_to_item(row, dates),
    )
    .optional()
    .map_err(internal)
}

fn insert_item(conn: &Connection, item: &WorkItem) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO work_items (id, title, completion, parent_id, start_date, finish_date, duration_days, project_id, created_at, updated_at, is_milestone, package, category) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            item.id,
            item.title,
            item.completion,
            item.parent_id,
            format_date(item.start_date),
            format_date(item.finish_date),
            item.duration_days,
            item.project_id,
            item.created_at,
            item.updated_at,
            item.is_milestone,
            item.package,
            item.category,
        ],
    )
}

fn update_item(conn: &Connection, item: &WorkItem) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE work_items SET title = ?1, completion = ?2, parent_id = ?3, start_date = ?4, finish_date = ?5, duration_days = ?6, project_id = ?7, updated_at = ?8, is_milestone = ?9, package = ?10, category = ?11 WHERE id = ?12",
        params![
            item.title,
            item.completion,
            item.parent_id,
            format_date(item.start_date),
            format_date(item.finish_date),
            item.duration_days,
            item.project_id,
            item.updated_at,
            item.is_milestone,
            item.package,
            item.category,
            item.id,
        ],
    )
}

#[async_trait]
impl Repository<WorkItem> for SqliteWorkItemRepository {
    async fn create(&self, entity: &WorkItem) -> DomainResult<WorkItem> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(not_initialized)?;

        let now = chrono::Utc::now().timestamp_millis();
        let mut item = entity.clone();
        item.created_at = item.created_at.or(Some(now));
        item.updated_at = Some(now);

        insert_item(conn, &item).map_err(|e| {
            if is_constraint(&e) {
                DomainError::ConcurrencyConflict(format!("Work item {} already exists", item.id))
            } else {
                internal(e)
            }
        })?;
        Ok(item)
    }

    async fn find_by_id(&self, id: &String) -> DomainResult<Option<WorkItem>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(not_initialized)?;
        find_item(conn, &self.dates, id)
    }

    async fn list(&self) -> DomainResult<Vec<WorkItem>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(not_initialized)?;
        query_items(conn, &self.dates, &format!("{} ORDER BY id", SELECT_COLUMNS), [])
    }

    async fn update(&self, entity: &WorkItem) -> DomainResult<WorkItem> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(not_initialized)?;

        let mut item = entity.clone();
        item.updated_at = Some(chrono::Utc::now().timestamp_millis());
        let changed = update_item(conn, &item).map_err(internal)?;
        if changed == 0 {
            return Err(DomainError::NotFound(format!("Work item {} not found", item.id)));
        }
        Ok(item)
    }

    async fn delete(&self, id: &String) -> DomainResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(not_initialized)?;

        if find_item(conn, &self.dates, id)?.is_none() {
            return Err(DomainError::NotFound(format!("Work item {} not found", id)));
        }

        let tx = conn.transaction().map_err(internal)?;
        // Manual cascade over the whole subtree
        tx.execute(
            &format!("DELETE FROM work_items WHERE id IN ({})", DESCENDANT_IDS),
            params![id],
        )
        .map_err(internal)?;
        tx.execute("DELETE FROM work_items WHERE id = ?1", params![id])
            .map_err(internal)?;
        tx.commit().map_err(internal)
    }
}

#[async_trait]
impl HierarchyRepository<WorkItem> for SqliteWorkItemRepository {
    async fn get_children(&self, parent_id: &String) -> DomainResult<Vec<WorkItem>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(not_initialized)?;
        query_items(
            conn,
            &self.dates,
            &format!("{} WHERE parent_id = ?1 ORDER BY id", SELECT_COLUMNS),
            params![parent_id],
        )
    }

    async fn get_descendants(&self, id: &String) -> DomainResult<Vec<WorkItem>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(not_initialized)?;
        query_items(
            conn,
            &self.dates,
            &format!("{} WHERE id IN ({}) AND id != ?1 ORDER BY id", SELECT_COLUMNS, DESCENDANT_IDS),
            params![id],
        )
    }
}

#[async_trait]
impl WorkItemStore for SqliteWorkItemRepository {
    async fn list_by(&self, filter: &WorkItemFilter) -> DomainResult<Vec<WorkItem>> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(not_initialized)?;

        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();
        if let Some(project_id) = &filter.project_id {
            clauses.push("project_id = ?");
            args.push(project_id.clone());
        }
        if let Some(package) = &filter.package {
            clauses.push("package = ?");
            args.push(package.clone());
        }
        match &filter.parent {
            ParentFilter::Any => {}
            ParentFilter::Root => clauses.push("parent_id IS NULL"),
            ParentFilter::Of(pid) => {
                clauses.push("parent_id = ?");
                args.push(pid.clone());
            }
        }
        if let Some(prefix) = &filter.id_prefix {
            // instr() keeps '_' and '%' in ids literal, unlike LIKE
            clauses.push("instr(id, ?) = 1");
            args.push(prefix.clone());
        }

        let mut sql = SELECT_COLUMNS.to_string();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY id");

        query_items(conn, &self.dates, &sql, params_from_iter(args.iter()))
    }

    async fn patch(&self, id: &str, patch: &WorkItemPatch) -> DomainResult<WorkItem> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or_else(not_initialized)?;

        let mut item = find_item(conn, &self.dates, id)?
            .ok_or_else(|| DomainError::NotFound(format!("Work item {} not found", id)))?;
        patch.apply(&mut item);
        item.updated_at = Some(chrono::Utc::now().timestamp_millis());
        update_item(conn, &item).map_err(internal)?;
        Ok(item)
    }

    async fn replace_batch(&self, replacements: &[Replacement]) -> DomainResult<usize> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(not_initialized)?;

        let tx = conn.transaction().map_err(internal)?;
        for r in replacements {
            let deleted = tx
                .execute("DELETE FROM work_items WHERE id = ?1", params![r.old_id])
                .map_err(internal)?;
            if deleted == 0 {
                // Dropping the transaction rolls back
                return Err(DomainError::NotFound(format!("Work item {} not found", r.old_id)));
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        for r in replacements {
            let mut record = r.record.clone();
            record.updated_at = Some(now);
            insert_item(&tx, &record).map_err(|e| {
                if is_constraint(&e) {
                    DomainError::ConstraintViolation(format!("Id {} is already taken", record.id))
                } else {
                    internal(e)
                }
            })?;
        }

        tx.commit().map_err(internal)?;
        Ok(replacements.len())
    }

    async fn restore(&self, snapshot: &[WorkItem]) -> DomainResult<()> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or_else(not_initialized)?;

        let tx = conn.transaction().map_err(internal)?;
        tx.execute("DELETE FROM work_items", []).map_err(internal)?;
        for item in snapshot {
            insert_item(&tx, item).map_err(|e| {
                if is_constraint(&e) {
                    DomainError::ConstraintViolation(format!("Snapshot repeats id {}", item.id))
                } else {
                    internal(e)
                }
            })?;
        }
        tx.commit().map_err(internal)
    }
}
