//! Repository Layer
//!
//! Data access abstractions and implementations.

mod traits;
pub mod db;
mod memory_repo;
mod work_item_repo;


pub use traits::{HierarchyRepository, Replacement, Repository, WorkItemStore};
pub use db::{init_db, DbState};
pub use memory_repo::InMemoryWorkItemRepository;
pub use work_item_repo::SqliteWorkItemRepository;
