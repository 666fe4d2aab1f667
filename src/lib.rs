//! WBS Tracker Engine
//!
//! Layered architecture:
//! - domain: Core entities, id formats and the work tree arena
//! - repository: Data access abstractions and implementations
//! - services: Completion roll-up, date inference, id allocation, migration
//! - commands: Request handlers over `AppState`

use std::sync::Arc;

pub mod commands;
pub mod config;
pub mod domain;
pub mod repository;
pub mod services;

use config::EngineConfig;
use domain::DateNormalizer;
use repository::{init_db, DbState, InMemoryWorkItemRepository, SqliteWorkItemRepository, WorkItemStore};
use services::UpdateOrchestrator;

/// Application state shared across commands
pub struct AppState {
    pub orchestrator: Arc<UpdateOrchestrator>,
    /// Present when backed by SQLite
    pub db_state: Option<DbState>,
}

impl AppState {
    /// Open the store named by `config.database_path`, in memory when unset
    pub async fn open(config: EngineConfig) -> Result<Self, String> {
        match &config.database_path {
            Some(path) => {
                let db_state = init_db(path).await?;
                let store = Arc::new(
                    SqliteWorkItemRepository::new(db_state.connection())
                        .with_date_normalizer(DateNormalizer::new(config.unset_date_sentinels.clone())),
                );
                let mut state = Self::with_store(store, config)?;
                state.db_state = Some(db_state);
                Ok(state)
            }
            None => {
                log::info!("No database configured, keeping work items in memory");
                Self::with_store(Arc::new(InMemoryWorkItemRepository::new()), config)
            }
        }
    }

    pub fn with_store(store: Arc<dyn WorkItemStore>, config: EngineConfig) -> Result<Self, String> {
        Ok(Self {
            orchestrator: Arc::new(UpdateOrchestrator::new(store, config)?),
            db_state: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        self.orchestrator.config()
    }
}
