//! Service Layer
//!
//! The engine proper. Everything here talks to storage only through
//! `WorkItemStore`.

mod completion;
mod dates;
pub mod ids;
mod migration;
mod orchestrator;

pub use completion::{CompletionAggregator, RecalculationSummary};
pub use dates::{DateCalculation, DateEditRequest, DateInferenceEngine, DateTriple};
pub use ids::{IdAllocator, IdScope, ProjectCodeDeriver};
pub use migration::{
    IdMapping, IdMigrator, IdValidationReport, MigrationError, MigrationOptions, MigrationReport,
};
pub use orchestrator::{
    DeleteOutcome, FieldChangeOutcome, FieldChanges, NewWorkItem, UpdateOrchestrator,
};
