//! Domain Layer
//!
//! Contains all domain entities and core abstractions.
//! This layer has NO I/O (serde, chrono and regex only).

mod entity;
mod tree;
mod work_item;
mod work_item_id;

pub use entity::{DomainError, DomainResult, Entity, FieldError};
pub use tree::{mean_rounded, WorkTree};
pub use work_item::{
    DateField, DateNormalizer, ParentFilter, WorkItem, WorkItemFilter, WorkItemPatch,
    ACCEPTED_DATE_FORMATS, DEFAULT_UNSET_SENTINELS, MAX_COMPLETION,
};
pub use work_item_id::{IdKind, ParsedId, SequenceSpec, MAX_LEGACY_ID_LEN};
