//! Identifier issuing: sequencing, project codes and the allocator

mod allocator;
mod project_code;
mod sequence;

pub use allocator::{IdAllocator, IdScope};
pub use project_code::ProjectCodeDeriver;
pub use sequence::{fill_sequences, next_sequence};
