//! Commands Layer
//!
//! Async handlers over `AppState`. Every request and response is JSON
//! friendly; errors come back as display strings.

mod id_cmd;
mod item_cmd;

pub use id_cmd::*;
pub use item_cmd::*;
