// Utility functions: id generation, JSON merge patch, timeouts.

pub mod id;
pub mod json;
pub mod timeout;

pub use id::{generate_id, generate_id_with_length};
pub use json::apply_merge_patch;
pub use timeout::with_timeout;
