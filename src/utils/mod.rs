// Common utilities for Dockge
pub mod constants;
pub mod crypto;
pub mod docker;
pub mod limit_queue;
pub mod scrollback;
pub mod terminal;
pub mod types;

// Re-export commonly used items
pub use constants::*;
