// Core modules
pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod models;
pub mod notify;
pub mod registry;
pub mod signal;

// Re-export commonly used types
pub use error::EngineError;
pub use models::*;

// Error handling for the top-level loops; engine components use the
// typed EngineError taxonomy directly.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
