pub mod audit;
pub mod config;
pub mod error;
pub mod exec;
pub mod ops;
pub mod repo;
pub mod security;
pub mod transport;

// Re-export commonly used types for convenience
pub use error::{AppError, AppResult, OperationError, OperationResult};
pub use ops::{Dispatcher, OperationRequest};
pub use repo::{RepoCatalog, Repository};
