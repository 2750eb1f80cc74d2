pub mod executor;
pub mod stream;

// Re-export commonly used types
pub use executor::{CommandExecutor, CommandOutput};
pub use stream::{OutputEvent, OutputStream};
