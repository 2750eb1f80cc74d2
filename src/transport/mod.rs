pub mod http;
pub mod mcp;
pub mod stdio;

pub use http::{AppState, build_router};
