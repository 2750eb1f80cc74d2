pub mod dispatcher;
pub mod env_info;
pub mod read_file;
pub mod request;

pub use dispatcher::{Dispatcher, EventStream};
pub use env_info::ToolVersion;
pub use request::{OperationRequest, RequestError};
