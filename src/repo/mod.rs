pub mod catalog;

pub use catalog::{RepoCatalog, Repository};
