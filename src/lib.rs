pub mod attach;
pub mod config;
pub mod data;
pub mod error;
pub mod ledger;
pub mod merge;
pub mod render;
pub mod smtp;
pub mod template;
pub mod validate;

pub use error::MergeError;
pub type Result<T> = std::result::Result<T, MergeError>;
