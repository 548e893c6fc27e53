// crates/core/src/lib.rs
pub mod config;
pub mod decoder;
pub mod error;
pub mod store;
pub mod types;

pub use config::*;
pub use decoder::*;
pub use error::*;
pub use store::*;
pub use types::*;
