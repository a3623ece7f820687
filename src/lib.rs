pub mod config;
pub mod consensus;
pub mod core;
pub mod edit;
pub mod error;
pub mod events;
pub mod log;
pub mod orchestration;
pub mod util;
pub mod workspace;

pub use error::{Error, Result};
