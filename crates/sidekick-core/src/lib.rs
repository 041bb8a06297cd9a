pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod trace;

pub use error::{CoreError, Result};
