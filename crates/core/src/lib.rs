pub mod domain;
mod error;

pub use domain::*;
pub use error::CoreError;
