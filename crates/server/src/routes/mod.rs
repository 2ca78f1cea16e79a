mod batches;
mod campaigns;
mod health;
pub mod sse;

pub use batches::*;
pub use campaigns::*;
pub use health::*;
