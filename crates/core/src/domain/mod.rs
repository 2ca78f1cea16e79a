mod batch;
mod campaign;
mod content;
mod thread;

pub use batch::*;
pub use campaign::*;
pub use content::*;
pub use thread::*;
