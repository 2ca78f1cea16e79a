mod batch_job_repository;
mod campaign_repository;
mod thread_repository;

pub use batch_job_repository::*;
pub use campaign_repository::*;
pub use thread_repository::*;
