//! Pipeline events
//!
//! Campaign lifecycle and batch progress notifications published on a
//! broadcast bus. Publishing never blocks and events with no subscriber are
//! dropped.

mod bus;
mod types;

pub use bus::{CampaignSubscription, EventBus};
pub use types::*;
