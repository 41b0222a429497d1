//! Herald delivery engine: fans notifications out over channels, tracks
//! per-channel delivery state, and runs the scheduler, retry and cleanup
//! jobs against the shared repositories.

pub mod dispatcher;
pub mod jobs;
pub mod store;
pub mod template;
pub mod tracker;

pub use dispatcher::{ChannelResult, Dispatcher, SendOutcome, SendRequest};
pub use store::Stores;
pub use tracker::{DeliveryTracker, RetryPolicy};
