//! Rate limiting for external generation calls
//!
//! The orchestrator acquires a [`RateLimiter`] permit before every external
//! generation call. Reused assets and cache hits never acquire.

mod gate;

pub use gate::{FixedIntervalGate, RateLimiter, Unlimited};
#[cfg(test)]
pub use gate::mock;
