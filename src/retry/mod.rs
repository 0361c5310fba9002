//! Caller-driven attempts, one fresh controller and boundary each.
//!
//! Nothing here retries on its own. The caller decides whether the
//! configuration changed enough to be worth another attempt, and calls
//! [`RetryDriver::attempt`] again.

mod driver;
pub use driver::*;
