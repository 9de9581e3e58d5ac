//! Application services - long-running tasks coordinating the ports.

/// Leader election over the `LeaderLock` port.
pub mod election;

/// Cadence-driven upstream polling lanes.
pub mod poller;

pub use election::{ElectionConfig, LeaderElector};
pub use poller::{LaneConfig, PollerLane, lane_targets};
