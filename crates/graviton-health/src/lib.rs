//! graviton-health: is the deployed cluster answering?
//!
//! - **probe**: single external (HTTP) or internal (ssh + curl) check,
//!   and the unit-test switch that bypasses both
//! - **wait**: fixed-interval polling with a wall-clock cap and
//!   cancellation

pub mod probe;
pub mod wait;

pub use probe::{DeploymentHealth, HealthCheck, ProbeMode, bastion_command, http_probe, ssh_command};
pub use wait::{POLL_INTERVAL, wait_for_health};
