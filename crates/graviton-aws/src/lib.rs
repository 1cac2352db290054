//! graviton-aws: the `aws` deployment plugin.
//!
//! A deployment is two IaC working directories staged from embedded
//! templates: an EBS volume set holding the data, and an EC2 instance
//! set (bastion, coordinator nodes, appliance nodes, load balancers)
//! that mounts it. Base appliance images are built with packer.

pub mod ami;
pub mod assets;
pub mod deployment;
pub mod instance;
pub mod plugin;
pub mod regions;
pub mod volumes;

pub use ami::AmiMap;
pub use deployment::{AwsDeployment, AwsDeploymentDescription};
pub use plugin::{AwsPlugin, PLUGIN_NAME};
