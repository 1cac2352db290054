//! AWS regions the appliance images are built for.

pub const DEFAULT_REGION: &str = "us-west-1";

pub const VALID_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "eu-west-1",
    "eu-west-2",
    "eu-central-1",
    "ap-south-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "sa-east-1",
];

pub fn is_valid_region(region: &str) -> bool {
    VALID_REGIONS.contains(&region)
}
