//! IaC and image-builder templates compiled into the binary.

use graviton_core::assets::AssetTable;

pub const AWS_ASSETS: AssetTable = &[
    ("etc/iac/volumes/main.tf", include_str!("assets/etc/iac/volumes/main.tf")),
    ("etc/iac/volumes/builder.tf", include_str!("assets/etc/iac/volumes/builder.tf")),
    ("etc/iac/volumes/variables.tf", include_str!("assets/etc/iac/volumes/variables.tf")),
    ("etc/iac/instance/main.tf", include_str!("assets/etc/iac/instance/main.tf")),
    ("etc/iac/instance/outputs.tf", include_str!("assets/etc/iac/instance/outputs.tf")),
    ("etc/iac/instance/variables.tf", include_str!("assets/etc/iac/instance/variables.tf")),
    ("etc/packer/template.json", include_str!("assets/etc/packer/template.json")),
    ("etc/packer/provision.sh", include_str!("assets/etc/packer/provision.sh")),
];

/// Template removed after the first volume apply.
pub const BUILDER_TEMPLATE: &str = "builder.tf";

pub const VOLUMES_ASSET_PATH: &str = "etc/iac/volumes";
pub const PACKER_ASSET_PATH: &str = "etc/packer";
