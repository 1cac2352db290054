//! Base appliance image (AMI) builds and the per-region image map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use graviton_core::assets::place_asset;
use graviton_core::runner::{CommandRunner, CommandSpec, ScanResult};
use graviton_core::varfile::{read_json, write_json};
use graviton_core::{Console, GravitonError, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::assets::{AWS_ASSETS, PACKER_ASSET_PATH};

/// Binary name of the image builder looked up on `$PATH`.
pub const IMAGE_BUILDER_TOOL: &str = "packer";

pub const AMI_MAP_FILE: &str = "amis.json";

const PACKER_TEMPLATE: &str = "template.json";

/// Escape packer uses for commas inside machine-readable fields.
const PACKER_COMMA: &str = "%!(PACKER_COMMA)";

/// Region to base image id, stored at `<config_root>/amis.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AmiMap {
    amis: BTreeMap<String, String>,
}

impl AmiMap {
    pub fn path(config_dir: &Path) -> PathBuf {
        config_dir.join(AMI_MAP_FILE)
    }

    /// An absent file is an empty map.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = Self::path(config_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        read_json(&path)
    }

    pub fn save(&self, config_dir: &Path) -> Result<()> {
        write_json(&Self::path(config_dir), self)
    }

    pub fn get(&self, region: &str) -> Option<&str> {
        self.amis.get(region).map(String::as_str)
    }

    pub fn insert(&mut self, region: &str, ami: &str) {
        self.amis.insert(region.to_string(), ami.to_string());
    }
}

/// Extract the image id for `region` from one machine-readable line:
/// `<ts>,<target>,artifact,0,id,<region>:<ami>[%!(PACKER_COMMA)<region>:<ami>...]`.
pub fn scan_artifact_id(line: &str, region: &str) -> Option<String> {
    let mut fields = line.trim().splitn(6, ',');
    let _timestamp = fields.next()?;
    let _target = fields.next()?;
    if fields.next()? != "artifact" || fields.next()? != "0" || fields.next()? != "id" {
        return None;
    }
    let data = fields.next()?.replace(PACKER_COMMA, ",");
    data.split(',').find_map(|pair| {
        let (r, ami) = pair.split_once(':')?;
        (r == region).then(|| ami.to_string())
    })
}

/// Inputs of one base image build.
#[derive(Debug, Clone)]
pub struct AmiBuild {
    pub region: String,
    pub version: String,
    pub release_zip: PathBuf,
    pub instance_type: String,
}

impl AmiBuild {
    pub fn command(&self, packer: &Path, template_dir: &Path) -> CommandSpec {
        CommandSpec::new(packer)
            .arg("build")
            .arg("-machine-readable")
            .args(["-var".to_string(), format!("region={}", self.region)])
            .args(["-var".to_string(), format!("version={}", self.version)])
            .args([
                "-var".to_string(),
                format!("stardog_release={}", self.release_zip.display()),
            ])
            .args(["-var".to_string(), format!("instance_type={}", self.instance_type)])
            .arg(PACKER_TEMPLATE)
            .current_dir(template_dir)
    }
}

/// Build a base image and record it in the image map. Returns the new
/// image id.
pub async fn build_base_ami(
    runner: Arc<dyn CommandRunner>,
    console: &Console,
    packer: &Path,
    config_dir: &Path,
    build: &AmiBuild,
) -> Result<String> {
    let release = build.release_zip.canonicalize().map_err(|e| {
        GravitonError::precondition(format!(
            "the release file {} cannot be read: {e}",
            build.release_zip.display()
        ))
    })?;
    let build = AmiBuild {
        release_zip: release,
        ..build.clone()
    };

    let work = tempfile::tempdir()?;
    let template_dir = place_asset(AWS_ASSETS, work.path(), PACKER_ASSET_PATH, true)?;
    console.say(2, format!("Image builder templates staged in {}", template_dir.display()));

    let region = build.region.clone();
    let scanner = move |line: &str| {
        scan_artifact_id(line, &region).map(|ami| ScanResult::new("ami", ami))
    };

    let spinner = console.spinner(1, format!("Building the base image in {}", build.region));
    let output = runner
        .run(&build.command(packer, &template_dir), Some(&scanner), Some(&spinner))
        .await?;
    spinner.finish();

    let ami = output
        .capture("ami")
        .map(str::to_string)
        .ok_or_else(|| {
            GravitonError::OutputParse(format!(
                "the image builder reported no image for {}",
                build.region
            ))
        })?;

    let mut map = AmiMap::load(config_dir)?;
    map.insert(&build.region, &ami);
    map.save(config_dir)?;

    info!(region = %build.region, %ami, "base image built");
    console.success(format!("Created the base image {ami} in {}.", build.region));
    Ok(ami)
}
