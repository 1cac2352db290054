//! Deployment records, on-disk layout and the lifecycle state machine.
//!
//! ```text
//! <config_root>/deployments/<name>/
//!   config.json                      BaseDeployment + cloud options
//!   etc/iac/volumes/config.json      volume set variables (marker)
//!   etc/iac/instance/instance.json   instance set variables (marker)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{GravitonError, Result};

/// Port the appliance serves HTTP on.
pub const STARDOG_PORT: u16 = 5821;

/// Logical asset path of the IaC templates inside a deployment.
pub const IAC_ASSET_PATH: &str = "etc/iac";

pub fn deployments_root(config_dir: &Path) -> PathBuf {
    config_dir.join("deployments")
}

pub fn deployment_dir(config_dir: &Path, name: &str) -> PathBuf {
    deployments_root(config_dir).join(name)
}

pub fn config_path(dep_dir: &Path) -> PathBuf {
    dep_dir.join("config.json")
}

pub fn volumes_dir(dep_dir: &Path) -> PathBuf {
    dep_dir.join(IAC_ASSET_PATH).join("volumes")
}

pub fn volumes_var_file(dep_dir: &Path) -> PathBuf {
    volumes_dir(dep_dir).join("config.json")
}

pub fn instance_dir(dep_dir: &Path) -> PathBuf {
    dep_dir.join(IAC_ASSET_PATH).join("instance")
}

pub fn instance_var_file(dep_dir: &Path) -> PathBuf {
    instance_dir(dep_dir).join("instance.json")
}

/// Deployment names become directory names.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(GravitonError::precondition(format!(
            "invalid deployment name {name:?}: use letters, digits, '-' and '_'"
        )))
    }
}

/// The user-facing record of one deployment, persisted as
/// `<dep_dir>/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseDeployment {
    #[serde(rename = "type")]
    pub cloud_type: String,
    pub name: String,
    pub version: String,
    pub directory: PathBuf,
    pub private_key: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_props_file: Option<PathBuf>,
    /// Plugin-owned options, opaque to the core.
    #[serde(default)]
    pub cloud_opts: serde_json::Value,
}

impl BaseDeployment {
    pub fn new(config_dir: &Path, cloud_type: &str, name: &str, version: &str) -> Self {
        Self {
            cloud_type: cloud_type.to_string(),
            name: name.to_string(),
            version: version.to_string(),
            directory: deployment_dir(config_dir, name),
            private_key: PathBuf::new(),
            custom_props_file: None,
            cloud_opts: serde_json::Value::Null,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        config_path(&self.directory)
    }
}

/// Outputs of the volume set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeStatus {
    pub volume_ids: Vec<String>,
}

/// Outputs of the instance set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub bastion_contact: String,
    pub stardog_contact: String,
    pub stardog_internal_contact: String,
    pub zookeeper_nodes: Vec<String>,
}

/// Composed status view of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StardogDescription {
    pub stardog_url: String,
    pub stardog_internal_url: String,
    pub ssh_host: String,
    pub volume_description: VolumeStatus,
    pub instance_description: InstanceStatus,
    pub healthy: bool,
}

impl StardogDescription {
    pub fn compose(volumes: VolumeStatus, instance: InstanceStatus) -> Self {
        Self {
            stardog_url: stardog_url(&instance.stardog_contact),
            stardog_internal_url: stardog_url(&instance.stardog_internal_contact),
            ssh_host: instance.bastion_contact.clone(),
            volume_description: volumes,
            instance_description: instance,
            healthy: false,
        }
    }
}

/// `http://<host>:5821`, or empty when the host is unknown.
pub fn stardog_url(host: &str) -> String {
    if host.is_empty() {
        String::new()
    } else {
        format!("http://{host}:{STARDOG_PORT}")
    }
}

/// Operations a loaded deployment exposes to the command layer.
#[async_trait]
pub trait Deployment: Send + Sync {
    fn name(&self) -> &str;

    fn directory(&self) -> &Path;

    async fn create_volume_set(&self, license: &Path, volume_size_gb: u32, cluster_size: u32) -> Result<()>;

    async fn delete_volume_set(&self) -> Result<()>;

    async fn status_volume_set(&self) -> Result<VolumeStatus>;

    fn volume_exists(&self) -> bool;

    async fn create_instance(&self, zookeeper_size: u32, http_mask: &str) -> Result<()>;

    async fn delete_instance(&self) -> Result<()>;

    async fn status_instance(&self) -> Result<InstanceStatus>;

    fn instance_exists(&self) -> bool;

    /// Status of both sub-resources. Missing sub-resources yield empty
    /// fields rather than an error.
    async fn full_status(&self) -> Result<StardogDescription>;
}

/// Where a deployment directory is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    Absent,
    Configured,
    VolumesUp,
    ClusterUp,
}

/// Lifecycle events that move a deployment between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    NewDeployment,
    LaunchVolumes,
    LaunchInstance,
    DestroyInstance,
    DestroyVolumes,
    DestroyDeployment,
}

impl DeploymentState {
    /// Read the state from the marker files in `dep_dir`.
    pub fn detect(dep_dir: &Path) -> Result<Self> {
        let volumes = volumes_var_file(dep_dir).exists();
        let instance = instance_var_file(dep_dir).exists();
        match (config_path(dep_dir).exists(), volumes, instance) {
            (_, false, true) => Err(GravitonError::precondition(format!(
                "{} has an instance but no volumes",
                dep_dir.display()
            ))),
            (_, true, true) => Ok(DeploymentState::ClusterUp),
            (_, true, false) => Ok(DeploymentState::VolumesUp),
            (true, false, false) => Ok(DeploymentState::Configured),
            (false, false, false) => Ok(DeploymentState::Absent),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeploymentState::Absent => "absent",
            DeploymentState::Configured => "configured",
            DeploymentState::VolumesUp => "volumes-up",
            DeploymentState::ClusterUp => "cluster-up",
        }
    }

    /// The state after `event`, or the reason it is not allowed.
    ///
    /// Re-launching a sub-resource that is already up is allowed: the IaC
    /// apply reconciles it.
    pub fn transition(self, event: LifecycleEvent, name: &str) -> Result<Self> {
        use DeploymentState::*;
        use LifecycleEvent::*;

        match (self, event) {
            (Absent, NewDeployment) => Ok(Configured),
            (_, NewDeployment) => Err(GravitonError::DeploymentAlreadyExists(name.to_string())),
            (Absent, _) => Err(GravitonError::DeploymentNotFound(name.to_string())),

            (Configured | VolumesUp, LaunchVolumes) => Ok(VolumesUp),
            (ClusterUp, LaunchVolumes) => Ok(ClusterUp),

            (VolumesUp | ClusterUp, LaunchInstance) => Ok(ClusterUp),
            (Configured, LaunchInstance) => Err(GravitonError::precondition(format!(
                "the deployment {name} has no volumes; launch the volumes first"
            ))),

            (ClusterUp, DestroyInstance) => Ok(VolumesUp),
            (_, DestroyInstance) => Err(GravitonError::precondition(format!(
                "there is no configured instance for {name}"
            ))),

            (VolumesUp, DestroyVolumes) => Ok(Configured),
            (ClusterUp, DestroyVolumes) => Err(GravitonError::precondition(format!(
                "the instance for {name} is still up; destroy it first"
            ))),
            (Configured, DestroyVolumes) => Err(GravitonError::precondition(format!(
                "there are no volumes for {name}"
            ))),

            (Configured, DestroyDeployment) => Ok(Absent),
            (VolumesUp | ClusterUp, DestroyDeployment) => Err(GravitonError::precondition(format!(
                "the deployment {name} still has cloud resources; destroy them first or use --force"
            ))),
        }
    }
}

/// Names of every deployment under the config root, sorted.
pub fn list_deployments(config_dir: &Path) -> Result<Vec<String>> {
    let root = deployments_root(config_dir);
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && config_path(&entry.path()).exists() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}
