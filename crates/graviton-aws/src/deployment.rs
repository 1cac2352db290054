//! The AWS deployment aggregate.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use graviton_core::deployment::STARDOG_PORT;
use graviton_core::{
    Console, Deployment, DeploymentState, Iac, InstanceStatus, LifecycleEvent, Result,
    StardogDescription, VolumeStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::instance::Ec2Instance;
use crate::volumes::EbsVolumes;

/// Cloud options persisted under `cloud_opts` in the deployment's
/// `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsDeploymentDescription {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ami_id: String,
    #[serde(default, rename = "keyname", skip_serializing_if = "String::is_empty")]
    pub aws_key_name: String,
    #[serde(default, rename = "zk_instance", skip_serializing_if = "String::is_empty")]
    pub zk_instance_type: String,
    #[serde(default, rename = "sd_instance", skip_serializing_if = "String::is_empty")]
    pub sd_instance_type: String,
    #[serde(default, rename = "bastion_instance", skip_serializing_if = "String::is_empty")]
    pub bastion_instance_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_key_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_stardog_properties: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_mask: String,
}

pub struct AwsDeployment {
    name: String,
    version: String,
    directory: PathBuf,
    description: AwsDeploymentDescription,
    iac: Iac,
    console: Console,
}

impl AwsDeployment {
    pub fn new(
        name: &str,
        version: &str,
        directory: &Path,
        description: AwsDeploymentDescription,
        iac: Iac,
        console: Console,
    ) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            directory: directory.to_path_buf(),
            description,
            iac,
            console,
        }
    }

    pub fn description(&self) -> &AwsDeploymentDescription {
        &self.description
    }

    fn volumes(&self) -> EbsVolumes {
        EbsVolumes::new(
            &self.name,
            &self.description,
            &self.directory,
            self.iac.clone(),
            self.console,
        )
    }

    fn instance(&self) -> Ec2Instance {
        Ec2Instance::new(
            &self.name,
            &self.version,
            &self.description,
            &self.directory,
            self.iac.clone(),
            self.console,
        )
    }

    fn check(&self, event: LifecycleEvent) -> Result<DeploymentState> {
        let state = DeploymentState::detect(&self.directory)?;
        let next = state.transition(event, &self.name)?;
        debug!(deployment = %self.name, from = state.label(), to = next.label(), "lifecycle transition");
        Ok(next)
    }
}

#[async_trait]
impl Deployment for AwsDeployment {
    fn name(&self) -> &str {
        &self.name
    }

    fn directory(&self) -> &Path {
        &self.directory
    }

    async fn create_volume_set(&self, license: &Path, volume_size_gb: u32, cluster_size: u32) -> Result<()> {
        self.check(LifecycleEvent::LaunchVolumes)?;
        self.volumes().create(license, volume_size_gb, cluster_size).await
    }

    async fn delete_volume_set(&self) -> Result<()> {
        self.check(LifecycleEvent::DestroyVolumes)?;
        self.volumes().delete().await
    }

    async fn status_volume_set(&self) -> Result<VolumeStatus> {
        let status = self.volumes().status().await?;
        for (i, id) in status.volume_ids.iter().enumerate() {
            self.console.say(1, format!("Volume {i}: {id}"));
        }
        Ok(status)
    }

    fn volume_exists(&self) -> bool {
        self.volumes().exists()
    }

    async fn create_instance(&self, zookeeper_size: u32, http_mask: &str) -> Result<()> {
        self.check(LifecycleEvent::LaunchInstance)?;
        self.instance().create(zookeeper_size, http_mask).await
    }

    async fn delete_instance(&self) -> Result<()> {
        self.check(LifecycleEvent::DestroyInstance)?;
        self.instance().delete().await
    }

    async fn status_instance(&self) -> Result<InstanceStatus> {
        let status = self.instance().status().await?;
        self.console.say(
            1,
            format!("Stardog: http://{}:{STARDOG_PORT}", status.stardog_contact),
        );
        self.console.say(1, format!("SSH: {}", status.bastion_contact));
        Ok(status)
    }

    fn instance_exists(&self) -> bool {
        self.instance().exists()
    }

    async fn full_status(&self) -> Result<StardogDescription> {
        let volumes = match self.volumes().status().await {
            Ok(status) => status,
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => {
                self.console.say(1, "No volume information found.");
                warn!(deployment = %self.name, error = %e, "volume status unavailable");
                VolumeStatus::default()
            }
        };
        let instance = match self.instance().status().await {
            Ok(status) => status,
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => {
                self.console.say(1, "No instance information found.");
                warn!(deployment = %self.name, error = %e, "instance status unavailable");
                InstanceStatus::default()
            }
        };
        Ok(StardogDescription::compose(volumes, instance))
    }
}
