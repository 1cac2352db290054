//! EC2 instance set: bastion, coordinator nodes, appliance nodes and
//! load balancers, attached to the volume set's volumes.

use std::fs;
use std::path::{Path, PathBuf};

use graviton_core::deployment::{instance_dir, instance_var_file};
use graviton_core::runner::assignment_scanner;
use graviton_core::varfile::write_var_file;
use graviton_core::{Console, GravitonError, Iac, InstanceStatus, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::deployment::AwsDeploymentDescription;
use crate::volumes::EbsVolumeVars;

/// Apply output lines worth capturing.
const APPLY_OUTPUT_KEYS: &[&str] = &["load_balancer_ip"];

/// IaC variables of the instance set, persisted as
/// `etc/iac/instance/instance.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ec2InstanceVars {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployment_name: String,
    #[serde(default, rename = "aws_region", skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aws_key_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zk_instance_type: String,
    #[serde(default, rename = "stardog_instance_type", skip_serializing_if = "String::is_empty")]
    pub sd_instance_type: String,
    #[serde(default, rename = "zookeeper_size", skip_serializing_if = "String::is_empty")]
    pub zk_size: String,
    #[serde(default, rename = "stardog_size", skip_serializing_if = "String::is_empty")]
    pub sd_size: String,
    #[serde(default, rename = "baseami", skip_serializing_if = "String::is_empty")]
    pub ami_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_key: String,
    #[serde(default, rename = "http_subnet", skip_serializing_if = "String::is_empty")]
    pub http_mask: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bastion_instance_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_stardog_properties: String,
}

pub struct Ec2Instance {
    vars: Ec2InstanceVars,
    dep_dir: PathBuf,
    iac: Iac,
    console: Console,
}

impl Ec2Instance {
    pub fn new(
        name: &str,
        version: &str,
        description: &AwsDeploymentDescription,
        dep_dir: &Path,
        iac: Iac,
        console: Console,
    ) -> Self {
        let vars = Ec2InstanceVars {
            deployment_name: name.to_string(),
            region: description.region.clone(),
            aws_key_name: description.aws_key_name.clone(),
            version: version.to_string(),
            zk_instance_type: description.zk_instance_type.clone(),
            sd_instance_type: description.sd_instance_type.clone(),
            ami_id: description.ami_id.clone(),
            private_key: description.private_key_path.clone(),
            bastion_instance_type: description.bastion_instance_type.clone(),
            custom_stardog_properties: description.custom_stardog_properties.clone(),
            ..Ec2InstanceVars::default()
        };
        Self {
            vars,
            dep_dir: dep_dir.to_path_buf(),
            iac,
            console,
        }
    }

    pub fn vars(&self) -> &Ec2InstanceVars {
        &self.vars
    }

    pub fn work_dir(&self) -> PathBuf {
        instance_dir(&self.dep_dir)
    }

    pub fn var_file(&self) -> PathBuf {
        instance_var_file(&self.dep_dir)
    }

    pub fn exists(&self) -> bool {
        self.var_file().exists()
    }

    /// The appliance node count comes from the volume set: one node per
    /// volume.
    pub async fn create(&mut self, zookeeper_size: u32, http_mask: &str) -> Result<()> {
        let volumes = EbsVolumeVars::load(&self.dep_dir).map_err(|e| {
            GravitonError::precondition(format!(
                "the volumes for {} must be created before the instance: {e}",
                self.vars.deployment_name
            ))
        })?;

        self.vars.zk_size = zookeeper_size.to_string();
        self.vars.sd_size = volumes.cluster_size;
        self.vars.http_mask = http_mask.to_string();

        let var_file = self.var_file();
        if var_file.exists() {
            self.console.say(1, "The instance already exists.");
            warn!(deployment = %self.vars.deployment_name, "instance already exists, re-applying");
        }
        write_var_file(&var_file, &self.vars)?;

        let scanner = assignment_scanner(APPLY_OUTPUT_KEYS);
        let spinner = self.console.spinner(1, "Creating the instance VMs");
        let output = self
            .iac
            .apply(&self.work_dir(), &var_file, Some(&scanner), Some(&spinner))
            .await?;
        spinner.finish();

        if let Some(lb) = output.capture("load_balancer_ip") {
            info!(deployment = %self.vars.deployment_name, load_balancer = lb, "instance set created");
        }
        self.console.success("Successfully created the instance.");
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        let var_file = self.var_file();
        if !var_file.exists() {
            return Err(GravitonError::precondition("there is no configured instance"));
        }

        let spinner = self.console.spinner(1, "Deleting the instance VMs");
        self.iac.destroy(&self.work_dir(), &var_file, Some(&spinner)).await?;
        spinner.finish();

        fs::remove_file(&var_file).map_err(|e| GravitonError::persist(&var_file, e))?;
        info!(deployment = %self.vars.deployment_name, "instance set destroyed");
        self.console.success("Successfully destroyed the instance.");
        Ok(())
    }

    pub async fn status(&self) -> Result<InstanceStatus> {
        if !self.exists() {
            return Err(GravitonError::precondition("there is no configured instance"));
        }
        let outputs = self.iac.output(&self.work_dir()).await?;
        Ok(InstanceStatus {
            bastion_contact: outputs.string("bastion_contact")?,
            stardog_contact: outputs.string("stardog_contact")?,
            stardog_internal_contact: outputs.string("stardog_internal_contact")?,
            zookeeper_nodes: outputs.string_list("zookeeper_nodes")?,
        })
    }
}
