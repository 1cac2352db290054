//! EBS volume set: the persistent data volumes of a deployment.
//!
//! Creation is a two-step apply. The first apply creates the volumes
//! plus one-shot builder VMs that format them and install the license;
//! then `builder.tf` is removed and the same apply runs again so the
//! builders are destroyed while the volumes stay.

use std::fs;
use std::path::{Path, PathBuf};

use graviton_core::assets::place_asset;
use graviton_core::deployment::{volumes_dir, volumes_var_file};
use graviton_core::varfile::{read_var_file, write_var_file};
use graviton_core::{Console, GravitonError, Iac, Result, VolumeStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assets::{AWS_ASSETS, BUILDER_TEMPLATE, VOLUMES_ASSET_PATH};
use crate::deployment::AwsDeploymentDescription;

/// IaC variables of the volume set, persisted as
/// `etc/iac/volumes/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EbsVolumeVars {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployment_name: String,
    #[serde(default, rename = "aws_region", skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default, rename = "storage_size", skip_serializing_if = "String::is_empty")]
    pub size_of_each_volume: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_size: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aws_key_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_path: String,
    #[serde(default, rename = "ami", skip_serializing_if = "String::is_empty")]
    pub ami_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance_type: String,
    #[serde(default, rename = "stardog_license", skip_serializing_if = "String::is_empty")]
    pub license_path: String,
}

impl EbsVolumeVars {
    /// Read the persisted variables of an existing volume set.
    pub fn load(dep_dir: &Path) -> Result<Self> {
        read_var_file(&volumes_var_file(dep_dir))
    }
}

/// Manager for one deployment's volume set.
pub struct EbsVolumes {
    vars: EbsVolumeVars,
    dep_dir: PathBuf,
    iac: Iac,
    console: Console,
}

impl EbsVolumes {
    pub fn new(
        name: &str,
        description: &AwsDeploymentDescription,
        dep_dir: &Path,
        iac: Iac,
        console: Console,
    ) -> Self {
        let vars = EbsVolumeVars {
            deployment_name: name.to_string(),
            region: description.region.clone(),
            aws_key_name: description.aws_key_name.clone(),
            key_path: description.private_key_path.clone(),
            ami_id: description.ami_id.clone(),
            instance_type: description.sd_instance_type.clone(),
            ..EbsVolumeVars::default()
        };
        Self {
            vars,
            dep_dir: dep_dir.to_path_buf(),
            iac,
            console,
        }
    }

    pub fn vars(&self) -> &EbsVolumeVars {
        &self.vars
    }

    pub fn work_dir(&self) -> PathBuf {
        volumes_dir(&self.dep_dir)
    }

    pub fn var_file(&self) -> PathBuf {
        volumes_var_file(&self.dep_dir)
    }

    pub fn exists(&self) -> bool {
        self.var_file().exists()
    }

    pub async fn create(&mut self, license: &Path, volume_size_gb: u32, cluster_size: u32) -> Result<()> {
        fs::File::open(license).map_err(|e| {
            GravitonError::precondition(format!(
                "cannot read the license file {}: {e}",
                license.display()
            ))
        })?;

        let work_dir = self.work_dir();
        let var_file = self.var_file();
        self.console.say(
            2,
            format!("Creating an aws volume set in directory {}", work_dir.display()),
        );

        self.vars.cluster_size = cluster_size.to_string();
        self.vars.size_of_each_volume = volume_size_gb.to_string();
        self.vars.license_path = license.display().to_string();

        if var_file.exists() {
            let msg = format!(
                "Volumes have already been created for the {} deployment, running the IaC apply again.",
                self.vars.deployment_name
            );
            self.console.say(1, &msg);
            warn!("{msg}");
        } else {
            // A previous create removed the builder template; a fresh set
            // needs it to format the new volumes.
            place_asset(AWS_ASSETS, &self.dep_dir, VOLUMES_ASSET_PATH, false)?;
        }
        write_var_file(&var_file, &self.vars)?;

        let apply = self.iac.apply_command(&work_dir, &var_file);

        let spinner = self
            .console
            .spinner(1, "Calling out to the IaC engine to create the volumes");
        self.iac.run(&apply, None, Some(&spinner)).await?;
        spinner.finish();

        let builder = work_dir.join(BUILDER_TEMPLATE);
        if builder.exists() {
            fs::remove_file(&builder).map_err(|e| GravitonError::persist(&builder, e))?;
        }

        let spinner = self
            .console
            .spinner(1, "Calling out to the IaC engine to stop the builder instances");
        self.iac.run(&apply, None, Some(&spinner)).await?;
        spinner.finish();

        info!(deployment = %self.vars.deployment_name, "volume set created");
        self.console.success("Successfully created the volumes.");
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        let var_file = self.var_file();
        if !var_file.exists() {
            return Err(GravitonError::precondition(format!(
                "there are no volumes for the {} deployment",
                self.vars.deployment_name
            )));
        }

        let spinner = self
            .console
            .spinner(1, "Calling out to the IaC engine to delete the volumes");
        self.iac.destroy(&self.work_dir(), &var_file, Some(&spinner)).await?;
        spinner.finish();

        fs::remove_file(&var_file).map_err(|e| GravitonError::persist(&var_file, e))?;
        info!(deployment = %self.vars.deployment_name, "volume set destroyed");
        self.console.success("Successfully destroyed the volumes.");
        Ok(())
    }

    /// Volume ids reported by the IaC outputs, in order.
    pub async fn status(&self) -> Result<VolumeStatus> {
        let outputs = self.iac.output(&self.work_dir()).await?;
        Ok(VolumeStatus {
            volume_ids: outputs.string_list("volumes")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use graviton_core::testing::{ScriptedResponse, ScriptedRunner};

    use super::*;

    fn description() -> AwsDeploymentDescription {
        AwsDeploymentDescription {
            region: "us-west-1".to_string(),
            ami_id: "ami-abc".to_string(),
            aws_key_name: "kp".to_string(),
            sd_instance_type: "m3.medium".to_string(),
            private_key_path: "/tmp/k".to_string(),
            ..AwsDeploymentDescription::default()
        }
    }

    fn staged_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        place_asset(AWS_ASSETS, dir.path(), "etc/iac", false).unwrap();
        dir
    }

    fn license(dir: &Path) -> PathBuf {
        let path = dir.join("license.bin");
        fs::write(&path, b"license").unwrap();
        path
    }

    fn manager(dir: &Path, runner: Arc<ScriptedRunner>) -> EbsVolumes {
        EbsVolumes::new(
            "demo",
            &description(),
            dir,
            Iac::new("terraform", runner),
            Console::silent(),
        )
    }

    #[tokio::test]
    async fn create_applies_twice_and_removes_builder() {
        let dir = staged_dir();
        let runner = Arc::new(ScriptedRunner::new());
        let mut volumes = manager(dir.path(), runner.clone());

        volumes.create(&license(dir.path()), 10, 3).await.unwrap();

        assert_eq!(runner.subcommands(), vec!["apply", "apply"]);
        assert!(volumes.exists());
        assert!(!volumes.work_dir().join(BUILDER_TEMPLATE).exists());

        let vars = EbsVolumeVars::load(dir.path()).unwrap();
        assert_eq!(vars.cluster_size, "3");
        assert_eq!(vars.size_of_each_volume, "10");
        assert_eq!(vars.ami_id, "ami-abc");
    }

    #[tokio::test]
    async fn failed_first_apply_keeps_builder_and_skips_second_apply() {
        let dir = staged_dir();
        let runner = Arc::new(
            ScriptedRunner::new().on("apply", ScriptedResponse::failing(1, &["Error: quota"])),
        );
        let mut volumes = manager(dir.path(), runner.clone());

        let err = volumes.create(&license(dir.path()), 10, 3).await.unwrap_err();
        assert!(matches!(err, GravitonError::Subprocess { .. }));
        assert_eq!(runner.subcommands(), vec!["apply"]);
        assert!(volumes.work_dir().join(BUILDER_TEMPLATE).exists());
        // No rollback: the marker stays so delete or re-create can recover.
        assert!(volumes.exists());
    }

    #[tokio::test]
    async fn unreadable_license_is_a_precondition() {
        let dir = staged_dir();
        let runner = Arc::new(ScriptedRunner::new());
        let mut volumes = manager(dir.path(), runner.clone());

        let err = volumes
            .create(&dir.path().join("missing.bin"), 10, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, GravitonError::Precondition(_)));
        assert!(runner.calls().is_empty());
        assert!(!volumes.exists());
    }

    #[tokio::test]
    async fn create_twice_is_byte_identical() {
        let dir = staged_dir();
        let runner = Arc::new(ScriptedRunner::new());
        let lic = license(dir.path());

        manager(dir.path(), runner.clone()).create(&lic, 10, 3).await.unwrap();
        let first = fs::read(volumes_var_file(dir.path())).unwrap();

        manager(dir.path(), runner.clone()).create(&lic, 10, 3).await.unwrap();
        let second = fs::read(volumes_var_file(dir.path())).unwrap();

        assert_eq!(first, second);
        // Re-apply does not resurrect the builder.
        assert!(!volumes_dir(dir.path()).join(BUILDER_TEMPLATE).exists());
    }

    #[tokio::test]
    async fn recreate_after_delete_restores_builder() {
        let dir = staged_dir();
        let runner = Arc::new(ScriptedRunner::new());
        let lic = license(dir.path());

        manager(dir.path(), runner.clone()).create(&lic, 10, 3).await.unwrap();
        manager(dir.path(), runner.clone()).delete().await.unwrap();
        assert!(!volumes_var_file(dir.path()).exists());

        // Observe the builder template between the two applies.
        let mut volumes = manager(dir.path(), runner.clone());
        volumes.create(&lic, 10, 3).await.unwrap();
        assert_eq!(
            runner.subcommands(),
            vec!["apply", "apply", "destroy", "apply", "apply"]
        );
    }

    #[tokio::test]
    async fn delete_requires_the_variables_file() {
        let dir = staged_dir();
        let runner = Arc::new(ScriptedRunner::new());
        let err = manager(dir.path(), runner.clone()).delete().await.unwrap_err();
        assert!(matches!(err, GravitonError::Precondition(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn delete_keeps_marker_when_destroy_fails() {
        let dir = staged_dir();
        let runner = Arc::new(ScriptedRunner::new().on("destroy", ScriptedResponse::failing(1, &[])));
        let lic = license(dir.path());
        manager(dir.path(), runner.clone()).create(&lic, 10, 3).await.unwrap();

        assert!(manager(dir.path(), runner.clone()).delete().await.is_err());
        assert!(volumes_var_file(dir.path()).exists());
    }

    #[tokio::test]
    async fn status_reads_volume_ids() {
        let dir = staged_dir();
        let runner = Arc::new(ScriptedRunner::new().on(
            "output",
            ScriptedResponse::ok(&[r#"{"volumes": {"sensitive": false, "type": "list", "value": ["vol-1", "vol-2", "vol-3"]}}"#]),
        ));
        let status = manager(dir.path(), runner).status().await.unwrap();
        assert_eq!(status.volume_ids, vec!["vol-1", "vol-2", "vol-3"]);
    }

    #[tokio::test]
    async fn status_without_volumes_key_fails() {
        let dir = staged_dir();
        let runner = Arc::new(ScriptedRunner::new().on("output", ScriptedResponse::ok(&["{}"])));
        let err = manager(dir.path(), runner).status().await.unwrap_err();
        assert!(matches!(err, GravitonError::OutputParse(_)));
    }
}
