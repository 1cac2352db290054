//! Deployment lifecycle orchestration shared by the commands.
//!
//! The plugin owns how a sub-resource is created; this module owns the
//! order: configure, volumes, instance, health, and the walk back down
//! on destroy.

use std::fs;
use std::path::{Path, PathBuf};

use graviton_core::deployment::{config_path, list_deployments, validate_name};
use graviton_core::runner::ScanResult;
use graviton_core::varfile::{read_json, write_json};
use graviton_core::{
    AppContext, BaseDeployment, Deployment, DeploymentLock, DeploymentState, GravitonError,
    LifecycleEvent, Result, StardogDescription,
};
use graviton_health::{DeploymentHealth, HealthCheck, bastion_command, wait_for_health};
use tracing::{info, warn};

use crate::registry::{Plugin, Registry};

/// Admin client installed on the appliance images.
const ADMIN_CLIENT: &str = "/usr/local/stardog/bin/stardog-admin";

/// Inputs of `new`.
#[derive(Debug, Clone, Default)]
pub struct NewDeployment {
    pub name: String,
    pub version: String,
    pub private_key: Option<PathBuf>,
    pub custom_props: Option<PathBuf>,
}

impl NewDeployment {
    fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        semver::Version::parse(&self.version).map_err(|e| {
            GravitonError::precondition(format!("invalid version {:?}: {e}", self.version))
        })?;
        if let Some(props) = &self.custom_props {
            if !props.is_file() {
                return Err(GravitonError::precondition(format!(
                    "the custom properties file {} does not exist",
                    props.display()
                )));
            }
        }
        Ok(())
    }
}

/// A deployment ready for lifecycle operations. Holds the directory
/// lock for mutating commands.
pub struct Loaded {
    pub base: BaseDeployment,
    pub deployment: Box<dyn Deployment>,
    _lock: Option<DeploymentLock>,
}

impl Loaded {
    pub fn name(&self) -> &str {
        &self.base.name
    }
}

/// Configure a new deployment. On failure the half-made directory is
/// removed.
pub fn create_deployment(ctx: &AppContext, plugin: &mut Plugin, req: &NewDeployment) -> Result<Loaded> {
    req.validate()?;
    let dir = ctx.deployment_dir(&req.name);
    DeploymentState::detect(&dir)?.transition(LifecycleEvent::NewDeployment, &req.name)?;

    let lock = DeploymentLock::acquire(&dir)?;
    let mut base = BaseDeployment::new(ctx.config_dir(), plugin.name(), &req.name, &req.version);
    if let Some(key) = &req.private_key {
        base.private_key = key.clone();
    }
    base.custom_props_file = req.custom_props.clone();

    match plugin.load(ctx, &mut base, true) {
        Ok(deployment) => {
            info!(deployment = %req.name, cloud = plugin.name(), "deployment created");
            ctx.console()
                .success(format!("Deployment {} created in {}.", req.name, dir.display()));
            Ok(Loaded {
                base,
                deployment,
                _lock: Some(lock),
            })
        }
        Err(e) => {
            drop(lock);
            if let Err(rm) = fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), error = %rm, "failed to clean up deployment directory");
            }
            Err(e)
        }
    }
}

/// Load an existing deployment with the plugin recorded in its
/// `config.json`.
pub fn open_deployment(ctx: &AppContext, registry: &mut Registry, name: &str, exclusive: bool) -> Result<Loaded> {
    validate_name(name)?;
    let dir = ctx.deployment_dir(name);
    let path = config_path(&dir);
    if !path.exists() {
        return Err(GravitonError::DeploymentNotFound(name.to_string()));
    }
    let lock = if exclusive {
        Some(DeploymentLock::acquire(&dir)?)
    } else {
        None
    };

    let mut base: BaseDeployment = read_json(&path)?;
    let plugin = registry.get_mut(&base.cloud_type)?;
    let deployment = plugin.load(ctx, &mut base, false)?;
    Ok(Loaded {
        base,
        deployment,
        _lock: lock,
    })
}

/// Names of every deployment with its detected state.
pub fn list(ctx: &AppContext) -> Result<Vec<(String, DeploymentState)>> {
    list_deployments(ctx.config_dir())?
        .into_iter()
        .map(|name| {
            let state = DeploymentState::detect(&ctx.deployment_dir(&name))?;
            Ok((name, state))
        })
        .collect()
}

/// Tear down the instance set, then the volume set, then remove the
/// directory. With `force` teardown failures are reported and skipped.
pub async fn destroy_deployment(ctx: &AppContext, loaded: Loaded, force: bool) -> Result<()> {
    let name = loaded.name().to_string();
    let d = loaded.deployment.as_ref();

    if d.instance_exists() {
        tolerate(ctx, force, "instance", d.delete_instance().await)?;
    }
    if d.volume_exists() {
        tolerate(ctx, force, "volumes", d.delete_volume_set().await)?;
    }
    if !force {
        DeploymentState::detect(d.directory())?.transition(LifecycleEvent::DestroyDeployment, &name)?;
    }

    let dir = d.directory().to_path_buf();
    fs::remove_dir_all(&dir).map_err(|e| GravitonError::persist(&dir, e))?;
    info!(deployment = %name, "deployment removed");
    ctx.console().success(format!("Deleted the deployment {name}."));
    Ok(())
}

fn tolerate(ctx: &AppContext, force: bool, what: &str, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if force && !e.is_canceled() => {
            warn!(resource = what, error = %e, "teardown failed, continuing because of --force");
            ctx.console()
                .failure(format!("Failed to destroy the {what}: {e}. Cloud resources may be leaked."));
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Create the instance set and, with `wait`, block until the external
/// health check passes.
pub async fn create_instance(
    ctx: &AppContext,
    loaded: &Loaded,
    zookeeper_size: u32,
    http_mask: &str,
    wait: Option<u64>,
) -> Result<()> {
    loaded.deployment.create_instance(zookeeper_size, http_mask).await?;
    wait_until_healthy(ctx, loaded, wait).await
}

async fn wait_until_healthy(ctx: &AppContext, loaded: &Loaded, wait: Option<u64>) -> Result<()> {
    let Some(timeout) = wait else {
        ctx.console().say(1, "Not waiting...");
        return Ok(());
    };
    ctx.console().say(1, "Waiting for stardog to come up...");
    let health = DeploymentHealth::new(ctx, &loaded.base, loaded.deployment.as_ref());
    wait_for_health(&health, timeout, false, ctx.cancel_token(), ctx.console()).await
}

/// Inputs of `launch`.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub deployment: NewDeployment,
    pub license: PathBuf,
    pub volume_size_gb: u32,
    pub cluster_size: u32,
    pub zookeeper_size: u32,
    pub http_mask: String,
    pub wait: Option<u64>,
}

/// Bring a deployment all the way up, skipping whatever already exists.
pub async fn launch(ctx: &AppContext, registry: &mut Registry, cloud: &str, req: &LaunchRequest) -> Result<Loaded> {
    let name = &req.deployment.name;
    let console = ctx.console();

    let loaded = if config_path(&ctx.deployment_dir(name)).exists() {
        console.say(1, format!("Using the existing deployment {name}."));
        open_deployment(ctx, registry, name, true)?
    } else {
        create_deployment(ctx, registry.get_mut(cloud)?, &req.deployment)?
    };

    if loaded.deployment.volume_exists() {
        console.say(1, "The volumes already exist.");
    } else {
        loaded
            .deployment
            .create_volume_set(&req.license, req.volume_size_gb, req.cluster_size)
            .await?;
    }

    if loaded.deployment.instance_exists() {
        console.say(1, "The instance already exists.");
    } else {
        loaded
            .deployment
            .create_instance(req.zookeeper_size, &req.http_mask)
            .await?;
    }

    wait_until_healthy(ctx, &loaded, req.wait).await?;
    info!(deployment = %name, "launch complete");
    Ok(loaded)
}

/// Composed status plus a health check. Outside unit-test mode the
/// cluster's own view is printed with `cluster info`.
pub async fn full_status(
    ctx: &AppContext,
    loaded: &Loaded,
    internal: bool,
    out_file: Option<&Path>,
) -> Result<StardogDescription> {
    let console = ctx.console();
    let mut sd = loaded.deployment.full_status().await?;
    let health = DeploymentHealth::new(ctx, &loaded.base, loaded.deployment.as_ref());
    sd.healthy = health.is_healthy(internal).await?;

    console.say(1, format!("Stardog is available here: {}", sd.stardog_url));
    console.say(1, format!("ssh is available here: {}", sd.ssh_host));
    if let Some(path) = out_file {
        write_json(path, &sd)?;
    }
    if sd.healthy {
        console.success("The instance is healthy");
    } else {
        console.failure("The instance is not healthy");
    }

    if !health.mode().is_unit_test() {
        run_client(ctx, loaded, &["cluster".to_string(), "info".to_string()]).await?;
    }
    Ok(sd)
}

async fn bastion(ctx: &AppContext, loaded: &Loaded) -> Result<(StardogDescription, graviton_core::CommandSpec)> {
    let sd = loaded.deployment.full_status().await?;
    if sd.ssh_host.is_empty() {
        return Err(GravitonError::precondition(format!(
            "the deployment {} has no running instance",
            loaded.name()
        )));
    }
    let cmd = bastion_command(ctx.tools(), &loaded.base.private_key, &sd.ssh_host)?;
    Ok((sd, cmd))
}

/// Run the admin client on the cluster through the bastion, echoing its
/// output.
pub async fn run_client(ctx: &AppContext, loaded: &Loaded, args: &[String]) -> Result<()> {
    let (sd, ssh) = bastion(ctx, loaded).await?;
    let cmd = ssh
        .arg("sudo")
        .arg(ADMIN_CLIENT)
        .arg("--server")
        .arg(&sd.stardog_internal_url)
        .args(args.iter().cloned());

    let console = *ctx.console();
    let printer = move |line: &str| -> Option<ScanResult> {
        console.say(1, line);
        None
    };
    ctx.runner().run(&cmd, Some(&printer), None).await?;
    Ok(())
}

/// Interactive shell on the bastion.
pub async fn run_ssh(ctx: &AppContext, loaded: &Loaded) -> Result<()> {
    let (_, cmd) = bastion(ctx, loaded).await?;
    info!(command = %cmd.display(), "opening ssh session");
    ctx.runner().run_interactive(&cmd).await
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use graviton_core::deployment::{instance_var_file, volumes_var_file};
    use graviton_core::prompt::ScriptedResolver;
    use graviton_core::testing::{ScriptedResponse, ScriptedRunner};
    use graviton_core::{Console, EnvSnapshot, ToolResolver};
    use graviton_health::probe::{HEALTHY_ENV, UNIT_TEST_ENV};

    use super::*;

    const INSTANCE_OUTPUTS: &str = r#"{"bastion_contact":{"value":"b.example"},"stardog_contact":{"value":"s.example"},"stardog_internal_contact":{"value":"si.example"},"zookeeper_nodes":{"value":["z1","z2","z3"]}}"#;

    fn context_with(root: &Path, runner: Arc<ScriptedRunner>, healthy: &str) -> AppContext {
        let mut env = vec![
            ("AWS_ACCESS_KEY_ID", "id"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            (UNIT_TEST_ENV, "1"),
        ];
        if !healthy.is_empty() {
            env.push((HEALTHY_ENV, healthy));
        }
        AppContext::new(root, EnvSnapshot::from_pairs(env))
            .with_runner(runner)
            .with_input(Arc::new(
                ScriptedResolver::new()
                    .answer("Stardog base AMI", "ami-abc")
                    .answer("EC2 keyname", "kp"),
            ))
            .with_tools(ToolResolver::fixed([
                ("terraform", PathBuf::from("/usr/bin/terraform")),
                ("packer", PathBuf::from("/usr/bin/packer")),
                ("ssh", PathBuf::from("/usr/bin/ssh")),
            ]))
            .with_console(Console::silent())
    }

    fn context(root: &Path, runner: Arc<ScriptedRunner>) -> AppContext {
        context_with(root, runner, "")
    }

    fn request(name: &str) -> NewDeployment {
        NewDeployment {
            name: name.to_string(),
            version: "5.0.0".to_string(),
            private_key: Some(PathBuf::from("/tmp/k")),
            custom_props: None,
        }
    }

    fn license(root: &Path) -> PathBuf {
        let path = root.join("lic");
        fs::write(&path, "license").unwrap();
        path
    }

    fn launch_request(root: &Path, name: &str) -> LaunchRequest {
        LaunchRequest {
            deployment: request(name),
            license: license(root),
            volume_size_gb: 10,
            cluster_size: 3,
            zookeeper_size: 3,
            http_mask: "0.0.0.0/0".to_string(),
            wait: Some(10),
        }
    }

    fn applies(runner: &ScriptedRunner) -> usize {
        runner.subcommands().iter().filter(|s| *s == "apply").count()
    }

    #[tokio::test]
    async fn fresh_create_writes_config_and_volume_vars() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), Arc::new(ScriptedRunner::new()));
        let mut registry = Registry::builtin();

        let loaded = create_deployment(&ctx, registry.get_mut("aws").unwrap(), &request("demo")).unwrap();
        let lic = license(root.path());
        loaded.deployment.create_volume_set(&lic, 10, 3).await.unwrap();

        let dep = root.path().join("deployments/demo");
        let base: BaseDeployment = read_json(&config_path(&dep)).unwrap();
        assert_eq!(base.name, "demo");
        assert_eq!(base.cloud_type, "aws");
        assert_eq!(base.private_key, PathBuf::from("/tmp/k"));
        assert_eq!(base.cloud_opts["region"], "us-west-1");
        assert_eq!(base.cloud_opts["ami_id"], "ami-abc");
        assert_eq!(base.cloud_opts["keyname"], "kp");

        let vars: BTreeMap<String, String> = read_json(&volumes_var_file(&dep)).unwrap();
        assert_eq!(vars["cluster_size"], "3");
        assert_eq!(vars["storage_size"], "10");
        assert_eq!(vars["stardog_license"], lic.display().to_string());

        assert!(loaded.deployment.volume_exists());
        assert!(!loaded.deployment.instance_exists());
    }

    #[tokio::test]
    async fn instance_depends_on_volumes() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(root.path(), runner.clone());
        let mut registry = Registry::builtin();
        let loaded = create_deployment(&ctx, registry.get_mut("aws").unwrap(), &request("demo")).unwrap();

        let err = create_instance(&ctx, &loaded, 3, "0.0.0.0/0", None).await.unwrap_err();
        assert!(matches!(err, GravitonError::Precondition(_)));
        assert!(!instance_var_file(loaded.deployment.directory()).exists());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn existing_deployment_cannot_be_recreated() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), Arc::new(ScriptedRunner::new()));
        let mut registry = Registry::builtin();
        drop(create_deployment(&ctx, registry.get_mut("aws").unwrap(), &request("demo")).unwrap());

        let err = create_deployment(&ctx, registry.get_mut("aws").unwrap(), &request("demo"))
            .err()
            .unwrap();
        assert!(matches!(err, GravitonError::DeploymentAlreadyExists(_)));
    }

    #[test]
    fn failed_create_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), Arc::new(ScriptedRunner::new()))
            .with_input(Arc::new(ScriptedResolver::new()));
        let mut registry = Registry::builtin();

        assert!(create_deployment(&ctx, registry.get_mut("aws").unwrap(), &request("demo")).is_err());
        assert!(!root.path().join("deployments/demo").exists());
        assert!(list(&ctx).unwrap().is_empty());
    }

    #[test]
    fn invalid_inputs_are_rejected_before_touching_disk() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), Arc::new(ScriptedRunner::new()));
        let mut registry = Registry::builtin();

        let mut bad_version = request("demo");
        bad_version.version = "five".to_string();
        let err = create_deployment(&ctx, registry.get_mut("aws").unwrap(), &bad_version)
            .err()
            .unwrap();
        assert!(err.to_string().contains("five"));

        let err = create_deployment(&ctx, registry.get_mut("aws").unwrap(), &request("a/b"))
            .err()
            .unwrap();
        assert!(matches!(err, GravitonError::Precondition(_)));
        assert!(!root.path().join("deployments").exists());
    }

    #[test]
    fn missing_deployment_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), Arc::new(ScriptedRunner::new()));
        let err = open_deployment(&ctx, &mut Registry::builtin(), "nope", false)
            .err()
            .unwrap();
        assert!(matches!(err, GravitonError::DeploymentNotFound(_)));
    }

    #[test]
    fn concurrent_mutation_is_refused() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), Arc::new(ScriptedRunner::new()));
        let mut registry = Registry::builtin();
        let held = create_deployment(&ctx, registry.get_mut("aws").unwrap(), &request("demo")).unwrap();

        let err = open_deployment(&ctx, &mut registry, "demo", true).err().unwrap();
        assert!(err.to_string().contains("locked"));
        // Read-only access does not take the lock.
        open_deployment(&ctx, &mut registry, "demo", false).unwrap();

        drop(held);
        open_deployment(&ctx, &mut registry, "demo", true).unwrap();
    }

    #[tokio::test]
    async fn launch_is_resumable() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(root.path(), runner.clone());
        let mut registry = Registry::builtin();
        let req = launch_request(root.path(), "demo");

        let loaded = launch(&ctx, &mut registry, "aws", &req).await.unwrap();
        assert!(loaded.deployment.volume_exists());
        assert!(loaded.deployment.instance_exists());
        assert_eq!(applies(&runner), 3);
        drop(loaded);

        launch(&ctx, &mut registry, "aws", &req).await.unwrap();
        assert_eq!(applies(&runner), 3);

        let names = list(&ctx).unwrap();
        assert_eq!(names, vec![("demo".to_string(), DeploymentState::ClusterUp)]);
    }

    #[tokio::test]
    async fn launch_reports_unhealthy_cluster() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context_with(root.path(), Arc::new(ScriptedRunner::new()), "false");
        let mut registry = Registry::builtin();
        let mut req = launch_request(root.path(), "demo");
        req.wait = Some(0);

        let err = launch(&ctx, &mut registry, "aws", &req).await.err().unwrap();
        assert!(matches!(err, GravitonError::Timeout { .. }));
        // The cluster stays up for inspection.
        assert!(instance_var_file(&root.path().join("deployments/demo")).exists());
    }

    #[tokio::test]
    async fn destroy_walks_down() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let ctx = context(root.path(), runner.clone());
        let mut registry = Registry::builtin();
        drop(launch(&ctx, &mut registry, "aws", &launch_request(root.path(), "demo")).await.unwrap());

        let loaded = open_deployment(&ctx, &mut registry, "demo", true).unwrap();
        destroy_deployment(&ctx, loaded, false).await.unwrap();

        let destroys: Vec<_> = runner
            .calls()
            .into_iter()
            .filter(|c| c.args.first().map(String::as_str) == Some("destroy"))
            .filter_map(|c| c.cwd)
            .collect();
        assert_eq!(destroys.len(), 2);
        assert!(destroys[0].ends_with("instance"));
        assert!(destroys[1].ends_with("volumes"));
        assert!(!root.path().join("deployments/demo").exists());
    }

    #[tokio::test]
    async fn destroy_failure_keeps_directory_unless_forced() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new().on("destroy", ScriptedResponse::failing(1, &["Error: throttled"])));
        let ctx = context(root.path(), runner);
        let mut registry = Registry::builtin();
        drop(launch(&ctx, &mut registry, "aws", &launch_request(root.path(), "demo")).await.unwrap());
        let dep = root.path().join("deployments/demo");

        let loaded = open_deployment(&ctx, &mut registry, "demo", true).unwrap();
        let err = destroy_deployment(&ctx, loaded, false).await.unwrap_err();
        assert!(matches!(err, GravitonError::Subprocess { .. }));
        assert!(instance_var_file(&dep).exists());

        let loaded = open_deployment(&ctx, &mut registry, "demo", true).unwrap();
        destroy_deployment(&ctx, loaded, true).await.unwrap();
        assert!(!dep.exists());
    }

    #[tokio::test]
    async fn status_parses_outputs_and_writes_file() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new().on_in("output", "instance", ScriptedResponse::ok(&[INSTANCE_OUTPUTS])),
        );
        let ctx = context_with(root.path(), runner, "true");
        let mut registry = Registry::builtin();
        drop(launch(&ctx, &mut registry, "aws", &launch_request(root.path(), "demo")).await.unwrap());

        let loaded = open_deployment(&ctx, &mut registry, "demo", false).unwrap();
        let out = root.path().join("status.json");
        let sd = full_status(&ctx, &loaded, true, Some(&out)).await.unwrap();

        assert_eq!(sd.stardog_url, "http://s.example:5821");
        assert_eq!(sd.ssh_host, "b.example");
        assert_eq!(sd.instance_description.zookeeper_nodes, vec!["z1", "z2", "z3"]);
        assert!(sd.healthy);

        let written: StardogDescription = read_json(&out).unwrap();
        assert_eq!(written, sd);
    }

    #[tokio::test]
    async fn client_runs_admin_through_bastion() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(
            ScriptedRunner::new()
                .on_in("output", "instance", ScriptedResponse::ok(&[INSTANCE_OUTPUTS]))
                .on("-t", ScriptedResponse::ok(&["Cluster: 3 nodes"])),
        );
        let ctx = context(root.path(), runner.clone());
        let mut registry = Registry::builtin();
        drop(launch(&ctx, &mut registry, "aws", &launch_request(root.path(), "demo")).await.unwrap());

        let loaded = open_deployment(&ctx, &mut registry, "demo", false).unwrap();
        run_client(&ctx, &loaded, &["db".to_string(), "list".to_string()]).await.unwrap();

        let call = runner.calls().into_iter().last().unwrap();
        assert_eq!(call.program, PathBuf::from("/usr/bin/ssh"));
        let tail: Vec<&str> = call.args.iter().rev().take(6).rev().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec!["sudo", ADMIN_CLIENT, "--server", "http://si.example:5821", "db", "list"]
        );
    }

    #[tokio::test]
    async fn ssh_needs_a_running_instance() {
        let root = tempfile::tempdir().unwrap();
        let ctx = context(root.path(), Arc::new(ScriptedRunner::new()));
        let mut registry = Registry::builtin();
        drop(create_deployment(&ctx, registry.get_mut("aws").unwrap(), &request("demo")).unwrap());

        let loaded = open_deployment(&ctx, &mut registry, "demo", false).unwrap();
        let err = run_ssh(&ctx, &loaded).await.unwrap_err();
        assert!(matches!(err, GravitonError::Precondition(_)));
    }
}
