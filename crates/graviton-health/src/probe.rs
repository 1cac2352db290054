//! Health probe logic.
//!
//! External probes GET the admin health endpoint directly. Internal
//! probes hop through the bastion with ssh and run curl against the
//! internal load balancer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use graviton_core::context::SSH_TOOL;
use graviton_core::runner::{CommandRunner, CommandSpec};
use graviton_core::{AppContext, BaseDeployment, Deployment, EnvSnapshot, Result, ToolResolver};
use http::{StatusCode, Uri};
use tracing::{debug, info, warn};

/// Non-empty puts probes in unit-test mode.
pub const UNIT_TEST_ENV: &str = "STARDOG_GRAVITON_UNIT_TEST";

/// Health reported in unit-test mode; unset means healthy.
pub const HEALTHY_ENV: &str = "STARDOG_GRAVITON_HEALTHY";

pub const HEALTHCHECK_PATH: &str = "/admin/healthcheck";

/// Login user on the appliance images.
pub const SSH_USER: &str = "ubuntu";

/// How health is decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Probe the cluster.
    Live,
    /// Unit-test mode: report a constant.
    Forced(bool),
}

impl ProbeMode {
    pub fn from_env(env: &EnvSnapshot) -> Self {
        if env.non_empty(UNIT_TEST_ENV).is_none() {
            return ProbeMode::Live;
        }
        match env.non_empty(HEALTHY_ENV) {
            None => ProbeMode::Forced(true),
            // Unparseable values count as unhealthy.
            Some(value) => ProbeMode::Forced(parse_bool(value).unwrap_or(false)),
        }
    }

    pub fn is_unit_test(&self) -> bool {
        matches!(self, ProbeMode::Forced(_))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

/// GET `<base_url>/admin/healthcheck`. Healthy iff the status is exactly
/// 200. Connection errors are unhealthy.
///
/// No deadline is applied; a hung endpoint blocks until the transport
/// gives up.
pub async fn http_probe(base_url: &str) -> bool {
    let url = format!("{base_url}{HEALTHCHECK_PATH}");
    let uri: Uri = match url.parse() {
        Ok(uri) => uri,
        Err(e) => {
            debug!(error = %e, %url, "health probe url invalid");
            return false;
        }
    };
    let Some(authority) = uri.authority().cloned() else {
        debug!(%url, "health probe url has no host");
        return false;
    };
    let address = match authority.port_u16() {
        Some(_) => authority.to_string(),
        None => format!("{}:80", authority.host()),
    };

    let stream = match tokio::net::TcpStream::connect(&address).await {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, %url, "health probe connection failed");
            return false;
        }
    };

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, %url, "health probe handshake failed");
            return false;
        }
    };

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = match http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", authority.as_str())
        .header("user-agent", "stardog-graviton")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
    {
        Ok(req) => req,
        Err(e) => {
            debug!(error = %e, %url, "health probe request invalid");
            return false;
        }
    };

    match sender.send_request(req).await {
        Ok(resp) => {
            debug!(status = %resp.status(), %url, "health probe answered");
            resp.status() == StatusCode::OK
        }
        Err(e) => {
            debug!(error = %e, %url, "health probe request failed");
            false
        }
    }
}

/// `ssh -t -t -i <key> -o StrictHostKeyChecking=no
/// -o UserKnownHostsFile=/dev/null ubuntu@<bastion>`; append the remote
/// command as further args.
pub fn ssh_command(ssh: &Path, private_key: &Path, bastion: &str) -> CommandSpec {
    CommandSpec::new(ssh)
        .args(["-t", "-t"])
        .arg("-i")
        .arg(private_key.display().to_string())
        .args(["-o", "StrictHostKeyChecking=no"])
        .args(["-o", "UserKnownHostsFile=/dev/null"])
        .arg(format!("{SSH_USER}@{bastion}"))
}

/// Resolve ssh and build the base command for a deployment's bastion.
pub fn bastion_command(tools: &ToolResolver, private_key: &Path, bastion: &str) -> Result<CommandSpec> {
    let ssh = tools.resolve(SSH_TOOL)?;
    debug!(bastion, "building ssh command");
    Ok(ssh_command(&ssh, private_key, bastion))
}

/// Run curl on the bastion against the internal URL. Healthy iff curl
/// prints exactly `200`.
pub async fn internal_probe(runner: &dyn CommandRunner, ssh: CommandSpec, internal_url: &str) -> bool {
    let cmd = ssh
        .arg("/usr/bin/curl")
        .args(["-s", "-o", "/dev/null", "-w", "%{http_code}"])
        .arg(format!("{internal_url}{HEALTHCHECK_PATH}"));
    info!(command = %cmd.display(), "running the remote health checker");
    match runner.run(&cmd, None, None).await {
        Ok(out) => out.stdout() == "200",
        Err(e) => {
            debug!(error = %e, "remote health check failed");
            false
        }
    }
}

/// Anything that can answer "is the cluster healthy right now".
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn is_healthy(&self, internal: bool) -> Result<bool>;
}

/// Health of a loaded deployment.
pub struct DeploymentHealth<'a> {
    deployment: &'a dyn Deployment,
    mode: ProbeMode,
    tools: ToolResolver,
    runner: Arc<dyn CommandRunner>,
    private_key: PathBuf,
}

impl<'a> DeploymentHealth<'a> {
    pub fn new(ctx: &AppContext, base: &BaseDeployment, deployment: &'a dyn Deployment) -> Self {
        Self {
            deployment,
            mode: ProbeMode::from_env(ctx.env()),
            tools: ctx.tools().clone(),
            runner: ctx.runner(),
            private_key: base.private_key.clone(),
        }
    }

    pub fn mode(&self) -> ProbeMode {
        self.mode
    }
}

#[async_trait]
impl HealthCheck for DeploymentHealth<'_> {
    /// A failing status lookup is reported as unhealthy, unless it was
    /// interrupted. Failing to build the ssh command is an error.
    async fn is_healthy(&self, internal: bool) -> Result<bool> {
        let sd = match self.deployment.full_status().await {
            Ok(sd) => sd,
            Err(e) if e.is_canceled() => return Err(e),
            Err(e) => {
                warn!(deployment = self.deployment.name(), error = %e, "status failure");
                return Ok(false);
            }
        };
        if let ProbeMode::Forced(healthy) = self.mode {
            return Ok(healthy);
        }

        if internal {
            let ssh = bastion_command(&self.tools, &self.private_key, &sd.ssh_host)?;
            Ok(internal_probe(self.runner.as_ref(), ssh, &sd.stardog_internal_url).await)
        } else {
            debug!(url = %sd.stardog_url, "checking external health");
            Ok(http_probe(&sd.stardog_url).await)
        }
    }
}
