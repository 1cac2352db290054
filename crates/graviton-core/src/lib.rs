//! graviton-core: shared machinery for the stardog-graviton orchestrator.
//!
//! A deployment is a directory of state driving two IaC sub-resources
//! (a volume set and an instance set). This crate holds everything that
//! is independent of the cloud provider:
//!
//! ```text
//! AppContext (env, tools, runner, input, console, cancel)
//!   ├── Iac ──► CommandRunner ──► external engine (apply/destroy/output)
//!   │            └── LineScanner / Progress per stdout line
//!   ├── varfile (atomic 0600 JSON) and OutputDocument parsing
//!   ├── assets (embedded template staging)
//!   └── Deployment trait + DeploymentState machine
//! ```

pub mod assets;
pub mod config;
pub mod console;
pub mod context;
pub mod deployment;
pub mod error;
pub mod iac;
pub mod lock;
pub mod outputs;
pub mod prompt;
pub mod runner;
pub mod varfile;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::GravitonConfig;
pub use console::{Console, Progress, Spinner};
pub use context::{AppContext, EnvSnapshot, ToolResolver};
pub use deployment::{
    BaseDeployment, Deployment, DeploymentState, InstanceStatus, LifecycleEvent,
    StardogDescription, VolumeStatus,
};
pub use error::{GravitonError, Result};
pub use iac::Iac;
pub use lock::DeploymentLock;
pub use outputs::OutputDocument;
pub use prompt::InputResolver;
pub use runner::{CommandRunner, CommandSpec, LineScanner, ProcessRunner, RunOutput, ScanResult};
