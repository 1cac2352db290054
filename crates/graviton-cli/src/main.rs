use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, CommandFactory, FromArgMatches, Parser, Subcommand};
use graviton_core::context::default_config_dir;
use graviton_core::{AppContext, Console, EnvSnapshot, GravitonConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod lifecycle;
mod registry;

use lifecycle::{LaunchRequest, NewDeployment};
use registry::Registry;

#[derive(Parser)]
#[command(
    name = "stardog-graviton",
    about = "Launch and manage Stardog clusters in the cloud",
    version,
    propagate_version = true
)]
struct Cli {
    /// Print more detail (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Print nothing but errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    /// Cloud plugin for new deployments (default from defaults.toml)
    #[arg(long, global = true)]
    cloud: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure a new deployment
    New {
        name: String,
        /// Stardog version the deployment runs
        #[arg(value_name = "VERSION")]
        stardog_version: String,
        /// Private key of the cloud ssh keypair
        #[arg(long)]
        private_key: Option<PathBuf>,
        /// stardog.properties overrides for every node
        #[arg(long)]
        custom_props: Option<PathBuf>,
    },
    /// List deployments and their state
    List,
    /// Manage the data volumes of a deployment
    Volume {
        #[command(subcommand)]
        action: VolumeAction,
    },
    /// Manage the VMs of a deployment
    Instance {
        #[command(subcommand)]
        action: InstanceAction,
    },
    /// Show addresses and health of a deployment
    Status {
        name: String,
        /// Check health from inside the cluster, through the bastion
        #[arg(long)]
        internal: bool,
        /// Also write the status as JSON to this file
        #[arg(long)]
        out_file: Option<PathBuf>,
    },
    /// Destroy the instance, the volumes and the deployment
    Destroy {
        name: String,
        /// Remove the deployment even if a teardown fails
        #[arg(long)]
        force: bool,
    },
    /// Open a shell on the bastion
    Ssh { name: String },
    /// Run stardog-admin on the cluster
    Client {
        name: String,
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },
    /// Create whatever is missing and wait for a healthy cluster
    Launch {
        name: String,
        #[arg(value_name = "VERSION")]
        stardog_version: String,
        /// Stardog license file
        #[arg(long)]
        license: PathBuf,
        #[arg(long)]
        private_key: Option<PathBuf>,
        #[arg(long)]
        custom_props: Option<PathBuf>,
        /// Size of each data volume in GB
        #[arg(long, default_value_t = 10)]
        volume_size: u32,
        /// Number of Stardog nodes
        #[arg(long, default_value_t = 3)]
        cluster_size: u32,
        /// Number of zookeeper nodes
        #[arg(long, default_value_t = 3)]
        zk_size: u32,
        /// CIDR allowed to reach the load balancer
        #[arg(long, default_value = "0.0.0.0/0")]
        http_mask: String,
        /// Seconds to wait for health (default from defaults.toml)
        #[arg(long)]
        wait_timeout: Option<u64>,
        #[arg(long)]
        no_wait: bool,
    },
    /// Build a base image from a Stardog release
    Baseami {
        /// Stardog release zip
        release: PathBuf,
        #[arg(value_name = "VERSION")]
        stardog_version: String,
    },
}

#[derive(Subcommand)]
enum VolumeAction {
    /// Create the volume set
    New {
        name: String,
        license: PathBuf,
        size_gb: u32,
        cluster_size: u32,
    },
    Destroy { name: String },
    Status { name: String },
}

#[derive(Subcommand)]
enum InstanceAction {
    /// Create the VMs and wait for health
    New {
        name: String,
        zk_size: u32,
        #[arg(long, default_value = "0.0.0.0/0")]
        http_mask: String,
        #[arg(long)]
        wait_timeout: Option<u64>,
        #[arg(long)]
        no_wait: bool,
    },
    Destroy { name: String },
    Status { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stardog_graviton=info,graviton=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let env = EnvSnapshot::capture();
    let config_dir = default_config_dir(&env)?;
    let config = GravitonConfig::load(&config_dir)?;

    let mut registry = Registry::builtin();
    registry.load_defaults(&config)?;

    // The configured plugin contributes its flags before parsing.
    let mut command = Cli::command();
    if let Ok(plugin) = registry.get(&config.cloud) {
        command = plugin.register_flags(command);
    }
    let matches = command.get_matches();
    let cli = Cli::from_arg_matches(&matches)?;
    if let Some((sub, sub_matches)) = matches.subcommand() {
        registry.apply_matches(sub, sub_matches);
    }

    let console = if cli.quiet {
        Console::silent()
    } else {
        Console::new(1 + cli.verbose)
    };
    let cancel = CancellationToken::new();
    let ctx = AppContext::new(config_dir, env)
        .with_cancel(cancel.clone())
        .with_console(console);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received, canceling");
                cancel.cancel();
            }
            Err(e) => error!(error = %e, "failed to install Ctrl+C handler"),
        }
    });

    let cloud = cli.cloud.unwrap_or_else(|| config.cloud.clone());
    let wait = |no_wait: bool, timeout: Option<u64>| {
        (!no_wait).then(|| timeout.unwrap_or(config.wait_timeout))
    };

    match cli.command {
        Commands::New {
            name,
            stardog_version,
            private_key,
            custom_props,
        } => {
            let req = NewDeployment {
                name,
                version: stardog_version,
                private_key,
                custom_props,
            };
            commands::deployment::new(&ctx, &mut registry, &cloud, &req)
        }
        Commands::List => commands::deployment::list(&ctx),
        Commands::Volume { action } => match action {
            VolumeAction::New {
                name,
                license,
                size_gb,
                cluster_size,
            } => commands::volume::new(&ctx, &mut registry, &name, &license, size_gb, cluster_size).await,
            VolumeAction::Destroy { name } => commands::volume::destroy(&ctx, &mut registry, &name).await,
            VolumeAction::Status { name } => commands::volume::status(&ctx, &mut registry, &name).await,
        },
        Commands::Instance { action } => match action {
            InstanceAction::New {
                name,
                zk_size,
                http_mask,
                wait_timeout,
                no_wait,
            } => {
                let wait = wait(no_wait, wait_timeout);
                commands::instance::new(&ctx, &mut registry, &name, zk_size, &http_mask, wait).await
            }
            InstanceAction::Destroy { name } => commands::instance::destroy(&ctx, &mut registry, &name).await,
            InstanceAction::Status { name } => commands::instance::status(&ctx, &mut registry, &name).await,
        },
        Commands::Status {
            name,
            internal,
            out_file,
        } => commands::deployment::status(&ctx, &mut registry, &name, internal, out_file.as_deref()).await,
        Commands::Destroy { name, force } => commands::deployment::destroy(&ctx, &mut registry, &name, force).await,
        Commands::Ssh { name } => commands::deployment::ssh(&ctx, &mut registry, &name).await,
        Commands::Client { name, args } => commands::deployment::client(&ctx, &mut registry, &name, &args).await,
        Commands::Launch {
            name,
            stardog_version,
            license,
            private_key,
            custom_props,
            volume_size,
            cluster_size,
            zk_size,
            http_mask,
            wait_timeout,
            no_wait,
        } => {
            let req = LaunchRequest {
                deployment: NewDeployment {
                    name,
                    version: stardog_version,
                    private_key,
                    custom_props,
                },
                license,
                volume_size_gb: volume_size,
                cluster_size,
                zookeeper_size: zk_size,
                http_mask,
                wait: wait(no_wait, wait_timeout),
            };
            commands::deployment::launch(&ctx, &mut registry, &cloud, &req).await
        }
        Commands::Baseami {
            release,
            stardog_version,
        } => commands::baseami::build(&ctx, &registry, &cloud, &release, &stardog_version).await,
    }
}
