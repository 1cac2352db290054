//! The `aws` plugin: option defaults, flag registration and the
//! deployment loader.

use std::fs;
use std::path::Path;

use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgMatches, Command};
use graviton_core::assets::place_asset;
use graviton_core::context::SSH_TOOL;
use graviton_core::deployment::IAC_ASSET_PATH;
use graviton_core::iac::IAC_TOOL;
use graviton_core::varfile::write_json;
use graviton_core::{AppContext, BaseDeployment, GravitonError, Iac, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::ami::{AmiBuild, AmiMap, IMAGE_BUILDER_TOOL, build_base_ami};
use crate::deployment::{AwsDeployment, AwsDeploymentDescription};
use crate::regions::{DEFAULT_REGION, VALID_REGIONS, is_valid_region};

pub const PLUGIN_NAME: &str = "aws";

const REQUIRED_ENV: &[&str] = &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"];

/// Instance type `new` uses for coordinator and appliance VMs unless the
/// user configured one.
const NEW_DEPLOYMENT_INSTANCE_TYPE: &str = "m3.large";

/// Instance type of the temporary VM that builds a base image.
const IMAGE_BUILD_INSTANCE_TYPE: &str = "t2.small";

/// Subcommands that carry the full set of deployment flags.
const DEPLOYMENT_COMMANDS: &[&str] = &["new", "launch"];

const BASEAMI_COMMAND: &str = "baseami";

/// `[plugins.aws]` in `defaults.toml`. Every field is optional and
/// overlays the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsOptions {
    pub region: Option<String>,
    pub ami_id: Option<String>,
    pub aws_key_name: Option<String>,
    pub zk_instance_type: Option<String>,
    pub sd_instance_type: Option<String>,
    pub bastion_instance_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsPlugin {
    pub region: String,
    pub ami_id: String,
    pub aws_key_name: String,
    pub zk_instance_type: String,
    pub sd_instance_type: String,
    pub bastion_instance_type: String,
    user: AwsOptions,
}

impl Default for AwsPlugin {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            ami_id: String::new(),
            aws_key_name: String::new(),
            zk_instance_type: "t2.small".to_string(),
            sd_instance_type: "m3.medium".to_string(),
            bastion_instance_type: "t2.small".to_string(),
            user: AwsOptions::default(),
        }
    }
}

impl AwsPlugin {
    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    /// Overlay the user's `[plugins.aws]` table onto the defaults.
    pub fn load_defaults(&mut self, table: Option<&toml::Value>) -> Result<()> {
        let Some(table) = table else {
            return Ok(());
        };
        let user: AwsOptions = table.clone().try_into().map_err(|e| {
            GravitonError::precondition(format!("invalid [plugins.{PLUGIN_NAME}] options: {e}"))
        })?;

        let overlay = [
            (&user.region, &mut self.region),
            (&user.ami_id, &mut self.ami_id),
            (&user.aws_key_name, &mut self.aws_key_name),
            (&user.zk_instance_type, &mut self.zk_instance_type),
            (&user.sd_instance_type, &mut self.sd_instance_type),
            (&user.bastion_instance_type, &mut self.bastion_instance_type),
        ];
        for (value, field) in overlay {
            if let Some(value) = value {
                *field = value.clone();
            }
        }
        debug!(?user, "aws defaults loaded");
        self.user = user;
        Ok(())
    }

    /// Add the plugin's flags to the subcommands that create or build.
    pub fn register_flags(&self, mut cli: Command) -> Command {
        for &name in DEPLOYMENT_COMMANDS {
            let (zk, sd) = self.instance_type_defaults(name);
            cli = cli.mut_subcommand(name, |sub| {
                sub.arg(region_arg(&self.region))
                    .arg(
                        Arg::new("aws-key-name")
                            .long("aws-key-name")
                            .help(with_default("The AWS ssh key name", &self.aws_key_name)),
                    )
                    .arg(
                        Arg::new("ami-id")
                            .long("ami-id")
                            .help(with_default("The base AMI of the appliance", &self.ami_id)),
                    )
                    .arg(
                        Arg::new("zk-instance-type")
                            .long("zk-instance-type")
                            .help(with_default("The instance type to use for zookeeper VMs", &zk)),
                    )
                    .arg(
                        Arg::new("sd-instance-type")
                            .long("sd-instance-type")
                            .help(with_default("The instance type to use for stardog VMs", &sd)),
                    )
                    .arg(
                        Arg::new("bastion-instance-type")
                            .long("bastion-instance-type")
                            .help(with_default(
                                "The instance type to use for the bastion VM",
                                &self.bastion_instance_type,
                            )),
                    )
            });
        }
        cli.mut_subcommand(BASEAMI_COMMAND, |sub| sub.arg(region_arg(&self.region)))
    }

    /// Apply the per-command defaults, then any flags given on `sub`.
    pub fn apply_matches(&mut self, sub: &str, matches: &ArgMatches) {
        let (zk, sd) = self.instance_type_defaults(sub);
        self.zk_instance_type = zk;
        self.sd_instance_type = sd;

        let flags = [
            ("region", &mut self.region),
            ("aws-key-name", &mut self.aws_key_name),
            ("ami-id", &mut self.ami_id),
            ("zk-instance-type", &mut self.zk_instance_type),
            ("sd-instance-type", &mut self.sd_instance_type),
            ("bastion-instance-type", &mut self.bastion_instance_type),
        ];
        for (id, field) in flags {
            // Not every subcommand defines every flag.
            if let Ok(Some(value)) = matches.try_get_one::<String>(id) {
                *field = value.clone();
            }
        }
    }

    fn instance_type_defaults(&self, sub: &str) -> (String, String) {
        if sub != "new" {
            return (self.zk_instance_type.clone(), self.sd_instance_type.clone());
        }
        let zk = match &self.user.zk_instance_type {
            Some(t) => t.clone(),
            None => NEW_DEPLOYMENT_INSTANCE_TYPE.to_string(),
        };
        let sd = match &self.user.sd_instance_type {
            Some(t) => t.clone(),
            None => NEW_DEPLOYMENT_INSTANCE_TYPE.to_string(),
        };
        (zk, sd)
    }

    /// Load an existing deployment, or configure a new one.
    ///
    /// A new deployment resolves its missing options interactively,
    /// stages the IaC templates and writes `config.json`. The caller owns
    /// the deployment directory and removes it if this fails.
    pub fn load(&mut self, ctx: &AppContext, base: &mut BaseDeployment, new: bool) -> Result<AwsDeployment> {
        ctx.env().require(REQUIRED_ENV)?;
        let iac_program = ctx.tools().resolve(IAC_TOOL)?;
        ctx.tools().resolve(IMAGE_BUILDER_TOOL)?;
        ctx.tools().resolve(SSH_TOOL)?;

        let directory = ctx.deployment_dir(&base.name);
        let description = if new {
            let description = self.describe_new(ctx, base, &directory)?;
            base.cloud_opts = serde_json::to_value(&description)?;
            write_json(&base.config_path(), base)?;
            info!(deployment = %base.name, region = %description.region, "deployment configured");
            description
        } else {
            serde_json::from_value(base.cloud_opts.clone())?
        };

        Ok(AwsDeployment::new(
            &base.name,
            &base.version,
            &directory,
            description,
            Iac::new(iac_program, ctx.runner()),
            *ctx.console(),
        ))
    }

    fn describe_new(
        &mut self,
        ctx: &AppContext,
        base: &mut BaseDeployment,
        directory: &Path,
    ) -> Result<AwsDeploymentDescription> {
        let input = ctx.input();
        let console = ctx.console();

        // The region decides which base image applies, so it comes first.
        if self.region.is_empty() {
            self.region = input.ask_string("Region", DEFAULT_REGION)?;
        }
        if !is_valid_region(&self.region) {
            return Err(GravitonError::precondition(format!(
                "{} is not a valid region; use one of {}",
                self.region,
                VALID_REGIONS.join(", ")
            )));
        }

        if self.ami_id.is_empty() {
            let amis = AmiMap::load(ctx.config_dir())?;
            self.ami_id = match amis.get(&self.region) {
                Some(ami) => ami.to_string(),
                None => {
                    console.say(
                        1,
                        "A base AMI is required for launching the virtual appliance. \
                         If you do not know this value you can build a new one with the 'baseami' command.",
                    );
                    input.ask_string("Stardog base AMI", "")?
                }
            };
            if self.ami_id.is_empty() {
                return Err(GravitonError::precondition(
                    "an AMI is required; see the 'baseami' subcommand",
                ));
            }
        }

        if self.aws_key_name.is_empty() {
            self.aws_key_name = input.ask_string("EC2 keyname", "default")?;
        }

        if base.private_key.as_os_str().is_empty() {
            base.private_key = input.ask_string("Private key path", "")?.into();
            if base.private_key.as_os_str().is_empty() {
                return Err(GravitonError::precondition(
                    "a path to a private key must be provided",
                ));
            }
        }

        let staged = place_asset(crate::assets::AWS_ASSETS, directory, IAC_ASSET_PATH, false)?;
        console.say(2, format!("IaC configuration extracted to {}", staged.display()));

        let custom_stardog_properties = match &base.custom_props_file {
            Some(path) => fs::read_to_string(path).map_err(|e| {
                GravitonError::precondition(format!(
                    "cannot read the custom properties file {}: {e}",
                    path.display()
                ))
            })?,
            None => String::new(),
        };

        Ok(AwsDeploymentDescription {
            region: self.region.clone(),
            ami_id: self.ami_id.clone(),
            aws_key_name: self.aws_key_name.clone(),
            zk_instance_type: self.zk_instance_type.clone(),
            sd_instance_type: self.sd_instance_type.clone(),
            bastion_instance_type: self.bastion_instance_type.clone(),
            private_key_path: base.private_key.display().to_string(),
            custom_stardog_properties,
            http_mask: String::new(),
        })
    }

    /// Build a base image for the selected region and record it.
    pub async fn build_base_ami(&self, ctx: &AppContext, release_zip: &Path, version: &str) -> Result<String> {
        ctx.env().require(REQUIRED_ENV)?;
        let packer = ctx.tools().resolve(IMAGE_BUILDER_TOOL)?;
        if !is_valid_region(&self.region) {
            return Err(GravitonError::precondition(format!(
                "{} is not a valid region",
                self.region
            )));
        }
        let build = AmiBuild {
            region: self.region.clone(),
            version: version.to_string(),
            release_zip: release_zip.to_path_buf(),
            instance_type: IMAGE_BUILD_INSTANCE_TYPE.to_string(),
        };
        build_base_ami(ctx.runner(), ctx.console(), &packer, ctx.config_dir(), &build).await
    }
}

fn region_arg(default: &str) -> Arg {
    Arg::new("region")
        .long("region")
        .value_parser(PossibleValuesParser::new(VALID_REGIONS.iter().copied()))
        .help(with_default("The aws region to use", default))
}

fn with_default(help: &str, default: &str) -> String {
    if default.is_empty() {
        format!("{help}.")
    } else {
        format!("{help} [default: {default}].")
    }
}
