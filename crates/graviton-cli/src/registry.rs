//! Cloud plugins known to this binary.

use std::path::Path;

use clap::{ArgMatches, Command};
use graviton_aws::AwsPlugin;
use graviton_core::{AppContext, BaseDeployment, Deployment, GravitonConfig, GravitonError, Result};

/// A cloud plugin. The set is closed: every plugin is compiled in.
#[derive(Debug, Clone)]
pub enum Plugin {
    Aws(AwsPlugin),
}

impl Plugin {
    pub fn name(&self) -> &'static str {
        match self {
            Plugin::Aws(p) => p.name(),
        }
    }

    pub fn load_defaults(&mut self, table: Option<&toml::Value>) -> Result<()> {
        match self {
            Plugin::Aws(p) => p.load_defaults(table),
        }
    }

    pub fn register_flags(&self, cli: Command) -> Command {
        match self {
            Plugin::Aws(p) => p.register_flags(cli),
        }
    }

    pub fn apply_matches(&mut self, sub: &str, matches: &ArgMatches) {
        match self {
            Plugin::Aws(p) => p.apply_matches(sub, matches),
        }
    }

    /// Validate the environment, then load or configure a deployment.
    pub fn load(
        &mut self,
        ctx: &AppContext,
        base: &mut BaseDeployment,
        new: bool,
    ) -> Result<Box<dyn Deployment>> {
        match self {
            Plugin::Aws(p) => Ok(Box::new(p.load(ctx, base, new)?)),
        }
    }

    pub async fn build_base_image(&self, ctx: &AppContext, release: &Path, version: &str) -> Result<String> {
        match self {
            Plugin::Aws(p) => p.build_base_ami(ctx, release, version).await,
        }
    }
}

/// Write-once at startup, read-only afterwards.
pub struct Registry {
    plugins: Vec<Plugin>,
}

impl Registry {
    pub fn builtin() -> Self {
        Self {
            plugins: vec![Plugin::Aws(AwsPlugin::default())],
        }
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(Plugin::name).collect()
    }

    pub fn get(&self, name: &str) -> Result<&Plugin> {
        self.plugins
            .iter()
            .find(|p| p.name() == name)
            .ok_or_else(|| GravitonError::UnknownPlugin(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Plugin> {
        self.plugins
            .iter_mut()
            .find(|p| p.name() == name)
            .ok_or_else(|| GravitonError::UnknownPlugin(name.to_string()))
    }

    /// Overlay each plugin's table from the user defaults file.
    pub fn load_defaults(&mut self, config: &GravitonConfig) -> Result<()> {
        for plugin in &mut self.plugins {
            let table = config.plugin_defaults(plugin.name());
            plugin.load_defaults(table)?;
        }
        Ok(())
    }

    pub fn apply_matches(&mut self, sub: &str, matches: &ArgMatches) {
        for plugin in &mut self.plugins {
            plugin.apply_matches(sub, matches);
        }
    }
}
