use std::path::Path;

use graviton_core::AppContext;

use crate::lifecycle::{self, LaunchRequest, NewDeployment, open_deployment};
use crate::registry::Registry;

pub fn new(ctx: &AppContext, registry: &mut Registry, cloud: &str, req: &NewDeployment) -> anyhow::Result<()> {
    let plugin = registry.get_mut(cloud)?;
    lifecycle::create_deployment(ctx, plugin, req)?;
    Ok(())
}

pub fn list(ctx: &AppContext) -> anyhow::Result<()> {
    let deployments = lifecycle::list(ctx)?;
    if deployments.is_empty() {
        ctx.console().say(1, "No deployments.");
    }
    for (name, state) in deployments {
        ctx.console().say(1, format!("{name:<24} {}", state.label()));
    }
    Ok(())
}

pub async fn status(
    ctx: &AppContext,
    registry: &mut Registry,
    name: &str,
    internal: bool,
    out_file: Option<&Path>,
) -> anyhow::Result<()> {
    let loaded = open_deployment(ctx, registry, name, false)?;
    lifecycle::full_status(ctx, &loaded, internal, out_file).await?;
    Ok(())
}

pub async fn destroy(ctx: &AppContext, registry: &mut Registry, name: &str, force: bool) -> anyhow::Result<()> {
    let loaded = open_deployment(ctx, registry, name, true)?;
    lifecycle::destroy_deployment(ctx, loaded, force).await?;
    Ok(())
}

pub async fn ssh(ctx: &AppContext, registry: &mut Registry, name: &str) -> anyhow::Result<()> {
    let loaded = open_deployment(ctx, registry, name, false)?;
    lifecycle::run_ssh(ctx, &loaded).await?;
    Ok(())
}

pub async fn client(ctx: &AppContext, registry: &mut Registry, name: &str, args: &[String]) -> anyhow::Result<()> {
    let loaded = open_deployment(ctx, registry, name, false)?;
    lifecycle::run_client(ctx, &loaded, args).await?;
    Ok(())
}

pub async fn launch(ctx: &AppContext, registry: &mut Registry, cloud: &str, req: &LaunchRequest) -> anyhow::Result<()> {
    let loaded = lifecycle::launch(ctx, registry, cloud, req).await?;
    ctx.console()
        .success(format!("The deployment {} is up.", loaded.name()));
    Ok(())
}
