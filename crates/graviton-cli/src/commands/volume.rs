use std::path::Path;

use graviton_core::AppContext;

use crate::lifecycle::open_deployment;
use crate::registry::Registry;

pub async fn new(
    ctx: &AppContext,
    registry: &mut Registry,
    name: &str,
    license: &Path,
    size_gb: u32,
    cluster_size: u32,
) -> anyhow::Result<()> {
    let loaded = open_deployment(ctx, registry, name, true)?;
    loaded
        .deployment
        .create_volume_set(license, size_gb, cluster_size)
        .await?;
    Ok(())
}

pub async fn destroy(ctx: &AppContext, registry: &mut Registry, name: &str) -> anyhow::Result<()> {
    let loaded = open_deployment(ctx, registry, name, true)?;
    loaded.deployment.delete_volume_set().await?;
    Ok(())
}

pub async fn status(ctx: &AppContext, registry: &mut Registry, name: &str) -> anyhow::Result<()> {
    let loaded = open_deployment(ctx, registry, name, false)?;
    let status = loaded.deployment.status_volume_set().await?;
    if status.volume_ids.is_empty() {
        ctx.console().say(1, "No volumes reported.");
    }
    Ok(())
}
