use graviton_core::AppContext;

use crate::lifecycle::{self, open_deployment};
use crate::registry::Registry;

pub async fn new(
    ctx: &AppContext,
    registry: &mut Registry,
    name: &str,
    zookeeper_size: u32,
    http_mask: &str,
    wait: Option<u64>,
) -> anyhow::Result<()> {
    let loaded = open_deployment(ctx, registry, name, true)?;
    lifecycle::create_instance(ctx, &loaded, zookeeper_size, http_mask, wait).await?;
    Ok(())
}

pub async fn destroy(ctx: &AppContext, registry: &mut Registry, name: &str) -> anyhow::Result<()> {
    let loaded = open_deployment(ctx, registry, name, true)?;
    loaded.deployment.delete_instance().await?;
    Ok(())
}

pub async fn status(ctx: &AppContext, registry: &mut Registry, name: &str) -> anyhow::Result<()> {
    let loaded = open_deployment(ctx, registry, name, false)?;
    let status = loaded.deployment.status_instance().await?;
    for (i, node) in status.zookeeper_nodes.iter().enumerate() {
        ctx.console().say(2, format!("Zookeeper {i}: {node}"));
    }
    Ok(())
}
