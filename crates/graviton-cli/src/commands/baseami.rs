use std::path::Path;

use anyhow::Context;
use graviton_core::AppContext;

use crate::registry::Registry;

pub async fn build(
    ctx: &AppContext,
    registry: &Registry,
    cloud: &str,
    release: &Path,
    version: &str,
) -> anyhow::Result<()> {
    semver::Version::parse(version).with_context(|| format!("invalid version {version:?}"))?;
    let plugin = registry.get(cloud)?;
    let image = plugin.build_base_image(ctx, release, version).await?;
    ctx.console().say(1, format!("Base image: {image}"));
    Ok(())
}
