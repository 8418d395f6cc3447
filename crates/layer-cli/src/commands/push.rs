use anyhow::Result;

use super::{Context, report};

/// Publishing always runs the size check first; there is no way to skip it.
pub async fn handle(ctx: &Context) -> Result<()> {
    let pipeline = layer_engine::push_pipeline(&ctx.config)?;
    let outcome = pipeline.push(ctx.config.artifact(), &ctx.cancel).await?;
    report(ctx, &outcome)?;
    outcome.into_result()?;
    Ok(())
}
