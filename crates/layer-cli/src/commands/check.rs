use anyhow::Result;

use super::{Context, report};

pub async fn handle(ctx: &Context) -> Result<()> {
    let pipeline = layer_engine::check_pipeline(&ctx.config)?;
    let outcome = pipeline.check(ctx.config.artifact(), &ctx.cancel).await?;
    report(ctx, &outcome)?;
    outcome.into_result()?;
    Ok(())
}
