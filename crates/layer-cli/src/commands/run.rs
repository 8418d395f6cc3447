use anyhow::Result;

use super::{Context, report};

pub async fn handle(ctx: &Context) -> Result<()> {
    let pipeline = layer_engine::full_pipeline(&ctx.config)?;
    let outcome = pipeline.run(&ctx.cancel).await?;
    report(ctx, &outcome)?;
    outcome.into_result()?;
    Ok(())
}
