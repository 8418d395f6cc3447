use anyhow::Result;

use super::{Context, report};

pub async fn handle(ctx: &Context) -> Result<()> {
    let pipeline = layer_engine::build_pipeline(&ctx.config)?;
    let outcome = pipeline.build(&ctx.cancel).await?;
    report(ctx, &outcome)
}
