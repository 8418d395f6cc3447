use anyhow::Result;
use layer_config::{Config, PROJECT_FILE};

pub fn handle(dependencies: Vec<String>) -> Result<()> {
    let current_dir = std::env::current_dir()?;
    let path = current_dir.join(PROJECT_FILE);

    if path.exists() {
        anyhow::bail!("{} already exists in current directory", PROJECT_FILE);
    }

    let mut config = Config::default();
    config.build.dependencies = dependencies;
    config.save(&path)?;

    println!("✓ Created {}", PROJECT_FILE);
    if config.build.dependencies.is_empty() {
        println!("  Add packages to [build] dependencies, then run 'layer run'");
    } else {
        println!("  {} dependencies declared", config.build.dependencies.len());
    }
    println!("  Set [publish] bucket or LAYER_BUCKET before pushing");

    Ok(())
}
