use anyhow::Context;
use apphive::{Engine, EngineConfig};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-tenant application server", long_about = None)]
struct Args {
    /// Path to the engine config JSON.
    #[arg(short, long, default_value = "engine.json")]
    config: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = EngineConfig::from_file(&args.config)
        .with_context(|| format!("loading engine config {}", args.config.display()))?;
    let engine = Engine::builder(config)
        .build()
        .context("building the engine")?;
    engine.start();
    let handle = engine.serve().context("binding the listener")?;
    eprintln!("listening on {}", handle.addr());
    let _ = handle.join();
    Ok(())
}
