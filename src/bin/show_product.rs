use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use listing_scraper::config;
use listing_scraper::db;

#[derive(Parser, Debug)]
#[command(about = "Print stored products as JSON")]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Product ids to print
    #[arg(required = true)]
    ids: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    println!("{} products stored", db::count_products(&pool).await?);

    let mut missing = Vec::new();
    for id in &args.ids {
        match db::get_product(&pool, id).await? {
            Some(product) => println!("{}", serde_json::to_string_pretty(&product)?),
            None => missing.push(id.as_str()),
        }
    }
    if !missing.is_empty() {
        bail!("not found: {}", missing.join(", "));
    }
    Ok(())
}
