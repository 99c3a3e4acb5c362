//! fanrelay standalone binary.

use clap::Parser;
use fanrelay::{cli, Args};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    cli::run(args).await?;
    Ok(())
}
