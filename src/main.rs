use clap::Parser;
use taxonomy_tagger::{CliArgs, LoggingConfig, TaggerConfig, init_logging, run_once};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logging_config = LoggingConfig::from_env();
    let _guard = init_logging(logging_config)?;

    let cli = CliArgs::parse();
    let config = TaggerConfig::from_args(&cli)?;

    let report = run_once(config, &cli).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
