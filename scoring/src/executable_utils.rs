use clap::Parser;
use common::config::Config;
use std::error::Error;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "target/debug/config/total_config.yaml")]
    pub config: String,

    /// JSON file with the submissions to re-score
    #[arg(short, long)]
    pub input: Option<String>,
}

/// `RUST_LOG` wins over the configured level when set.
pub fn env_filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.processor.log_level))
}

pub fn initialize_executable() -> Result<(Config, Args), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();
    let config = Config::load(&args.config)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config))
        .try_init()?;

    tracing::info!(
        config = %args.config,
        project = %config.common.project_name,
        version = %config.common.analysis_version,
        "Loaded configuration"
    );
    Ok((config, args))
}
