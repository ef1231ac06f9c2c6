//! CLI argument parsing with subcommand architecture.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "reqscope",
    version,
    about = "Request-scoped logging context demo server"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the example server (default when no subcommand is given)
    Run(RunArgs),
    /// Validate the config file and list the context variables its log format uses
    Check(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Path to config file
    #[arg(short, long, default_value = "config.yaml", env = "REQSCOPE_CONFIG")]
    pub config: String,
}

impl Default for ConfigArgs {
    fn default() -> Self {
        Self {
            config: "config.yaml".to_string(),
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Listen host
    #[arg(long, env = "REQSCOPE_HOST")]
    pub host: Option<String>,

    /// Listen port
    #[arg(long, env = "REQSCOPE_PORT")]
    pub port: Option<u16>,

    /// Log level (overrides config)
    #[arg(long, env = "REQSCOPE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Mount prefix of the application, e.g. `/app` (overrides config)
    #[arg(long, env = "REQSCOPE_SCRIPT_NAME")]
    pub script_name: Option<String>,
}
