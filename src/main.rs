mod app;
mod cli;

use clap::Parser;
use cli::{Cli, Command, ConfigArgs, RunArgs};
use reqscope_core::config::Config;

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Command::Run(RunArgs::default()));

    match command {
        Command::Run(args) => cmd_run(args),
        Command::Check(args) => cmd_check(args),
    }
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let loaded = Config::load(&args.config.config);
    let mut config = loaded.as_ref().cloned().unwrap_or_default();

    // CLI overrides
    if let Some(ref host) = args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(ref level) = args.log_level {
        config.logging.level = level.clone();
    }
    if let Some(ref script_name) = args.script_name {
        config.script_name = script_name.trim_end_matches('/').to_string();
    }

    let _guard = reqscope_core::lifecycle::logging::init_logging(&config.logging)?;
    if let Err(e) = loaded {
        tracing::warn!(
            "Failed to load config from '{}': {e:#}, using defaults",
            args.config.config
        );
    }

    // Build and run on a multi-thread runtime
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let application = app::Application::build(config)?;
        application.serve().await
    })
}

fn cmd_check(args: ConfigArgs) -> anyhow::Result<()> {
    let config = Config::load(&args.config)?;
    let template = config.logging.template()?;

    println!("{}: ok", args.config);
    println!("log format: {}", config.logging.format);
    let vars: Vec<&str> = template.context_vars().iter().map(|v| v.as_str()).collect();
    if vars.is_empty() {
        println!("context variables: none");
    } else {
        println!("context variables: {}", vars.join(", "));
    }
    Ok(())
}
