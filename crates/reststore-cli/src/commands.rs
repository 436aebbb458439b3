use anyhow::Context;
use colored::Colorize;
use reststore_server::{RestStorageServer, ServerConfig};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args),
        Command::Config(args) => cmd_config(args),
    }
}

/// Config file (or defaults) with command-line overrides applied.
fn resolve_config(settings: SettingsArgs) -> anyhow::Result<ServerConfig> {
    let mut config = match &settings.config {
        Some(path) => ServerConfig::from_toml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(root) = settings.root {
        config.root = root;
    }
    if let Some(bind) = settings.bind {
        config.bind_addr = bind;
    }
    if let Some(prefix) = settings.prefix {
        config.prefix = prefix;
    }
    if settings.confirm_collection_delete {
        config.confirm_collection_delete = true;
    }
    if let Some(strategy) = settings.path_processing_strategy {
        config.path_processing_strategy = strategy;
    }
    Ok(config)
}

fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let config = resolve_config(args.settings)?;
    let server = RestStorageServer::new(config.clone())
        .with_context(|| format!("opening storage root {}", config.root.display()))?;
    let prefix = if config.prefix.is_empty() { "/" } else { config.prefix.as_str() };
    println!(
        "{} rest-storage on {} (root: {}, prefix: {})",
        "✓".green().bold(),
        config.bind_addr.to_string().bold(),
        config.root.display(),
        prefix.cyan()
    );
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(server.serve())?;
    Ok(())
}

fn cmd_config(args: ConfigArgs) -> anyhow::Result<()> {
    let config = resolve_config(args.settings)?;
    print!("{}", config.to_toml_string()?);
    Ok(())
}
