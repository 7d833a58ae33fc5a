// SPDX-FileCopyrightText: © 2025 StreamVault Contributors
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Parser, Subcommand};
use schemars::schema_for;
use tracing::{error, info, warn};

use crate::config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "svault.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Starts the cache server
    Serve {
        /// TCP port to listen on (overrides the config file)
        #[arg(long)]
        port: Option<u16>,
        /// WebSocket upgrade path (overrides the config file)
        #[arg(long)]
        path: Option<String>,
        /// Cache directory (overrides the config file)
        #[arg(long)]
        cache_dir: Option<String>,
    },
    /// Manage configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate a default config file and print it to stdout
    Default,
    /// Generate a JSON schema for the config and print it to stdout
    Schema,
}

/// Command-line overrides applied on top of file/env configuration.
#[derive(Debug, Default, Clone)]
pub struct ServeOverrides {
    pub port: Option<u16>,
    pub path: Option<String>,
    pub cache_dir: Option<String>,
}

/// Initialize telemetry (metrics) if enabled in configuration.
/// Returns the meter provider that must be kept alive.
fn init_telemetry_if_enabled(
    config: &config::Config,
) -> Option<opentelemetry_sdk::metrics::SdkMeterProvider> {
    if !config.telemetry.enable {
        return None;
    }

    match crate::telemetry::init_metrics(&config.telemetry) {
        Ok(provider) => {
            info!("OpenTelemetry metrics enabled");
            Some(provider)
        },
        Err(e) => {
            warn!(error = %e, "Failed to initialize OpenTelemetry metrics");
            None
        },
    }
}

/// Handle the "serve" command - start the server.
/// Exits the process on error with status code 1.
async fn handle_serve_command(config_path: &str, overrides: ServeOverrides) {
    let config_result = match config::load(config_path) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        },
    };

    let mut config = config_result.config;
    if let Some(port) = overrides.port {
        config.server.port = port;
    }
    if let Some(path) = overrides.path {
        config.server.ws_path = path;
    }
    if let Some(cache_dir) = overrides.cache_dir {
        config.cache.directory = cache_dir;
    }

    let _log_guard = match crate::logging::init_logging(&config.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            std::process::exit(1);
        },
    };

    let _meter_provider = init_telemetry_if_enabled(&config);

    if let Some(missing_file) = &config_result.file_missing {
        warn!(config_path = %missing_file, "Config file not found, using defaults");
    }

    info!(
        address = %config.server.address,
        port = config.server.port,
        ws_path = %config.server.ws_path,
        cache_dir = %config.cache.directory,
        "Starting svault server"
    );

    if let Err(e) = crate::server::start_server(&config).await {
        error!(error = %e, "Failed to start server");
        std::process::exit(1);
    }
}

/// Handle the "config default" command - print default config to stdout.
fn handle_config_default_command() {
    match config::generate_default() {
        Ok(toml_string) => {
            println!("# Default svault configuration file");
            println!("{toml_string}");
        },
        Err(e) => {
            eprintln!("Failed to generate default config: {e}");
            std::process::exit(1);
        },
    }
}

/// Handle the "config schema" command - print JSON schema to stdout.
fn handle_config_schema_command() {
    let schema = schema_for!(config::Config);
    match serde_json::to_string_pretty(&schema) {
        Ok(json) => {
            println!("{json}");
        },
        Err(e) => {
            eprintln!("Failed to generate config schema: {e}");
            std::process::exit(1);
        },
    }
}

/// Handle CLI commands.
pub async fn handle_command(cli: &Cli) {
    match &cli.command {
        None => handle_serve_command(&cli.config, ServeOverrides::default()).await,
        Some(Commands::Serve { port, path, cache_dir }) => {
            let overrides = ServeOverrides {
                port: *port,
                path: path.clone(),
                cache_dir: cache_dir.clone(),
            };
            handle_serve_command(&cli.config, overrides).await;
        },
        Some(Commands::Config(ConfigCommands::Default)) => {
            handle_config_default_command();
        },
        Some(Commands::Config(ConfigCommands::Schema)) => {
            handle_config_schema_command();
        },
    }
}
