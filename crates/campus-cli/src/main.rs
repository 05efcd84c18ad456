use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use campus_agents::{IntentClassifier, PermissionTable, ToolRegistry, ToolSelector};
use campus_common::Role;
use campus_config::{AppConfig, ConfigLoader};
use campus_gateway::GatewayServer;
use campus_gateway::bootstrap::{build_provider, build_runtime, open_store};
use campus_security::RedactingWriter;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// campus-assist - intent-driven assistant backend for education management
#[derive(Parser, Debug)]
#[command(name = "campus-assist", version, about)]
struct Cli {
    /// Config file (YAML or TOML). Defaults to ~/.campus-assist/config.yml
    #[arg(short, long, global = true, env = "CAMPUS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Override gateway.host
        #[arg(long)]
        host: Option<String>,
        /// Override gateway.port
        #[arg(long)]
        port: Option<u16>,
        /// Seed demo data into an empty database
        #[arg(long)]
        demo: bool,
    },
    /// Classify a request offline and print the analysis as JSON
    Classify { text: String },
    /// Show which tools a role would be offered
    Tools {
        #[arg(long, default_value = "teacher")]
        role: String,
        /// Request text to run through the selector
        text: Option<String>,
    },
}

fn init_tracing(json: bool, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr());
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::new(path),
        None => ConfigLoader::default_location(),
    };
    loader
        .load()
        .with_context(|| format!("failed to load config from {}", loader.path().display()))
}

fn classifier(config: &AppConfig) -> IntentClassifier {
    IntentClassifier::new(
        Duration::from_secs(config.cache.intent_ttl_secs),
        config.cache.intent_key_chars,
        config.intent.keyword_threshold,
    )
}

async fn serve(
    mut config: AppConfig,
    host: Option<String>,
    port: Option<u16>,
    demo: bool,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let store = open_store(&config, demo).context("failed to open campus database")?;
    let provider = build_provider(&config)?;
    let runtime = build_runtime(&config, provider, store)?;
    info!(
        fast_model = %config.llm.fast_model,
        thinking_model = %config.llm.thinking_model,
        "starting campus-assist"
    );
    GatewayServer::new(config, runtime).run().await?;
    Ok(())
}

fn tools(config: &AppConfig, role: &str, text: Option<&str>) -> anyhow::Result<serde_json::Value> {
    let store = open_store(config, false)?;
    let registry = Arc::new(ToolRegistry::with_builtin_tools(store, &config.tools));
    let permissions = PermissionTable::with_overrides(&config.permissions);
    let role = Role::new(role);
    let groups = permissions.allowed_groups(&role);

    let Some(text) = text else {
        let by_group: serde_json::Map<String, serde_json::Value> = groups
            .iter()
            .map(|group| (group.clone(), serde_json::json!(registry.names_in_group(group))))
            .collect();
        return Ok(serde_json::json!({ "role": role.as_str(), "groups": by_group }));
    };

    let analysis = classifier(config).classify_offline(text);
    let selector = ToolSelector::new(Arc::clone(&registry), permissions);
    let selection = selector.select(
        &analysis,
        text,
        &role,
        config.tools.max_tools_per_request,
    );
    Ok(serde_json::json!({
        "role": role.as_str(),
        "groups": groups,
        "intent": analysis.intent,
        "complexity": analysis.complexity,
        "selection": selection,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    let config = load_config(cli.config)?;

    match cli.command {
        Commands::Serve { host, port, demo } => {
            init_tracing(config.logging.json, "info");
            serve(config, host, port, demo).await
        }
        Commands::Classify { text } => {
            init_tracing(config.logging.json, "warn");
            let analysis = classifier(&config).classify_offline(&text);
            println!("{}", serde_json::to_string_pretty(&analysis)?);
            Ok(())
        }
        Commands::Tools { role, text } => {
            init_tracing(config.logging.json, "warn");
            let report = tools(&config, &role, text.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
