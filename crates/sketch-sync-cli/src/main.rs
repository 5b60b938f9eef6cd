use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sketch_sync_actions::{ActionSource, HttpActionSource};
use sketch_sync_client::{Origin, SceneChange, SyncClient};
use sketch_sync_core::config::Config;
use sketch_sync_core::store::{ElementStore, JsonFileStore, MemoryStore};
use sketch_sync_gateway::GatewayState;

#[derive(Parser)]
#[command(
    name = "sketch-sync",
    about = "Shared diagram canvas: authoritative element store with live WebSocket sync",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sync gateway
    Serve {
        /// Port to listen on (default: 3031)
        #[arg(long)]
        port: Option<u16>,

        /// JSON file to persist elements in (default: memory only)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Connect as a headless viewer and log scene changes
    Watch {
        /// Gateway WebSocket URL
        #[arg(long)]
        url: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show gateway status
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

fn init_logging(config: &Config, verbose: bool) {
    let level = if verbose {
        "debug".to_string()
    } else {
        config
            .logging
            .as_ref()
            .and_then(|l| l.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };
    let mut directives = vec![level];
    if let Some(logging) = &config.logging {
        directives.extend(logging.filters.iter().cloned());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives.join(",")));

    if config.log_format() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn open_store(path: Option<PathBuf>) -> anyhow::Result<Box<dyn ElementStore>> {
    match path {
        Some(path) => {
            let store = JsonFileStore::open(&path)
                .with_context(|| format!("failed to open element store {}", path.display()))?;
            tracing::info!(path = %path.display(), elements = store.len(), "Loaded element store");
            Ok(Box::new(store))
        }
        None => {
            tracing::info!("Using in-memory element store");
            Ok(Box::new(MemoryStore::new()))
        }
    }
}

fn action_source(config: &Config) -> anyhow::Result<Option<Arc<dyn ActionSource>>> {
    let Some(agent) = &config.agent else {
        tracing::info!("No action source configured; /ai/actions will fail");
        return Ok(None);
    };
    let source = HttpActionSource::from_config(agent)?;
    tracing::info!(endpoint = %agent.endpoint, "Action source configured");
    Ok(Some(Arc::new(source)))
}

async fn serve(config: Config, port: Option<u16>, store: Option<PathBuf>) -> anyhow::Result<()> {
    let port = port.unwrap_or_else(|| config.server_port());
    let store = open_store(store.or_else(|| config.store_path()))?;
    let source = action_source(&config)?;

    let state = GatewayState::new(Arc::new(config), store, source);

    #[cfg(feature = "metrics")]
    let state = state.with_metrics(sketch_sync_gateway::metrics::install_prometheus_recorder()?);

    tracing::info!("Starting sketch-sync gateway on port {port}");
    sketch_sync_gateway::start_gateway(Arc::new(state), port).await
}

async fn watch(config: &Config, url: Option<String>) -> anyhow::Result<()> {
    let mut client_config = config.client();
    if let Some(url) = url {
        client_config.url = url;
    }
    tracing::info!(url = %client_config.url, "Watching");

    let (client, mut events) = SyncClient::spawn(client_config);
    let cancel = client.cancel_token();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let origin = match event.origin {
                    Origin::Local => "local",
                    Origin::Remote => "remote",
                };
                match &event.change {
                    SceneChange::Replaced { count } => {
                        tracing::info!(origin, count, "Scene replaced");
                    }
                    SceneChange::Added(el) => {
                        tracing::info!(origin, id = %el.id, kind = el.element_type.as_str(), "Element added");
                    }
                    SceneChange::Updated(el) => {
                        tracing::info!(origin, id = %el.id, "Element updated");
                    }
                    SceneChange::Removed { id } => {
                        tracing::info!(origin, %id, "Element removed");
                    }
                    SceneChange::Cleared => tracing::info!(origin, "Scene cleared"),
                    SceneChange::Viewport(v) => {
                        tracing::info!(x = v.x, y = v.y, zoom = v.zoom, "Viewport changed");
                    }
                    SceneChange::RendererRequest(req) => {
                        tracing::info!(?req, "Renderer request (no renderer attached)");
                    }
                    SceneChange::Status { count } => tracing::info!(count, "Server status"),
                }
            }
        }
    }

    client.join().await?;
    Ok(())
}

async fn status(config: &Config, config_path: &std::path::Path) -> anyhow::Result<()> {
    let port = config.server_port();
    println!("sketch-sync v{}", env!("CARGO_PKG_VERSION"));
    println!("Config: {}", config_path.display());
    println!("Gateway port: {port}");
    match config.store_path() {
        Some(path) => println!("Store: {}", path.display()),
        None => println!("Store: memory"),
    }

    let url = format!("http://127.0.0.1:{port}/health");
    match reqwest::get(&url).await {
        Ok(resp) => {
            let body: serde_json::Value = resp.json().await?;
            println!(
                "Status: running ({} elements, {} connections)",
                body["elements"], body["connections"]
            );
        }
        Err(_) => println!("Status: not running"),
    }
    Ok(())
}

fn show_config(config: &Config) -> anyhow::Result<()> {
    let mut config = config.clone();
    if let Some(agent) = config.agent.as_mut() {
        if agent.api_key.is_some() {
            agent.api_key = Some("********".into());
        }
    }
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Serve { port, store } => serve(config, port, store).await?,
        Commands::Watch { url } => watch(&config, url).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => show_config(&config)?,
        },
        Commands::Status => status(&config, &config_path).await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve() {
        let cli = Cli::try_parse_from(["sketch-sync", "serve", "--port", "4000", "--store", "/tmp/e.json"])
            .unwrap();
        match cli.command {
            Commands::Serve { port, store } => {
                assert_eq!(port, Some(4000));
                assert_eq!(store, Some(PathBuf::from("/tmp/e.json")));
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from(["sketch-sync", "-v", "watch", "--url", "ws://h:1/ws"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Watch { url: Some(_) }));
    }

    #[test]
    fn test_open_store_memory_and_file() {
        assert!(open_store(None).unwrap().is_empty());

        let dir = tempfile::tempdir().unwrap();
        let store = open_store(Some(dir.path().join("elements.json"))).unwrap();
        assert!(store.is_empty());
    }
}
