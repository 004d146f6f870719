//! Mercury Node CLI
//!
//! Command-line interface for running the Mercury shopping agent backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mercury_node::agent::{llm, parse_message};
use mercury_node::api::types::HealthResponse;
use mercury_node::{
    ApiConfig, ApiServer, AppState, Catalog, ChatHandler, EmbeddingService,
    EmbeddingServiceConfig, Error, HashingTextEncoder, ImageEncoder, ImageFetcher,
    ImageModelKind, IntentRouter, NodeConfig, Result, SearchEngine, TextEncoder,
};

#[derive(Parser)]
#[command(name = "mercury")]
#[command(author, version, about = "Mercury shopping agent node", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new node configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.toml")]
        output: String,
    },

    /// Start the Mercury node
    Start {
        /// HTTP API listen address (overrides the config file)
        #[arg(long)]
        api_addr: Option<String>,

        /// Directory of product images, served under /data
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Catalog JSON file (defaults to <data-dir>/catalog.json)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Run without an image encoder (low-resource mode)
        #[arg(long, default_value = "false")]
        disable_vision: bool,

        /// Use the local hashing text encoder instead of downloading MiniLM
        #[arg(long, default_value = "false")]
        local_embeddings: bool,
    },

    /// Check node health
    Health {
        /// API endpoint to check
        #[arg(long, default_value = "http://localhost:8000")]
        endpoint: String,
    },

    /// Load and validate the catalog, then print a per-category summary
    Validate {
        /// Catalog JSON file (defaults to the configured one)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },

    /// Offline text search with the local encoder
    Search {
        /// Query text, e.g. "red bag under 80"
        query: String,

        /// Number of results
        #[arg(short, long, default_value = "5")]
        k: usize,
    },
}

/// Log filter: `--verbose`, else `RUST_LOG`, else `info`.
fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

fn init_logging(verbose: bool) {
    let filter = log_filter(verbose);

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

/// Load the config file if present, then apply environment overrides.
fn load_config(path: &str) -> Result<NodeConfig> {
    let mut config = if Path::new(path).exists() {
        info!("Loading configuration from: {}", path);
        NodeConfig::load(path)?
    } else {
        info!("Using default configuration");
        NodeConfig::default()
    };
    config.apply_env();
    Ok(config)
}

fn install_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Failed to install Prometheus recorder: {}", e);
            None
        }
    }
}

fn text_encoder(config: &NodeConfig) -> Arc<dyn TextEncoder> {
    if config.search.local_embeddings {
        info!("Using local hashing text encoder");
        return Arc::new(HashingTextEncoder::default());
    }
    info!("Initializing text embeddings (downloads ~90MB model on first use)...");
    match EmbeddingService::with_config(EmbeddingServiceConfig::default()) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            warn!("Failed to initialize text embeddings: {}", e);
            warn!("Falling back to the local hashing encoder");
            Arc::new(HashingTextEncoder::default())
        }
    }
}

fn image_encoder(config: &NodeConfig) -> Result<Option<Arc<dyn ImageEncoder>>> {
    if !config.vision.enabled {
        info!("Image search disabled");
        return Ok(None);
    }
    let kind = ImageModelKind::resolve(&config.vision.model, &config.vision.pretrained)?;
    info!("Initializing image encoder {:?}...", kind);
    match kind.build() {
        Ok(encoder) => Ok(encoder),
        Err(e) => {
            warn!("Failed to initialize image encoder: {}", e);
            warn!("Falling back to the HSV histogram encoder");
            ImageModelKind::Hsv.build()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // `.env` may carry RUST_LOG, so it is read before the subscriber is built
    dotenv::dotenv().ok();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Init { output } => {
            info!("Initializing new node configuration at: {}", output);
            let config = NodeConfig::default();
            config.save(&output)?;
            info!("Configuration saved successfully");
        }

        Commands::Start {
            api_addr,
            data_dir,
            catalog,
            disable_vision,
            local_embeddings,
        } => {
            info!("Starting Mercury node...");

            // 1. Configuration: file, then environment, then CLI flags
            let mut config = load_config(&cli.config)?;
            if let Some(addr) = api_addr {
                config.api.listen_address = addr;
            }
            if let Some(dir) = data_dir {
                config.catalog.data_dir = dir;
            }
            if let Some(path) = catalog {
                config.catalog.path = Some(path);
            }
            if disable_vision {
                config.vision.enabled = false;
            }
            if local_embeddings {
                config.search.local_embeddings = true;
            }
            config.validate()?;

            let metrics = install_metrics();

            // 2. Catalog and search indexes
            let catalog = Arc::new(Catalog::load_or_scan(&config.catalog)?);
            let engine = Arc::new(
                SearchEngine::build(
                    catalog,
                    text_encoder(&config),
                    image_encoder(&config)?,
                    &config,
                )
                .await?,
            );

            // 3. Agent
            let model = llm::from_config(&config.chat)?;
            let chat = Arc::new(ChatHandler::new(engine.clone(), model, &config.chat));
            let fetcher = ImageFetcher::from_config(&config.vision)?;
            let router = Arc::new(IntentRouter::new(engine.clone(), chat, fetcher.clone()));

            // 4. HTTP API
            let app_state = AppState {
                engine,
                router,
                fetcher,
                data_dir: config.catalog.data_dir.clone(),
                start_time: Instant::now(),
                metrics,
            };
            let api_config = ApiConfig::from(&config.api);
            let api_addr = api_config.listen_address.clone();
            info!("API address: {}", api_addr);
            let api_server = ApiServer::with_state(api_config, app_state);

            let mut server = tokio::spawn(async move { api_server.run(&api_addr).await });

            info!("Mercury node started successfully");
            info!("Press Ctrl+C to stop");

            tokio::select! {
                result = &mut server => {
                    match result {
                        Ok(Ok(())) => info!("API server exited"),
                        Ok(Err(e)) => {
                            error!("API server error: {}", e);
                            return Err(e);
                        }
                        Err(e) => {
                            error!("API server task failed: {}", e);
                            return Err(Error::Api(e.to_string()));
                        }
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    server.abort();
                    info!("Node stopped");
                }
            }
        }

        Commands::Health { endpoint } => {
            info!("Checking node health at: {}", endpoint);
            let health_url = format!("{}/health", endpoint.trim_end_matches('/'));

            match check_health(&health_url).await {
                Ok(response) => {
                    info!("Node status: {}", response.status);
                    info!("Version: {}", response.version);
                    info!("Catalog items: {}", response.item_count);
                    info!("Chat backend: {}", response.chat_backend);
                    info!("Text encoder: {}", response.text_encoder);
                    info!(
                        "Image encoder: {}",
                        response.image_encoder.as_deref().unwrap_or("disabled")
                    );
                    info!("Uptime: {} seconds", response.uptime);
                }
                Err(e) => {
                    error!("Health check failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Validate { catalog } => {
            let mut config = load_config(&cli.config)?;
            if let Some(path) = catalog {
                config.catalog.path = Some(path);
            }
            let catalog = Catalog::load_or_scan(&config.catalog)?;
            info!("Catalog is valid: {} products", catalog.len());
            for (category, count) in catalog.count_by_category() {
                info!("  {:<8} {}", category.as_str(), count);
            }
        }

        Commands::Search { query, k } => {
            let mut config = load_config(&cli.config)?;
            config.search.local_embeddings = true;
            config.vision.enabled = false;

            let catalog = Arc::new(Catalog::load_or_scan(&config.catalog)?);
            let engine = SearchEngine::build(
                catalog,
                Arc::new(HashingTextEncoder::default()),
                None,
                &config,
            )
            .await?;
            let parsed = parse_message(&query);
            let k = engine.resolve_k(Some(k))?;
            let hits = engine.search_text(&query, &parsed.filters, k).await?;
            if hits.is_empty() {
                println!("No matching products");
            }
            for hit in hits {
                println!(
                    "{:>6.3}  {:<12} {:<32} ${:.2}",
                    hit.score.unwrap_or_default(),
                    hit.product.id,
                    hit.product.title,
                    hit.product.price
                );
            }
        }
    }

    Ok(())
}

/// Fetch `/health` from a running node.
async fn check_health(url: &str) -> Result<HealthResponse> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| Error::Api(format!("Client error: {}", e)))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Api(format!("Connection failed: {}", e)))?;

    if !response.status().is_success() {
        return Err(Error::Api(format!("Unexpected status {}", response.status())));
    }

    response
        .json::<HealthResponse>()
        .await
        .map_err(|e| Error::Api(format!("JSON parse error: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_file_feeds_log_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "RUST_LOG=mercury_node=trace\n").unwrap();
        std::env::remove_var("RUST_LOG");

        dotenv::from_path(&path).unwrap();
        assert_eq!(log_filter(false).to_string(), "mercury_node=trace");
        assert_eq!(log_filter(true).to_string(), "debug");

        std::env::remove_var("RUST_LOG");
    }
}
