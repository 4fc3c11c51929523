use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use hotgate::{
    adapters::{
        HttpClientAdapter, HttpHandler, router, source_from_settings, spawn_config_watcher,
    },
    config::{
        DocumentValidator, GatewaySettings, load_settings,
        loader::{parse_document, read_document},
    },
    core::{ConfigStore, GatewayService},
    ports::{config_source::ConfigSource, http_client::HttpClient},
    tracing_setup,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(flatten)]
    serve: ServeArgs,
}

#[derive(Parser, Debug, Default)]
struct ServeArgs {
    /// Bootstrap settings file (TOML, YAML or JSON)
    #[clap(short, long)]
    settings: Option<String>,

    /// Gateway document: a file path or an http(s) URL
    #[clap(short, long)]
    config: Option<String>,

    /// Address to listen on, e.g. 0.0.0.0:8080
    #[clap(short, long)]
    listen: Option<String>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the gateway server (default)
    Serve(ServeArgs),
    /// Parse and validate a gateway document, then exit
    Validate {
        /// Gateway document to validate
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config).await,
        Some(Commands::Serve(serve_args)) => serve(serve_args).await,
        None => serve(args.serve).await,
    }
}

fn resolve_settings(args: &ServeArgs) -> Result<GatewaySettings> {
    let mut settings =
        load_settings(args.settings.as_deref()).context("Failed to load bootstrap settings")?;
    if let Some(config) = &args.config {
        settings.config_source = config.clone();
    }
    if let Some(listen) = &args.listen {
        settings.listen_addr = listen.clone();
    }
    Ok(settings)
}

async fn serve(args: ServeArgs) -> Result<()> {
    let settings = resolve_settings(&args)?;

    tracing_setup::init_tracing_with_config(&settings.log_level, settings.log_json)
        .map_err(|e| eyre!("Failed to initialize tracing: {e}"))?;

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            A provider was probably installed already.",
            e
        );
    }

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);

    let source: Arc<dyn ConfigSource> =
        source_from_settings(&settings).context("Failed to create config source")?;
    tracing::info!(source = %source.describe(), "Loading initial gateway document");

    let store = Arc::new(ConfigStore::new());
    let initial = source
        .fetch()
        .await
        .with_context(|| format!("Failed to load initial document from {}", source.describe()))?;
    let snapshot = store
        .apply_document(&initial)
        .with_context(|| format!("Initial document from {} is invalid", source.describe()))?;
    for route in snapshot.routes() {
        tracing::info!(
            route_id = %route.id,
            pattern = route.pattern.as_str(),
            targets = ?route.targets,
            "Configured route"
        );
    }

    let gateway_service = Arc::new(GatewayService::new(store.clone(), http_client));
    let _pruner = gateway_service.spawn_breaker_pruning();
    let _watcher = spawn_config_watcher(
        source.clone(),
        store.clone(),
        Duration::from_millis(settings.reload_debounce_ms),
    );

    let http_handler = Arc::new(HttpHandler::new(gateway_service, Some(source)));

    let app = router(http_handler);

    let addr: SocketAddr = settings
        .listen_addr
        .parse()
        .with_context(|| format!("Failed to parse listen address {}", settings.listen_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;

    tracing::info!(
        %addr,
        generation = store.current().generation(),
        "hotgate listening"
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    tracing::info!("Graceful shutdown completed");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

/// Validate a gateway document and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating gateway document: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Gateway document '{config_path}' not found");
        std::process::exit(1);
    }

    let raw = read_document(config_path).await?;
    let doc = match parse_document(&raw) {
        Ok(doc) => {
            println!("✅ {} parsing: OK", raw.format);
            doc
        }
        Err(e) => {
            eprintln!("❌ Document parsing failed:");
            eprintln!("   {e}");
            std::process::exit(1);
        }
    };

    match DocumentValidator::validate(&doc) {
        Ok(()) => {
            println!("✅ Document validation: OK");
            println!();
            println!("📋 Gateway Summary:");
            println!("   • Routes: {}", doc.routes.len());
            for route in &doc.routes {
                println!(
                    "     - {} {} -> {}",
                    route.id,
                    route.path_pattern,
                    route.targets.join(", ")
                );
            }
            println!(
                "   • IP whitelist: {} ({} entries)",
                doc.security.ip_whitelist.enabled,
                doc.security.ip_whitelist.list.len()
            );
            println!("   • Auth: {}", doc.security.auth.enabled);
            println!("   • Rate limiting: {}", doc.rate_limit.enabled);
            println!("   • Circuit breaker: {}", doc.circuit_breaker.enabled);
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Document validation failed:");
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
