use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use axum::{
    Router,
    body::Body,
    extract::Request,
    response::Response,
    routing::get,
    serve::{Listener, ListenerExt},
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use futures_util::StreamExt;
use hexgate::{
    adapters::{ConsulCatalog, FileConfigProvider, HttpClientAdapter, RedisCounterStore},
    config::{GatewayConfig, GatewayConfigValidator},
    core::{RouterSnapshot, chain::plain_response},
    metrics, redirect,
    ports::{
        catalog::ServiceCatalog, config_provider::ConfigProvider, counter_store::CounterStore,
        http_client::HttpClient,
    },
    tracing_setup,
    utils::GracefulShutdown,
};
use http::{StatusCode, header};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::Instrument;
use uuid::Uuid;

/// Pause after a change event so the writer finishes before re-reading.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "config.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Start the gateway (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "config.yaml")]
        config: String,
    },
}

/// Adapts any stream of accepted connections to axum's `Listener`,
/// used to serve over the TLS acceptor stream.
struct StreamListener<S> {
    stream: S,
    local_addr: SocketAddr,
}

impl<S, I, E> Listener for StreamListener<S>
where
    S: futures_util::Stream<Item = Result<(I, SocketAddr), E>> + Unpin + Send + 'static,
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    type Io = I;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.stream.next().await {
                Some(Ok((io, addr))) => return (io, addr),
                Some(Err(e)) => tracing::debug!("Accept error: {}", e),
                None => std::future::pending().await,
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config),
    };

    match command {
        "validate" => return validate_config_command(&config_path).await,
        "init" => return init_config_command(&config_path).await,
        _ => {}
    }

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            This can happen if a provider was already installed.",
            e
        );
    }

    tracing_setup::init_tracing().map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    let metrics_handle =
        metrics::init_metrics().map_err(|e| eyre!("Failed to initialize metrics: {}", e))?;

    tracing::info!("Loading configuration from {config_path}");
    let config_provider =
        Arc::new(FileConfigProvider::new(&config_path).context("Failed to create config provider")?);

    let config: GatewayConfig = config_provider
        .load_config()
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    GatewayConfigValidator::validate(&config).context("Invalid configuration")?;

    // The counter store is a process-wide handle: connected once at
    // startup, shared by every snapshot, never rebuilt on reload.
    let counter_store: Option<Arc<dyn CounterStore>> = if config.requires_counter_store() {
        let store = RedisCounterStore::connect(&config.redis)
            .await
            .map_err(|e| eyre!("Failed to connect counter store: {e}"))?;
        Some(Arc::new(store))
    } else {
        None
    };

    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new().context("Failed to create HTTP client adapter")?);
    let catalog: Arc<dyn ServiceCatalog> = Arc::new(ConsulCatalog::new(
        config.consul.address.clone(),
        http_client.clone(),
    ));

    let initial_snapshot = RouterSnapshot::build(
        &config,
        catalog.clone(),
        counter_store.clone(),
        http_client.clone(),
    )
    .map_err(|e| eyre!("Failed to build initial router: {e}"))?;
    tracing::info!(routes = initial_snapshot.route_count(), "initial router built");

    let snapshot_holder = Arc::new(ArcSwap::new(Arc::new(initial_snapshot)));

    spawn_reload_task(
        config_provider.clone(),
        snapshot_holder.clone(),
        catalog.clone(),
        counter_store.clone(),
        http_client.clone(),
    );

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_handler_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler error: {}", e);
        }
    });

    let app = build_app(snapshot_holder, metrics_handle);

    if config.tls.enabled {
        serve_tls(&config, app, graceful_shutdown).await
    } else {
        serve_cleartext(&config, app, graceful_shutdown).await
    }
}

/// The public listener's router: the metrics scrape endpoint mounted
/// outside dispatch (no auth, no quota) and a fallback that routes
/// everything else through the current snapshot.
fn build_app(
    snapshot_holder: Arc<ArcSwap<RouterSnapshot>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    Router::new()
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move {
                    (
                        [(
                            header::CONTENT_TYPE,
                            "text/plain; version=0.0.4; charset=utf-8",
                        )],
                        handle.render(),
                    )
                }
            }),
        )
        .fallback(move |req: Request| {
            let holder = snapshot_holder.clone();
            async move { dispatch(holder, req).await }
        })
}

/// One atomic snapshot load per request; the loaded snapshot stays alive
/// until this request completes, so reloads never cancel it mid-flight.
async fn dispatch(holder: Arc<ArcSwap<RouterSnapshot>>, req: Request) -> Response<Body> {
    let snapshot = holder.load_full();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string();
    let span = tracing_setup::create_request_span(&method, &path, &request_id);

    async move {
        match snapshot.find_chain(&path) {
            Some(chain) => chain.handle(req).await,
            None => {
                tracing::debug!("no route match");
                plain_response(StatusCode::NOT_FOUND, "404 page not found")
            }
        }
    }
    .instrument(span)
    .await
}

fn spawn_reload_task(
    provider: Arc<FileConfigProvider>,
    snapshot_holder: Arc<ArcSwap<RouterSnapshot>>,
    catalog: Arc<dyn ServiceCatalog>,
    counter_store: Option<Arc<dyn CounterStore>>,
    http_client: Arc<dyn HttpClient>,
) {
    let mut notify_rx = provider.watch();

    tokio::spawn(async move {
        tracing::info!("Config watcher task started.");
        while notify_rx.recv().await.is_some() {
            tokio::time::sleep(RELOAD_DEBOUNCE).await;
            tracing::info!("Config file modified. Reloading...");

            match provider.load_config().await {
                Ok(new_config) => {
                    match RouterSnapshot::build(
                        &new_config,
                        catalog.clone(),
                        counter_store.clone(),
                        http_client.clone(),
                    ) {
                        Ok(new_snapshot) => {
                            snapshot_holder.store(Arc::new(new_snapshot));
                            tracing::info!("Hot reload complete. New configuration is active.");
                        }
                        Err(e) => {
                            tracing::error!(
                                "Error rebuilding router: {e}. Keeping old configuration."
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Error reloading config: {e:?}. Keeping old configuration.");
                }
            }
            // Drain events that piled up while we were rebuilding.
            while notify_rx.try_recv().is_ok() {}
        }
        tracing::info!("Config watcher task is shutting down.");
    });
}

async fn serve_cleartext(
    config: &GatewayConfig,
    app: Router,
    graceful_shutdown: Arc<GracefulShutdown>,
) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", config.gateway_port)
        .parse()
        .context("Failed to parse listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("HexGate API Gateway listening on port {}", config.gateway_port);

    tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => result.context("Server error"),
        reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", reason);
            Ok(())
        }
    }
}

async fn serve_tls(
    config: &GatewayConfig,
    app: Router,
    graceful_shutdown: Arc<GracefulShutdown>,
) -> Result<()> {
    use std::{fs::File, io::BufReader};

    use rustls::ServerConfig;
    use rustls_pemfile::{certs, pkcs8_private_keys};
    use tls_listener::TlsListener;

    // Cleartext port serves only redirects while TLS carries the traffic.
    let redirect_port = config.gateway_port.clone();
    let https_port = config.tls.https_port.clone();
    tokio::spawn(async move {
        if let Err(e) = serve_redirect(&redirect_port, &https_port).await {
            tracing::error!("Redirect server failed: {e}");
        }
    });

    let cert_file = &mut BufReader::new(
        File::open(&config.tls.cert_file).context("failed to open cert file")?,
    );
    let key_file =
        &mut BufReader::new(File::open(&config.tls.key_file).context("failed to open key file")?);

    let cert_chain = certs(cert_file).collect::<Result<Vec<_>, _>>()?;
    let key = pkcs8_private_keys(key_file)
        .next()
        .transpose()?
        .ok_or_else(|| eyre!("No PKCS#8 private key found in key file"))?;

    let tls_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())?;

    let addr: SocketAddr = format!("0.0.0.0:{}", config.tls.https_port)
        .parse()
        .context("Failed to parse HTTPS listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind HTTPS address")?;
    let local_addr = listener.local_addr().context("Failed to get local addr")?;

    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(tls_config));
    let tls_stream = TlsListener::new(acceptor, listener);
    let tls_listener = StreamListener {
        stream: tls_stream,
        local_addr,
    }
    .tap_io(|_io| {});

    tracing::info!(
        "HexGate API Gateway (HTTPS) listening on port {}",
        config.tls.https_port
    );

    tokio::select! {
        result = axum::serve(
            tls_listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => result.context("Server error"),
        reason = graceful_shutdown.wait_for_shutdown_signal() => {
            tracing::info!("Shutdown signal received: {:?}", reason);
            Ok(())
        }
    }
}

async fn serve_redirect(gateway_port: &str, https_port: &str) -> Result<()> {
    let https_port = https_port.to_string();
    let redirect_app = Router::new().fallback(move |req: Request| {
        let https_port = https_port.clone();
        async move { redirect::handle_redirect(&https_port, req) }
    });

    let addr: SocketAddr = format!("0.0.0.0:{gateway_port}")
        .parse()
        .context("Failed to parse redirect listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind redirect address")?;

    tracing::info!("Starting HTTP-to-HTTPS redirect server on port {gateway_port}");
    axum::serve(listener, redirect_app)
        .await
        .context("Redirect server error")
}

/// Validate configuration file and exit
async fn validate_config_command(config_path: &str) -> Result<()> {
    use hexgate::config::loader::load_config;

    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("Error: configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("Configuration parsing failed:\n   {e}");
            std::process::exit(1);
        }
    };

    match GatewayConfigValidator::validate(&config) {
        Ok(()) => {
            println!("Configuration validation: OK");
            println!();
            println!("Summary:");
            println!("   Gateway port: {}", config.gateway_port);
            println!("   Services: {}", config.services.len());
            println!("   Authentication: {}", config.authentication.enabled);
            println!("   TLS: {}", config.tls.enabled);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration validation failed:\n{e}");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("Error: configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# HexGate API Gateway Configuration

# Cleartext listener port (redirect-only when TLS is enabled)
gatewayPort: "8000"

consul:
  address: http://127.0.0.1:8500

authentication:
  enabled: false
  # publicKeyPath: ./keys/jwt.pub

# rateLimiting:
#   enabled: true
#   ratePerSecond: 10
#   burst: 20

# redis:
#   address: 127.0.0.1:6379
#   password: ""
#   db: 0

# tls:
#   enabled: true
#   httpsPort: "8443"
#   certFile: ./certs/server.crt
#   keyFile: ./certs/server.key

services:
  - name: user-service
    path: /users/
    consulServiceName: user-service
    # quota:
    #   enabled: true
    #   limit: 100
    #   period: 1m
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("Created default configuration at: {config_path}");
    println!("   Run 'hexgate serve --config {config_path}' to start the gateway");
    Ok(())
}
