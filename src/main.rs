pub mod action_engine;
pub mod beef;
pub mod broadcaster;
pub mod config;
pub mod constants;
pub mod crypto;
pub mod dedup;
pub mod error;
pub mod facade;
pub mod funder;
pub mod identity;
pub mod monitor;
pub mod network_type;
pub mod permission_gate;
pub mod rawtx;
pub mod rpc;
pub mod services;
pub mod shutdown;
pub mod storage;
pub mod tls;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::Config;
use crypto::Secp256k1Crypto;
use facade::WalletFacade;
use shutdown::ShutdownManager;
use storage::Store;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Local single-user BRC-100 wallet daemon.
#[derive(Parser, Debug)]
#[command(name = "gebunden")]
#[command(about = "BRC-100 wallet daemon", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Overrides the configured data directory.
    #[arg(long)]
    data_dir: Option<String>,

    /// Explicit path to the identity key file; defaults to the standard
    /// and legacy locations checked by `identity::load_identity`.
    #[arg(long)]
    key_file: Option<String>,

    /// Overrides the configured permission-gate bridge URL.
    #[arg(long)]
    bridge_url: Option<String>,

    /// Approves every permission-gate request locally instead of calling
    /// out to the bridge; useful for scripted or unattended operation.
    #[arg(long)]
    auto_approve: bool,

    /// Suppresses the interactive startup banner; this daemon has no other
    /// interactive surface, so this only affects console output.
    #[arg(long)]
    headless: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if !args.headless {
        if let Ok(hostname) = hostname::get() {
            if let Ok(hostname_str) = hostname.into_string() {
                let short_name = hostname_str.split('.').next().unwrap_or(&hostname_str);
                eprintln!("\n=== gebunden wallet daemon ({}) ===\n", short_name);
            }
        }
    }

    if args.generate_config {
        let config = Config::default();
        match config.save_to_file(&args.config) {
            Ok(_) => {
                println!("Generated default config at: {}", args.config);
                return;
            }
            Err(e) => {
                eprintln!("Failed to generate config: {}", e);
                std::process::exit(1);
            }
        }
    }

    let mut config = match Config::load_or_create(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(data_dir) = &args.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    if let Some(bridge_url) = &args.bridge_url {
        config.permission_gate.bridge_url = bridge_url.clone();
    }
    if args.auto_approve {
        config.permission_gate.auto_approve = true;
    }

    setup_logging(&config.logging, args.verbose);

    let data_dir = PathBuf::from(&config.storage.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!("failed to create data directory {}: {}", data_dir.display(), e);
        std::process::exit(1);
    }

    let identity = match identity::load_identity(args.key_file.as_deref().map(std::path::Path::new)) {
        Ok(identity) => identity,
        Err(identity::IdentityError::NotFound(_)) => {
            tracing::info!("no identity key found, generating a new one");
            match identity::generate_and_save(&identity::default_identity_path(), config.node.network_type()) {
                Ok(identity) => identity,
                Err(e) => {
                    eprintln!("failed to generate identity: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("failed to load identity: {}", e);
            std::process::exit(1);
        }
    };
    let network = identity.network;
    let root_key_hex = identity.root_key_hex.clone();
    let identity_key = identity.identity_key.clone();

    tracing::info!(network = %network, identity_key = %identity_key, "identity loaded");

    let store = match Store::open(&data_dir, &identity_key, network, config.storage.cache_size_mb) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("failed to open storage: {}", e);
            std::process::exit(1);
        }
    };

    // Services dials a real broadcaster/chain-header node when
    // `[services] base_url` is configured; otherwise it runs against the
    // in-memory mock rather than pointing Services at a URL meant for
    // permission prompts.
    let services: Arc<dyn services::Services> = match &config.services.base_url {
        Some(base_url) => {
            tracing::info!(base_url = %base_url, "Services: dialing configured endpoint");
            Arc::new(services::HttpServices::new(base_url.clone()))
        }
        None => {
            tracing::info!("Services: no base_url configured, running against the in-memory mock");
            services::shared_mock()
        }
    };

    let mut shutdown_manager = ShutdownManager::new();
    let shutdown_token = shutdown_manager.token();

    let (broadcaster, broadcaster_handle) = broadcaster::Broadcaster::spawn(store.clone(), services.clone(), &config.dedup, 256);
    shutdown_manager.register_task(broadcaster_handle);

    let monitor = monitor::Monitor::spawn(
        store.clone(),
        services.clone(),
        broadcaster.clone(),
        config.monitor.clone(),
        shutdown_token.clone(),
    );
    for handle in monitor.into_handles() {
        shutdown_manager.register_task(handle);
    }

    let crypto: Arc<dyn crypto::WalletCrypto> = Arc::new(Secp256k1Crypto::new());
    let pending_cache = action_engine::pending_cache::PendingSignCache::new(Duration::from_secs(300));

    let facade = Arc::new(WalletFacade::new(
        store.clone(),
        services.clone(),
        broadcaster.clone(),
        crypto,
        pending_cache,
        config.permission_gate.clone(),
        config.commission.clone(),
        config.fee.clone(),
        root_key_hex,
        identity_key.clone(),
        network,
        config.node.name.clone(),
    ));

    let plaintext_listener = match TcpListener::bind(&config.rpc.plaintext_address).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind plaintext RPC listener on {}: {}", config.rpc.plaintext_address, e);
            std::process::exit(1);
        }
    };
    tracing::info!(addr = %config.rpc.plaintext_address, "plaintext RPC listener bound");

    let plaintext_token = shutdown_token.clone();
    let plaintext_facade = facade.clone();
    let plaintext_handle = tokio::spawn(async move {
        tokio::select! {
            _ = plaintext_token.cancelled() => {
                tracing::debug!("plaintext RPC listener shutting down");
            }
            _ = rpc::server::run_plaintext(plaintext_listener, plaintext_facade) => {}
        }
    });
    shutdown_manager.register_task(plaintext_handle);

    if config.security.enable_tls {
        match tls::server_config(&config.security, &data_dir) {
            Ok(tls_config) => match TcpListener::bind(&config.rpc.tls_address).await {
                Ok(tls_listener) => {
                    tracing::info!(addr = %config.rpc.tls_address, "TLS RPC listener bound");
                    let acceptor = TlsAcceptor::from(tls_config);
                    let tls_token = shutdown_token.clone();
                    let tls_facade = facade.clone();
                    let tls_handle = tokio::spawn(async move {
                        tokio::select! {
                            _ = tls_token.cancelled() => {
                                tracing::debug!("TLS RPC listener shutting down");
                            }
                            _ = rpc::server::run_tls(tls_listener, acceptor, tls_facade) => {}
                        }
                    });
                    shutdown_manager.register_task(tls_handle);
                }
                Err(e) => {
                    tracing::warn!(error = %e, addr = %config.rpc.tls_address, "failed to bind TLS RPC listener, continuing without it");
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to prepare TLS material, continuing without the TLS listener");
            }
        }
    }

    if !args.headless {
        println!("gebunden wallet daemon running");
        println!("  plaintext: {}", config.rpc.plaintext_address);
        if config.security.enable_tls {
            println!("  tls:       {}", config.rpc.tls_address);
        }
        println!("  network:   {}", network);
        println!("  data dir:  {}", data_dir.display());
        println!("\nPress Ctrl+C to stop\n");
    }

    shutdown_manager.wait_for_shutdown().await;
}

fn setup_logging(config: &config::LoggingConfig, verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if verbose { "trace" } else { &config.level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let is_systemd = std::env::var("JOURNAL_STREAM").is_ok() || std::env::var("INVOCATION_ID").is_ok();

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());
    let short_hostname = hostname.split('.').next().unwrap_or(&hostname).to_string();

    match config.format.as_str() {
        "json" => {
            fmt().json().with_env_filter(filter).with_thread_ids(false).init();
        }
        _ => {
            if is_systemd {
                fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .without_time()
                    .compact()
                    .init();
            } else {
                fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_timer(CustomTimer { hostname: short_hostname })
                    .compact()
                    .init();
            }
        }
    }
}

struct CustomTimer {
    hostname: String,
}

impl tracing_subscriber::fmt::time::FormatTime for CustomTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        use chrono::Utc;
        let now = Utc::now();
        write!(w, "{}.{:03} [{}]", now.format("%Y-%m-%d %H:%M:%S"), now.timestamp_subsec_millis(), self.hostname)
    }
}
