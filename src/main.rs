//! Magiclinks server
//!
//! Issues JWTs, magic links and one-time passwords for service accounts and
//! publishes the JWK set that verifies them.

use std::env;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use config::LogFormat;
use magiclinks::{
    build_router, config, db, middleware, services, AppConfig, AppState, AtRestPolicy,
};

fn main() -> Result<()> {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    // Check for --help flag
    if args.iter().any(|arg| arg == "--help" || arg == "-h") {
        print_help();
        return Ok(());
    }

    // Check for --version flag
    if args.iter().any(|arg| arg == "--version" || arg == "-V") {
        println!("Magiclinks {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration first (before logging, so we know log format)
    let config_path = flag_value(&args, "--config")?.map(PathBuf::from);
    let config = AppConfig::load_from(config_path).context("Failed to load configuration")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers)
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    if let Some(alg) = flag_value(&args, "--rotate-key")? {
        return runtime.block_on(rotate_key(config, alg));
    }
    if let Some(kid) = flag_value(&args, "--delete-key")? {
        return runtime.block_on(delete_key(config, kid));
    }
    if args.iter().any(|arg| arg == "--list-keys") {
        return runtime.block_on(list_keys(config));
    }

    runtime.block_on(serve(config))
}

/// Value following `flag`, if the flag is present
fn flag_value<'a>(args: &'a [String], flag: &str) -> Result<Option<&'a str>> {
    match args.iter().position(|arg| arg == flag) {
        Some(i) => args
            .get(i + 1)
            .map(|value| Some(value.as_str()))
            .with_context(|| format!("{flag} requires a value")),
        None => Ok(None),
    }
}

async fn serve(config: AppConfig) -> Result<()> {
    // The guard must be kept alive for the duration of the program
    // to ensure log messages are flushed to files
    let _log_guard = init_logging(&config);

    info!("Magiclinks starting up");
    info!(workers = config.server.workers, "Configuration loaded successfully");

    ensure_data_directory(&config)?;

    info!("Initializing database connection");
    let db = db::init_pool(&config.database)
        .await
        .context("Failed to initialize database")?;

    let at_rest = AtRestPolicy::from_config(&config.database)?;
    let setup = services::bootstrap::check_setup(&db, &at_rest)
        .await
        .context("Database setup check failed")?;
    info!(
        semver = %setup.semver,
        plaintext_claims = setup.plaintext_claims,
        plaintext_jwk = setup.plaintext_jwk,
        "Database setup verified"
    );

    services::bootstrap::ensure_admin_accounts(&db, &config.admin_service_accounts)
        .await
        .context("Failed to create admin service accounts")?;
    services::bootstrap::provision_keys(&db, &at_rest, &config.jwks)
        .await
        .context("Failed to provision signing keys")?;

    let state = AppState::new(config.clone(), db.clone())?;

    // Warm the JWKS cache so key problems surface at startup
    let snapshot = state.jwks.refresh().await.context("Failed to load JWK set")?;
    info!(age_ms = snapshot.age().as_millis() as u64, "JWKS cache loaded");

    let mut background = Vec::new();
    if state.rate_limit.enabled() {
        background.push(middleware::spawn_rate_limit_cleanup(
            state.rate_limit.clone(),
            Duration::from_secs(config.rate_limit.cleanup_interval_secs),
        ));
    } else {
        info!("Rate limiting disabled (no refill rate configured)");
    }
    if let Some(handle) =
        services::spawn_expired_cleanup(db.clone(), at_rest, config.cleanup.clone())
    {
        background.push(handle);
    }

    let app = build_router(state)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address configuration")?;
    let shutdown_timeout = Duration::from_secs(config.server.shutdown_timeout_secs);

    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone(), shutdown_timeout));

    // Check if TLS is configured
    if let Some(ref tls_config) = config.server.tls {
        info!("Starting HTTPS server on https://{}", addr);
        info!("TLS certificate: {:?}", tls_config.cert_file);

        let rustls_config = create_rustls_config(tls_config).await?;
        axum_server::bind_rustls(addr, rustls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("HTTPS server error")?;
    } else {
        info!("Starting HTTP server on http://{}", addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await
            .context("HTTP server error")?;
    }

    for task in background {
        task.abort();
    }
    db.close().await;
    info!("Magiclinks stopped");

    Ok(())
}

/// Wait for SIGINT or SIGTERM, then drain in-flight requests
async fn shutdown_on_signal(handle: axum_server::Handle<SocketAddr>, timeout: Duration) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
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
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(timeout_secs = timeout.as_secs(), "Shutdown signal received, draining requests");
    handle.graceful_shutdown(Some(timeout));
}

/// Create RusTLS configuration from TLS config
async fn create_rustls_config(
    tls_config: &config::TlsConfig,
) -> Result<axum_server::tls_rustls::RustlsConfig> {
    use axum_server::tls_rustls::RustlsConfig;
    use rustls::crypto::aws_lc_rs::default_provider;
    use rustls::ServerConfig;

    // Load certificate chain
    let cert_file = std::fs::File::open(&tls_config.cert_file)
        .with_context(|| format!("Failed to open certificate file: {:?}", tls_config.cert_file))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_reader)
        .filter_map(|r| r.ok())
        .collect();

    if certs.is_empty() {
        anyhow::bail!("No certificates found in {:?}", tls_config.cert_file);
    }

    // Load private key
    let key_file = std::fs::File::open(&tls_config.key_file)
        .with_context(|| format!("Failed to open key file: {:?}", tls_config.key_file))?;
    let mut key_reader = BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .with_context(|| format!("Failed to read private key: {:?}", tls_config.key_file))?
        .ok_or_else(|| anyhow::anyhow!("No private key found in {:?}", tls_config.key_file))?;

    let versions: Vec<&'static rustls::SupportedProtocolVersion> =
        match tls_config.min_version.as_str() {
            "1.3" => vec![&rustls::version::TLS13],
            _ => vec![&rustls::version::TLS12, &rustls::version::TLS13],
        };
    info!("TLS configured with minimum version: {}", tls_config.min_version);

    let mut server_config = ServerConfig::builder_with_provider(default_provider().into())
        .with_protocol_versions(&versions)
        .context("Failed to set TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to build TLS server config")?;

    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(server_config)))
}

/// Generate a key and make it the signing default
async fn rotate_key(config: AppConfig, alg: &str) -> Result<()> {
    let (pool, at_rest) = open_database(&config).await?;
    let record = services::bootstrap::rotate_key(&pool, &at_rest, alg).await?;
    println!("Rotated signing key: {} ({})", record.kid, record.alg);
    pool.close().await;
    Ok(())
}

async fn delete_key(config: AppConfig, kid: &str) -> Result<()> {
    let (pool, at_rest) = open_database(&config).await?;
    services::bootstrap::delete_key(&pool, &at_rest, kid).await?;
    println!("Deleted signing key: {kid}");
    pool.close().await;
    Ok(())
}

async fn list_keys(config: AppConfig) -> Result<()> {
    let (pool, at_rest) = open_database(&config).await?;
    let keys = services::bootstrap::list_keys(&pool, &at_rest).await?;

    if keys.is_empty() {
        println!("No signing keys");
    }
    for key in &keys {
        let default = if key.signing_default { " (default)" } else { "" };
        println!(
            "{}  {:<6}  {}{}",
            key.kid,
            key.alg,
            db::format_timestamp(key.created_at),
            default
        );
    }

    pool.close().await;
    Ok(())
}

/// Pool and at-rest policy for the maintenance commands
async fn open_database(config: &AppConfig) -> Result<(db::DbPool, AtRestPolicy)> {
    ensure_data_directory(config)?;
    let pool = db::init_pool(&config.database)
        .await
        .context("Failed to initialize database")?;
    let at_rest = AtRestPolicy::from_config(&config.database)?;
    services::bootstrap::check_setup(&pool, &at_rest)
        .await
        .context("Database setup check failed")?;
    Ok((pool, at_rest))
}

/// Initialize the logging/tracing infrastructure
fn init_logging(config: &AppConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use config::LogTarget;
    use tracing_subscriber::{prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let log_config = &config.logging;

    match &log_config.target {
        LogTarget::Console => {
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_console_logging(subscriber, &log_config.format);
            None
        }
        LogTarget::File => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_file_logging(subscriber, &log_config.format, writer);
            Some(guard)
        }
        LogTarget::Both => {
            let (writer, guard) = create_file_writer(log_config);
            let subscriber = tracing_subscriber::registry().with(env_filter);
            init_console_logging(
                subscriber.with(file_layer(&log_config.format, writer)),
                &log_config.format,
            );
            Some(guard)
        }
    }
}

/// Create a file writer with optional daily rotation
fn create_file_writer(
    log_config: &config::LoggingConfig,
) -> (
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
) {
    if let Err(e) = std::fs::create_dir_all(&log_config.log_dir) {
        eprintln!(
            "Warning: Failed to create log directory {:?}: {}",
            log_config.log_dir, e
        );
    }

    let file_appender = if log_config.daily_rotation {
        tracing_appender::rolling::daily(&log_config.log_dir, &log_config.log_prefix)
    } else {
        tracing_appender::rolling::never(&log_config.log_dir, &log_config.log_prefix)
    };

    tracing_appender::non_blocking(file_appender)
}

/// Formatting layer writing to the log file
fn file_layer<S>(
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) -> Box<dyn tracing_subscriber::Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    use tracing_subscriber::{fmt, Layer};

    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// Initialize console logging on top of `subscriber`
fn init_console_logging<S>(subscriber: S, format: &LogFormat)
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync + 'static,
{
    use tracing_subscriber::{fmt, prelude::*};

    match format {
        LogFormat::Json => {
            subscriber
                .with(fmt::layer().json().with_target(true))
                .init();
        }
        LogFormat::Compact => {
            subscriber
                .with(fmt::layer().compact().with_target(false))
                .init();
        }
        LogFormat::Pretty => {
            subscriber
                .with(
                    fmt::layer()
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false),
                )
                .init();
        }
    }
}

/// Initialize file-only logging
fn init_file_logging<S>(
    subscriber: S,
    format: &LogFormat,
    writer: tracing_appender::non_blocking::NonBlocking,
) where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + Send + Sync + 'static,
{
    use tracing_subscriber::prelude::*;

    subscriber.with(file_layer(format, writer)).init();
}

/// Ensure the data directory exists
fn ensure_data_directory(config: &AppConfig) -> Result<()> {
    if let Some(path) = sqlite_path(&config.database.url) {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create data directory")?;
                info!("Created data directory: {:?}", parent);
            }
        }
    }
    Ok(())
}

/// File path of a SQLite URL, without query options
fn sqlite_path(url: &str) -> Option<&str> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or(path);
    (!path.is_empty() && path != ":memory:").then_some(path)
}

/// Print help message
fn print_help() {
    println!(
        r#"Magiclinks {}

USAGE:
    magiclinks-server [OPTIONS]

OPTIONS:
    -h, --help              Print this help message
    -V, --version           Print version information
    --config <PATH>         Configuration file to load
    --rotate-key <ALG>      Generate a signing key (EdDSA, ES256, ES384, RS256,
                            RS384, RS512 or HS512) and make it the signing
                            default
    --delete-key <KID>      Delete a key that is not the signing default
    --list-keys             List stored signing keys

ENVIRONMENT:
    MAGICLINKS_CONFIG           Path to configuration file (default: config.yaml)
    MAGICLINKS_BASE_URL         Public base URL
    MAGICLINKS_ISS              JWT issuer
    MAGICLINKS_ENCRYPTION_KEY   Base64 encoded 32-byte at-rest key
    DATABASE_URL                SQLite database URL
    RUST_LOG                    Log filter

CONFIGURATION:
    The server looks for configuration files in the following order:
    1. Path given with --config
    2. Path specified by MAGICLINKS_CONFIG environment variable
    3. ./config.yaml
    4. ./config/config.yaml
    5. /etc/magiclinks/config.yaml
    6. <user config dir>/magiclinks/config.yaml"#,
        env!("CARGO_PKG_VERSION")
    );
}
