//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides
//! - Multiple configuration file locations
//! - Default values for all settings
//! - Fail-fast validation of everything the server needs at startup

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;
use uuid::Uuid;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jwks: JwksConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub recaptcha: RecaptchaConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    /// Admin service accounts ensured at startup
    #[serde(default)]
    pub admin_service_accounts: Vec<AdminServiceAccountConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Runtime worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Public base URL; its path is the prefix every route is mounted under
    pub base_url: String,
    /// Issuer placed in every minted JWT
    pub iss: String,
    /// Path (relative to the base URL) that redeems magic links
    #[serde(default = "default_relative_redirect_path")]
    pub relative_redirect_path: String,
    /// Query parameter carrying the magic-link secret
    #[serde(default = "default_secret_query_key")]
    pub secret_query_key: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// TLS/HTTPS configuration (if not set, server runs HTTP)
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl ServerConfig {
    /// Parsed base URL, normalized to end with a slash so relative joins keep its path
    pub fn base_url(&self) -> Result<Url> {
        let mut raw = self.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).with_context(|| format!("Invalid base URL: {}", self.base_url))
    }

    /// Route prefix derived from the base URL path, without a trailing slash
    ///
    /// Returns an empty string when the service is mounted at the root.
    pub fn route_prefix(&self) -> Result<String> {
        let url = self.base_url()?;
        Ok(url.path().trim_end_matches('/').to_string())
    }

    /// Absolute URL of the magic-link redemption endpoint
    pub fn redirect_endpoint(&self) -> Result<Url> {
        self.base_url()?
            .join(self.relative_redirect_path.trim_start_matches('/'))
            .context("Invalid relative redirect path")
    }
}

/// TLS/HTTPS configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to TLS certificate file (PEM format)
    pub cert_file: PathBuf,
    /// Path to TLS private key file (PEM format)
    pub key_file: PathBuf,
    /// Minimum TLS version (1.2 or 1.3)
    #[serde(default = "default_min_tls_version")]
    pub min_version: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_relative_redirect_path() -> String {
    "redirect".to_string()
}

fn default_secret_query_key() -> String {
    "secret".to_string()
}

fn default_request_timeout() -> u64 {
    5
}

fn default_max_body_bytes() -> usize {
    1 << 20
}

fn default_shutdown_timeout() -> u64 {
    10
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_min_tls_version() -> String {
    "1.3".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
    /// Store magic-link claim blobs unencrypted
    #[serde(default)]
    pub plaintext_claims: bool,
    /// Store JWK private material unencrypted
    #[serde(default)]
    pub plaintext_jwk: bool,
    /// Base64 encoded 32-byte AES-256-GCM key
    #[serde(default)]
    pub encryption_key: Option<String>,
}

impl DatabaseConfig {
    /// Whether any blob kind is sealed at rest
    pub fn encryption_required(&self) -> bool {
        !self.plaintext_claims || !self.plaintext_jwk
    }

    /// Decode the at-rest key, if configured
    pub fn encryption_key_bytes(&self) -> Result<Option<[u8; 32]>> {
        let Some(ref encoded) = self.encryption_key else {
            return Ok(None);
        };

        let decoded = BASE64
            .decode(encoded.trim())
            .context("Encryption key is not valid base64")?;
        let key: [u8; 32] = decoded.as_slice().try_into().map_err(|_| {
            anyhow::anyhow!(
                "Encryption key must decode to exactly 32 bytes, got {}",
                decoded.len()
            )
        })?;

        Ok(Some(key))
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_busy_timeout() -> u64 {
    5
}

/// JWK set configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JwksConfig {
    /// Maximum age of the cached public JWKS
    #[serde(default = "default_jwks_refresh_ms")]
    pub refresh_interval_ms: u64,
    /// Generate a key set when the database holds none
    #[serde(default = "default_true")]
    pub auto_provision: bool,
    /// Algorithms generated on provisioning; the first becomes the signing default
    #[serde(default = "default_provision_algorithms")]
    pub provision_algorithms: Vec<String>,
}

fn default_jwks_refresh_ms() -> u64 {
    5 * 60 * 1000
}

fn default_provision_algorithms() -> Vec<String> {
    vec!["EdDSA".to_string(), "RS256".to_string()]
}

fn default_true() -> bool {
    true
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            refresh_interval_ms: default_jwks_refresh_ms(),
            auto_provision: default_true(),
            provision_algorithms: default_provision_algorithms(),
        }
    }
}

/// Lifespan and size limits applied to create requests
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_jwt_lifespan")]
    pub jwt_lifespan_default_secs: u64,
    #[serde(default = "default_jwt_lifespan_max")]
    pub jwt_lifespan_max_secs: u64,
    #[serde(default = "default_hour")]
    pub link_lifespan_default_secs: u64,
    #[serde(default = "default_month")]
    pub link_lifespan_max_secs: u64,
    #[serde(default = "default_hour")]
    pub otp_lifespan_default_secs: u64,
    #[serde(default = "default_month")]
    pub otp_lifespan_max_secs: u64,
    #[serde(default = "default_otp_length")]
    pub otp_length_default: usize,
}

fn default_jwt_lifespan() -> u64 {
    300
}

fn default_jwt_lifespan_max() -> u64 {
    // roughly 250 years
    250 * 365 * 24 * 60 * 60
}

fn default_hour() -> u64 {
    60 * 60
}

fn default_month() -> u64 {
    30 * 24 * 60 * 60
}

fn default_otp_length() -> usize {
    6
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            jwt_lifespan_default_secs: default_jwt_lifespan(),
            jwt_lifespan_max_secs: default_jwt_lifespan_max(),
            link_lifespan_default_secs: default_hour(),
            link_lifespan_max_secs: default_month(),
            otp_lifespan_default_secs: default_hour(),
            otp_lifespan_max_secs: default_month(),
            otp_length_default: default_otp_length(),
        }
    }
}

/// Per-service-account token bucket configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Bucket capacity
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Tokens added per second; unset disables limiting
    #[serde(default)]
    pub refill_per_second: Option<f64>,
    /// Number of tracked service accounts before cleanup evicts entries
    #[serde(default = "default_max_tracked")]
    pub max_tracked: usize,
    #[serde(default = "default_hour")]
    pub cleanup_interval_secs: u64,
}

fn default_burst() -> u32 {
    5
}

fn default_max_tracked() -> usize {
    10_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: default_burst(),
            refill_per_second: None,
            max_tracked: default_max_tracked(),
            cleanup_interval_secs: default_hour(),
        }
    }
}

/// Outbound email configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub provider: EmailProviderKind,
    #[serde(default = "default_from_email")]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum EmailProviderKind {
    /// Log the message instead of sending it (development)
    #[default]
    Log,
    Smtp,
}

/// SMTP relay settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub starttls: bool,
}

fn default_from_email() -> String {
    "no-reply@localhost".to_string()
}

fn default_from_name() -> String {
    "Magic Links".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            provider: EmailProviderKind::default(),
            from_email: default_from_email(),
            from_name: default_from_name(),
            smtp: None,
        }
    }
}

/// Anti-robot interstitial configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecaptchaConfig {
    #[serde(default)]
    pub mode: RedirectorMode,
    #[serde(default)]
    pub site_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub apk_package_names: Vec<String>,
    #[serde(default = "default_verify_url")]
    pub verify_url: String,
    /// Accept a manual button press without a score check
    #[serde(default)]
    pub button_bypass: bool,
    #[serde(default = "default_instructions_html")]
    pub instructions_html: String,
    /// Key for signing interstitial continuation state; random per process when unset
    #[serde(default)]
    pub state_key: Option<String>,
    #[serde(default = "default_state_lifetime")]
    pub state_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RedirectorMode {
    #[default]
    None,
    RecaptchaV3,
}

fn default_min_score() -> f64 {
    0.5
}

fn default_verify_url() -> String {
    "https://www.google.com/recaptcha/api/siteverify".to_string()
}

fn default_instructions_html() -> String {
    "<p>Checking your browser before continuing.</p>".to_string()
}

fn default_state_lifetime() -> u64 {
    600
}

impl Default for RecaptchaConfig {
    fn default() -> Self {
        Self {
            mode: RedirectorMode::default(),
            site_key: String::new(),
            secret_key: String::new(),
            min_score: default_min_score(),
            hostnames: Vec::new(),
            actions: Vec::new(),
            apk_package_names: Vec::new(),
            verify_url: default_verify_url(),
            button_bypass: false,
            instructions_html: default_instructions_html(),
            state_key: None,
            state_lifetime_secs: default_state_lifetime(),
        }
    }
}

/// Expired record cleanup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanupConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_hour")]
    pub interval_secs: u64,
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
}

fn default_retention() -> u64 {
    24 * 60 * 60
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_hour(),
            retention_secs: default_retention(),
        }
    }
}

/// Admin service account declared in configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdminServiceAccountConfig {
    pub uuid: Uuid,
    pub api_key: Uuid,
    pub aud: Uuid,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    /// Log output target (console or file)
    #[serde(default)]
    pub target: LogTarget,
    /// Directory for log files (used when target is "file")
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Log file name prefix
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    /// Enable daily log rotation
    #[serde(default = "default_true")]
    pub daily_rotation: bool,
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Log to console (stdout/stderr) - default for development
    #[default]
    Console,
    /// Log to file with optional rotation - recommended for production
    File,
    /// Log to both console and file
    Both,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/magiclinks")
}

fn default_log_prefix() -> String {
    "magiclinks".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: true,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                workers: default_workers(),
                base_url: String::new(),
                iss: String::new(),
                relative_redirect_path: default_relative_redirect_path(),
                secret_query_key: default_secret_query_key(),
                request_timeout_secs: default_request_timeout(),
                max_body_bytes: default_max_body_bytes(),
                shutdown_timeout_secs: default_shutdown_timeout(),
                tls: None,
            },
            database: DatabaseConfig {
                url: "sqlite://./data/magiclinks.db".to_string(),
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                busy_timeout_secs: default_busy_timeout(),
                plaintext_claims: false,
                plaintext_jwk: false,
                encryption_key: None,
            },
            jwks: JwksConfig::default(),
            limits: LimitsConfig::default(),
            rate_limit: RateLimitConfig::default(),
            email: EmailConfig::default(),
            recaptcha: RecaptchaConfig::default(),
            cleanup: CleanupConfig::default(),
            admin_service_accounts: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with MAGICLINKS_)
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, preferring an explicit file path
    ///
    /// An explicit path (the `--config` flag) must exist; otherwise the
    /// `MAGICLINKS_CONFIG` variable and the standard locations are searched.
    pub fn load_from(explicit: Option<PathBuf>) -> Result<Self> {
        // Try to load .env file if it exists
        let _ = dotenvy::dotenv();

        if let Some(ref path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file not found: {:?}", path);
            }
        }

        let config_path = explicit.or_else(|| {
            std::env::var("MAGICLINKS_CONFIG")
                .map(PathBuf::from)
                .ok()
                .or_else(Self::find_config_file)
        });

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse a YAML configuration file without applying overrides
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/magiclinks/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("magiclinks/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MAGICLINKS_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("MAGICLINKS_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(base_url) = std::env::var("MAGICLINKS_BASE_URL") {
            self.server.base_url = base_url;
        }
        if let Ok(iss) = std::env::var("MAGICLINKS_ISS") {
            self.server.iss = iss;
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(key) = std::env::var("MAGICLINKS_ENCRYPTION_KEY") {
            self.database.encryption_key = Some(key);
        }

        if let Ok(secret) = std::env::var("MAGICLINKS_RECAPTCHA_SECRET_KEY") {
            self.recaptcha.secret_key = secret;
        }
        if let Ok(password) = std::env::var("MAGICLINKS_SMTP_PASSWORD") {
            if let Some(ref mut smtp) = self.email.smtp {
                smtp.password = Some(password);
            }
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("MAGICLINKS_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }
        if self.server.workers == 0 {
            anyhow::bail!("Server workers must be greater than 0");
        }

        if self.server.base_url.trim().is_empty() {
            anyhow::bail!("Base URL (server.base_url or MAGICLINKS_BASE_URL) is required");
        }
        if self.server.iss.trim().is_empty() {
            anyhow::bail!("JWT issuer (server.iss or MAGICLINKS_ISS) is required");
        }

        let base_url = self.server.base_url()?;
        if !matches!(base_url.scheme(), "http" | "https") {
            anyhow::bail!("Base URL must use http or https: {}", self.server.base_url);
        }
        if self.server.relative_redirect_path.trim_matches('/').is_empty() {
            anyhow::bail!("Relative redirect path cannot be empty");
        }
        self.server.redirect_endpoint()?;
        if self.server.secret_query_key.is_empty() {
            anyhow::bail!("Secret query key cannot be empty");
        }
        if self.server.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        let key = self.database.encryption_key_bytes()?;
        if self.database.encryption_required() && key.is_none() {
            anyhow::bail!(
                "An encryption key is required unless both plaintext_claims and plaintext_jwk are enabled"
            );
        }

        if self.jwks.refresh_interval_ms == 0 {
            anyhow::bail!("JWKS refresh interval must be greater than 0");
        }
        if self.jwks.auto_provision && self.jwks.provision_algorithms.is_empty() {
            anyhow::bail!("JWKS auto provisioning requires at least one algorithm");
        }

        if self.limits.jwt_lifespan_max_secs < 5
            || self.limits.link_lifespan_max_secs < 5
            || self.limits.otp_lifespan_max_secs < 5
        {
            anyhow::bail!("Maximum lifespans must be at least 5 seconds");
        }
        if !(1..=12).contains(&self.limits.otp_length_default) {
            anyhow::bail!("Default OTP length must be between 1 and 12");
        }

        if self.rate_limit.burst == 0 {
            anyhow::bail!("Rate limit burst must be greater than 0");
        }
        if let Some(refill) = self.rate_limit.refill_per_second {
            if !refill.is_finite() || refill <= 0.0 {
                anyhow::bail!("Rate limit refill must be a positive number of tokens per second");
            }
        }

        if self.email.provider == EmailProviderKind::Smtp && self.email.smtp.is_none() {
            anyhow::bail!("SMTP email provider selected but no smtp section configured");
        }

        if self.recaptcha.mode == RedirectorMode::RecaptchaV3 {
            if self.recaptcha.site_key.is_empty() || self.recaptcha.secret_key.is_empty() {
                anyhow::bail!("reCAPTCHA v3 requires both site_key and secret_key");
            }
            if !(0.0..=1.0).contains(&self.recaptcha.min_score) {
                anyhow::bail!("reCAPTCHA min_score must be between 0.0 and 1.0");
            }
            Url::parse(&self.recaptcha.verify_url).context("Invalid reCAPTCHA verify URL")?;
        }

        if let Some(ref tls) = self.server.tls {
            if !tls.cert_file.exists() {
                anyhow::bail!("TLS certificate file not found: {:?}", tls.cert_file);
            }
            if !tls.key_file.exists() {
                anyhow::bail!("TLS key file not found: {:?}", tls.key_file);
            }
            if tls.min_version != "1.2" && tls.min_version != "1.3" {
                anyhow::bail!(
                    "Invalid TLS minimum version: {}. Must be '1.2' or '1.3'",
                    tls.min_version
                );
            }
        }

        Ok(())
    }
}
