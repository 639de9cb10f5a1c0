use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for MemoryFrame
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Auth backend configuration
    #[serde(default)]
    pub auth: AuthConfig,
    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Order email configuration
    #[serde(default)]
    pub email: EmailConfig,
    /// Playback API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port (playback API only)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    /// Page that direct links and QR codes point at
    #[serde(default = "default_share_base_url")]
    pub share_base_url: String,
}

/// Auth backend (GoTrue REST) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Base URL of the auth API, e.g. https://<project>.supabase.co/auth/v1
    #[serde(default)]
    pub url: String,
    /// Project API key sent in the `apikey` header
    #[serde(default)]
    pub api_key: String,
    /// Where the signed-in session is persisted between runs
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Bucket holding all photo and video assets
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (hosted S3 endpoint, MinIO, LocalStack)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Prefix of public object URLs; derived from the endpoint when unset
    pub public_url_base: Option<String>,
    /// Largest accepted video upload in bytes (50MiB default)
    #[serde(default = "default_max_video_bytes")]
    pub max_video_bytes: u64,
    /// Cache-Control max-age written on uploaded objects
    #[serde(default = "default_cache_control_secs")]
    pub cache_control_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default)]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Transactional email (EmailJS) configuration for order submissions
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Send endpoint
    #[serde(default = "default_email_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub service_id: String,
    #[serde(default)]
    pub template_id: String,
    /// Public key, sent as `user_id`
    #[serde(default)]
    pub public_key: String,
    /// Package name included in every order
    #[serde(default = "default_package")]
    pub package: String,
    /// Package price included in every order
    #[serde(default = "default_price")]
    pub price: String,
    /// HTTP request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Playback API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "memoryframe".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_share_base_url() -> String {
    "http://localhost:8080/scan".to_string()
}

/// `$XDG_CONFIG_HOME/memoryframe/session.json`, else under `$HOME/.config`
fn default_session_file() -> PathBuf {
    session_file_under(
        std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn session_file_under(xdg_config_home: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    let config_dir = xdg_config_home
        .filter(|dir| dir.is_absolute())
        .or_else(|| home.map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from(".config"));
    config_dir.join("memoryframe").join("session.json")
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_bucket() -> String {
    "frames".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_video_bytes() -> u64 {
    50 * 1024 * 1024 // 50MiB
}

fn default_cache_control_secs() -> u64 {
    3600
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    0
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_email_endpoint() -> String {
    "https://api.emailjs.com/api/v1.0/email/send".to_string()
}

fn default_package() -> String {
    "Premium Package".to_string()
}

fn default_price() -> String {
    "$49.99".to_string()
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "memoryframe")?
            .set_default("service.log_level", "info")?
            .add_source(config::File::with_name("config/memoryframe").required(false))
            .add_source(config::File::with_name("/etc/memoryframe/memoryframe").required(false))
            // MEMORYFRAME__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("MEMORYFRAME")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get auth request timeout as Duration
    pub fn auth_request_timeout(&self) -> Duration {
        Duration::from_secs(self.auth.request_timeout_secs)
    }

    /// Get email request timeout as Duration
    pub fn email_request_timeout(&self) -> Duration {
        Duration::from_secs(self.email.request_timeout_secs)
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl StorageConfig {
    /// Prefix every public object URL starts with
    pub fn resolved_public_url_base(&self) -> String {
        if let Some(ref base) = self.public_url_base {
            return base.trim_end_matches('/').to_string();
        }
        match self.endpoint_url {
            Some(ref endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
            share_base_url: default_share_base_url(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: String::new(),
            session_file: default_session_file(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: default_run_migrations(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: default_bucket(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            public_url_base: None,
            max_video_bytes: default_max_video_bytes(),
            cache_control_secs: default_cache_control_secs(),
        }
    }
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            endpoint: default_email_endpoint(),
            service_id: String::new(),
            template_id: String::new(),
            public_key: String::new(),
            package: default_package(),
            price: default_price(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}
