//! Configuration shared by the auth gateway and the messaging relay.
//!
//! All configuration is loaded from environment variables; callers are expected
//! to have run `dotenvy::dotenv()` (or similar) before constructing a `Config`.
//! No secrets are logged by `Debug` — see [`Config::redacted`].

use std::time::Duration;

/// Default HMAC-SHA256 bearer token lifetime (120 hours).
pub const DEFAULT_TOKEN_TTL_HOURS: u64 = 120;

/// Default allowed clock skew when verifying a token, in seconds.
pub const DEFAULT_TOKEN_CLOCK_SKEW_SECS: u64 = 60;

/// Server configuration, shared across both binaries.
#[derive(Clone)]
pub struct Config {
    // === Database ===
    /// Path to the SQLite database file. Takes precedence over the
    /// `(server, database, username, password)` tuple when set.
    pub db_path: Option<String>,
    pub db_server: Option<String>,
    pub db_database: Option<String>,
    pub db_username: Option<String>,
    pub db_password: Option<String>,

    // === Secrets ===
    /// HMAC-SHA256 signing key for bearer tokens.
    pub jwt_secret: String,
    /// Process-wide password pepper, concatenated with every password before hashing.
    pub secret_key: String,

    // === HTTP (auth gateway) ===
    pub port: u16,

    // === TCP (messaging relay) ===
    pub socket_host: String,
    pub socket_port: u16,

    // === Limits ===
    /// Cap on concurrently accepted TCP connections (also the `listen` backlog).
    pub max_connections: usize,
    /// Oversize frames beyond this many bytes cause a disconnect.
    pub max_frame_bytes: usize,

    // === Token Service knobs ===
    pub token_ttl: Duration,
    pub token_clock_skew: Duration,

    // === Argon2id knobs ===
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,

    /// Require a token on the handshake frame before binding a connection.
    pub require_handshake_token: bool,

    pub verbose: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("DB_PATH").ok(),
            db_server: std::env::var("SERVER").ok(),
            db_database: std::env::var("DATABASE").ok(),
            db_username: std::env::var("USERNAME").ok(),
            db_password: std::env::var("PASSWORD").ok(),

            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "default_jwt_secret".to_string()),
            secret_key: std::env::var("SECRET_KEY")
                .unwrap_or_else(|_| "default_secret_key".to_string()),

            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),

            socket_host: std::env::var("SOCKET_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            socket_port: std::env::var("SOCKET_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(9000),

            max_connections: std::env::var("MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(100),
            max_frame_bytes: std::env::var("MAX_FRAME_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4096),

            token_ttl: Duration::from_secs(
                std::env::var("TOKEN_TTL_HOURS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_TOKEN_TTL_HOURS)
                    * 3600,
            ),
            token_clock_skew: Duration::from_secs(
                std::env::var("TOKEN_CLOCK_SKEW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_TOKEN_CLOCK_SKEW_SECS),
            ),

            argon2_memory_kib: std::env::var("ARGON2_MEMORY_KIB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(19 * 1024),
            argon2_iterations: std::env::var("ARGON2_ITERATIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),

            require_handshake_token: std::env::var("REQUIRE_HANDSHAKE_TOKEN")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),

            verbose: std::env::var("VERBOSE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// The database connection descriptor: an explicit file path if configured,
    /// otherwise a `sqlite://` URL derived from the legacy `(server, database)` pair,
    /// falling back to an on-disk default.
    pub fn database_url(&self) -> String {
        if let Some(path) = &self.db_path {
            return format!("sqlite://{path}?mode=rwc");
        }
        if let Some(database) = &self.db_database {
            return format!("sqlite://{database}.db?mode=rwc");
        }
        "sqlite://snibble.db?mode=rwc".to_string()
    }

    /// A `Debug`-safe view that never prints `jwt_secret`, `secret_key`, or `db_password`.
    pub fn redacted(&self) -> ConfigRedacted<'_> {
        ConfigRedacted(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

/// `Debug` wrapper that elides secret fields. See [`Config::redacted`].
pub struct ConfigRedacted<'a>(&'a Config);

impl std::fmt::Debug for ConfigRedacted<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("db_path", &self.0.db_path)
            .field("db_server", &self.0.db_server)
            .field("db_database", &self.0.db_database)
            .field("jwt_secret", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("port", &self.0.port)
            .field("socket_host", &self.0.socket_host)
            .field("socket_port", &self.0.socket_port)
            .field("max_connections", &self.0.max_connections)
            .field("max_frame_bytes", &self.0.max_frame_bytes)
            .field("token_ttl", &self.0.token_ttl)
            .field("require_handshake_token", &self.0.require_handshake_token)
            .field("verbose", &self.0.verbose)
            .finish()
    }
}
