use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    /// Optional JSON file with accounts to register at startup.
    pub accounts_file: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    /// Allowed CORS origins (comma-separated). Use "*" for any origin (development only).
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let spotify_client_id = env::var("SPOTIFY_CLIENT_ID").map_err(|_| {
            anyhow::anyhow!(
                "SPOTIFY_CLIENT_ID environment variable must be set. \
                Create an application at https://developer.spotify.com/dashboard"
            )
        })?;

        let spotify_client_secret = env::var("SPOTIFY_CLIENT_SECRET").map_err(|_| {
            anyhow::anyhow!("SPOTIFY_CLIENT_SECRET environment variable must be set")
        })?;

        // Parse CORS origins - default to localhost for development
        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://localhost:8000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Config {
            spotify_client_id,
            spotify_client_secret,
            accounts_file: env::var("ACCOUNTS_FILE").ok(),
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .unwrap_or(8000),
            cors_origins,
        })
    }
}
