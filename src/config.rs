use std::{env, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Credentials for one social-login provider.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub address: SocketAddr,
    pub frontend_url: String,
    pub upload_dir: PathBuf,
    pub cookie_secure: bool,
    pub google: Option<OAuthClient>,
    pub github: Option<OAuthClient>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let host: std::net::IpAddr = try_load("HOST", "127.0.0.1")?;
        let port: u16 = try_load("PORT", "5000")?;

        Ok(Self {
            database_url,
            jwt_secret,
            address: SocketAddr::new(host, port),
            frontend_url: try_load("FRONTEND_URL", "http://localhost:5173")?,
            upload_dir: PathBuf::from(try_load::<String>("UPLOAD_DIR", "uploads")?),
            cookie_secure: try_load("COOKIE_SECURE", "false")?,
            google: oauth_client("GOOGLE"),
            github: oauth_client("GITHUB"),
        })
    }
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow::anyhow!("Invalid {key} value {raw:?}: {e}"))
}

fn oauth_client(prefix: &str) -> Option<OAuthClient> {
    let client_id = env::var(format!("{prefix}_CLIENT_ID")).ok();
    let client_secret = env::var(format!("{prefix}_CLIENT_SECRET")).ok();
    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) => Some(OAuthClient {
            client_id,
            client_secret,
            redirect_uri: env::var(format!("{prefix}_REDIRECT_URI")).ok(),
        }),
        _ => {
            warn!("{prefix} OAuth credentials not configured, social login disabled");
            None
        }
    }
}
