use std::path::PathBuf;

use anyhow::Context;
use reqwest::Url;

/// Default credential lifetime: 24 hours.
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60 * 24;
pub const DEFAULT_TOKEN_KEY: &str = "procrastiPlanner.authToken";
pub const SESSION_COOKIE: &str = "auth-session";
pub const DISPLAY_COOKIE: &str = "user-email";

/// Backend paths, relative to the API base URL.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub session: String,
    pub login: String,
    pub logout: String,
    pub projects: String,
    pub users: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            session: "/api/auth/me".into(),
            login: "/api/auth/login".into(),
            logout: "/api/auth/logout".into(),
            projects: "/api/projects".into(),
            users: "/api/users".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub token_key: String,
    pub session_ttl_secs: u64,
    /// Where the CLI keeps its durable store; `None` keeps credentials in memory.
    pub state_file: Option<PathBuf>,
    pub endpoints: Endpoints,
}

impl ClientConfig {
    pub fn new(api_url: Url) -> Self {
        Self {
            api_url,
            token_key: DEFAULT_TOKEN_KEY.into(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            state_file: None,
            endpoints: Endpoints::default(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let raw = std::env::var("PROCRASTI_API_URL").context("PROCRASTI_API_URL is not set")?;
        let api_url = Url::parse(&raw).with_context(|| format!("invalid PROCRASTI_API_URL {raw:?}"))?;
        Ok(Self::new(api_url).with_env_overrides())
    }

    /// Apply the optional `PROCRASTI_*` settings on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("PROCRASTI_TOKEN_KEY") {
            self.token_key = key;
        }
        if let Some(ttl) = std::env::var("PROCRASTI_SESSION_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.session_ttl_secs = ttl;
        }
        if let Ok(path) = std::env::var("PROCRASTI_STATE_FILE") {
            self.state_file = Some(PathBuf::from(path));
        }
        self
    }

    /// Origin used to scope the cookie mirror (scheme, host and port of the API).
    pub fn origin(&self) -> Url {
        let mut origin = self.api_url.clone();
        origin.set_path("/");
        origin.set_query(None);
        origin.set_fragment(None);
        origin
    }
}
