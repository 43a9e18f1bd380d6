//! Bearer-token persistence across the durable store and its cookie mirror.
//!
//! The durable store is authoritative for the token value. The `auth-session`
//! cookie only signals that a session exists and is never read back as a
//! token. Writes go durable store first, then mirror; clears go mirror first,
//! then durable store, so the cheap cookie check never claims a session for
//! which no token exists.

use std::sync::Arc;

use reqwest::cookie::{CookieStore, Jar};
use reqwest::Url;
use tracing::{debug, warn};

use crate::config::{DISPLAY_COOKIE, SESSION_COOKIE};
use crate::storage::DurableStore;

/// The mediums a credential can live in. Absent when running detached from a
/// user agent, e.g. while rendering on the server.
#[derive(Clone)]
pub struct BrowserContext {
    pub storage: Arc<dyn DurableStore>,
    pub cookies: Arc<Jar>,
    pub origin: Url,
}

impl BrowserContext {
    pub fn new(storage: Arc<dyn DurableStore>, origin: Url) -> Self {
        Self {
            storage,
            cookies: Arc::new(Jar::default()),
            origin,
        }
    }

    fn is_secure(&self) -> bool {
        self.origin.scheme() == "https"
    }

    fn write_cookie(&self, name: &str, value: &str, max_age: u64) {
        let mut cookie = format!(
            "{name}={}; Path=/; Max-Age={max_age}; SameSite=Strict",
            urlencoding::encode(value)
        );
        if self.is_secure() {
            cookie.push_str("; Secure");
        }
        self.cookies.add_cookie_str(&cookie, &self.origin);
    }

    fn expire_cookie(&self, name: &str) {
        self.write_cookie(name, "", 0);
    }

    fn cookie(&self, name: &str) -> Option<String> {
        let header = self.cookies.cookies(&self.origin)?;
        let header = header.to_str().ok()?;
        header.split(';').find_map(|pair| {
            let (k, v) = pair.trim().split_once('=')?;
            if k != name || v.is_empty() {
                return None;
            }
            urlencoding::decode(v).ok().map(|v| v.into_owned())
        })
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    context: Option<BrowserContext>,
    token_key: String,
}

impl CredentialStore {
    pub fn new(context: BrowserContext, token_key: impl Into<String>) -> Self {
        Self {
            context: Some(context),
            token_key: token_key.into(),
        }
    }

    /// A store with no mediums behind it: every write is a no-op, every read is `None`.
    pub fn detached() -> Self {
        Self {
            context: None,
            token_key: String::new(),
        }
    }

    /// Cookie jar shared with the HTTP client, if attached.
    pub fn cookie_jar(&self) -> Option<Arc<Jar>> {
        self.context.as_ref().map(|ctx| ctx.cookies.clone())
    }

    /// Store `token` for `ttl_secs`, or clear both mediums when `token` is `None`.
    pub fn persist(&self, token: Option<&str>, ttl_secs: u64) {
        let Some(ctx) = &self.context else {
            return;
        };
        match token {
            Some(token) => {
                if let Err(e) = ctx.storage.set(&self.token_key, token) {
                    warn!(error = %e, "failed to write credential to durable store");
                    return;
                }
                ctx.write_cookie(SESSION_COOKIE, "1", ttl_secs);
                debug!(ttl_secs, "credential persisted");
            }
            None => {
                ctx.expire_cookie(SESSION_COOKIE);
                ctx.expire_cookie(DISPLAY_COOKIE);
                if let Err(e) = ctx.storage.remove(&self.token_key) {
                    warn!(error = %e, "failed to remove credential from durable store");
                }
                debug!("credential cleared");
            }
        }
    }

    pub fn clear(&self) {
        self.persist(None, 0);
    }

    pub fn read(&self) -> Option<String> {
        let ctx = self.context.as_ref()?;
        match ctx.storage.get(&self.token_key) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "failed to read credential from durable store");
                None
            }
        }
    }

    /// Cheap presence test against the cookie mirror only.
    pub fn has_session(&self) -> bool {
        self.context
            .as_ref()
            .and_then(|ctx| ctx.cookie(SESSION_COOKIE))
            .is_some()
    }

    /// Re-write the session cookie when the durable store holds a token, e.g.
    /// after a restart left the store populated and the jar empty.
    pub fn sync_mirror(&self, ttl_secs: u64) -> bool {
        let Some(ctx) = &self.context else {
            return false;
        };
        if self.read().is_none() {
            return false;
        }
        ctx.write_cookie(SESSION_COOKIE, "1", ttl_secs);
        debug!(ttl_secs, "session cookie restored from durable store");
        true
    }

    pub fn set_display_name(&self, name: &str, ttl_secs: u64) {
        if let Some(ctx) = &self.context {
            ctx.write_cookie(DISPLAY_COOKIE, name, ttl_secs);
        }
    }

    pub fn display_name(&self) -> Option<String> {
        self.context.as_ref()?.cookie(DISPLAY_COOKIE)
    }
}
