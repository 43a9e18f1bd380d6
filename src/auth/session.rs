use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::dto::{LoginRequest, LoginResponse, SessionPayload, User};
use super::scope::{Scope, ScopeToken};
use crate::client::{ApiClient, ApiRequest};
use crate::config::Endpoints;
use crate::credentials::CredentialStore;
use crate::error::{ClientError, SessionError};

pub const LOGIN_FALLBACK: &str = "Invalid credentials. Please try again.";
pub const LOGOUT_FALLBACK: &str = "Unable to complete logout.";
const NO_SESSION_AFTER_LOGIN: &str = "Signed in, but the session could not be loaded.";

/// Observer-facing session state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub user: Option<User>,
    /// True while a bootstrap, login or logout call is outstanding.
    pub loading: bool,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

struct Inner {
    api: ApiClient,
    endpoints: Endpoints,
    session_ttl_secs: u64,
    state: watch::Sender<Session>,
    scope: Scope,
}

/// Owns the current-user state and every call that changes it.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

/// Keeps `loading` raised for as long as it lives.
struct Loading<'a> {
    manager: &'a SessionManager,
    token: ScopeToken,
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        let state = &self.manager.inner.state;
        self.manager.inner.scope.run_if_live(self.token, |pending| {
            *pending = pending.saturating_sub(1);
            let loading = *pending > 0;
            state.send_modify(|s| s.loading = loading);
        });
    }
}

impl SessionManager {
    pub fn new(api: ApiClient, endpoints: Endpoints, session_ttl_secs: u64) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            inner: Arc::new(Inner {
                api,
                endpoints,
                session_ttl_secs,
                state,
                scope: Scope::default(),
            }),
        }
    }

    fn credentials(&self) -> &CredentialStore {
        self.inner.api.credentials()
    }

    pub fn session(&self) -> Session {
        self.inner.state.borrow().clone()
    }

    pub fn user(&self) -> Option<User> {
        self.inner.state.borrow().user.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.inner.scope.is_active()
    }

    /// Open a new observer scope and resolve the session once.
    #[instrument(skip(self))]
    pub async fn activate(&self) {
        let token = self.inner.scope.activate();
        self.bootstrap_in(token).await;
    }

    /// Close the observer scope: results of calls still in flight are discarded.
    pub fn deactivate(&self) {
        self.inner.scope.deactivate();
        debug!("session scope deactivated");
    }

    #[instrument(skip(self))]
    pub async fn bootstrap(&self) {
        let token = self.inner.scope.token();
        self.bootstrap_in(token).await;
    }

    async fn bootstrap_in(&self, token: ScopeToken) {
        let _loading = self.start_loading(token);
        self.check_session(token).await;
    }

    /// Resynchronize `user` with the server without touching `loading`.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Option<User> {
        let token = self.inner.scope.token();
        self.check_session(token).await
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let token = self.inner.scope.token();
        let _loading = self.start_loading(token);

        let request = ApiRequest::post(self.inner.endpoints.login.as_str())
            .json(&LoginRequest { email, password })
            .map_err(|e| login_error(&e))?;
        let response = self.inner.api.request(request).await.map_err(|e| {
            warn!(error = %e, "login rejected");
            login_error(&e)
        })?;

        let payload = LoginResponse::from_response(response);
        if let Some(bearer) = payload.bearer() {
            let ttl = payload.expires_in.unwrap_or(self.inner.session_ttl_secs);
            self.credentials().persist(Some(bearer), ttl);
        }

        let user = match payload.user {
            Some(user) => {
                self.write(token, |s| s.user = Some(user.clone()));
                user
            }
            None => self
                .check_session(token)
                .await
                .ok_or_else(|| SessionError::Login(NO_SESSION_AFTER_LOGIN.into()))?,
        };

        self.credentials()
            .set_display_name(&user.email, self.inner.session_ttl_secs);
        info!(user_id = %user.id, "signed in");
        Ok(user)
    }

    /// Sign out. Local credentials and `user` are cleared whatever the server
    /// answers; a failed server call is still reported to the caller.
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), SessionError> {
        let token = self.inner.scope.token();
        let _loading = self.start_loading(token);

        let result = self
            .inner
            .api
            .request(ApiRequest::post(self.inner.endpoints.logout.as_str()))
            .await;

        self.credentials().clear();
        self.write(token, |s| s.user = None);

        match result {
            Ok(_) => {
                info!("signed out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "logout call failed; local session cleared anyway");
                Err(SessionError::Logout(
                    e.server_message().unwrap_or(LOGOUT_FALLBACK).to_string(),
                ))
            }
        }
    }

    /// The session-check path shared by bootstrap, refresh and login. Never fails:
    /// anything but a decoded user degrades to "no session".
    async fn check_session(&self, token: ScopeToken) -> Option<User> {
        let result = self
            .inner
            .api
            .request(ApiRequest::get(self.inner.endpoints.session.as_str()))
            .await
            .and_then(|r| r.into_json::<SessionPayload>());

        let user = match result {
            Ok(payload) => {
                let user = payload.into_user();
                let ttl = self.inner.session_ttl_secs;
                if !self.credentials().has_session() {
                    self.credentials().sync_mirror(ttl);
                }
                self.credentials().set_display_name(&user.email, ttl);
                Some(user)
            }
            Err(ClientError::Auth { .. }) => {
                debug!("no session on server; clearing local credential");
                self.credentials().clear();
                None
            }
            Err(e) => {
                warn!(error = %e, "session check failed");
                None
            }
        };

        if !self.write(token, |s| s.user = user.clone()) {
            debug!("session check finished after scope ended; result dropped");
        }
        user
    }

    fn start_loading(&self, token: ScopeToken) -> Loading<'_> {
        let state = &self.inner.state;
        self.inner.scope.run_if_live(token, |pending| {
            *pending += 1;
            state.send_modify(|s| s.loading = true);
        });
        Loading {
            manager: self,
            token,
        }
    }

    /// Apply `f` to the observer state if `token` is still live.
    fn write(&self, token: ScopeToken, f: impl FnOnce(&mut Session)) -> bool {
        let state = &self.inner.state;
        self.inner
            .scope
            .run_if_live(token, |_| state.send_modify(f))
            .is_some()
    }
}

fn login_error(e: &ClientError) -> SessionError {
    SessionError::Login(e.server_message().unwrap_or(LOGIN_FALLBACK).to_string())
}
