//! In-process planner backend used by the test suite. Serves the auth, project
//! and user routes over real HTTP with JWT-protected handlers, plus a few echo
//! routes for exercising the request client.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Multipart, Path, Query, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use parking_lot::Mutex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use crate::client::ApiClient;
use crate::config::{ClientConfig, DEFAULT_TOKEN_KEY};
use crate::credentials::{BrowserContext, CredentialStore};
use crate::storage::MemoryStore;

pub const TEST_EMAIL: &str = "ada@example.com";
pub const TEST_PASSWORD: &str = "correct horse battery staple";

const SEEDED_AT: &str = "2024-01-15T08:00:00Z";

type Rejection = (StatusCode, Json<Value>);

fn reject(status: StatusCode, message: &str) -> Rejection {
    (status, Json(json!({ "success": false, "message": message })))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginMode {
    /// Token and user in the response.
    #[default]
    Full,
    /// Token only; the client has to ask `/me` for the user.
    TokenOnly,
    /// 500 with a non-JSON body.
    Broken,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: Uuid,
    exp: usize,
    iat: usize,
    iss: String,
    aud: String,
}

#[derive(Clone)]
struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: Duration,
}

impl JwtKeys {
    fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: "procrasti-mock".into(),
            audience: "procrasti".into(),
            ttl: Duration::from_secs(15 * 60),
        }
    }

    fn sign_access(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        Ok(decode::<Claims>(token, &self.decoding, &validation)?.claims)
    }
}

struct AccountRecord {
    id: Uuid,
    email: String,
    password: String,
    name: Option<String>,
    avatar_url: Option<String>,
}

impl AccountRecord {
    fn to_json(&self) -> Value {
        let mut user = json!({
            "_id": self.id.to_string(),
            "email": self.email,
            "createdAt": SEEDED_AT,
        });
        if let Some(name) = &self.name {
            user["name"] = json!(name);
        }
        if let Some(url) = &self.avatar_url {
            user["avatarUrl"] = json!(url);
        }
        user
    }
}

struct Db {
    account: AccountRecord,
    projects: Vec<Value>,
    hits: HashMap<&'static str, usize>,
    login_mode: LoginMode,
    login_expires_in: Option<u64>,
    me_status: Option<StatusCode>,
    logout_status: StatusCode,
    envelope: bool,
    list_failure: Option<StatusCode>,
    list_delay: Duration,
    next_login_delay: Option<Duration>,
    next_me_delay: Option<Duration>,
    last_avatar_size: Option<usize>,
}

impl Db {
    fn hit(&mut self, route: &'static str) {
        *self.hits.entry(route).or_default() += 1;
    }
}

#[derive(Clone)]
struct MockState {
    keys: JwtKeys,
    db: Arc<Mutex<Db>>,
}

impl FromRef<MockState> for JwtKeys {
    fn from_ref(state: &MockState) -> Self {
        state.keys.clone()
    }
}

struct AuthUser(Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = Rejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Non autenticato"))?;
        let claims = keys
            .verify(token)
            .map_err(|_| reject(StatusCode::UNAUTHORIZED, "Token non valido o scaduto"))?;
        Ok(AuthUser(claims.sub))
    }
}

/// Handle to a running mock backend.
pub struct MockBackend {
    addr: SocketAddr,
    state: MockState,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = MockState {
            keys: JwtKeys::new("mock-secret"),
            db: Arc::new(Mutex::new(Db {
                account: AccountRecord {
                    id: Uuid::new_v4(),
                    email: TEST_EMAIL.into(),
                    password: TEST_PASSWORD.into(),
                    name: None,
                    avatar_url: None,
                },
                projects: Vec::new(),
                hits: HashMap::new(),
                login_mode: LoginMode::Full,
                login_expires_in: None,
                me_status: None,
                logout_status: StatusCode::OK,
                envelope: true,
                list_failure: None,
                list_delay: Duration::ZERO,
                next_login_delay: None,
                next_me_delay: None,
                last_avatar_size: None,
            })),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend address");
        let app = router(state.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                debug!(error = %e, "mock backend stopped");
            }
        });

        Self { addr, state }
    }

    pub fn url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.addr)).expect("mock backend url")
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.url())
    }

    /// A fresh client with its own in-memory credential store.
    pub fn client(&self) -> (ApiClient, CredentialStore) {
        let context = BrowserContext::new(Arc::new(MemoryStore::new()), self.url());
        let credentials = CredentialStore::new(context, DEFAULT_TOKEN_KEY);
        let api = ApiClient::new(self.url(), credentials.clone()).expect("build client");
        (api, credentials)
    }

    pub fn issue_token(&self) -> String {
        let id = self.state.db.lock().account.id;
        self.state.keys.sign_access(id).expect("sign token")
    }

    pub fn hits(&self, route: &str) -> usize {
        self.state.db.lock().hits.get(route).copied().unwrap_or(0)
    }

    /// Store `project` as-is, assigning an `_id` when it has none.
    pub fn seed_project_json(&self, mut project: Value) {
        if project.get("_id").is_none() && project.get("id").is_none() {
            project["_id"] = json!(Uuid::new_v4().to_string());
        }
        self.state.db.lock().projects.push(project);
    }

    pub fn set_envelope(&self, on: bool) {
        self.state.db.lock().envelope = on;
    }

    pub fn fail_list(&self, status: Option<StatusCode>) {
        self.state.db.lock().list_failure = status;
    }

    pub fn set_list_delay(&self, delay: Duration) {
        self.state.db.lock().list_delay = delay;
    }

    pub fn set_login_mode(&self, mode: LoginMode) {
        self.state.db.lock().login_mode = mode;
    }

    pub fn set_login_expires_in(&self, secs: Option<u64>) {
        self.state.db.lock().login_expires_in = secs;
    }

    pub fn set_me_status(&self, status: Option<StatusCode>) {
        self.state.db.lock().me_status = status;
    }

    pub fn set_logout_status(&self, status: StatusCode) {
        self.state.db.lock().logout_status = status;
    }

    pub fn rename_user(&self, name: &str) {
        self.state.db.lock().account.name = Some(name.into());
    }

    pub fn delay_next_login(&self, delay: Duration) {
        self.state.db.lock().next_login_delay = Some(delay);
    }

    pub fn delay_next_me(&self, delay: Duration) {
        self.state.db.lock().next_me_delay = Some(delay);
    }

    pub fn last_avatar_size(&self) -> Option<usize> {
        self.state.db.lock().last_avatar_size
    }
}

fn router(state: MockState) -> Router {
    Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/:id", delete(delete_project))
        .route("/api/users/:id", put(update_user))
        .route("/api/users/:id/avatar", post(upload_avatar))
        .route("/api/users/:id/stats", get(user_stats))
        .route("/api/echo/headers", get(echo_headers))
        .route("/api/echo/status/:code", get(echo_status))
        .route("/api/echo/empty", delete(|| async { StatusCode::NO_CONTENT }))
        .route("/api/echo/text", get(|| async { "plain body" }))
        .route("/api/echo/json", post(|Json(body): Json<Value>| async move { Json(body) }))
        .with_state(state)
}

// --- auth ---

async fn me(
    State(state): State<MockState>,
    auth: Result<AuthUser, Rejection>,
) -> Result<Json<Value>, Rejection> {
    let (delay, forced) = {
        let mut db = state.db.lock();
        db.hit("me");
        (db.next_me_delay.take(), db.me_status)
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(status) = forced {
        return Err(reject(status, "Errore interno"));
    }
    let AuthUser(user_id) = auth?;
    let db = state.db.lock();
    if db.account.id != user_id {
        return Err(reject(StatusCode::UNAUTHORIZED, "Utente non trovato"));
    }
    Ok(Json(json!({ "user": db.account.to_json() })))
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

async fn login(State(state): State<MockState>, Json(body): Json<Credentials>) -> Response {
    let (delay, mode, expires_in) = {
        let mut db = state.db.lock();
        db.hit("login");
        (db.next_login_delay.take(), db.login_mode, db.login_expires_in)
    };
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if mode == LoginMode::Broken {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }

    let (id, user) = {
        let db = state.db.lock();
        if db.account.email != body.email || db.account.password != body.password {
            return reject(StatusCode::UNAUTHORIZED, "Credenziali non valide").into_response();
        }
        (db.account.id, db.account.to_json())
    };
    let token = match state.keys.sign_access(id) {
        Ok(token) => token,
        Err(e) => return reject(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()).into_response(),
    };

    let mut body = match mode {
        LoginMode::TokenOnly => json!({ "accessToken": token }),
        _ => json!({ "success": true, "token": token, "user": user }),
    };
    if let Some(secs) = expires_in {
        body["expiresIn"] = json!(secs);
    }
    Json(body).into_response()
}

async fn logout(State(state): State<MockState>) -> Result<Json<Value>, Rejection> {
    let status = {
        let mut db = state.db.lock();
        db.hit("logout");
        db.logout_status
    };
    if !status.is_success() {
        return Err(reject(status, "Logout non riuscito"));
    }
    Ok(Json(json!({ "success": true })))
}

// --- projects ---

async fn list_projects(
    State(state): State<MockState>,
    auth: Result<AuthUser, Rejection>,
) -> Result<Json<Value>, Rejection> {
    let delay = {
        let mut db = state.db.lock();
        db.hit("projects_list");
        db.list_delay
    };
    auth?;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let db = state.db.lock();
    if let Some(status) = db.list_failure {
        return Err(reject(status, "Servizio non disponibile"));
    }
    let projects = Value::Array(db.projects.clone());
    Ok(Json(if db.envelope {
        json!({ "success": true, "data": projects })
    } else {
        projects
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateProject {
    #[serde(default)]
    name: String,
    description: Option<String>,
    #[serde(default)]
    technologies: Vec<String>,
    #[serde(default)]
    functionality: Vec<String>,
}

async fn create_project(
    State(state): State<MockState>,
    AuthUser(_): AuthUser,
    Json(body): Json<CreateProject>,
) -> Result<(StatusCode, Json<Value>), Rejection> {
    let name = body.name.trim();
    if name.is_empty() {
        return Err(reject(StatusCode::BAD_REQUEST, "Il nome del progetto è obbligatorio"));
    }
    let project = json!({
        "_id": Uuid::new_v4().to_string(),
        "name": name,
        "description": body.description,
        "technologies": body.technologies,
        "functionality": body.functionality,
        "ideas": [],
        "createdAt": SEEDED_AT,
        "updatedAt": SEEDED_AT,
    });

    let mut db = state.db.lock();
    db.hit("projects_create");
    db.projects.push(project.clone());
    Ok((StatusCode::CREATED, Json(json!({ "success": true, "data": project }))))
}

async fn delete_project(
    State(state): State<MockState>,
    AuthUser(_): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, Rejection> {
    let mut db = state.db.lock();
    db.hit("projects_delete");
    let before = db.projects.len();
    db.projects.retain(|p| p["_id"] != id.as_str());
    if db.projects.len() == before {
        return Err(reject(StatusCode::NOT_FOUND, "Progetto non trovato"));
    }
    Ok(Json(json!({ "success": true, "message": "Progetto eliminato" })))
}

// --- users ---

fn own_account(db: &Db, caller: Uuid, path_id: &str) -> Result<(), Rejection> {
    if db.account.id != caller || db.account.id.to_string() != path_id {
        return Err(reject(StatusCode::FORBIDDEN, "Operazione non consentita"));
    }
    Ok(())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateUser {
    name: String,
    email: String,
    current_password: String,
    new_password: Option<String>,
}

async fn update_user(
    State(state): State<MockState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdateUser>,
) -> Result<Json<Value>, Rejection> {
    let mut db = state.db.lock();
    db.hit("profile_update");
    own_account(&db, caller, &id)?;
    if db.account.password != body.current_password {
        return Err(reject(StatusCode::BAD_REQUEST, "Password attuale non corretta"));
    }
    db.account.name = Some(body.name);
    db.account.email = body.email;
    if let Some(password) = body.new_password {
        db.account.password = password;
    }
    Ok(Json(json!({ "message": "Profilo aggiornato", "user": db.account.to_json() })))
}

async fn upload_avatar(
    State(state): State<MockState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Value>, Rejection> {
    own_account(&state.db.lock(), caller, &id)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| reject(StatusCode::BAD_REQUEST, &e.to_string()))?
    {
        if field.name() != Some("avatar") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("avatar").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| reject(StatusCode::BAD_REQUEST, &e.to_string()))?;
        upload = Some((file_name, bytes.len()));
    }
    let (file_name, size) =
        upload.ok_or_else(|| reject(StatusCode::BAD_REQUEST, "Nessun file caricato"))?;

    let mut db = state.db.lock();
    db.hit("avatar");
    db.last_avatar_size = Some(size);
    db.account.avatar_url = Some(format!("/uploads/avatars/{id}/{file_name}"));
    Ok(Json(json!({ "message": "Avatar aggiornato", "user": db.account.to_json() })))
}

async fn user_stats(
    State(state): State<MockState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Value>, Rejection> {
    let mut db = state.db.lock();
    db.hit("stats");
    own_account(&db, caller, &id)?;
    let total_ideas: usize = db
        .projects
        .iter()
        .map(|p| p["ideas"].as_array().map_or(0, Vec::len))
        .sum();
    Ok(Json(json!({
        "success": true,
        "data": {
            "totalProjects": db.projects.len(),
            "totalIdeas": total_ideas,
            "memberSince": SEEDED_AT,
        }
    })))
}

// --- echo ---

async fn echo_headers(headers: HeaderMap) -> Json<Value> {
    let get = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Json(json!({
        "authorization": get(header::AUTHORIZATION),
        "accept": get(header::ACCEPT),
        "contentType": get(header::CONTENT_TYPE),
        "cookie": get(header::COOKIE),
    }))
}

#[derive(Deserialize)]
struct EchoStatus {
    message: Option<String>,
}

async fn echo_status(Path(code): Path<u16>, Query(q): Query<EchoStatus>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match q.message {
        Some(message) => reject(status, &message).into_response(),
        None => (status, Json(json!({}))).into_response(),
    }
}
