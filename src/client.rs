//! Single choke point for outbound calls: auth, content negotiation and
//! error decoding are applied here and nowhere else.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{multipart, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::credentials::CredentialStore;
use crate::error::ClientError;

const JSON: &str = "application/json";

pub enum RequestBody {
    Json(Value),
    Text(String),
    Multipart(multipart::Form),
}

/// Description of one outbound call.
pub struct ApiRequest {
    method: Method,
    target: String,
    headers: HeaderMap,
    body: Option<RequestBody>,
}

impl ApiRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(Method::PUT, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::DELETE, target)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, ClientError> {
        let value = serde_json::to_value(body).map_err(|e| ClientError::Encode(e.to_string()))?;
        self.body = Some(RequestBody::Json(value));
        Ok(self)
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(RequestBody::Text(body.into()));
        self
    }

    pub fn multipart(mut self, form: multipart::Form) -> Self {
        self.body = Some(RequestBody::Multipart(form));
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Fill in `Authorization`, `Content-Type` and `Accept` where the caller left them unset.
    fn apply_defaults(&mut self, token: Option<&str>) {
        if let Some(token) = token {
            if !self.headers.contains_key(AUTHORIZATION) {
                match HeaderValue::from_str(&format!("Bearer {token}")) {
                    Ok(v) => {
                        self.headers.insert(AUTHORIZATION, v);
                    }
                    Err(_) => warn!("stored credential is not a valid header value; sending without it"),
                }
            }
        }

        let needs_json_type = matches!(
            self.body,
            Some(RequestBody::Json(_)) | Some(RequestBody::Text(_))
        );
        if needs_json_type && !self.headers.contains_key(CONTENT_TYPE) {
            self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
        }

        if !self.headers.contains_key(ACCEPT) {
            self.headers.insert(ACCEPT, HeaderValue::from_static(JSON));
        }
    }
}

/// Decoded success body.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Empty,
    Json(Value),
    Text(String),
}

impl ApiResponse {
    pub fn into_value(self) -> Value {
        match self {
            ApiResponse::Empty => Value::Null,
            ApiResponse::Json(v) => v,
            ApiResponse::Text(t) => Value::String(t),
        }
    }

    pub fn into_json<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        serde_json::from_value(self.into_value()).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Like [`ApiResponse::into_json`], unwrapping a `{success, data}` envelope first.
    pub fn into_data<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        serde_json::from_value(unwrap_envelope(self.into_value()))
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

/// Return the `data` member of an enveloped payload, or the payload itself.
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Pull a displayable message out of an error body: `message`, then `error`.
pub fn extract_message(body: &Value) -> Option<String> {
    ["message", "error"].iter().find_map(|field| {
        body.get(*field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    credentials: CredentialStore,
}

impl ApiClient {
    /// `base` may carry a path prefix (`https://host/v1`); every target is
    /// resolved beneath it.
    pub fn new(mut base: Url, credentials: CredentialStore) -> Result<Self, ClientError> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let mut builder = reqwest::Client::builder();
        // Sharing the credential store's jar keeps server-set cookies and the
        // session mirror on every request.
        builder = match credentials.cookie_jar() {
            Some(jar) => builder.cookie_provider(jar),
            None => builder.cookie_store(true),
        };
        let http = builder.build()?;
        Ok(Self {
            http,
            base,
            credentials,
        })
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    fn resolve(&self, target: &str) -> Result<Url, ClientError> {
        if let Ok(url) = Url::parse(target) {
            return Ok(url);
        }
        self.base
            .join(target.trim_start_matches('/'))
            .map_err(|e| ClientError::Network(format!("invalid target {target:?}: {e}")))
    }

    #[instrument(skip(self, request), fields(method = %request.method, target = %request.target))]
    pub async fn request(&self, mut request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let token = self.credentials.read();
        request.apply_defaults(token.as_deref());

        let url = self.resolve(&request.target)?;
        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(request.headers);
        builder = match request.body {
            Some(RequestBody::Json(v)) => builder.body(v.to_string()),
            Some(RequestBody::Text(t)) => builder.body(t),
            Some(RequestBody::Multipart(form)) => builder.multipart(form),
            None => builder,
        };

        let response = builder.send().await.map_err(|e| {
            warn!(error = %e, "request did not complete");
            ClientError::Network(e.to_string())
        })?;
        let status = response.status();
        debug!(%status, "response");

        if !status.is_success() {
            let message = match response.json::<Value>().await {
                Ok(body) => extract_message(&body),
                Err(_) => None,
            };
            return Err(if status == StatusCode::UNAUTHORIZED {
                ClientError::Auth { message }
            } else {
                ClientError::Request { status, message }
            });
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(ApiResponse::Empty);
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains(JSON))
            .unwrap_or(false);

        if is_json {
            let body = response.json::<Value>().await?;
            Ok(ApiResponse::Json(body))
        } else {
            Ok(ApiResponse::Text(response.text().await?))
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, target: &str) -> Result<T, ClientError> {
        self.request(ApiRequest::get(target)).await?.into_json()
    }
}
