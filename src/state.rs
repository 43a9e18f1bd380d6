use std::sync::Arc;

use crate::auth::SessionManager;
use crate::client::ApiClient;
use crate::config::ClientConfig;
use crate::credentials::{BrowserContext, CredentialStore};
use crate::error::ClientError;
use crate::profile::ProfileClient;
use crate::projects::ProjectCache;
use crate::storage::{DurableStore, FileStore, MemoryStore};

/// Everything a front end needs, wired over one credential store and one
/// HTTP client.
#[derive(Clone)]
pub struct ClientState {
    pub config: Arc<ClientConfig>,
    pub credentials: CredentialStore,
    pub api: ApiClient,
    pub session: SessionManager,
    pub projects: ProjectCache,
    pub profile: ProfileClient,
}

impl ClientState {
    pub fn init(config: ClientConfig) -> Result<Self, ClientError> {
        let storage: Arc<dyn DurableStore> = match &config.state_file {
            Some(path) => Arc::new(FileStore::new(path.clone())),
            None => Arc::new(MemoryStore::new()),
        };
        let context = BrowserContext::new(storage, config.origin());
        let credentials = CredentialStore::new(context, config.token_key.clone());
        Self::from_parts(config, credentials)
    }

    pub fn from_parts(config: ClientConfig, credentials: CredentialStore) -> Result<Self, ClientError> {
        let config = Arc::new(config);
        let api = ApiClient::new(config.api_url.clone(), credentials.clone())?;
        let session = SessionManager::new(
            api.clone(),
            config.endpoints.clone(),
            config.session_ttl_secs,
        );
        let projects = ProjectCache::new(api.clone(), config.endpoints.projects.clone());
        let profile = ProfileClient::new(api.clone(), session.clone(), config.endpoints.users.clone());
        Ok(Self {
            config,
            credentials,
            api,
            session,
            projects,
            profile,
        })
    }
}
