use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use super::dto::{MutationState, NewProject, Project, ProjectsView};
use crate::client::{ApiClient, ApiRequest};
use crate::error::ClientError;
use crate::swr::{CacheEntry, FetchResult, SwrCache};

#[derive(Clone, Copy, Debug)]
enum Mutation {
    Create,
    Delete,
}

/// Drops the in-flight counter of one mutation kind on every exit path.
struct InFlightMutation<'a> {
    state: &'a watch::Sender<MutationState>,
    kind: Mutation,
}

impl<'a> InFlightMutation<'a> {
    fn begin(state: &'a watch::Sender<MutationState>, kind: Mutation) -> Self {
        state.send_modify(|m| match kind {
            Mutation::Create => {
                m.creating += 1;
                m.create_error = None;
            }
            Mutation::Delete => {
                m.deleting += 1;
                m.delete_error = None;
            }
        });
        Self { state, kind }
    }

    fn fail(&self, err: &ClientError) {
        let message = err.to_string();
        self.state.send_modify(|m| match self.kind {
            Mutation::Create => m.create_error = Some(message),
            Mutation::Delete => m.delete_error = Some(message),
        });
    }
}

impl Drop for InFlightMutation<'_> {
    fn drop(&mut self) {
        self.state.send_modify(|m| match self.kind {
            Mutation::Create => m.creating = m.creating.saturating_sub(1),
            Mutation::Delete => m.deleting = m.deleting.saturating_sub(1),
        });
    }
}

/// Stale-while-revalidate view of the project collection plus the mutations
/// that keep it consistent.
#[derive(Clone)]
pub struct ProjectCache {
    api: ApiClient,
    endpoint: String,
    cache: SwrCache<Vec<Project>>,
    mutations: Arc<watch::Sender<MutationState>>,
}

async fn fetch_projects(api: ApiClient, endpoint: String) -> FetchResult<Vec<Project>> {
    let projects = api
        .request(ApiRequest::get(endpoint.as_str()))
        .await?
        .into_data::<Vec<Project>>()?;
    debug!(count = projects.len(), "projects fetched");
    Ok(projects)
}

impl ProjectCache {
    pub fn new(api: ApiClient, endpoint: impl Into<String>) -> Self {
        Self::with_cache(api, endpoint, SwrCache::new())
    }

    /// Share an existing cache, e.g. with other collections of the same client.
    pub fn with_cache(
        api: ApiClient,
        endpoint: impl Into<String>,
        cache: SwrCache<Vec<Project>>,
    ) -> Self {
        let (mutations, _) = watch::channel(MutationState::default());
        Self {
            api,
            endpoint: endpoint.into(),
            cache,
            mutations: Arc::new(mutations),
        }
    }

    fn fetcher(&self) -> impl FnOnce() -> BoxFuture<'static, FetchResult<Vec<Project>>> {
        let api = self.api.clone();
        let endpoint = self.endpoint.clone();
        move || Box::pin(fetch_projects(api, endpoint))
    }

    /// Last known state, returned immediately. When nothing valid is cached a
    /// revalidation is started (or joined) in the background.
    pub fn read(&self) -> ProjectsView {
        let entry = self.cache.entry(&self.endpoint);
        if entry.data.is_none() && !entry.is_validating {
            self.spawn_revalidation();
        }
        self.view()
    }

    /// Like [`ProjectCache::read`] but waits for the data when none is cached.
    pub async fn load(&self) -> ProjectsView {
        if self.cache.entry(&self.endpoint).data.is_none() {
            if let Err(e) = self.revalidate().await {
                warn!(error = %e, "project list fetch failed");
            }
        }
        self.view()
    }

    /// Snapshot without side effects.
    pub fn view(&self) -> ProjectsView {
        ProjectsView::new(self.cache.entry(&self.endpoint), &self.mutations.borrow())
    }

    pub fn mutation_state(&self) -> MutationState {
        self.mutations.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CacheEntry<Vec<Project>>> {
        self.cache.subscribe(&self.endpoint)
    }

    pub fn subscribe_mutations(&self) -> watch::Receiver<MutationState> {
        self.mutations.subscribe()
    }

    /// Start or join the list fetch and wait for it.
    #[instrument(skip(self), fields(key = %self.endpoint))]
    pub async fn revalidate(&self) -> FetchResult<Vec<Project>> {
        self.cache.revalidate(&self.endpoint, self.fetcher()).await
    }

    fn spawn_revalidation(&self) {
        let fetch = self.cache.revalidate(&self.endpoint, self.fetcher());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(fetch);
            }
            Err(_) => warn!("no async runtime; background revalidation skipped"),
        }
    }

    /// Fetch that starts after the mutation committed, superseding any older one.
    async fn settle(&self) {
        if let Err(e) = self.cache.invalidate(&self.endpoint, self.fetcher()).await {
            warn!(error = %e, "revalidation after mutation failed");
        }
    }

    /// Create a project and wait until the cached list reflects it.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_project(&self, input: &NewProject) -> Result<Option<Project>, ClientError> {
        let flight = InFlightMutation::begin(&self.mutations, Mutation::Create);

        let result = match ApiRequest::post(self.endpoint.as_str()).json(input) {
            Ok(request) => self.api.request(request).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(response) => {
                self.settle().await;
                let created = response.into_data::<Project>().ok();
                info!(id = ?created.as_ref().map(|p| p.id.as_str()), "project created");
                Ok(created)
            }
            Err(e) => {
                warn!(error = %e, "create project failed");
                flight.fail(&e);
                Err(e)
            }
        }
    }

    /// Delete a project and wait until the cached list no longer has it.
    #[instrument(skip(self))]
    pub async fn delete_project(&self, id: &str) -> Result<(), ClientError> {
        let flight = InFlightMutation::begin(&self.mutations, Mutation::Delete);

        let target = format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            urlencoding::encode(id)
        );
        match self.api.request(ApiRequest::delete(target)).await {
            Ok(_) => {
                self.settle().await;
                info!(id, "project deleted");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "delete project failed");
                flight.fail(&e);
                Err(e)
            }
        }
    }
}
