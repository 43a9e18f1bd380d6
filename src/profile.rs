//! Account settings for the signed-in user: profile fields, avatar and stats.

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};

use crate::auth::{SessionManager, User};
use crate::client::{ApiClient, ApiRequest};
use crate::error::{ClientError, ProfileError};
use crate::swr::{CacheEntry, FetchResult, SwrCache};

/// Form values of the profile editor.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: String,
    pub email: String,
    pub current_password: String,
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ProfileBody<'a> {
    name: &'a str,
    email: &'a str,
    current_password: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    new_password: Option<&'a str>,
}

impl ProfileUpdate {
    fn new_password(&self) -> Option<&str> {
        self.new_password.as_deref().filter(|p| !p.is_empty())
    }

    /// A new password must be confirmed; an empty one means "keep the current".
    pub fn validate(&self) -> Result<(), ProfileError> {
        match self.new_password() {
            Some(new) if Some(new) != self.confirm_password.as_deref() => {
                Err(ProfileError::PasswordMismatch)
            }
            _ => Ok(()),
        }
    }

    fn body(&self) -> ProfileBody<'_> {
        ProfileBody {
            name: self.name.trim(),
            email: self.email.trim(),
            current_password: &self.current_password,
            new_password: self.new_password(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStats {
    #[serde(default)]
    pub total_projects: u64,
    #[serde(default)]
    pub total_ideas: u64,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub member_since: Option<OffsetDateTime>,
}

#[derive(Clone)]
pub struct ProfileClient {
    api: ApiClient,
    session: SessionManager,
    users: String,
    stats: SwrCache<ProfileStats>,
}

impl ProfileClient {
    pub fn new(api: ApiClient, session: SessionManager, users: impl Into<String>) -> Self {
        Self {
            api,
            session,
            users: users.into(),
            stats: SwrCache::new(),
        }
    }

    fn user_path(&self, user_id: &str, rest: &str) -> String {
        format!(
            "{}/{}{}",
            self.users.trim_end_matches('/'),
            urlencoding::encode(user_id),
            rest
        )
    }

    /// Save profile fields, then resynchronize the session so observers see them.
    #[instrument(skip(self, update))]
    pub async fn update_profile(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<Option<User>, ProfileError> {
        update.validate()?;

        let request = ApiRequest::put(self.user_path(user_id, "")).json(&update.body())?;
        self.api.request(request).await.map_err(|e| {
            warn!(error = %e, "profile update rejected");
            e
        })?;
        info!("profile updated");

        Ok(self.session.refresh().await)
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload_avatar(
        &self,
        user_id: &str,
        file_name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<Option<User>, ProfileError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(ClientError::from)?;
        let form = Form::new().part("avatar", part);

        self.api
            .request(ApiRequest::post(self.user_path(user_id, "/avatar")).multipart(form))
            .await
            .map_err(|e| {
                warn!(error = %e, "avatar upload rejected");
                e
            })?;
        info!("avatar uploaded");

        Ok(self.session.refresh().await)
    }

    /// Cached statistics for `user_id`, fetched on first use.
    pub async fn stats(&self, user_id: &str) -> CacheEntry<ProfileStats> {
        let key = self.user_path(user_id, "/stats");
        if self.stats.entry(&key).data.is_none() {
            if let Err(e) = self.revalidate_stats(&key).await {
                warn!(error = %e, "stats fetch failed");
            }
        }
        self.stats.entry(&key)
    }

    pub async fn refresh_stats(&self, user_id: &str) -> FetchResult<ProfileStats> {
        let key = self.user_path(user_id, "/stats");
        self.revalidate_stats(&key).await
    }

    async fn revalidate_stats(&self, key: &str) -> FetchResult<ProfileStats> {
        let api = self.api.clone();
        let target = key.to_string();
        self.stats
            .revalidate(key, move || fetch_stats(api, target))
            .await
    }
}

async fn fetch_stats(api: ApiClient, target: String) -> FetchResult<ProfileStats> {
    api.request(ApiRequest::get(target)).await?.into_data()
}
