use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::swr::CacheEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Idea {
    pub text: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
}

/// Local read-only projection of a backend project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    /// Canonical identifier; `_id` is accepted on input.
    #[serde(default, alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub functionality: Vec<String>,
    #[serde(default)]
    pub ideas: Vec<Idea>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub updated_at: Option<OffsetDateTime>,
}

impl Project {
    /// Most recently added idea, by position.
    pub fn latest_idea(&self) -> Option<&Idea> {
        self.ideas.last()
    }
}

/// Body of `POST /api/projects`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub technologies: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub functionality: Vec<String>,
}

impl NewProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_technologies<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.technologies = items.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_functionality<I, S>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.functionality = items.into_iter().map(Into::into).collect();
        self
    }
}

/// In-flight counters and last failure per mutation kind. Independent of the
/// read entry's error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MutationState {
    pub creating: usize,
    pub deleting: usize,
    pub create_error: Option<String>,
    pub delete_error: Option<String>,
}

impl MutationState {
    pub fn is_creating(&self) -> bool {
        self.creating > 0
    }

    pub fn is_deleting(&self) -> bool {
        self.deleting > 0
    }
}

/// What a project list consumer renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectsView {
    pub projects: Vec<Project>,
    pub error: Option<String>,
    pub loading: bool,
    pub is_creating: bool,
    pub is_deleting: bool,
    pub create_error: Option<String>,
    pub delete_error: Option<String>,
}

impl ProjectsView {
    pub fn new(entry: CacheEntry<Vec<Project>>, mutations: &MutationState) -> Self {
        let loading = entry.is_loading();
        Self {
            projects: entry.data.unwrap_or_default(),
            error: entry.error,
            loading,
            is_creating: mutations.is_creating(),
            is_deleting: mutations.is_deleting(),
            create_error: mutations.create_error.clone(),
            delete_error: mutations.delete_error.clone(),
        }
    }

    pub fn find(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }
}
