mod cache;
mod dto;

pub use cache::ProjectCache;
pub use dto::{Idea, MutationState, NewProject, Project, ProjectsView};
