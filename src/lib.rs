pub mod auth;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod profile;
pub mod projects;
pub mod state;
pub mod storage;
pub mod swr;

#[cfg(test)]
mod mock_backend;

pub use state::ClientState;
