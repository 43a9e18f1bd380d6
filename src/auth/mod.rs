mod dto;
mod scope;
mod session;

pub use dto::{LoginRequest, LoginResponse, User};
pub use scope::{Scope, ScopeToken};
pub use session::{Session, SessionManager, LOGIN_FALLBACK, LOGOUT_FALLBACK};
