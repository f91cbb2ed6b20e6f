//! HTTP middleware.

mod session_auth;

pub use session_auth::{bearer_token, require_session, AuthUser};
