pub mod auth;

pub use auth::{SessionContext, bearer_token, session_auth};
