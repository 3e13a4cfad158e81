pub mod auth;
pub mod metrics;

pub use auth::{auth_middleware, UserContext, USER_ID_HEADER};
pub use metrics::metrics_middleware;
