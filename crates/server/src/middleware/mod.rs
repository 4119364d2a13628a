pub mod auth;
pub mod csrf;
pub mod model_loaders;
pub mod rate_limit;
pub mod secure_headers;

pub use auth::{
    AuthState, AuthUser, attach_auth_middleware, require_auth_middleware,
    require_owner_middleware,
};
pub use csrf::{CsrfState, csrf_middleware};
pub use model_loaders::load_app_middleware;
pub use rate_limit::{RateLimitState, rate_limit_middleware};
pub use secure_headers::{SecureHeadersState, secure_headers_middleware};
