// Middleware modules

pub mod auth;
pub mod auth_middleware;
pub mod rate_limit;

pub use auth::AuthenticatedUser;
pub use auth_middleware::auth_middleware;
pub use rate_limit::{ip_rate_limit_middleware, user_rate_limit_middleware};
