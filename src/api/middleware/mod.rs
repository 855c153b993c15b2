//! API middleware and extractors

pub mod logging;
pub mod user;

pub use logging::logging_middleware;
pub use user::UserId;
