//! HTTP surface: router, query routes, token verification

pub mod middleware;
pub mod routes;

pub use routes::build_router;
