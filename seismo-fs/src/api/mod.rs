//! HTTP API handlers for seismo-fs

pub mod finite_source;
pub mod health;

pub use finite_source::post_finite_source;
pub use health::health_routes;
