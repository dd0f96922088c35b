pub mod domain;
pub mod reconcile;
pub mod traffic;
pub mod validation;
pub mod virtual_service;

pub use reconcile::{error_policy, reconcile, routes_referencing, ROUTE_KIND};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "route_test.rs"]
mod tests;
