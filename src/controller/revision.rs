pub mod deployment;
pub mod reconcile;

pub use reconcile::{error_policy, reconcile, REVISION_KIND};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[path = "revision_test.rs"]
mod tests;
