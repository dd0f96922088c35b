pub mod clock;
pub mod conditions;
pub mod context;
pub mod digest;
pub mod revision;
pub mod route;

pub use context::{Context, ReconcileError, FIELD_MANAGER};
