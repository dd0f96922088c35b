pub mod revision;
pub mod route;
pub mod serverless_service;
pub mod virtual_service;
