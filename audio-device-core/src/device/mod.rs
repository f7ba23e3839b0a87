pub mod host;
pub mod virtual_backend;
