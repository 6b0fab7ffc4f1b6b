//! Domain models

pub mod application;
pub mod file_node;
pub mod repository;
pub mod server;
pub mod validation;
