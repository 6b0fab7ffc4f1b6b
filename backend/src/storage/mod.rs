//! Persistent configuration and registries

pub mod layout;
pub mod registry;
pub mod settings;
