//! Credential protection

pub mod cipher;
