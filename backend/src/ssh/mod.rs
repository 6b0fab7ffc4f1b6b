//! Remote command execution over SSH

pub mod client;
