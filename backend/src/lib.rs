//! infraflow backend library
//!
//! Core modules for git-backed infrastructure templates: content storage,
//! validation, deployment and server monitoring.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod git;
pub mod http;
pub mod logs;
pub mod models;
pub mod monitor;
pub mod notify;
pub mod save;
pub mod ssh;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod validate;
pub mod workers;
