//! HTTP integrations

pub mod ci_status;
