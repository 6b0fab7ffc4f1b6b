//! Git content access

pub mod command;
pub mod remote;
pub mod store;
pub mod tree;
