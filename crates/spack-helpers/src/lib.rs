pub mod allowlist;
pub mod api;
pub mod approve;
pub mod checks;
pub mod config;
pub mod env;
pub mod fetch;
pub mod filter;
pub mod graph;
pub mod hash;
pub mod logging;
pub mod policy;
pub mod spec;
