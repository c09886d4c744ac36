//! Policy checks over a concrete graph.
//!
//! Each check has a pure `check_*` function returning the offending nodes and
//! a `run_*_check` wrapper that turns them into report [`Violation`]s.
//! Finding violations is a normal result, never an error.
//!
//! [`Violation`]: crate::api::Violation

pub mod allowed_compilers;
pub mod approved;
pub mod buildable;
pub mod compiler_usage;
pub mod duplicates;
