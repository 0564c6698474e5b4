//! Route-scoped policies
//!
//! `Route` parsing, the `Policy` rule set and the snapshot-based resolver.

pub mod resolver;
pub mod route;
pub mod types;

pub use resolver::{PolicyResolver, PolicySnapshot};
pub use route::Route;
pub use types::{EntitySet, Policy, PolicyBuilder, DEFAULT_POLICY_ID, DEFAULT_REJECTION_MESSAGE};
