//! # Gate Modules
//!
//! - [`allowlist`] - Remote and static CIDR allow-list resolution
//! - [`admission`] - Forward-or-close decision for inbound connections
//!
//! The admission handler implements [`ModuleContract`](crate::module::ModuleContract)
//! so a host can manage it like any other module.

pub mod admission;
pub mod allowlist;
