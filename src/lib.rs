//! # actions-gate
//!
//! A TCP admission gate: a connection is forwarded to the next handler only
//! if its source address lies inside the CIDR ranges GitHub publishes for
//! Actions runners, or inside an operator-supplied list of additional
//! ranges. Every other connection is closed.
//!
//! ## Architecture
//!
//! - [`modules::allowlist`] fetches the published ranges from the metadata
//!   endpoint, skips malformed entries and appends the static ranges,
//!   optionally behind a periodically refreshed cache.
//! - [`modules::admission`] derives the peer address and decides, exactly
//!   once per connection, whether to forward or close it.
//! - The admission handler implements [`module::ModuleContract`] for
//!   uniform lifecycle management; the bundled binary drives it with a TCP
//!   listener and an upstream forwarder configured through [`config`].

pub mod config;
pub mod module;
pub mod modules;
