//! Flow dispatch
//!
//! [`Stack`] receives the flows accepted by the packet engine, rewrites fake
//! destinations back into domain targets, diverts DNS to the interceptor,
//! drops local-scope traffic and hands the rest to the upstream handler.

pub mod scope;
mod stack;

pub use scope::is_filtered;
pub use stack::{Stack, StackBuilder};
