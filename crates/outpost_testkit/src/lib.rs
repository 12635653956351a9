//! # Outpost Testkit
//!
//! Test utilities for Outpost.
//!
//! This crate provides:
//! - Sample entities (`Tag`, owned and versioned; `TrailTag`, simple)
//! - Scripted in-process servers with fault injection and a call journal
//! - Store contexts over in-memory or temporary databases
//! - Property-based generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use outpost_testkit::prelude::*;
//!
//! let context = TestContext::memory();
//! let server = Arc::new(ScriptedOwnedServer::new());
//! let tags = OwnedStore::<Tag>::new("tags", server.clone());
//! tags.open(&context.ctx)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod entities;
pub mod fixtures;
pub mod generators;
pub mod server;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::entities::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::server::*;
}

pub use entities::*;
pub use fixtures::*;
pub use generators::*;
pub use server::*;
