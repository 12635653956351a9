//! # Outpost Sync
//!
//! Decides when the stores of a signed-in session talk to the server.
//!
//! A [`SessionContext`] owns the device database, the dependency ledger
//! and every registered store. Each store gets a scheduler task running a
//! [`SyncSchedule`]:
//!
//! - a pass is scheduled once the store is loaded, the server is
//!   reachable, the store has work and its queue is drained
//! - two passes of one store are at least `min_sync_interval` apart, so
//!   bursts of edits coalesce into one pass
//! - a pass that leaves work behind is retried after a short delay
//! - a successful pull arms a periodic refresh from the server
//! - [`SessionContext::sync_now`] skips the wait
//!
//! ## Example
//!
//! ```rust,ignore
//! let reachability = Reachability::new(true);
//! let session = SessionContext::open(dir, &reachability, SyncConfig::new(url))?;
//! session.register(OwnedStore::<Tag>::new("tags", api))?;
//!
//! reachability.set(false); // passes stop being scheduled
//! session.close();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod clock;
mod config;
mod error;
mod reachability;
mod schedule;
mod session;

pub use clock::{Clock, TokioClock};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use reachability::Reachability;
pub use schedule::{Conditions, SchedulePhase, SyncSchedule};
pub use session::{SessionContext, SessionProgress};
