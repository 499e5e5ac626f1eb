//! SQLite-backed decision log for identity permitters.
//!
//! Every decision a registry obtains from its permitter can be appended
//! here: bindings, grants, denials, releases and faults. The log is an
//! audit trail only; nothing reads it back to make a decision.
//!
//! [`StateStore`] is the exception: it keeps the replay and grant state a
//! policy exports (see [`permitter::Persistent`]) so a short-lived process
//! can restore it before deciding and save it afterwards.
//!
//! # Example
//!
//! ```no_run
//! use permitter::{Account, IdentityId};
//! use storage::{DecisionLog, Event, EventKind};
//!
//! let log = DecisionLog::open("decisions.db")?;
//! let identity = IdentityId([1; 32]);
//!
//! log.append(&Event::new(identity, None, EventKind::Bound))?;
//! log.append(&Event::new(identity, Some(Account([2; 20])), EventKind::Released))?;
//!
//! for event in log.load_identity(identity, Some("released"))? {
//!     println!("{event}");
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod event;
mod state;
mod store;

pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use state::{StateStore, StateTxn};
pub use store::DecisionLog;
