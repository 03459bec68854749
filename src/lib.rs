//! graphmail - Live query and change-notification core for a mail store
//!
//! This crate provides read access to a hierarchical mail store (stores,
//! folders, items) plus live change subscriptions over any folder's tables.
//!
//! ## Module Organization
//!
//! - `types/`: Data structures and types (ids, properties, directives,
//!   errors, change payloads)
//! - `backend/`: Backing-store trait surface and the in-memory backend
//! - `store/`: Per-store context (resolver, materializer, caches)
//! - `rows`: Typed `Folder` and `Item` row views
//! - `table`: Table directive planner
//! - `notify`: Change notification engine
//! - `session`: Session entry point and subscription surface

pub mod backend;
pub mod notify;
pub mod rows;
pub mod session;
pub mod store;
mod sync;
pub mod table;
pub mod types;

use tracing_subscriber::EnvFilter;

pub use notify::{SubscriptionHandle, TableRow};
pub use rows::{Folder, Item};
pub use session::Session;
pub use store::Store;
pub use types::changes::RowChange;
pub use types::directives::{Column, Order, RegistrationKey, TableDirectiveSet};
pub use types::error::{GraphMailError, Result};
pub use types::property::{NamedPropId, PropId, Property, TypedValue, ValueKind};
pub use types::{EntryId, InstanceKey, ObjectId, SpecialFolder};

/// Initialize tracing for logging.
///
/// In debug builds, defaults to debug level for this crate; can be
/// overridden with the RUST_LOG environment variable. Safe to call more
/// than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("graphmail=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
