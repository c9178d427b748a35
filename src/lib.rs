// MastersCalc - Core Library
// Session-scoped rowing crew rosters with live updates.
// Exposes all modules for use in the web server, the key generator, and tests.

pub mod bands;
pub mod config;
pub mod delivery;
pub mod engine;
pub mod error;
pub mod render;
pub mod rower;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use bands::{average_age, Band, BandTable};
pub use config::{Config, ConfigError, StoreKind};
pub use delivery::{spawn_watch, updates_for, Update};
pub use engine::{compute_signals, DerivedSignals, RosterState, SessionEngine};
pub use error::{SessionError, StoreError};
pub use rower::{Clock, FixedClock, Rower, SystemClock, BIRTH_YEAR_THRESHOLD};
pub use session::SessionKeys;
pub use store::{
    ClientBlobStore, MemoryStore, MemoryStoreConfig, SqliteStore, StateStore, Subscription,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
