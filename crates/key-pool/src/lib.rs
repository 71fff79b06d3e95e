//! Rate-limited, multi-key dispatch for the generative-content service
//!
//! Holds a pool of interchangeable API keys, tracks per-key cooldowns after
//! rate-limit signals, prefers a task-specific key when one is configured, and
//! retries transient failures with rotation and backoff under a global
//! concurrency limit.
//!
//! Call lifecycle:
//! 1. `Dispatcher::dispatch` takes a limiter slot and asks `KeyPool` for a key
//! 2. The unit of work runs with that key
//! 3. A rate-limit failure (see `classify`) puts the key into cooldown, the
//!    dispatcher backs off and retries with a freshly chosen key
//! 4. Any other failure surfaces immediately
//! 5. Upload-then-generate flows go through `StickySession`, which pins every
//!    follow-up call to the key that created the remote resource

pub mod classify;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pool;
pub mod sources;
pub mod sticky;
pub mod task;

pub use classify::{DEFAULT_RATE_LIMIT_WAIT, classify, suggested_wait};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::DispatchConfig;
pub use dispatch::{Dispatched, Dispatcher};
pub use error::{Error, Result};
pub use pool::{DEFAULT_COOLDOWN, KeyChooser, KeyPool, KeyStatus, RandomChooser};
pub use sources::KeySources;
pub use sticky::{StickyHandle, StickySession, StickyState};
pub use task::TaskType;
