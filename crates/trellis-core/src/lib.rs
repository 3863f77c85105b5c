//! Session domain and cache-aside validation for the Trellis broker.
//!
//! The relational session table is the system-of-record; this crate owns
//! everything between it and the connection layer:
//!
//! - [`Session`]: the durable, token-identified authentication record
//! - [`SessionStore`]: the seam to the system-of-record, with
//!   [`MemorySessionStore`] for tests and single-process deployments
//! - [`SessionCache`]: short-TTL cache-aside layer that owns its own expiry
//! - [`SessionValidator`]: token resolution with fail-closed store fallback,
//!   debounced activity writes, refresh, logout, and reaping
//! - [`Clock`]: wall-clock abstraction so expiry logic is deterministic
//!   under test
//!
//! Both the HTTP middleware and the realtime connect path authenticate
//! through [`SessionValidator`], so cache writes here are immediately
//! visible to every caller in the process.

mod cache;
mod clock;
mod error;
mod session;
mod store;
mod validator;

pub use cache::SessionCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
pub use session::Session;
pub use store::{MemorySessionStore, NewSession, SessionStore};
pub use validator::{SessionValidator, Validation, ValidatorConfig};
