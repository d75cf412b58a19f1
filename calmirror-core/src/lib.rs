//! Core of calmirror: a local mirror of an upstream calendar account.
//!
//! - [`store`]: where mirrored credentials, calendars and events live
//! - [`remote`]: the upstream calendar service
//! - [`sync`]: one-way writes, upstream first
//! - [`conflict`]: overlap detection for candidate time windows

pub mod calendar;
pub mod config;
pub mod conflict;
pub mod context;
pub mod credentials;
pub mod date_range;
pub mod error;
pub mod event;
pub mod remote;
pub mod store;
pub mod sync;

pub use calendar::Calendar;
pub use conflict::{ConflictResult, ConflictingEvent, check_conflicts, overlaps};
pub use context::{ConnectionTestResult, MirrorContext};
pub use credentials::Credentials;
pub use error::{CalMirrorError, CalMirrorResult};
pub use event::{Event, EventPatch, TimeBound, When};
pub use store::{CalendarStore, EventFilter};
pub use sync::{ConflictQuery, SyncService};
