//! The `session` module models a connected viewer.
//!
//! `viewer` holds the per-connection record the broadcaster keeps in its
//! arena; `mirror` is the client-side counterpart that rebuilds device state
//! from the frames a viewer receives.

pub mod mirror;
pub mod viewer;

pub use mirror::ViewerMirror;
pub use viewer::{SessionId, SessionState, ViewerSession, WriteProgress};
