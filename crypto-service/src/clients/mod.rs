//! Client shims for external collaborators.
//!
//! The core talks to the logging and cache services through these
//! synchronous facades. Dispatch happens on background worker threads;
//! callers never block on network I/O, and collaborator failures never
//! propagate into cryptographic operation results.

pub mod cache;
pub mod logging;
