//! PBX Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Common domain identifiers (OrganizationId, CallId)
//! - The shared error taxonomy used by all services
//! - An injectable clock for deterministic time handling

pub mod clock;
pub mod domain;
pub mod error;

pub use clock::{Clock, FixedClock, SystemClock};
pub use domain::*;
pub use error::{PbxError, Result};
