//! PBX routing datastore
//!
//! Read-only lookups for the entities the call-routing core consumes
//! (organizations, DID numbers, extensions, ring groups, business-hours
//! schedules, IVR menus, conference rooms), always scoped to one
//! organization. The CRUD lifecycle of these entities is owned by the admin
//! backend; this crate only reads.
//!
//! Also provides the shared `CacheStore` trait used for idempotency keys and
//! rate-limit counters, with an in-process implementation.

mod cache;
mod error;
mod memory;
mod postgres;
mod store;
mod types;

pub use cache::{CacheStore, CounterWindow, MemoryCache};
pub use error::{Result, StoreError};
pub use memory::{MemoryRoutingStore, StoreSeed};
pub use postgres::{PgRoutingStore, PoolConfig};
pub use store::RoutingStore;
pub use types::*;
