//! Request cache synchronization.
//!
//! This module keeps server reads consistent with the client's own writes:
//! - Reads are addressed by structural `QueryKey`s and stored in a shared
//!   `QueryCache` with stale/garbage-collection timing
//! - Every write is described by a `MutationIntent` whose invalidation plan
//!   marks the affected keys stale (or drops them, for deleted entities)
//! - Mounted `Query<T>` consumers refetch when their key is invalidated

mod key;
pub mod mutation;
mod query;
mod store;

pub use key::{Filter, QueryKey, Resource};
pub use mutation::Mutation;
pub use query::{Query, QueryState};
pub use store::{CacheConfig, QueryCache, ResponseOrdering};
