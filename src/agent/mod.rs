//! Caching agent for offline support.
//!
//! The agent sits between the app and the network:
//! - On install it precaches a fixed allow-list of same-origin URLs
//! - On activate it drops buckets left by older versions and starts intercepting
//! - Navigations go to the network first and fall back to the cached root document
//! - Other allow-listed GETs are served cache-first
//! - It also runs the background sync task and shows push notifications

mod http;
mod network;
mod notify;
mod outcome;
mod storage;
mod sync;
mod worker;

pub use http::{Request, Response};
pub use network::{HttpNetwork, Network};
pub use outcome::{FetchOutcome, ResponseSource};
pub use storage::{CacheStorage, SqliteCacheStorage};
pub use sync::SyncReport;
pub use worker::{AgentConfig, AgentState, CachingAgent};

#[cfg(test)]
pub use network::fake::FakeNetwork;
