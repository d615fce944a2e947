//! Remote content-addressable storage.
//!
//! A [`BlobStore`] persists BLAKE3-keyed blobs on disk; [`build_router`] wraps
//! one in an HTTP server exposing the `/artifacts/{hash}` surface plus
//! `/health` and `/metrics`; [`CasClient`] is the corresponding HTTP client
//! for callers that talk to a remote instance of this server.

pub mod client;
pub mod server;
pub mod store;

pub use client::{CasClient, ClientError};
pub use server::{build_router, ServerConfig};
pub use store::{BlobStore, BlobStoreStats, StoreError, StoreResult};
