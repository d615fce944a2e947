//! Translation layer between the native action model and a REAPI-shaped
//! execute/action-result-cache API.
//!
//! The native digest function is BLAKE3, not REAPI's conventional SHA-256;
//! [`digest::DIGEST_FUNCTION`] is what a caller should advertise in its own
//! capabilities response. Bodies travel as the compact binary format in
//! [`wire`], not gRPC/protobuf — see the adapter's `ActionRequest`/
//! `ActionResult`/`Operation` types.

pub mod capabilities;
pub mod client;
pub mod digest;
pub mod error;
pub mod executor;
pub mod server;
pub mod wire;

pub use capabilities::Capabilities;
pub use client::ReapiClient;
pub use digest::{ReapiDigest, DIGEST_FUNCTION};
pub use error::ReapiError;
pub use executor::{ActionExecutor, FixedExecutor};
pub use server::build_router;
pub use wire::{ActionRequest, ActionResult, Operation, WireInput, WireOutput};
