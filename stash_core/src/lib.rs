//! Core stash types and traits.
//!
//! This crate holds everything that is independent of a concrete object
//! store or content source:
//!
//! - Attachment identities (`identity::ObjectIdentity`)
//! - Deterministic object names and encryption material (`derive`)
//! - The streaming compress/encrypt pipeline (`pipeline`)
//! - Size-bounded grouping for batch operations (`group`)
//! - Tier ceilings (`tier::TierTable`)
//! - The `Store` and `ContentFetcher` traits implemented by the adapter crates
//!
//! ## Stored format
//!
//! Objects are gzip-compressed, then AES-256-CBC encrypted with PKCS#7
//! padding. Nothing else is stored: no header, no key material. Name, key and
//! IV are re-derived from the identity on every access.

pub mod derive;
pub mod fetch;
pub mod group;
pub mod identity;
pub mod pipeline;
pub mod store;
pub mod tier;

// Test utilities (behind feature flag)
#[cfg(feature = "testutil")]
pub mod testutil;

// --- Core Public Surface ---

pub use derive::{EncryptionMaterial, KeyDeriver, ObjectName, PublishState};
pub use fetch::{ContentFetcher, FetchError};
pub use group::{AttachmentDescriptor, MAX_GROUP_MEMBERS, group_by_size};
pub use identity::{ObjectIdentity, TierFlag};
pub use pipeline::{PipelineError, seal, unseal};
pub use store::{ByteStream, Store, StoreError, StoreFeatures, StoreResult};
pub use tier::TierTable;
