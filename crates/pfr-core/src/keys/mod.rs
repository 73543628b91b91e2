//! Key manifests and cancellation policy
//!
//! The RoT-internal key partition holds a dense array of signed key
//! manifests. Each manifest authorizes a set of code-signing keys (CSKs)
//! by hash, carries the root public key appended after its signed span,
//! and is itself signed by the root key. Cancellation state lives in the
//! provisioning UFM as per-content-class bitmaps.

pub mod cancellation;
pub mod manifest;
mod rsa;

pub use cancellation::{cancel_csk_key_id, verify_csk_key_id, ProtectedContent};
pub use manifest::{KeyManifest, KEY_MANIFEST_SIZE, MAX_KEY_ID, MAX_KEY_MANIFEST_ID};
pub use rsa::{RsaPublicKey, RSA_KEY_BLOB_SIZE, RSA_MAX_KEY_LENGTH};
