//! Artifact storage.
//!
//! This crate provides:
//! - The [`ArtifactStore`] contract used for media, stage outputs and reports
//! - A local filesystem backend
//! - A Cloudflare R2 backend with presigned result URLs
//! - Key layout and SHA-256 digests for checkpoint verification

pub mod client;
pub mod error;
pub mod key;
pub mod local;
pub mod store;

pub use client::{R2ArtifactStore, R2Config};
pub use error::{StorageError, StorageResult};
pub use key::{digest, digest_file, sanitize_file_name, ArtifactKey, StoredArtifact};
pub use local::LocalArtifactStore;
pub use store::{connect, get_json_verified, put_json, ArtifactBackend, ArtifactStore, ArtifactStoreConfig};
