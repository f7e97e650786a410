//! # quantum-seal
//!
//! Quantum-resistant key management and hybrid encryption core.
//!
//! The crate combines a classical X25519 exchange with an ML-KEM
//! encapsulation, so that breaking either primitive alone is not enough
//! to recover plaintext. Around that engine it provides an algorithm
//! registry, a key store with at-rest wrapping, access control and
//! rotation, a facade for plain post-quantum operations, and an
//! orchestrating security manager with an optional C ABI.
//!
//! ## Components
//!
//! - [`registry::AlgorithmRegistry`]: catalogue of ML-KEM / ML-DSA
//!   algorithms with a lock-free default pointer.
//! - [`provider::PqcProvider`]: trait boundary over the PQClean-backed
//!   primitives.
//! - [`keystore::KeyStore`]: managed keys, Argon2id-derived master key,
//!   copy-on-write rotation, optional persistence.
//! - [`hybrid::HybridEncryptionEngine`]: X25519 + ML-KEM → HKDF-SHA256 →
//!   AEAD, plus a rotating session key.
//! - [`manager::QuantumManager`]: default-algorithm facade.
//! - [`security::QuantumSecurityManager`]: the SDK-facing boundary.
//!
//! ## Example
//!
//! ```
//! use quantum_seal::{ConfigFile, QuantumSecurityManager};
//! use secrecy::SecretString;
//!
//! fn main() -> Result<(), quantum_seal::Error> {
//!     let manager =
//!         QuantumSecurityManager::new(ConfigFile::default(), &SecretString::from("passphrase"))?;
//!     let (public, private) = manager.generate_hybrid_key_pair()?;
//!     let wire = manager.encrypt_data(&public, b"hello")?;
//!     assert_eq!(manager.decrypt_data(&private, &wire)?, b"hello");
//!     Ok(())
//! }
//! ```

pub mod common;
pub mod error;
#[cfg(feature = "ffi")]
pub mod ffi;
pub mod hybrid;
pub mod keystore;
pub mod manager;
pub mod provider;
pub mod registry;
pub mod security;

pub use common::config::{AeadAlgorithm, ConfigFile, CryptoConfig, SessionPolicy, StorePolicy};
pub use error::{Error, Result};
pub use hybrid::{
    HybridCiphertext, HybridEncryptionEngine, HybridPrivateBundle, HybridPublicBundle,
    SessionHandshake, SessionKey,
};
pub use keystore::{KeyInfo, KeyMaterial, KeyState, KeyStore, KeyValueStore, MemoryStore};
pub use manager::QuantumManager;
pub use provider::{PqCryptoProvider, PqcProvider};
pub use registry::{AlgorithmDescriptor, AlgorithmKind, AlgorithmRegistry};
pub use security::QuantumSecurityManager;

/// crate 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
