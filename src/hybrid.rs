//! 混合加密模块：X25519 + ML-KEM 双原语密钥封装，
//! 经 HKDF-SHA256 合并派生对称密钥后走 AEAD。

pub mod bundle;
pub mod ciphertext;
pub mod engine;
pub mod session;

pub use bundle::{HybridPrivateBundle, HybridPublicBundle};
pub use ciphertext::HybridCiphertext;
pub use engine::HybridEncryptionEngine;
pub use session::{SessionHandshake, SessionKey};
