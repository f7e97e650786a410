//! 密钥库模块：受管密钥的静态加密、访问控制、过期与轮换。

pub mod backend;
pub mod container;
pub mod record;
pub mod store;

pub use backend::{KeyValueStore, MemoryStore};
pub use container::{EncryptedMaterial, MasterKey};
pub use record::{KeyInfo, KeyMaterial, KeyState};
pub use store::KeyStore;
