//!
//! # 混合密钥束
//!
//! 把 X25519 半边与 ML-KEM 半边绑定为一个对外不可拆分的密钥。
//! 两个半边缺一不可，混合密钥永远不会静默退化为单原语。
//!

use x25519_dalek::StaticSecret;

use crate::common::utils::ZeroizingVec;
use crate::error::{Error, Result};
use crate::registry::AlgorithmDescriptor;

/// X25519 公钥 / 私钥长度
pub const X25519_KEY_SIZE: usize = 32;

/// 混合公钥束
#[derive(Clone, Debug, PartialEq)]
pub struct HybridPublicBundle {
    /// ML-KEM 算法名称
    pub algorithm: String,
    pub classical: [u8; X25519_KEY_SIZE],
    pub pqc: Vec<u8>,
}

impl HybridPublicBundle {
    /// 序列化：`[32B X25519 公钥][ML-KEM 公钥]`，算法名由上下文携带
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(X25519_KEY_SIZE + self.pqc.len());
        out.extend_from_slice(&self.classical);
        out.extend_from_slice(&self.pqc);
        out
    }

    pub fn from_bytes(descriptor: &AlgorithmDescriptor, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != X25519_KEY_SIZE + descriptor.public_key_size {
            return Err(Error::InvalidKeyMaterial(descriptor.name.clone()));
        }
        let mut classical = [0u8; X25519_KEY_SIZE];
        classical.copy_from_slice(&bytes[..X25519_KEY_SIZE]);
        Ok(Self {
            algorithm: descriptor.name.clone(),
            classical,
            pqc: bytes[X25519_KEY_SIZE..].to_vec(),
        })
    }
}

/// 混合私钥束。两个半边都放在自动清零的容器中。
#[derive(Debug)]
pub struct HybridPrivateBundle {
    pub algorithm: String,
    classical: ZeroizingVec,
    pqc: ZeroizingVec,
}

impl HybridPrivateBundle {
    pub(crate) fn new(algorithm: String, classical: [u8; X25519_KEY_SIZE], pqc: ZeroizingVec) -> Self {
        Self {
            algorithm,
            classical: ZeroizingVec::new(classical.to_vec()),
            pqc,
        }
    }

    pub(crate) fn classical_secret(&self) -> Result<StaticSecret> {
        let bytes: [u8; X25519_KEY_SIZE] = self
            .classical
            .as_ref()
            .try_into()
            .map_err(|_| Error::InvalidKeyMaterial(self.algorithm.clone()))?;
        Ok(StaticSecret::from(bytes))
    }

    pub(crate) fn pqc_secret(&self) -> &[u8] {
        &self.pqc
    }

    /// 序列化：`[32B X25519 私钥][ML-KEM 私钥]`。
    /// 仅用于交给密钥库封装，调用方负责尽快释放返回值。
    pub fn to_bytes(&self) -> ZeroizingVec {
        let mut out = Vec::with_capacity(self.classical.len() + self.pqc.len());
        out.extend_from_slice(&self.classical);
        out.extend_from_slice(&self.pqc);
        ZeroizingVec::new(out)
    }

    pub fn from_bytes(descriptor: &AlgorithmDescriptor, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != X25519_KEY_SIZE + descriptor.secret_key_size {
            return Err(Error::InvalidKeyMaterial(descriptor.name.clone()));
        }
        Ok(Self {
            algorithm: descriptor.name.clone(),
            classical: ZeroizingVec::new(bytes[..X25519_KEY_SIZE].to_vec()),
            pqc: ZeroizingVec::new(bytes[X25519_KEY_SIZE..].to_vec()),
        })
    }
}
