//!
//! # PQC 提供者模块
//!
//! 将算法名称映射到 pqcrypto 的具体实现（ML-KEM / ML-DSA），
//! 所有密钥、密文、签名都以原始字节表示，由上层负责封装。
//! 这是整个 crate 中唯一直接接触 pqcrypto 的地方。
//!

use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use pqcrypto_traits::sign::{
    DetachedSignature as _, PublicKey as _, SecretKey as _,
};
use zeroize::Zeroizing;

use crate::common::utils::ZeroizingVec;
use crate::error::{Error, Result};

/// ML-KEM-512（Kyber512，NIST 安全等级 1）
pub const ML_KEM_512: &str = "ML-KEM-512";
/// ML-KEM-768（Kyber768，NIST 安全等级 3）
pub const ML_KEM_768: &str = "ML-KEM-768";
/// ML-KEM-1024（Kyber1024，NIST 安全等级 5）
pub const ML_KEM_1024: &str = "ML-KEM-1024";
/// ML-DSA-44（Dilithium2，NIST 安全等级 2）
pub const ML_DSA_44: &str = "ML-DSA-44";
/// ML-DSA-65（Dilithium3，NIST 安全等级 3）
pub const ML_DSA_65: &str = "ML-DSA-65";
/// ML-DSA-87（Dilithium5，NIST 安全等级 5）
pub const ML_DSA_87: &str = "ML-DSA-87";

/// 各算法的字节尺寸，注册表据此填充描述信息
pub(crate) struct AlgorithmSizes {
    pub public_key: usize,
    pub secret_key: usize,
    /// KEM 密文长度，签名算法为 None
    pub ciphertext: Option<usize>,
    /// 签名长度，KEM 算法为 None
    pub signature: Option<usize>,
}

pub(crate) fn sizes(algorithm: &str) -> Option<AlgorithmSizes> {
    use pqcrypto_dilithium::{dilithium2, dilithium3, dilithium5};
    use pqcrypto_kyber::{kyber1024, kyber512, kyber768};

    macro_rules! kem_sizes {
        ($m:ident) => {
            AlgorithmSizes {
                public_key: $m::public_key_bytes(),
                secret_key: $m::secret_key_bytes(),
                ciphertext: Some($m::ciphertext_bytes()),
                signature: None,
            }
        };
    }
    macro_rules! sign_sizes {
        ($m:ident) => {
            AlgorithmSizes {
                public_key: $m::public_key_bytes(),
                secret_key: $m::secret_key_bytes(),
                ciphertext: None,
                signature: Some($m::signature_bytes()),
            }
        };
    }

    match algorithm {
        ML_KEM_512 => Some(kem_sizes!(kyber512)),
        ML_KEM_768 => Some(kem_sizes!(kyber768)),
        ML_KEM_1024 => Some(kem_sizes!(kyber1024)),
        ML_DSA_44 => Some(sign_sizes!(dilithium2)),
        ML_DSA_65 => Some(sign_sizes!(dilithium3)),
        ML_DSA_87 => Some(sign_sizes!(dilithium5)),
        _ => None,
    }
}

/// 后量子原语提供者。
///
/// 以 trait 存在是为了让密钥库与混合引擎面向接口编程，
/// 测试中可以替换为可控实现。
pub trait PqcProvider: Send + Sync {
    /// 生成密钥对，KEM 与签名算法统一入口
    fn generate_keypair(&self, algorithm: &str) -> Result<(Vec<u8>, ZeroizingVec)>;

    /// KEM 封装，返回 (密文, 共享密钥)
    fn encapsulate(
        &self,
        algorithm: &str,
        public_key: &[u8],
    ) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>)>;

    /// KEM 解封装，返回共享密钥
    fn decapsulate(
        &self,
        algorithm: &str,
        ciphertext: &[u8],
        secret_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>>;

    /// 生成分离式签名
    fn sign(&self, algorithm: &str, message: &[u8], secret_key: &[u8]) -> Result<Vec<u8>>;

    /// 验证分离式签名，失败统一返回 `SignatureInvalid`
    fn verify(
        &self,
        algorithm: &str,
        message: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<()>;
}

/// 基于 pqcrypto（PQClean 绑定）的默认提供者
#[derive(Debug, Default, Clone, Copy)]
pub struct PqCryptoProvider;

impl PqCryptoProvider {
    pub fn new() -> Self {
        Self
    }
}

impl PqcProvider for PqCryptoProvider {
    fn generate_keypair(&self, algorithm: &str) -> Result<(Vec<u8>, ZeroizingVec)> {
        use pqcrypto_dilithium::{dilithium2, dilithium3, dilithium5};
        use pqcrypto_kyber::{kyber1024, kyber512, kyber768};

        macro_rules! keypair {
            ($m:ident) => {{
                let (pk, sk) = $m::keypair();
                (
                    pk.as_bytes().to_vec(),
                    ZeroizingVec::new(sk.as_bytes().to_vec()),
                )
            }};
        }

        let pair = match algorithm {
            ML_KEM_512 => keypair!(kyber512),
            ML_KEM_768 => keypair!(kyber768),
            ML_KEM_1024 => keypair!(kyber1024),
            ML_DSA_44 => keypair!(dilithium2),
            ML_DSA_65 => keypair!(dilithium3),
            ML_DSA_87 => keypair!(dilithium5),
            other => return Err(Error::UnknownAlgorithm(other.to_string())),
        };
        Ok(pair)
    }

    fn encapsulate(
        &self,
        algorithm: &str,
        public_key: &[u8],
    ) -> Result<(Vec<u8>, Zeroizing<Vec<u8>>)> {
        use pqcrypto_kyber::{kyber1024, kyber512, kyber768};

        macro_rules! encapsulate {
            ($m:ident) => {{
                let pk = $m::PublicKey::from_bytes(public_key)
                    .map_err(|_| Error::InvalidKeyMaterial(algorithm.to_string()))?;
                let (ss, ct) = $m::encapsulate(&pk);
                (
                    ct.as_bytes().to_vec(),
                    Zeroizing::new(ss.as_bytes().to_vec()),
                )
            }};
        }

        let out = match algorithm {
            ML_KEM_512 => encapsulate!(kyber512),
            ML_KEM_768 => encapsulate!(kyber768),
            ML_KEM_1024 => encapsulate!(kyber1024),
            other => return Err(Error::UnknownAlgorithm(other.to_string())),
        };
        Ok(out)
    }

    fn decapsulate(
        &self,
        algorithm: &str,
        ciphertext: &[u8],
        secret_key: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>> {
        use pqcrypto_kyber::{kyber1024, kyber512, kyber768};

        macro_rules! decapsulate {
            ($m:ident) => {{
                let ct = $m::Ciphertext::from_bytes(ciphertext)
                    .map_err(|_| Error::DecryptionFailed)?;
                let sk = $m::SecretKey::from_bytes(secret_key)
                    .map_err(|_| Error::InvalidKeyMaterial(algorithm.to_string()))?;
                let ss = $m::decapsulate(&ct, &sk);
                Zeroizing::new(ss.as_bytes().to_vec())
            }};
        }

        let ss = match algorithm {
            ML_KEM_512 => decapsulate!(kyber512),
            ML_KEM_768 => decapsulate!(kyber768),
            ML_KEM_1024 => decapsulate!(kyber1024),
            other => return Err(Error::UnknownAlgorithm(other.to_string())),
        };
        Ok(ss)
    }

    fn sign(&self, algorithm: &str, message: &[u8], secret_key: &[u8]) -> Result<Vec<u8>> {
        use pqcrypto_dilithium::{dilithium2, dilithium3, dilithium5};

        macro_rules! sign {
            ($m:ident) => {{
                let sk = $m::SecretKey::from_bytes(secret_key)
                    .map_err(|_| Error::InvalidKeyMaterial(algorithm.to_string()))?;
                $m::detached_sign(message, &sk).as_bytes().to_vec()
            }};
        }

        let signature = match algorithm {
            ML_DSA_44 => sign!(dilithium2),
            ML_DSA_65 => sign!(dilithium3),
            ML_DSA_87 => sign!(dilithium5),
            other => return Err(Error::UnknownAlgorithm(other.to_string())),
        };
        Ok(signature)
    }

    fn verify(
        &self,
        algorithm: &str,
        message: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<()> {
        use pqcrypto_dilithium::{dilithium2, dilithium3, dilithium5};

        macro_rules! verify {
            ($m:ident) => {{
                let sig = $m::DetachedSignature::from_bytes(signature)
                    .map_err(|_| Error::SignatureInvalid)?;
                let pk = $m::PublicKey::from_bytes(public_key)
                    .map_err(|_| Error::InvalidKeyMaterial(algorithm.to_string()))?;
                $m::verify_detached_signature(&sig, message, &pk)
                    .map_err(|_| Error::SignatureInvalid)
            }};
        }

        match algorithm {
            ML_DSA_44 => verify!(dilithium2),
            ML_DSA_65 => verify!(dilithium3),
            ML_DSA_87 => verify!(dilithium5),
            other => Err(Error::UnknownAlgorithm(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kem_encapsulate_decapsulate() {
        let provider = PqCryptoProvider::new();
        for alg in [ML_KEM_512, ML_KEM_768, ML_KEM_1024] {
            let (pk, sk) = provider.generate_keypair(alg).unwrap();
            let (ct, ss_enc) = provider.encapsulate(alg, &pk).unwrap();
            let ss_dec = provider.decapsulate(alg, &ct, &sk).unwrap();
            assert_eq!(ss_enc.as_slice(), ss_dec.as_slice());
            assert_eq!(ss_enc.len(), 32);
        }
    }

    #[test]
    fn test_sign_verify() {
        let provider = PqCryptoProvider::new();
        for alg in [ML_DSA_44, ML_DSA_65, ML_DSA_87] {
            let (pk, sk) = provider.generate_keypair(alg).unwrap();
            let sig = provider.sign(alg, b"message", &sk).unwrap();
            provider.verify(alg, b"message", &sig, &pk).unwrap();
            assert!(matches!(
                provider.verify(alg, b"other", &sig, &pk),
                Err(Error::SignatureInvalid)
            ));
        }
    }

    #[test]
    fn test_unknown_algorithm() {
        let provider = PqCryptoProvider::new();
        assert!(matches!(
            provider.generate_keypair("RSA-2048"),
            Err(Error::UnknownAlgorithm(_))
        ));
    }

    #[test]
    fn test_sizes_known_and_unknown() {
        let kem = sizes(ML_KEM_768).unwrap();
        assert!(kem.ciphertext.is_some());
        assert!(kem.signature.is_none());

        let dsa = sizes(ML_DSA_65).unwrap();
        assert!(dsa.signature.is_some());

        assert!(sizes("nope").is_none());
    }
}
