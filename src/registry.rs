//!
//! # 算法注册表模块
//!
//! 维护受支持算法的目录（名称、类别、安全等级、尺寸、推荐标记）
//! 以及进程内的默认算法指针。目录在构造时固定，默认指针用
//! `ArcSwapOption` 保存，读取无锁，切换为原子替换。
//!

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provider::{
    self, ML_DSA_44, ML_DSA_65, ML_DSA_87, ML_KEM_1024, ML_KEM_512, ML_KEM_768,
};

/// 算法类别
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlgorithmKind {
    /// 密钥封装机制
    Kem,
    /// 数字签名
    Signature,
}

/// 单个算法的描述信息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlgorithmDescriptor {
    pub name: String,
    pub kind: AlgorithmKind,
    /// NIST 安全等级（1 / 2 / 3 / 5）
    pub security_level: u8,
    pub public_key_size: usize,
    pub secret_key_size: usize,
    /// KEM 密文长度，签名算法为 None
    pub ciphertext_size: Option<usize>,
    /// 签名长度，KEM 算法为 None
    pub signature_size: Option<usize>,
    pub is_recommended: bool,
    pub description: String,
}

/// 算法注册表。目录不可变，默认指针可原子切换。
pub struct AlgorithmRegistry {
    catalogue: Vec<Arc<AlgorithmDescriptor>>,
    /// 名称到目录下标的索引
    index: HashMap<String, usize>,
    default: ArcSwapOption<String>,
}

struct CatalogueEntry {
    name: &'static str,
    kind: AlgorithmKind,
    security_level: u8,
    is_recommended: bool,
    description: &'static str,
}

const CATALOGUE: &[CatalogueEntry] = &[
    CatalogueEntry {
        name: ML_KEM_512,
        kind: AlgorithmKind::Kem,
        security_level: 1,
        is_recommended: false,
        description: "ML-KEM-512 key encapsulation (FIPS 203, NIST level 1)",
    },
    CatalogueEntry {
        name: ML_KEM_768,
        kind: AlgorithmKind::Kem,
        security_level: 3,
        is_recommended: true,
        description: "ML-KEM-768 key encapsulation (FIPS 203, NIST level 3)",
    },
    CatalogueEntry {
        name: ML_KEM_1024,
        kind: AlgorithmKind::Kem,
        security_level: 5,
        is_recommended: true,
        description: "ML-KEM-1024 key encapsulation (FIPS 203, NIST level 5)",
    },
    CatalogueEntry {
        name: ML_DSA_44,
        kind: AlgorithmKind::Signature,
        security_level: 2,
        is_recommended: false,
        description: "ML-DSA-44 digital signature (FIPS 204, NIST level 2)",
    },
    CatalogueEntry {
        name: ML_DSA_65,
        kind: AlgorithmKind::Signature,
        security_level: 3,
        is_recommended: true,
        description: "ML-DSA-65 digital signature (FIPS 204, NIST level 3)",
    },
    CatalogueEntry {
        name: ML_DSA_87,
        kind: AlgorithmKind::Signature,
        security_level: 5,
        is_recommended: true,
        description: "ML-DSA-87 digital signature (FIPS 204, NIST level 5)",
    },
];

impl AlgorithmRegistry {
    /// 构建完整目录，默认算法为 ML-KEM-768
    pub fn new() -> Self {
        let registry = Self::without_default();
        registry
            .default
            .store(Some(Arc::new(ML_KEM_768.to_string())));
        registry
    }

    /// 构建完整目录但不设置默认算法，调用方稍后通过 `set_default` 指定
    pub fn without_default() -> Self {
        let mut catalogue = Vec::with_capacity(CATALOGUE.len());
        let mut index = HashMap::with_capacity(CATALOGUE.len());
        for entry in CATALOGUE {
            // 尺寸信息来自提供者，目录中的每个名称都必然有对应实现
            let sizes = match provider::sizes(entry.name) {
                Some(sizes) => sizes,
                None => continue,
            };
            index.insert(entry.name.to_string(), catalogue.len());
            catalogue.push(Arc::new(AlgorithmDescriptor {
                name: entry.name.to_string(),
                kind: entry.kind,
                security_level: entry.security_level,
                public_key_size: sizes.public_key,
                secret_key_size: sizes.secret_key,
                ciphertext_size: sizes.ciphertext,
                signature_size: sizes.signature,
                is_recommended: entry.is_recommended,
                description: entry.description.to_string(),
            }));
        }
        Self {
            catalogue,
            index,
            default: ArcSwapOption::const_empty(),
        }
    }

    /// 查询算法描述
    pub fn get_info(&self, name: &str) -> Result<Arc<AlgorithmDescriptor>> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.catalogue[i]))
            .ok_or_else(|| Error::UnknownAlgorithm(name.to_string()))
    }

    /// 所有可用算法名称，按目录顺序
    pub fn list_available(&self) -> Vec<String> {
        self.catalogue.iter().map(|d| d.name.clone()).collect()
    }

    /// 推荐算法名称
    pub fn list_recommended(&self) -> Vec<String> {
        self.catalogue
            .iter()
            .filter(|d| d.is_recommended)
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn is_recommended(&self, name: &str) -> bool {
        self.index
            .get(name)
            .map(|&i| self.catalogue[i].is_recommended)
            .unwrap_or(false)
    }

    /// 当前默认算法，未设置时返回 `NotInitialized`
    pub fn get_default(&self) -> Result<String> {
        self.default
            .load()
            .as_deref()
            .map(|name| name.to_string())
            .ok_or(Error::NotInitialized)
    }

    /// 原子切换默认算法，名称必须在目录中
    pub fn set_default(&self, name: &str) -> Result<()> {
        if !self.is_available(name) {
            return Err(Error::UnknownAlgorithm(name.to_string()));
        }
        self.default.store(Some(Arc::new(name.to_string())));
        Ok(())
    }

    /// 与给定安全等级匹配的签名算法。
    /// 取等级不低于请求值的最低签名算法，保证配套签名
    /// 不会弱于所保护的 KEM。
    pub fn companion_signature(&self, security_level: u8) -> Result<Arc<AlgorithmDescriptor>> {
        self.companion(AlgorithmKind::Signature, security_level)
    }

    /// 与给定安全等级匹配的 KEM 算法
    pub fn companion_kem(&self, security_level: u8) -> Result<Arc<AlgorithmDescriptor>> {
        self.companion(AlgorithmKind::Kem, security_level)
    }

    fn companion(&self, kind: AlgorithmKind, security_level: u8) -> Result<Arc<AlgorithmDescriptor>> {
        self.catalogue
            .iter()
            .filter(|d| d.kind == kind && d.security_level >= security_level)
            .min_by_key(|d| d.security_level)
            .map(Arc::clone)
            .ok_or_else(|| {
                Error::UnknownAlgorithm(format!("no {kind:?} algorithm at level {security_level}"))
            })
    }

    /// 算法在线格式中的单字节标识（目录下标 + 1，0 保留）
    pub fn wire_id(&self, name: &str) -> Result<u8> {
        self.index
            .get(name)
            .map(|&i| (i + 1) as u8)
            .ok_or_else(|| Error::UnknownAlgorithm(name.to_string()))
    }

    /// 由线格式标识反查算法
    pub fn algorithm_by_wire_id(&self, id: u8) -> Result<Arc<AlgorithmDescriptor>> {
        if id == 0 {
            return Err(Error::UnknownAlgorithm(format!("wire id {id}")));
        }
        self.catalogue
            .get((id - 1) as usize)
            .map(Arc::clone)
            .ok_or_else(|| Error::UnknownAlgorithm(format!("wire id {id}")))
    }

    /// 全部描述信息的快照
    pub fn descriptors(&self) -> Vec<Arc<AlgorithmDescriptor>> {
        self.catalogue.clone()
    }
}

impl Default for AlgorithmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_contents() {
        let registry = AlgorithmRegistry::new();
        let names = registry.list_available();
        assert_eq!(
            names,
            vec![
                ML_KEM_512, ML_KEM_768, ML_KEM_1024, ML_DSA_44, ML_DSA_65, ML_DSA_87
            ]
        );
        assert_eq!(
            registry.list_recommended(),
            vec![ML_KEM_768, ML_KEM_1024, ML_DSA_65, ML_DSA_87]
        );
    }

    #[test]
    fn test_default_pointer() {
        let registry = AlgorithmRegistry::new();
        assert_eq!(registry.get_default().unwrap(), ML_KEM_768);

        registry.set_default(ML_KEM_1024).unwrap();
        assert_eq!(registry.get_default().unwrap(), ML_KEM_1024);

        assert!(matches!(
            registry.set_default("ML-KEM-2048"),
            Err(Error::UnknownAlgorithm(_))
        ));
        // 失败的切换不影响现有默认值
        assert_eq!(registry.get_default().unwrap(), ML_KEM_1024);
    }

    #[test]
    fn test_without_default() {
        let registry = AlgorithmRegistry::without_default();
        assert!(matches!(registry.get_default(), Err(Error::NotInitialized)));
    }

    #[test]
    fn test_companion_resolution() {
        let registry = AlgorithmRegistry::new();
        assert_eq!(registry.companion_signature(1).unwrap().name, ML_DSA_44);
        assert_eq!(registry.companion_signature(3).unwrap().name, ML_DSA_65);
        assert_eq!(registry.companion_signature(5).unwrap().name, ML_DSA_87);
        assert_eq!(registry.companion_kem(2).unwrap().name, ML_KEM_768);
        assert!(registry.companion_kem(6).is_err());
    }

    #[test]
    fn test_wire_id_roundtrip() {
        let registry = AlgorithmRegistry::new();
        for name in registry.list_available() {
            let id = registry.wire_id(&name).unwrap();
            assert_eq!(registry.algorithm_by_wire_id(id).unwrap().name, name);
        }
        assert!(registry.algorithm_by_wire_id(0).is_err());
        assert!(registry.algorithm_by_wire_id(200).is_err());
    }

    #[test]
    fn test_get_info_sizes() {
        let registry = AlgorithmRegistry::new();
        let info = registry.get_info(ML_KEM_768).unwrap();
        assert_eq!(info.public_key_size, 1184);
        assert_eq!(info.ciphertext_size, Some(1088));
        assert_eq!(info.signature_size, None);
        assert_eq!(info.security_level, 3);
    }
}
