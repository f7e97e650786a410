//!
//! # C ABI
//!
//! 所有绑定共用的外部接口：整数状态码（0 成功，负值对应错误分类）、
//! 所有权随 `QsBuffer` 转移给调用方并由 `qs_buffer_free` 归还、
//! 管理器以不透明句柄形式由成对的创建/销毁函数管理。
//! 空指针产生确定的错误码，越过边界的 panic 被捕获并映射为内部错误。
//!

use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use secrecy::SecretString;

use crate::common::config::ConfigFile;
use crate::error::Error;
use crate::hybrid::{HybridPrivateBundle, HybridPublicBundle};
use crate::keystore::KeyMaterial;
use crate::registry::{AlgorithmDescriptor, AlgorithmKind};
use crate::security::QuantumSecurityManager;

pub const QS_OK: i32 = 0;
pub const QS_ERR_NOT_INITIALIZED: i32 = -1;
pub const QS_ERR_ALREADY_INITIALIZED: i32 = -2;
pub const QS_ERR_UNKNOWN_ALGORITHM: i32 = -3;
pub const QS_ERR_KEY_NOT_FOUND: i32 = -4;
pub const QS_ERR_KEY_ALREADY_EXISTS: i32 = -5;
pub const QS_ERR_KEY_EXPIRED: i32 = -6;
pub const QS_ERR_ACCESS_DENIED: i32 = -7;
pub const QS_ERR_INVALID_KEY_MATERIAL: i32 = -8;
pub const QS_ERR_ENCRYPTION_FAILED: i32 = -9;
pub const QS_ERR_DECRYPTION_FAILED: i32 = -10;
pub const QS_ERR_SIGNATURE_INVALID: i32 = -11;
pub const QS_ERR_NO_ACTIVE_SESSION: i32 = -12;
pub const QS_ERR_INVALID_ARGUMENT: i32 = -13;
pub const QS_ERR_ALLOCATION_FAILED: i32 = -14;
pub const QS_ERR_SERIALIZATION: i32 = -15;
/// 边界内 panic，已捕获
pub const QS_ERR_INTERNAL: i32 = -99;

fn status_of(error: &Error) -> i32 {
    match error {
        Error::NotInitialized => QS_ERR_NOT_INITIALIZED,
        Error::AlreadyInitialized => QS_ERR_ALREADY_INITIALIZED,
        Error::UnknownAlgorithm(_) => QS_ERR_UNKNOWN_ALGORITHM,
        Error::KeyNotFound(_) => QS_ERR_KEY_NOT_FOUND,
        Error::KeyAlreadyExists(_) => QS_ERR_KEY_ALREADY_EXISTS,
        Error::KeyExpired(_) => QS_ERR_KEY_EXPIRED,
        Error::AccessDenied(_) => QS_ERR_ACCESS_DENIED,
        Error::InvalidKeyMaterial(_) => QS_ERR_INVALID_KEY_MATERIAL,
        Error::EncryptionFailed => QS_ERR_ENCRYPTION_FAILED,
        Error::DecryptionFailed => QS_ERR_DECRYPTION_FAILED,
        Error::SignatureInvalid => QS_ERR_SIGNATURE_INVALID,
        Error::NoActiveSession => QS_ERR_NO_ACTIVE_SESSION,
        Error::InvalidArgument(_) => QS_ERR_INVALID_ARGUMENT,
        Error::AllocationFailed => QS_ERR_ALLOCATION_FAILED,
        Error::Serialization(_) | Error::Base64(_) => QS_ERR_SERIALIZATION,
    }
}

/// 所有权转移给调用方的输出缓冲区，用 `qs_buffer_free` 归还
#[repr(C)]
pub struct QsBuffer {
    pub data: *mut u8,
    pub len: usize,
}

impl QsBuffer {
    fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            len: 0,
        }
    }

    fn from_vec(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        let data = Box::into_raw(bytes.into_boxed_slice()) as *mut u8;
        Self { data, len }
    }
}

/// 固定元数据，按值返回，不涉及堆所有权
#[repr(C)]
pub struct QsAlgorithmInfo {
    pub name: [c_char; 32],
    pub description: [c_char; 128],
    pub security_level: u8,
    /// 1 = KEM，2 = 签名
    pub kind: u8,
    pub public_key_size: usize,
    pub secret_key_size: usize,
    /// 签名算法为 0
    pub ciphertext_size: usize,
    /// KEM 算法为 0
    pub signature_size: usize,
    pub is_recommended: bool,
}

fn fill_c_string(target: &mut [c_char], source: &str) {
    let bytes = source.as_bytes();
    let n = bytes.len().min(target.len() - 1);
    for (i, &b) in bytes[..n].iter().enumerate() {
        target[i] = b as c_char;
    }
    target[n] = 0;
}

impl QsAlgorithmInfo {
    fn of(descriptor: &AlgorithmDescriptor) -> Self {
        let mut info = Self {
            name: [0; 32],
            description: [0; 128],
            security_level: descriptor.security_level,
            kind: match descriptor.kind {
                AlgorithmKind::Kem => 1,
                AlgorithmKind::Signature => 2,
            },
            public_key_size: descriptor.public_key_size,
            secret_key_size: descriptor.secret_key_size,
            ciphertext_size: descriptor.ciphertext_size.unwrap_or(0),
            signature_size: descriptor.signature_size.unwrap_or(0),
            is_recommended: descriptor.is_recommended,
        };
        fill_c_string(&mut info.name, &descriptor.name);
        fill_c_string(&mut info.description, &descriptor.description);
        info
    }
}

/// 不透明句柄
pub struct QsSecurityManager {
    inner: QuantumSecurityManager,
}

fn guard(f: impl FnOnce() -> i32) -> i32 {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or(QS_ERR_INTERNAL)
}

/// # Safety
/// `ptr` 为空时返回 None
unsafe fn slice_from<'a>(ptr: *const u8, len: usize) -> Option<&'a [u8]> {
    if len == 0 {
        return Some(&[]);
    }
    if ptr.is_null() {
        return None;
    }
    Some(std::slice::from_raw_parts(ptr, len))
}

unsafe fn str_from<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

unsafe fn manager_from<'a>(handle: *const QsSecurityManager) -> Option<&'a QuantumSecurityManager> {
    handle.as_ref().map(|h| &h.inner)
}

/// 当前默认算法对应的 KEM 描述，用于解析密钥束字节
fn current_kem(manager: &QuantumSecurityManager) -> crate::error::Result<std::sync::Arc<AlgorithmDescriptor>> {
    let registry = manager.registry();
    let descriptor = registry.get_info(&registry.get_default()?)?;
    match descriptor.kind {
        AlgorithmKind::Kem => Ok(descriptor),
        AlgorithmKind::Signature => registry.companion_kem(descriptor.security_level),
    }
}

macro_rules! try_ffi {
    ($expr:expr) => {
        match $expr {
            Ok(value) => value,
            Err(e) => return status_of(&e),
        }
    };
}

/// 创建管理器。`config_json` 可为 NULL（取默认配置），
/// `passphrase` 不可为 NULL。
///
/// # Safety
/// 指针须满足各自的空值约定；`out` 必须指向有效内存。
#[no_mangle]
pub unsafe extern "C" fn qs_manager_new(
    config_json: *const c_char,
    passphrase: *const c_char,
    out: *mut *mut QsSecurityManager,
) -> i32 {
    guard(|| {
        if out.is_null() {
            return QS_ERR_INVALID_ARGUMENT;
        }
        let Some(passphrase) = str_from(passphrase) else {
            return QS_ERR_INVALID_ARGUMENT;
        };
        let config = match str_from(config_json) {
            Some(json) => match serde_json::from_str::<ConfigFile>(json) {
                Ok(config) => config,
                Err(_) => return QS_ERR_SERIALIZATION,
            },
            None if config_json.is_null() => ConfigFile::default(),
            None => return QS_ERR_INVALID_ARGUMENT,
        };
        let inner = try_ffi!(QuantumSecurityManager::new(
            config,
            &SecretString::from(passphrase.to_string()),
        ));
        *out = Box::into_raw(Box::new(QsSecurityManager { inner }));
        QS_OK
    })
}

/// # Safety
/// `handle` 必须来自 `qs_manager_new`，且只释放一次。
#[no_mangle]
pub unsafe extern "C" fn qs_manager_free(handle: *mut QsSecurityManager) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// 生成混合密钥对，公私钥束分别写入两个输出缓冲区
///
/// # Safety
/// 输出指针必须有效；缓冲区由 `qs_buffer_free` 释放。
#[no_mangle]
pub unsafe extern "C" fn qs_generate_key_pair(
    handle: *const QsSecurityManager,
    out_public: *mut QsBuffer,
    out_private: *mut QsBuffer,
) -> i32 {
    guard(|| {
        let Some(manager) = manager_from(handle) else {
            return QS_ERR_NOT_INITIALIZED;
        };
        if out_public.is_null() || out_private.is_null() {
            return QS_ERR_INVALID_ARGUMENT;
        }
        let (public, private) = try_ffi!(manager.generate_hybrid_key_pair());
        *out_public = QsBuffer::from_vec(public.to_bytes());
        *out_private = QsBuffer::from_vec(private.to_bytes().to_vec());
        QS_OK
    })
}

/// # Safety
/// 指针/长度必须描述有效内存。
#[no_mangle]
pub unsafe extern "C" fn qs_encrypt(
    handle: *const QsSecurityManager,
    public_key: *const u8,
    public_key_len: usize,
    data: *const u8,
    data_len: usize,
    out: *mut QsBuffer,
) -> i32 {
    guard(|| {
        let Some(manager) = manager_from(handle) else {
            return QS_ERR_NOT_INITIALIZED;
        };
        let (Some(public_key), Some(data)) =
            (slice_from(public_key, public_key_len), slice_from(data, data_len))
        else {
            return QS_ERR_INVALID_ARGUMENT;
        };
        if out.is_null() {
            return QS_ERR_INVALID_ARGUMENT;
        }
        let descriptor = try_ffi!(current_kem(manager));
        let bundle = try_ffi!(HybridPublicBundle::from_bytes(&descriptor, public_key));
        let wire = try_ffi!(manager.encrypt_data(&bundle, data));
        *out = QsBuffer::from_vec(wire);
        QS_OK
    })
}

/// # Safety
/// 指针/长度必须描述有效内存。
#[no_mangle]
pub unsafe extern "C" fn qs_decrypt(
    handle: *const QsSecurityManager,
    private_key: *const u8,
    private_key_len: usize,
    data: *const u8,
    data_len: usize,
    out: *mut QsBuffer,
) -> i32 {
    guard(|| {
        let Some(manager) = manager_from(handle) else {
            return QS_ERR_NOT_INITIALIZED;
        };
        let (Some(private_key), Some(data)) =
            (slice_from(private_key, private_key_len), slice_from(data, data_len))
        else {
            return QS_ERR_INVALID_ARGUMENT;
        };
        if out.is_null() {
            return QS_ERR_INVALID_ARGUMENT;
        }
        let descriptor = try_ffi!(current_kem(manager));
        let bundle = try_ffi!(HybridPrivateBundle::from_bytes(&descriptor, private_key));
        let plaintext = try_ffi!(manager.decrypt_data(&bundle, data));
        *out = QsBuffer::from_vec(plaintext);
        QS_OK
    })
}

/// # Safety
/// 指针/长度必须描述有效内存。
#[no_mangle]
pub unsafe extern "C" fn qs_sign(
    handle: *const QsSecurityManager,
    private_key: *const u8,
    private_key_len: usize,
    message: *const u8,
    message_len: usize,
    out: *mut QsBuffer,
) -> i32 {
    guard(|| {
        let Some(manager) = manager_from(handle) else {
            return QS_ERR_NOT_INITIALIZED;
        };
        let (Some(private_key), Some(message)) = (
            slice_from(private_key, private_key_len),
            slice_from(message, message_len),
        ) else {
            return QS_ERR_INVALID_ARGUMENT;
        };
        if out.is_null() {
            return QS_ERR_INVALID_ARGUMENT;
        }
        let signature = try_ffi!(manager.sign_data(private_key, message));
        *out = QsBuffer::from_vec(signature);
        QS_OK
    })
}

/// 验签：`QS_OK` 表示有效，`QS_ERR_SIGNATURE_INVALID` 表示无效
///
/// # Safety
/// 指针/长度必须描述有效内存。
#[no_mangle]
pub unsafe extern "C" fn qs_verify(
    handle: *const QsSecurityManager,
    public_key: *const u8,
    public_key_len: usize,
    message: *const u8,
    message_len: usize,
    signature: *const u8,
    signature_len: usize,
) -> i32 {
    guard(|| {
        let Some(manager) = manager_from(handle) else {
            return QS_ERR_NOT_INITIALIZED;
        };
        let (Some(public_key), Some(message), Some(signature)) = (
            slice_from(public_key, public_key_len),
            slice_from(message, message_len),
            slice_from(signature, signature_len),
        ) else {
            return QS_ERR_INVALID_ARGUMENT;
        };
        match manager.verify_signature(public_key, message, signature) {
            Ok(true) => QS_OK,
            Ok(false) => QS_ERR_SIGNATURE_INVALID,
            Err(e) => status_of(&e),
        }
    })
}

/// 存入外部密钥材料。`access_levels` 与 `tags` 是逗号分隔列表，可为 NULL。
///
/// # Safety
/// 指针须满足各自的空值约定。
#[no_mangle]
pub unsafe extern "C" fn qs_store_key(
    handle: *const QsSecurityManager,
    key_id: *const c_char,
    algorithm: *const c_char,
    public_key: *const u8,
    public_key_len: usize,
    private_key: *const u8,
    private_key_len: usize,
    metadata: *const c_char,
    access_levels: *const c_char,
    tags: *const c_char,
) -> i32 {
    guard(|| {
        let Some(manager) = manager_from(handle) else {
            return QS_ERR_NOT_INITIALIZED;
        };
        let (Some(key_id), Some(algorithm)) = (str_from(key_id), str_from(algorithm)) else {
            return QS_ERR_INVALID_ARGUMENT;
        };
        let (Some(public_key), Some(private_key)) = (
            slice_from(public_key, public_key_len),
            slice_from(private_key, private_key_len),
        ) else {
            return QS_ERR_INVALID_ARGUMENT;
        };
        let metadata = str_from(metadata).unwrap_or("");
        let material = KeyMaterial {
            public_key: public_key.to_vec(),
            private_key: private_key.to_vec().into(),
        };
        let status = manager.store_quantum_key(
            key_id,
            algorithm,
            material,
            metadata,
            split_list(str_from(access_levels)),
            split_list(str_from(tags)),
            None,
        );
        match status {
            Ok(()) => QS_OK,
            Err(e) => status_of(&e),
        }
    })
}

/// # Safety
/// `out_generation` 可为 NULL（忽略输出）。
#[no_mangle]
pub unsafe extern "C" fn qs_rotate_key(
    handle: *const QsSecurityManager,
    key_id: *const c_char,
    out_generation: *mut u64,
) -> i32 {
    guard(|| {
        let Some(manager) = manager_from(handle) else {
            return QS_ERR_NOT_INITIALIZED;
        };
        let Some(key_id) = str_from(key_id) else {
            return QS_ERR_INVALID_ARGUMENT;
        };
        let generation = try_ffi!(manager.rotate_quantum_key(key_id));
        if !out_generation.is_null() {
            *out_generation = generation;
        }
        QS_OK
    })
}

/// # Safety
/// `out` 必须指向有效内存。
#[no_mangle]
pub unsafe extern "C" fn qs_get_algorithm_info(
    handle: *const QsSecurityManager,
    algorithm: *const c_char,
    out: *mut QsAlgorithmInfo,
) -> i32 {
    guard(|| {
        let Some(manager) = manager_from(handle) else {
            return QS_ERR_NOT_INITIALIZED;
        };
        let Some(algorithm) = str_from(algorithm) else {
            return QS_ERR_INVALID_ARGUMENT;
        };
        if out.is_null() {
            return QS_ERR_INVALID_ARGUMENT;
        }
        let descriptor = try_ffi!(manager.get_algorithm_info(algorithm));
        *out = QsAlgorithmInfo::of(&descriptor);
        QS_OK
    })
}

/// 释放任何由本库分配并经 `QsBuffer` 交出的缓冲区
///
/// # Safety
/// `buffer` 须指向本库写出的 `QsBuffer`，且只释放一次。
#[no_mangle]
pub unsafe extern "C" fn qs_buffer_free(buffer: *mut QsBuffer) {
    if buffer.is_null() {
        return;
    }
    let buf = &mut *buffer;
    if !buf.data.is_null() && buf.len > 0 {
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(buf.data, buf.len)));
    }
    *buf = QsBuffer::empty();
}

fn split_list(input: Option<&str>) -> BTreeSet<String> {
    input
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
