//! 混合加密端到端测试：各算法与负载尺寸的往返、篡改敏感性、会话流程。

use std::sync::Arc;

use quantum_seal::{
    AeadAlgorithm, AlgorithmRegistry, ConfigFile, CryptoConfig, Error, HybridEncryptionEngine,
    PqCryptoProvider, QuantumSecurityManager, SessionPolicy,
};
use secrecy::SecretString;

fn engine_for(algorithm: &str, aead: AeadAlgorithm) -> HybridEncryptionEngine {
    let registry = AlgorithmRegistry::new();
    registry.set_default(algorithm).unwrap();
    let crypto = CryptoConfig {
        default_algorithm: algorithm.to_string(),
        aead,
        ..CryptoConfig::default()
    };
    HybridEncryptionEngine::new(
        Arc::new(registry),
        Arc::new(PqCryptoProvider::new()),
        &crypto,
        SessionPolicy::default(),
    )
}

fn security_manager() -> QuantumSecurityManager {
    QuantumSecurityManager::new(ConfigFile::default(), &SecretString::from("it-pw")).unwrap()
}

#[test]
fn roundtrip_every_kem_and_size() {
    for algorithm in ["ML-KEM-512", "ML-KEM-768", "ML-KEM-1024"] {
        let engine = engine_for(algorithm, AeadAlgorithm::Aes256Gcm);
        let (public, private) = engine.generate_key_pair().unwrap();
        for size in [0usize, 1, 4096] {
            let message = vec![0x5Au8; size];
            let ciphertext = engine.encrypt(&public, &message).unwrap();
            assert_eq!(engine.decrypt(&private, &ciphertext).unwrap(), message);
        }
    }
}

#[test]
fn roundtrip_one_mebibyte() {
    let engine = engine_for("ML-KEM-768", AeadAlgorithm::Aes256Gcm);
    let (public, private) = engine.generate_key_pair().unwrap();
    let message: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let ciphertext = engine.encrypt(&public, &message).unwrap();
    assert_eq!(engine.decrypt(&private, &ciphertext).unwrap(), message);
}

#[test]
fn roundtrip_chacha20poly1305() {
    let engine = engine_for("ML-KEM-768", AeadAlgorithm::ChaCha20Poly1305);
    let (public, private) = engine.generate_key_pair().unwrap();
    let ciphertext = engine.encrypt(&public, b"stream cipher suite").unwrap();
    assert_eq!(
        engine.decrypt(&private, &ciphertext).unwrap(),
        b"stream cipher suite"
    );
}

#[test]
fn single_bit_flips_fail_closed() {
    let manager = security_manager();
    let (public, private) = manager.generate_hybrid_key_pair().unwrap();
    let wire = manager.encrypt_data(&public, b"tamper target").unwrap();

    // 扫过整个线格式，每 97 字节翻一位，覆盖 KEM 密文、
    // 临时公钥、nonce 与 AEAD 密文各区段
    for index in (0..wire.len()).step_by(97).chain([1, wire.len() - 1]) {
        let mut tampered = wire.clone();
        tampered[index] ^= 0x01;
        match manager.decrypt_data(&private, &tampered) {
            Err(Error::DecryptionFailed) => {}
            other => panic!("bit flip at {index} must fail closed, got {other:?}"),
        }
    }
}

#[test]
fn wrong_recipient_fails() {
    let manager = security_manager();
    let (public, _) = manager.generate_hybrid_key_pair().unwrap();
    let (_, other_private) = manager.generate_hybrid_key_pair().unwrap();
    let wire = manager.encrypt_data(&public, b"for someone else").unwrap();
    assert!(matches!(
        manager.decrypt_data(&other_private, &wire).unwrap_err(),
        Error::DecryptionFailed
    ));
}

#[test]
fn session_establishment_and_rotation() {
    let initiator = security_manager();
    let responder = security_manager();
    let (public, private) = responder.generate_hybrid_key_pair().unwrap();

    let handshake = initiator.perform_key_exchange(&public).unwrap();
    responder.accept_key_exchange(&private, &handshake).unwrap();
    assert!(initiator.verify_key_exchange());
    assert!(responder.verify_key_exchange());

    let wire = initiator.hybrid_engine().session_encrypt(b"hello").unwrap();
    assert_eq!(
        responder.hybrid_engine().session_decrypt(&wire).unwrap(),
        b"hello"
    );

    // 轮换：代数递增，旧密文在新会话下不可解
    let rotated = initiator.hybrid_engine().rotate_session_key().unwrap();
    assert_eq!(rotated.generation, handshake.generation + 1);
    responder.accept_key_exchange(&private, &rotated).unwrap();
    assert!(responder.hybrid_engine().session_decrypt(&wire).is_err());

    let fresh = initiator.hybrid_engine().session_encrypt(b"again").unwrap();
    assert_eq!(
        responder.hybrid_engine().session_decrypt(&fresh).unwrap(),
        b"again"
    );
}

#[test]
fn handshake_wire_roundtrip() {
    let initiator = security_manager();
    let responder = security_manager();
    let (public, private) = responder.generate_hybrid_key_pair().unwrap();

    let handshake = initiator.perform_key_exchange(&public).unwrap();
    let bytes = handshake.to_bytes(initiator.registry()).unwrap();
    let parsed =
        quantum_seal::SessionHandshake::from_bytes(responder.registry(), &bytes).unwrap();
    assert_eq!(parsed, handshake);
    responder.accept_key_exchange(&private, &parsed).unwrap();
}
