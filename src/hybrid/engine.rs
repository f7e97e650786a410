//!
//! # 混合加密引擎
//!
//! 加密：临时 X25519 DH 与 ML-KEM 封装各出一半共享密钥，
//! 经 HKDF-SHA256 合并（经典半边在前，后量子半边在后），
//! 派生 256 位对称密钥后走 AEAD。两个难题任破其一都不足以解密。
//!
//! 会话：一次握手派生带代数的会话密钥，放在 `ArcSwapOption` 后面，
//! 每次调用取一份快照，轮换是整体替换，旧密钥随最后引用释放清零。
//!

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use hkdf::Hkdf;
use rand_core::OsRng;
use sha2::Sha256;
use tracing::{debug, info};
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::common::aead::{self, KEY_SIZE, NONCE_SIZE};
use crate::common::config::{AeadAlgorithm, CryptoConfig, SessionPolicy};
use crate::common::utils::constant_time_eq;
use crate::error::{Error, Result};
use crate::hybrid::bundle::{HybridPrivateBundle, HybridPublicBundle, X25519_KEY_SIZE};
use crate::hybrid::ciphertext::HybridCiphertext;
use crate::hybrid::session::{
    confirmation_of, session_aad, SessionHandshake, SessionKey, SessionState,
    SESSION_HEADER_SIZE,
};
use crate::provider::PqcProvider;
use crate::registry::{AlgorithmKind, AlgorithmRegistry};

/// HKDF info 的域分隔前缀，后接 ML-KEM 算法名
const HKDF_DOMAIN: &[u8] = b"quantum-seal/hybrid-v1/";

pub struct HybridEncryptionEngine {
    registry: Arc<AlgorithmRegistry>,
    provider: Arc<dyn PqcProvider>,
    aead: AeadAlgorithm,
    session_policy: SessionPolicy,
    session: ArcSwapOption<SessionState>,
}

impl HybridEncryptionEngine {
    pub fn new(
        registry: Arc<AlgorithmRegistry>,
        provider: Arc<dyn PqcProvider>,
        crypto: &CryptoConfig,
        session_policy: SessionPolicy,
    ) -> Self {
        Self {
            registry,
            provider,
            aead: crypto.aead,
            session_policy,
            session: ArcSwapOption::const_empty(),
        }
    }

    /// 引擎使用的 KEM：默认算法本身，或默认算法为签名方案时
    /// 同安全等级的配套 KEM
    fn resolve_kem(&self) -> Result<Arc<crate::registry::AlgorithmDescriptor>> {
        let name = self.registry.get_default()?;
        let descriptor = self.registry.get_info(&name)?;
        match descriptor.kind {
            AlgorithmKind::Kem => Ok(descriptor),
            AlgorithmKind::Signature => self.registry.companion_kem(descriptor.security_level),
        }
    }

    /// 生成一对混合密钥：X25519 与 ML-KEM 各自独立生成后绑定
    pub fn generate_key_pair(&self) -> Result<(HybridPublicBundle, HybridPrivateBundle)> {
        let descriptor = self.resolve_kem()?;
        let classical_secret = StaticSecret::random_from_rng(OsRng);
        let classical_public = X25519PublicKey::from(&classical_secret);
        let (pqc_public, pqc_secret) = self.provider.generate_keypair(&descriptor.name)?;
        Ok((
            HybridPublicBundle {
                algorithm: descriptor.name.clone(),
                classical: classical_public.to_bytes(),
                pqc: pqc_public,
            },
            HybridPrivateBundle::new(
                descriptor.name.clone(),
                classical_secret.to_bytes(),
                pqc_secret,
            ),
        ))
    }

    pub fn encrypt(&self, peer: &HybridPublicBundle, data: &[u8]) -> Result<HybridCiphertext> {
        let (kem_ciphertext, classical_ephemeral_public, key) = self.encapsulate_to(peer)?;
        let (nonce, aead_ciphertext) = aead::seal(self.aead, &key, &[], data)?;
        Ok(HybridCiphertext {
            algorithm: peer.algorithm.clone(),
            kem_ciphertext,
            classical_ephemeral_public,
            aead: self.aead,
            nonce,
            aead_ciphertext,
        })
    }

    /// 解密。认证失败、格式不符、算法不匹配一律 `DecryptionFailed`，
    /// 不输出任何字节。
    pub fn decrypt(
        &self,
        private: &HybridPrivateBundle,
        ciphertext: &HybridCiphertext,
    ) -> Result<Vec<u8>> {
        if ciphertext.algorithm != private.algorithm {
            return Err(Error::DecryptionFailed);
        }
        let key = self.decapsulate_from(
            private,
            &ciphertext.kem_ciphertext,
            &ciphertext.classical_ephemeral_public,
        )?;
        aead::open(
            ciphertext.aead,
            &key,
            &[],
            &ciphertext.nonce,
            &ciphertext.aead_ciphertext,
        )
        .map_err(|_| Error::DecryptionFailed)
    }

    // --- 会话 ---

    /// 发起方：对远端公钥束做一次混合握手，替换当前会话，
    /// 返回需要传输给响应方的握手消息
    pub fn establish_session(&self, peer: &HybridPublicBundle) -> Result<SessionHandshake> {
        let generation = self
            .session
            .load()
            .as_ref()
            .map(|s| s.key.generation + 1)
            .unwrap_or(0);
        self.handshake_with(peer, generation)
    }

    /// 响应方：用本地私钥束处理握手消息，校验密钥确认值后
    /// 安装同一会话密钥
    pub fn accept_session(
        &self,
        private: &HybridPrivateBundle,
        handshake: &SessionHandshake,
    ) -> Result<()> {
        if handshake.algorithm != private.algorithm {
            return Err(Error::DecryptionFailed);
        }
        let key = self.decapsulate_from(
            private,
            &handshake.kem_ciphertext,
            &handshake.classical_ephemeral_public,
        )?;
        let expected = confirmation_of(&key);
        if !constant_time_eq(&expected, &handshake.confirmation) {
            return Err(Error::DecryptionFailed);
        }
        let session_key = Arc::new(SessionKey::new(
            handshake.generation,
            self.session_policy.validity_secs,
            key,
        ));
        self.session.store(Some(Arc::new(SessionState {
            key: session_key,
            peer: None,
        })));
        debug!(generation = handshake.generation, "session accepted");
        Ok(())
    }

    /// 当前会话密钥，过期视同无会话
    pub fn get_session_key(&self) -> Result<Arc<SessionKey>> {
        let state = self.current_session()?;
        Ok(Arc::clone(&state.key))
    }

    /// 对记住的对端重新握手，代数加一。旧密钥随最后引用释放清零。
    pub fn rotate_session_key(&self) -> Result<SessionHandshake> {
        let state = self.session.load_full().ok_or(Error::NoActiveSession)?;
        let peer = state.peer.clone().ok_or_else(|| {
            Error::InvalidArgument("only the session initiator can rotate".to_string())
        })?;
        let handshake = self.handshake_with(&peer, state.key.generation + 1)?;
        info!(generation = handshake.generation, "session key rotated");
        Ok(handshake)
    }

    /// 用当前会话密钥加密。
    /// 线格式：`[8B 代数 BE][1B AEAD 标识][12B nonce][AEAD 密文…]`
    pub fn session_encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let state = self.current_session()?;
        let generation = state.key.generation;
        let (nonce, ciphertext) = aead::seal(
            self.aead,
            state.key.key(),
            &session_aad(generation),
            plaintext,
        )?;
        let mut out = Vec::with_capacity(SESSION_HEADER_SIZE + ciphertext.len());
        out.extend_from_slice(&generation.to_be_bytes());
        out.push(self.aead.wire_id());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn session_decrypt(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let state = self.current_session()?;
        if bytes.len() < SESSION_HEADER_SIZE {
            return Err(Error::DecryptionFailed);
        }
        let (header, ciphertext) = bytes.split_at(SESSION_HEADER_SIZE);
        let generation = u64::from_be_bytes(
            header[..8].try_into().map_err(|_| Error::DecryptionFailed)?,
        );
        if generation != state.key.generation {
            return Err(Error::DecryptionFailed);
        }
        let aead_alg =
            AeadAlgorithm::from_wire_id(header[8]).ok_or(Error::DecryptionFailed)?;
        let nonce: [u8; NONCE_SIZE] = header[9..]
            .try_into()
            .map_err(|_| Error::DecryptionFailed)?;
        aead::open(
            aead_alg,
            state.key.key(),
            &session_aad(generation),
            &nonce,
            ciphertext,
        )
        .map_err(|_| Error::DecryptionFailed)
    }

    // --- 内部 ---

    fn current_session(&self) -> Result<Arc<SessionState>> {
        let state = self.session.load_full().ok_or(Error::NoActiveSession)?;
        if state.key.is_expired() {
            return Err(Error::NoActiveSession);
        }
        Ok(state)
    }

    fn handshake_with(
        &self,
        peer: &HybridPublicBundle,
        generation: u64,
    ) -> Result<SessionHandshake> {
        let (kem_ciphertext, classical_ephemeral_public, key) = self.encapsulate_to(peer)?;
        let confirmation = confirmation_of(&key);
        let session_key = Arc::new(SessionKey::new(
            generation,
            self.session_policy.validity_secs,
            key,
        ));
        self.session.store(Some(Arc::new(SessionState {
            key: session_key,
            peer: Some(peer.clone()),
        })));
        debug!(generation, "session established");
        Ok(SessionHandshake {
            algorithm: peer.algorithm.clone(),
            generation,
            kem_ciphertext,
            classical_ephemeral_public,
            confirmation,
        })
    }

    /// 封装方向的混合密钥派生
    fn encapsulate_to(
        &self,
        peer: &HybridPublicBundle,
    ) -> Result<(Vec<u8>, [u8; X25519_KEY_SIZE], Zeroizing<[u8; KEY_SIZE]>)> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = X25519PublicKey::from(&ephemeral);
        let peer_classical = X25519PublicKey::from(peer.classical);
        let s_classical = ephemeral.diffie_hellman(&peer_classical);

        let (kem_ciphertext, s_pqc) = self.provider.encapsulate(&peer.algorithm, &peer.pqc)?;
        let key = derive_key(&peer.algorithm, s_classical.as_bytes(), &s_pqc)?;
        Ok((kem_ciphertext, ephemeral_public.to_bytes(), key))
    }

    /// 解封装方向，所有失败折叠为 `DecryptionFailed`
    fn decapsulate_from(
        &self,
        private: &HybridPrivateBundle,
        kem_ciphertext: &[u8],
        ephemeral_public: &[u8; X25519_KEY_SIZE],
    ) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
        let classical_secret = private
            .classical_secret()
            .map_err(|_| Error::DecryptionFailed)?;
        let s_classical =
            classical_secret.diffie_hellman(&X25519PublicKey::from(*ephemeral_public));
        let s_pqc = self
            .provider
            .decapsulate(&private.algorithm, kem_ciphertext, private.pqc_secret())
            .map_err(|_| Error::DecryptionFailed)?;
        derive_key(&private.algorithm, s_classical.as_bytes(), &s_pqc)
            .map_err(|_| Error::DecryptionFailed)
    }
}

/// `K = HKDF-SHA256(ikm = S_classical ‖ S_pqc, salt = ∅, info = 域前缀 ‖ 算法名)`。
/// 经典半边永远在前，两端才能派生出同一密钥。
fn derive_key(
    algorithm: &str,
    classical: &[u8],
    pqc: &[u8],
) -> Result<Zeroizing<[u8; KEY_SIZE]>> {
    let mut ikm = Zeroizing::new(Vec::with_capacity(classical.len() + pqc.len()));
    ikm.extend_from_slice(classical);
    ikm.extend_from_slice(pqc);

    let mut info = Vec::with_capacity(HKDF_DOMAIN.len() + algorithm.len());
    info.extend_from_slice(HKDF_DOMAIN);
    info.extend_from_slice(algorithm.as_bytes());

    let hkdf = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hkdf.expand(&info, okm.as_mut())
        .map_err(|_| Error::EncryptionFailed)?;
    Ok(okm)
}
