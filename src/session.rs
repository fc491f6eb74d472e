//! The `auth` session cookie.
//!
//! The session is JSON, encrypted with AES-256-GCM and then signed with
//! HMAC-SHA256. Cookies are always written with the current key pair; the
//! previous pair, if configured, is still accepted on read so keys can be
//! rotated without logging everybody out.

use crate::config::SessionKeyMaterial;
use crate::error::SessionError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use cookie::{Cookie, SameSite};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "auth";
const MAX_AGE_DAYS: i64 = 30;
const NONCE_LEN: usize = 12;

#[derive(Serialize, Deserialize, Default, Clone, PartialEq, Debug)]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<String>,
}

impl Session {
    /// The logged-in identity, if there is a non-empty one.
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref().filter(|user| !user.is_empty())
    }
}

struct SessionKey {
    signing: Vec<u8>,
    cipher: Aes256Gcm,
}

impl SessionKey {
    fn new(material: &SessionKeyMaterial) -> Self {
        // AES-256 needs exactly 32 bytes, configured keys can be any length.
        let digest = Sha256::digest(&material.encryption);
        SessionKey {
            signing: material.signing.clone(),
            cipher: <Aes256Gcm as KeyInit>::new(&digest),
        }
    }

    fn mac(&self) -> Option<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(&self.signing).ok()
    }

    fn seal(&self, plaintext: &[u8]) -> Result<String, SessionError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SessionError::Encrypt)?;

        let mut payload = nonce.to_vec();
        payload.extend_from_slice(&ciphertext);
        let payload = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac().ok_or(SessionError::Encrypt)?;
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", payload, signature))
    }

    fn open(&self, payload: &str, signature: &[u8]) -> Option<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(signature).ok()?;

        let sealed = URL_SAFE_NO_PAD.decode(payload).ok()?;
        if sealed.len() < NONCE_LEN {
            return None;
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()
    }
}

/// Encodes and decodes session cookie values.
pub struct SessionCodec {
    keys: Vec<SessionKey>,
    secure: bool,
}

impl SessionCodec {
    pub fn new(current: &SessionKeyMaterial, previous: Option<&SessionKeyMaterial>) -> Self {
        let mut keys = vec![SessionKey::new(current)];
        keys.extend(previous.map(SessionKey::new));
        SessionCodec { keys, secure: true }
    }

    /// Fresh keys that only live as long as this process.
    pub fn random_keys() -> SessionKeyMaterial {
        let mut signing = vec![0u8; 64];
        let mut encryption = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut signing);
        rand::thread_rng().fill_bytes(&mut encryption);
        SessionKeyMaterial {
            signing,
            encryption,
        }
    }

    /// Drops the `Secure` attribute, for plain-http local setups and tests.
    pub fn insecure(mut self) -> Self {
        self.secure = false;
        self
    }

    pub fn encode(&self, session: &Session) -> Result<String, SessionError> {
        let json = serde_json::to_vec(session)?;
        self.keys[0].seal(&json)
    }

    /// Anything that does not verify under one of the keys is no session.
    pub fn decode(&self, value: &str) -> Option<Session> {
        let (payload, signature) = value.rsplit_once('.')?;
        let signature = URL_SAFE_NO_PAD.decode(signature).ok()?;
        self.keys
            .iter()
            .find_map(|key| key.open(payload, &signature))
            .and_then(|json| serde_json::from_slice(&json).ok())
    }

    /// Reads the session out of a `Cookie` request header.
    pub fn read_cookie_header(&self, header: &str) -> Option<Session> {
        Cookie::split_parse(header)
            .filter_map(Result::ok)
            .find(|cookie| cookie.name() == SESSION_COOKIE)
            .and_then(|cookie| self.decode(cookie.value()))
    }

    /// A full `Set-Cookie` value carrying the session.
    pub fn set_cookie(&self, session: &Session) -> Result<String, SessionError> {
        let cookie = Cookie::build((SESSION_COOKIE, self.encode(session)?))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(cookie::time::Duration::days(MAX_AGE_DAYS))
            .build();
        Ok(cookie.to_string())
    }
}
