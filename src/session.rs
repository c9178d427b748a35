// 🔑 Session identity - signed `connections` cookie
//
// Cookie value is `<uuid>.<base64url HMAC-SHA256(secret, uuid)>`. A missing
// cookie or a bad signature gets a fresh id.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Cookie carrying the session id
pub const SESSION_COOKIE: &str = "connections";

/// Length of a generated signing secret, in bytes
pub const SECRET_LEN: usize = 32;

#[derive(Clone)]
pub struct SessionKeys {
    mac: HmacSha256,
}

impl SessionKeys {
    pub fn new(secret: &[u8]) -> Result<Self, InvalidLength> {
        Ok(SessionKeys {
            mac: HmacSha256::new_from_slice(secret)?,
        })
    }

    /// Keys with a random secret; sessions won't survive a restart
    pub fn random() -> Result<Self, InvalidLength> {
        SessionKeys::new(&generate_secret())
    }

    fn keyed(&self, id: &str) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(id.as_bytes());
        mac
    }

    /// Cookie value for `id`
    pub fn sign(&self, id: &str) -> String {
        let tag = self.keyed(id).finalize().into_bytes();
        format!("{}.{}", id, URL_SAFE_NO_PAD.encode(tag))
    }

    /// Session id from a cookie value, if the signature checks out
    pub fn verify(&self, value: &str) -> Option<String> {
        let (id, signature) = value.rsplit_once('.')?;
        if id.is_empty() {
            return None;
        }
        let tag = URL_SAFE_NO_PAD.decode(signature).ok()?;
        // Constant-time comparison
        self.keyed(id).verify_slice(&tag).ok()?;
        Some(id.to_string())
    }

    /// Existing session id, or a new one plus the cookie value to set
    pub fn resolve(&self, cookie: Option<&str>) -> (String, Option<String>) {
        if let Some(id) = cookie.and_then(|value| self.verify(value)) {
            return (id, None);
        }
        let id = uuid::Uuid::new_v4().to_string();
        let value = self.sign(&id);
        tracing::debug!(session = %id, "issued new session");
        (id, Some(value))
    }
}

pub fn generate_secret() -> Vec<u8> {
    let mut secret = vec![0u8; SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

/// Value of cookie `name` in a `Cookie:` header
pub fn cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then_some(value)
    })
}

/// `Set-Cookie:` header value
pub fn set_cookie(name: &str, value: &str, max_age_secs: u64) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
        name, value, max_age_secs
    )
}
