// 🍪 ClientBlobStore - roster kept by the browser in a cookie
//
// The cookie already belongs to a single client, so the store holds one
// slot and ignores the key. Built per request from the incoming cookie; the
// handler reads `cookie_value()` afterwards to send the new cookie back.
// There is no server-side copy to watch, so subscriptions never fire.

use std::sync::Mutex;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;

use super::{StateStore, Subscription};
use crate::error::StoreError;

/// Name of the cookie holding the encoded roster
pub const ROSTER_COOKIE: &str = "rowers";

/// Browsers cap cookies at roughly 4KB
pub const MAX_COOKIE_BYTES: usize = 4000;

#[derive(Default)]
struct Slot {
    encoded: Option<String>,
    revision: u64,
    dirty: bool,
}

#[derive(Default)]
pub struct ClientBlobStore {
    slot: Mutex<Slot>,
}

impl ClientBlobStore {
    /// Store seeded from the value of the incoming `rowers` cookie
    pub fn from_cookie(value: Option<&str>) -> Self {
        ClientBlobStore {
            slot: Mutex::new(Slot {
                encoded: value.map(str::to_string),
                revision: 0,
                dirty: false,
            }),
        }
    }

    /// Encoded value to send back, if anything was written
    pub fn cookie_value(&self) -> Option<String> {
        let slot = self.slot.lock().ok()?;
        if slot.dirty {
            slot.encoded.clone()
        } else {
            None
        }
    }
}

#[async_trait]
impl StateStore for ClientBlobStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let slot = self
            .slot
            .lock()
            .map_err(|_| StoreError::Backend("cookie slot lock poisoned".to_string()))?;

        let Some(encoded) = slot.encoded.as_deref() else {
            return Ok(None);
        };
        match URL_SAFE.decode(encoded) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring undecodable roster cookie");
                Ok(None)
            }
        }
    }

    async fn put(&self, _key: &str, value: Vec<u8>) -> Result<u64, StoreError> {
        let encoded = URL_SAFE.encode(&value);
        if encoded.len() > MAX_COOKIE_BYTES {
            return Err(StoreError::ValueTooLarge {
                size: encoded.len(),
                limit: MAX_COOKIE_BYTES,
            });
        }

        let mut slot = self
            .slot
            .lock()
            .map_err(|_| StoreError::Backend("cookie slot lock poisoned".to_string()))?;
        slot.encoded = Some(encoded);
        slot.revision += 1;
        slot.dirty = true;
        Ok(slot.revision)
    }

    async fn subscribe(&self, _key: &str) -> Result<Subscription, StoreError> {
        Ok(Subscription::idle())
    }
}
