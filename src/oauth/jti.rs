use std::collections::HashMap;
use std::sync::Mutex;

/// Bounded memory of client assertion `jti` values, kept until the assertion
/// would have expired anyway.
pub struct JtiCache {
    capacity: usize,
    seen: Mutex<HashMap<(String, String), i64>>,
}

impl JtiCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Remember `(client_id, jti)` until `exp`. Returns false on a replay.
    ///
    /// When full, expired entries go first, then the one expiring soonest.
    pub fn record(&self, client_id: &str, jti: &str, exp: i64, now: i64) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|e| e.into_inner());
        let key = (client_id.to_string(), jti.to_string());

        if let Some(&expires) = seen.get(&key) {
            if expires > now {
                return false;
            }
        }

        if seen.len() >= self.capacity {
            seen.retain(|_, expires| *expires > now);
        }
        if seen.len() >= self.capacity {
            let victim = seen
                .iter()
                .min_by_key(|(_, expires)| **expires)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                seen.remove(&victim);
            }
        }

        seen.insert(key, exp);
        true
    }

    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
