use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;

use super::{PushedAuthorizationRequest, PushedRequestStore, StoreError};

#[derive(Default)]
pub struct InMemoryPushedRequestStore {
    requests: Mutex<HashMap<String, PushedAuthorizationRequest>>,
}

impl InMemoryPushedRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PushedRequestStore for InMemoryPushedRequestStore {
    fn create(&self, request: PushedAuthorizationRequest) -> Result<(), StoreError> {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        if requests.contains_key(&request.token) {
            return Err(StoreError::Conflict);
        }
        requests.insert(request.token.clone(), request);
        Ok(())
    }

    fn get(&self, token: &str) -> Result<Option<PushedAuthorizationRequest>, StoreError> {
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        Ok(requests.get(token).filter(|r| !r.is_expired(now)).cloned())
    }

    fn consume(&self, token: &str) -> Result<Option<PushedAuthorizationRequest>, StoreError> {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        Ok(requests.remove(token).filter(|r| !r.is_expired(now)))
    }

    fn sweep_expired(&self) -> Result<usize, StoreError> {
        let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        let before = requests.len();
        let now = Utc::now();
        requests.retain(|_, r| !r.is_expired(now));
        Ok(before - requests.len())
    }
}
