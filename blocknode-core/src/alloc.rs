use crate::error::{BlockError, Result};
use crate::kv::KvStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Persisted allocator state: a monotonic counter plus a stack of released ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatorState {
    pub top_id: u64,
    pub free: Vec<u64>,
}

/// Issues unique integer ids, reusing the most recently freed one first.
///
/// Every call holds one lock across read, modify and persist, so concurrent callers never
/// observe the same id.
pub struct IdAllocator {
    key: Vec<u8>,
    store: Arc<dyn KvStore>,
    state: Mutex<AllocatorState>,
}

impl IdAllocator {
    /// Load allocator `name` from `store`, starting empty if nothing was persisted.
    pub fn load(store: Arc<dyn KvStore>, name: &str) -> Result<Self> {
        let key = format!("alloc/{}", name).into_bytes();
        let state = match store.get(&key)? {
            Some(bytes) => serde_json::from_slice(&bytes)?,
            None => AllocatorState::default(),
        };

        tracing::debug!(
            "Loaded allocator {} (top_id={}, free={})",
            name,
            state.top_id,
            state.free.len()
        );

        Ok(Self {
            key,
            store,
            state: Mutex::new(state),
        })
    }

    pub fn new_id(&self) -> Result<u64> {
        let mut state = self.state.lock();

        let id = match state.free.pop() {
            Some(id) => id,
            None => {
                state.top_id += 1;
                state.top_id
            }
        };

        if let Err(e) = self.persist(&state) {
            // keep the id reachable rather than leaking it
            state.free.push(id);
            return Err(e);
        }

        Ok(id)
    }

    pub fn free_id(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();

        if id == 0 || id > state.top_id {
            return Err(BlockError::InvalidRequest(format!(
                "id {} was never allocated",
                id
            )));
        }
        if state.free.contains(&id) {
            return Err(BlockError::InvalidRequest(format!("id {} is already free", id)));
        }

        state.free.push(id);
        self.persist(&state)
    }

    pub fn state(&self) -> AllocatorState {
        self.state.lock().clone()
    }

    fn persist(&self, state: &AllocatorState) -> Result<()> {
        let bytes = serde_json::to_vec(state)?;
        self.store.put(&self.key, &bytes)
    }
}
