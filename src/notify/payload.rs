//! Payload slot shared between the worker and host callers

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Contents of the most recently loaded file
#[derive(Debug, Clone)]
pub struct Payload {
    data: Arc<[u8]>,
    source: PathBuf,
    loaded_at: DateTime<Utc>,
}

impl Payload {
    pub fn new(data: Vec<u8>, source: PathBuf) -> Self {
        Self {
            data: data.into(),
            source,
            loaded_at: Utc::now(),
        }
    }

    pub fn data(&self) -> &Arc<[u8]> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Path the bytes were read from
    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

/// Last-write-wins storage for the latest [`Payload`]
///
/// Clones share the same slot. Writers replace the whole value under the
/// write lock, so readers always see either the old or the new payload.
#[derive(Debug, Clone, Default)]
pub struct PayloadSlot {
    inner: Arc<RwLock<Option<Payload>>>,
}

impl PayloadSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, payload: Payload) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(payload);
    }

    pub fn latest(&self) -> Option<Payload> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Bytes of the latest payload, or `None` if nothing was loaded yet
    pub fn data(&self) -> Option<Arc<[u8]>> {
        self.latest().map(|p| p.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_slot() {
        let slot = PayloadSlot::new();
        assert!(slot.data().is_none());
        assert!(slot.latest().is_none());
    }

    #[test]
    fn test_last_write_wins_across_clones() {
        let slot = PayloadSlot::new();
        let reader = slot.clone();

        slot.store(Payload::new(vec![1, 2, 3], PathBuf::from("/a")));
        slot.store(Payload::new(vec![4, 5], PathBuf::from("/b")));

        let latest = reader.latest().unwrap();
        assert_eq!(&latest.data()[..], &[4, 5]);
        assert_eq!(latest.source(), Path::new("/b"));
        assert_eq!(latest.len(), 2);
    }

    #[test]
    fn test_each_load_has_its_own_buffer() {
        let slot = PayloadSlot::new();
        slot.store(Payload::new(b"frame".to_vec(), PathBuf::from("/frame")));
        let first = slot.data().unwrap();
        assert!(Arc::ptr_eq(&first, &slot.data().unwrap()));

        // Same bytes, same path, possibly the same timestamp: still a new load
        slot.store(Payload::new(b"frame".to_vec(), PathBuf::from("/frame")));
        let second = slot.data().unwrap();
        assert_eq!(first, second);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_concurrent_readers_see_whole_payloads() {
        let slot = PayloadSlot::new();
        let writer = slot.clone();

        let handle = std::thread::spawn(move || {
            for i in 0..200u8 {
                writer.store(Payload::new(vec![i; 64], PathBuf::from("/frame")));
            }
        });

        for _ in 0..200 {
            if let Some(data) = slot.data() {
                assert_eq!(data.len(), 64);
                assert!(data.iter().all(|b| *b == data[0]));
            }
        }
        handle.join().unwrap();
        assert_eq!(slot.data().unwrap()[0], 199);
    }
}
