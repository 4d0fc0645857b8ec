//! Append-only byte buffers shared between one writer task and any number of
//! snapshot readers.
//!
//! Used for captured worker stdout/stderr and for sink receive buffers. The
//! writer appends whole chunks under the lock, so readers never observe a
//! partially appended chunk.

use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable handle to a shared, append-only byte buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk atomically.
    pub fn append(&self, chunk: &[u8]) {
        self.lock().extend_from_slice(chunk);
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.lock().clone()
    }

    /// Current contents as (lossy) UTF-8 text.
    pub fn snapshot_string(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    /// True if `needle` occurs as a contiguous run of bytes.
    ///
    /// An empty needle always matches.
    pub fn contains(&self, needle: &[u8]) -> bool {
        let data = self.lock();
        contains_subslice(&data, needle)
    }

    /// Number of bytes appended so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True if nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        // A panicking appender leaves the Vec in a valid state; keep reading.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Naive subslice search; buffers here are small (kilobytes).
pub fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_snapshot() {
        let buf = SharedBuffer::new();
        assert!(buf.is_empty());
        buf.append(b"hello ");
        buf.append(b"world");
        assert_eq!(buf.snapshot(), b"hello world");
        assert_eq!(buf.snapshot_string(), "hello world");
        assert_eq!(buf.len(), 11);
    }

    #[test]
    fn snapshot_is_independent_of_later_appends() {
        let buf = SharedBuffer::new();
        buf.append(b"a");
        let snap = buf.snapshot();
        buf.append(b"b");
        assert_eq!(snap, b"a");
        assert_eq!(buf.snapshot(), b"ab");
    }

    #[test]
    fn contains_spans_chunk_boundaries() {
        let buf = SharedBuffer::new();
        buf.append(b"Restarting a ");
        buf.append(b"listener ...\n");
        assert!(buf.contains(b"Restarting a listener ..."));
        assert!(!buf.contains(b"Application has successfully initialized"));
        assert!(buf.contains(b""));
    }

    #[test]
    fn clones_share_contents() {
        let writer = SharedBuffer::new();
        let reader = writer.clone();
        writer.append(b"x");
        assert_eq!(reader.snapshot(), b"x");
    }

    #[test]
    fn concurrent_appends_are_not_torn() {
        let buf = SharedBuffer::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let buf = buf.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        buf.append(&[i as u8; 8]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let data = buf.snapshot();
        assert_eq!(data.len(), 4 * 100 * 8);
        // Every 8-byte chunk is homogeneous
        assert!(data.chunks(8).all(|c| c.iter().all(|b| *b == c[0])));
    }
}
