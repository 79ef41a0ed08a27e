//! Byte-buffer adapter shared by the PU, tile, and frame reassembly stages
//!
//! `bytes::Bytes` is already a reference-counted, zero-copy-sliceable byte
//! array, so the adapter itself is just a FIFO of `Bytes` chunks. Pushing a
//! buffer is a refcount bump, not a copy; `take`/`take_list`/`peek` slice or
//! concatenate only when a requested window actually spans chunk boundaries.

use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;

/// Ordered FIFO of byte buffers with byte-granular take/peek.
#[derive(Debug, Default)]
pub struct ByteQueue {
    chunks: VecDeque<Bytes>,
    total: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes currently held.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Appends a buffer. Takes a reference only; no copy.
    pub fn push(&mut self, buf: Bytes) {
        if buf.is_empty() {
            return;
        }
        self.total += buf.len();
        self.chunks.push_back(buf);
    }

    /// Removes and returns the first `n` bytes as one contiguous buffer.
    ///
    /// Copies only when the window spans more than one internal chunk.
    pub fn take(&mut self, n: usize) -> Bytes {
        assert!(n <= self.total, "take beyond available bytes");
        if n == 0 {
            return Bytes::new();
        }
        // Fast path: first chunk alone covers the request.
        if let Some(front) = self.chunks.front() {
            if front.len() >= n {
                let front = self.chunks.front_mut().unwrap();
                let out = front.split_to(n);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                self.total -= n;
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let front = self.chunks.front_mut().expect("enough bytes queued");
            if front.len() <= remaining {
                remaining -= front.len();
                out.extend_from_slice(front);
                self.chunks.pop_front();
            } else {
                out.extend_from_slice(&front[..remaining]);
                *front = front.split_off(remaining);
                remaining = 0;
            }
        }
        self.total -= n;
        out.freeze()
    }

    /// Removes and returns the first `n` bytes as the ordered list of
    /// internal buffers that cover them (the last one trimmed if the
    /// request ends mid-chunk).
    pub fn take_list(&mut self, n: usize) -> Vec<Bytes> {
        assert!(n <= self.total, "take_list beyond available bytes");
        let mut out = Vec::new();
        let mut remaining = n;
        while remaining > 0 {
            let front = self.chunks.front_mut().expect("enough bytes queued");
            if front.len() <= remaining {
                remaining -= front.len();
                out.push(self.chunks.pop_front().unwrap());
            } else {
                out.push(front.split_to(remaining));
                remaining = 0;
            }
        }
        self.total -= n;
        out
    }

    /// Copies `n` bytes starting at `offset` without flushing them.
    pub fn peek(&self, offset: usize, n: usize) -> Bytes {
        assert!(offset + n <= self.total, "peek beyond available bytes");
        let mut out = BytesMut::with_capacity(n);
        let mut pos = 0usize;
        let mut remaining = n;
        let mut skip = offset;
        for chunk in &self.chunks {
            if remaining == 0 {
                break;
            }
            let clen = chunk.len();
            if skip >= clen {
                skip -= clen;
                pos += clen;
                continue;
            }
            let start = skip;
            let take = (clen - start).min(remaining);
            out.extend_from_slice(&chunk[start..start + take]);
            remaining -= take;
            skip = 0;
            pos += clen;
        }
        let _ = pos;
        out.freeze()
    }

    /// Drops all buffered bytes.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total = 0;
    }
}

/// Materializes a private, writable copy of `buf` for the one mutation path
/// into received bytes (the Psot rewrite in tile flush): reuses the
/// allocation when we hold the only reference, copies otherwise.
pub fn make_mut(buf: Bytes) -> BytesMut {
    match buf.try_into_mut() {
        Ok(m) => m,
        Err(shared) => BytesMut::from(&shared[..]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_within_single_chunk() {
        let mut q = ByteQueue::new();
        q.push(Bytes::from_static(b"hello world"));
        let taken = q.take(5);
        assert_eq!(&taken[..], b"hello");
        assert_eq!(q.total(), 6);
    }

    #[test]
    fn take_spans_chunks() {
        let mut q = ByteQueue::new();
        q.push(Bytes::from_static(b"ab"));
        q.push(Bytes::from_static(b"cd"));
        q.push(Bytes::from_static(b"ef"));
        let taken = q.take(5);
        assert_eq!(&taken[..], b"abcde");
        assert_eq!(q.total(), 1);
    }

    #[test]
    fn take_list_trims_last_chunk() {
        let mut q = ByteQueue::new();
        q.push(Bytes::from_static(b"abc"));
        q.push(Bytes::from_static(b"defg"));
        let list = q.take_list(5);
        assert_eq!(list.len(), 2);
        assert_eq!(&list[0][..], b"abc");
        assert_eq!(&list[1][..], b"de");
        assert_eq!(q.total(), 2);
    }

    #[test]
    fn peek_does_not_flush() {
        let mut q = ByteQueue::new();
        q.push(Bytes::from_static(b"abc"));
        q.push(Bytes::from_static(b"def"));
        let peeked = q.peek(2, 3);
        assert_eq!(&peeked[..], b"cde");
        assert_eq!(q.total(), 6);
    }

    #[test]
    fn clear_drops_everything() {
        let mut q = ByteQueue::new();
        q.push(Bytes::from_static(b"abc"));
        q.clear();
        assert_eq!(q.total(), 0);
        assert!(q.is_empty());
    }

    #[test]
    fn make_mut_copies_when_shared() {
        let shared = Bytes::from_static(b"0123456789");
        let clone = shared.clone();
        let mut m = make_mut(shared);
        m[0] = b'X';
        assert_eq!(&clone[..1], b"0");
        assert_eq!(&m[..1], b"X");
    }
}
