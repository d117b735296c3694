//! Scripted serial link for tests.
//!
//! Models a half-duplex device: each write consumes the next scripted reply
//! and, if the device is supposed to answer, makes those bytes readable.
//! Reads drain the readable buffer and return short counts when it runs dry,
//! matching the real link's idle-timeout semantics.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{LinkError, SerialLink};

/// One scripted reaction to a request write.
#[derive(Debug, Clone)]
pub enum Reply {
    /// The device answers with these bytes.
    Respond(Vec<u8>),
    /// The device stays silent; the next reads time out.
    Silent,
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<Reply>,
    /// Bytes currently readable off the line.
    rx_buffer: Vec<u8>,
    /// History of written requests.
    sent: Vec<Vec<u8>>,
    /// Per-write acceptance limits; writes beyond the queue accept everything.
    write_limits: VecDeque<usize>,
    reads: usize,
    flushes: usize,
}

/// Scripted serial link double. Clones share state so a test can keep a
/// handle for inspection while the executor owns the link.
#[derive(Debug, Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the device's reaction to the next unanswered write.
    pub fn push_reply(&self, reply: Reply) {
        self.state.lock().replies.push_back(reply);
    }

    /// Make `bytes` readable immediately, without waiting for a write.
    /// Simulates stale bytes left over from a prior malformed frame.
    pub fn inject_stale(&self, bytes: &[u8]) {
        self.state.lock().rx_buffer.extend_from_slice(bytes);
    }

    /// Cap how many bytes the next write will accept.
    pub fn limit_next_write(&self, limit: usize) {
        self.state.lock().write_limits.push_back(limit);
    }

    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent.clone()
    }

    pub fn read_calls(&self) -> usize {
        self.state.lock().reads
    }

    pub fn flush_calls(&self) -> usize {
        self.state.lock().flushes
    }

    pub fn pending_rx(&self) -> usize {
        self.state.lock().rx_buffer.len()
    }
}

#[async_trait]
impl SerialLink for MockLink {
    async fn write(&mut self, data: &[u8]) -> Result<usize, LinkError> {
        let mut state = self.state.lock();
        let accepted = match state.write_limits.pop_front() {
            Some(limit) => limit.min(data.len()),
            None => data.len(),
        };
        state.sent.push(data[..accepted].to_vec());
        match state.replies.pop_front() {
            Some(Reply::Respond(bytes)) => state.rx_buffer.extend_from_slice(&bytes),
            Some(Reply::Silent) | None => {}
        }
        Ok(accepted)
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut state = self.state.lock();
        state.reads += 1;
        let n = buf.len().min(state.rx_buffer.len());
        buf[..n].copy_from_slice(&state.rx_buffer[..n]);
        state.rx_buffer.drain(..n);
        Ok(n)
    }

    async fn flush_input(&mut self) -> Result<(), LinkError> {
        let mut state = self.state.lock();
        state.flushes += 1;
        state.rx_buffer.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reply_becomes_readable_after_write() {
        let mut link = MockLink::new();
        link.push_reply(Reply::Respond(vec![1, 2, 3]));

        assert_eq!(link.write(&[0xAA]).await.unwrap(), 1);
        let mut buf = [0u8; 8];
        assert_eq!(link.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);
        // Line is quiet now.
        assert_eq!(link.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn flush_discards_pending_input() {
        let mut link = MockLink::new();
        link.inject_stale(&[9, 9, 9]);
        link.flush_input().await.unwrap();
        assert_eq!(link.pending_rx(), 0);
        assert_eq!(link.flush_calls(), 1);
    }

    #[tokio::test]
    async fn write_limit_produces_short_write() {
        let mut link = MockLink::new();
        link.limit_next_write(2);
        assert_eq!(link.write(&[1, 2, 3, 4]).await.unwrap(), 2);
        assert_eq!(link.write(&[1, 2, 3, 4]).await.unwrap(), 4);
    }
}
