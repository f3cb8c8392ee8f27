//! The sole sink for bytes returning to a single peer (spec §4.1).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chat_protocol::Principal;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::metrics::METRICS_ID_SEND_DROPPED;

/// A long-lived peer channel.
///
/// The sole sink for bytes returning to one peer, plus the place where
/// closure is observed exactly once. Ordering: bytes accepted by
/// [`Connection::safe_send`] are delivered to the transport in the order
/// accepted. Back-pressure policy is drop-newest: once the bounded outbound
/// queue is full, further sends are rejected rather than blocking router
/// dispatch.
///
/// The outbound sender lives behind a shared slot rather than being cloned
/// per `Connection` clone, so [`Connection::close`] can drop the single
/// remaining sender and have every clone observe it: the transport's
/// `Receiver::recv` then resolves to `None` and the read/write loop exits.
#[derive(Clone)]
pub struct Connection {
    principal: Principal,
    tx: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
    closing: Arc<AtomicBool>,
}

impl Connection {
    /// Creates a new connection bound to `principal`, returning it paired
    /// with the receiving half the transport adapter drains into the
    /// socket.
    pub fn new(principal: Principal, queue_depth: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(queue_depth.max(1));
        (
            Self {
                principal,
                tx: Arc::new(Mutex::new(Some(tx))),
                closing: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// The principal that owns this connection.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Non-blocking. Returns `true` iff `bytes` were enqueued.
    ///
    /// Returns `false` if the connection is closing or the outbound queue is
    /// full; never panics. A full queue is drop-newest: the bytes passed
    /// here are discarded, already-queued bytes are left untouched.
    pub fn safe_send(&self, bytes: Vec<u8>) -> bool {
        if self.closing.load(Ordering::Acquire) {
            return false;
        }
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        match tx.try_send(bytes) {
            Ok(()) => true,
            Err(_) => {
                metrics::counter!(METRICS_ID_SEND_DROPPED).increment(1);
                false
            }
        }
    }

    /// Idempotent. Transitions the connection to terminal state: after this
    /// call, every subsequent `safe_send` returns `false`. Unlike
    /// [`Connection::close`], the outbound queue is left intact so
    /// already-enqueued bytes can still drain to the transport.
    pub fn set_closing(&self) {
        self.closing.store(true, Ordering::Release);
    }

    /// `true` iff [`Connection::set_closing`] or [`Connection::close`] has
    /// been called.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Idempotent. Drains best-effort and releases the transport: marks the
    /// connection closing, then drops the outbound sender so the transport
    /// task's `recv()` sees the channel close and its read/write loop exits.
    /// Already-enqueued bytes are still delivered; subsequent calls succeed
    /// with no effect.
    pub fn close(&self) {
        self.closing.store(true, Ordering::Release);
        self.tx.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> Principal {
        Principal::new("u1", [], None)
    }

    #[test]
    fn safe_send_enqueues_while_open() {
        let (conn, mut rx) = Connection::new(principal(), 4);
        assert!(conn.safe_send(b"hi".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), b"hi".to_vec());
    }

    #[test]
    fn safe_send_rejects_after_closing() {
        let (conn, _rx) = Connection::new(principal(), 4);
        conn.set_closing();
        assert!(!conn.safe_send(b"hi".to_vec()));
    }

    #[test]
    fn set_closing_is_idempotent() {
        let (conn, _rx) = Connection::new(principal(), 4);
        conn.set_closing();
        conn.set_closing();
        assert!(conn.is_closing());
    }

    #[test]
    fn safe_send_drops_newest_when_queue_full() {
        let (conn, _rx) = Connection::new(principal(), 1);
        assert!(conn.safe_send(b"first".to_vec()));
        assert!(!conn.safe_send(b"second".to_vec()));
    }

    #[tokio::test]
    async fn close_drops_the_sender_so_recv_resolves_to_none() {
        let (conn, mut rx) = Connection::new(principal(), 4);
        conn.safe_send(b"queued".to_vec());
        conn.close();
        assert!(!conn.safe_send(b"after close".to_vec()));
        assert_eq!(rx.recv().await, Some(b"queued".to_vec()));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, _rx) = Connection::new(principal(), 4);
        conn.close();
        conn.close();
        assert!(conn.is_closing());
    }
}
