use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, unbounded};

use crate::sdk::Bandwidth;

/// Reconfiguration requests carried from caller threads into the streaming thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Cancel,
    SetFrequency(u32),
    SetBandwidth(Bandwidth),
    SetRate(u32),
}

/// Multi-producer queue drained by the streaming thread.
///
/// Producers never block. The consumer blocks in [`CommandQueue::dequeue`]
/// until something arrives. Delivery order across concurrent producers is not
/// part of the contract, only that every signal is handed out exactly once
/// unless [`CommandQueue::reset`] throws it away first.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    tx: Sender<Signal>,
    rx: Receiver<Signal>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    pub fn enqueue(&self, signal: Signal) {
        // self holds the receiver, so the channel cannot be disconnected here
        let _ = self.tx.send(signal);
    }

    pub fn dequeue(&self) -> Signal {
        // a disconnect is impossible while self owns the sender; treat it as teardown
        self.rx.recv().unwrap_or(Signal::Cancel)
    }

    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Signal> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Takes everything pending without blocking.
    pub fn drain(&self) -> impl Iterator<Item = Signal> + '_ {
        self.rx.try_iter()
    }

    /// Drops everything pending and returns how many signals were discarded.
    pub fn reset(&self) -> usize {
        self.drain().count()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_enqueue_dequeue_roundtrip() {
        let q = CommandQueue::new();
        q.enqueue(Signal::SetFrequency(433_920_000));
        assert_eq!(q.dequeue(), Signal::SetFrequency(433_920_000));
        assert!(q.is_empty());
    }

    #[test]
    fn test_reset_discards_pending() {
        let q = CommandQueue::new();
        q.enqueue(Signal::SetRate(2_400_000));
        q.enqueue(Signal::SetBandwidth(Bandwidth::Bw1536k));
        q.enqueue(Signal::Cancel);
        assert_eq!(q.reset(), 3);
        assert!(q.dequeue_timeout(Duration::from_millis(50)).is_none());
    }

    #[test]
    fn test_dequeue_blocks_until_enqueue() {
        let q = CommandQueue::new();
        let producer = q.clone();
        let h = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            producer.enqueue(Signal::Cancel);
        });
        assert_eq!(q.dequeue(), Signal::Cancel);
        h.join().unwrap();
    }

    #[test]
    fn test_concurrent_producers_deliver_exactly_once() {
        let q = CommandQueue::new();
        let handles: Vec<_> = (0..4u32)
            .map(|p| {
                let q = q.clone();
                thread::spawn(move || {
                    for i in 0..250u32 {
                        q.enqueue(Signal::SetFrequency(p * 1000 + i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = HashSet::new();
        for _ in 0..1000 {
            match q.dequeue() {
                Signal::SetFrequency(f) => assert!(seen.insert(f), "duplicate {}", f),
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(seen.len(), 1000);
        assert!(q.dequeue_timeout(Duration::from_millis(10)).is_none());
    }
}
