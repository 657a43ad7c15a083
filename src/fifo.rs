//! Per-SM TX/RX FIFOs: a 4-deep (or 8-deep when joined) queue of 32-bit
//! words per direction, with the four sticky debug latches from FDEBUG.
//!
//! Fixed-capacity, no-allocation queues via `heapless`, the way a HAL's
//! own ring buffers would be sized against real silicon.

use crate::config::{FIFO_DEPTH, FIFO_DEPTH_JOINED};
use heapless::Deque;

/// Whether this SM's TX/RX FIFO pair has been merged by `SHIFTCTRL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Join {
    #[default]
    None,
    /// `fjoin_tx`: RX is disabled, TX gets the combined depth.
    Tx,
    /// `fjoin_rx`: TX is disabled, RX gets the combined depth.
    Rx,
}

#[derive(Debug, Clone, Default)]
struct Fifo {
    queue: Deque<u32, FIFO_DEPTH_JOINED>,
    depth: usize,
}

impl Fifo {
    fn new() -> Self {
        Self {
            queue: Deque::new(),
            depth: FIFO_DEPTH,
        }
    }

    fn push(&mut self, word: u32) -> bool {
        if self.queue.len() >= self.depth {
            return false;
        }
        self.queue.push_back(word).is_ok()
    }

    fn pop(&mut self) -> Option<u32> {
        self.queue.pop_front()
    }

    fn level(&self) -> usize {
        self.queue.len()
    }

    fn is_full(&self) -> bool {
        self.queue.len() >= self.depth
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

/// The TX/RX FIFO pair belonging to one state machine, plus its FDEBUG
/// latches (`0 <= level <= depth` always holds; the latches are
/// write-1-to-clear).
#[derive(Debug, Clone, Default)]
pub struct FifoPair {
    tx: Fifo,
    rx: Fifo,
    join: Join,
    tx_stall: bool,
    tx_over: bool,
    rx_under: bool,
    rx_stall: bool,
}

impl FifoPair {
    pub fn new() -> Self {
        Self {
            tx: Fifo::new(),
            rx: Fifo::new(),
            join: Join::None,
            tx_stall: false,
            tx_over: false,
            rx_under: false,
            rx_stall: false,
        }
    }

    /// Reconfigure the join mode. Resets both queues, matching the
    /// datasheet's note that changing SHIFTCTRL's join bits should be
    /// followed by a FIFO clear.
    pub fn set_join(&mut self, join: Join) {
        self.join = join;
        self.tx.clear();
        self.rx.clear();
        self.tx.depth = if join == Join::Tx {
            FIFO_DEPTH_JOINED
        } else {
            FIFO_DEPTH
        };
        self.rx.depth = if join == Join::Rx {
            FIFO_DEPTH_JOINED
        } else {
            FIFO_DEPTH
        };
    }

    pub fn join(&self) -> Join {
        self.join
    }

    fn tx_active(&self) -> bool {
        self.join != Join::Rx
    }

    fn rx_active(&self) -> bool {
        self.join != Join::Tx
    }

    /// A host (MMR write to TXFx) or the bridge pushes a word for the SM to
    /// consume.
    pub fn host_push_tx(&mut self, word: u32) -> bool {
        self.tx_active() && self.tx.push(word)
    }

    /// The SM (auto-pull or blocking PULL) consumes the next TX word.
    pub fn sm_pop_tx(&mut self) -> Option<u32> {
        if self.tx_active() { self.tx.pop() } else { None }
    }

    /// The SM (auto-push or PUSH) deposits a word for the host to read.
    pub fn sm_push_rx(&mut self, word: u32) -> bool {
        self.rx_active() && self.rx.push(word)
    }

    /// A host (MMR read of RXFx) or the bridge consumes the next RX word.
    pub fn host_pop_rx(&mut self) -> Option<u32> {
        if self.rx_active() { self.rx.pop() } else { None }
    }

    pub fn tx_level(&self) -> usize {
        if self.tx_active() { self.tx.level() } else { 0 }
    }

    pub fn rx_level(&self) -> usize {
        if self.rx_active() { self.rx.level() } else { 0 }
    }

    pub fn tx_is_full(&self) -> bool {
        !self.tx_active() || self.tx.is_full()
    }

    pub fn tx_is_empty(&self) -> bool {
        !self.tx_active() || self.tx.is_empty()
    }

    pub fn rx_is_full(&self) -> bool {
        !self.rx_active() || self.rx.is_full()
    }

    pub fn rx_is_empty(&self) -> bool {
        !self.rx_active() || self.rx.is_empty()
    }

    pub fn clear_fifos(&mut self) {
        self.tx.clear();
        self.rx.clear();
    }

    // --- FDEBUG latches ---

    pub fn tx_stall(&self) -> bool {
        self.tx_stall
    }
    pub fn tx_over(&self) -> bool {
        self.tx_over
    }
    pub fn rx_under(&self) -> bool {
        self.rx_under
    }
    pub fn rx_stall(&self) -> bool {
        self.rx_stall
    }

    pub fn set_tx_stall(&mut self) {
        self.tx_stall = true;
    }
    pub fn set_tx_over(&mut self) {
        self.tx_over = true;
    }
    pub fn set_rx_under(&mut self) {
        self.rx_under = true;
    }
    pub fn set_rx_stall(&mut self) {
        self.rx_stall = true;
    }

    /// FDEBUG is write-one-to-clear: a 1 bit in `mask` clears that latch.
    pub fn clear_debug(&mut self, tx_stall: bool, tx_over: bool, rx_under: bool, rx_stall: bool) {
        if tx_stall {
            self.tx_stall = false;
        }
        if tx_over {
            self.tx_over = false;
        }
        if rx_under {
            self.rx_under = false;
        }
        if rx_stall {
            self.rx_stall = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_four_by_default() {
        let mut pair = FifoPair::new();
        for i in 0..4 {
            assert!(pair.host_push_tx(i));
        }
        assert!(pair.tx_is_full());
        assert!(!pair.host_push_tx(99));
    }

    #[test]
    fn join_doubles_active_depth_and_disables_companion() {
        let mut pair = FifoPair::new();
        pair.set_join(Join::Tx);
        for i in 0..8 {
            assert!(pair.host_push_tx(i));
        }
        assert!(pair.tx_is_full());
        assert!(!pair.sm_push_rx(1));
        assert!(pair.rx_is_empty());
    }

    #[test]
    fn fdebug_idempotent_clear() {
        let mut pair = FifoPair::new();
        pair.set_tx_stall();
        pair.set_rx_under();
        pair.clear_debug(true, true, true, true);
        assert!(!pair.tx_stall());
        assert!(!pair.rx_under());
        pair.clear_debug(true, true, true, true);
        assert!(!pair.tx_stall());
    }

    #[test]
    fn level_bounds_hold() {
        let mut pair = FifoPair::new();
        assert_eq!(pair.tx_level(), 0);
        assert!(pair.tx_is_empty());
        pair.host_push_tx(5);
        assert_eq!(pair.tx_level(), 1);
        assert_eq!(pair.sm_pop_tx(), Some(5));
        assert!(pair.tx_is_empty());
    }
}
