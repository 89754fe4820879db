//! Flow-control credit accounting.
//!
//! Both directions are tracked as signed 64-bit counters so that overflow
//! of the 31-bit wire domain is detected rather than wrapped, and so that
//! SETTINGS_INITIAL_WINDOW_SIZE reductions can push a window negative
//! without losing information.

use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::trace;

use super::{WindowSize, MAX_WINDOW_SIZE};
use crate::error::Error;

/// Outbound credit: how much the peer currently allows us to send.
///
/// `reserve` suspends until credit is available; `release` applies a
/// WINDOW_UPDATE; `adjust` applies a SETTINGS_INITIAL_WINDOW_SIZE delta.
#[derive(Debug)]
pub(crate) struct SendWindow {
    state: Mutex<SendState>,
    notify: Notify,
}

#[derive(Debug)]
struct SendState {
    window: i64,
    poisoned: bool,
}

impl SendWindow {
    pub fn new(initial: WindowSize) -> SendWindow {
        SendWindow {
            state: Mutex::new(SendState {
                window: initial as i64,
                poisoned: false,
            }),
            notify: Notify::new(),
        }
    }

    pub fn available(&self) -> i64 {
        self.state.lock().unwrap().window
    }

    /// Take up to `want` bytes of credit, suspending while none is
    /// available. Returns the granted amount, `None` if the connection was
    /// poisoned while waiting.
    pub async fn reserve(&self, want: usize) -> Option<usize> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                if state.poisoned {
                    return None;
                }
                if state.window > 0 {
                    let granted = (state.window as usize).min(want);
                    state.window -= granted as i64;
                    return Some(granted);
                }
            }
            notified.await;
        }
    }

    /// Give back credit taken by `reserve` but not used.
    pub fn refund(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut state = self.state.lock().unwrap();
        state.window += n as i64;
        drop(state);
        self.notify.notify_waiters();
    }

    /// Apply a WINDOW_UPDATE increment from the peer.
    pub fn release(&self, n: WindowSize) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let new = state.window + n as i64;
        if new > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl);
        }
        state.window = new;
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Apply a SETTINGS_INITIAL_WINDOW_SIZE delta; may drive the window
    /// negative, but never above the cap.
    pub fn adjust(&self, delta: i64) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        let new = state.window + delta;
        if new > MAX_WINDOW_SIZE as i64 {
            return Err(Error::FlowControl);
        }
        trace!(window = new, delta, "send window adjusted");
        state.window = new;
        drop(state);
        if delta > 0 {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    /// Wake every blocked sender; they observe the connection failure.
    pub fn poison(&self) {
        self.state.lock().unwrap().poisoned = true;
        self.notify.notify_waiters();
    }
}

/// Inbound accounting: how much we have allowed the peer to send, and how
/// much consumed credit is waiting to be advertised back as WINDOW_UPDATE.
#[derive(Debug)]
pub(crate) struct RecvWindow {
    state: Mutex<RecvState>,
}

#[derive(Debug)]
struct RecvState {
    /// Credit the peer still holds against us.
    window: i64,
    /// Window size we aim to keep the peer at.
    target: i64,
    /// Consumed bytes not yet advertised back.
    pending: i64,
}

impl RecvWindow {
    pub fn new(target: WindowSize) -> RecvWindow {
        RecvWindow {
            state: Mutex::new(RecvState {
                window: target as i64,
                target: target as i64,
                pending: 0,
            }),
        }
    }

    /// Charge received DATA (payload plus padding) against the window.
    pub fn recv_data(&self, n: usize) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.window -= n as i64;
        if state.window < 0 {
            return Err(Error::FlowControl);
        }
        Ok(())
    }

    /// Consumer has processed `n` bytes; queue them for a WINDOW_UPDATE.
    /// Returns true when the accumulated credit crossed the flush threshold
    /// (half the target window).
    pub fn release(&self, n: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        state.pending += n as i64;
        state.pending >= (state.target / 2).max(1)
    }

    /// Take the accumulated credit for emission as a WINDOW_UPDATE.
    /// Returns `None` when there is nothing to flush.
    pub fn take_update(&self) -> Option<WindowSize> {
        let mut state = self.state.lock().unwrap();
        if state.pending <= 0 {
            return None;
        }
        let increment = state.pending.min(MAX_WINDOW_SIZE as i64);
        state.pending -= increment;
        state.window += increment;
        Some(increment as WindowSize)
    }

    /// Extend the advertised window and the flush target together. Used at
    /// handshake when a WINDOW_UPDATE for the delta has already been
    /// written directly.
    pub fn grow(&self, n: WindowSize) {
        let mut state = self.state.lock().unwrap();
        state.window += n as i64;
        state.target += n as i64;
    }

    /// Apply a committed change to our local initial window size.
    pub fn set_target(&self, target: WindowSize) {
        let mut state = self.state.lock().unwrap();
        let delta = target as i64 - state.target;
        state.target = target as i64;
        state.window += delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn reserve_grants_up_to_window() {
        let window = SendWindow::new(10);
        assert_eq!(window.reserve(4).await, Some(4));
        assert_eq!(window.reserve(100).await, Some(6));
        assert_eq!(window.available(), 0);
    }

    #[tokio::test]
    async fn reserve_waits_for_release() {
        let window = Arc::new(SendWindow::new(0));
        let waiter = {
            let window = window.clone();
            tokio::spawn(async move { window.reserve(5).await })
        };
        tokio::task::yield_now().await;
        window.release(3).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn poison_wakes_blocked_senders() {
        let window = Arc::new(SendWindow::new(0));
        let waiter = {
            let window = window.clone();
            tokio::spawn(async move { window.reserve(5).await })
        };
        tokio::task::yield_now().await;
        window.poison();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[test]
    fn release_past_cap_is_flow_control_error() {
        let window = SendWindow::new(MAX_WINDOW_SIZE);
        assert!(matches!(window.release(1), Err(Error::FlowControl)));
    }

    #[test]
    fn adjust_can_go_negative_but_not_overflow() {
        let window = SendWindow::new(100);
        window.adjust(-200).unwrap();
        assert_eq!(window.available(), -100);
        window.adjust(150).unwrap();
        assert_eq!(window.available(), 50);
        assert!(matches!(
            window.adjust(MAX_WINDOW_SIZE as i64),
            Err(Error::FlowControl)
        ));
    }

    #[test]
    fn recv_window_underflow_detected() {
        let window = RecvWindow::new(10);
        window.recv_data(10).unwrap();
        assert!(matches!(window.recv_data(1), Err(Error::FlowControl)));
    }

    #[test]
    fn release_threshold_and_flush() {
        let window = RecvWindow::new(1000);
        assert!(!window.release(100));
        assert!(window.release(400));
        assert_eq!(window.take_update(), Some(500));
        assert_eq!(window.take_update(), None);
    }

    #[test]
    fn flushed_credit_restores_window() {
        let window = RecvWindow::new(100);
        window.recv_data(80).unwrap();
        window.release(80);
        assert_eq!(window.take_update(), Some(80));
        // Peer may now send the full window again.
        window.recv_data(100).unwrap();
    }
}
