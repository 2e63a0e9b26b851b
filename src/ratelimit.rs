//! Outbound send gate for one gateway connection.
//!
//! The gateway closes connections that send more than 120 frames per 60 seconds. The gate tracks a
//! rolling window of sends and keeps a slice of it reserved for heartbeats, so bulk traffic
//! (presence updates, member requests) can never starve the connection of its keep-alive.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Frames allowed per window by the gateway.
pub const GATEWAY_SEND_LIMIT: usize = 120;

/// Length of the rolling window.
pub const GATEWAY_SEND_WINDOW: Duration = Duration::from_secs(60);

/// Outcome of offering a frame to the gate.
#[derive(Debug, PartialEq, Eq)]
pub enum SendDecision<T> {
    /// Capacity was available, the frame must be written now.
    Immediate(T),
    /// The bucket is exhausted, the frame waits in the queue.
    Queued,
}

pub struct SendGate<T> {
    total: usize,
    window: Duration,
    heartbeat_room: usize,
    sent: VecDeque<Instant>,
    queue: VecDeque<T>,
}

impl<T> Default for SendGate<T> {
    fn default() -> Self {
        Self::new(GATEWAY_SEND_LIMIT, GATEWAY_SEND_WINDOW)
    }
}

impl<T> SendGate<T> {
    pub fn new(total: usize, window: Duration) -> Self {
        Self {
            total: total.max(2),
            window,
            heartbeat_room: 1,
            sent: VecDeque::new(),
            queue: VecDeque::new(),
        }
    }

    /// Reserves enough room for one heartbeat per interval within the window.
    pub fn set_heartbeat_interval(&mut self, interval: Duration) {
        let interval = interval.as_secs_f64().max(0.001);
        let per_window = (self.window.as_secs_f64() / interval).ceil() as usize;
        self.heartbeat_room = per_window.clamp(1, self.total / 2);
    }

    pub fn heartbeat_room(&self) -> usize {
        self.heartbeat_room
    }

    /// Capacity usable by non-priority frames.
    pub fn general_capacity(&self) -> usize {
        self.total - self.heartbeat_room
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Sends recorded within the current window.
    pub fn in_window(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.sent.len()
    }

    /// Offers a general frame. Frames are released strictly FIFO.
    pub fn try_send(&mut self, frame: T, now: Instant) -> SendDecision<T> {
        self.prune(now);
        if self.queue.is_empty() && self.sent.len() < self.general_capacity() {
            self.sent.push_back(now);
            return SendDecision::Immediate(frame);
        }

        self.queue.push_back(frame);
        SendDecision::Queued
    }

    /// Records a heartbeat, identify or resume frame. These bypass the queue.
    pub fn send_priority(&mut self, frame: T, now: Instant) -> T {
        self.prune(now);
        self.sent.push_back(now);
        frame
    }

    /// Releases as many queued frames as the window currently allows.
    pub fn drain(&mut self, now: Instant) -> Vec<T> {
        self.prune(now);
        let mut released = Vec::new();
        while self.sent.len() < self.general_capacity() {
            match self.queue.pop_front() {
                Some(frame) => {
                    self.sent.push_back(now);
                    released.push(frame);
                }
                None => break,
            }
        }
        released
    }

    /// When the oldest send leaves the window, if anything is waiting for it.
    pub fn next_release(&self) -> Option<Instant> {
        if self.queue.is_empty() {
            return None;
        }
        self.sent.front().map(|oldest| *oldest + self.window)
    }

    /// Forgets the window of a closed socket. Queued frames are kept for the next connection.
    pub fn reset_window(&mut self) {
        self.sent.clear();
    }

    /// Drops everything, used when the client is destroyed.
    pub fn clear(&mut self) {
        self.sent.clear();
        self.queue.clear();
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.sent.front() {
            if now.duration_since(*oldest) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}
