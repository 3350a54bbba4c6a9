//! Host timer queue behind `setTimeout` / `setInterval`.
//!
//! The queue is engine-agnostic: it stores an opaque callback payload per
//! timer and hands due timers back in due-time order, ties broken by
//! creation order. The engine loop drives it.

use std::time::{Duration, Instant};

/// Clamp a `setTimeout` delay into `[0, cap]`; NaN, infinities and negatives become 0.
pub fn clamp_timeout_delay(raw_ms: f64, cap: Duration) -> Duration {
    if !raw_ms.is_finite() || raw_ms <= 0.0 {
        return Duration::ZERO;
    }
    let cap_ms = cap.as_millis() as f64;
    Duration::from_millis(raw_ms.min(cap_ms) as u64)
}

/// Clamp a `setInterval` period into `[1, cap]`.
pub fn clamp_interval_delay(raw_ms: f64, cap: Duration) -> Duration {
    let floor = Duration::from_millis(1);
    let cap = cap.max(floor);
    if !raw_ms.is_finite() || raw_ms < 1.0 {
        return floor;
    }
    let cap_ms = cap.as_millis() as f64;
    Duration::from_millis(raw_ms.min(cap_ms) as u64)
}

#[derive(Debug)]
struct Entry<T> {
    id: u32,
    due: Instant,
    seq: u64,
    period: Option<Duration>,
    payload: T,
}

/// A timer taken off the queue for firing
#[derive(Debug)]
pub struct DueTimer<T> {
    pub id: u32,
    pub payload: T,
    period: Option<Duration>,
}

impl<T> DueTimer<T> {
    pub fn is_interval(&self) -> bool {
        self.period.is_some()
    }
}

#[derive(Debug)]
pub struct TimerQueue<T> {
    entries: Vec<Entry<T>>,
    next_id: u32,
    next_seq: u64,
    in_flight: Option<u32>,
    in_flight_cancelled: bool,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            next_seq: 0,
            in_flight: None,
            in_flight_cancelled: false,
        }
    }

    /// Schedule a one-shot timer; returns its positive id
    pub fn schedule_timeout(&mut self, payload: T, delay: Duration, now: Instant) -> u32 {
        self.insert(payload, now + delay, None)
    }

    /// Schedule a repeating timer; returns its positive id
    pub fn schedule_interval(&mut self, payload: T, period: Duration, now: Instant) -> u32 {
        self.insert(payload, now + period, Some(period))
    }

    /// Cancel a timer. Unknown ids are ignored. Cancelling the timer that is
    /// currently firing stops an interval from being re-armed.
    pub fn cancel(&mut self, id: u32) -> bool {
        if self.in_flight == Some(id) {
            self.in_flight_cancelled = true;
            return true;
        }
        match self.entries.iter().position(|e| e.id == id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Earliest due instant among pending timers
    pub fn next_due(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.due).min()
    }

    /// Remove and return the earliest timer due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<DueTimer<T>> {
        let index = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.due <= now)
            .min_by_key(|(_, e)| (e.due, e.seq))
            .map(|(i, _)| i)?;
        let entry = self.entries.remove(index);
        self.in_flight = Some(entry.id);
        self.in_flight_cancelled = false;
        Some(DueTimer {
            id: entry.id,
            payload: entry.payload,
            period: entry.period,
        })
    }

    /// Finish firing a timer: intervals are re-armed unless cancelled while running
    pub fn complete(&mut self, timer: DueTimer<T>, now: Instant) {
        let cancelled = self.in_flight == Some(timer.id) && self.in_flight_cancelled;
        self.in_flight = None;
        self.in_flight_cancelled = false;
        if let (Some(period), false) = (timer.period, cancelled) {
            let seq = self.bump_seq();
            self.entries.push(Entry {
                id: timer.id,
                due: now + period,
                seq,
                period: Some(period),
                payload: timer.payload,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every pending timer; returns how many were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.entries.len();
        self.entries.clear();
        self.in_flight = None;
        self.in_flight_cancelled = false;
        discarded
    }

    fn insert(&mut self, payload: T, due: Instant, period: Option<Duration>) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        let seq = self.bump_seq();
        self.entries.push(Entry {
            id,
            due,
            seq,
            period,
            payload,
        });
        id
    }

    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
