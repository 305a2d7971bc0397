use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use crate::Level;

#[derive(Clone, Debug)]
pub struct CapturedLog {
    pub ts_ms: u64,
    pub level: Level,
    pub target: &'static str,
    pub file: &'static str,
    pub line: u32,
    pub msg: String,
}

static ENABLED: AtomicBool = AtomicBool::new(false);
static CAPACITY: AtomicUsize = AtomicUsize::new(0);
static BUFFER: OnceLock<Mutex<VecDeque<CapturedLog>>> = OnceLock::new();

/// Keeps the most recent `capacity` records in memory. Zero turns capture off.
pub fn enable_capture(capacity: usize) {
    if capacity == 0 {
        disable_capture();
        return;
    }
    CAPACITY.store(capacity, Ordering::Relaxed);
    BUFFER.get_or_init(|| Mutex::new(VecDeque::with_capacity(capacity.min(4096))));
    ENABLED.store(true, Ordering::Relaxed);
}

pub fn disable_capture() {
    ENABLED.store(false, Ordering::Relaxed);
}

pub fn clear_captured_logs() {
    if let Some(Ok(mut guard)) = BUFFER.get().map(Mutex::lock) {
        guard.clear();
    }
}

/// The last `limit` captured records, oldest first.
pub fn capture_snapshot(limit: usize) -> Vec<CapturedLog> {
    let Some(Ok(guard)) = BUFFER.get().map(Mutex::lock) else {
        return Vec::new();
    };
    let start = guard.len().saturating_sub(limit);
    guard.iter().skip(start).cloned().collect()
}

pub(crate) fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

pub(crate) fn push(record: CapturedLog) {
    let capacity = CAPACITY.load(Ordering::Relaxed);
    if capacity == 0 {
        return;
    }
    let Some(Ok(mut guard)) = BUFFER.get().map(Mutex::lock) else {
        return;
    };
    guard.push_back(record);
    while guard.len() > capacity {
        guard.pop_front();
    }
}
