//! Bounded single-producer/single-consumer autosave event queue with
//! doubling growth on overflow.
//!
//! Ported from `examples/original_source/backstage/src/autosave.c`
//! (`Autosave_initialise/hasEvents/getFirstEvent/addEvent`): the original
//! keeps a fixed-capacity array with read/write indices and doubles its
//! backing storage (re-laying-out the unread entries) when it fills up. A
//! `VecDeque` gives the same FIFO/wrap semantics with the growth handled by
//! the standard library, guarded by a `Mutex` in the same style as the
//! teacher's `Arc<Mutex<SharedAudioState>>`.

use std::collections::VecDeque;
use std::sync::Mutex;

pub const DEVICE_NAME_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveEventKind {
    Start,
    Restart,
    Stop,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct AutosaveEvent {
    pub kind: AutosaveEventKind,
    pub sample_rate: i32,
    pub current_index: i32,
    pub current_count: i64,
    pub epoch_start_time_ms: i64,
    pub epoch_start_count: i64,
    pub device_label: String,
}

impl AutosaveEvent {
    pub fn new(kind: AutosaveEventKind) -> Self {
        AutosaveEvent {
            kind,
            sample_rate: 0,
            current_index: 0,
            current_count: 0,
            epoch_start_time_ms: 0,
            epoch_start_count: 0,
            device_label: String::new(),
        }
    }
}

/// Maximum number of entries before a device_label is silently truncated,
/// matching the fixed `DEVICE_NAME_SIZE` buffer in the original.
pub fn truncate_device_label(label: &str) -> String {
    if label.len() > DEVICE_NAME_SIZE {
        label[..DEVICE_NAME_SIZE].to_string()
    } else {
        label.to_string()
    }
}

/// An initial capacity; the queue doubles past this rather than ever
/// rejecting an event outright (mirrors `Autosave_addEvent`'s doubling
/// fallback). A hard ceiling guards against unbounded growth if the
/// consumer genuinely stalls forever.
const INITIAL_CAPACITY: usize = 16;
const MAX_CAPACITY: usize = 1 << 20;

pub struct EventQueue {
    inner: Mutex<VecDeque<AutosaveEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            inner: Mutex::new(VecDeque::with_capacity(INITIAL_CAPACITY)),
        }
    }

    pub fn has_events(&self) -> bool {
        !self.inner.lock().unwrap().is_empty()
    }

    pub fn get_first_event(&self) -> Option<AutosaveEvent> {
        self.inner.lock().unwrap().pop_front()
    }

    /// Returns `false` (event dropped) only once the queue has grown past
    /// `MAX_CAPACITY`, matching the spec's "on failure to double, add_event
    /// returns false and the caller drops the event".
    pub fn add_event(&self, event: AutosaveEvent) -> bool {
        let mut q = self.inner.lock().unwrap();
        if q.len() >= MAX_CAPACITY {
            return false;
        }
        q.push_back(event);
        true
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_ordering_preserved() {
        let q = EventQueue::new();
        assert!(q.add_event(AutosaveEvent::new(AutosaveEventKind::Start)));
        assert!(q.add_event(AutosaveEvent::new(AutosaveEventKind::Stop)));
        let first = q.get_first_event().unwrap();
        assert_eq!(first.kind, AutosaveEventKind::Start);
        let second = q.get_first_event().unwrap();
        assert_eq!(second.kind, AutosaveEventKind::Stop);
        assert!(q.get_first_event().is_none());
    }

    #[test]
    fn grows_past_initial_capacity_without_losing_events() {
        let q = EventQueue::new();
        for _ in 0..(INITIAL_CAPACITY * 4) {
            assert!(q.add_event(AutosaveEvent::new(AutosaveEventKind::Restart)));
        }
        assert_eq!(q.len(), INITIAL_CAPACITY * 4);
        let mut drained = 0;
        while q.get_first_event().is_some() {
            drained += 1;
        }
        assert_eq!(drained, INITIAL_CAPACITY * 4);
    }

    #[test]
    fn device_label_truncated_at_fixed_size() {
        let long = "x".repeat(DEVICE_NAME_SIZE + 50);
        let truncated = truncate_device_label(&long);
        assert_eq!(truncated.len(), DEVICE_NAME_SIZE);
    }

    #[test]
    fn has_events_reflects_queue_state() {
        let q = EventQueue::new();
        assert!(!q.has_events());
        q.add_event(AutosaveEvent::new(AutosaveEventKind::Shutdown));
        assert!(q.has_events());
    }
}
