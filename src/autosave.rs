//! Event-driven autosave state machine: turns a live capture stream into
//! successive minute-aligned WAV files, across device/rate restarts.
//!
//! Grounded on `backstage.c`'s `writeAutosaveFile`,
//! `makeMinuteTransitionRecording`, `updateForMillisecondOffset`, and
//! `addAutosaveEvent`. The append/new-file predicate preserves the literal
//! "checks the *previous* duration, not the current one" behaviour flagged
//! as a possible bug in SPEC_FULL.md §9.

use crate::event_queue::{AutosaveEvent, AutosaveEventKind, EventQueue};
use crate::ring::AudioRing;
use crate::time::{calendar_from_millis, local_time_offset_seconds};
use crate::wav;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Active,
}

struct FileCursor {
    file_start_time_s: i64,
    file_start_ms_offset: i32,
    file_start_count: i64,
    file_start_index: i64,
    file_sample_rate: u32,
    target_count: i64,
    device_label: String,
}

pub struct AutosaveStateMachine {
    state: State,
    cursor: FileCursor,
    duration_minutes_per_file: u32,
    shutdown_completed: bool,

    previous_local_time_offset: i32,
    previous_file_destination: Option<PathBuf>,
    previous_stop_time_s: Option<i64>,
    previous_duration: u32,
    previous_filename: Option<PathBuf>,

    file_destination: Option<PathBuf>,
    local_time_enabled: bool,
}

const NO_TARGET: i64 = i64::MAX;

impl AutosaveStateMachine {
    pub fn new() -> Self {
        AutosaveStateMachine {
            state: State::Waiting,
            cursor: FileCursor {
                file_start_time_s: 0,
                file_start_ms_offset: -1,
                file_start_count: 0,
                file_start_index: 0,
                file_sample_rate: 0,
                target_count: NO_TARGET,
                device_label: String::new(),
            },
            duration_minutes_per_file: 0,
            shutdown_completed: false,
            previous_local_time_offset: i32::MIN,
            previous_file_destination: None,
            previous_stop_time_s: None,
            previous_duration: 0,
            previous_filename: None,
            file_destination: None,
            local_time_enabled: false,
        }
    }

    pub fn set_duration_minutes(&mut self, minutes: u32) {
        self.duration_minutes_per_file = minutes;
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration_minutes_per_file
    }

    pub fn set_file_destination(&mut self, path: Option<PathBuf>) {
        self.file_destination = path;
    }

    pub fn set_local_time_enabled(&mut self, enabled: bool) {
        self.local_time_enabled = enabled;
    }

    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    pub fn shutdown_completed(&self) -> bool {
        self.shutdown_completed
    }

    pub fn clear_shutdown_completed(&mut self) {
        self.shutdown_completed = false;
    }

    /// Drains all currently-queued events, applying transitions in FIFO
    /// order, then flushes a minute boundary if one has already been
    /// crossed. Returns `false` once if any WAV write failed (for the
    /// caller to forward to the `autosave_error` callback).
    pub fn pump(&mut self, queue: &EventQueue, current_count: i64, audio_ring: &AudioRing) -> bool {
        if self.duration_minutes_per_file == 0 {
            // Autosave disabled: drain the queue without acting so it
            // doesn't grow unbounded, but never write.
            while queue.get_first_event().is_some() {}
            return true;
        }

        let mut ok = true;
        while let Some(event) = queue.get_first_event() {
            if self.state == State::Active
                && current_count >= self.cursor.target_count
                && self.cursor.target_count < event.current_count
            {
                ok &= self.flush_minute(audio_ring);
            }
            ok &= self.apply_event(&event, audio_ring);
        }

        if self.state == State::Active && current_count >= self.cursor.target_count {
            ok &= self.flush_minute(audio_ring);
        }

        ok
    }

    fn apply_event(&mut self, event: &AutosaveEvent, audio_ring: &AudioRing) -> bool {
        match (self.state, event.kind) {
            (State::Waiting, AutosaveEventKind::Start) => {
                self.start_epoch(event);
                self.state = State::Active;
                true
            }
            (State::Active, AutosaveEventKind::Restart) => {
                let partial_len = event.epoch_start_count - self.cursor.file_start_count;
                let ok = self.write_partial(partial_len, audio_ring);
                self.start_epoch(event);
                self.state = State::Active;
                ok
            }
            (State::Active, AutosaveEventKind::Stop) => {
                let partial_len = event.current_count - self.cursor.file_start_count;
                let ok = self.write_partial(partial_len, audio_ring);
                self.cursor.target_count = NO_TARGET;
                self.state = State::Waiting;
                ok
            }
            (_, AutosaveEventKind::Shutdown) => {
                let ok = if self.state == State::Active {
                    let partial_len = event.current_count - self.cursor.file_start_count;
                    self.write_partial(partial_len, audio_ring)
                } else {
                    true
                };
                self.shutdown_completed = true;
                self.state = State::Waiting;
                ok
            }
            _ => true,
        }
    }

    fn start_epoch(&mut self, event: &AutosaveEvent) {
        self.cursor.file_sample_rate = event.sample_rate as u32;
        self.cursor.device_label = event.device_label.clone();

        let elapsed_ms = if event.sample_rate > 0 {
            ((event.current_count - event.epoch_start_count) * 1000) / event.sample_rate as i64
        } else {
            0
        };
        let total_ms = event.epoch_start_time_ms + elapsed_ms;
        let (start_s, ms_offset) = align_to_second_boundary(total_ms);
        self.cursor.file_start_time_s = start_s;
        self.cursor.file_start_ms_offset = ms_offset;
        self.cursor.file_start_count = event.current_count;
        self.cursor.file_start_index = event.current_index as i64;

        let cal = calendar_from_millis(start_s * 1000);
        let rate = self.cursor.file_sample_rate as i64;
        self.cursor.target_count = self.cursor.file_start_count + (60 - cal.second as i64) * rate;
    }

    /// Writes the samples from `file_start_index` through `length` without
    /// advancing the target_count (used for STOP/RESTART/SHUTDOWN partial
    /// closes).
    fn write_partial(&mut self, length: i64, audio_ring: &AudioRing) -> bool {
        if length <= 0 {
            return true;
        }
        self.write_file(length as u32, audio_ring)
    }

    fn flush_minute(&mut self, audio_ring: &AudioRing) -> bool {
        let rate = self.cursor.file_sample_rate.max(1) as i64;
        let duration_samples = self.cursor.target_count - self.cursor.file_start_count;
        let ok = self.write_file(duration_samples as u32, audio_ring);

        let duration_s = duration_samples / rate;
        self.cursor.file_start_time_s += duration_s;
        self.cursor.file_start_index =
            (self.cursor.file_start_index + duration_samples) % (audio_ring.len() as i64);
        self.cursor.file_start_count = self.cursor.target_count;
        self.cursor.target_count += 60 * rate;
        ok
    }

    /// Core write: decides append vs. new file, builds the comment/filename,
    /// and writes via `wav.rs`, then publishes the `previous_*` helpers.
    fn write_file(&mut self, number_of_samples: u32, audio_ring: &AudioRing) -> bool {
        let Some(destination) = self.file_destination.clone() else {
            return false;
        };

        let local_time_offset = if self.local_time_enabled {
            local_time_offset_seconds(self.cursor.file_start_time_s * 1000)
        } else {
            0
        };

        let should_append = self.should_append(&destination, local_time_offset);

        let samples = audio_ring.copy_out(self.cursor.file_start_index, number_of_samples as usize);

        let result = if should_append {
            if let Some(filename) = &self.previous_filename_path() {
                wav::append_file(filename, &samples, &[])
            } else {
                Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no previous file"))
            }
        } else {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "force new file"))
        };

        let wrote_ok = match result {
            Ok(()) => true,
            Err(_) => {
                let cal = calendar_from_millis(self.cursor.file_start_time_s * 1000);
                let filename = wav::build_filename(&destination, &cal, self.cursor.file_start_ms_offset);
                let comment = wav::format_comment(
                    &cal,
                    self.cursor.file_start_ms_offset,
                    local_time_offset,
                    &self.cursor.device_label,
                );
                match wav::write_file(&filename, self.cursor.file_sample_rate, &samples, &[], &comment) {
                    Ok(()) => {
                        tracing::info!(
                            target: "backstage::autosave",
                            filename = %filename.display(),
                            samples = number_of_samples,
                            "autosave file rotated"
                        );
                        self.previous_filename = Some(filename);
                        true
                    }
                    Err(err) => {
                        tracing::warn!(target: "backstage::autosave", %err, "autosave write failed");
                        false
                    }
                }
            }
        };

        self.previous_local_time_offset = local_time_offset;
        self.previous_file_destination = Some(destination);
        self.previous_stop_time_s = Some(
            self.cursor.file_start_time_s + (number_of_samples as i64) / self.cursor.file_sample_rate.max(1) as i64,
        );
        self.previous_duration = self.duration_minutes_per_file;

        wrote_ok
    }

    /// The literal "possible bug": checks against `previous_duration`, a
    /// value captured at the *previous* write, not the live
    /// `duration_minutes_per_file`. See SPEC_FULL.md §9.
    fn should_append(&self, destination: &PathBuf, local_time_offset: i32) -> bool {
        if self.previous_duration == 0 {
            return false;
        }
        let offset_matches = local_time_offset == self.previous_local_time_offset;
        let destination_matches = self.previous_file_destination.as_ref() == Some(destination);
        let stop_time_matches = self.previous_stop_time_s == Some(self.cursor.file_start_time_s);

        let cal = calendar_from_millis(self.cursor.file_start_time_s * 1000);
        let boundary_inside_window =
            cal.second == 0 && (cal.minute % self.previous_duration) > 0;

        offset_matches && destination_matches && stop_time_matches && boundary_inside_window
    }

    fn previous_filename_path(&self) -> Option<PathBuf> {
        self.previous_filename.clone()
    }
}

/// Splits a UTC millisecond instant into a whole-second boundary and the
/// remaining intra-second milliseconds, used both to pick the file's
/// nominal start second and to decide whether the filename needs a `_mmm`
/// suffix.
fn align_to_second_boundary(total_ms: i64) -> (i64, i32) {
    let start_s = total_ms.div_euclid(1000);
    let ms_offset = total_ms.rem_euclid(1000) as i32;
    (start_s, ms_offset)
}

impl Default for AutosaveStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::EventQueue;

    fn start_event(rate: i32, count: i64, index: i32, epoch_ms: i64) -> AutosaveEvent {
        let mut e = AutosaveEvent::new(AutosaveEventKind::Start);
        e.sample_rate = rate;
        e.current_count = count;
        e.current_index = index;
        e.epoch_start_count = 0;
        e.epoch_start_time_ms = epoch_ms;
        e.device_label = "AudioMoth 48 kHz".into();
        e
    }

    #[test]
    fn waiting_start_sets_target_to_next_minute_boundary() {
        let mut sm = AutosaveStateMachine::new();
        sm.set_duration_minutes(1);
        sm.set_file_destination(Some(PathBuf::from("/tmp/does-not-exist-autosave-test")));
        let queue = EventQueue::new();
        // Wall clock 10:00:45.000 UTC -> 15s to next boundary.
        let epoch_ms = 1_000 * ((10 * 3600) + 45);
        queue.add_event(start_event(48_000, 0, 0, epoch_ms));
        let ring = AudioRing::new();

        sm.pump(&queue, 0, &ring);
        assert!(sm.is_active());
        assert_eq!(sm.cursor.target_count, 15 * 48_000);
    }

    #[test]
    fn stop_returns_to_waiting_and_clears_target() {
        let mut sm = AutosaveStateMachine::new();
        sm.set_duration_minutes(1);
        sm.set_file_destination(Some(PathBuf::from("/tmp/does-not-exist-autosave-test-2")));
        let queue = EventQueue::new();
        let epoch_ms = 0;
        queue.add_event(start_event(48_000, 0, 0, epoch_ms));
        let ring = AudioRing::new();
        sm.pump(&queue, 0, &ring);
        assert!(sm.is_active());

        let mut stop = AutosaveEvent::new(AutosaveEventKind::Stop);
        stop.current_count = 1000;
        queue.add_event(stop);
        sm.pump(&queue, 1000, &ring);
        assert!(!sm.is_active());
        assert_eq!(sm.cursor.target_count, NO_TARGET);
    }

    #[test]
    fn should_append_uses_previous_duration_not_live_duration() {
        let mut sm = AutosaveStateMachine::new();
        sm.previous_duration = 5; // stale value from a previous write
        sm.set_duration_minutes(1); // duration just changed live
        sm.previous_local_time_offset = 0;
        sm.previous_file_destination = Some(PathBuf::from("/tmp/x"));
        sm.cursor.file_start_time_s = 600; // minute 10, second 0
        sm.previous_stop_time_s = Some(600);

        // minute(10) % previous_duration(5) == 0 -> NOT inside window -> no append
        assert!(!sm.should_append(&PathBuf::from("/tmp/x"), 0));

        sm.cursor.file_start_time_s = 660; // minute 11
        sm.previous_stop_time_s = Some(660);
        // minute(11) % previous_duration(5) == 1 -> inside window -> append
        assert!(sm.should_append(&PathBuf::from("/tmp/x"), 0));
    }

    #[test]
    fn shutdown_sets_completed_flag() {
        let mut sm = AutosaveStateMachine::new();
        sm.set_duration_minutes(1);
        sm.set_file_destination(Some(PathBuf::from("/tmp/does-not-exist-autosave-test-3")));
        let queue = EventQueue::new();
        queue.add_event(start_event(48_000, 0, 0, 0));
        let ring = AudioRing::new();
        sm.pump(&queue, 0, &ring);

        let mut shutdown = AutosaveEvent::new(AutosaveEventKind::Shutdown);
        shutdown.current_count = 500;
        queue.add_event(shutdown);
        sm.pump(&queue, 500, &ring);
        assert!(sm.shutdown_completed());
        assert!(!sm.is_active());
    }
}
