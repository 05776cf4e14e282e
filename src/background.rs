//! Background pump: 4 Hz loop doing device enumeration and autosave event
//! consumption, off the audio callback threads.
//!
//! Grounded on `backstage.c::backgroundThreadBody`.

use crate::autosave::AutosaveStateMachine;
use crate::device::{classify_device_name, parse_native_rate_hz, DeviceClass};
use crate::event_queue::EventQueue;
use crate::ring::AudioRing;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const PUMP_INTERVAL: Duration = Duration::from_millis(250);

/// Snapshot of the last device enumeration, read by the Supervisor's frame
/// tick to answer `get_frame`'s `old_audiomoth_found`/`device_name`/
/// `maximum_sample_rate` fields, and to drive the §4.5 priority-1 device
/// presence restart.
#[derive(Debug, Clone, Default)]
pub struct DeviceObservation {
    pub device_name: Option<String>,
    pub old_audiomoth_found: bool,
    pub maximum_sample_rate: u32,
    /// `true` iff a current-generation (" kHz "-tagged) AudioMoth is
    /// currently enumerated; edge changes in this flag (while not
    /// simulating) drive the Supervisor's device-presence restart.
    pub current_audiomoth_present: bool,
    /// The current-generation AudioMoth's device name, when present, so the
    /// Supervisor can open that exact device rather than the host default.
    pub current_audiomoth_name: Option<String>,
}

pub struct BackgroundLoop {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    observation: Arc<Mutex<DeviceObservation>>,
}

impl BackgroundLoop {
    pub fn new() -> Self {
        BackgroundLoop {
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            observation: Arc::new(Mutex::new(DeviceObservation::default())),
        }
    }

    pub fn observation(&self) -> DeviceObservation {
        self.observation.lock().unwrap().clone()
    }

    /// Starts the pump thread. `enumerate` lists current input device names
    /// (swapped for a fake in tests); `current_count` reports the live
    /// sample count the autosave state machine should compare its target
    /// against; `high_default_rate` toggles the 48kHz/384kHz ceiling used
    /// when no AudioMoth-branded device is present.
    pub fn start<E, C, OnError>(
        &mut self,
        enumerate: E,
        queue: Arc<EventQueue>,
        autosave: Arc<Mutex<AutosaveStateMachine>>,
        audio_ring: Arc<AudioRing>,
        current_count: C,
        high_default_rate: Arc<AtomicBool>,
        on_autosave_error: OnError,
    ) where
        E: Fn() -> Vec<String> + Send + 'static,
        C: Fn() -> i64 + Send + 'static,
        OnError: Fn() + Send + 'static,
    {
        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let observation = Arc::clone(&self.observation);

        let handle = std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let names = enumerate();
                let default_max = if high_default_rate.load(Ordering::Relaxed) {
                    384_000
                } else {
                    48_000
                };

                let mut found = DeviceObservation {
                    device_name: None,
                    old_audiomoth_found: false,
                    maximum_sample_rate: default_max,
                    current_audiomoth_present: false,
                    current_audiomoth_name: None,
                };
                for name in &names {
                    match classify_device_name(name) {
                        DeviceClass::CurrentAudioMoth => {
                            found.device_name = Some(name.clone());
                            found.current_audiomoth_present = true;
                            found.current_audiomoth_name = Some(name.clone());
                            if let Some(rate) = parse_native_rate_hz(name) {
                                found.maximum_sample_rate = rate;
                            }
                            break;
                        }
                        DeviceClass::OldAudioMoth => {
                            found.old_audiomoth_found = true;
                            if found.device_name.is_none() {
                                found.device_name = Some(name.clone());
                            }
                        }
                        DeviceClass::Other => {}
                    }
                }
                tracing::debug!(
                    target: "backstage::background",
                    device = found.device_name.as_deref().unwrap_or("<none>"),
                    old_audiomoth_found = found.old_audiomoth_found,
                    maximum_sample_rate = found.maximum_sample_rate,
                    "pump tick"
                );
                *observation.lock().unwrap() = found;

                {
                    let mut sm = autosave.lock().unwrap();
                    if !sm.pump(&queue, current_count(), &audio_ring) {
                        on_autosave_error();
                    }
                }

                std::thread::sleep(PUMP_INTERVAL);
            }
        });

        self.handle = Some(handle);
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Default for BackgroundLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue::{AutosaveEvent, AutosaveEventKind};
    use std::sync::atomic::AtomicI64;

    #[test]
    fn observes_current_audiomoth_and_native_rate() {
        let mut bg = BackgroundLoop::new();
        let queue = Arc::new(EventQueue::new());
        let autosave = Arc::new(Mutex::new(AutosaveStateMachine::new()));
        let ring = Arc::new(AudioRing::new());
        let count = Arc::new(AtomicI64::new(0));
        let count_clone = Arc::clone(&count);

        bg.start(
            || vec!["AudioMoth 384 kHz ".to_string()],
            queue,
            autosave,
            ring,
            move || count_clone.load(Ordering::Relaxed),
            Arc::new(AtomicBool::new(false)),
            || {},
        );

        std::thread::sleep(Duration::from_millis(50));
        bg.stop();

        let obs = bg.observation();
        assert_eq!(obs.device_name.as_deref(), Some("AudioMoth 384 kHz "));
        assert_eq!(obs.maximum_sample_rate, 384_000);
        assert!(!obs.old_audiomoth_found);
        assert!(obs.current_audiomoth_present);
        assert_eq!(obs.current_audiomoth_name.as_deref(), Some("AudioMoth 384 kHz "));
    }

    #[test]
    fn drains_autosave_events_while_running() {
        let mut bg = BackgroundLoop::new();
        let queue = Arc::new(EventQueue::new());
        let mut sm = AutosaveStateMachine::new();
        sm.set_duration_minutes(0); // disabled: pump should just drain
        let autosave = Arc::new(Mutex::new(sm));
        let ring = Arc::new(AudioRing::new());

        queue.add_event(AutosaveEvent::new(AutosaveEventKind::Start));

        bg.start(
            Vec::new,
            Arc::clone(&queue),
            autosave,
            ring,
            || 0,
            Arc::new(AtomicBool::new(false)),
            || {},
        );

        std::thread::sleep(Duration::from_millis(50));
        bg.stop();

        assert!(!queue.has_events());
    }
}
