//! The `Backstage` engine: single process-lifetime struct owning every ring,
//! device, and background worker, plus the frame-tick reconciliation logic
//! and the full host-facing operation set.
//!
//! Grounded on `backstage.c::getFrame` (the largest function in the
//! original) for the frame-tick priority order, and on
//! `capture`/`setPause`/`clear` for the matching methods here.

use crate::autosave::AutosaveStateMachine;
use crate::background::BackgroundLoop;
use crate::device::{self, is_valid_rate, AudioDevice, CpalCaptureDevice, VALID_RATES_HZ};
use crate::error::{BackstageError, Result};
use crate::event_queue::{truncate_device_label, AutosaveEvent, AutosaveEventKind, EventQueue};
use crate::playback::{MonitorMode, PlaybackInterpolator};
use crate::resampler::CaptureResampler;
use crate::ring::{AudioRing, StftRing};
use crate::simulation::{SimulationDriver, SimulationLibrary};
use crate::stft::Stft;
use crate::time::{SystemTimeSource, TimeSource};
use crate::wav;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

const DEFAULT_MAX_RATE_LOW: u32 = 48_000;
const DEFAULT_MAX_RATE_HIGH: u32 = 384_000;
const CAPTURE_BUFFER_SECONDS: u32 = 60;

/// §4.5 priority-2: restart capture when the audio clock drifts from wall
/// clock by more than this many milliseconds.
const TIME_MISMATCH_LIMIT_MS: i64 = 2_000;
/// §4.5 priority-1: device-presence edge changes are only honoured once the
/// current producer has been running longer than this, so a device that
/// flaps during its own startup doesn't immediately trigger another restart.
const DEVICE_CHANGE_INTERVAL_MS: i64 = 1_000;

/// Notifications crossing from capture/playback/background threads to
/// whatever the host polls; see SPEC_FULL.md §9 "thread-safe callbacks".
#[derive(Debug, Clone)]
pub enum HostEvent {
    AutosaveError,
    CaptureDone(bool),
}

/// `get_frame`'s return value.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub redraw_required: bool,
    pub simulation_running: bool,
    pub old_audiomoth_found: bool,
    pub device_name: Option<String>,
    pub maximum_sample_rate: u32,
    pub current_sample_rate: u32,
    pub audio_time_ms: i64,
    pub audio_index: usize,
    pub audio_count: i64,
}

#[derive(Debug, Clone)]
pub struct CaptureSnapshot {
    pub write_index: usize,
    pub sample_count: i64,
    pub start_time_ms: i64,
    pub rate: u32,
    pub device_label: String,
}

struct AutosaveCallback(Option<Box<dyn Fn() + Send + Sync>>);

pub struct Backstage {
    audio_ring: Arc<AudioRing>,
    stft_ring: Arc<StftRing>,
    stft: Mutex<Stft>,
    resampler: Mutex<CaptureResampler>,
    playback: Arc<Mutex<PlaybackInterpolator>>,
    playback_device: Mutex<Option<Box<dyn AudioDevice>>>,

    event_queue: Arc<EventQueue>,
    autosave: Arc<Mutex<AutosaveStateMachine>>,
    autosave_callback: Mutex<AutosaveCallback>,

    background: Mutex<BackgroundLoop>,
    capture_device: Mutex<Option<Box<dyn AudioDevice>>>,
    simulation: Mutex<Option<SimulationDriver>>,
    simulation_library: Mutex<Option<SimulationLibrary>>,

    time: Arc<dyn TimeSource>,

    host_events_tx: crossbeam_channel::Sender<HostEvent>,
    host_events_rx: crossbeam_channel::Receiver<HostEvent>,

    current_rate: AtomicU32,
    requested_rate: AtomicU32,
    input_rate: AtomicU32,
    high_default_sample_rate: Arc<AtomicBool>,
    simulation_running: AtomicBool,
    redraw_required: AtomicBool,
    old_audiomoth_latched: AtomicBool,
    device_label: Mutex<Option<String>>,
    using_audiomoth: AtomicBool,
    time_device_started_ms: AtomicI64,

    paused: Mutex<Option<CaptureSnapshot>>,
    file_destination: Mutex<Option<PathBuf>>,
    epoch_start_count: AtomicI64,
    epoch_start_time_ms: AtomicI64,
}

impl Backstage {
    /// `initialise`: builds the rings and background worker, returns the
    /// handle used for the rest of the process lifetime. Uses `anyhow`
    /// rather than `BackstageError` because construction can fail for
    /// several unrelated reasons (device open, background thread spawn)
    /// that the caller only needs to report, not match on.
    pub fn initialise() -> anyhow::Result<Arc<Backstage>> {
        let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
        let now_ms = time.utc_milliseconds();

        let audio_ring = Arc::new(AudioRing::new());
        let stft_ring = Arc::new(StftRing::new());
        let (host_events_tx, host_events_rx) = crossbeam_channel::unbounded();

        let backstage = Arc::new(Backstage {
            audio_ring,
            stft_ring,
            stft: Mutex::new(Stft::new()),
            resampler: Mutex::new(CaptureResampler::new(DEFAULT_MAX_RATE_LOW, DEFAULT_MAX_RATE_LOW)),
            playback: Arc::new(Mutex::new(PlaybackInterpolator::new(DEFAULT_MAX_RATE_LOW))),
            playback_device: Mutex::new(None),
            event_queue: Arc::new(EventQueue::new()),
            autosave: Arc::new(Mutex::new(AutosaveStateMachine::new())),
            autosave_callback: Mutex::new(AutosaveCallback(None)),
            background: Mutex::new(BackgroundLoop::new()),
            capture_device: Mutex::new(None),
            simulation: Mutex::new(None),
            simulation_library: Mutex::new(None),
            time,
            host_events_tx,
            host_events_rx,
            current_rate: AtomicU32::new(DEFAULT_MAX_RATE_LOW),
            requested_rate: AtomicU32::new(DEFAULT_MAX_RATE_LOW),
            input_rate: AtomicU32::new(DEFAULT_MAX_RATE_LOW),
            high_default_sample_rate: Arc::new(AtomicBool::new(false)),
            simulation_running: AtomicBool::new(false),
            redraw_required: AtomicBool::new(true),
            old_audiomoth_latched: AtomicBool::new(false),
            device_label: Mutex::new(None),
            using_audiomoth: AtomicBool::new(false),
            time_device_started_ms: AtomicI64::new(now_ms),
            paused: Mutex::new(None),
            file_destination: Mutex::new(None),
            epoch_start_count: AtomicI64::new(0),
            epoch_start_time_ms: AtomicI64::new(now_ms),
        });

        backstage.spawn_background();
        backstage.start_playback_device();
        backstage.restart_capture(None);

        Ok(backstage)
    }

    /// Opens the fixed 48kHz playback device and starts it immediately;
    /// `PlaybackInterpolator` itself stays silent (`MonitorMode::Off`) until
    /// `set_monitor` is called, matching the original always-open-but-muted
    /// output stream.
    fn start_playback_device(self: &Arc<Self>) {
        let playback = Arc::clone(&self.playback);
        let ring = Arc::clone(&self.audio_ring);
        let opened = crate::device::CpalPlaybackDevice::open(move |out: &mut [i16]| {
            playback.lock().unwrap().process(&ring, out);
        });

        match opened {
            Ok(mut device) => {
                if let Err(err) = device.start() {
                    tracing::warn!(target: "backstage::supervisor", %err, "failed to start playback device");
                    return;
                }
                *self.playback_device.lock().unwrap() = Some(Box::new(device));
            }
            Err(err) => {
                tracing::warn!(target: "backstage::supervisor", %err, "failed to open playback device");
            }
        }
    }

    pub fn audio_ring(&self) -> Arc<AudioRing> {
        Arc::clone(&self.audio_ring)
    }

    pub fn stft_ring(&self) -> Arc<StftRing> {
        Arc::clone(&self.stft_ring)
    }

    fn spawn_background(self: &Arc<Self>) {
        let queue = Arc::clone(&self.event_queue);
        let autosave = Arc::clone(&self.autosave);
        let ring = Arc::clone(&self.audio_ring);
        let high_default = Arc::clone(&self.high_default_sample_rate);
        let weak = Arc::downgrade(self);
        let weak_for_error = weak.clone();

        self.background.lock().unwrap().start(
            device::enumerate_input_device_names,
            queue,
            autosave,
            ring,
            move || {
                weak.upgrade()
                    .map(|b| b.audio_ring.cursor().sample_count)
                    .unwrap_or(0)
            },
            high_default,
            move || {
                if let Some(b) = weak_for_error.upgrade() {
                    let _ = b.host_events_tx.send(HostEvent::AutosaveError);
                    let cb = b.autosave_callback.lock().unwrap();
                    if let Some(f) = &cb.0 {
                        f();
                    }
                }
            },
        );
    }

    /// Drains notifications raised off capture/playback/background threads
    /// since the last poll. Intended to be called alongside `get_frame`.
    pub fn poll_events(&self) -> Vec<HostEvent> {
        self.host_events_rx.try_iter().collect()
    }

    /// `change_sample_rate`: rate must be one of `VALID_RATES_HZ`, else
    /// silently ignored.
    pub fn change_sample_rate(self: &Arc<Self>, rate: u32) {
        if !is_valid_rate(rate) {
            return;
        }
        if self.requested_rate.swap(rate, Ordering::SeqCst) != rate {
            self.restart_capture(None);
        }
    }

    /// Stops whatever producer is running (device or simulation), resets the
    /// ring/resampler/playback state, and starts the requested producer.
    /// Grounded on the Supervisor's stop/reset/start transition shape
    /// (SPEC_FULL.md §4.5). `current_rate` (= `min(requested, device native
    /// rate)`) is only known once the producer has actually opened, so the
    /// RESTART autosave event is built from the post-start state, matching
    /// `backstage.c`'s own `addAutosaveEvent(AS_RESTART)` call placed after
    /// the start handshake completes.
    fn restart_capture(self: &Arc<Self>, simulation_index: Option<usize>) {
        {
            let mut device = self.capture_device.lock().unwrap();
            if let Some(d) = device.as_mut() {
                d.stop();
            }
            *device = None;
        }
        {
            let mut sim = self.simulation.lock().unwrap();
            if let Some(s) = sim.as_mut() {
                s.stop();
            }
            *sim = None;
        }

        let now_ms = self.time.utc_milliseconds();
        self.audio_ring.reset_epoch(now_ms);
        self.epoch_start_count.store(0, Ordering::SeqCst);
        self.epoch_start_time_ms.store(now_ms, Ordering::SeqCst);

        let requested_rate = self.requested_rate.load(Ordering::SeqCst);

        let preferred_device = if simulation_index.is_none() {
            let observation = self.background.lock().unwrap().observation();
            observation
                .current_audiomoth_present
                .then_some(observation.current_audiomoth_name)
                .flatten()
        } else {
            None
        };

        let label = if let Some(index) = simulation_index {
            self.start_simulation_producer(index, requested_rate)
        } else {
            self.start_device_producer(requested_rate, preferred_device)
        };

        let current_rate = self.current_rate.load(Ordering::SeqCst);

        if self.autosave.lock().unwrap().is_active() {
            let cursor = self.audio_ring.cursor();
            let mut event = AutosaveEvent::new(AutosaveEventKind::Restart);
            event.sample_rate = current_rate as i32;
            event.current_index = cursor.write_index as i32;
            event.current_count = cursor.sample_count;
            event.epoch_start_time_ms = now_ms;
            event.epoch_start_count = 0;
            event.device_label = truncate_device_label(&self.device_label.lock().unwrap().clone().unwrap_or_default());
            self.event_queue.add_event(event);
        }

        tracing::info!(target: "backstage::supervisor", device = label.as_deref().unwrap_or("<none>"), current_rate, "capture device swapped");
        *self.device_label.lock().unwrap() = label;
    }

    /// Opens `preferred_device` (the AudioMoth the background pump last saw,
    /// if any) or the host default input device otherwise, and stores
    /// `current_rate = min(requested_rate, device native rate)` per the
    /// glossary's *Current rate* definition.
    fn start_device_producer(self: &Arc<Self>, requested_rate: u32, preferred_device: Option<String>) -> Option<String> {
        let is_audiomoth = preferred_device.is_some();
        let weak = Arc::downgrade(self);
        let opened = CpalCaptureDevice::open(preferred_device.as_deref(), move |data: &[i16]| {
            if let Some(b) = weak.upgrade() {
                b.ingest(data);
            }
        });

        match opened {
            Ok(mut d) => {
                let input_rate = d.native_sample_rate();
                let current_rate = requested_rate.min(input_rate);
                let label = d.device_label();
                self.input_rate.store(input_rate, Ordering::SeqCst);
                self.current_rate.store(current_rate, Ordering::SeqCst);
                *self.resampler.lock().unwrap() = CaptureResampler::new(input_rate, current_rate);
                if let Err(err) = d.start() {
                    tracing::warn!(target: "backstage::supervisor", %err, "failed to start capture device");
                    return None;
                }
                *self.capture_device.lock().unwrap() = Some(Box::new(d));
                self.simulation_running.store(false, Ordering::SeqCst);
                self.using_audiomoth.store(is_audiomoth, Ordering::SeqCst);
                self.time_device_started_ms.store(self.time.utc_milliseconds(), Ordering::SeqCst);
                Some(label)
            }
            Err(err) => {
                tracing::warn!(target: "backstage::supervisor", %err, "failed to open capture device");
                self.current_rate.store(requested_rate, Ordering::SeqCst);
                None
            }
        }
    }

    fn start_simulation_producer(self: &Arc<Self>, index: usize, requested_rate: u32) -> Option<String> {
        let lib = self.simulation_library.lock().unwrap();
        let Some(lib) = lib.as_ref() else {
            self.current_rate.store(requested_rate, Ordering::SeqCst);
            return None;
        };
        let Ok(mut driver) = SimulationDriver::load(lib, index) else {
            self.current_rate.store(requested_rate, Ordering::SeqCst);
            return None;
        };
        let input_rate = driver.native_sample_rate();
        let current_rate = requested_rate.min(input_rate);
        let label = driver.device_label();
        self.input_rate.store(input_rate, Ordering::SeqCst);
        self.current_rate.store(current_rate, Ordering::SeqCst);
        *self.resampler.lock().unwrap() = CaptureResampler::new(input_rate, current_rate);

        let weak = Arc::downgrade(self);
        let playback = Arc::clone(&self.playback);
        driver.start(input_rate, playback, move |data: &[i16]| {
            if let Some(b) = weak.upgrade() {
                b.ingest(data);
            }
        });
        *self.simulation.lock().unwrap() = Some(driver);
        self.simulation_running.store(true, Ordering::SeqCst);
        self.using_audiomoth.store(false, Ordering::SeqCst);
        Some(label)
    }

    /// Routes one captured block through the resampler into both rings.
    /// Shared by the real device callback and the simulation driver.
    fn ingest(&self, data: &[i16]) {
        let mut resampler = self.resampler.lock().unwrap();
        let mut stft = self.stft.lock().unwrap();
        resampler.process(data, &self.audio_ring, &self.stft_ring, &mut stft);
    }

    /// `get_frame`: called once per UI frame. Runs the §4.5 priority-ordered
    /// transition check (device presence, then time mismatch) against the
    /// live, unpaused ring state before reporting a snapshot — a front-end
    /// pause only changes what is *reported*, not whether the capture
    /// producer self-heals, matching `backstage.c::getFrame`'s use of
    /// `unpausedAudioTime`/`unpausedAudioCount` for these checks regardless
    /// of `frontEndPaused`.
    pub fn get_frame(self: &Arc<Self>) -> FrameSnapshot {
        let now_ms = self.time.utc_milliseconds();
        let simulation_running = self.simulation_running.load(Ordering::SeqCst);

        if !simulation_running {
            let cursor = self.audio_ring.cursor();
            let rate = self.current_rate.load(Ordering::SeqCst).max(1) as i64;
            let unpaused_audio_time = cursor.start_time_ms + (cursor.sample_count * 1000) / rate;
            let time_mismatch = (now_ms - unpaused_audio_time).abs() > TIME_MISMATCH_LIMIT_MS;

            let observation = self.background.lock().unwrap().observation();
            let elapsed_since_device_start = now_ms - self.time_device_started_ms.load(Ordering::SeqCst);
            let device_changed = elapsed_since_device_start > DEVICE_CHANGE_INTERVAL_MS
                && observation.current_audiomoth_present != self.using_audiomoth.load(Ordering::SeqCst);

            if device_changed {
                tracing::info!(target: "backstage::supervisor", "device presence changed, restarting capture");
                self.restart_capture(None);
            } else if time_mismatch {
                tracing::warn!(target: "backstage::supervisor", now_ms, unpaused_audio_time, "restarting due to time mismatch");
                self.restart_capture(None);
            }
        }

        if let Some(snapshot) = self.paused.lock().unwrap().as_ref() {
            return FrameSnapshot {
                redraw_required: false,
                simulation_running: self.simulation_running.load(Ordering::Relaxed),
                old_audiomoth_found: self.old_audiomoth_latched.load(Ordering::Relaxed),
                device_name: self.device_label.lock().unwrap().clone(),
                maximum_sample_rate: self.max_default_rate(),
                current_sample_rate: snapshot.rate,
                audio_time_ms: snapshot.start_time_ms,
                audio_index: snapshot.write_index,
                audio_count: snapshot.sample_count,
            };
        }

        let observation = self.background.lock().unwrap().observation();
        if observation.old_audiomoth_found {
            self.old_audiomoth_latched.store(true, Ordering::Relaxed);
        }

        let cursor = self.audio_ring.cursor();
        FrameSnapshot {
            redraw_required: self.redraw_required.swap(false, Ordering::SeqCst),
            simulation_running: self.simulation_running.load(Ordering::Relaxed),
            old_audiomoth_found: self.old_audiomoth_latched.load(Ordering::Relaxed),
            device_name: observation.device_name.or_else(|| self.device_label.lock().unwrap().clone()),
            maximum_sample_rate: observation.maximum_sample_rate,
            current_sample_rate: self.current_rate.load(Ordering::SeqCst),
            audio_time_ms: cursor.start_time_ms,
            audio_index: cursor.write_index,
            audio_count: cursor.sample_count,
        }
    }

    fn max_default_rate(&self) -> u32 {
        if self.high_default_sample_rate.load(Ordering::Relaxed) {
            DEFAULT_MAX_RATE_HIGH
        } else {
            DEFAULT_MAX_RATE_LOW
        }
    }

    /// `clear`: zeroes `sample_count`, advances `start_time` to now, forces
    /// a redraw.
    pub fn clear(&self) {
        let now_ms = self.time.utc_milliseconds();
        self.audio_ring.clear_keep_index(now_ms);
        self.redraw_required.store(true, Ordering::SeqCst);
    }

    fn snapshot_tail(&self, seconds: u32) -> CaptureSnapshot {
        let seconds = seconds.clamp(0, CAPTURE_BUFFER_SECONDS);
        let cursor = self.audio_ring.cursor();
        let rate = self.current_rate.load(Ordering::SeqCst);
        let n = (seconds as i64) * (rate as i64);
        CaptureSnapshot {
            write_index: cursor.write_index,
            sample_count: n.min(cursor.sample_count),
            start_time_ms: cursor.start_time_ms,
            rate,
            device_label: self.device_label.lock().unwrap().clone().unwrap_or_default(),
        }
    }

    /// `capture(duration_s, callback)`: clamps duration to `[0, 60]`,
    /// snapshots the ring, and writes the clip off-thread.
    pub fn capture<F>(self: &Arc<Self>, duration_s: u32, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let duration_s = duration_s.clamp(0, CAPTURE_BUFFER_SECONDS);
        let snapshot = self.snapshot_tail(duration_s);
        let destination = self.file_destination.lock().unwrap().clone();
        let time = Arc::clone(&self.time);
        let audio_ring = Arc::clone(&self.audio_ring);
        let events_tx = self.host_events_tx.clone();

        std::thread::spawn(move || {
            let success = (|| -> std::io::Result<()> {
                let destination = destination.ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no file destination set")
                })?;
                let start_index = snapshot.write_index as i64 - snapshot.sample_count;
                let samples = audio_ring.copy_out(start_index, snapshot.sample_count as usize);
                let cal = time.utc_calendar(snapshot.start_time_ms);
                let filename = wav::build_filename(&destination, &cal, -1);
                let comment = wav::format_comment(&cal, -1, 0, &snapshot.device_label);
                wav::write_file(&filename, snapshot.rate, &samples, &[], &comment)
            })()
            .is_ok();
            let _ = events_tx.send(HostEvent::CaptureDone(success));
            callback(success);
        });
    }

    /// `set_pause(enable, duration_s)`: returns the frozen snapshot iff
    /// pausing.
    pub fn set_pause(&self, enable: bool, duration_s: u32) -> Option<CaptureSnapshot> {
        let mut paused = self.paused.lock().unwrap();
        if enable {
            let snapshot = self.snapshot_tail(duration_s);
            *paused = Some(snapshot.clone());
            Some(snapshot)
        } else {
            *paused = None;
            self.redraw_required.store(true, Ordering::SeqCst);
            None
        }
    }

    pub fn set_file_destination(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        *self.file_destination.lock().unwrap() = Some(path.clone());
        self.autosave.lock().unwrap().set_file_destination(Some(path));
    }

    pub fn set_auto_save_callback<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.autosave_callback.lock().unwrap().0 = Some(Box::new(callback));
    }

    /// `set_auto_save(duration_minutes)`: 0 stops, >0 starts/updates. If
    /// newly starting (was previously 0), enqueues a START event so the
    /// state machine has an epoch to anchor to.
    pub fn set_auto_save(&self, duration_minutes: u32) {
        let mut sm = self.autosave.lock().unwrap();
        let was_running = sm.duration_minutes() > 0;
        sm.set_duration_minutes(duration_minutes);

        if duration_minutes > 0 && !was_running {
            let cursor = self.audio_ring.cursor();
            let mut event = AutosaveEvent::new(AutosaveEventKind::Start);
            event.sample_rate = self.current_rate.load(Ordering::SeqCst) as i32;
            event.current_index = cursor.write_index as i32;
            event.current_count = cursor.sample_count;
            event.epoch_start_time_ms = cursor.start_time_ms;
            event.epoch_start_count = 0;
            event.device_label = truncate_device_label(&self.device_label.lock().unwrap().clone().unwrap_or_default());
            self.event_queue.add_event(event);
        } else if duration_minutes == 0 && was_running {
            let cursor = self.audio_ring.cursor();
            let mut event = AutosaveEvent::new(AutosaveEventKind::Stop);
            event.current_count = cursor.sample_count;
            self.event_queue.add_event(event);
        }
    }

    /// `get_simulation_info(asset_path)`: lists descriptions of the `.WAV`
    /// assets under `asset_path`.
    pub fn get_simulation_info(&self, asset_path: impl AsRef<Path>) -> Result<Vec<String>> {
        let lib = SimulationLibrary::open(asset_path.as_ref())?;
        let descriptions = lib.descriptions();
        *self.simulation_library.lock().unwrap() = Some(lib);
        Ok(descriptions)
    }

    /// `set_simulation(enable, index)`: returns `true` on success.
    pub fn set_simulation(self: &Arc<Self>, enable: bool, index: Option<usize>) -> bool {
        if !enable {
            self.restart_capture(None);
            return true;
        }
        let Some(index) = index else { return false };
        if self.simulation_library.lock().unwrap().is_none() {
            return false;
        }
        self.restart_capture(Some(index));
        self.simulation_running.load(Ordering::SeqCst)
    }

    pub fn set_monitor(&self, mode: MonitorModeArg, frequency_hz: Option<f32>) {
        self.playback.lock().unwrap().set_monitor(mode.into(), frequency_hz);
    }

    pub fn set_high_default_sample_rate(&self, enable: bool) {
        self.high_default_sample_rate.store(enable, Ordering::SeqCst);
    }

    pub fn set_local_time(&self, enable: bool) {
        self.autosave.lock().unwrap().set_local_time_enabled(enable);
    }

    /// `force_auto_save_to_stop`: enqueues SHUTDOWN and blocks up to 2s for
    /// the state machine to report completion.
    pub fn force_auto_save_to_stop(&self) {
        self.autosave.lock().unwrap().clear_shutdown_completed();
        let cursor = self.audio_ring.cursor();
        let mut event = AutosaveEvent::new(AutosaveEventKind::Shutdown);
        event.current_count = cursor.sample_count;
        self.event_queue.add_event(event);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            if self.autosave.lock().unwrap().shutdown_completed() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        tracing::warn!(target: "backstage::supervisor", "force_auto_save_to_stop timed out");
    }

    pub fn valid_rates() -> &'static [u32] {
        &VALID_RATES_HZ
    }
}

/// Host-facing monitor mode selector (mirrors `MonitorMode` without
/// borrowing its Heterodyne-carrying variant shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorModeArg {
    Off,
    Playthrough,
    Heterodyne,
}

impl From<MonitorModeArg> for MonitorMode {
    fn from(value: MonitorModeArg) -> Self {
        match value {
            MonitorModeArg::Off => MonitorMode::Off,
            MonitorModeArg::Playthrough => MonitorMode::Playthrough,
            MonitorModeArg::Heterodyne => MonitorMode::Heterodyne,
        }
    }
}

impl Drop for Backstage {
    fn drop(&mut self) {
        self.background.lock().unwrap().stop();
        if let Some(d) = self.capture_device.lock().unwrap().as_mut() {
            d.stop();
        }
        if let Some(s) = self.simulation.lock().unwrap().as_mut() {
            s.stop();
        }
        if let Some(d) = self.playback_device.lock().unwrap().as_mut() {
            d.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_rates_list_matches_device_module() {
        assert_eq!(Backstage::valid_rates(), VALID_RATES_HZ);
    }

    #[test]
    fn set_auto_save_zero_after_zero_is_a_no_op() {
        let mut sm = AutosaveStateMachine::new();
        sm.set_duration_minutes(0);
        assert_eq!(sm.duration_minutes(), 0);
        sm.set_duration_minutes(0);
        assert_eq!(sm.duration_minutes(), 0);
    }
}
