//! Simulation driver: replays a preloaded WAV asset into the capture path
//! at the same cadence a real device would, standing in for hardware during
//! development or headless testing.
//!
//! Grounded on `backstage.c::simulationThreadBody` and `simulator.c`. The
//! original paces itself against a monotonic clock and a shared lag reading;
//! here that becomes a dedicated `std::thread` reading
//! `PlaybackInterpolator::minimum_playback_buffer_lag`/
//! `take_playback_buffer_count` through an `Arc`, the same cross-thread
//! publication pattern already used for real playback.

use crate::error::{BackstageError, Result};
use crate::playback::{PlaybackInterpolator, LAG_TARGET_MIN};
use crate::wav;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

const LAG_MAX: f64 = 20.0;
const TICKS_PER_SECOND: f64 = 100.0;

/// One playable asset: native sample rate plus its full (looped) sample
/// data, loaded once up front.
struct SimulationAsset {
    description: String,
    sample_rate: u32,
    samples: Vec<i16>,
}

/// Lists and loads the `.WAV` assets beneath a simulation bundle directory.
pub struct SimulationLibrary {
    directory: PathBuf,
    files: Vec<PathBuf>,
}

impl SimulationLibrary {
    pub fn open(asset_path: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(asset_path)
            .map_err(|e| BackstageError::SimulationLoad(e.to_string()))?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("wav"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        Ok(SimulationLibrary {
            directory: asset_path.to_path_buf(),
            files,
        })
    }

    /// `get_simulation_info`: one description per asset (its filename stem).
    pub fn descriptions(&self) -> Vec<String> {
        self.files
            .iter()
            .map(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("unknown")
                    .to_string()
            })
            .collect()
    }

    fn load(&self, index: usize) -> Result<SimulationAsset> {
        let path = self
            .files
            .get(index)
            .ok_or_else(|| BackstageError::SimulationLoad(format!("no simulation asset at index {index}")))?;
        let (sample_rate, samples) = wav::read_file(path)
            .map_err(|e| BackstageError::SimulationLoad(e.to_string()))?;
        if samples.is_empty() {
            return Err(BackstageError::SimulationLoad(format!(
                "simulation asset {} is empty",
                path.display()
            )));
        }
        Ok(SimulationAsset {
            description: path.file_stem().and_then(|s| s.to_str()).unwrap_or("unknown").to_string(),
            sample_rate,
            samples,
        })
    }

    pub fn asset_path(&self) -> &Path {
        &self.directory
    }
}

/// Drives one loaded asset through a capture callback, pacing itself to
/// imitate real hardware and running a burst of ticks back-to-back whenever
/// playback signals starvation.
pub struct SimulationDriver {
    asset: SimulationAsset,
    position: usize,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SimulationDriver {
    pub fn load(library: &SimulationLibrary, index: usize) -> Result<Self> {
        let asset = library.load(index)?;
        Ok(SimulationDriver {
            asset,
            position: 0,
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    pub fn device_label(&self) -> String {
        format!("Simulation: {}", self.asset.description)
    }

    pub fn native_sample_rate(&self) -> u32 {
        self.asset.sample_rate
    }

    /// Pulls the next `count` samples from the looped buffer, advancing the
    /// read position (and wrapping).
    fn next_chunk(&mut self, count: usize) -> Vec<i16> {
        let n = self.asset.samples.len();
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.asset.samples[self.position]);
            self.position = (self.position + 1) % n;
        }
        out
    }

    /// Spawns the pacing thread. `on_data` is called with each tick's chunk
    /// from the simulation thread, same as a real capture callback would be.
    pub fn start<F>(&mut self, input_rate: u32, playback: Arc<Mutex<PlaybackInterpolator>>, mut on_data: F)
    where
        F: FnMut(&[i16]) + Send + 'static,
    {
        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);
        let samples_per_tick = (input_rate as usize / 100).max(1);
        let mut position = self.position;
        let data = self.asset.samples.clone();
        let n = data.len().max(1);

        let handle = std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let burst = playback.lock().unwrap().take_playback_buffer_count().max(0);
                let ticks = 1 + burst;

                for _ in 0..ticks {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let mut chunk = Vec::with_capacity(samples_per_tick);
                    for _ in 0..samples_per_tick {
                        chunk.push(data[position % n]);
                        position += 1;
                    }
                    on_data(&chunk);
                }

                if burst == 0 {
                    let lag = playback.lock().unwrap().minimum_playback_buffer_lag();
                    let interval_us = if lag < LAG_MAX {
                        1_000_000.0 / (TICKS_PER_SECOND + LAG_TARGET_MIN - lag)
                    } else {
                        1_000_000.0 / TICKS_PER_SECOND
                    };
                    std::thread::sleep(Duration::from_micros(interval_us.max(0.0) as u64));
                }
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

impl Drop for SimulationDriver {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::AudioRing;
    use std::sync::Mutex as StdMutex;

    fn write_test_wav(dir: &Path, name: &str, rate: u32, samples: &[i16]) -> PathBuf {
        let path = dir.join(name);
        wav::write_file(&path, rate, samples, &[], "test").unwrap();
        path
    }

    #[test]
    fn library_lists_wav_files_sorted() {
        let dir = std::env::temp_dir().join(format!("backstage-sim-test-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        write_test_wav(&dir, "b.WAV", 48_000, &[1, 2, 3]);
        write_test_wav(&dir, "a.WAV", 48_000, &[4, 5, 6]);

        let lib = SimulationLibrary::open(&dir).unwrap();
        let descriptions = lib.descriptions();
        assert_eq!(descriptions, vec!["a", "b"]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn driver_loops_samples_past_the_end() {
        let dir = std::env::temp_dir().join(format!("backstage-sim-test2-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        write_test_wav(&dir, "tone.WAV", 48_000, &[1, 2, 3]);
        let lib = SimulationLibrary::open(&dir).unwrap();
        let mut driver = SimulationDriver::load(&lib, 0).unwrap();

        let chunk = driver.next_chunk(7);
        assert_eq!(chunk, vec![1, 2, 3, 1, 2, 3, 1]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn start_and_stop_delivers_samples_and_terminates() {
        let dir = std::env::temp_dir().join(format!("backstage-sim-test3-{}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);
        write_test_wav(&dir, "tone.WAV", 48_000, &(0..4800).map(|i| i as i16).collect::<Vec<_>>());
        let lib = SimulationLibrary::open(&dir).unwrap();
        let mut driver = SimulationDriver::load(&lib, 0).unwrap();

        let ring = Arc::new(AudioRing::new());
        let received = Arc::new(StdMutex::new(0usize));
        let received_clone = Arc::clone(&received);
        let ring_clone = Arc::clone(&ring);
        let playback = Arc::new(Mutex::new(PlaybackInterpolator::new(48_000)));

        driver.start(48_000, playback, move |chunk| {
            ring_clone.write(chunk);
            *received_clone.lock().unwrap() += chunk.len();
        });

        std::thread::sleep(Duration::from_millis(50));
        driver.stop();

        assert!(*received.lock().unwrap() > 0);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
