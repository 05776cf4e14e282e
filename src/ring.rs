//! The two shared ring buffers: raw audio (int16) and STFT magnitude
//! (float32). See SPEC_FULL.md §3. Generalized from `rshigg-conch`'s
//! `RingBuffer` (`src/audio.rs`), which holds the same write/read-with-wrap
//! shape over a growable `Vec<f32>`; here the size is fixed at
//! initialisation and the mutex only ever guards the cursor fields, never
//! the sample payload itself (payload is single-writer, lock-free-read).

use std::cell::UnsafeCell;
use std::sync::Mutex;

/// 2^25 samples, matching the spec's literal buffer size (128MB of i16).
pub const AUDIO_RING_SIZE: usize = 1 << 25;

/// One STFT bin per 2 raw samples.
pub const STFT_RING_SIZE: usize = AUDIO_RING_SIZE / 2;

/// Cursor fields guarded by `audio_buffer_mutex` in the spec. The sample
/// payload is a plain fixed-size `Vec` written by exactly one producer at a
/// time (enforced by the Supervisor's stop-then-start discipline) and read
/// without locking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioCursor {
    pub write_index: usize,
    pub sample_count: i64,
    pub start_time_ms: i64,
}

pub struct AudioRing {
    buffer: UnsafeCell<Box<[i16]>>,
    cursor: Mutex<AudioCursor>,
}

impl AudioRing {
    pub fn new() -> Self {
        AudioRing {
            buffer: UnsafeCell::new(vec![0i16; AUDIO_RING_SIZE].into_boxed_slice()),
            cursor: Mutex::new(AudioCursor::default()),
        }
    }

    pub fn len(&self) -> usize {
        AUDIO_RING_SIZE
    }

    pub fn cursor(&self) -> AudioCursor {
        *self.cursor.lock().unwrap()
    }

    /// Writes `samples` starting at the current write index, advancing the
    /// cursor and wrapping at the buffer boundary. The payload slice is
    /// written through a raw pointer cast so the mutex is held only for the
    /// cursor commit, matching the "wait-free except for the end-of-block
    /// commit" contract in SPEC_FULL.md §4.1.
    pub fn write(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }
        let mut cursor = self.cursor.lock().unwrap();
        let n = self.len();
        let start = cursor.write_index;
        // Safety: the Supervisor's stop/start handshake guarantees exactly
        // one producer writes at a time; readers only ever read indices
        // already committed via `write_index`/`sample_count`.
        let buf: &mut [i16] = unsafe { &mut *self.buffer.get() };
        let first_len = (n - start).min(samples.len());
        buf[start..start + first_len].copy_from_slice(&samples[..first_len]);
        if first_len < samples.len() {
            let rest = &samples[first_len..];
            buf[..rest.len()].copy_from_slice(rest);
        }
        cursor.write_index = (start + samples.len()) % n;
        cursor.sample_count += samples.len() as i64;
    }

    /// Copies `length` samples starting at `start_index`, wrapping at the
    /// buffer boundary. `start_index` may be negative (relative to the
    /// buffer length); per the "possible bug" decision recorded in
    /// SPEC_FULL.md §9, a negative index is normalised by adding `N` before
    /// indexing rather than subtracting an offset from a base pointer.
    pub fn copy_out(&self, start_index: i64, length: usize) -> Vec<i16> {
        let n = self.len() as i64;
        let mut start = start_index % n;
        if start < 0 {
            start += n;
        }
        let start = start as usize;
        // Safety: readers only observe indices already committed by `write`
        // (the writer always runs ahead of any cursor a reader snapshotted).
        let buf: &[i16] = unsafe { &*self.buffer.get() };
        let mut out = Vec::with_capacity(length);
        let first_len = (self.len() - start).min(length);
        out.extend_from_slice(&buf[start..start + first_len]);
        if first_len < length {
            let remaining = length - first_len;
            out.extend_from_slice(&buf[..remaining]);
        }
        out
    }

    /// Resets the cursor for a new capture epoch: `sample_count` to zero,
    /// `start_time_ms` to `now`, `write_index` rounded down to a multiple of
    /// 512 (so STFT block boundaries stay aligned across restarts).
    pub fn reset_epoch(&self, now_ms: i64) {
        let mut cursor = self.cursor.lock().unwrap();
        cursor.sample_count = 0;
        cursor.start_time_ms = now_ms;
        cursor.write_index -= cursor.write_index % 512;
    }

    pub fn clear_keep_index(&self, now_ms: i64) {
        let mut cursor = self.cursor.lock().unwrap();
        cursor.sample_count = 0;
        cursor.start_time_ms = now_ms;
    }

    /// Reads a single sample at `index` (wrapping, negative-safe).
    pub fn sample_at(&self, index: i64) -> i16 {
        let n = self.len() as i64;
        let mut i = index % n;
        if i < 0 {
            i += n;
        }
        let buf: &[i16] = unsafe { &*self.buffer.get() };
        buf[i as usize]
    }
}

impl Default for AudioRing {
    fn default() -> Self {
        Self::new()
    }
}

// Safety: all mutation of `buffer` goes through `write`, serialised by the
// Supervisor's stop-then-start discipline (exactly one producer at a time);
// `cursor` is a plain `Mutex`.
unsafe impl Sync for AudioRing {}

pub struct StftRing {
    buffer: Mutex<Box<[f32]>>,
}

impl StftRing {
    pub fn new() -> Self {
        StftRing {
            buffer: Mutex::new(vec![0f32; STFT_RING_SIZE].into_boxed_slice()),
        }
    }

    pub fn len(&self) -> usize {
        STFT_RING_SIZE
    }

    /// Stores 256 magnitudes at STFT offset `block_offset`.
    pub fn write_block(&self, block_offset: usize, bins: &[f32; 256]) {
        let mut buf = self.buffer.lock().unwrap();
        let n = buf.len();
        let start = block_offset % n;
        let first_len = (n - start).min(256);
        buf[start..start + first_len].copy_from_slice(&bins[..first_len]);
        if first_len < 256 {
            let rest = &bins[first_len..];
            buf[..rest.len()].copy_from_slice(rest);
        }
    }

    pub fn snapshot(&self) -> Vec<f32> {
        self.buffer.lock().unwrap().to_vec()
    }
}

impl Default for StftRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read_without_wrap() {
        let ring = AudioRing::new();
        ring.write(&[1, 2, 3, 4]);
        assert_eq!(ring.cursor().write_index, 4);
        assert_eq!(ring.cursor().sample_count, 4);
        assert_eq!(ring.copy_out(0, 4), vec![1, 2, 3, 4]);
    }

    #[test]
    fn write_wraps_at_buffer_boundary() {
        let ring = AudioRing::new();
        let n = ring.len();
        // Position the cursor 2 samples from the end.
        ring.write(&vec![0i16; n - 2]);
        ring.write(&[10, 20, 30, 40]);
        assert_eq!(ring.cursor().write_index, 2);
        let tail = ring.copy_out((n - 2) as i64, 4);
        assert_eq!(tail, vec![10, 20, 30, 40]);
    }

    #[test]
    fn copy_out_normalises_negative_start() {
        let ring = AudioRing::new();
        let n = ring.len();
        ring.write(&vec![0i16; n - 2]);
        ring.write(&[10, 20, 30, 40]);
        // -2 should mean "two samples before the wrap point", i.e. index n-2.
        let a = ring.copy_out(-2, 4);
        let b = ring.copy_out((n - 2) as i64, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn reset_epoch_rounds_write_index_down_to_512() {
        let ring = AudioRing::new();
        ring.write(&vec![0i16; 1000]);
        ring.reset_epoch(12345);
        let cursor = ring.cursor();
        assert_eq!(cursor.write_index % 512, 0);
        assert_eq!(cursor.sample_count, 0);
        assert_eq!(cursor.start_time_ms, 12345);
    }

    #[test]
    fn randomised_write_then_copy_out_matches_tail() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let ring = AudioRing::new();
        let mut history: Vec<i16> = Vec::new();

        for _ in 0..200 {
            let len = rng.gen_range(1..2000);
            let chunk: Vec<i16> = (0..len).map(|_| rng.gen_range(i16::MIN..=i16::MAX)).collect();
            ring.write(&chunk);
            history.extend_from_slice(&chunk);
        }

        let tail_len = 5000.min(history.len());
        let expected = &history[history.len() - tail_len..];
        let write_index = ring.cursor().write_index as i64;
        let actual = ring.copy_out(write_index - tail_len as i64, tail_len);
        assert_eq!(actual, expected);
    }

    #[test]
    fn stft_ring_write_block_wraps() {
        let ring = StftRing::new();
        let n = ring.len();
        let bins = [1.0f32; 256];
        ring.write_block(n - 10, &bins);
        let snap = ring.snapshot();
        assert_eq!(snap[n - 10], 1.0);
        assert_eq!(snap[0], 1.0);
    }
}
