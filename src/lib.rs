//! `backstage`: the real-time engine behind AudioMoth Live, separated from
//! its UI. Owns capture/resampling/STFT/autosave/playback and exposes the
//! host-facing operations a UI frame loop drives.
//!
//! Grounded on `rshigg-conch`'s workspace shape: a library crate holding the
//! engine, with `tracing` for diagnostics and `thiserror`/`anyhow` for error
//! currency, the same split that crate keeps between its core and its CLI
//! shell.

pub mod autosave;
pub mod background;
pub mod biquad;
pub mod device;
pub mod error;
pub mod event_queue;
pub mod heterodyne;
pub mod playback;
pub mod resampler;
pub mod ring;
pub mod simulation;
pub mod stft;
pub mod supervisor;
pub mod time;
pub mod wav;

pub use error::{BackstageError, Result};
pub use supervisor::{Backstage, CaptureSnapshot, FrameSnapshot, HostEvent, MonitorModeArg};

/// Installs a `tracing-subscriber` formatter reading its filter from
/// `RUST_LOG` (default `info`). Opt-in convenience for binaries/tests that
/// embed this engine and want console output; the engine itself never
/// forces a global subscriber on its consumers.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
