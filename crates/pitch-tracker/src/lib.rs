//! Streaming pitch (fundamental-frequency) tracker.
//!
//! Produces, per analysis frame, a voicing-correlation score and a pitch
//! estimate, decided jointly across frames by an incremental Viterbi
//! search over a log-spaced lag grid. Audio is accepted in arbitrary
//! chunks; frames are emitted as soon as the traceback has settled on
//! them, with a configurable latency cap.
//!
//! The raw two-column output (`[nccf, pitch_hz]`) is usually consumed
//! through the [`post_process`] module, which derives the
//! probability-of-voicing feature, mean-normalized log pitch, delta log
//! pitch, and raw log pitch.

pub mod config;
pub mod nccf;
pub mod post_process;
pub mod tracker;

mod lattice;

pub use config::{PitchConfig, PostProcessConfig};
pub use post_process::{post_process_pitch, OnlinePostProcessor};
pub use tracker::{compute_pitch, OnlinePitchTracker};
