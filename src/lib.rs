//! Screen capture driving ambient lighting.
//!
//! `glow-capture` mirrors the desktop onto an LED light grid: one capture
//! worker per attached output copies desktop-duplication frames into a
//! shared GPU surface, and a sampler downsamples that surface into a small
//! grid of `0x00RRGGBB` light values laid out in serpentine row order.
//!
//! The entry point is [`LightEngine`]:
//!
//! ```no_run
//! use glow_capture::{LightEngine, OutputSelector};
//!
//! # fn main() -> Result<(), glow_capture::CaptureError> {
//! let mut engine = LightEngine::new();
//! engine.start(OutputSelector::All, 30, 16)?;
//! while engine.tick() {
//!     let values = engine.light_values();
//!     // push `values` to the LED strip, then pace the loop
//! #   let _ = values;
//! #   break;
//! }
//! engine.stop();
//! # Ok(())
//! # }
//! ```
//!
//! `tick` never returns an error: expected system transitions (display
//! mode changes, session lock, driver resets) are absorbed by rebuilding
//! the pipeline under banded back-off, and the last sampled grid stays
//! readable throughout. Only unrecoverable errors stop the engine.

pub mod backoff;
pub mod engine;
pub mod error;
pub mod grid;

pub mod geometry;
mod platform;
pub(crate) mod signals;

pub use backoff::{BackoffBand, BackoffTimer};
pub use engine::{EngineState, LightEngine, OutputSelector};
pub use error::{CaptureError, CaptureResult, ErrorClass};
pub use grid::LightGrid;
