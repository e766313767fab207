//! On-demand transcoding behind a disk cache.
//!
//! A [`TranscodeCoordinator`] turns `(source file, transform parameters)`
//! into bytes. Results are cached on disk under their [`CacheKey`];
//! concurrent requests for the same key share a single job; and all the
//! CPU-bound work happens on one background worker thread that is started
//! on demand and torn down again after an idle period.
//!
//! ```text
//! transcode(key) ──► cache file? ──yes──► bytes
//!                        │ no
//!                        ▼
//!                  job in flight? ──yes──► wait for it
//!                        │ no
//!                        ▼
//!                  ensure worker ──► submit job ──► wait
//! ```

mod coordinator;
pub mod error;
mod key;
pub mod raster;
mod worker;

pub use crate::coordinator::{CoordinatorStats, TranscodeCoordinator};
pub use crate::key::{CacheKey, TransformParameters};
pub use crate::raster::ImageTranscoder;
pub use crate::worker::{Job, Transcoder, WorkerStatus};
