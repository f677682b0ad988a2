//! The tagd engine.
//!
//! An [`Engine`] ties together the metadata [catalog](tagd_catalog), the tag
//! registry and the payload storage backends. It owns the upload pipeline
//! (payload, preview, record), the trash lifecycle including the periodic
//! [sweep](Sweeper), bounded [batches](run_batch) of per-item operations and
//! archive downloads.

mod archive;
mod batch;
mod engine;
pub mod error;
mod media;
mod sweep;

pub use crate::archive::ArchiveFormat;
pub use crate::batch::{Outcome, run_batch};
pub use crate::engine::{Engine, Parts, Upload};
pub use crate::media::detect_mime;
pub use crate::sweep::{SweepReport, Sweeper};
