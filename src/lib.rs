//! Applies Google Takeout sidecar metadata (dates, GPS, descriptions) to the
//! exported photos and videos.
//!
//! The walker finds media files, the resolver maps each one to its sidecar
//! JSON despite the renaming and truncation the export applies, and a pool
//! of workers merges the sidecar layers, writes the result onto the file and
//! deletes the consumed sidecar.

pub mod applier;
pub mod config;
pub mod error;
pub mod media;
pub mod metadata;
pub mod processor;
pub mod resolver;
pub mod state;
pub mod walker;

pub use applier::{ApplyOutcome, ExternalToolApplier, MetadataApplier};
pub use config::AppConfig;
pub use error::{AppError, RunAborted};
pub use processor::Processor;
pub use state::Statistics;
