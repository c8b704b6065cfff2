//! Stabilization runners.
//!
//! This crate provides:
//! - Offline batch stabilization with a bounded estimator → optimizer queue
//! - Realtime streaming stabilization under a per-frame deadline
//! - Frame sources for image sequences and in-memory frames
//! - Configuration loading, logging setup and JSON reports

pub mod batch;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
pub mod session;
pub mod source;
pub mod stream;

pub use batch::BatchStabilizer;
pub use config::{load_stabilization_config, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use logging::{init_tracing, SessionLogger};
pub use output::{StabilizationReport, StabilizedFrame};
pub use session::stabilize;
pub use source::{FrameSource, ImageSequenceSource, MemoryFrameSource};
pub use stream::{StreamSummary, StreamingStabilizer};
