//! Audio ingest pipeline: frame normalization, sliding-window segmentation,
//! and the bounded queue that feeds transcription workers.

pub mod normalizer;
pub mod queue;
pub mod segmenter;
pub mod session;

pub use queue::DispatchQueue;
pub use segmenter::AudioWindow;
pub use session::SessionPipeline;
