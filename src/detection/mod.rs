pub mod pipeline;

pub use pipeline::{CycleOutcome, DetectionPipeline, FrameReport, PipelineStats};
