//! Processing pipeline: classify, deliver, record.

mod service;

pub use service::{NotificationPipeline, ProcessingResult, RetrySummary};
