//! Event ingestion: raw platform notifications in, pipeline tasks out.

mod extractor;
mod listener;

pub use extractor::{EXTRA_TEXT, EXTRA_TITLE, RawNotification, extract_notification};
pub use listener::NotificationListener;
