//! Panic reporting.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic::{PanicHookInfo, take_hook};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::{DateTime, Local, NaiveDate};

use crate::logging::LOG_FILE_PREFIX;

const PANIC_TARGET: &str = "notify_relay::panic";

/// Log panics through `tracing` and, when `log_dir` is set and the build
/// aborts on panic, append them straight to today's log file as well.
///
/// With `panic = "abort"` the non-blocking file writer never gets to
/// flush, so the direct append is what keeps the record.
pub fn install(log_dir: Option<&Path>) {
    let log_dir = log_dir.map(Path::to_path_buf);
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let report = PanicReport::capture(info);
            tracing::error!(
                target: PANIC_TARGET,
                thread = %report.thread,
                location = %report.location,
                backtrace = %report.backtrace,
                "Panicked: {}",
                report.message
            );

            if cfg!(panic = "abort")
                && let Some(dir) = &log_dir
            {
                let now = Local::now();
                let path = daily_log_path(dir, now.date_naive());
                let _ = append_record(&path, &report.log_entry(now));
            }
        }));

        previous_hook(info);
    }));
}

/// What is known about one panic.
#[derive(Debug)]
struct PanicReport {
    thread: String,
    location: String,
    message: String,
    backtrace: String,
}

impl PanicReport {
    fn capture(info: &PanicHookInfo<'_>) -> Self {
        Self {
            thread: thread::current().name().unwrap_or("<unnamed>").to_string(),
            location: info
                .location()
                .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
                .unwrap_or_else(|| "<unknown>".to_string()),
            message: payload_text(info.payload()).unwrap_or_else(|| info.to_string()),
            backtrace: Backtrace::force_capture().to_string(),
        }
    }

    /// Entry in the same shape as the file layer's lines, with the
    /// backtrace indented below it.
    fn log_entry(&self, at: DateTime<Local>) -> String {
        format!(
            "{} ERROR {PANIC_TARGET}: Panicked: {self}\n{}",
            at.format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            indent(&self.backtrace)
        )
    }
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} thread={} location={}",
            self.message, self.thread, self.location
        )
    }
}

fn payload_text(payload: &(dyn Any + Send)) -> Option<String> {
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
}

fn indent(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Path `tracing_appender::rolling::daily` uses for `date`.
fn daily_log_path(log_dir: &Path, date: NaiveDate) -> PathBuf {
    log_dir.join(format!("{LOG_FILE_PREFIX}.{}", date.format("%Y-%m-%d")))
}

fn append_record(path: &Path, record: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{record}")?;
    file.flush()
}
