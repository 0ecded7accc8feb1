//! Command handlers for the `notify-relay` binary.
//!
//! Handlers write their results to the given writer and log progress
//! through `tracing`, which goes to stderr.

use std::future::Future;
use std::io::Write;

use futures::StreamExt;
use notification_rules::RuleConfig;
use notify_relay::database::models::UndecidedReason;
use notify_relay::database::time::format_ms;
use notify_relay::ingest::RawNotification;
use notify_relay::services::ServiceContainer;
use notify_relay::store::RecordKind;
use notify_relay::{Error, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::cli::DeleteTarget;

/// Line counts for one `run` session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub interrupted: bool,
}

/// Feed newline-delimited raw notifications from `input` to the listener.
///
/// Returns at EOF once every accepted notification has been processed, or
/// as soon as `shutdown` resolves. In-flight work is left running in the
/// second case; the caller's shutdown cancels it.
pub async fn run<R, S>(container: &ServiceContainer, input: R, shutdown: S) -> Result<IngestSummary>
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = input.lines();
    let mut summary = IngestSummary::default();
    tokio::pin!(shutdown);

    info!("Reading notifications from stdin");

    loop {
        let line = tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted, stopping intake");
                summary.interrupted = true;
                return Ok(summary);
            }
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<RawNotification>(line) {
            Ok(raw) if container.listener.on_notification_posted(&raw) => summary.accepted += 1,
            Ok(_) => summary.rejected += 1,
            Err(e) => {
                warn!(error = %e, "Skipping unparseable input line");
                summary.rejected += 1;
            }
        }
    }

    info!(
        accepted = summary.accepted,
        in_flight = container.listener.in_flight(),
        "End of input, waiting for in-flight notifications"
    );
    container.listener.drain().await;
    Ok(summary)
}

pub async fn status<W: Write>(container: &ServiceContainer, out: &mut W) -> Result<()> {
    let stats = container.stats().await?;
    writeln!(out, "failed: {}", stats.failed)?;
    writeln!(out, "undecided: {}", stats.undecided)?;
    Ok(())
}

/// Print records as JSON lines, in store order.
pub async fn list<W: Write>(
    container: &ServiceContainer,
    kind: RecordKind,
    reason: Option<UndecidedReason>,
    out: &mut W,
) -> Result<()> {
    match (kind, reason) {
        (RecordKind::Failed, Some(_)) => {
            return Err(Error::validation("--reason only applies to undecided records"));
        }
        (RecordKind::Failed, None) => {
            for record in container.store.list_failed().await? {
                let mut value = serde_json::to_value(&record)?;
                value["created"] = format_ms(record.created_at).into();
                writeln!(out, "{}", value)?;
            }
        }
        (RecordKind::Undecided, reason) => {
            let records = match reason {
                Some(reason) => container.store.list_undecided_by_reason(reason).await?,
                None => container.store.list_undecided().await?,
            };
            for record in records {
                let mut value = serde_json::to_value(&record)?;
                value["created"] = format_ms(record.created_at).into();
                writeln!(out, "{}", value)?;
            }
        }
    }
    Ok(())
}

/// Retry one failed record, or all of them. Returns whether everything
/// attempted was delivered.
pub async fn retry<W: Write>(container: &ServiceContainer, id: Option<i64>, out: &mut W) -> Result<bool> {
    match id {
        Some(id) => {
            let delivered = container.pipeline.retry_failed_by_id(id).await?;
            if delivered {
                writeln!(out, "record {id}: delivered")?;
            } else {
                writeln!(out, "record {id}: still failing")?;
            }
            Ok(delivered)
        }
        None => {
            let summary = container.pipeline.retry_all_failed_summary().await?;
            writeln!(
                out,
                "retried {}: {} delivered, {} still failing",
                summary.attempted,
                summary.succeeded,
                summary.failed()
            )?;
            Ok(summary.all_succeeded())
        }
    }
}

pub async fn upload<W: Write>(container: &ServiceContainer, id: i64, url: &str, out: &mut W) -> Result<bool> {
    let delivered = container.pipeline.upload_undecided_by_id(id, url).await?;
    if delivered {
        writeln!(out, "record {id}: uploaded to {url}")?;
    } else {
        writeln!(out, "record {id}: upload to {url} failed")?;
    }
    Ok(delivered)
}

pub async fn delete<W: Write>(
    container: &ServiceContainer,
    kind: RecordKind,
    target: &DeleteTarget,
    out: &mut W,
) -> Result<()> {
    let removed = if target.all {
        container.pipeline.delete_all(kind).await?
    } else {
        container.pipeline.delete_many(kind, &target.ids).await?
    };
    writeln!(out, "deleted {removed} {kind} record(s)")?;
    Ok(())
}

/// Print `failed=N undecided=M` whenever either count changes, until
/// `shutdown` resolves.
pub async fn watch<W, S>(container: &ServiceContainer, out: &mut W, shutdown: S) -> Result<()>
where
    W: Write,
    S: Future<Output = ()>,
{
    let failed = container
        .store
        .count_stream(RecordKind::Failed)
        .map(|count| (RecordKind::Failed, count));
    let undecided = container
        .store
        .count_stream(RecordKind::Undecided)
        .map(|count| (RecordKind::Undecided, count));
    let mut counts = futures::stream::select(failed, undecided);

    let mut failed_count = None;
    let mut undecided_count = None;
    tokio::pin!(shutdown);

    loop {
        let item = tokio::select! {
            _ = &mut shutdown => break,
            item = counts.next() => item,
        };
        let Some((kind, count)) = item else {
            break;
        };

        match kind {
            RecordKind::Failed => failed_count = Some(count?),
            RecordKind::Undecided => undecided_count = Some(count?),
        }
        if let (Some(failed), Some(undecided)) = (failed_count, undecided_count) {
            writeln!(out, "failed={failed} undecided={undecided}")?;
            out.flush()?;
        }
    }
    Ok(())
}

pub fn check_rules<W: Write>(rules: &RuleConfig, out: &mut W) -> Result<()> {
    writeln!(out, "{} destination(s)", rules.destinations().len())?;
    for destination in rules.destinations() {
        writeln!(
            out,
            "  {} <{}>: {} rule(s)",
            destination.name,
            destination.url,
            destination.rules.len()
        )?;
    }
    writeln!(out, "{} ignored package pattern(s)", rules.ignore_list().len())?;
    Ok(())
}
