//! Reader to parser to writer wiring.
//!
//! The device reader runs as an async task and hands items over a bounded
//! channel to one blocking worker that owns the parser and the pack writer.
//! When the token is cancelled the reader stops, the worker drains what is
//! queued and force-flushes partial packs.

use crate::config::Config;
use crate::device::DeviceReader;
use crate::error::{ReadportError, Result};
use crate::models::{Item, ProcessingStats};
use crate::parser::{PackWriter, StreamParser};
use std::io;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Items buffered between the reader and the worker
pub const CHANNEL_CAPACITY: usize = 1024;

/// Run the device stream until `token` is cancelled
pub async fn run(config: Config, token: CancellationToken) -> Result<ProcessingStats> {
    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

    let parser = StreamParser::new(config.pattern.clone());
    let writer = PackWriter::from_config(&config);
    let worker = tokio::task::spawn_blocking(move || process_items(receiver, parser, writer));

    info!(
        "Reading {} from {}:{}, {} records per pack",
        config.device, config.host, config.port, config.pack_length
    );
    let sent = DeviceReader::from_config(&config).run(sender, token).await;
    debug!("Reader stopped after {} messages", sent);

    let stats = worker
        .await
        .map_err(|e| ReadportError::Io(io::Error::other(e)))?;

    info!(
        "Stopped: {} messages received, {} records parsed, {} files written",
        stats.items_received, stats.records_parsed, stats.files_written
    );
    Ok(stats)
}

/// Parse and pack every item until the channel closes, then flush.
///
/// Parse errors are logged where they occur and the item is dropped.
pub fn process_items(
    mut receiver: mpsc::Receiver<Item>,
    parser: StreamParser,
    mut writer: PackWriter,
) -> ProcessingStats {
    let mut stats = ProcessingStats::default();

    while let Some(item) = receiver.blocking_recv() {
        stats.items_received += 1;

        let Ok(record) = parser.extract(&item) else {
            stats.items_rejected += 1;
            continue;
        };
        stats.records_parsed += 1;

        if let Err(e) = writer.write(&record) {
            error!("{}", e);
            stats.records_rejected += 1;
        }
    }

    let pending = writer.pending();
    if pending > 0 {
        info!("Saving {} pending records", pending);
        // failures are logged per pack
        let _ = writer.flush_all();
    }

    stats.files_written = writer.files_written();
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::DestinationTemplate;
    use crate::pattern::PatternValidator;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_process_items_counts_and_flushes() {
        let temp_dir = TempDir::new().unwrap();
        let pattern = PatternValidator::default()
            .validate(r"T=(?P<temp>\S+)")
            .unwrap();
        let destination = DestinationTemplate::parse(
            &temp_dir.path().to_string_lossy(),
            "MSU",
            "Test",
            false,
        )
        .unwrap();
        let writer = PackWriter::new(2, destination);

        let (sender, receiver) = mpsc::channel(8);
        for (payload, first) in [
            (&b"=1.5\r\n"[..], true),
            (&b"T=1.0\r\n"[..], false),
            (&b"T=2.0\r\n"[..], false),
            (&b"T=oops\r\n"[..], false),
            (&b"T=3.0\r\n"[..], false),
        ] {
            sender.try_send(Item::new(payload, Utc::now(), first)).unwrap();
        }
        drop(sender);

        let stats = process_items(receiver, StreamParser::new(pattern), writer);

        assert_eq!(
            stats,
            ProcessingStats {
                items_received: 5,
                records_parsed: 3,
                items_rejected: 2,
                records_rejected: 0,
                files_written: 2,
            }
        );
    }
}
