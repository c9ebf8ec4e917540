//! Logging setup for the SOCKS5 proxy: a diagnostic log (level-controlled,
//! stderr by default) and a separate, non-propagating connection log that
//! records one line per established session. Grounded on the teacher's
//! `devolutions-log` crate, which layers a file appender and a stdio
//! appender side by side under one `tracing_subscriber::registry`.

use anyhow::Context as _;
use std::fmt::Write as _;
use std::path::Path;
use tracing::Event;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Tracing target used exclusively for connection-log events. Kept out of
/// the diagnostic log and routed only to the connection sink.
pub const CONNECTION_TARGET: &str = "connection";

pub struct LoggerGuard {
    _diagnostic_guard: WorkerGuard,
    _connection_guard: WorkerGuard,
}

/// Initializes the dual-sink subscriber.
///
/// `loglevel` is one of `DEBUG`, `INFO`, `WARN`, `ERROR` (case-insensitive);
/// `connection_log_path` is where the connection sink appends its lines.
pub fn init(loglevel: &str, connection_log_path: &Path) -> anyhow::Result<LoggerGuard> {
    let level = normalize_level(loglevel);

    let (diagnostic_writer, diagnostic_guard) = tracing_appender::non_blocking(std::io::stderr());
    let diagnostic_layer = fmt::layer()
        .with_writer(diagnostic_writer)
        .with_filter(EnvFilter::try_new(level).context("invalid log level")?)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() != CONNECTION_TARGET
        }));

    let connection_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(connection_log_path)
        .with_context(|| format!("couldn't open connection log at {}", connection_log_path.display()))?;
    let (connection_writer, connection_guard) = tracing_appender::non_blocking(connection_file);
    let connection_layer = fmt::layer()
        .with_writer(connection_writer)
        .event_format(ConnectionLineFormat)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target() == CONNECTION_TARGET
        }));

    tracing_subscriber::registry()
        .with(diagnostic_layer)
        .with(connection_layer)
        .init();

    Ok(LoggerGuard {
        _diagnostic_guard: diagnostic_guard,
        _connection_guard: connection_guard,
    })
}

fn normalize_level(level: &str) -> &'static str {
    match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "INFO" => "info",
        "ERROR" => "error",
        _ => "warn",
    }
}

/// Renders a connection-log event as `"<timestamp> - <fields>"`, with no
/// level or target, matching the original's
/// `logging.Formatter("%(asctime)s - %(message)s")`. The stock `Full`
/// formatter has no such literal `" - "` separator, so this crate supplies
/// its own [`FormatEvent`] rather than approximating it with
/// `with_target(false)`/`with_level(false)`.
struct ConnectionLineFormat;

impl<S, N> FormatEvent<S, N> for ConnectionLineFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> std::fmt::Result {
        SystemTime.format_time(&mut writer)?;
        writer.write_str(" - ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
