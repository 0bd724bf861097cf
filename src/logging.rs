use colored::*;
use std::fmt;
use tracing::{Event, Level, Subscriber};
// Correct the import paths for tracing_subscriber items.
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// A custom tracing event formatter for colorizing log output based on level.
///
/// This formatter is designed to provide clean, user-facing output where the
/// entire log line is colored according to its severity level, without any
/// extra metadata like timestamps or log levels printed.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        // Buffer the formatted fields to apply color to the entire line.
        // This is necessary because the format_fields method writes directly.
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        // Apply color based on the event's log level.
        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        // Write the colored line to the actual output.
        writeln!(writer, "{}", colored_output)
    }
}

/// `time - name - level - message`, for the two on-disk logs (the network
/// and state-machine subsystems each get their own file). No color codes;
/// these files are read by tooling, not a terminal.
pub struct PlainLineFormatter;

impl<S, N> FormatEvent<S, N> for PlainLineFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        SystemTime.format_time(&mut writer)?;
        write!(
            writer,
            " - {} - {} - ",
            event.metadata().target(),
            event.metadata().level()
        )?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Keeps the two file appenders' background flush threads alive; dropping
/// this ends logging to disk, so the caller holds it for the process
/// lifetime (main.rs stores it in a local that outlives the run loop).
pub struct LoggingGuards {
    _network_file: tracing_appender::non_blocking::WorkerGuard,
    _statemachine_file: tracing_appender::non_blocking::WorkerGuard,
}

/// Target prefix used by the state-machine subsystem's log lines
/// ([`crate::statemachine::log_warn`] and its `tracing::info!`/`warn!` call
/// sites), used here to route events to `./log/statemachine.log` instead of
/// `./log/network.log`.
const STATEMACHINE_TARGET_PREFIX: &str = "netsim::statemachine";

fn level_for(verbosity: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Build the three-layer subscriber: a colorized stdout layer for
/// operators, and two independent plain-text file layers so the network
/// subsystem and the state-machine subsystem never interleave on disk.
pub fn init(verbosity: u8, quiet: bool) -> anyhow::Result<LoggingGuards> {
    std::fs::create_dir_all("./log")?;

    let network_appender = tracing_appender::rolling::never("./log", "network.log");
    let (network_writer, network_guard) = tracing_appender::non_blocking(network_appender);

    let statemachine_appender = tracing_appender::rolling::never("./log", "statemachine.log");
    let (statemachine_writer, statemachine_guard) = tracing_appender::non_blocking(statemachine_appender);

    let level = level_for(verbosity, quiet);
    let stdout_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .event_format(ColorizedFormatter)
        .with_writer(std::io::stdout)
        .with_filter(stdout_filter);

    let network_layer = tracing_subscriber::fmt::layer()
        .event_format(PlainLineFormatter)
        .with_writer(network_writer)
        .with_filter(tracing_subscriber::filter::filter_fn(move |meta| {
            *meta.level() <= level && !meta.target().starts_with(STATEMACHINE_TARGET_PREFIX)
        }));

    let statemachine_layer = tracing_subscriber::fmt::layer()
        .event_format(PlainLineFormatter)
        .with_writer(statemachine_writer)
        .with_filter(tracing_subscriber::filter::filter_fn(move |meta| {
            *meta.level() <= level && meta.target().starts_with(STATEMACHINE_TARGET_PREFIX)
        }));

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(network_layer)
        .with(statemachine_layer)
        .init();

    Ok(LoggingGuards {
        _network_file: network_guard,
        _statemachine_file: statemachine_guard,
    })
}
