use nu_ansi_term::Color::{Blue, Cyan, Magenta, Red, Yellow};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::{
    fmt::{
        self,
        format::{FmtSpan, Writer},
        FmtContext, FormatEvent, FormatFields, MakeWriter,
    },
    registry::LookupSpan,
};

use crate::{cli::Args, utils::Colored};

/// Collects the message and the package a fetch log line belongs to.
#[derive(Default)]
struct FetchLineVisitor {
    message: Option<String>,
    package: Option<String>,
}

impl tracing::field::Visit for FetchLineVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "package" => self.package = Some(value.to_string()),
            _ => {}
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = Some(format!("{value:?}")),
            "package" => self.package = Some(format!("{value:?}")),
            _ => {}
        }
    }
}

/// Formats one log line: a level tag for anything but info, then the package being fetched.
fn render(level: Level, package: Option<&str>, message: &str) -> String {
    let tag = match level {
        Level::TRACE => Some(Colored(Magenta, "[TRACE]").to_string()),
        Level::DEBUG => Some(Colored(Blue, "[DEBUG]").to_string()),
        Level::INFO => None,
        Level::WARN => Some(Colored(Yellow, "[WARN]").to_string()),
        Level::ERROR => Some(Colored(Red, "[ERROR]").to_string()),
    };

    let mut line = String::new();
    if let Some(tag) = tag {
        line.push_str(&tag);
        line.push(' ');
    }
    if let Some(package) = package.filter(|p| !p.is_empty()) {
        line.push_str(&Colored(Cyan, format!("{package}:")).to_string());
        line.push(' ');
    }
    line.push_str(message);
    line
}

pub struct CustomFormatter;

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let mut visitor = FetchLineVisitor::default();
        event.record(&mut visitor);

        let line = render(
            *event.metadata().level(),
            visitor.package.as_deref(),
            visitor.message.as_deref().unwrap_or_default(),
        );
        writeln!(writer, "{line}")
    }
}

/// Buffers one formatted event and prints it with the spinners suspended.
struct SuspendingWriter {
    buffer: Vec<u8>,
    use_stderr: bool,
}

impl std::io::Write for SuspendingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for SuspendingWriter {
    fn drop(&mut self) {
        if self.buffer.is_empty() {
            return;
        }

        let output = String::from_utf8_lossy(&self.buffer);
        let output = output.trim_end_matches('\n').to_string();
        let use_stderr = self.use_stderr;
        crate::progress::suspend(|| {
            if use_stderr {
                eprintln!("{output}");
            } else {
                println!("{output}");
            }
        });
    }
}

struct WriterBuilder;

impl<'a> MakeWriter<'a> for WriterBuilder {
    type Writer = SuspendingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SuspendingWriter {
            buffer: Vec::new(),
            use_stderr: false,
        }
    }

    fn make_writer_for(&'a self, meta: &tracing::Metadata<'_>) -> Self::Writer {
        SuspendingWriter {
            buffer: Vec::new(),
            use_stderr: meta.level() != &Level::INFO,
        }
    }
}

fn filter_level(args: &Args) -> Level {
    if args.quiet {
        Level::ERROR
    } else if args.verbose >= 2 {
        Level::TRACE
    } else if args.verbose == 1 {
        Level::DEBUG
    } else {
        Level::INFO
    }
}

pub fn setup_logging(args: &Args) {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(format!("parcel={}", filter_level(args)))
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(WriterBuilder)
        .compact()
        .without_time();

    let subscriber: Box<dyn Subscriber + Send + Sync> = if args.json {
        Box::new(builder.json().flatten_event(true).finish())
    } else {
        Box::new(builder.event_format(CustomFormatter).finish())
    };

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}
