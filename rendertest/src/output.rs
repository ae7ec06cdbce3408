// Copyright (c) The rendertest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::{Args, ValueEnum};
use owo_colors::{OwoColorize, Style, style};
use std::fmt;
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    level_filters::LevelFilter,
};
use tracing_subscriber::{
    Layer,
    filter::Targets,
    fmt::{FmtContext, FormatEvent, FormatFields, format},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// The environment variable holding a log filter, e.g. `rendertest_runner=debug`.
pub(crate) const LOG_ENV: &str = "RENDERTEST_LOG";

/// Events logged with this target are printed without an `error:`-style heading.
pub(crate) const NO_HEADING_TARGET: &str = "rendertest::no_heading";

pub(crate) mod clap_styles {
    use clap::builder::{
        Styles,
        styling::{AnsiColor, Effects, Style},
    };

    const HEADER: Style = AnsiColor::Green.on_default().effects(Effects::BOLD);
    const USAGE: Style = AnsiColor::Green.on_default().effects(Effects::BOLD);
    const LITERAL: Style = AnsiColor::Cyan.on_default().effects(Effects::BOLD);
    const PLACEHOLDER: Style = AnsiColor::Cyan.on_default();
    const ERROR: Style = AnsiColor::Red.on_default().effects(Effects::BOLD);
    const VALID: Style = AnsiColor::Cyan.on_default().effects(Effects::BOLD);
    const INVALID: Style = AnsiColor::Yellow.on_default().effects(Effects::BOLD);

    pub(crate) const fn style() -> Styles {
        Styles::styled()
            .header(HEADER)
            .usage(USAGE)
            .literal(LITERAL)
            .placeholder(PLACEHOLDER)
            .error(ERROR)
            .valid(VALID)
            .invalid(INVALID)
    }
}

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Verbose output: show debug logs
    #[arg(long, short, global = true, env = "RENDERTEST_VERBOSE")]
    pub(crate) verbose: bool,

    /// Produce color output: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "RENDERTEST_COLOR"
    )]
    pub(crate) color: Color,
}

impl OutputOpts {
    pub(crate) fn init(self) -> OutputContext {
        let OutputOpts { verbose, color } = self;

        color.init(verbose);

        OutputContext { color }
    }
}

/// How output is produced for this invocation.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) color: Color,
}

impl OutputContext {
    /// Returns general stderr styles for the current output context.
    pub fn stderr_styles(&self) -> StderrStyles {
        let mut styles = StderrStyles::default();

        if self.color.should_colorize(supports_color::Stream::Stderr) {
            styles.colorize();
        }

        styles
    }

    pub(crate) fn colorize_stdout(&self) -> bool {
        self.color.should_colorize(supports_color::Stream::Stdout)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
#[must_use]
pub(crate) enum Color {
    #[default]
    Auto,
    Always,
    Never,
}

static INIT_LOGGER: std::sync::Once = std::sync::Once::new();

impl Color {
    fn init(self, verbose: bool) {
        let mut log_styles = LogStyles::default();
        if self.should_colorize(supports_color::Stream::Stderr) {
            log_styles.colorize();
        }

        INIT_LOGGER.call_once(|| {
            let default_level = if verbose {
                LevelFilter::DEBUG
            } else {
                LevelFilter::INFO
            };
            let level_str = std::env::var(LOG_ENV).unwrap_or_default();
            let (targets, parse_error) = if level_str.is_empty() {
                (Targets::new().with_default(default_level), None)
            } else {
                match level_str.parse::<Targets>() {
                    Ok(targets) => (targets, None),
                    Err(error) => (Targets::new().with_default(default_level), Some(error)),
                }
            };

            let layer = tracing_subscriber::fmt::layer()
                .event_format(SimpleFormatter { styles: log_styles })
                .with_writer(std::io::stderr)
                .with_filter(targets);

            tracing_subscriber::registry().with(layer).init();

            if let Some(error) = parse_error {
                tracing::warn!("ignoring invalid {LOG_ENV} value `{level_str}`: {error}");
            }
        });
    }

    pub(crate) fn should_colorize(self, stream: supports_color::Stream) -> bool {
        match self {
            Color::Auto => supports_color::on_cached(stream).is_some(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

struct SimpleFormatter {
    styles: LogStyles,
}

impl<S, N> FormatEvent<S, N> for SimpleFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        if metadata.target() != NO_HEADING_TARGET {
            let (heading, style) = match *metadata.level() {
                Level::ERROR => ("error", self.styles.error),
                Level::WARN => ("warning", self.styles.warning),
                Level::INFO => ("info", self.styles.info),
                Level::DEBUG => ("debug", self.styles.debug),
                Level::TRACE => ("trace", self.styles.trace),
            };
            write!(writer, "{}: ", heading.style(style))?;
        }

        let mut visitor = MessageVisitor {
            writer: &mut writer,
            error: None,
        };
        event.record(&mut visitor);
        if let Some(error) = visitor.error {
            return Err(error);
        }

        writeln!(writer)
    }
}

static MESSAGE_FIELD: &str = "message";

struct MessageVisitor<'writer, 'a> {
    writer: &'a mut format::Writer<'writer>,
    error: Option<fmt::Error>,
}

impl Visit for MessageVisitor<'_, '_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == MESSAGE_FIELD
            && let Err(error) = write!(self.writer, "{value:?}")
        {
            self.error = Some(error);
        }
    }
}

#[derive(Debug, Default)]
struct LogStyles {
    error: Style,
    warning: Style,
    info: Style,
    debug: Style,
    trace: Style,
}

impl LogStyles {
    fn colorize(&mut self) {
        self.error = style().red().bold();
        self.warning = style().yellow().bold();
        self.info = style().bold();
        self.debug = style().bold();
        self.trace = style().dimmed();
    }
}

/// Styles for messages printed to stderr outside of logging.
#[derive(Debug, Default)]
pub struct StderrStyles {
    pub(crate) bold: Style,
    pub(crate) error: Style,
}

impl StderrStyles {
    fn colorize(&mut self) {
        self.bold = style().bold();
        self.error = style().red().bold();
    }
}
