use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use owo_colors::OwoColorize;
use std::fmt;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};
use tracing::{Level, Subscriber};
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::driver::{BatchReport, TopicStatus};

const REPORT_TARGET: &str = "topicgen::batch_report";
const DEFAULT_FILTER: &str = "topicgen=info,topicgen_rs=info";
const DETAIL_CHAR_LIMIT: usize = 96;
const TARGET_GUTTER_WIDTH: usize = 24;
const TIMESTAMP_FORMAT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().event_format(TopicgenFormatter::new()))
        .try_init();
}

impl BatchReport {
    pub fn render_table(&self, use_color: bool) -> String {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec!["#", "Topic", "Status", "Tries", "Output / Error"]);

        for (index, outcome) in self.outcomes.iter().enumerate() {
            let mut status = Cell::new(outcome.status.as_str());
            if use_color {
                status = status.fg(match outcome.status {
                    TopicStatus::Written => Color::Green,
                    TopicStatus::Skipped => Color::Yellow,
                    TopicStatus::Failed => Color::Red,
                });
            }
            table.add_row(vec![
                Cell::new(index + 1),
                Cell::new(&outcome.topic),
                status,
                Cell::new(outcome.attempts),
                Cell::new(preview(&outcome.detail)),
            ]);
        }

        let mut rendered = format!(
            "┌─ Batch '{}' (policy: {}, written: {}/{}, skipped: {}, not attempted: {}, {:.1}s)\n",
            self.batch,
            self.policy,
            self.count(TopicStatus::Written),
            self.total_topics,
            self.count(TopicStatus::Skipped),
            self.not_attempted(),
            self.elapsed_ms as f64 / 1000.0
        );
        rendered.push_str(&table.to_string());
        rendered
    }
}

fn preview(value: &str) -> String {
    let mut preview: String = value.chars().take(DETAIL_CHAR_LIMIT).collect();
    if value.chars().count() > DETAIL_CHAR_LIMIT {
        preview.push_str("...");
    }
    preview
}

#[derive(Debug, Default)]
struct ReportEventVisitor {
    report_json: Option<String>,
}

impl tracing::field::Visit for ReportEventVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "report_json" {
            self.report_json = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "report_json" && self.report_json.is_none() {
            self.report_json = Some(format!("{value:?}"));
        }
    }
}

/// Timestamp, colored level, target gutter, then fields. Batch reports get a
/// rendered table under the event line.
#[derive(Default)]
pub struct TopicgenFormatter;

impl TopicgenFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl<S, N> FormatEvent<S, N> for TopicgenFormatter
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
    N: for<'writer> FormatFields<'writer> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let use_color = writer.has_ansi_escapes();

        write_prefix(&mut writer, metadata, use_color)?;

        if metadata.target() == REPORT_TARGET {
            let mut visitor = ReportEventVisitor::default();
            event.record(&mut visitor);
            writer.write_str("batch report\n")?;
            if let Some(json) = visitor.report_json {
                match serde_json::from_str::<BatchReport>(&json) {
                    Ok(report) => {
                        writer.write_str(&report.render_table(use_color))?;
                        writer.write_char('\n')?;
                    }
                    Err(err) => {
                        writer.write_str("│ Failed to render batch report: ")?;
                        writer.write_str(&err.to_string())?;
                        writer.write_char('\n')?;
                    }
                }
            }
            return Ok(());
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writer.write_char('\n')
    }
}

pub fn record_batch_report(report: &BatchReport) {
    if !tracing::level_enabled!(Level::INFO) {
        return;
    }
    match serde_json::to_string(report) {
        Ok(json) => tracing::event!(
            target: REPORT_TARGET,
            Level::INFO,
            report_json = json.as_str(),
            batch = report.batch.as_str(),
            "batch report"
        ),
        Err(err) => tracing::event!(
            target: REPORT_TARGET,
            Level::WARN,
            "batch report (serialization failure: {err})"
        ),
    }
}

fn write_prefix(
    writer: &mut Writer<'_>,
    metadata: &tracing::Metadata<'_>,
    use_color: bool,
) -> fmt::Result {
    let timestamp_plain = format_timestamp();
    let timestamp_display = if use_color {
        timestamp_plain.as_str().dimmed().to_string()
    } else {
        timestamp_plain
    };
    writer.write_str(&timestamp_display)?;
    writer.write_char(' ')?;

    let level_plain = format!("{:>5}", metadata.level());
    let level_display = if use_color {
        color_level(&level_plain, *metadata.level())
    } else {
        level_plain
    };
    writer.write_str(&level_display)?;
    writer.write_char(' ')?;

    let target_text = format!("{:<width$}", metadata.target(), width = TARGET_GUTTER_WIDTH);
    let target_text = if use_color {
        target_text.blue().dimmed().to_string()
    } else {
        target_text
    };
    writer.write_str(&target_text)?;
    writer.write_str(": ")?;

    Ok(())
}

fn color_level(text: &str, level: Level) -> String {
    match level {
        Level::ERROR => text.red().bold().to_string(),
        Level::WARN => text.yellow().bold().to_string(),
        Level::INFO => text.green().to_string(),
        Level::DEBUG => text.cyan().to_string(),
        Level::TRACE => text.dimmed().to_string(),
    }
}

fn format_timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| "0000-00-00 00:00:00".to_string())
}
