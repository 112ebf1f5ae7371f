//! Sequential batch generation: one topic at a time, request, persist, pause.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{BatchConfig, Config, FailurePolicy};
use crate::generation::{GenerationError, GenerationService};
use crate::logging::record_batch_report;
use crate::output::{ArtifactWriter, OutputError};
use crate::pacing::Pacer;
use crate::prompt::PromptTemplate;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

impl DriverError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Generation(err) if err.is_transient())
    }
}

/// Generates text for one topic, writes it to `<topic>.md`, then waits `delay`.
///
/// Service and write failures are returned as-is; nothing is retried here.
/// The artifact path is resolved before the request so an unusable topic
/// never costs a call.
pub async fn generate_and_save<S, P>(
    topic: &str,
    template: &PromptTemplate,
    service: &S,
    pacer: &P,
    delay: Duration,
    writer: &ArtifactWriter,
) -> Result<PathBuf, DriverError>
where
    S: GenerationService + ?Sized,
    P: Pacer + ?Sized,
{
    if topic.trim().is_empty() {
        return Err(DriverError::EmptyTopic);
    }
    writer.path_for(topic)?;

    let prompt = template.compose(topic);
    debug!(topic, provider = service.name(), "submitting prompt");
    let text = service.generate(&prompt).await?;

    let path = writer.write(topic, &text)?;
    info!("End process {}", path.display());

    pacer.pause(delay).await;
    debug!("NEXT");

    Ok(path)
}

/// One resolved batch: template, ordered topics, pacing and destination.
#[derive(Debug, Clone)]
pub struct BatchJob {
    pub name: String,
    pub template: PromptTemplate,
    pub topics: Vec<String>,
    pub delay: Duration,
    pub writer: ArtifactWriter,
}

impl BatchJob {
    pub fn from_config(batch: &BatchConfig, config: &Config) -> Self {
        let output_dir = batch
            .output_dir
            .clone()
            .unwrap_or_else(|| config.output_dir.clone());

        Self {
            name: batch.name.clone(),
            template: batch.prompt_template(),
            topics: batch.topics.clone(),
            delay: batch.delay(&config.pacing),
            writer: ArtifactWriter::new(output_dir),
        }
    }

    /// Composed prompts in topic order, without calling anything.
    pub fn prompts(&self) -> impl Iterator<Item = (&str, String)> + '_ {
        self.topics
            .iter()
            .map(|topic| (topic.as_str(), self.template.compose(topic)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TopicStatus {
    Written,
    Skipped,
    Failed,
}

impl TopicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicOutcome {
    pub topic: String,
    pub status: TopicStatus,
    /// Artifact path for written topics, error text otherwise.
    pub detail: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch: String,
    pub policy: String,
    pub total_topics: usize,
    pub outcomes: Vec<TopicOutcome>,
    pub elapsed_ms: u64,
}

impl BatchReport {
    fn new(job: &BatchJob, policy: FailurePolicy) -> Self {
        Self {
            batch: job.name.clone(),
            policy: policy.as_str().to_string(),
            total_topics: job.topics.len(),
            outcomes: Vec::with_capacity(job.topics.len()),
            elapsed_ms: 0,
        }
    }

    pub fn count(&self, status: TopicStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn written_paths(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == TopicStatus::Written)
            .map(|o| o.detail.as_str())
    }

    /// Topics that were never attempted because the batch stopped early.
    pub fn not_attempted(&self) -> usize {
        self.total_topics.saturating_sub(self.outcomes.len())
    }
}

#[derive(Debug, Error)]
#[error("batch '{batch}' stopped at topic #{position} '{topic}': {source}")]
pub struct BatchError {
    pub batch: String,
    /// 1-based position of the failing topic.
    pub position: usize,
    pub topic: String,
    #[source]
    pub source: DriverError,
    pub report: BatchReport,
}

/// Runs batches strictly in order. Each topic's write and pause finish
/// before the next request starts.
pub struct BatchDriver<'a, S: ?Sized, P: ?Sized> {
    service: &'a S,
    pacer: &'a P,
    policy: FailurePolicy,
}

impl<'a, S, P> BatchDriver<'a, S, P>
where
    S: GenerationService + ?Sized,
    P: Pacer + ?Sized,
{
    pub fn new(service: &'a S, pacer: &'a P, policy: FailurePolicy) -> Self {
        Self {
            service,
            pacer,
            policy,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub async fn run(&self, job: &BatchJob) -> Result<BatchReport, Box<BatchError>> {
        let start = Instant::now();
        let mut report = BatchReport::new(job, self.policy);
        let total = job.topics.len();

        info!(
            batch = %job.name,
            topics = total,
            delay_secs = job.delay.as_secs_f64(),
            policy = self.policy.as_str(),
            "🚀 Starting batch"
        );

        for (index, topic) in job.topics.iter().enumerate() {
            info!("[{}/{}] Generating '{}'", index + 1, total, topic);

            let (result, attempts) = self.attempt(topic, job).await;
            match result {
                Ok(path) => report.outcomes.push(TopicOutcome {
                    topic: topic.clone(),
                    status: TopicStatus::Written,
                    detail: path.display().to_string(),
                    attempts,
                }),
                Err(err) if self.policy == FailurePolicy::Skip => {
                    warn!("Skipping '{}': {}", topic, err);
                    report.outcomes.push(TopicOutcome {
                        topic: topic.clone(),
                        status: TopicStatus::Skipped,
                        detail: err.to_string(),
                        attempts,
                    });
                    self.pacer.pause(job.delay).await;
                }
                Err(err) => {
                    error!("Batch '{}' halted on '{}': {}", job.name, topic, err);
                    report.outcomes.push(TopicOutcome {
                        topic: topic.clone(),
                        status: TopicStatus::Failed,
                        detail: err.to_string(),
                        attempts,
                    });
                    report.elapsed_ms = start.elapsed().as_millis() as u64;
                    record_batch_report(&report);
                    return Err(Box::new(BatchError {
                        batch: job.name.clone(),
                        position: index + 1,
                        topic: topic.clone(),
                        source: err,
                        report,
                    }));
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            batch = %job.name,
            written = report.count(TopicStatus::Written),
            skipped = report.count(TopicStatus::Skipped),
            "✅ Batch complete"
        );
        record_batch_report(&report);
        Ok(report)
    }

    async fn attempt(&self, topic: &str, job: &BatchJob) -> (Result<PathBuf, DriverError>, u32) {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = generate_and_save(
                topic,
                &job.template,
                self.service,
                self.pacer,
                job.delay,
                &job.writer,
            )
            .await;

            let err = match result {
                Ok(path) => return (Ok(path), attempts),
                Err(err) => err,
            };

            let backoff = match self.policy {
                FailurePolicy::Retry {
                    max_retries,
                    initial_backoff_ms,
                } if err.is_transient() && attempts <= max_retries => {
                    retry_backoff(initial_backoff_ms, attempts)
                }
                _ => return (Err(err), attempts),
            };

            warn!(
                attempt = attempts,
                backoff_ms = backoff.as_millis() as u64,
                "Transient failure for '{}': {}",
                topic,
                err
            );
            self.pacer.pause(backoff).await;
        }
    }
}

/// Doubles from `initial_ms` on each attempt, capped at 30s.
fn retry_backoff(initial_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(initial_ms.saturating_mul(factor)).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(retry_backoff(500, 1), Duration::from_millis(500));
        assert_eq!(retry_backoff(500, 2), Duration::from_millis(1_000));
        assert_eq!(retry_backoff(500, 3), Duration::from_millis(2_000));
        assert_eq!(retry_backoff(500, 20), MAX_BACKOFF);
        assert_eq!(retry_backoff(u64::MAX, 5), MAX_BACKOFF);
    }

    #[test]
    fn job_resolves_output_dir_and_delay() {
        let mut config = Config::default();
        config.output_dir = PathBuf::from("notes");
        let mut batch = config.batch("aws").unwrap().clone();

        let job = BatchJob::from_config(&batch, &config);
        assert_eq!(job.writer.dir(), std::path::Path::new("notes"));
        assert_eq!(job.delay, Duration::from_secs(10));

        batch.output_dir = Some(PathBuf::from("aws-notes"));
        batch.delay_secs = None;
        config.pacing.delay_secs = 4;
        let job = BatchJob::from_config(&batch, &config);
        assert_eq!(job.writer.dir(), std::path::Path::new("aws-notes"));
        assert_eq!(job.delay, Duration::from_secs(4));
    }

    #[test]
    fn prompts_follow_topic_order() {
        let config = Config::default();
        let job = BatchJob::from_config(config.batch("java").unwrap(), &config);
        let topics: Vec<&str> = job.prompts().map(|(topic, _)| topic).collect();
        assert_eq!(topics.first(), Some(&"static methods in interfaces"));
        assert_eq!(topics.last(), Some(&"try-catch block"));

        let (_, prompt) = job.prompts().next().unwrap();
        assert!(prompt.starts_with("static methods in interfaces\n"));
        assert!(prompt.contains("in java"));
    }
}
