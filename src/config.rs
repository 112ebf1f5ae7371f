use anyhow::{anyhow, bail, Context, Result};
use jsonc_parser::{parse_to_serde_value, ParseOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::prompt::{PromptTemplate, TemplatePlacement};

const AWS_TEMPLATE: &str = concat!(
    "\n",
    "\n",
    "    IN AWS\n",
    "\n",
    "    give me detail and have examples (include input, output)\n",
    "    \n",
    "    format md file\n",
    "    ",
);

const JAVA_TEMPLATE: &str = concat!(
    "\n",
    "    \n",
    "    in java \n",
    "    \n",
    "    give me detail and have examples (include input, output)\n",
    "    \n",
    "    format md file\n",
    "    ",
);

const ENGLISH_TEMPLATE: &str = concat!(
    "\n",
    "    \n",
    "    we have some words:\n",
    "\n",
    "    superset , utility, detection, launcher, Archive , disassembler\n",
    "    wizard, Pattern , Sealed , Essential , Visual , profiling , dump , analyzer\n",
    "    specific, patch  , regularly, independent , allocation , sandboxing, compilation,\n",
    "    Architecture, several  , Bootstrap , directory, classpath, Metaspace \n",
    "    among , newer , Young , Eden Space, Survivor , Permanent , metadata, frames, partial \n",
    "\n",
    "\n",
    "    we want to translate these words to vietnamese with table include column:\n",
    "    english, pronounciation, definition, example, vietnamese\n",
    "\n",
    "    format md file\n",
    "    ",
);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub pacing: PacingConfig,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_batches")]
    pub batches: Vec<BatchConfig>,

    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_gemini_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub max_output_tokens: Option<u32>,

    /// Whole-request timeout. Values below 5 seconds are rejected.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PacingConfig {
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

/// What the batch driver does once the generation service fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the batch at the first failure.
    #[default]
    FailFast,
    /// Record the failure and move on to the next topic.
    Skip,
    /// Retry transient failures with exponential backoff, then fail fast.
    Retry {
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        #[serde(default = "default_initial_backoff_ms")]
        initial_backoff_ms: u64,
    },
}

impl FailurePolicy {
    pub fn retry() -> Self {
        Self::Retry {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailFast => "fail-fast",
            Self::Skip => "skip",
            Self::Retry { .. } => "retry",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchConfig {
    pub name: String,

    pub template: String,

    #[serde(default)]
    pub placement: TemplatePlacement,

    #[serde(default)]
    pub topics: Vec<String>,

    /// Overrides `pacing.delay_secs` for this batch.
    #[serde(default)]
    pub delay_secs: Option<u64>,

    /// Overrides the top-level `output_dir` for this batch.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl BatchConfig {
    pub fn prompt_template(&self) -> PromptTemplate {
        PromptTemplate::new(self.template.clone(), self.placement)
    }

    pub fn delay(&self, pacing: &PacingConfig) -> Duration {
        Duration::from_secs(self.delay_secs.unwrap_or(pacing.delay_secs))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_max_height")]
    pub max_height: u32,

    #[serde(default = "default_merge_format")]
    pub merge_format: String,

    /// Path to yt-dlp. Falls back to `$YTDLP`, then `yt-dlp` on PATH.
    #[serde(default)]
    pub executable: Option<PathBuf>,
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_gemini_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash".to_string()
}

pub const MIN_REQUEST_TIMEOUT_SECS: u64 = 5;

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_delay_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    2_000
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_height() -> u32 {
    1080
}

fn default_merge_format() -> String {
    "mp4".to_string()
}

fn default_batches() -> Vec<BatchConfig> {
    fn topics(items: &[&str]) -> Vec<String> {
        items.iter().map(|t| t.to_string()).collect()
    }

    vec![
        BatchConfig {
            name: "aws".to_string(),
            template: AWS_TEMPLATE.to_string(),
            placement: TemplatePlacement::Append,
            topics: topics(&[
                "EC2",
                "EBS",
                "EFS",
                "AMI",
                "Elastic Beanstalk",
                "IAM",
                "S3",
                "VPC",
                "Lambda",
                "CloudFormation",
                "ECS",
                "ECR",
                "CloudWatch",
                "CloudTrail",
                "Route53",
                "API Gateway",
                "CloudFront",
                "DynamoDB",
                "RDS",
                "Redshift",
                "SQS",
                "SNS",
                "High Availability & Scalability",
                "Load Balancing",
                "Auto Scaling",
                "Fault Tolerance",
            ]),
            delay_secs: Some(10),
            output_dir: None,
        },
        BatchConfig {
            name: "java".to_string(),
            template: JAVA_TEMPLATE.to_string(),
            placement: TemplatePlacement::Append,
            topics: topics(&[
                "static methods in interfaces",
                "Multiple Inheritance using interfaces",
                "Functional Interface",
                "Class Vs Abstract Class Vs Interface",
                "Array",
                "BufferedReader",
                "Scanner",
                "Logging",
                "try-catch block",
            ]),
            delay_secs: Some(2),
            output_dir: None,
        },
        BatchConfig {
            name: "english".to_string(),
            template: ENGLISH_TEMPLATE.to_string(),
            placement: TemplatePlacement::Append,
            topics: topics(&["e2"]),
            delay_secs: Some(10),
            output_dir: None,
        },
    ]
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            endpoint: default_gemini_endpoint(),
            model: default_gemini_model(),
            temperature: None,
            max_output_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            delay_secs: default_delay_secs(),
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_height: default_max_height(),
            merge_format: default_merge_format(),
            executable: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            generation: GenerationConfig::default(),
            pacing: PacingConfig::default(),
            failure_policy: FailurePolicy::default(),
            output_dir: default_output_dir(),
            batches: default_batches(),
            download: DownloadConfig::default(),
        }
    }
}

impl Config {
    pub fn batch(&self, name: &str) -> Option<&BatchConfig> {
        self.batches.iter().find(|batch| batch.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for batch in &self.batches {
            if batch.name.trim().is_empty() {
                bail!("Batch names must not be empty");
            }
            if !seen.insert(batch.name.as_str()) {
                bail!("Duplicate batch name '{}'", batch.name);
            }
            if let Some(index) = batch.topics.iter().position(|t| t.trim().is_empty()) {
                bail!("Batch '{}' has an empty topic at position {}", batch.name, index);
            }
        }

        if self.generation.model.trim().is_empty() {
            bail!("generation.model must not be empty");
        }
        if self.generation.api_key_env.trim().is_empty() {
            bail!("generation.api_key_env must not be empty");
        }
        if self.generation.request_timeout_secs < MIN_REQUEST_TIMEOUT_SECS {
            bail!(
                "generation.request_timeout_secs must be at least {}, got {}",
                MIN_REQUEST_TIMEOUT_SECS,
                self.generation.request_timeout_secs
            );
        }

        Ok(())
    }
}

pub struct ConfigManager {
    config: Config,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Loads `config.jsonc` from the user config directory, creating it with
    /// defaults on first use.
    pub fn load() -> Result<Self> {
        let config_path = Self::default_path()?;
        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        fs::create_dir_all(config_dir).context("Failed to create config directory")?;

        let config = if config_path.exists() {
            Self::read_config_from_disk(&config_path)?
        } else {
            let default_config = Config::default();
            Self::write_config_file(&config_path, &default_config)?;
            tracing::info!("Created default config at: {:?}", config_path);
            default_config
        };

        tracing::info!("Loaded config from: {:?}", config_path);
        Self::from_parts(config, config_path)
    }

    /// Loads an explicit config file. A missing file is an error here.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Self::read_config_from_disk(path)?;
        tracing::info!("Loaded config from: {:?}", path);
        Self::from_parts(config, path.to_path_buf())
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = directories::ProjectDirs::from("", "", "topicgen-rs")
            .context("Failed to get config directory")?
            .config_dir()
            .to_path_buf();
        Ok(config_dir.join("config.jsonc"))
    }

    /// Writes the default config to `path`. Refuses to clobber an existing
    /// file unless `force` is set.
    pub fn write_default(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            bail!("Config file already exists at {:?}", path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        Self::write_config_file(path, &Config::default())?;
        tracing::info!("Wrote default config to: {:?}", path);
        Ok(())
    }

    pub fn get(&self) -> Config {
        self.config.clone()
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn from_parts(config: Config, config_path: PathBuf) -> Result<Self> {
        config
            .validate()
            .with_context(|| format!("Invalid config at {:?}", config_path))?;
        Ok(Self {
            config,
            config_path,
        })
    }

    fn read_config_from_disk(path: &Path) -> Result<Config> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {:?}", path))?;
        Self::parse_config(&content)
    }

    fn write_config_file(path: &Path, config: &Config) -> Result<()> {
        let json = serde_json::to_string_pretty(config).context("Failed to serialize config")?;
        fs::write(path, json).with_context(|| format!("Failed to write config file at {:?}", path))
    }

    pub(crate) fn parse_config(content: &str) -> Result<Config> {
        let value = parse_to_serde_value(content, &ParseOptions::default())
            .context("Failed to parse config as JSONC")?
            .ok_or_else(|| anyhow!("Config file did not contain a JSON value"))?;
        serde_json::from_value(value).context("Failed to deserialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_object_yields_defaults() {
        let config = ConfigManager::parse_config("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.generation.model, "gemini-2.5-flash");
        assert_eq!(config.pacing.delay_secs, 10);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
        assert_eq!(config.batches.len(), 3);
    }

    #[test]
    fn parses_jsonc_with_comments_and_policy() {
        let content = r#"
        {
            // pace gently
            "pacing": { "delay_secs": 2 },
            "failure_policy": { "mode": "retry", "max_retries": 5 },
            "output_dir": "notes",
            "batches": [
                {
                    "name": "aws",
                    "template": " IN AWS ...",
                    "topics": ["EC2", "EBS"] /* block comment */
                }
            ]
        }
        "#;

        let config = ConfigManager::parse_config(content).unwrap();
        assert_eq!(config.pacing.delay_secs, 2);
        assert_eq!(
            config.failure_policy,
            FailurePolicy::Retry {
                max_retries: 5,
                initial_backoff_ms: 2_000
            }
        );
        assert_eq!(config.output_dir, PathBuf::from("notes"));

        let batch = config.batch("aws").unwrap();
        assert_eq!(batch.placement, TemplatePlacement::Append);
        assert_eq!(batch.delay(&config.pacing), Duration::from_secs(2));
        assert_eq!(batch.prompt_template().compose("EC2"), "EC2 IN AWS ...");
    }

    #[test]
    fn batch_delay_override_wins() {
        let config = Config::default();
        let java = config.batch("java").unwrap();
        assert_eq!(java.delay(&config.pacing), Duration::from_secs(2));
    }

    #[test]
    fn skip_policy_parses_from_mode_tag() {
        let config = ConfigManager::parse_config(r#"{ "failure_policy": { "mode": "skip" } }"#)
            .unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Skip);
    }

    #[test]
    fn validate_rejects_duplicate_batches_and_empty_topics() {
        let mut config = Config::default();
        config.batches.push(config.batches[0].clone());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.batches[0].topics.push("  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_short_request_timeout() {
        let mut config = Config::default();
        config.generation.request_timeout_secs = 2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("request_timeout_secs"));

        config.generation.request_timeout_secs = MIN_REQUEST_TIMEOUT_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn default_templates_keep_original_whitespace() {
        let config = Config::default();

        let aws = config.batch("aws").unwrap().prompt_template();
        assert_eq!(
            aws.compose("EC2"),
            "EC2\n\n    IN AWS\n\n    give me detail and have examples (include input, output)\n    \n    format md file\n    "
        );

        let java = config.batch("java").unwrap().prompt_template();
        assert!(java
            .compose("Array")
            .starts_with("Array\n    \n    in java \n    \n"));

        let english = config.batch("english").unwrap().prompt_template();
        let prompt = english.compose("e2");
        assert!(prompt.contains("classpath, Metaspace \n"));
        assert!(prompt.contains("frames, partial \n\n\n"));
    }

    #[test]
    fn write_default_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.jsonc");

        ConfigManager::write_default(&path, false).unwrap();
        assert!(ConfigManager::write_default(&path, false).is_err());

        let manager = ConfigManager::load_from(&path).unwrap();
        assert_eq!(manager.get(), Config::default());
        assert_eq!(manager.path(), path.as_path());
    }

    #[test]
    fn load_from_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(ConfigManager::load_from(dir.path().join("absent.jsonc")).is_err());
    }
}
