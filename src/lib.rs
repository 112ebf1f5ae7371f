pub mod config;
pub mod download;
pub mod driver;
pub mod generation;
pub mod logging;
pub mod output;
pub mod pacing;
pub mod prompt;

pub use config::{BatchConfig, Config, ConfigManager, FailurePolicy};
pub use download::{
    fetch_and_report, resolve_video_url, DownloadError, MediaDownloader, YtDlpDownloader,
};
pub use driver::{generate_and_save, BatchDriver, BatchError, BatchJob, BatchReport, DriverError};
pub use generation::{GeminiGenerator, GenerationError, GenerationService};
pub use output::{sanitize_file_stem, ArtifactWriter};
pub use pacing::{NoPacing, Pacer, TokioPacer};
pub use prompt::{PromptTemplate, TemplatePlacement};
