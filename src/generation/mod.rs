mod error;
mod gemini;

use async_trait::async_trait;

pub use error::GenerationError;
pub use gemini::GeminiGenerator;

/// Turns a text prompt into generated text.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}
