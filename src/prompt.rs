use serde::{Deserialize, Serialize};

/// Where the template text goes relative to the topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemplatePlacement {
    #[default]
    Append,
    Prepend,
}

/// Fixed instructional text combined with every topic of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
    placement: TemplatePlacement,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>, placement: TemplatePlacement) -> Self {
        Self {
            text: text.into(),
            placement,
        }
    }

    pub fn appended(text: impl Into<String>) -> Self {
        Self::new(text, TemplatePlacement::Append)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn placement(&self) -> TemplatePlacement {
        self.placement
    }

    /// Builds the request payload. The template is used verbatim, whitespace included.
    pub fn compose(&self, topic: &str) -> String {
        let mut prompt = String::with_capacity(topic.len() + self.text.len());
        match self.placement {
            TemplatePlacement::Append => {
                prompt.push_str(topic);
                prompt.push_str(&self.text);
            }
            TemplatePlacement::Prepend => {
                prompt.push_str(&self.text);
                prompt.push_str(topic);
            }
        }
        prompt
    }
}
