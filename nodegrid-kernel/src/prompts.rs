//! User prompts as async request/response
//!
//! Confirmation, selection and text input suspend the flow until the user
//! answers. Over HTTP the answers travel in the request body (`PresetAnswers`).

use async_trait::async_trait;
use serde::Deserialize;

#[async_trait]
pub trait Prompter: Send + Sync {
    async fn request_confirmation(&self, title: &str, body: &str) -> bool;

    /// Index of the chosen option, `None` when the user cancels
    async fn request_selection(&self, title: &str, options: &[String]) -> Option<usize>;

    async fn request_text(&self, title: &str, default: &str) -> Option<String>;
}

/// Answers supplied up-front by the browser
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresetAnswers {
    #[serde(default)]
    pub confirm: bool,
    /// Option index...
    #[serde(default)]
    pub selection: Option<usize>,
    /// ...or option text (first exact match wins)
    #[serde(default)]
    pub selected: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl PresetAnswers {
    pub fn confirmed() -> Self {
        Self { confirm: true, ..Self::default() }
    }
}

#[async_trait]
impl Prompter for PresetAnswers {
    async fn request_confirmation(&self, _title: &str, _body: &str) -> bool {
        self.confirm
    }

    async fn request_selection(&self, _title: &str, options: &[String]) -> Option<usize> {
        if let Some(index) = self.selection {
            return (index < options.len()).then_some(index);
        }
        let wanted = self.selected.as_deref()?;
        options.iter().position(|option| option == wanted)
    }

    /// Pas de label fourni : la valeur pré-remplie est acceptée
    async fn request_text(&self, _title: &str, default: &str) -> Option<String> {
        Some(self.label.clone().unwrap_or_else(|| default.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> Vec<String> {
        vec!["laptop".to_string(), "ci-runner".to_string()]
    }

    #[tokio::test]
    async fn test_selection_by_index_or_text() {
        let by_index = PresetAnswers { selection: Some(1), ..Default::default() };
        assert_eq!(by_index.request_selection("Select an SSH Key", &options()).await, Some(1));

        let out_of_range = PresetAnswers { selection: Some(7), ..Default::default() };
        assert_eq!(out_of_range.request_selection("Select an SSH Key", &options()).await, None);

        let by_text = PresetAnswers { selected: Some("ci-runner".into()), ..Default::default() };
        assert_eq!(by_text.request_selection("Select an SSH Key", &options()).await, Some(1));

        assert_eq!(PresetAnswers::default().request_selection("Select", &options()).await, None);
    }

    #[tokio::test]
    async fn test_confirmation_defaults_to_no() {
        assert!(!PresetAnswers::default().request_confirmation("Confirm Deletion", "?").await);
        assert!(PresetAnswers::confirmed().request_confirmation("Confirm Deletion", "?").await);
    }

    #[tokio::test]
    async fn test_text_falls_back_to_default() {
        let answers = PresetAnswers::default();
        assert_eq!(answers.request_text("Enter a label for your VM:", "AlephVM").await.as_deref(), Some("AlephVM"));

        let named = PresetAnswers { label: Some("web-1".into()), ..Default::default() };
        assert_eq!(named.request_text("Enter a label for your VM:", "AlephVM").await.as_deref(), Some("web-1"));
    }
}
