use async_trait::async_trait;
use folio_core::{CommitMessage, Notice, Operator, SyncPlan};

use crate::input::SharedInput;

/// Answers synchronization prompts on the terminal.
pub struct TerminalOperator {
    input: SharedInput,
}

impl TerminalOperator {
    pub fn new(input: SharedInput) -> Self {
        Self { input }
    }

    async fn ask(&self, prompt: &str) -> Option<String> {
        match self.input.read_line(prompt).await {
            Ok(line) => line.map(|line| line.trim().to_string()),
            Err(err) => {
                tracing::warn!("failed to read operator input: {err}");
                None
            }
        }
    }
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn request_credential(&self) -> Option<String> {
        println!("An access token is required (ghp_…, gho_… or github_pat_…).");
        self.ask("Access token (blank to cancel): ")
            .await
            .filter(|token| !token.is_empty())
    }

    async fn confirm(&self, plan: &SyncPlan) -> Option<CommitMessage> {
        println!("Files to commit:");
        for line in plan.preview_lines() {
            println!("  {line}");
        }
        let answer = self.ask("Proceed? [y/N] ").await?;
        if !matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes") {
            return None;
        }

        let title = self
            .ask(&format!("Commit title [{}]: ", plan.default_message.title))
            .await?;
        let title = if title.is_empty() {
            plan.default_message.title.clone()
        } else {
            title
        };
        let description = self.ask("Description (optional): ").await.unwrap_or_default();
        Some(CommitMessage::new(title).with_description(description))
    }

    fn notify(&self, notice: &Notice) {
        eprintln!("! {notice}");
    }
}
