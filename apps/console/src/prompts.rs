use std::io::Write;
use std::sync::Arc;

use agenthub_export::{ConsentError, ConsentPrompt, ConsentRequest, ConsentResponse};
use agenthub_session::{Identity, ProviderAuthError, SignInPrompt};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

/// Stdin shared between the command loop and interactive prompts.
pub type SharedLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

pub fn stdin_lines() -> SharedLines {
    Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()))
}

/// Print `prompt` and read one trimmed line. `None` on end of input.
pub async fn ask(lines: &SharedLines, prompt: &str) -> std::io::Result<Option<String>> {
    print!("{prompt}");
    std::io::stdout().flush()?;
    let mut lines = lines.lock().await;
    Ok(lines.next_line().await?.map(|line| line.trim().to_owned()))
}

pub struct ConsoleSignIn {
    lines: SharedLines,
}

impl ConsoleSignIn {
    pub fn new(lines: SharedLines) -> Self {
        Self { lines }
    }

    async fn ask(&self, prompt: &str) -> Result<Option<String>, ProviderAuthError> {
        ask(&self.lines, prompt)
            .await
            .map(|answer| answer.filter(|value| !value.is_empty()))
            .map_err(|error| ProviderAuthError::Provider(format!("console input failed: {error}")))
    }
}

#[async_trait]
impl SignInPrompt for ConsoleSignIn {
    async fn prompt(&self) -> Result<Identity, ProviderAuthError> {
        let Some(email) = self.ask("email (empty to cancel): ").await? else {
            return Err(ProviderAuthError::Dismissed);
        };
        let uid = self
            .ask("provider uid (empty to derive from email): ")
            .await?
            .unwrap_or_else(|| format!("local:{email}"));
        let identity = Identity::new(uid, email);

        Ok(match self.ask("display name (optional): ").await? {
            Some(name) => identity.with_display_name(name),
            None => identity,
        })
    }
}

pub struct ConsoleConsent {
    lines: SharedLines,
}

impl ConsoleConsent {
    pub fn new(lines: SharedLines) -> Self {
        Self { lines }
    }
}

#[async_trait]
impl ConsentPrompt for ConsoleConsent {
    async fn authorize(&self, request: ConsentRequest) -> Result<ConsentResponse, ConsentError> {
        println!("Open this address to allow exports:");
        println!("  {}", request.url);
        let answer = ask(
            &self.lines,
            "paste the redirect address or code (empty to deny): ",
        )
        .await
        .map_err(|error| ConsentError::Provider(format!("console input failed: {error}")))?;

        ConsentResponse::from_redirect(answer.as_deref().unwrap_or_default(), &request.state)
    }
}
