//! Interactive questions asked while a transfer runs.

use async_trait::async_trait;
use dialoguer::{Confirm, Input, Password};

use crate::error::{Error, Result};

#[async_trait]
pub trait Prompter: Send + Sync {
    /// Login name for `host`. Never empty.
    async fn username(&self, host: &str) -> Result<String>;

    /// Passphrase for the private key used with `host`; `None` gives up.
    async fn passphrase(&self, host: &str) -> Result<Option<String>>;

    /// Whether `name` may be replaced in the destination.
    async fn confirm_overwrite(&self, name: &str) -> Result<bool>;
}

/// Terminal prompts via `dialoguer`, run on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct DialoguerPrompter;

async fn blocking<T, F>(field: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, dialoguer::Error> + Send + 'static,
{
    let failed = |message: String| Error::PromptFailed {
        field: field.to_string(),
        message,
    };
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| failed(e.to_string()))?
        .map_err(|e| failed(e.to_string()))
}

#[async_trait]
impl Prompter for DialoguerPrompter {
    async fn username(&self, host: &str) -> Result<String> {
        let prompt = format!("Username for {host}");
        blocking("username", move || {
            Input::<String>::new()
                .with_prompt(prompt)
                .validate_with(|input: &String| {
                    if input.trim().is_empty() {
                        Err("a username is required")
                    } else {
                        Ok(())
                    }
                })
                .interact_text()
        })
        .await
    }

    async fn passphrase(&self, host: &str) -> Result<Option<String>> {
        let prompt = format!("SSH key passphrase for {host}");
        let answer = blocking("passphrase", move || {
            Password::new()
                .with_prompt(prompt)
                .allow_empty_password(true)
                .interact()
        })
        .await?;
        Ok((!answer.is_empty()).then_some(answer))
    }

    async fn confirm_overwrite(&self, name: &str) -> Result<bool> {
        let prompt = format!("{name} already exists in this location. Overwrite?");
        blocking("overwrite", move || {
            Confirm::new().with_prompt(prompt).default(false).interact()
        })
        .await
    }
}
