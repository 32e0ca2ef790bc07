//! Rewrite collaborator backed by an external shell command.

use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use draftline_core::session::AiEditor;

/// Runs `sh -c <command>` with the content on stdin and the prompt in
/// `DRAFTLINE_PROMPT`; stdout becomes the rewritten content.
pub struct CommandEditor {
    command: String,
}

impl CommandEditor {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl AiEditor for CommandEditor {
    async fn edit(&self, prompt: &str, content: &str) -> Result<String> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .env("DRAFTLINE_PROMPT", prompt)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start rewrite command '{}'", self.command))?;

        debug!(command = %self.command, bytes = content.len(), "running rewrite command");
        // Feed stdin while stdout is drained so large documents cannot fill
        // both pipes.
        let stdin = child.stdin.take();
        let feed = async move {
            match stdin {
                Some(mut stdin) => stdin.write_all(content.as_bytes()).await,
                None => Ok(()),
            }
        };
        let (written, output) = tokio::join!(feed, child.wait_with_output());
        let output = output.context("rewrite command did not finish")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let exit_code = output.status.code().unwrap_or(-1);
            warn!(exit_code, %stderr, "rewrite command failed");
            anyhow::bail!("rewrite command exited with {exit_code}: {}", stderr.trim());
        }
        match written {
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                Err(e).context("failed to write content to rewrite command")
            }
            _ => Ok(String::from_utf8_lossy(&output.stdout).to_string()),
        }
    }
}
