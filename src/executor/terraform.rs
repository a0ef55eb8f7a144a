//! Thin subprocess wrapper around the IaC tool binary. Streams stdout/stderr line by line into
//! an accumulating log buffer instead of buffering the whole output before scanning it.

use std::path::Path;

use tokio::io::{AsyncBufReadExt as _, BufReader};
use tokio::process::Command;

#[derive(thiserror::Error, Debug)]
pub enum TerraformError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("`terraform {0}` exited with {1}")]
    NonZeroExit(String, std::process::ExitStatus),
}

pub struct Runner {
    pub binary: String,
    pub working_dir: std::path::PathBuf,
    pub log: LogBuffer,
}

impl Runner {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            binary: "terraform".to_string(),
            working_dir: working_dir.as_ref().to_path_buf(),
            log: LogBuffer::default(),
        }
    }

    pub async fn init(&mut self) -> Result<(), TerraformError> {
        self.run(&["init", "-input=false"]).await
    }

    pub async fn plan(&mut self, destroy: bool) -> Result<(), TerraformError> {
        if destroy {
            self.run(&["plan", "-destroy", "-input=false", "-out=tfplan"]).await
        } else {
            self.run(&["plan", "-input=false", "-out=tfplan"]).await
        }
    }

    pub async fn apply(&mut self) -> Result<(), TerraformError> {
        self.run(&["apply", "-input=false", "-auto-approve", "tfplan"]).await
    }

    pub async fn destroy(&mut self) -> Result<(), TerraformError> {
        self.run(&["destroy", "-input=false", "-auto-approve"]).await
    }

    pub async fn output(&mut self) -> Result<serde_json::Value, TerraformError> {
        let output = self.capture(&["output", "-json"]).await?;
        Ok(serde_json::from_str(&output).unwrap_or(serde_json::Value::Null))
    }

    async fn run(&mut self, args: &[&str]) -> Result<(), TerraformError> {
        self.capture(args).await?;
        Ok(())
    }

    async fn capture(&mut self, args: &[&str]) -> Result<String, TerraformError> {
        let mut child = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.working_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut captured = String::new();

        loop {
            tokio::select! {
                line = stdout_lines.next_line() => {
                    match line? {
                        Some(line) => {
                            self.log.push(&line);
                            captured.push_str(&line);
                            captured.push('\n');
                        }
                        None => break,
                    }
                }
                line = stderr_lines.next_line() => {
                    if let Some(line) = line? {
                        self.log.push(&line);
                    }
                }
            }
        }

        // Drain whatever's left on stderr after stdout closes.
        while let Some(line) = stderr_lines.next_line().await? {
            self.log.push(&line);
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(TerraformError::NonZeroExit(args.join(" "), status));
        }

        Ok(captured)
    }
}

/// A line-oriented log accumulator, bounded by total retained bytes (not line count) so a
/// single oversized line (e.g. a large JSON diff) can't blow past the memory budget.
pub struct LogBuffer {
    lines: std::collections::VecDeque<String>,
    retained_bytes: usize,
    max_bytes: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self {
            lines: std::collections::VecDeque::new(),
            retained_bytes: 0,
            max_bytes: 1024,
        }
    }
}

impl LogBuffer {
    fn push(&mut self, line: &str) {
        self.lines.push_back(line.to_string());
        self.retained_bytes += line.len();

        while self.retained_bytes > self.max_bytes {
            let Some(evicted) = self.lines.pop_front() else { break };
            self.retained_bytes -= evicted.len();
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let joined = self
            .lines
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        joined.into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_bounds_by_byte_length() {
        // Given
        let mut buffer = LogBuffer {
            lines: std::collections::VecDeque::new(),
            retained_bytes: 0,
            max_bytes: 8,
        };

        // When
        buffer.push("one");
        buffer.push("two");
        buffer.push("three");

        // Then
        assert_eq!(String::from_utf8(buffer.as_bytes()).unwrap(), "two\nthree");
    }

    #[test]
    fn test_log_buffer_evicts_oversized_single_line() {
        // Given
        let mut buffer = LogBuffer {
            lines: std::collections::VecDeque::new(),
            retained_bytes: 0,
            max_bytes: 8,
        };

        // When
        buffer.push("a very long line that alone exceeds the byte budget");
        buffer.push("short");

        // Then
        assert_eq!(String::from_utf8(buffer.as_bytes()).unwrap(), "short");
    }
}
