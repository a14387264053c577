//! Embedding provider seam and the external-analyzer implementation.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use faceseek_core::{BBox, DetectedFace, Embedding};
use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("failed to run analyzer: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("analyzer exited with {status}: {stderr}")]
    Analyzer { status: String, stderr: String },
    #[error("analyzer timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed analyzer output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("empty analyzer command")]
    EmptyCommand,
}

/// Detection + embedding for one image. Implementations own their model;
/// the daemon only sees the resulting face list.
#[async_trait]
pub trait FaceAnalyzer: Send + Sync + 'static {
    async fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>, ProviderError>;
}

/// One face as the analyzer reports it on stdout.
#[derive(Deserialize)]
struct AnalyzerFace {
    bbox: Option<[f32; 4]>,
    score: Option<f32>,
    embedding: Vec<f32>,
}

/// Runs an external analyzer process per image: the image bytes go to its
/// stdin, a JSON array of `{bbox, score, embedding}` objects comes back on
/// stdout. A timeout kills the process and persists nothing upstream.
pub struct CommandAnalyzer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandAnalyzer {
    /// `command` is split on whitespace: first token is the program, the
    /// rest are fixed arguments.
    pub fn new(command: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let mut tokens = command.split_whitespace().map(str::to_string);
        let program = tokens.next().ok_or(ProviderError::EmptyCommand)?;
        Ok(Self {
            program,
            args: tokens.collect(),
            timeout,
        })
    }
}

#[async_trait]
impl FaceAnalyzer for CommandAnalyzer {
    async fn detect_and_embed(&self, image: &[u8]) -> Result<Vec<DetectedFace>, ProviderError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the child on timeout must not leave the analyzer running.
            .kill_on_drop(true)
            .spawn()?;

        let run = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(image).await?;
                stdin.shutdown().await?;
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(program = %self.program, timeout = ?self.timeout, "analyzer timed out");
                return Err(ProviderError::Timeout(self.timeout));
            }
        };

        if !output.status.success() {
            return Err(ProviderError::Analyzer {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let faces: Vec<AnalyzerFace> = serde_json::from_slice(&output.stdout)?;
        tracing::debug!(faces = faces.len(), "analyzer finished");
        Ok(faces
            .into_iter()
            .map(|f| DetectedFace {
                bbox: f.bbox.map(|[x1, y1, x2, y2]| BBox { x1, y1, x2, y2 }),
                score: f.score,
                embedding: Embedding::new(f.embedding),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn script(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("analyzer.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_command_analyzer_parses_faces() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(
            &dir,
            r#"cat > /dev/null
echo '[{"bbox":[0.0,0.0,10.0,10.0],"score":0.97,"embedding":[1.0,0.0]},{"bbox":null,"score":null,"embedding":[0.0,1.0]}]'"#,
        );

        let analyzer =
            CommandAnalyzer::new(path.to_str().unwrap(), Duration::from_secs(5)).unwrap();
        let faces = analyzer.detect_and_embed(b"image").await.unwrap();

        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].score, Some(0.97));
        assert_eq!(faces[0].bbox.unwrap().x2, 10.0);
        assert!(faces[1].bbox.is_none());
        assert_eq!(faces[1].embedding.values, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_command_analyzer_no_faces() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "cat > /dev/null\necho '[]'");

        let analyzer =
            CommandAnalyzer::new(path.to_str().unwrap(), Duration::from_secs(5)).unwrap();
        assert!(analyzer.detect_and_embed(b"image").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_command_analyzer_failure_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "cat > /dev/null\necho 'decode error' >&2\nexit 3");

        let analyzer =
            CommandAnalyzer::new(path.to_str().unwrap(), Duration::from_secs(5)).unwrap();
        match analyzer.detect_and_embed(b"image").await {
            Err(ProviderError::Analyzer { stderr, .. }) => assert_eq!(stderr, "decode error"),
            other => panic!("expected analyzer failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_command_analyzer_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "cat > /dev/null\nsleep 30");

        let analyzer =
            CommandAnalyzer::new(path.to_str().unwrap(), Duration::from_millis(100)).unwrap();
        match analyzer.detect_and_embed(b"image").await {
            Err(ProviderError::Timeout(_)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_command_analyzer_garbage_output_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(&dir, "cat > /dev/null\necho 'not json'");

        let analyzer =
            CommandAnalyzer::new(path.to_str().unwrap(), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            analyzer.detect_and_embed(b"image").await,
            Err(ProviderError::Output(_))
        ));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            CommandAnalyzer::new("   ", Duration::from_secs(1)),
            Err(ProviderError::EmptyCommand)
        ));
    }
}
