//! The VCS probe (`spec.md` §4.6): queries a git repository for the
//! current commit hash, files changed since a hash, untracked files and
//! per-file blob hashes, via a streaming child-process interface with a
//! bounded output buffer and a per-invocation timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::LsmcpError;

/// Output larger than this aborts the read and surfaces an error,
/// per `spec.md` §4.6's bounded-output-buffer requirement.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 200 * 1024 * 1024;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct VcsChangeSet {
    pub modified: Vec<String>,
    pub untracked: Vec<String>,
}

/// The git contract (`spec.md` §6): every operation returns a `Result`,
/// per REDESIGN FLAGS' mandate to keep only the `Result`-returning
/// flavor rather than the source's throwing/Result duality.
#[async_trait]
pub trait VcsProbe: Send + Sync {
    async fn current_commit_hash(&self) -> Result<String, LsmcpError>;
    async fn changed_since(&self, hash: &str) -> Result<Vec<String>, LsmcpError>;
    async fn untracked_files(&self) -> Result<Vec<String>, LsmcpError>;
    async fn blob_hash(&self, path: &str) -> Result<Option<String>, LsmcpError>;
    async fn is_repository(&self) -> bool;
}

pub struct GitProbe {
    pub workspace_root: PathBuf,
    pub max_output_bytes: usize,
    pub timeout: Duration,
}

impl GitProbe {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    async fn run(&self, args: &[&str]) -> Result<String, LsmcpError> {
        let command_display = format!("git {}", args.join(" "));

        let child = Command::new("git")
            .args(args)
            .current_dir(&self.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(LsmcpError::Io)?;

        // Any early return below (bounded-output overrun, read error) must
        // not leave the child running; the guard kills it unless it has
        // already exited by the time this scope ends.
        let mut child = scopeguard::guard(child, |mut child| {
            if matches!(child.try_wait(), Ok(None)) {
                let _ = child.start_kill();
            }
        });

        let mut stdout = child.stdout.take().expect("piped stdout");
        let mut stderr = child.stderr.take().expect("piped stderr");
        let max = self.max_output_bytes;

        let read_fut = async move {
            let mut out_buf = Vec::new();
            let mut err_buf = Vec::new();
            let out_task = read_bounded(&mut stdout, &mut out_buf, max);
            let err_task = read_bounded(&mut stderr, &mut err_buf, max);
            let (out_res, err_res) = tokio::join!(out_task, err_task);
            out_res?;
            err_res?;
            Ok::<_, LsmcpError>((out_buf, err_buf))
        };

        let (stdout_bytes, stderr_bytes) = match timeout(self.timeout, read_fut).await {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(LsmcpError::Timeout { after: self.timeout });
            }
        };

        let status = match timeout(self.timeout, child.wait()).await {
            Ok(status) => status.map_err(LsmcpError::Io)?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(LsmcpError::Timeout { after: self.timeout });
            }
        };

        if !status.success() {
            return Err(LsmcpError::CommandFailed {
                command: command_display,
                stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            });
        }

        Ok(String::from_utf8_lossy(&stdout_bytes).into_owned())
    }

    fn validate_hash(hash: &str) -> Result<(), LsmcpError> {
        if hash.len() < 7 {
            return Err(LsmcpError::InvalidHash {
                hash: hash.to_string(),
                reason: "commit hash must be at least 7 characters",
            });
        }
        Ok(())
    }
}

async fn read_bounded<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max: usize,
) -> Result<(), LsmcpError> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await.map_err(LsmcpError::Io)?;
        if n == 0 {
            return Ok(());
        }
        if buf.len() + n > max {
            return Err(LsmcpError::Other(format!(
                "git child-process output exceeded {max} bytes"
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[async_trait]
impl VcsProbe for GitProbe {
    async fn current_commit_hash(&self) -> Result<String, LsmcpError> {
        let out = self.run(&["rev-parse", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    async fn changed_since(&self, hash: &str) -> Result<Vec<String>, LsmcpError> {
        Self::validate_hash(hash)?;
        if self.run(&["cat-file", "-e", &format!("{hash}^{{commit}}")]).await.is_err() {
            return Err(LsmcpError::InvalidHash {
                hash: hash.to_string(),
                reason: "not found in repository",
            });
        }

        let committed = self.run(&["diff", "--name-only", hash, "HEAD"]).await?;
        let unstaged = self.run(&["diff", "--name-only"]).await?;
        let staged = self.run(&["diff", "--name-only", "--cached"]).await?;

        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for list in [committed, staged, unstaged] {
            for line in list.lines().filter(|l| !l.is_empty()) {
                if seen.insert(line.to_string()) {
                    out.push(line.to_string());
                }
            }
        }
        Ok(out)
    }

    async fn untracked_files(&self) -> Result<Vec<String>, LsmcpError> {
        let out = self.run(&["ls-files", "--others", "--exclude-standard"]).await?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    async fn blob_hash(&self, path: &str) -> Result<Option<String>, LsmcpError> {
        match self.run(&["log", "-1", "--format=%H", "--", path]).await {
            Ok(out) => {
                let trimmed = out.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(trimmed.to_string()))
                }
            }
            Err(LsmcpError::CommandFailed { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn is_repository(&self) -> bool {
        self.current_commit_hash().await.is_ok()
    }
}

/// Extensions recognized by the active language preset; used to filter
/// untracked files during incremental refresh (`spec.md` §4.4.6 step 4).
pub fn filter_recognized_extensions<'a>(
    paths: impl IntoIterator<Item = &'a String>,
    extensions: &[&str],
) -> Vec<String> {
    paths
        .into_iter()
        .filter(|p| {
            Path::new(p)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| extensions.iter().any(|ext| ext.eq_ignore_ascii_case(e)))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_hash_is_rejected() {
        assert!(GitProbe::validate_hash("ab12").is_err());
        assert!(GitProbe::validate_hash("ab12cd3").is_ok());
    }

    #[test]
    fn extension_filter_is_case_insensitive() {
        let paths = vec!["a.RS".to_string(), "b.py".to_string(), "c.rs".to_string()];
        let filtered = filter_recognized_extensions(&paths, &["rs"]);
        assert_eq!(filtered, vec!["a.RS".to_string(), "c.rs".to_string()]);
    }
}
