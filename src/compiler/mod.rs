//! Compiler module - local compile gate
//!
//! A fast, best-effort compile check run before any sandbox quota is spent:
//! - Interpreted languages pass straight through
//! - Compiled languages are built in a private scratch directory that is
//!   removed on every exit path
//! - Anything that prevents the compiler from running counts as a failure
//!
//! The sandbox re-validates everything, so a pass here proves nothing beyond
//! "this is worth sending".

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::CompileGateConfig;
use crate::languages::{self, Language, LanguageConfig};

/// Prefix of every per-invocation scratch directory
const SCRATCH_PREFIX: &str = "gate-";

/// Result of a local compile check
#[derive(Debug, Clone, PartialEq)]
pub enum CompileCheck {
    Passed,
    Failed { diagnostic: String },
}

pub struct CompileGate {
    scratch_root: PathBuf,
    timeout: Duration,
}

impl CompileGate {
    pub fn new(config: &CompileGateConfig) -> Self {
        Self {
            scratch_root: config.scratch_dir.clone(),
            timeout: config.timeout,
        }
    }

    /// Check that `code` compiles locally
    pub async fn check_compiles(&self, code: &str, language: Language) -> CompileCheck {
        match languages::get_language_config(language) {
            Some(lang_config) => self.check_with(code, &lang_config).await,
            None => CompileCheck::Failed {
                diagnostic: format!("No toolchain configured for {}", language),
            },
        }
    }

    async fn check_with(&self, code: &str, lang_config: &LanguageConfig) -> CompileCheck {
        let Some(compile_cmd) = lang_config.compile_command.as_deref() else {
            // Interpreted language, nothing to check locally
            return CompileCheck::Passed;
        };

        match self.compile(code, &lang_config.source_file, compile_cmd).await {
            Ok(check) => check,
            Err(e) => {
                warn!("Local compile gate could not run {:?}: {:#}", compile_cmd, e);
                CompileCheck::Failed {
                    diagnostic: format!("{:#}", e),
                }
            }
        }
    }

    async fn compile(
        &self,
        code: &str,
        source_file: &str,
        compile_cmd: &[String],
    ) -> Result<CompileCheck> {
        let (program, args) = compile_cmd
            .split_first()
            .context("Empty compile command")?;

        tokio::fs::create_dir_all(&self.scratch_root)
            .await
            .with_context(|| format!("Failed to create scratch root {:?}", self.scratch_root))?;

        // Dropping the TempDir removes the source and every build artifact
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&self.scratch_root)
            .context("Failed to create scratch directory")?;

        tokio::fs::write(scratch.path().join(source_file), code)
            .await
            .context("Failed to write source file")?;

        debug!("Compiling with {:?} in {:?}", compile_cmd, scratch.path());

        let child = Command::new(program)
            .args(args)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to invoke {}", program))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.with_context(|| format!("Failed to wait for {}", program))?,
            Err(_) => {
                return Ok(CompileCheck::Failed {
                    diagnostic: format!(
                        "Compilation timed out after {}s",
                        self.timeout.as_secs_f32()
                    ),
                })
            }
        };

        if output.status.success() {
            return Ok(CompileCheck::Passed);
        }

        let mut diagnostic = String::from_utf8_lossy(&output.stdout).into_owned();
        diagnostic.push_str(&String::from_utf8_lossy(&output.stderr));
        let diagnostic = diagnostic.trim().to_string();

        let diagnostic = if diagnostic.is_empty() {
            match output.status.code() {
                Some(code) => format!("Compilation failed with exit code {}", code),
                None => "Compiler crashed".to_string(),
            }
        } else {
            diagnostic
        };

        Ok(CompileCheck::Failed { diagnostic })
    }

    /// Remove scratch directories left behind by a crashed process
    ///
    /// Only directories older than `max_age` are touched so that a worker
    /// sharing the scratch root keeps its in-flight builds.
    pub async fn sweep_stale(&self, max_age: Duration) -> Result<usize> {
        sweep_scratch_root(&self.scratch_root, max_age).await
    }
}

async fn sweep_scratch_root(root: &Path, max_age: Duration) -> Result<usize> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("Failed to read {:?}", root)),
    };

    let now = SystemTime::now();
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX) {
            continue;
        }

        let metadata = entry.metadata().await?;
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if !metadata.is_dir() || age < max_age {
            continue;
        }

        match tokio::fs::remove_dir_all(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to remove stale scratch {:?}: {}", entry.path(), e),
        }
    }

    if removed > 0 {
        info!("Removed {} stale scratch directories from {:?}", removed, root);
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(root: &Path, timeout: Duration) -> CompileGate {
        CompileGate::new(&CompileGateConfig {
            scratch_dir: root.to_path_buf(),
            timeout,
        })
    }

    fn shell_language(script: &str) -> LanguageConfig {
        LanguageConfig {
            judge_language_id: 0,
            source_file: "main.x".into(),
            compile_command: Some(vec!["sh".into(), "-c".into(), script.into()]),
        }
    }

    fn scratch_entries(root: &Path) -> usize {
        std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_interpreted_language_is_noop() {
        languages::ensure_languages();
        let root = tempfile::tempdir().unwrap();
        let gate = gate(root.path(), Duration::from_secs(5));

        let check = gate.check_compiles("print(", Language::Python).await;

        assert_eq!(check, CompileCheck::Passed);
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_invalid_cpp_fails_with_diagnostic() {
        languages::ensure_languages();
        let root = tempfile::tempdir().unwrap();
        let gate = gate(root.path(), Duration::from_secs(30));

        let check = gate
            .check_compiles("int main( { return 0 }", Language::Cpp)
            .await;

        match check {
            CompileCheck::Failed { diagnostic } => assert!(!diagnostic.is_empty()),
            CompileCheck::Passed => panic!("invalid C++ passed the gate"),
        }
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_success_removes_artifacts() {
        let root = tempfile::tempdir().unwrap();
        let gate = gate(root.path(), Duration::from_secs(5));

        let check = gate
            .check_with("source", &shell_language("cp main.x main.out"))
            .await;

        assert_eq!(check, CompileCheck::Passed);
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_failure_captures_combined_output() {
        let root = tempfile::tempdir().unwrap();
        let gate = gate(root.path(), Duration::from_secs(5));

        let check = gate
            .check_with("source", &shell_language("echo out; echo boom >&2; exit 1"))
            .await;

        assert_eq!(
            check,
            CompileCheck::Failed {
                diagnostic: "out\nboom".into()
            }
        );
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_silent_failure_reports_exit_code() {
        let root = tempfile::tempdir().unwrap();
        let gate = gate(root.path(), Duration::from_secs(5));

        let check = gate.check_with("source", &shell_language("exit 3")).await;

        assert_eq!(
            check,
            CompileCheck::Failed {
                diagnostic: "Compilation failed with exit code 3".into()
            }
        );
    }

    #[tokio::test]
    async fn test_missing_compiler_fails_closed() {
        let root = tempfile::tempdir().unwrap();
        let gate = gate(root.path(), Duration::from_secs(5));
        let lang = LanguageConfig {
            judge_language_id: 0,
            source_file: "main.c".into(),
            compile_command: Some(vec!["definitely-not-a-compiler".into(), "main.c".into()]),
        };

        match gate.check_with("int main(){}", &lang).await {
            CompileCheck::Failed { diagnostic } => {
                assert!(diagnostic.contains("definitely-not-a-compiler"))
            }
            CompileCheck::Passed => panic!("missing compiler must not pass"),
        }
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_slow_compiler_times_out() {
        let root = tempfile::tempdir().unwrap();
        let gate = gate(root.path(), Duration::from_millis(100));

        let check = gate.check_with("source", &shell_language("sleep 5")).await;

        match check {
            CompileCheck::Failed { diagnostic } => assert!(diagnostic.contains("timed out")),
            CompileCheck::Passed => panic!("timeout must fail"),
        }
        assert_eq!(scratch_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_gate_directories() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("gate-leftover")).unwrap();
        std::fs::write(root.path().join("gate-leftover").join("main.cpp"), "x").unwrap();
        std::fs::create_dir(root.path().join("unrelated")).unwrap();

        let gate = gate(root.path(), Duration::from_secs(5));
        assert_eq!(gate.sweep_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(gate.sweep_stale(Duration::ZERO).await.unwrap(), 1);

        assert!(!root.path().join("gate-leftover").exists());
        assert!(root.path().join("unrelated").exists());
    }

    #[tokio::test]
    async fn test_sweep_tolerates_missing_root() {
        let root = tempfile::tempdir().unwrap();
        let gate = gate(&root.path().join("absent"), Duration::from_secs(5));
        assert_eq!(gate.sweep_stale(Duration::ZERO).await.unwrap(), 0);
    }
}
