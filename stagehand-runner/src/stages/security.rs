//! Security stage
//!
//! Static scan of the source tree for hard-coded credentials, private keys
//! and dynamic code evaluation. Every finding is logged as `path:line: rule`
//! and any finding fails the stage. A line containing `security:ignore` is
//! skipped.

use anyhow::Context as _;
use async_trait::async_trait;
use regex::Regex;
use stagehand_core::config::SecuritySettings;
use stagehand_core::domain::stage::{StageName, StageResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StageRunner, blocking};
use crate::context::{StageContext, StageRecorder};

const IGNORE_MARKER: &str = "security:ignore";

const RULES: &[(&str, &str)] = &[
    (
        "hardcoded_password",
        r#"(?i)\b(password|passwd|pwd)\s*[:=]\s*["'][^"'\s]{4,}["']"#,
    ),
    (
        "hardcoded_secret",
        r#"(?i)\b(secret|client_secret|api[_-]?key|access[_-]?token|auth[_-]?token)\s*[:=]\s*["'][^"'\s]{8,}["']"#,
    ),
    (
        "private_key",
        r"-----BEGIN (RSA |EC |DSA |OPENSSH )?PRIVATE KEY-----",
    ),
    ("dynamic_eval", r"\beval\s*\("),
    ("dynamic_function", r"\bnew\s+Function\s*\("),
];

/// One rule match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub path: PathBuf,
    pub line: usize,
    pub rule: &'static str,
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.path.display(), self.line, self.rule)
    }
}

pub struct SecurityStage;

#[async_trait]
impl StageRunner for SecurityStage {
    fn stage(&self) -> StageName {
        StageName::Security
    }

    async fn run(&self, ctx: &StageContext) -> StageResult {
        let recorder = StageRecorder::new(StageName::Security);
        let settings = ctx.settings();
        let source = settings.source_dir.clone();
        let state_dir = settings.state_dir.clone();
        let security = settings.stages.security.clone();

        recorder.info(format!("scanning {}", source.display()));
        let scan = blocking(move || {
            let scanner = Scanner::new(&security, Some(&state_dir))?;
            scanner.scan(&source)
        })
        .await;

        let outcome = scan.and_then(|(files, findings)| {
            recorder.info(format!("scanned {} file(s)", files));
            for finding in &findings {
                recorder.warn(finding.to_string());
            }
            if findings.is_empty() {
                Ok(())
            } else {
                Err(anyhow::anyhow!("{} security finding(s)", findings.len()))
            }
        });

        recorder.finish(outcome)
    }
}

struct Scanner<'a> {
    settings: &'a SecuritySettings,
    rules: Vec<(&'static str, Regex)>,
    /// Never descended into, e.g. the state directory when it sits inside the source
    skip: Option<PathBuf>,
}

impl<'a> Scanner<'a> {
    fn new(settings: &'a SecuritySettings, skip: Option<&Path>) -> anyhow::Result<Self> {
        let rules = RULES
            .iter()
            .map(|(name, pattern)| {
                Regex::new(pattern)
                    .map(|re| (*name, re))
                    .with_context(|| format!("invalid pattern for rule {}", name))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            settings,
            rules,
            skip: skip.and_then(|p| fs::canonicalize(p).ok()),
        })
    }

    /// Scans a tree, returning the number of files read and every finding
    fn scan(&self, root: &Path) -> anyhow::Result<(usize, Vec<Finding>)> {
        let mut files = 0;
        let mut findings = Vec::new();
        self.walk(root, root, &mut files, &mut findings)?;
        Ok((files, findings))
    }

    fn walk(
        &self,
        root: &Path,
        dir: &Path,
        files: &mut usize,
        findings: &mut Vec<Finding>,
    ) -> anyhow::Result<()> {
        let entries =
            fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            let name = entry.file_name().to_string_lossy().to_string();

            if file_type.is_dir() {
                if self.settings.exclude_dirs.contains(&name) || self.is_skipped(&path) {
                    debug!("Skipping directory {}", path.display());
                    continue;
                }
                self.walk(root, &path, files, findings)?;
            } else if file_type.is_file() && self.is_scannable(&path, &name) {
                if entry.metadata()?.len() > self.settings.max_file_bytes {
                    debug!("Skipping large file {}", path.display());
                    continue;
                }
                *files += 1;
                let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                findings.extend(self.scan_file(&path, &rel));
            }
        }

        Ok(())
    }

    fn is_skipped(&self, path: &Path) -> bool {
        match &self.skip {
            Some(skip) => fs::canonicalize(path).is_ok_and(|p| &p == skip),
            None => false,
        }
    }

    fn is_scannable(&self, path: &Path, name: &str) -> bool {
        if name == ".env" || name.starts_with(".env.") {
            return self.settings.extensions.iter().any(|e| e == "env");
        }
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.settings.extensions.iter().any(|e| e == ext))
    }

    fn scan_file(&self, path: &Path, rel: &Path) -> Vec<Finding> {
        // Unreadable or non-UTF-8 files are not source
        let Ok(content) = fs::read_to_string(path) else {
            return Vec::new();
        };

        let mut findings = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.contains(IGNORE_MARKER) {
                continue;
            }
            for (rule, re) in &self.rules {
                if re.is_match(line) {
                    findings.push(Finding {
                        path: rel.to_path_buf(),
                        line: index + 1,
                        rule: *rule,
                    });
                }
            }
        }
        findings
    }
}
