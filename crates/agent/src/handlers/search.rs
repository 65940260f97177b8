//! Code search with ripgrep, symbol lookup in ctags files

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use omnigate_config::ToolsPolicy;
use omnigate_eventlog::EventLogger;
use omnigate_session::action::CodeSearch;
use omnigate_session::{ActionKind, PendingPayload, SessionContext};

use super::path_utils::confine_path;
use super::{mismatch, ActionHandler, Execution, Proposal};
use crate::process::{run_with_timeout, streams, RunOutcome};
use crate::util::truncate;
use crate::Result;

const SEARCH_MASK: [&str; 3] = ["pattern", "project_dir", "symbol"];

/// The first `max` lines of `text`, and whether any were dropped
pub fn first_lines(text: &str, max: usize) -> (Vec<&str>, bool) {
    let mut lines = text.trim().lines();
    let kept: Vec<&str> = lines.by_ref().take(max).collect();
    let clipped = lines.next().is_some();
    (kept, clipped)
}

/// Searches a project with ripgrep once approved
pub struct CodeSearchHandler {
    root: PathBuf,
    policy: ToolsPolicy,
    logger: EventLogger,
}

#[derive(Deserialize)]
struct SearchArgs {
    pattern: String,
    #[serde(default, alias = "project")]
    project_dir: Option<String>,
}

impl CodeSearchHandler {
    pub fn new(root: PathBuf, policy: ToolsPolicy, logger: &EventLogger) -> Self {
        Self {
            root,
            policy,
            logger: logger.scoped(SEARCH_MASK),
        }
    }

    fn log_error(&self, search: &CodeSearch, error: &str) {
        self.logger.log(
            "code_search_error",
            json!({
                "action": "CODE_SEARCH",
                "project_dir": search.project,
                "pattern": search.pattern,
                "error": error,
            }),
        );
    }
}

#[async_trait]
impl ActionHandler for CodeSearchHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::CodeSearch
    }

    fn description(&self) -> &str {
        "Search a project's source with ripgrep. Requires approval."
    }

    fn parameters(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regex to search for" },
                "project_dir": { "type": "string", "description": "Directory, default the allowed root" }
            },
            "required": ["pattern"]
        })
    }

    async fn propose(
        &self,
        params: serde_json::Value,
        _session: &SessionContext,
    ) -> Result<Proposal> {
        let args: SearchArgs = serde_json::from_value(params)?;
        if args.pattern.trim().is_empty() {
            return Ok(Proposal::Rejected(
                "Please specify a non-empty search pattern.".to_string(),
            ));
        }
        let project = match args.project_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => confine_path(dir, &self.root).await?,
            _ => self.root.clone(),
        };

        let prompt = format!(
            "Agent wants to search `{}` for `{}`. Ok to search? (yes/ok/approve)",
            project.display(),
            args.pattern
        );
        Ok(Proposal::Staged {
            payload: PendingPayload::CodeSearch(CodeSearch {
                pattern: args.pattern,
                project,
            }),
            prompt,
        })
    }

    async fn execute(
        &self,
        payload: PendingPayload,
        _message: &str,
        _session: &SessionContext,
    ) -> Result<Execution> {
        let search = match payload {
            PendingPayload::CodeSearch(search) => search,
            other => return Err(mismatch(self.kind(), &other)),
        };
        let timeout = self.policy.search_timeout_secs;

        let mut cmd = Command::new(&self.policy.ripgrep);
        cmd.args(["--color", "never", "-n", "-H", "-C1", "-e"])
            .arg(&search.pattern)
            .arg("--")
            .arg(&search.project);

        let output = match run_with_timeout(&mut cmd, Duration::from_secs(timeout)).await {
            RunOutcome::Completed(output) => output,
            RunOutcome::TimedOut => {
                self.log_error(&search, "timed out");
                return Ok(Execution::done(format!(
                    "◆ TIMEOUT AFTER {} SECONDS",
                    timeout
                )));
            }
            RunOutcome::SpawnFailed(e) if e.kind() == io::ErrorKind::NotFound => {
                let notice = "ripgrep (rg) is not installed or not found in PATH.";
                self.log_error(&search, notice);
                return Ok(Execution::done(notice));
            }
            RunOutcome::SpawnFailed(e) => {
                warn!("ripgrep spawn failed: {}", e);
                self.log_error(&search, &e.to_string());
                return Ok(Execution::done(format!("ripgrep search error: {}", e)));
            }
        };

        let (stdout, stderr) = streams(&output);
        // rg exits 1 for no matches, 2 for errors
        if output.status.code() == Some(2) {
            self.log_error(&search, truncate(stderr.trim(), 300));
            return Ok(Execution::done(format!(
                "ripgrep search error: {}",
                truncate(stderr.trim(), 800)
            )));
        }

        let (lines, clipped) = first_lines(&stdout, self.policy.max_search_lines);
        self.logger.log(
            "code_search",
            json!({
                "action": "CODE_SEARCH",
                "project_dir": search.project,
                "pattern": search.pattern,
                "result_count": lines.len(),
            }),
        );
        if lines.is_empty() {
            return Ok(Execution::done(format!(
                "No matches for `{}` in {}.",
                search.pattern,
                search.project.display()
            )));
        }

        let mut message = format!("[ripgrep search result]\n{}", lines.join("\n"));
        if clipped {
            message.push_str(&format!(
                "\n(Clipped to the first {} lines.)",
                self.policy.max_search_lines
            ));
        }
        Ok(Execution::done(message))
    }

    async fn cancel(&self, payload: PendingPayload, message: &str) -> String {
        if let PendingPayload::CodeSearch(search) = payload {
            self.logger.log(
                "code_search_cancelled",
                json!({
                    "project_dir": search.project,
                    "pattern": search.pattern,
                    "user_message": truncate(message, 200),
                }),
            );
        }
        "Code search was not approved.".to_string()
    }
}

/// Ungated symbol lookup in a project's ctags `tags` file
pub struct SymbolFinder {
    root: PathBuf,
    max_results: usize,
    logger: EventLogger,
}

impl SymbolFinder {
    pub fn new(root: PathBuf, policy: &ToolsPolicy, logger: &EventLogger) -> Self {
        Self {
            root,
            max_results: policy.max_symbol_results,
            logger: logger.scoped(SEARCH_MASK),
        }
    }

    /// `tags` lines mentioning `symbol`, or a notice saying why there are none.
    ///
    /// `project` defaults to the allowed root.
    pub async fn find(&self, symbol: &str, project: Option<&str>) -> String {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return "Please specify a symbol to search for.".to_string();
        }
        let project = match project.map(str::trim).filter(|p| !p.is_empty()) {
            Some(dir) => match confine_path(dir, &self.root).await {
                Ok(p) => p,
                Err(e) => return format!("◆ ACCESS DENIED: {}", e.path),
            },
            None => self.root.clone(),
        };

        let tags_file = project.join("tags");
        if !tags_file.exists() {
            return "No tags file found. Run `ctags -R` in your project directory first."
                .to_string();
        }
        debug!("◆ SCANNING: {:?}", tags_file);

        let content = match tokio::fs::read(&tags_file).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                self.logger.log(
                    "ctags_error",
                    json!({
                        "action": "SYMBOL_SEARCH",
                        "tags_file": tags_file,
                        "symbol": symbol,
                        "error": e.to_string(),
                    }),
                );
                return format!("Error reading tags file: {}", e);
            }
        };

        let results = matching_tags(&content, symbol, self.max_results);
        if results.is_empty() {
            return format!("No symbols matching '{}' found.", symbol);
        }
        self.log_hits(&tags_file, symbol, results.len());
        format!(
            "[ctags symbol search for '{}']\n{}",
            symbol,
            results.join("\n")
        )
    }

    fn log_hits(&self, tags_file: &Path, symbol: &str, count: usize) {
        self.logger.log(
            "symbol_search_ctags",
            json!({
                "action": "SYMBOL_SEARCH",
                "tags_file": tags_file,
                "symbol": symbol,
                "result_count": count,
            }),
        );
    }
}

/// Up to `max` trimmed lines of `tags` containing `symbol`
fn matching_tags<'a>(tags: &'a str, symbol: &str, max: usize) -> Vec<&'a str> {
    tags.lines()
        .filter(|line| line.contains(symbol))
        .map(str::trim)
        .take(max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_lines_reports_clipping() {
        assert_eq!(first_lines("a\nb\nc\n", 2), (vec!["a", "b"], true));
        assert_eq!(first_lines("a\nb\n", 2), (vec!["a", "b"], false));
        assert_eq!(first_lines("", 5), (Vec::<&str>::new(), false));
    }

    #[test]
    fn test_matching_tags_caps_results() {
        let tags = "!_TAG_FILE_FORMAT\t2\nparse\tsrc/a.rs\t/^fn parse/\nparse_all\tsrc/b.rs\t/^fn parse_all/\nrender\tsrc/c.rs\t/^fn render/\n";
        assert_eq!(
            matching_tags(tags, "parse", 10),
            vec![
                "parse\tsrc/a.rs\t/^fn parse/",
                "parse_all\tsrc/b.rs\t/^fn parse_all/"
            ]
        );
        assert_eq!(matching_tags(tags, "parse", 1).len(), 1);
        assert!(matching_tags(tags, "missing", 10).is_empty());
    }
}
