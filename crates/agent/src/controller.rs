//! Session controller - routes each operator message
//!
//! Order of precedence for one message: PIN unlock, trust toggles, direct
//! reads, symbol lookups and backup listings, pending-action resolution,
//! secret-store phrases, queued tasks, explicit `/action` commands, then chat.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use omnigate_config::Config;
use omnigate_eventlog::EventLogger;
use omnigate_provider::{ChatCompleter, ChatMessage};
use omnigate_session::{ActionKind, SessionContext};
use omnigate_tasks::{ActionRequest, TaskQueue};
use omnigate_vault::{is_valid_pin, SecretVault};

use crate::gate::ApprovalGate;
use crate::handlers::secret::GITHUB_PAT;
use crate::handlers::{register_default_handlers, FileReader, HandlerRegistry, SymbolFinder};
use crate::memory::MemoryRecorder;
use crate::util::{snippet, split_chunks, truncate};

/// Longest chunk handed to the front end
pub const CHUNK_CHARS: usize = 500;

/// Turns of history sent with each chat request
const HISTORY_WINDOW: usize = 20;

/// Memories recalled into the system prompt
const RECALL_COUNT: usize = 3;

const TRUST_PHRASES: &[&str] = &["trust session", "enable global approval", "approve all"];
const LOCK_PHRASES: &[&str] = &["lock agent", "revoke global approval", "disable trust"];
const READ_PREFIXES: &[&str] = &["view file", "show file", "read file", "cat "];
const BACKUP_PREFIXES: &[&str] = &["list backups", "show backups"];
const SYMBOL_PREFIXES: &[&str] = &["find symbol ", "symbol search "];
const PAT_PHRASES: &[&str] = &["store my github pat", "add github pat"];
const SECRET_PREFIX: &str = "store secret ";
const ACTION_PREFIX: &str = "/action ";

/// Ordered reply chunks for one message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub chunks: Vec<String>,
}

impl Response {
    fn single(text: impl AsRef<str>) -> Self {
        let mut response = Self::default();
        response.push(text);
        response
    }

    /// Append `text`, split into front-end sized chunks
    pub fn push(&mut self, text: impl AsRef<str>) {
        self.chunks.extend(split_chunks(text.as_ref(), CHUNK_CHARS));
    }

    /// Chunks joined back together
    pub fn text(&self) -> String {
        self.chunks.concat()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Text after the first matching prefix, when `lowered` starts with one
fn strip_prefix<'a>(original: &'a str, lowered: &str, prefixes: &[&str]) -> Option<&'a str> {
    prefixes
        .iter()
        .find(|p| lowered.starts_with(*p))
        .map(|p| original.get(p.len()..).unwrap_or("").trim())
}

pub struct SessionController {
    gate: ApprovalGate,
    reader: FileReader,
    symbols: SymbolFinder,
    vault: SecretVault,
    tasks: TaskQueue,
    completer: Option<Arc<dyn ChatCompleter>>,
    memory: Option<MemoryRecorder>,
    logger: EventLogger,
}

impl SessionController {
    /// Controller with every built-in handler, configured from `config`
    pub fn new(config: &Config, logger: &EventLogger, vault: SecretVault) -> Self {
        let mut registry = HandlerRegistry::new();
        register_default_handlers(&mut registry, config, logger, &vault);
        Self::with_registry(registry, config, logger, vault)
    }

    /// Controller over a caller-built registry
    pub fn with_registry(
        registry: HandlerRegistry,
        config: &Config,
        logger: &EventLogger,
        vault: SecretVault,
    ) -> Self {
        Self {
            gate: ApprovalGate::new(registry, logger),
            reader: FileReader::new(config.allowed_root(), logger),
            symbols: SymbolFinder::new(config.allowed_root(), &config.policy.tools, logger),
            vault,
            tasks: TaskQueue::new(logger),
            completer: None,
            memory: None,
            logger: logger.scoped(["input"]),
        }
    }

    /// Logger and vault from the config's `logging` and `vault` sections
    pub fn from_config(config: &Config) -> Self {
        let logger = EventLogger::from_config(config);
        let vault = SecretVault::from_config(config, &logger);
        Self::new(config, &logger, vault)
    }

    pub fn with_completer(mut self, completer: Arc<dyn ChatCompleter>) -> Self {
        self.completer = Some(completer);
        self
    }

    pub fn with_memory(mut self, memory: MemoryRecorder) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut TaskQueue {
        &mut self.tasks
    }

    /// Queue `request` to be proposed before the next conversational turn
    pub fn schedule(&mut self, request: ActionRequest, priority: i64) -> u64 {
        self.tasks.add_task(request, priority)
    }

    /// Propose `request` through the gate
    pub async fn handle_action(
        &self,
        request: ActionRequest,
        session: &mut SessionContext,
    ) -> String {
        self.gate.propose(request.kind, request.params, session).await
    }

    /// Process one operator message
    pub async fn handle_message(&mut self, text: &str, session: &mut SessionContext) -> Response {
        let trimmed = text.trim();
        if !session.is_unlocked() {
            return self.unlock(trimmed, session);
        }

        let lowered = trimmed.to_lowercase();

        if TRUST_PHRASES.contains(&lowered.as_str()) {
            session.enable_trust();
            self.logger
                .log("global_approval", json!({"session_id": session.id, "status": "enabled"}));
            return Response::single(
                "◆ GLOBAL APPROVAL ENABLED. No more confirmation prompts this session.",
            );
        }
        if LOCK_PHRASES.contains(&lowered.as_str()) {
            session.revoke_trust();
            self.logger
                .log("global_approval", json!({"session_id": session.id, "status": "revoked"}));
            return Response::single(
                "◆ GLOBAL APPROVAL DISABLED. Manual approvals required again.",
            );
        }

        if let Some(path) = strip_prefix(trimmed, &lowered, READ_PREFIXES) {
            return Response::single(self.reader.read(path).await);
        }
        if let Some(query) = strip_prefix(trimmed, &lowered, SYMBOL_PREFIXES) {
            let (symbol, project) = match query.split_once(" in ") {
                Some((symbol, project)) => (symbol, Some(project)),
                None => (query, None),
            };
            return Response::single(self.symbols.find(symbol, project).await);
        }
        if let Some(target) = strip_prefix(trimmed, &lowered, BACKUP_PREFIXES) {
            if target.is_empty() {
                return Response::single("Please specify a file path to list backups for.");
            }
            let reply = self
                .gate
                .propose(ActionKind::BackupRestore, json!({"target": target}), session)
                .await;
            return Response::single(reply);
        }

        if let Some(reply) = self.gate.resolve_next(trimmed, session).await {
            return Response::single(reply);
        }

        if let Some(name) = self.secret_request(trimmed, &lowered) {
            let reply = self
                .gate
                .propose(ActionKind::SecretStore, json!({"name": name}), session)
                .await;
            return Response::single(reply);
        }

        let mut response = Response::default();
        self.drain_tasks(session, &mut response).await;

        if let Some(command) = strip_prefix(trimmed, &lowered, &[ACTION_PREFIX]) {
            response.push(self.explicit_action(command, session).await);
            return response;
        }

        response.push(self.chat(trimmed, session).await);
        response
    }

    fn unlock(&self, message: &str, session: &mut SessionContext) -> Response {
        let pin = match message.get(..4) {
            Some(head) if head.eq_ignore_ascii_case("pin:") => message[4..].trim(),
            _ => message,
        };
        if !is_valid_pin(pin) {
            return Response::single("◆ Enter your 5-6 digit PIN:");
        }

        match self.vault.load_vault(pin) {
            Ok(_) => {
                session.unlock(pin);
                self.logger
                    .log("session_unlocked", json!({"session_id": session.id}));
                Response::single("◆ PIN accepted! Vault unlocked.")
            }
            Err(e) => {
                debug!("unlock failed: {}", e);
                self.logger.log(
                    "session_unlock_failed",
                    json!({"session_id": session.id, "error": e.to_string()}),
                );
                Response::single("◆ Incorrect PIN. Try again.")
            }
        }
    }

    fn secret_request(&self, original: &str, lowered: &str) -> Option<String> {
        if PAT_PHRASES.iter().any(|p| lowered.contains(p)) {
            return Some(GITHUB_PAT.to_string());
        }
        strip_prefix(original, lowered, &[SECRET_PREFIX])
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    /// Propose every queued task; a failing task is logged and skipped
    async fn drain_tasks(&mut self, session: &mut SessionContext, response: &mut Response) {
        while let Some(task) = self.tasks.next_task() {
            let kind = task.request.kind;
            response.push(format!("◆ RUNNING QUEUED TASK: {}", kind));

            if !self.gate.registry().has(kind) {
                self.logger.log(
                    "task_error",
                    json!({"action": kind, "error": "no handler", "params": task.request.params}),
                );
                response.push(format!("◆ TASK {} FAILED: no handler", kind));
                continue;
            }

            let output = self
                .gate
                .propose(kind, task.request.params, session)
                .await;
            self.logger.log(
                "task_run",
                json!({
                    "action": kind,
                    "priority": task.priority,
                    "summary": truncate(&output, 200),
                }),
            );
            response.push(output);
        }
    }

    async fn explicit_action(&self, command: &str, session: &mut SessionContext) -> String {
        let (name, rest) = command
            .split_once(char::is_whitespace)
            .unwrap_or((command, ""));
        let kind: ActionKind = match name.parse() {
            Ok(kind) => kind,
            Err(e) => return format!("◆ {}", e),
        };
        let params = if rest.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str::<Value>(rest) {
                Ok(params) => params,
                Err(e) => return format!("◆ INVALID PARAMETERS: {}", e),
            }
        };
        self.gate.propose(kind, params, session).await
    }

    fn system_prompt(&self, recalled: &[String]) -> String {
        let actions: Vec<String> = self
            .gate
            .registry()
            .definitions()
            .iter()
            .map(|d| {
                format!(
                    "- {}: {}",
                    d["name"].as_str().unwrap_or_default(),
                    d["description"].as_str().unwrap_or_default()
                )
            })
            .collect();

        let mut prompt = format!(
            "You are an operations co-pilot. Side-effecting actions run only after \
             the operator approves them, and secrets live in the vault only.\n\n\
             Available actions:\n{}",
            actions.join("\n")
        );
        if !recalled.is_empty() {
            prompt.push_str("\n\nRelevant memories:\n");
            prompt.push_str(&recalled.join("\n"));
        }
        prompt
    }

    async fn recall(&self, text: &str, session: &SessionContext) -> Vec<String> {
        let Some(memory) = &self.memory else {
            return Vec::new();
        };
        let stored = match memory.remember(text, "general", &["user"], &session.id).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("memory store failed: {}", e);
                self.logger
                    .log("memory_error", json!({"stage": "store", "error": e.to_string()}));
                None
            }
        };
        match memory.recall(text, None, RECALL_COUNT + 1).await {
            Ok(found) => found
                .into_iter()
                .filter(|r| stored.as_deref() != Some(r.id.as_str()))
                .take(RECALL_COUNT)
                .map(|r| format!("- {}", snippet(&r.document, 200)))
                .collect(),
            Err(e) => {
                warn!("memory recall failed: {}", e);
                self.logger
                    .log("memory_error", json!({"stage": "recall", "error": e.to_string()}));
                Vec::new()
            }
        }
    }

    async fn chat(&self, text: &str, session: &mut SessionContext) -> String {
        let Some(completer) = &self.completer else {
            return "◆ NO CHAT MODEL CONFIGURED. Use /action <kind> <json> to propose an action."
                .to_string();
        };

        let recalled = self.recall(text, session).await;
        let mut messages = vec![ChatMessage::system(self.system_prompt(&recalled))];
        messages.extend(session.history(HISTORY_WINDOW));
        messages.push(ChatMessage::user(text));

        match completer.complete(messages).await {
            Ok(reply) => {
                session.add_message("user", text);
                session.add_message("assistant", reply.clone());
                self.logger.log(
                    "agent_response",
                    json!({"input": text, "output": truncate(&reply, 500)}),
                );
                info!("chat reply of {} chars", reply.chars().count());
                reply
            }
            Err(e) => {
                warn!("chat completion failed: {}", e);
                self.logger
                    .log("agent_error", json!({"input": text, "error": e.to_string()}));
                format!("◆ AGENT ERROR: {}", e)
            }
        }
    }
}
