//! Omnigate command implementations

use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::io::{IsTerminal, Write};
use std::path::Path;
use tracing::{debug, info};

use omnigate_agent::SessionController;
use omnigate_config::{self, Config};
use omnigate_eventlog::EventLogger;
use omnigate_session::{ActionKind, SessionContext};
use omnigate_tasks::{ActionRequest, TaskQueue};
use omnigate_vault::{is_valid_pin, SecretVault};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Read one trimmed line from stdin; `None` at end of input
fn read_line() -> Result<Option<String>> {
    let mut input = String::new();
    let read = std::io::stdin()
        .read_line(&mut input)
        .context("failed to read stdin")?;
    if read == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim().to_string()))
}

/// Prompt for hidden input on a terminal, plain lines otherwise
fn read_secret(prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    if std::io::stdin().is_terminal() {
        match rpassword::read_password() {
            Ok(value) => return Ok(Some(value.trim().to_string())),
            Err(e) => debug!("hidden input unavailable: {}", e),
        }
    }
    let line = read_line()?;
    if !std::io::stdin().is_terminal() {
        println!();
    }
    Ok(line)
}

fn prompt_pin(prompt: &str) -> Result<String> {
    let pin = read_secret(prompt)?.context("no PIN provided")?;
    if !is_valid_pin(&pin) {
        bail!("PIN must be 5 or 6 digits");
    }
    Ok(pin)
}

async fn open_vault() -> Result<SecretVault> {
    let config = Config::load().await.context("failed to load config")?;
    let logger = EventLogger::from_config(&config);
    Ok(SecretVault::from_config(&config, &logger))
}

fn mark(path: &Path) -> &'static str {
    if path.exists() {
        "[OK]"
    } else {
        "[Missing]"
    }
}

/// Initialize config and data directory
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing Omnigate");
    println!("{}", RULE);

    let config = omnigate_config::init()
        .await
        .context("failed to initialize config")?;
    println!("✓ Config: {}", omnigate_config::config_path().display());
    println!("✓ Data directory: {}", omnigate_config::data_dir().display());

    let root = config.allowed_root();
    omnigate_config::paths::ensure_dir(&root)
        .await
        .with_context(|| format!("failed to create {}", root.display()))?;
    println!("✓ Actions confined to: {}", root.display());

    println!();
    println!("Run `omnigate chat` and enter a 5-6 digit PIN to open the vault.");
    Ok(())
}

/// Interactive session over the controller
pub async fn chat_command(session_id: String) -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    let mut controller = SessionController::from_config(&config);
    let queue_path = omnigate_config::queue_path();
    controller
        .tasks_mut()
        .load(&queue_path)
        .await
        .context("failed to load task queue")?;

    let mut session = SessionContext::new(session_id.clone());

    println!("◆ OMNIGATE SESSION: {}", session_id);
    println!("{}", RULE);
    if controller.tasks().has_tasks() {
        println!(
            "{} queued task(s) will be proposed once the vault is unlocked.",
            controller.tasks().len()
        );
    }
    println!("Type 'exit' or 'quit' to end the session.");
    println!();

    loop {
        let input = if !session.is_unlocked() {
            read_secret("◆ PIN: ")?
        } else if session.awaits_secret_value() {
            read_secret("◆ Secret value: ")?
        } else {
            print!("◆ ");
            std::io::stdout().flush()?;
            read_line()?
        };

        let Some(input) = input else {
            break;
        };
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let response = controller.handle_message(&input, &mut session).await;
        for chunk in &response.chunks {
            println!("{}", chunk);
        }
        println!();
    }

    controller
        .tasks()
        .save(&queue_path)
        .await
        .context("failed to save task queue")?;
    info!("session {} ended", session_id);
    println!("◆ SESSION ENDED");
    Ok(())
}

/// Store a secret
pub async fn vault_set_command(name: String) -> Result<()> {
    let vault = open_vault().await?;
    let pin = prompt_pin("◆ PIN: ")?;
    let value = read_secret(&format!("◆ Value for {}: ", name))?
        .filter(|v| !v.is_empty())
        .context("no value provided")?;

    vault.set_secret(&name, &value, &pin)?;
    println!("◆ SECRET '{}' STORED SECURELY.", name);
    Ok(())
}

/// Print a secret to stdout
pub async fn vault_get_command(name: String, archived: bool, index: usize) -> Result<()> {
    let vault = open_vault().await?;
    let pin = prompt_pin("◆ PIN: ")?;

    match vault.get_secret(&name, &pin, archived, index)? {
        Some(value) => println!("{}", value),
        None if archived => bail!("no archived version {} of '{}'", index, name),
        None => bail!("secret '{}' not found", name),
    }
    Ok(())
}

/// List archived versions
pub async fn vault_history_command(name: String) -> Result<()> {
    let vault = open_vault().await?;
    let pin = prompt_pin("◆ PIN: ")?;

    let archive = vault.archive_list(&name, &pin)?;
    if archive.is_empty() {
        println!("No archived versions of '{}'", name);
        return Ok(());
    }

    println!("◆ HISTORY: {}", name);
    println!("{}", RULE);
    for (i, entry) in archive.iter().enumerate() {
        println!("  [{}] {}", i, entry.timestamp);
    }
    Ok(())
}

/// Make an archived version current
pub async fn vault_restore_command(name: String, index: usize) -> Result<()> {
    let vault = open_vault().await?;
    let pin = prompt_pin("◆ PIN: ")?;

    vault.restore_secret(&name, &pin, index)?;
    println!("◆ SECRET '{}' RESTORED FROM VERSION {}.", name, index);
    Ok(())
}

/// Tombstone a secret
pub async fn vault_delete_command(name: String, erase_archive: bool) -> Result<()> {
    let vault = open_vault().await?;
    let pin = prompt_pin("◆ PIN: ")?;

    vault.delete_secret(&name, &pin, erase_archive)?;
    if erase_archive {
        println!("◆ SECRET '{}' AND ITS HISTORY DELETED.", name);
    } else {
        println!("◆ SECRET '{}' DELETED. History kept.", name);
    }
    Ok(())
}

/// Re-encrypt under a new PIN
pub async fn vault_change_pin_command() -> Result<()> {
    let vault = open_vault().await?;
    let old_pin = prompt_pin("◆ Current PIN: ")?;
    let new_pin = prompt_pin("◆ New PIN: ")?;
    let confirm = prompt_pin("◆ Confirm new PIN: ")?;
    if new_pin != confirm {
        bail!("new PINs do not match");
    }

    vault.change_pin(&old_pin, &new_pin)?;
    println!("◆ PIN CHANGED.");
    Ok(())
}

/// Show the most recent events
pub async fn log_tail_command(rows: usize) -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    let logger = EventLogger::from_config(&config);

    let timeline = logger
        .read_timeline(rows)
        .context("failed to read event log")?;
    if timeline.is_empty() {
        println!("No events recorded");
        return Ok(());
    }

    println!("◆ EVENT TIMELINE");
    println!("{}", RULE);
    for row in timeline {
        println!(
            "{}  {:<26} {:<30} {}",
            row.timestamp, row.action, row.target, row.summary
        );
    }
    Ok(())
}

/// Move the current log aside
pub async fn log_rotate_command() -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    let logger = EventLogger::from_config(&config);

    match logger.rotate().context("failed to rotate event log")? {
        Some(rotated) => println!("✓ Log rotated to {}", rotated.display()),
        None => println!("No event log to rotate"),
    }
    Ok(())
}

/// Queue an action request
pub async fn task_add_command(kind: String, params: String, priority: i64) -> Result<()> {
    let kind: ActionKind = kind.parse()?;
    let params: Value =
        serde_json::from_str(&params).context("parameters must be a JSON object")?;
    if !params.is_object() {
        bail!("parameters must be a JSON object");
    }

    let config = Config::load().await.context("failed to load config")?;
    let logger = EventLogger::from_config(&config);
    let path = omnigate_config::queue_path();

    let mut queue = TaskQueue::new(&logger);
    queue.load(&path).await.context("failed to load task queue")?;
    let seq = queue.add_task(ActionRequest::new(kind, params), priority);
    queue.save(&path).await.context("failed to save task queue")?;

    println!(
        "✓ Task {} queued: {} (priority {})",
        seq,
        kind.as_str(),
        priority
    );
    Ok(())
}

/// List queued tasks in run order
pub async fn task_list_command() -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    let logger = EventLogger::from_config(&config);

    let mut queue = TaskQueue::new(&logger);
    queue
        .load(&omnigate_config::queue_path())
        .await
        .context("failed to load task queue")?;

    let tasks = queue.snapshot();
    if tasks.is_empty() {
        println!("No queued tasks");
        return Ok(());
    }

    println!("Queued tasks:");
    for task in tasks {
        println!(
            "  {} - {} (priority {}) {}",
            task.seq,
            task.request.kind.as_str(),
            task.priority,
            task.request.params
        );
    }
    Ok(())
}

/// Show file locations and state
pub async fn status_command() -> Result<()> {
    let config_path = omnigate_config::config_path();
    let config = Config::load().await.context("failed to load config")?;

    println!("◆ OMNIGATE STATUS");
    println!("{}", RULE);
    println!("Config:       {} {}", config_path.display(), mark(&config_path));

    let log_path = config.log_path();
    println!("Event log:    {} {}", log_path.display(), mark(&log_path));

    let vault_path = config.vault_path();
    println!("Vault:        {} {}", vault_path.display(), mark(&vault_path));

    let root = config.allowed_root();
    println!("Allowed root: {} {}", root.display(), mark(&root));

    let queue_path = omnigate_config::queue_path();
    let logger = EventLogger::from_config(&config);
    let mut queue = TaskQueue::new(&logger);
    queue
        .load(&queue_path)
        .await
        .context("failed to load task queue")?;
    println!("Queued tasks: {}", queue.len());

    println!(
        "Versions:     system {} / tagging {}",
        logger.system_version(),
        logger.tagging_version()
    );
    Ok(())
}
