use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub mod rollback;
pub mod store;

pub use rollback::{EntryRollback, RunRollback};

/// Sentinel before-state recorded when the target did not exist.
pub const BEFORE_ABSENT: &str = "null";

pub const ROLLBACK_ID_PREFIX: &str = "rollback-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    FileCreate,
    FileModify,
    FileDelete,
    DirectoryCreate,
    TerminalCommand,
    BrowserAction,
    EmailSend,
    CalendarEvent,
    ChatMessage,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FileCreate => "file_create",
            Self::FileModify => "file_modify",
            Self::FileDelete => "file_delete",
            Self::DirectoryCreate => "directory_create",
            Self::TerminalCommand => "terminal_command",
            Self::BrowserAction => "browser_action",
            Self::EmailSend => "email_send",
            Self::CalendarEvent => "calendar_event",
            Self::ChatMessage => "chat_message",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct JournalEntry {
    pub id: String,
    pub timestamp: String,
    pub run_id: String,
    pub action: ActionKind,
    pub target: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub reversible: bool,
    pub rolled_back: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl JournalEntry {
    pub fn is_rollback_record(&self) -> bool {
        self.id.starts_with(ROLLBACK_ID_PREFIX)
    }

    pub fn backup_path(&self) -> Option<PathBuf> {
        self.metadata.get("backup_path").map(PathBuf::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalSummary {
    pub run_id: String,
    pub total: usize,
    pub reversible: usize,
    pub rolled_back: usize,
    pub by_action: BTreeMap<String, usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("failed to create journal path {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid journal record in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("journal entry `{entry_id}` not found in run `{run_id}`")]
    EntryNotFound { entry_id: String, run_id: String },
    #[error("journal entry `{entry_id}` is not reversible")]
    NotReversible { entry_id: String },
    #[error("journal entry `{entry_id}` was already rolled back")]
    AlreadyRolledBack { entry_id: String },
    #[error("journal entry `{entry_id}` has no recoverable before-state")]
    MissingRecoveryState { entry_id: String },
    #[error("rollback of `{entry_id}` failed: {reason}")]
    RollbackFailed { entry_id: String, reason: String },
}

/// Per-run undoable action log. Every reversible effect carries either an
/// inline before-state or a backup artifact referenced from metadata; the
/// artifact is never pruned while the owning journal references it.
#[derive(Debug, Clone)]
pub struct Journal {
    journal_dir: PathBuf,
    backups_dir: PathBuf,
}

impl Journal {
    pub fn new(journal_dir: &Path, backups_dir: &Path) -> Self {
        Self {
            journal_dir: journal_dir.to_path_buf(),
            backups_dir: backups_dir.to_path_buf(),
        }
    }

    pub fn journal_dir(&self) -> &Path {
        &self.journal_dir
    }

    pub fn backups_dir(&self) -> &Path {
        &self.backups_dir
    }

    pub fn record_file_create(
        &self,
        run_id: &str,
        path: &Path,
        content: &str,
    ) -> Result<JournalEntry, JournalError> {
        let entry = self.new_entry(
            run_id,
            ActionKind::FileCreate,
            &path.display().to_string(),
            format!("created file {}", path.display()),
        )?;
        let entry = JournalEntry {
            before: Some(BEFORE_ABSENT.to_string()),
            after: Some(content.to_string()),
            reversible: true,
            ..entry
        };
        store::append_entry(&self.journal_dir, run_id, &entry)?;
        Ok(entry)
    }

    pub fn record_file_modify(
        &self,
        run_id: &str,
        path: &Path,
        before: &str,
        after: &str,
        description: &str,
    ) -> Result<JournalEntry, JournalError> {
        let mut entry = self.new_entry(
            run_id,
            ActionKind::FileModify,
            &path.display().to_string(),
            description.to_string(),
        )?;
        let backup = self.write_backup(&entry.id, path, before)?;
        entry.before = Some(before.to_string());
        entry.after = Some(after.to_string());
        entry.reversible = true;
        entry
            .metadata
            .insert("backup_path".to_string(), backup.display().to_string());
        store::append_entry(&self.journal_dir, run_id, &entry)?;
        Ok(entry)
    }

    pub fn record_file_delete(
        &self,
        run_id: &str,
        path: &Path,
        before: &str,
    ) -> Result<JournalEntry, JournalError> {
        let mut entry = self.new_entry(
            run_id,
            ActionKind::FileDelete,
            &path.display().to_string(),
            format!("deleted file {}", path.display()),
        )?;
        let backup = self.write_backup(&entry.id, path, before)?;
        entry.before = Some(before.to_string());
        entry.reversible = true;
        entry
            .metadata
            .insert("backup_path".to_string(), backup.display().to_string());
        store::append_entry(&self.journal_dir, run_id, &entry)?;
        Ok(entry)
    }

    pub fn record_directory_create(
        &self,
        run_id: &str,
        path: &Path,
    ) -> Result<JournalEntry, JournalError> {
        let entry = self.new_entry(
            run_id,
            ActionKind::DirectoryCreate,
            &path.display().to_string(),
            format!("created directory {}", path.display()),
        )?;
        let entry = JournalEntry {
            before: Some(BEFORE_ABSENT.to_string()),
            reversible: true,
            ..entry
        };
        store::append_entry(&self.journal_dir, run_id, &entry)?;
        Ok(entry)
    }

    pub fn record_terminal_command(
        &self,
        run_id: &str,
        command: &str,
        output: &str,
    ) -> Result<JournalEntry, JournalError> {
        let mut entry = self.new_entry(
            run_id,
            ActionKind::TerminalCommand,
            command,
            format!("ran terminal command `{command}`"),
        )?;
        entry.command = Some(command.to_string());
        entry.after = Some(output.to_string());
        store::append_entry(&self.journal_dir, run_id, &entry)?;
        Ok(entry)
    }

    pub fn record_email_send(
        &self,
        run_id: &str,
        to: &str,
        subject: &str,
    ) -> Result<JournalEntry, JournalError> {
        let entry = self.new_entry(
            run_id,
            ActionKind::EmailSend,
            to,
            format!("sent email to {to}: {subject}"),
        )?;
        store::append_entry(&self.journal_dir, run_id, &entry)?;
        Ok(entry)
    }

    pub fn record_calendar_event(
        &self,
        run_id: &str,
        title: &str,
    ) -> Result<JournalEntry, JournalError> {
        let entry = self.new_entry(
            run_id,
            ActionKind::CalendarEvent,
            title,
            format!("created calendar event `{title}`"),
        )?;
        store::append_entry(&self.journal_dir, run_id, &entry)?;
        Ok(entry)
    }

    pub fn record_chat_message(
        &self,
        run_id: &str,
        recipient: &str,
    ) -> Result<JournalEntry, JournalError> {
        let entry = self.new_entry(
            run_id,
            ActionKind::ChatMessage,
            recipient,
            format!("sent chat message to {recipient}"),
        )?;
        store::append_entry(&self.journal_dir, run_id, &entry)?;
        Ok(entry)
    }

    pub fn record_browser_action(
        &self,
        run_id: &str,
        description: &str,
    ) -> Result<JournalEntry, JournalError> {
        let entry = self.new_entry(
            run_id,
            ActionKind::BrowserAction,
            description,
            description.to_string(),
        )?;
        store::append_entry(&self.journal_dir, run_id, &entry)?;
        Ok(entry)
    }

    pub fn entries(&self, run_id: &str) -> Result<Vec<JournalEntry>, JournalError> {
        store::load_entries(&self.journal_dir, run_id)
    }

    pub fn list_runs(&self) -> Result<Vec<String>, JournalError> {
        store::list_runs(&self.journal_dir)
    }

    pub fn summary(&self, run_id: &str) -> Result<JournalSummary, JournalError> {
        let entries = self.entries(run_id)?;
        let mut by_action = BTreeMap::new();
        let mut reversible = 0;
        let mut rolled_back = 0;
        for entry in &entries {
            *by_action
                .entry(entry.action.as_str().to_string())
                .or_insert(0) += 1;
            if entry.reversible {
                reversible += 1;
            }
            if entry.rolled_back {
                rolled_back += 1;
            }
        }
        Ok(JournalSummary {
            run_id: run_id.to_string(),
            total: entries.len(),
            reversible,
            rolled_back,
            by_action,
        })
    }

    pub fn rollback_entry(&self, run_id: &str, entry_id: &str) -> Result<(), JournalError> {
        rollback::rollback_entry(self, run_id, entry_id)
    }

    pub fn rollback_run(&self, run_id: &str) -> Result<RunRollback, JournalError> {
        rollback::rollback_run(self, run_id)
    }

    fn new_entry(
        &self,
        run_id: &str,
        action: ActionKind,
        target: &str,
        description: String,
    ) -> Result<JournalEntry, JournalError> {
        let id = store::next_entry_id(&self.journal_dir, run_id)?;
        Ok(JournalEntry {
            id,
            timestamp: chrono::Utc::now().to_rfc3339(),
            run_id: run_id.to_string(),
            action,
            target: target.to_string(),
            description,
            before: None,
            after: None,
            command: None,
            reversible: false,
            rolled_back: false,
            metadata: BTreeMap::new(),
        })
    }

    fn write_backup(
        &self,
        entry_id: &str,
        original: &Path,
        content: &str,
    ) -> Result<PathBuf, JournalError> {
        std::fs::create_dir_all(&self.backups_dir).map_err(|err| JournalError::CreateDir {
            path: self.backups_dir.display().to_string(),
            source: err,
        })?;
        let basename = original
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or("artifact");
        let backup = self.backups_dir.join(format!("{entry_id}-{basename}"));
        std::fs::write(&backup, content).map_err(|err| io_error(&backup, err))?;
        Ok(backup)
    }
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> JournalError {
    JournalError::Io {
        path: path.display().to_string(),
        source,
    }
}
