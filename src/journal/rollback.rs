use super::store;
use super::{
    ActionKind, Journal, JournalEntry, JournalError, BEFORE_ABSENT, ROLLBACK_ID_PREFIX,
};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryRollback {
    pub entry_id: String,
    pub success: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRollback {
    pub run_id: String,
    pub attempted: usize,
    pub results: Vec<EntryRollback>,
    pub success: bool,
}

/// Restores a single entry. Guards: unknown entry, non-reversible entry
/// and already-rolled-back entry all fail without touching the
/// filesystem. Success appends a synthetic `rollback-<id>` record and
/// marks the original.
pub fn rollback_entry(
    journal: &Journal,
    run_id: &str,
    entry_id: &str,
) -> Result<(), JournalError> {
    let mut entries = journal.entries(run_id)?;
    let position = entries
        .iter()
        .position(|entry| entry.id == entry_id)
        .ok_or_else(|| JournalError::EntryNotFound {
            entry_id: entry_id.to_string(),
            run_id: run_id.to_string(),
        })?;

    let entry = entries[position].clone();
    if entry.is_rollback_record() || !entry.reversible {
        return Err(JournalError::NotReversible {
            entry_id: entry_id.to_string(),
        });
    }
    if entry.rolled_back {
        return Err(JournalError::AlreadyRolledBack {
            entry_id: entry_id.to_string(),
        });
    }

    restore(&entry)?;

    entries[position].rolled_back = true;
    entries.push(synthetic_record(&entry));
    store::rewrite_entries(journal.journal_dir(), run_id, &entries)
}

/// Walks the run's entries in reverse insertion order, attempting each
/// reversible, not-yet-rolled-back entry. Synthetic rollback records are
/// skipped. Per-entry failures are collected, never thrown; overall
/// success requires every attempted rollback to succeed.
pub fn rollback_run(journal: &Journal, run_id: &str) -> Result<RunRollback, JournalError> {
    let entries = journal.entries(run_id)?;
    let mut results = Vec::new();
    let mut attempted = 0;

    for entry in entries.iter().rev() {
        if entry.is_rollback_record() || !entry.reversible || entry.rolled_back {
            continue;
        }
        attempted += 1;
        match rollback_entry(journal, run_id, &entry.id) {
            Ok(()) => results.push(EntryRollback {
                entry_id: entry.id.clone(),
                success: true,
                detail: format!("restored {}", entry.target),
            }),
            Err(err) => results.push(EntryRollback {
                entry_id: entry.id.clone(),
                success: false,
                detail: err.to_string(),
            }),
        }
    }

    let success = results.iter().all(|result| result.success);
    Ok(RunRollback {
        run_id: run_id.to_string(),
        attempted,
        results,
        success,
    })
}

fn restore(entry: &JournalEntry) -> Result<(), JournalError> {
    let target = Path::new(&entry.target);
    match entry.action {
        ActionKind::FileCreate => match fs::remove_file(target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(rollback_failed(entry, &err.to_string())),
        },
        ActionKind::FileModify => {
            let content = recover_before_state(entry)?;
            write_restored(entry, target, &content)
        }
        ActionKind::FileDelete => {
            let content = recover_before_state(entry)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| rollback_failed(entry, &err.to_string()))?;
            }
            write_restored(entry, target, &content)
        }
        ActionKind::DirectoryCreate => fs::remove_dir(target)
            .map_err(|err| rollback_failed(entry, &format!("directory not removed: {err}"))),
        _ => Err(JournalError::NotReversible {
            entry_id: entry.id.clone(),
        }),
    }
}

/// The backup artifact is preferred over the inline before-state; the
/// inline copy is the fallback when the artifact is gone.
fn recover_before_state(entry: &JournalEntry) -> Result<String, JournalError> {
    if let Some(backup) = entry.backup_path() {
        if backup.is_file() {
            return fs::read_to_string(&backup)
                .map_err(|err| rollback_failed(entry, &err.to_string()));
        }
    }
    match &entry.before {
        Some(before) if before != BEFORE_ABSENT => Ok(before.clone()),
        _ => Err(JournalError::MissingRecoveryState {
            entry_id: entry.id.clone(),
        }),
    }
}

fn write_restored(
    entry: &JournalEntry,
    target: &Path,
    content: &str,
) -> Result<(), JournalError> {
    fs::write(target, content).map_err(|err| rollback_failed(entry, &err.to_string()))
}

fn synthetic_record(original: &JournalEntry) -> JournalEntry {
    JournalEntry {
        id: format!("{ROLLBACK_ID_PREFIX}{}", original.id),
        timestamp: chrono::Utc::now().to_rfc3339(),
        run_id: original.run_id.clone(),
        action: original.action,
        target: original.target.clone(),
        description: format!("rolled back {}", original.description),
        before: None,
        after: None,
        command: None,
        reversible: false,
        rolled_back: false,
        metadata: Default::default(),
    }
}

fn rollback_failed(entry: &JournalEntry, reason: &str) -> JournalError {
    JournalError::RollbackFailed {
        entry_id: entry.id.clone(),
        reason: reason.to_string(),
    }
}
