use super::{io_error, JournalEntry, JournalError};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn journal_file(journal_dir: &Path, run_id: &str) -> PathBuf {
    journal_dir.join(format!("{run_id}.jsonl"))
}

pub fn load_entries(journal_dir: &Path, run_id: &str) -> Result<Vec<JournalEntry>, JournalError> {
    let path = journal_file(journal_dir, run_id);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_error(&path, err)),
    };
    let mut entries = Vec::new();
    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let entry: JournalEntry =
            serde_json::from_str(trimmed).map_err(|err| JournalError::Json {
                path: path.display().to_string(),
                source: err,
            })?;
        entries.push(entry);
    }
    Ok(entries)
}

pub fn append_entry(
    journal_dir: &Path,
    run_id: &str,
    entry: &JournalEntry,
) -> Result<(), JournalError> {
    fs::create_dir_all(journal_dir).map_err(|err| JournalError::CreateDir {
        path: journal_dir.display().to_string(),
        source: err,
    })?;
    let path = journal_file(journal_dir, run_id);
    let line = serde_json::to_string(entry).map_err(|err| JournalError::Json {
        path: path.display().to_string(),
        source: err,
    })?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| io_error(&path, err))?;
    writeln!(file, "{line}").map_err(|err| io_error(&path, err))
}

/// Rewrites the whole journal file; used when marking an entry rolled
/// back while appending its synthetic rollback record. The new content
/// is staged in a sibling `.rewrite` file and renamed over the journal,
/// so a crash mid-rewrite can never leave a truncated journal behind.
/// Runs are single-threaded and own their journal file, so the fixed
/// stage name cannot race.
pub fn rewrite_entries(
    journal_dir: &Path,
    run_id: &str,
    entries: &[JournalEntry],
) -> Result<(), JournalError> {
    let path = journal_file(journal_dir, run_id);
    let mut content = String::new();
    for entry in entries {
        let line = serde_json::to_string(entry).map_err(|err| JournalError::Json {
            path: path.display().to_string(),
            source: err,
        })?;
        content.push_str(&line);
        content.push('\n');
    }

    let stage = journal_dir.join(format!("{run_id}.jsonl.rewrite"));
    {
        let mut file = fs::File::create(&stage).map_err(|err| io_error(&stage, err))?;
        file.write_all(content.as_bytes())
            .map_err(|err| io_error(&stage, err))?;
        file.sync_all().map_err(|err| io_error(&stage, err))?;
    }
    fs::rename(&stage, &path).map_err(|err| io_error(&path, err))?;
    flush_dir(journal_dir).map_err(|err| io_error(journal_dir, err))
}

#[cfg(unix)]
fn flush_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn flush_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

pub fn list_runs(journal_dir: &Path) -> Result<Vec<String>, JournalError> {
    let entries = match fs::read_dir(journal_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_error(journal_dir, err)),
    };
    let mut runs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| io_error(journal_dir, err))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(run_id) = name.strip_suffix(".jsonl") {
            runs.push(run_id.to_string());
        }
    }
    runs.sort();
    Ok(runs)
}

/// Entry ids embed the run id and a one-based sequence number so backup
/// artifacts named `<entry-id>-<basename>` never collide across runs.
pub fn next_entry_id(journal_dir: &Path, run_id: &str) -> Result<String, JournalError> {
    let existing = load_entries(journal_dir, run_id)?.len();
    Ok(format!("{run_id}-{:04}", existing + 1))
}
