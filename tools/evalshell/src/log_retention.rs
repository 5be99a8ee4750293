use crate::errors::ShellError;
use std::fs;
use std::path::{Path, PathBuf};

/// Deletes the oldest `<stem>*.jsonl` files in `dir` until those files fit in
/// `budget_bytes`. Other files in `dir` are neither counted nor touched.
/// Returns the deleted paths, oldest first.
pub fn enforce_total_budget(
    dir: &Path,
    stem: &str,
    budget_bytes: u64,
) -> Result<Vec<PathBuf>, ShellError> {
    let mut files = fs::read_dir(dir)
        .map_err(|e| ShellError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_session_log(path, stem))
        .collect::<Vec<_>>();

    files.sort_by_key(|path| fs::metadata(path).ok().and_then(|m| m.modified().ok()));

    let mut total = files
        .iter()
        .filter_map(|path| fs::metadata(path).ok().map(|meta| meta.len()))
        .sum::<u64>();

    let mut deleted = Vec::new();
    for path in files {
        if total <= budget_bytes {
            break;
        }
        let len = fs::metadata(&path)
            .map_err(|e| ShellError::Io(e.to_string()))?
            .len();
        fs::remove_file(&path).map_err(|e| ShellError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

fn is_session_log(path: &Path, stem: &str) -> bool {
    let has_extension = path.extension().is_some_and(|ext| ext == "jsonl");
    let shares_stem = path
        .file_stem()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(stem));
    has_extension && shares_stem
}
