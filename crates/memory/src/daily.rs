//! Daily notes: one markdown file per day under the memory directory.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};

use janus_domain::Result;

pub fn daily_note_path(memory_dir: &Path, date: NaiveDate) -> PathBuf {
    memory_dir.join(format!("{}.md", date.format("%Y-%m-%d")))
}

pub fn today_note_path(memory_dir: &Path) -> PathBuf {
    daily_note_path(memory_dir, Utc::now().date_naive())
}

/// Append a block to today's note, creating the file (and directory) on
/// first use. Returns the note's path.
pub fn append_daily_note(memory_dir: &Path, block: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(memory_dir)?;
    let path = today_note_path(memory_dir);

    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    let mut text = block.trim_end().to_string();
    text.push('\n');
    if path.metadata().map(|m| m.len() > 0).unwrap_or(false) {
        file.write_all(b"\n")?;
    }
    file.write_all(text.as_bytes())?;
    Ok(path)
}

/// The newest `n` daily notes as (file name, content), newest first.
pub fn recent_daily_notes(memory_dir: &Path, n: usize) -> Vec<(String, String)> {
    let Ok(entries) = std::fs::read_dir(memory_dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|name| is_daily_note_name(name))
        .collect();
    names.sort();
    names.reverse();
    names.truncate(n);

    names
        .into_iter()
        .filter_map(|name| {
            std::fs::read_to_string(memory_dir.join(&name))
                .ok()
                .map(|content| (name, content))
        })
        .collect()
}

fn is_daily_note_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".md") else {
        return false;
    };
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").is_ok()
}
