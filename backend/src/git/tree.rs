//! Working tree listings

use std::fs;
use std::io;
use std::path::Path;

use crate::models::file_node::FileNode;

const GIT_DIR: &str = ".git";

/// Recursively list the children of `dir`, sorted by name, skipping `.git`
///
/// File contents are not loaded.
pub fn children(dir: &Path) -> io::Result<Vec<FileNode>> {
    let mut nodes = Vec::new();
    for entry in sorted_entries(dir)? {
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_dir() {
            nodes.push(FileNode::folder(&name, children(&entry.path())?));
        } else {
            nodes.push(FileNode::file(&name, None));
        }
    }
    Ok(nodes)
}

/// Names of the immediate subdirectories of `dir`, sorted, skipping `.git`
pub fn subfolders(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in sorted_entries(dir)? {
        if entry.file_type()?.is_dir() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    Ok(names)
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<fs::DirEntry>> {
    let mut entries = fs::read_dir(dir)?
        .filter(|e| e.as_ref().map(|e| e.file_name() != GIT_DIR).unwrap_or(true))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}
