//! Repository tree models

use serde::{Deserialize, Serialize};

/// Kind of a node in a repository tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
    /// The requested path does not exist
    Missing,
    /// The path could not be read
    Error,
}

/// A file or folder in a repository branch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: NodeKind,

    /// File content, present only when explicitly read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}

impl FileNode {
    pub fn file(name: &str, content: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            kind: NodeKind::File,
            content,
            children: Vec::new(),
        }
    }

    pub fn folder(name: &str, children: Vec<FileNode>) -> Self {
        Self {
            name: name.to_string(),
            kind: NodeKind::Folder,
            content: None,
            children,
        }
    }

    /// Placeholder for a path that does not exist
    pub fn missing(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: NodeKind::Missing,
            content: Some("# File or folder not found".to_string()),
            children: Vec::new(),
        }
    }

    pub fn error(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: NodeKind::Error,
            content: Some(message.to_string()),
            children: Vec::new(),
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Relative paths of all files below this node, depth first
    pub fn file_paths(&self) -> Vec<String> {
        fn walk(node: &FileNode, prefix: &str, out: &mut Vec<String>) {
            for child in &node.children {
                let path = if prefix.is_empty() {
                    child.name.clone()
                } else {
                    format!("{}/{}", prefix, child.name)
                };
                match child.kind {
                    NodeKind::File => out.push(path),
                    NodeKind::Folder => walk(child, &path, out),
                    _ => {}
                }
            }
        }

        let mut out = Vec::new();
        walk(self, "", &mut out);
        out
    }
}
