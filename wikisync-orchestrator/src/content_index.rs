//! Sub-workspace routing index of a main workspace
//!
//! The main workspace keeps a config tiddler whose body holds one filter
//! per tagged sub-workspace, telling the worker to store tiddlers with
//! that tag under the sub-workspace link. Every change to the set of
//! members goes through one [`MembershipChange`] event.

use crate::layout::WorkspaceLayout;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use wikisync_core::{Error, Result};

pub const INDEX_TITLE: &str = "$:/config/FileSystemPaths";
pub const INDEX_FILE_NAME: &str = "$__config_FileSystemPaths.tid";

/// A change to the set of sub-workspaces routed by a main workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MembershipChange {
    Added { tag: String, folder: String },
    Removed { folder: String },
    Retagged { folder: String, tag: String },
}

/// One routed sub-workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub tag: String,
    pub folder: String,
}

#[derive(Debug, Clone, PartialEq)]
enum BodyLine {
    Entry(IndexEntry),
    Other(String),
}

/// Parsed index tiddler: header fields and body lines in file order
#[derive(Debug, Clone, PartialEq)]
struct IndexDocument {
    fields: Vec<String>,
    body: Vec<BodyLine>,
}

/// Reads and rewrites the index tiddler of one main workspace
#[derive(Debug, Clone)]
pub struct SubWorkspaceIndex {
    path: PathBuf,
    link_prefix: String,
}

impl SubWorkspaceIndex {
    pub fn for_main(layout: &WorkspaceLayout, main_root: &Path) -> Self {
        let link_prefix = layout
            .link_folder()
            .strip_prefix(layout.content_folder())
            .unwrap_or_else(|_| layout.link_folder())
            .to_string_lossy()
            .replace('\\', "/");
        Self {
            path: layout.content_path(main_root).join(INDEX_FILE_NAME),
            link_prefix,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Routed sub-workspaces in file order
    pub async fn entries(&self) -> Result<Vec<IndexEntry>> {
        Ok(self
            .load()
            .await?
            .body
            .into_iter()
            .filter_map(|line| match line {
                BodyLine::Entry(entry) => Some(entry),
                BodyLine::Other(_) => None,
            })
            .collect())
    }

    /// Apply `change` and write the index back
    pub async fn apply(&self, change: &MembershipChange) -> Result<()> {
        let mut document = self.load().await?;
        let position = |body: &[BodyLine], folder: &str| {
            body.iter().position(
                |line| matches!(line, BodyLine::Entry(entry) if entry.folder == folder),
            )
        };

        match change {
            MembershipChange::Added { tag, folder } | MembershipChange::Retagged { folder, tag } => {
                if tag.trim().is_empty() {
                    return Err(Error::validation("Sub-workspace tag cannot be empty"));
                }
                let entry = BodyLine::Entry(IndexEntry {
                    tag: tag.clone(),
                    folder: folder.clone(),
                });
                match position(&document.body, folder) {
                    Some(index) => document.body[index] = entry,
                    None => document.body.push(entry),
                }
            }
            MembershipChange::Removed { folder } => {
                document.body.retain(
                    |line| !matches!(line, BodyLine::Entry(entry) if &entry.folder == folder),
                );
            }
        }

        self.save(&document).await?;
        info!(index = %self.path.display(), ?change, "Sub-workspace index updated");
        Ok(())
    }

    async fn load(&self) -> Result<IndexDocument> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(self.parse(&content)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No sub-workspace index at {}", self.path.display());
                Ok(IndexDocument {
                    fields: vec![format!("title: {}", INDEX_TITLE)],
                    body: Vec::new(),
                })
            }
            Err(e) => Err(Error::io("Failed to read index", &self.path, e)),
        }
    }

    async fn save(&self, document: &IndexDocument) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io("Failed to create", parent, e))?;
        }
        let mut content = document.fields.join("\n");
        content.push_str("\n\n");
        for line in &document.body {
            match line {
                BodyLine::Entry(entry) => content.push_str(&self.filter_for(entry)),
                BodyLine::Other(text) => content.push_str(text),
            }
            content.push('\n');
        }
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| Error::io("Failed to write index", &self.path, e))
    }

    fn parse(&self, content: &str) -> IndexDocument {
        let (header, body) = match content.split_once("\n\n") {
            Some((header, body)) => (header, body),
            None => (content, ""),
        };
        IndexDocument {
            fields: header
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(str::to_string)
                .collect(),
            body: body
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| match self.parse_filter(line.trim()) {
                    Some(entry) => BodyLine::Entry(entry),
                    None => BodyLine::Other(line.to_string()),
                })
                .collect(),
        }
    }

    fn filter_for(&self, entry: &IndexEntry) -> String {
        format!(
            "[tag[{}]addprefix[/]addprefix[{}]addprefix[/]addprefix[{}]]",
            entry.tag, entry.folder, self.link_prefix
        )
    }

    fn parse_filter(&self, line: &str) -> Option<IndexEntry> {
        let suffix = format!("]addprefix[/]addprefix[{}]]", self.link_prefix);
        let inner = line.strip_prefix("[tag[")?.strip_suffix(suffix.as_str())?;
        let (tag, folder) = inner.split_once("]addprefix[/]addprefix[")?;
        Some(IndexEntry {
            tag: tag.to_string(),
            folder: folder.to_string(),
        })
    }
}
