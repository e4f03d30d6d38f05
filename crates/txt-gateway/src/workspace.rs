//! Filesystem-backed workspace store.
//!
//! Each workspace is one directory under a fixed root, holding the files the
//! IDE uploaded plus a `.project.json` descriptor. The store only ever
//! creates directories and writes files; nothing is deleted.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::error::GatewayError;

/// Project descriptor stored as `.project.json` inside a workspace.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectDescriptor {
    /// Project name as the IDE shows it.
    pub name: Option<String>,
    /// Project mode, e.g. blockly or python.
    pub mode: Option<String>,
    /// Stable identity the IDE tracks the project by.
    pub uuid: String,
}

/// Resolved workspace metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectInfo {
    /// Workspace name.
    pub name: String,
    /// Absolute-ish path of the workspace directory.
    pub path: String,
    /// Project identity from the descriptor.
    pub uuid: String,
}

/// One entry of a workspace file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceFile {
    /// File name inside the workspace.
    pub name: String,
    /// Full path as the runner would open it.
    pub path: String,
}

/// One uploaded file, already decoded to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Workspace-relative name, possibly with a leading separator.
    pub name: String,
    /// File content.
    pub content: String,
}

/// CRUD over the workspace root directory.
#[derive(Debug, Clone)]
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// A store over `root`; the directory itself is created lazily on the
    /// first upload.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The configured workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read a workspace's `.project.json`. Any I/O or decode failure is
    /// reported as not-found, never raised.
    pub fn project_info(&self, name: &str) -> Result<ProjectInfo, GatewayError> {
        let dir = self.root.join(name);
        let descriptor = dir.join(".project.json");
        let text = std::fs::read_to_string(&descriptor).map_err(|err| {
            debug!(workspace = name, %err, "project read failed");
            GatewayError::WorkspaceNotFound(SmolStr::new(name))
        })?;
        let descriptor: ProjectDescriptor = serde_json::from_str(&text).map_err(|err| {
            warn!(workspace = name, %err, "project descriptor decode failed");
            GatewayError::WorkspaceNotFound(SmolStr::new(name))
        })?;
        Ok(ProjectInfo {
            name: name.to_string(),
            path: dir.display().to_string(),
            uuid: descriptor.uuid,
        })
    }

    /// Flat listing of the files in a workspace.
    pub fn list_files(&self, name: &str) -> Result<Vec<WorkspaceFile>, GatewayError> {
        let dir = self.root.join(name);
        let entries = std::fs::read_dir(&dir).map_err(|err| {
            debug!(workspace = name, %err, "listing failed");
            GatewayError::WorkspaceNotFound(SmolStr::new(name))
        })?;
        let mut files = Vec::new();
        for entry in entries.flatten() {
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            files.push(WorkspaceFile {
                path: dir.join(&file_name).display().to_string(),
                name: file_name,
            });
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Persist uploaded files, creating the workspace and any intermediate
    /// directories as needed. Existing files are overwritten; a leading
    /// separator on a name is treated as workspace-relative and stripped.
    /// Nothing else is normalized, the IDE is trusted not to send `..`.
    pub fn save_files(&self, name: &str, files: &[UploadedFile]) -> Result<(), GatewayError> {
        let base = self.root.join(name);
        std::fs::create_dir_all(&base)
            .map_err(|err| workspace_io(name, "create workspace", &err))?;
        for file in files {
            let relative = file.name.strip_prefix('/').unwrap_or(&file.name);
            let target = base.join(relative);
            debug!(path = %target.display(), "writing");
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| workspace_io(name, "create directory", &err))?;
            }
            std::fs::write(&target, &file.content)
                .map_err(|err| workspace_io(name, "write file", &err))?;
        }
        Ok(())
    }
}

fn workspace_io(name: &str, what: &str, err: &std::io::Error) -> GatewayError {
    warn!(workspace = name, %err, "{what} failed");
    GatewayError::WorkspaceIo(format!("{name}: {what}: {err}").into())
}
