use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// One source file of a submission: a path relative to the submission root
/// plus its raw byte content.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub content: Vec<u8>,
}

/// The source tree handed in by one group.
///
/// Created by the external fetch step (or the batch driver reading a local
/// directory) and read-only to the evaluation core.
#[derive(Debug, Clone)]
pub struct Submission {
    pub group_id: String,
    pub files: Vec<SourceFile>,
}

impl Submission {
    pub fn new(group_id: impl Into<String>, files: Vec<SourceFile>) -> Self {
        Self {
            group_id: group_id.into(),
            files,
        }
    }

    /// Reads a submission from a local directory tree.
    ///
    /// Hidden entries (`.git` and friends) are skipped. Files are collected in
    /// sorted path order so repeated loads of the same tree are identical.
    pub fn from_dir(group_id: impl Into<String>, root: &Path) -> Result<Self> {
        let mut files = Vec::new();
        collect_files(root, root, &mut files)
            .with_context(|| format!("failed to read submission tree {}", root.display()))?;
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(Self::new(group_id, files))
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<SourceFile>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, files)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_path_buf();
            files.push(SourceFile {
                path: relative,
                content: fs::read(&path)?,
            });
        }
    }
    Ok(())
}
