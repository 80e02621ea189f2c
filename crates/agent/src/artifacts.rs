//! Artifact tracking.
//!
//! The artifact directory may be shared by concurrent runs, so ownership
//! is never assumed: the tracker records which file names existed before a
//! run and reports the ones that appeared after it.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File names present in the artifact directory at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSnapshot(BTreeSet<String>);

impl ArtifactSnapshot {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactTracker {
    dir: PathBuf,
    extensions: Vec<String>,
}

impl ArtifactTracker {
    pub fn new(dir: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            extensions,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List tracked files. A missing directory is an empty snapshot.
    pub async fn snapshot(&self) -> ArtifactSnapshot {
        let mut names = BTreeSet::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.dir).await else {
            return ArtifactSnapshot(names);
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if is_file && self.tracked(&name) {
                names.insert(name);
            }
        }
        ArtifactSnapshot(names)
    }

    /// Names present now that were not in `before`, sorted.
    pub async fn new_since(&self, before: &ArtifactSnapshot) -> Vec<String> {
        let after = self.snapshot().await;
        let created: Vec<String> = after.0.difference(&before.0).cloned().collect();
        if !created.is_empty() {
            debug!(dir = %self.dir.display(), count = created.len(), "New artifacts");
        }
        created
    }

    fn tracked(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|a| a.eq_ignore_ascii_case(ext)))
    }
}
