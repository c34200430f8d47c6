//! Checkpoint persistence for intermediate artifacts.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Somewhere to put named artifacts. Names are relative paths such as
/// `chapters/chapter_081.md`.
pub trait ArtifactStore: Send + Sync {
    fn save(&self, name: &str, contents: &str) -> Result<()>;
}

/// Serialize `value` as pretty JSON and save it under `name`.
pub fn save_json<T: Serialize + ?Sized>(store: &dyn ArtifactStore, name: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", name))?;
    store.save(name, &json)
}

/// Writes artifacts into a directory tree.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        if name.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("Invalid artifact name: {:?}", name);
        }
        Ok(self.root.join(relative))
    }
}

impl ArtifactStore for FileArtifactStore {
    fn save(&self, name: &str, contents: &str) -> Result<()> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl ArtifactStore for NullStore {
    fn save(&self, _name: &str, _contents: &str) -> Result<()> {
        Ok(())
    }
}
