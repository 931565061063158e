//! Per-job scratch space for intermediate artifacts.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{CompositorError, Result, Stage};

/// Temporary directory owning every intermediate file of one job.
///
/// Dropping the workspace deletes the directory and everything in it, so a
/// job that fails at any stage leaves nothing behind. `close` does the same
/// but reports cleanup errors.
///
/// ```no_run
/// use clip_compositor::media::TempWorkspace;
///
/// let mut workspace = TempWorkspace::new("merge", None)?;
/// let list = workspace.artifact("concat.txt");
/// // ... run stages that write `list` and friends ...
/// workspace.close()?;
/// # Ok::<(), clip_compositor::CompositorError>(())
/// ```
#[derive(Debug)]
pub struct TempWorkspace {
    dir: Option<TempDir>,
    root: PathBuf,
    artifacts: Vec<PathBuf>,
}

impl TempWorkspace {
    /// Create a fresh directory under `parent`, or the system temp dir
    pub fn new(label: &str, parent: Option<&Path>) -> Result<Self> {
        let prefix = format!("clip-compositor-{}-", label);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match parent {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        let root = dir.path().to_path_buf();
        debug!("Created workspace {}", root.display());

        Ok(Self {
            dir: Some(dir),
            root,
            artifacts: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Reserve a path for a new artifact; names are prefixed with a sequence
    /// number so repeated names never collide
    pub fn artifact(&mut self, name: &str) -> PathBuf {
        let path = self.root.join(format!("{:02}_{}", self.artifacts.len(), name));
        self.artifacts.push(path.clone());
        path
    }

    /// Every path reserved so far, in creation order
    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    /// Move a finished artifact to its final destination
    ///
    /// Falls back to copy-and-remove when a rename is impossible, e.g. when
    /// the destination lives on another filesystem. Either way the
    /// destination only ever holds a complete file.
    pub fn publish(&self, artifact: &Path, destination: &Path) -> Result<PathBuf> {
        if !artifact.starts_with(&self.root) || !artifact.is_file() {
            return Err(CompositorError::invalid_output(
                Stage::Publish,
                artifact,
                "artifact is missing from the workspace",
            ));
        }

        if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        if let Err(e) = fs::rename(artifact, destination) {
            debug!("Rename failed ({}), copying instead", e);
            copy_into_place(artifact, destination)?;
            fs::remove_file(artifact)?;
        }
        debug!("Published {} -> {}", artifact.display(), destination.display());

        Ok(destination.to_path_buf())
    }

    /// Delete the workspace now, reporting any cleanup failure
    pub fn close(mut self) -> Result<()> {
        match self.dir.take() {
            Some(dir) => dir.close().map_err(Into::into),
            None => Ok(()),
        }
    }
}

/// Copy into a temp file beside `destination`, then rename it over `destination`
fn copy_into_place(source: &Path, destination: &Path) -> Result<()> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut staged = tempfile::Builder::new().prefix(".publish-").tempfile_in(dir)?;
    let mut input = fs::File::open(source)?;
    io::copy(&mut input, staged.as_file_mut())?;
    staged.as_file().sync_all()?;
    staged.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let root = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to clean up workspace {}: {}", root.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifacts_are_unique_and_inside() {
        let parent = tempfile::tempdir().unwrap();
        let mut workspace = TempWorkspace::new("test", Some(parent.path())).unwrap();

        let a = workspace.artifact("part.mp4");
        let b = workspace.artifact("part.mp4");
        assert_ne!(a, b);
        assert!(a.starts_with(workspace.path()));
        assert_eq!(workspace.artifacts().len(), 2);
    }

    #[test]
    fn test_drop_removes_everything() {
        let parent = tempfile::tempdir().unwrap();
        let root = {
            let mut workspace = TempWorkspace::new("drop", Some(parent.path())).unwrap();
            fs::write(workspace.artifact("a.bin"), b"data").unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!root.exists());
        assert_eq!(fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_publish_moves_file() {
        let parent = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let mut workspace = TempWorkspace::new("publish", Some(parent.path())).unwrap();

        let artifact = workspace.artifact("final.mp4");
        fs::write(&artifact, b"video").unwrap();

        let destination = out_dir.path().join("nested").join("out.mp4");
        workspace.publish(&artifact, &destination).unwrap();

        assert_eq!(fs::read(&destination).unwrap(), b"video");
        assert!(!artifact.exists());
        workspace.close().unwrap();
    }

    #[test]
    fn test_publish_rejects_missing_artifact() {
        let mut workspace = TempWorkspace::new("missing", None).unwrap();
        let artifact = workspace.artifact("never-written.mp4");
        let out = tempfile::tempdir().unwrap();

        let err = workspace.publish(&artifact, &out.path().join("x.mp4")).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Publish));
    }

    #[test]
    fn test_copy_fallback_replaces_destination_whole() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("artifact.mp4");
        fs::write(&source, b"new video").unwrap();
        let destination = dir.path().join("out").join("final.mp4");
        fs::create_dir_all(destination.parent().unwrap()).unwrap();
        fs::write(&destination, b"old").unwrap();

        copy_into_place(&source, &destination).unwrap();

        assert_eq!(fs::read(&destination).unwrap(), b"new video");
        assert_eq!(fs::read_dir(destination.parent().unwrap()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_copy_leaves_destination_untouched() {
        let dir = tempfile::tempdir().unwrap();
        // opening a directory works, reading from it does not
        let unreadable = dir.path().join("not-a-file");
        fs::create_dir(&unreadable).unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        let destination = out.join("final.mp4");
        fs::write(&destination, b"old").unwrap();

        assert!(copy_into_place(&unreadable, &destination).is_err());

        assert_eq!(fs::read(&destination).unwrap(), b"old");
        assert_eq!(fs::read_dir(&out).unwrap().count(), 1);
    }
}
