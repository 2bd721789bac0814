//! Scene persistence and the ephemeral scene directory.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use image::RgbImage;

use crate::error::ScenecapError;

/// A frame accepted as a new scene.
#[derive(Debug, Clone)]
pub struct Scene {
    /// 1-based position in capture order.
    pub number: usize,
    /// Index of the decoded frame this scene came from.
    pub frame_index: u64,
    /// Where the frame was written.
    pub path: PathBuf,
    /// The frame itself.
    pub image: RgbImage,
}

/// Writes accepted frames as `scene_0001.jpg`, `scene_0002.jpg`, ... in order.
///
/// The target directory is created on the first save if it does not exist.
/// No deduplication happens here.
#[derive(Debug)]
pub struct SceneSaver {
    directory: PathBuf,
    scenes: Vec<Scene>,
}

impl SceneSaver {
    /// Create a saver writing into `directory`.
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            scenes: Vec::new(),
        }
    }

    /// The directory scenes are written to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Append `frame` to the captured scenes and write it to disk.
    ///
    /// # Errors
    ///
    /// Returns [`ScenecapError::IoError`] if the directory cannot be created
    /// and [`ScenecapError::ImageError`] if the JPEG cannot be written.
    pub fn save_scene(
        &mut self,
        frame: RgbImage,
        frame_index: u64,
    ) -> Result<&Scene, ScenecapError> {
        if !self.directory.is_dir() {
            fs::create_dir_all(&self.directory)?;
        }

        let number = self.scenes.len() + 1;
        let path = self.directory.join(format!("scene_{number:04}.jpg"));
        frame.save(&path)?;
        log::debug!("Saved scene {number} (frame {frame_index}) to {}", path.display());

        self.scenes.push(Scene {
            number,
            frame_index,
            path,
            image: frame,
        });
        Ok(&self.scenes[number - 1])
    }

    /// Scenes captured so far, in capture order.
    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    /// Number of scenes captured so far.
    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    /// Whether no scene has been captured.
    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Take the captured scenes, leaving the saver empty.
    pub fn take_scenes(&mut self) -> Vec<Scene> {
        std::mem::take(&mut self.scenes)
    }

    /// Forget captured scenes. Files already written are left in place.
    pub fn clear(&mut self) {
        self.scenes.clear();
    }
}

/// Scoped scene directory, removed recursively when dropped.
///
/// Removal tolerates a directory that is already gone.
///
/// ```no_run
/// use scenecap::SceneDirectory;
///
/// {
///     let scenes = SceneDirectory::create("extracted_images")?;
///     assert!(scenes.path().is_dir());
/// }
/// assert!(!std::path::Path::new("extracted_images").exists());
/// # Ok::<(), scenecap::ScenecapError>(())
/// ```
#[derive(Debug)]
pub struct SceneDirectory {
    path: PathBuf,
    removed: bool,
}

impl SceneDirectory {
    /// Create `path` (and any parents) and guard it.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, ScenecapError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        log::debug!("Created scene directory {}", path.display());
        Ok(Self {
            path,
            removed: false,
        })
    }

    /// The guarded directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now and report any failure.
    pub fn remove(mut self) -> Result<(), ScenecapError> {
        self.removed = true;
        remove_tree(&self.path)
    }
}

impl Drop for SceneDirectory {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(error) = remove_tree(&self.path) {
            log::warn!(
                "Failed to remove scene directory {}: {error}",
                self.path.display()
            );
        }
    }
}

fn remove_tree(path: &Path) -> Result<(), ScenecapError> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            log::debug!("Removed scene directory {}", path.display());
            Ok(())
        }
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}
