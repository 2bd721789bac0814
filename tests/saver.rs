//! SceneSaver and SceneDirectory tests.

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use scenecap::{SceneDirectory, SceneSaver};

#[test]
fn scenes_are_numbered_in_capture_order() {
    let temp = TempDir::new().unwrap();
    let mut saver = SceneSaver::new(temp.path().join("nested").join("scenes"));

    for (position, frame_index) in [12u64, 90, 400].into_iter().enumerate() {
        let scene = saver
            .save_scene(RgbImage::from_pixel(8, 8, Rgb([position as u8 * 80, 0, 0])), frame_index)
            .unwrap();
        assert_eq!(scene.number, position + 1);
        assert_eq!(scene.frame_index, frame_index);
    }

    let names: Vec<String> = saver
        .scenes()
        .iter()
        .map(|scene| scene.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["scene_0001.jpg", "scene_0002.jpg", "scene_0003.jpg"]);
    assert!(saver.scenes().iter().all(|scene| scene.path.is_file()));
}

#[test]
fn saved_jpeg_reads_back_at_same_size() {
    let temp = TempDir::new().unwrap();
    let mut saver = SceneSaver::new(temp.path());
    let path = saver
        .save_scene(RgbImage::from_pixel(40, 30, Rgb([200, 100, 50])), 0)
        .unwrap()
        .path
        .clone();

    let decoded = image::open(&path).unwrap().to_rgb8();
    assert_eq!(decoded.dimensions(), (40, 30));
}

#[test]
fn take_scenes_leaves_saver_empty() {
    let temp = TempDir::new().unwrap();
    let mut saver = SceneSaver::new(temp.path());
    saver.save_scene(RgbImage::new(4, 4), 3).unwrap();
    saver.save_scene(RgbImage::new(4, 4), 9).unwrap();

    let scenes = saver.take_scenes();
    assert_eq!(scenes.len(), 2);
    assert!(saver.is_empty());
    assert_eq!(saver.directory(), temp.path());
}

#[test]
fn clear_keeps_files() {
    let temp = TempDir::new().unwrap();
    let mut saver = SceneSaver::new(temp.path());
    let path = saver.save_scene(RgbImage::new(4, 4), 0).unwrap().path.clone();

    saver.clear();
    assert_eq!(saver.len(), 0);
    assert!(path.exists());
}

// ── SceneDirectory ──────────────────────────────────────────────────

#[test]
fn directory_is_removed_on_drop() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("extracted_images");
    {
        let directory = SceneDirectory::create(&path).unwrap();
        let mut saver = SceneSaver::new(directory.path());
        saver.save_scene(RgbImage::new(4, 4), 0).unwrap();
        assert!(path.join("scene_0001.jpg").exists());
    }
    assert!(!path.exists());
}

#[test]
fn explicit_remove_tolerates_missing_directory() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("scenes");
    let directory = SceneDirectory::create(&path).unwrap();

    std::fs::remove_dir_all(&path).unwrap();
    assert!(directory.remove().is_ok());
}

#[test]
fn create_reuses_existing_directory() {
    let temp = TempDir::new().unwrap();
    let directory = SceneDirectory::create(temp.path().join("scenes")).unwrap();
    let again = SceneDirectory::create(directory.path()).unwrap();
    assert_eq!(again.path(), directory.path());
    again.remove().unwrap();
    assert!(!directory.path().exists());
}
