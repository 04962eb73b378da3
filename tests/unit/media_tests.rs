//! Unit tests for attachment storage.

use std::path::Path;

use agent_bridge::media::{is_image, sanitize_file_name, MediaStore};

#[test]
fn image_detection_is_by_extension() {
    assert!(is_image(Path::new("/u/shot.png")));
    assert!(is_image(Path::new("/u/PHOTO.JPG")));
    assert!(is_image(Path::new("/u/a.webp")));
    assert!(!is_image(Path::new("/u/notes.txt")));
    assert!(!is_image(Path::new("/u/no_extension")));
}

#[test]
fn file_names_are_reduced_to_one_component() {
    assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
    assert_eq!(sanitize_file_name("my report (1).pdf"), "my_report__1_.pdf");
    assert_eq!(sanitize_file_name(".hidden"), "hidden");
    assert_eq!(sanitize_file_name(""), "upload");
    assert_eq!(sanitize_file_name("C:\\Users\\x\\a.png"), "a.png");
}

#[tokio::test]
async fn save_writes_and_tracks_the_file() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = MediaStore::new(temp.path().join("uploads"));

    let path = store
        .save("F123", "diagram.png", b"\x89PNG")
        .await
        .expect("save succeeds");

    assert_eq!(path, temp.path().join("uploads").join("F123_diagram.png"));
    assert_eq!(std::fs::read(&path).expect("read back"), b"\x89PNG");
    assert_eq!(store.tracked().await, 1);
}

#[tokio::test]
async fn cleanup_removes_tracked_files() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = MediaStore::new(temp.path().to_path_buf());

    let path = store.save("F1", "a.txt", b"a").await.expect("save");
    store.cleanup().await;

    assert!(!path.exists());
    assert_eq!(store.tracked().await, 0);
}

#[tokio::test]
async fn cleanup_all_clears_leftovers() {
    let temp = tempfile::tempdir().expect("tempdir");
    let leftover = temp.path().join("old_upload.bin");
    std::fs::write(&leftover, b"stale").expect("write leftover");

    let store = MediaStore::new(temp.path().to_path_buf());
    store.cleanup_all().await;

    assert!(!leftover.exists());
}

#[tokio::test]
async fn cleanup_all_without_directory_is_harmless() {
    let temp = tempfile::tempdir().expect("tempdir");
    let store = MediaStore::new(temp.path().join("never_created"));
    store.cleanup_all().await;
    assert_eq!(store.upload_dir(), temp.path().join("never_created"));
}
