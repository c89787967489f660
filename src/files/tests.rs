use super::{FileStore, UploadDir};
use crate::utils::error::FileError;
use tempfile::tempdir;

#[tokio::test]
async fn test_stat_and_read_prefix() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("sales.csv"), "year,total\n2023,10\n2024,12\n").unwrap();
    let store = UploadDir::new(dir.path());

    assert_eq!(store.stat("sales.csv").await.unwrap().size, 27);
    let prefix = store.read_bytes("sales.csv", 10).await.unwrap();
    assert_eq!(prefix, b"year,total");

    let all = store.read_bytes("sales.csv", 4096).await.unwrap();
    assert_eq!(all.len(), 27);
}

#[tokio::test]
async fn test_missing_file_is_not_found() {
    let dir = tempdir().unwrap();
    let store = UploadDir::new(dir.path());

    assert!(matches!(
        store.stat("foo.csv").await,
        Err(FileError::NotFound(id)) if id == "foo.csv"
    ));
    assert!(matches!(
        store.read_bytes("foo.csv", 10).await,
        Err(FileError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_directories_are_not_files() {
    let dir = tempdir().unwrap();
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    let store = UploadDir::new(dir.path());
    assert!(matches!(
        store.stat("nested").await,
        Err(FileError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_ids_escaping_the_upload_dir_are_rejected() {
    let dir = tempdir().unwrap();
    let store = UploadDir::new(dir.path());

    for id in ["../etc/passwd", "a/b.csv", "..", "", "a\\b"] {
        assert!(
            matches!(store.stat(id).await, Err(FileError::InvalidId(_))),
            "{id:?} should be rejected"
        );
    }
}
