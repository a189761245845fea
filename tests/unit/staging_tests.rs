//! Version-unique staging of the bundled agent library.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use profiler_host::config::GlobalConfig;
use profiler_host::staging::{file_sha256, LibraryStager, Platform};
use profiler_host::AppError;

fn stager_with_bundle(root: &Path, bytes: &[u8]) -> LibraryStager {
    let bundle = root.join("bundle");
    fs::create_dir_all(&bundle).unwrap();
    let stager = LibraryStager::new(&bundle, root.join("staging"), "profilers")
        .with_platform(Platform::Linux);
    fs::write(stager.bundled_path(), bytes).unwrap();
    stager
}

#[test]
fn first_stage_copies_bundled_bytes() {
    let temp = tempfile::tempdir().unwrap();
    let stager = stager_with_bundle(temp.path(), b"agent v1");

    let staged = stager.stage("1.0.0").unwrap();

    assert!(staged.freshly_staged);
    assert_eq!(staged.version, "1.0.0");
    assert_eq!(
        staged.path,
        temp.path().join("staging").join("libprofilers-1.0.0.so")
    );
    assert_eq!(fs::read(&staged.path).unwrap(), b"agent v1");
}

#[test]
fn staging_is_idempotent_and_never_rewrites() {
    let temp = tempfile::tempdir().unwrap();
    let stager = stager_with_bundle(temp.path(), b"agent v1");

    let first = stager.stage("1.0.0").unwrap();
    let digest = first.sha256().unwrap();

    // A rebuilt bundle under the same version must not leak into the staged copy.
    fs::write(stager.bundled_path(), b"agent v1, rebuilt").unwrap();
    let second = stager.stage("1.0.0").unwrap();

    assert_eq!(second.path, first.path);
    assert!(!second.freshly_staged);
    assert_eq!(second.sha256().unwrap(), digest);
    assert_eq!(fs::read(&second.path).unwrap(), b"agent v1");
}

#[test]
fn distinct_versions_coexist() {
    let temp = tempfile::tempdir().unwrap();
    let stager = stager_with_bundle(temp.path(), b"agent v1");

    let old = stager.stage("1.0.0").unwrap();
    fs::write(stager.bundled_path(), b"agent v2").unwrap();
    let new = stager.stage("1.0.1").unwrap();

    assert_ne!(old.path, new.path);
    assert!(old.path.exists());
    assert!(new.path.exists());
    assert_eq!(fs::read(&old.path).unwrap(), b"agent v1");
    assert_eq!(fs::read(&new.path).unwrap(), b"agent v2");
}

#[test]
fn missing_bundle_is_library_not_found() {
    let temp = tempfile::tempdir().unwrap();
    let stager = LibraryStager::new(temp.path().join("bundle"), temp.path().join("staging"), "profilers");

    let err = stager.stage("1.0.0").unwrap_err();

    assert!(matches!(err, AppError::LibraryNotFound { ref path } if *path == stager.bundled_path()));
    assert!(!stager.staged_path("1.0.0").exists());
}

#[test]
fn invalid_version_is_rejected_before_touching_disk() {
    let temp = tempfile::tempdir().unwrap();
    let stager = stager_with_bundle(temp.path(), b"agent");

    let err = stager.stage("../escape").unwrap_err();

    assert!(matches!(err, AppError::Config(_)));
    assert!(!temp.path().join("staging").exists());
}

#[test]
fn concurrent_stagers_agree_on_one_copy() {
    let temp = tempfile::tempdir().unwrap();
    let stager = Arc::new(stager_with_bundle(temp.path(), b"agent bytes"));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let stager = Arc::clone(&stager);
            std::thread::spawn(move || stager.stage("3.0.0").unwrap())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(results.iter().all(|r| r.path == results[0].path));
    assert_eq!(results.iter().filter(|r| r.freshly_staged).count(), 1);
    assert_eq!(fs::read(&results[0].path).unwrap(), b"agent bytes");

    let leftovers = fs::read_dir(temp.path().join("staging")).unwrap().count();
    assert_eq!(leftovers, 1, "no temporary files remain");
}

#[test]
fn digest_matches_known_value() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("f");
    fs::write(&path, b"abc").unwrap();
    assert_eq!(
        file_sha256(&path).unwrap(),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn from_config_uses_configured_directories() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().to_str().unwrap();
    let config = GlobalConfig::from_toml_str(&format!(
        "session_root = '{root}/sessions'\nbundled_library_dir = '{root}/bundle'\nlibrary_base_name = \"agent\"\n"
    ))
    .unwrap();

    let stager = LibraryStager::from_config(&config).unwrap().with_platform(Platform::Windows);

    assert_eq!(stager.bundled_path(), temp.path().join("bundle").join("agent.dll"));
    assert_eq!(
        stager.staged_path("1.2.3"),
        temp.path().join("sessions").join("agent-1.2.3.dll")
    );
}
