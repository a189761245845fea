use std::path::Path;

use profiler_host::models::process::ProcessDescriptor;
use profiler_host::models::profiler::{ParameterKind, ProfilerDescriptor, ProfilerParameter};
use profiler_host::models::session::{
    session_directory, SessionDescriptor, SessionManifest, SessionStatus, MANIFEST_FILE_NAME,
    MANIFEST_FORMAT_VERSION,
};
use profiler_host::AppError;
use uuid::Uuid;

fn exceptions_profiler() -> ProfilerDescriptor {
    let mut profiler = ProfilerDescriptor::new(
        Uuid::parse_str("805A308B-061C-47F3-9B30-F785C3186E82").unwrap(),
        "Exceptions Profiler",
    );
    profiler
        .parameters
        .push(ProfilerParameter::new("max_depth", ParameterKind::Int, "8"));
    profiler
        .parameters
        .push(ProfilerParameter::new("ratio", ParameterKind::Float, "0.5"));
    profiler
        .parameters
        .push(ProfilerParameter::new("include_stacks", ParameterKind::Boolean, "True"));
    profiler
}

#[test]
fn typed_accessors_parse_string_values() {
    let profiler = exceptions_profiler();
    assert_eq!(profiler.parameter("max_depth").unwrap().value_i32().unwrap(), 8);
    assert!((profiler.parameter("ratio").unwrap().value_f32().unwrap() - 0.5).abs() < f32::EPSILON);
    assert!(profiler.parameter("include_stacks").unwrap().value_bool().unwrap());
}

#[test]
fn typed_setters_store_text() {
    let mut param = ProfilerParameter::new("n", ParameterKind::Int, "0");
    param.set_i32(-42);
    assert_eq!(param.value, "-42");
    param.set_bool(false);
    assert_eq!(param.value, "false");
    param.set_f32(1.5);
    assert_eq!(param.value, "1.5");
}

#[test]
fn conversion_failure_is_invalid_parameter() {
    let param = ProfilerParameter::new("max_depth", ParameterKind::Int, "deep");
    assert!(matches!(param.value_i32(), Err(AppError::InvalidParameter(_))));
    assert!(matches!(param.value_bool(), Err(AppError::InvalidParameter(_))));
}

#[test]
fn set_parameter_checks_declared_kind() {
    let mut profiler = exceptions_profiler();
    profiler.set_parameter("max_depth", "16").unwrap();
    assert_eq!(profiler.parameter("max_depth").unwrap().value, "16");

    let err = profiler.set_parameter("max_depth", "lots").unwrap_err();
    assert!(matches!(err, AppError::InvalidParameter(_)));
    assert_eq!(profiler.parameter("max_depth").unwrap().value, "16", "value untouched");

    let err = profiler.set_parameter("unknown", "1").unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[test]
fn session_directory_is_keyed_by_id() {
    let root = Path::new("/var/sessions");
    let session = SessionDescriptor::new(root, exceptions_profiler(), ProcessDescriptor::from_pid(123));
    assert_eq!(session.directory, session_directory(root, session.id));
    assert_eq!(session.directory, root.join(session.id.to_string()));
    assert_eq!(session.manifest_path(), session.directory.join(MANIFEST_FILE_NAME));
    assert_eq!(session.status, SessionStatus::Created);
}

#[test]
fn concurrent_sessions_never_share_a_directory() {
    let root = Path::new("/var/sessions");
    let sessions: Vec<_> = (0..64)
        .map(|_| SessionDescriptor::new(root, exceptions_profiler(), ProcessDescriptor::from_pid(1)))
        .collect();
    let mut dirs: Vec<_> = sessions.iter().map(|s| s.directory.clone()).collect();
    dirs.sort();
    dirs.dedup();
    assert_eq!(dirs.len(), sessions.len());
}

#[test]
fn lifecycle_only_moves_forward() {
    let mut session =
        SessionDescriptor::new(Path::new("/r"), exceptions_profiler(), ProcessDescriptor::from_pid(1));

    assert!(!session.can_transition_to(SessionStatus::Completed));
    assert!(session.transition_to(SessionStatus::Attached));
    assert!(session.transition_to(SessionStatus::InProgress));
    assert!(session.transition_to(SessionStatus::Completed));
    assert!(!session.transition_to(SessionStatus::Attached));
    assert_eq!(session.status, SessionStatus::Completed);
}

#[test]
fn manifest_carries_session_snapshot() {
    let session =
        SessionDescriptor::new(Path::new("/r"), exceptions_profiler(), ProcessDescriptor::from_pid(9));
    let manifest = session.to_manifest();

    assert_eq!(manifest.format_version, MANIFEST_FORMAT_VERSION);
    assert_eq!(manifest.uuid, session.id);
    assert_eq!(manifest.profiler, session.profiler);
    assert_eq!(manifest.process.pid, 9);
    assert_eq!(manifest.timestamp, session.created_at);
    assert_eq!(manifest.output_directory, session.directory);
}

#[test]
fn manifest_json_is_byte_stable() {
    let session =
        SessionDescriptor::new(Path::new("/r"), exceptions_profiler(), ProcessDescriptor::from_pid(9));
    let first = session.to_manifest().to_json_bytes().unwrap();
    let parsed = SessionManifest::from_json_bytes(&first, Path::new("m")).unwrap();
    assert_eq!(parsed.to_json_bytes().unwrap(), first);
}

#[test]
fn manifest_json_uses_snake_case_fields() {
    let session =
        SessionDescriptor::new(Path::new("/r"), exceptions_profiler(), ProcessDescriptor::from_pid(9));
    let value: serde_json::Value =
        serde_json::from_slice(&session.to_manifest().to_json_bytes().unwrap()).unwrap();
    assert!(value.get("format_version").is_some());
    assert!(value.get("output_directory").is_some());
    assert_eq!(value["profiler"]["parameters"][0]["type"], "int");
    assert_eq!(value["process"]["pid"], 9);
}

#[test]
fn newer_manifest_version_is_unreadable() {
    let session =
        SessionDescriptor::new(Path::new("/r"), exceptions_profiler(), ProcessDescriptor::from_pid(9));
    let mut manifest = session.to_manifest();
    manifest.format_version = MANIFEST_FORMAT_VERSION + 1;
    let raw = serde_json::to_vec(&manifest).unwrap();

    let err = SessionManifest::from_json_bytes(&raw, Path::new("m")).unwrap_err();
    assert!(matches!(err, AppError::ManifestUnreadable { ref reason, .. } if reason.contains("newer")));
}

#[test]
fn manifest_without_version_defaults_to_current() {
    let raw = format!(
        r#"{{"uuid":"{}","profiler":{{"id":"{}","name":"P"}},"process":{{"pid":1}},"timestamp":"2024-05-01T12:00:00Z"}}"#,
        Uuid::new_v4(),
        Uuid::new_v4()
    );
    let manifest = SessionManifest::from_json_bytes(raw.as_bytes(), Path::new("m")).unwrap();
    assert_eq!(manifest.format_version, MANIFEST_FORMAT_VERSION);
    assert!(manifest.output_directory.as_os_str().is_empty());
}
