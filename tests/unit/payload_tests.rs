//! Attach payload encoding and size limits.

use std::path::Path;

use profiler_host::attach::payload::{decode_payload, encode_payload, ensure_fits};
use profiler_host::models::process::ProcessDescriptor;
use profiler_host::models::profiler::{ParameterKind, ProfilerDescriptor, ProfilerParameter};
use profiler_host::models::session::SessionDescriptor;
use profiler_host::AppError;
use uuid::Uuid;

fn session_with_filter(filter: &str) -> SessionDescriptor {
    let mut profiler = ProfilerDescriptor::new(Uuid::new_v4(), "Allocations");
    profiler
        .parameters
        .push(ProfilerParameter::new("type_filter", ParameterKind::String, filter));
    SessionDescriptor::new(Path::new("/sessions"), profiler, ProcessDescriptor::from_pid(123))
}

#[test]
fn payload_decodes_to_the_session_manifest() {
    let session = session_with_filter("System.String");
    let payload = encode_payload(&session).unwrap();

    let manifest = decode_payload(&payload).unwrap();

    assert_eq!(manifest, session.to_manifest());
    assert_eq!(
        manifest.profiler.parameter("type_filter").unwrap().value,
        "System.String"
    );
}

#[test]
fn encoding_is_deterministic() {
    let session = session_with_filter("x");
    assert_eq!(encode_payload(&session).unwrap(), encode_payload(&session).unwrap());
}

#[test]
fn payload_within_limit_fits() {
    let session = session_with_filter("small");
    let payload = encode_payload(&session).unwrap();
    ensure_fits(Path::new("/tmp/libprofilers-1.0.0.so"), &payload).unwrap();
}

#[test]
fn oversized_payload_is_rejected() {
    let session = session_with_filter(&"A".repeat(70_000));
    let payload = encode_payload(&session).unwrap();

    let err = ensure_fits(Path::new("/tmp/libprofilers-1.0.0.so"), &payload).unwrap_err();

    assert!(matches!(err, AppError::PayloadTooLarge { size, limit } if size > limit));
}

#[test]
fn garbage_payload_is_unreadable() {
    assert!(matches!(
        decode_payload(b"\x00\x01not json"),
        Err(AppError::ManifestUnreadable { .. })
    ));
}
