//! Display format and source chaining of `AppError`.

use std::error::Error as _;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use profiler_host::AppError;
use uuid::Uuid;

#[test]
fn every_variant_has_a_category_prefix() {
    let cases = [
        (AppError::Config("bad".into()), "config:"),
        (
            AppError::LibraryNotFound {
                path: PathBuf::from("/x/libprofilers.so"),
            },
            "library not found:",
        ),
        (
            AppError::LoadFailure {
                path: PathBuf::from("/x"),
                cause: "nope".into(),
            },
            "load failure:",
        ),
        (
            AppError::SymbolNotFound {
                name: "DllGetClassObject".into(),
            },
            "symbol not found:",
        ),
        (
            AppError::FactoryNotFound {
                class_id: Uuid::nil(),
                hresult: -1,
            },
            "factory not found:",
        ),
        (
            AppError::ProcessUnreachable {
                pid: 1,
                reason: "gone".into(),
            },
            "process unreachable:",
        ),
        (
            AppError::AttachTimeout {
                pid: 1,
                timeout: Duration::from_secs(3),
            },
            "attach timeout:",
        ),
        (
            AppError::ProfilerRejected {
                pid: 1,
                hresult: 0x8013_136A,
            },
            "profiler rejected:",
        ),
        (
            AppError::PayloadTooLarge {
                size: 70_000,
                limit: 65_535,
            },
            "payload too large:",
        ),
        (
            AppError::ManifestUnreadable {
                path: PathBuf::from("/s/session.json"),
                reason: "eof".into(),
            },
            "manifest unreadable:",
        ),
        (AppError::NotFound("session".into()), "not found:"),
        (AppError::Cancelled("stop".into()), "cancelled:"),
        (AppError::Io("disk".into()), "io:"),
    ];

    for (err, prefix) in cases {
        let text = err.to_string();
        assert!(text.starts_with(prefix), "{text} should start with {prefix}");
        assert!(!text.ends_with('.'), "no trailing period: {text}");
    }
}

#[test]
fn library_not_found_names_the_path() {
    let err = AppError::LibraryNotFound {
        path: PathBuf::from("/opt/agent/libprofilers.so"),
    };
    assert!(err.to_string().contains("/opt/agent/libprofilers.so"));
}

#[test]
fn staging_io_exposes_underlying_cause() {
    let err = AppError::StagingIo {
        path: PathBuf::from("/tmp/stage"),
        source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
    };
    let source = err.source().expect("io source");
    assert_eq!(source.to_string(), "denied");
    assert!(err.to_string().starts_with("staging io:"));
}

#[test]
fn plain_variants_have_no_source() {
    assert!(AppError::Io("x".into()).source().is_none());
}

#[test]
fn toml_errors_become_config_errors() {
    let parse_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
    let err = AppError::from(parse_err);
    assert!(matches!(err, AppError::Config(ref msg) if msg.starts_with("invalid config")));
}
