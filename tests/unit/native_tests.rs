//! Library loading and manual class-factory activation.
//!
//! Activation is driven through in-test factories laid out exactly like
//! an agent's, so no real agent build is needed.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::ptr;

use profiler_host::native::com::{
    activate_with, ClassFactoryObject, ClassFactoryVtbl, Guid, HResult,
    CLASS_E_CLASSNOTAVAILABLE, E_NOINTERFACE, IID_ICLASSFACTORY, IID_ICORPROFILERCALLBACK8, S_OK,
};
use profiler_host::native::NativeLibrary;
use profiler_host::AppError;
use uuid::Uuid;

const KNOWN_CLASS: Uuid = Uuid::from_u128(0x805a_308b_061c_47f3_9b30_f785_c318_6e82);

#[repr(transparent)]
struct StaticFactory(ClassFactoryObject);

// SAFETY: the factory is immutable and only points at immutable statics.
unsafe impl Sync for StaticFactory {}

static CALLBACK_OBJECT: u64 = 0;

unsafe extern "system" fn create_instance(
    _this: *mut c_void,
    _outer: *mut c_void,
    riid: *const Guid,
    ppv: *mut *mut c_void,
) -> HResult {
    if Uuid::from(*riid) != IID_ICORPROFILERCALLBACK8 {
        *ppv = ptr::null_mut();
        return E_NOINTERFACE;
    }
    *ppv = ptr::addr_of!(CALLBACK_OBJECT).cast_mut().cast();
    S_OK
}

static WORKING_VTBL: ClassFactoryVtbl = ClassFactoryVtbl {
    query_interface: None,
    add_ref: None,
    release: None,
    create_instance: Some(create_instance),
    lock_server: None,
};

static EMPTY_VTBL: ClassFactoryVtbl = ClassFactoryVtbl {
    query_interface: None,
    add_ref: None,
    release: None,
    create_instance: None,
    lock_server: None,
};

static WORKING_FACTORY: StaticFactory = StaticFactory(ClassFactoryObject {
    vtbl: ptr::addr_of!(WORKING_VTBL),
});

static BROKEN_FACTORY: StaticFactory = StaticFactory(ClassFactoryObject {
    vtbl: ptr::addr_of!(EMPTY_VTBL),
});

unsafe extern "system" fn get_class_object(
    clsid: *const Guid,
    iid: *const Guid,
    ppv: *mut *mut c_void,
) -> HResult {
    if Uuid::from(*clsid) != KNOWN_CLASS {
        *ppv = ptr::null_mut();
        return CLASS_E_CLASSNOTAVAILABLE;
    }
    if Uuid::from(*iid) != IID_ICLASSFACTORY {
        return E_NOINTERFACE;
    }
    *ppv = ptr::addr_of!(WORKING_FACTORY).cast_mut().cast();
    S_OK
}

unsafe extern "system" fn get_broken_class_object(
    _clsid: *const Guid,
    _iid: *const Guid,
    ppv: *mut *mut c_void,
) -> HResult {
    *ppv = ptr::addr_of!(BROKEN_FACTORY).cast_mut().cast();
    S_OK
}

unsafe extern "system" fn get_null_class_object(
    _clsid: *const Guid,
    _iid: *const Guid,
    ppv: *mut *mut c_void,
) -> HResult {
    *ppv = ptr::null_mut();
    S_OK
}

#[test]
fn known_class_yields_callback_object() {
    let object =
        unsafe { activate_with(get_class_object, KNOWN_CLASS, IID_ICORPROFILERCALLBACK8) }.unwrap();
    assert_eq!(
        object.as_ptr().cast_const(),
        ptr::addr_of!(CALLBACK_OBJECT).cast::<c_void>()
    );
}

#[test]
fn unknown_class_is_factory_not_found() {
    let other = Uuid::new_v4();
    let err = unsafe { activate_with(get_class_object, other, IID_ICORPROFILERCALLBACK8) }.unwrap_err();
    assert!(matches!(
        err,
        AppError::FactoryNotFound { class_id, hresult } if class_id == other && hresult == CLASS_E_CLASSNOTAVAILABLE
    ));
}

#[test]
fn null_factory_is_factory_not_found() {
    let err = unsafe { activate_with(get_null_class_object, KNOWN_CLASS, IID_ICORPROFILERCALLBACK8) }
        .unwrap_err();
    assert!(matches!(err, AppError::FactoryNotFound { .. }));
}

#[test]
fn unsupported_interface_is_activation_failed() {
    let iid = Uuid::new_v4();
    let err = unsafe { activate_with(get_class_object, KNOWN_CLASS, iid) }.unwrap_err();
    assert!(matches!(
        err,
        AppError::ActivationFailed { interface_id, hresult, .. } if interface_id == iid && hresult == E_NOINTERFACE
    ));
}

#[test]
fn empty_create_instance_slot_is_activation_failed() {
    let err =
        unsafe { activate_with(get_broken_class_object, KNOWN_CLASS, IID_ICORPROFILERCALLBACK8) }
            .unwrap_err();
    assert!(matches!(err, AppError::ActivationFailed { .. }));
}

#[test]
fn loading_missing_file_is_load_failure() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("libabsent.so");
    let err = NativeLibrary::load(&path).unwrap_err();
    assert!(matches!(err, AppError::LoadFailure { path: ref p, .. } if *p == path));
}

#[test]
fn loading_non_library_is_load_failure() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("libtext.so");
    std::fs::write(&path, b"not a shared object").unwrap();
    assert!(matches!(
        NativeLibrary::load(&path),
        Err(AppError::LoadFailure { .. })
    ));
}

#[cfg(target_os = "linux")]
#[test]
fn system_library_symbols_resolve() {
    let library = NativeLibrary::load("libc.so.6").unwrap();
    assert!(library.has_symbol("strlen"));
    assert!(!library.has_symbol("DllGetClassObject"));

    let err = unsafe { library.symbol::<unsafe extern "C" fn()>("no_such_export_here") }.unwrap_err();
    assert!(matches!(err, AppError::SymbolNotFound { ref name } if name == "no_such_export_here"));

    let err = library
        .activate_instance(KNOWN_CLASS, IID_ICORPROFILERCALLBACK8)
        .unwrap_err();
    assert!(matches!(err, AppError::SymbolNotFound { ref name } if name == "DllGetClassObject"));

    library.unload().unwrap();
}

#[cfg(target_os = "linux")]
#[test]
fn repeated_load_unload_cycles_are_stable() {
    for _ in 0..16 {
        let library = NativeLibrary::load("libm.so.6").unwrap();
        assert!(library.has_symbol("cos"));
        library.unload().unwrap();
    }
}
