//! Minimal component-object ABI used to activate the agent without a COM runtime.
//!
//! Only the pieces needed to go from `DllGetClassObject` to a live profiler
//! callback object are modelled: GUID layout, HRESULT helpers, and the
//! `IClassFactory` dispatch table.

#![allow(unsafe_code)]

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use uuid::Uuid;

use crate::{AppError, Result};

/// COM status code.
pub type HResult = i32;

/// Success.
pub const S_OK: HResult = 0;

/// Unspecified failure.
#[allow(clippy::cast_possible_wrap)]
pub const E_FAIL: HResult = 0x8000_4005_u32 as i32;

/// Interface not supported.
#[allow(clippy::cast_possible_wrap)]
pub const E_NOINTERFACE: HResult = 0x8000_4002_u32 as i32;

/// Invalid pointer.
#[allow(clippy::cast_possible_wrap)]
pub const E_POINTER: HResult = 0x8000_4003_u32 as i32;

/// The requested class is not provided by this module.
#[allow(clippy::cast_possible_wrap)]
pub const CLASS_E_CLASSNOTAVAILABLE: HResult = 0x8004_0111_u32 as i32;

/// `IClassFactory` interface identifier.
pub const IID_ICLASSFACTORY: Uuid = Uuid::from_u128(0x0000_0001_0000_0000_c000_0000_0000_0046);

/// `ICorProfilerCallback8` interface identifier.
pub const IID_ICORPROFILERCALLBACK8: Uuid =
    Uuid::from_u128(0x5bed_9b15_c079_4d47_bfe2_215a_140c_07e0);

/// Export the agent provides for class-factory lookup.
pub const FACTORY_LOOKUP_SYMBOL: &str = "DllGetClassObject";

/// Index of `CreateInstance` in an `IClassFactory` dispatch table
/// (`QueryInterface`, `AddRef`, `Release`, `CreateInstance`, `LockServer`).
pub const CREATE_INSTANCE_SLOT: usize = 3;

/// Index of `Release` in every COM dispatch table.
pub const RELEASE_SLOT: usize = 2;

/// Whether an HRESULT denotes success.
#[must_use]
pub const fn succeeded(hr: HResult) -> bool {
    hr >= 0
}

/// GUID in its native in-memory layout.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid {
    /// First 32 bits.
    pub data1: u32,
    /// Next 16 bits.
    pub data2: u16,
    /// Next 16 bits.
    pub data3: u16,
    /// Final 64 bits, byte order preserved.
    pub data4: [u8; 8],
}

impl From<Uuid> for Guid {
    fn from(value: Uuid) -> Self {
        let (data1, data2, data3, data4) = value.as_fields();
        Self {
            data1,
            data2,
            data3,
            data4: *data4,
        }
    }
}

impl From<Guid> for Uuid {
    fn from(value: Guid) -> Self {
        Uuid::from_fields(value.data1, value.data2, value.data3, &value.data4)
    }
}

/// `DllGetClassObject(rclsid, riid, ppv)`.
pub type DllGetClassObjectFn =
    unsafe extern "system" fn(*const Guid, *const Guid, *mut *mut c_void) -> HResult;

/// `IUnknown::QueryInterface(this, riid, ppv)`.
pub type QueryInterfaceFn =
    unsafe extern "system" fn(*mut c_void, *const Guid, *mut *mut c_void) -> HResult;

/// `IUnknown::AddRef` / `IUnknown::Release`.
pub type RefCountFn = unsafe extern "system" fn(*mut c_void) -> u32;

/// `IClassFactory::CreateInstance(this, outer, riid, ppv)`.
pub type CreateInstanceFn =
    unsafe extern "system" fn(*mut c_void, *mut c_void, *const Guid, *mut *mut c_void) -> HResult;

/// `IClassFactory::LockServer(this, lock)`.
pub type LockServerFn = unsafe extern "system" fn(*mut c_void, i32) -> HResult;

/// Dispatch table of an `IClassFactory` object.
///
/// Slots are `Option` so a null entry read from foreign memory is
/// representable instead of undefined.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ClassFactoryVtbl {
    /// Slot 0.
    pub query_interface: Option<QueryInterfaceFn>,
    /// Slot 1.
    pub add_ref: Option<RefCountFn>,
    /// Slot 2.
    pub release: Option<RefCountFn>,
    /// Slot 3, see [`CREATE_INSTANCE_SLOT`].
    pub create_instance: Option<CreateInstanceFn>,
    /// Slot 4.
    pub lock_server: Option<LockServerFn>,
}

/// `IUnknown` prefix every COM dispatch table starts with.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct UnknownVtbl {
    /// Slot 0.
    pub query_interface: Option<QueryInterfaceFn>,
    /// Slot 1.
    pub add_ref: Option<RefCountFn>,
    /// Slot 2, see [`RELEASE_SLOT`].
    pub release: Option<RefCountFn>,
}

/// Layout of any COM object: its first machine word points at the dispatch table.
#[repr(C)]
#[derive(Debug)]
pub struct ClassFactoryObject {
    /// Dispatch table pointer.
    pub vtbl: *const ClassFactoryVtbl,
}

/// Activate `class_id` through a factory-lookup function and return the
/// object exposing `interface_id`.
///
/// The returned factory is not released: agents hand out a factory with a
/// zero reference count and leak it for the lifetime of the module.
///
/// # Errors
///
/// - `AppError::FactoryNotFound` if the lookup fails or yields null.
/// - `AppError::ActivationFailed` if the dispatch table is unusable or
///   `CreateInstance` fails or yields null.
///
/// # Safety
///
/// `get_class_object` must follow the `DllGetClassObject` contract, and any
/// factory it returns must be a live object whose first word points at an
/// `IClassFactory` dispatch table.
pub unsafe fn activate_with(
    get_class_object: DllGetClassObjectFn,
    class_id: Uuid,
    interface_id: Uuid,
) -> Result<NonNull<c_void>> {
    let clsid = Guid::from(class_id);
    let factory_iid = Guid::from(IID_ICLASSFACTORY);
    let mut factory: *mut c_void = ptr::null_mut();

    let hr = get_class_object(&clsid, &factory_iid, &mut factory);
    if !succeeded(hr) || factory.is_null() {
        return Err(AppError::FactoryNotFound {
            class_id,
            hresult: if succeeded(hr) { E_POINTER } else { hr },
        });
    }

    let activation_failed = |hresult| AppError::ActivationFailed {
        class_id,
        interface_id,
        hresult,
    };

    let vtbl = (*factory.cast::<ClassFactoryObject>()).vtbl;
    if vtbl.is_null() {
        return Err(activation_failed(E_POINTER));
    }
    let create_instance = (*vtbl)
        .create_instance
        .ok_or_else(|| activation_failed(E_POINTER))?;

    let iid = Guid::from(interface_id);
    let mut object: *mut c_void = ptr::null_mut();
    let hr = create_instance(factory, ptr::null_mut(), &iid, &mut object);
    if !succeeded(hr) {
        return Err(activation_failed(hr));
    }
    NonNull::new(object).ok_or_else(|| activation_failed(E_POINTER))
}

/// Drop one reference to `object` through `IUnknown::Release`.
///
/// Returns the count the object reports afterwards, or `None` when its
/// dispatch table is null or has no `Release` entry.
///
/// # Safety
///
/// `object` must be a live COM object the caller owns a reference to. The
/// reference must not be used again.
pub unsafe fn release(object: NonNull<c_void>) -> Option<u32> {
    let vtbl = *object.as_ptr().cast::<*const UnknownVtbl>();
    if vtbl.is_null() {
        return None;
    }
    let release = (*vtbl).release?;
    Some(release(object.as_ptr()))
}
