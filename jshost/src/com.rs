//! COM binary-contract primitives.
//!
//! Everything in this module crosses the plugin boundary by pointer, so the
//! layouts are fixed: [`Guid`] and [`HResult`] match their C counterparts
//! bit for bit, and every interface is a pointer to a vtable whose first
//! three slots are the `IUnknown` methods.
//!
//! Ownership of a plugin-side object is expressed with [`ComPtr`], which owns
//! exactly one reference and releases it on drop.  Host-side objects count
//! their own references with [`RefCount`].

use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

// ── Guid ──────────────────────────────────────────────────────────────────────

/// A 128-bit interface or class identifier.
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const NULL: Guid = Guid::new(0, 0, 0, [0; 8]);

    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self { data1, data2, data3, data4 }
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

/// `CLSID_JScript`, the engine class requested from the module's factory.
pub const CLSID_JSCRIPT: Guid =
    Guid::new(0xf414c260, 0x6ac0, 0x11cf, [0xb6, 0xd1, 0x00, 0xaa, 0x00, 0xbb, 0xbb, 0x58]);

// ── HResult ───────────────────────────────────────────────────────────────────

/// A COM status code.  Negative values are failures.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    pub const S_OK: HResult = HResult(0);
    pub const S_FALSE: HResult = HResult(1);
    pub const E_NOTIMPL: HResult = HResult(0x8000_4001_u32 as i32);
    pub const E_NOINTERFACE: HResult = HResult(0x8000_4002_u32 as i32);
    pub const E_POINTER: HResult = HResult(0x8000_4003_u32 as i32);
    pub const E_FAIL: HResult = HResult(0x8000_4005_u32 as i32);
    pub const E_UNEXPECTED: HResult = HResult(0x8000_FFFF_u32 as i32);
    pub const E_OUTOFMEMORY: HResult = HResult(0x8007_000E_u32 as i32);
    pub const E_INVALIDARG: HResult = HResult(0x8007_0057_u32 as i32);
    pub const DISP_E_MEMBERNOTFOUND: HResult = HResult(0x8002_0003_u32 as i32);
    pub const DISP_E_TYPEMISMATCH: HResult = HResult(0x8002_0005_u32 as i32);
    pub const DISP_E_UNKNOWNNAME: HResult = HResult(0x8002_0006_u32 as i32);
    pub const TYPE_E_ELEMENTNOTFOUND: HResult = HResult(0x8002_802B_u32 as i32);
    pub const CLASS_E_CLASSNOTAVAILABLE: HResult = HResult(0x8004_0111_u32 as i32);
    pub const SCRIPT_E_REPORTED: HResult = HResult(0x8002_0101_u32 as i32);

    /// `SUCCEEDED(hr)`.
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    /// `FAILED(hr)`.
    pub const fn is_err(self) -> bool {
        self.0 < 0
    }

    /// Convert to a `Result`, keeping the failing code as the error.
    pub fn ok(self) -> Result<(), HResult> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}

impl fmt::Debug for HResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HResult({self})")
    }
}

// ── IUnknown ──────────────────────────────────────────────────────────────────

pub type QueryInterfaceFn =
    unsafe extern "system" fn(this: *mut c_void, riid: *const Guid, out: *mut *mut c_void) -> HResult;
pub type AddRefFn = unsafe extern "system" fn(this: *mut c_void) -> u32;
pub type ReleaseFn = unsafe extern "system" fn(this: *mut c_void) -> u32;

/// The three slots every COM vtable starts with.
#[repr(C)]
pub struct IUnknownVtbl {
    pub query_interface: QueryInterfaceFn,
    pub add_ref: AddRefFn,
    pub release: ReleaseFn,
}

/// A COM interface type: a `#[repr(C)]` struct holding only its vtable
/// pointer.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` with a single `*const Self::Vtbl`
/// field, and `Self::Vtbl` must start with an [`IUnknownVtbl`].
pub unsafe trait Interface {
    const IID: Guid;
    type Vtbl;
}

/// Declare an interface struct and its [`Interface`] impl.
macro_rules! com_interface {
    ($(#[$meta:meta])* $name:ident, $vtbl:ty, $iid:expr) => {
        $(#[$meta])*
        #[repr(C)]
        pub struct $name {
            pub vtbl: *const $vtbl,
        }

        unsafe impl $crate::com::Interface for $name {
            const IID: $crate::com::Guid = $iid;
            type Vtbl = $vtbl;
        }
    };
}
pub(crate) use com_interface;

com_interface!(
    /// `IUnknown`.
    IUnknown,
    IUnknownVtbl,
    Guid::new(0x0000_0000, 0x0000, 0x0000, [0xc0, 0, 0, 0, 0, 0, 0, 0x46])
);

// ── ComPtr ────────────────────────────────────────────────────────────────────

/// Owns one reference to a COM object.  Dropping it calls `Release` exactly
/// once; cloning calls `AddRef`.
pub struct ComPtr<T: Interface> {
    ptr: NonNull<T>,
}

impl<T: Interface> ComPtr<T> {
    /// Take ownership of a reference the caller already holds.
    ///
    /// # Safety
    ///
    /// `raw` must be null or a live interface pointer of type `T` carrying
    /// one reference that is transferred to the returned value.
    pub unsafe fn from_raw(raw: *mut T) -> Option<Self> {
        NonNull::new(raw).map(|ptr| Self { ptr })
    }

    /// Like [`ComPtr::from_raw`] for pointers that are known to be non-null.
    ///
    /// # Safety
    ///
    /// Same as [`ComPtr::from_raw`].
    pub unsafe fn from_non_null(ptr: NonNull<T>) -> Self {
        Self { ptr }
    }

    pub fn as_raw(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    /// The `this` pointer to pass as the first vtable argument.
    pub fn this(&self) -> *mut c_void {
        self.ptr.as_ptr().cast()
    }

    /// Give up ownership without releasing.
    pub fn into_raw(self) -> *mut T {
        let raw = self.ptr.as_ptr();
        std::mem::forget(self);
        raw
    }

    pub fn vtbl(&self) -> &T::Vtbl {
        // SAFETY: per `Interface`, the object starts with a vtable pointer.
        unsafe { &**self.ptr.as_ptr().cast::<*const T::Vtbl>() }
    }

    fn unknown(&self) -> &IUnknownVtbl {
        // SAFETY: every vtable begins with the IUnknown slots.
        unsafe { &**self.ptr.as_ptr().cast::<*const IUnknownVtbl>() }
    }

    /// `QueryInterface` for another interface on the same object.
    pub fn query<U: Interface>(&self) -> Result<ComPtr<U>, HResult> {
        let mut out = ptr::null_mut();
        let hr = unsafe { (self.unknown().query_interface)(self.this(), &U::IID, &mut out) };
        hr.ok()?;
        unsafe { ComPtr::from_raw(out.cast::<U>()) }.ok_or(HResult::E_POINTER)
    }
}

impl<T: Interface> Clone for ComPtr<T> {
    fn clone(&self) -> Self {
        unsafe { (self.unknown().add_ref)(self.this()) };
        Self { ptr: self.ptr }
    }
}

impl<T: Interface> Drop for ComPtr<T> {
    fn drop(&mut self) {
        unsafe { (self.unknown().release)(self.this()) };
    }
}

impl<T: Interface> fmt::Debug for ComPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ComPtr({:?})", self.ptr)
    }
}

// ── RefCount ──────────────────────────────────────────────────────────────────

/// Atomic reference count for host-implemented objects.  Starts at one: the
/// creator's reference.
#[derive(Debug)]
pub struct RefCount(AtomicU32);

impl RefCount {
    pub fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    /// Returns the new count.
    pub fn add_ref(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the new count; the caller frees the object when it hits zero.
    pub fn release(&self) -> u32 {
        let previous = self.0.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous != 0, "reference released more times than acquired");
        previous - 1
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}

// ── Apartment ─────────────────────────────────────────────────────────────────

/// The calling thread's membership in a single-threaded COM apartment.
/// Entered once at startup, left on drop.  Outside Windows there is no COM
/// runtime to join and this is a marker only.
#[derive(Debug)]
pub struct Apartment {
    _private: (),
}

impl Apartment {
    pub fn enter() -> Result<Apartment, HResult> {
        #[cfg(windows)]
        {
            let hr = unsafe { sys::CoInitializeEx(ptr::null_mut(), sys::COINIT_APARTMENTTHREADED) };
            hr.ok()?;
        }
        Ok(Apartment { _private: () })
    }
}

impl Drop for Apartment {
    fn drop(&mut self) {
        #[cfg(windows)]
        unsafe {
            sys::CoUninitialize();
        }
    }
}

#[cfg(windows)]
mod sys {
    use super::HResult;
    use std::ffi::c_void;

    pub const COINIT_APARTMENTTHREADED: u32 = 0x2;

    #[link(name = "ole32")]
    extern "system" {
        pub fn CoInitializeEx(reserved: *mut c_void, coinit: u32) -> HResult;
        pub fn CoUninitialize();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
