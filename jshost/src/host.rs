//! The `WScript` object scripts see.  It has one method, `Echo`.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use crate::activscp::{
    DispId, DispParams, ExcepInfo, IDispatch, IDispatchVtbl, Lcid, DISPATCH_METHOD, DISPID_UNKNOWN,
};
use crate::com::{ComPtr, Guid, HResult, IUnknown, IUnknownVtbl, Interface, RefCount};
use crate::console::Console;
use crate::marshal::{to_text, to_utf8, wide_eq_ignore_case, wide_from_ptr};
use crate::oleaut::Variant;

pub const ECHO_NAME: &str = "Echo";
pub const DISPID_ECHO: DispId = 1;

#[repr(C)]
pub struct HostObject {
    iface: IDispatch,
    refs: RefCount,
    console: Console,
}

static HOST_VTBL: IDispatchVtbl = IDispatchVtbl {
    base: IUnknownVtbl {
        query_interface,
        add_ref,
        release,
    },
    get_type_info_count,
    get_type_info,
    get_ids_of_names,
    invoke,
};

impl HostObject {
    /// A new object holding one reference, owned by the returned pointer.
    pub fn create(console: Console) -> ComPtr<IDispatch> {
        let obj = Box::new(HostObject {
            iface: IDispatch { vtbl: &HOST_VTBL },
            refs: RefCount::new(),
            console,
        });
        let raw = NonNull::from(Box::leak(obj)).cast::<IDispatch>();
        unsafe { ComPtr::from_non_null(raw) }
    }

    /// Write the arguments left to right, space separated, newline
    /// terminated.  `args` arrives last-to-first.
    fn echo(&self, args: &[Variant]) {
        let mut line = args
            .iter()
            .rev()
            .filter_map(to_text)
            .map(|text| to_utf8(text.as_wide()).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(" ");
        line.push('\n');
        self.console.write_out(&line);
    }
}

unsafe fn this<'a>(ptr: *mut c_void) -> &'a HostObject {
    &*ptr.cast::<HostObject>()
}

// ── IUnknown ──────────────────────────────────────────────────────────────────

unsafe extern "system" fn query_interface(
    ptr: *mut c_void,
    riid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    if out.is_null() {
        return HResult::E_POINTER;
    }
    *out = ptr::null_mut();
    if riid.is_null() {
        return HResult::E_POINTER;
    }
    if *riid == IUnknown::IID || *riid == IDispatch::IID {
        this(ptr).refs.add_ref();
        *out = ptr;
        return HResult::S_OK;
    }
    HResult::E_NOINTERFACE
}

unsafe extern "system" fn add_ref(ptr: *mut c_void) -> u32 {
    this(ptr).refs.add_ref()
}

unsafe extern "system" fn release(ptr: *mut c_void) -> u32 {
    let n = this(ptr).refs.release();
    if n == 0 {
        drop(Box::from_raw(ptr.cast::<HostObject>()));
    }
    n
}

// ── IDispatch ─────────────────────────────────────────────────────────────────

unsafe extern "system" fn get_type_info_count(_ptr: *mut c_void, count: *mut u32) -> HResult {
    if count.is_null() {
        return HResult::E_POINTER;
    }
    *count = 0;
    HResult::S_OK
}

unsafe extern "system" fn get_type_info(
    _ptr: *mut c_void,
    _index: u32,
    _lcid: Lcid,
    out: *mut *mut c_void,
) -> HResult {
    if !out.is_null() {
        *out = ptr::null_mut();
    }
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_ids_of_names(
    _ptr: *mut c_void,
    _riid: *const Guid,
    names: *const *const u16,
    count: u32,
    _lcid: Lcid,
    ids: *mut DispId,
) -> HResult {
    if names.is_null() || ids.is_null() || count == 0 {
        return HResult::E_INVALIDARG;
    }
    // Later slots name arguments; only the member name matters.
    match wide_from_ptr(*names) {
        Some(name) if wide_eq_ignore_case(name, ECHO_NAME) => {
            *ids = DISPID_ECHO;
            HResult::S_OK
        }
        _ => {
            *ids = DISPID_UNKNOWN;
            HResult::DISP_E_UNKNOWNNAME
        }
    }
}

unsafe extern "system" fn invoke(
    ptr: *mut c_void,
    id: DispId,
    _riid: *const Guid,
    _lcid: Lcid,
    flags: u16,
    params: *mut DispParams,
    result: *mut Variant,
    _excep: *mut ExcepInfo,
    _arg_err: *mut u32,
) -> HResult {
    if !result.is_null() {
        result.write(Variant::empty());
    }
    if flags & DISPATCH_METHOD == 0 || id != DISPID_ECHO {
        return HResult::DISP_E_MEMBERNOTFOUND;
    }
    let args: &[Variant] = if params.is_null() { &[] } else { (*params).args() };
    this(ptr).echo(args);
    HResult::S_OK
}
