//! `IActiveScriptSite`: the object the engine calls back into while it runs.
//!
//! The engine may keep its own references to the site until it is closed,
//! so the site is heap allocated and freed by whichever `Release` brings the
//! count to zero.  The host keeps one reference through [`SiteRef`].

use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::activscp::{
    ExcepInfo, IActiveScriptSite, IActiveScriptSiteVtbl, IDispatch, Lcid, ScriptErrorRef,
    LOCALE_SYSTEM_DEFAULT, SCRIPTINFO_ITYPEINFO, SCRIPTINFO_IUNKNOWN,
};
use crate::com::{ComPtr, Guid, HResult, IUnknown, IUnknownVtbl, Interface, RefCount};
use crate::console::Console;
use crate::host::HostObject;
use crate::marshal::{to_utf8, wide_eq_ignore_case, wide_from_ptr};
use crate::oleaut::{Bstr, RawBstr, Variant};

/// Name under which the host object is registered with the engine.
pub const NAMED_ITEM: &str = "WScript";

const DOC_VERSION: &str = "1";

#[repr(C)]
pub struct ScriptSite {
    iface: IActiveScriptSite,
    refs: RefCount,
    suppress_errors: AtomicBool,
    wscript: ComPtr<IDispatch>,
    console: Console,
}

static SITE_VTBL: IActiveScriptSiteVtbl = IActiveScriptSiteVtbl {
    base: IUnknownVtbl {
        query_interface,
        add_ref,
        release,
    },
    get_lcid,
    get_item_info,
    get_doc_version_string,
    on_script_terminate,
    on_state_change,
    on_script_error,
    on_enter_script,
    on_leave_script,
};

/// The host's reference to a [`ScriptSite`].
pub struct SiteRef(NonNull<ScriptSite>);

impl SiteRef {
    pub fn new(console: Console) -> Self {
        let site = Box::new(ScriptSite {
            iface: IActiveScriptSite { vtbl: &SITE_VTBL },
            refs: RefCount::new(),
            suppress_errors: AtomicBool::new(false),
            wscript: HostObject::create(console.clone()),
            console,
        });
        SiteRef(NonNull::from(Box::leak(site)))
    }

    fn site(&self) -> &ScriptSite {
        unsafe { self.0.as_ref() }
    }

    /// Pointer to hand to `SetScriptSite`.  The engine takes its own
    /// reference.
    pub fn as_iface(&self) -> *mut c_void {
        self.0.as_ptr().cast()
    }

    pub fn suppress_errors(&self) -> bool {
        self.site().suppress_errors.load(Ordering::Relaxed)
    }

    /// Returns the previous setting.
    pub fn set_suppress_errors(&self, on: bool) -> bool {
        self.site().suppress_errors.swap(on, Ordering::Relaxed)
    }

    #[cfg(test)]
    fn ref_count(&self) -> u32 {
        self.site().refs.get()
    }
}

impl Drop for SiteRef {
    fn drop(&mut self) {
        unsafe { release(self.as_iface()) };
    }
}

unsafe fn this<'a>(ptr: *mut c_void) -> &'a ScriptSite {
    &*ptr.cast::<ScriptSite>()
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
    if *riid == IUnknown::IID || *riid == IActiveScriptSite::IID {
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
        tracing::trace!("script site freed");
        drop(Box::from_raw(ptr.cast::<ScriptSite>()));
    }
    n
}

// ── IActiveScriptSite ─────────────────────────────────────────────────────────

unsafe extern "system" fn get_lcid(_ptr: *mut c_void, lcid: *mut Lcid) -> HResult {
    if lcid.is_null() {
        return HResult::E_POINTER;
    }
    *lcid = LOCALE_SYSTEM_DEFAULT;
    HResult::S_OK
}

unsafe extern "system" fn get_item_info(
    ptr: *mut c_void,
    name: *const u16,
    mask: u32,
    item: *mut *mut c_void,
    type_info: *mut *mut c_void,
) -> HResult {
    if !item.is_null() {
        *item = ptr::null_mut();
    }
    if !type_info.is_null() {
        *type_info = ptr::null_mut();
    }
    let known = matches!(wide_from_ptr(name), Some(n) if wide_eq_ignore_case(n, NAMED_ITEM));
    if !known || mask & SCRIPTINFO_ITYPEINFO != 0 {
        tracing::trace!(mask, known, "GetItemInfo: not found");
        return HResult::TYPE_E_ELEMENTNOTFOUND;
    }
    if mask & SCRIPTINFO_IUNKNOWN != 0 {
        if item.is_null() {
            return HResult::E_POINTER;
        }
        *item = this(ptr).wscript.clone().into_raw().cast();
    }
    HResult::S_OK
}

unsafe extern "system" fn get_doc_version_string(_ptr: *mut c_void, out: *mut RawBstr) -> HResult {
    if out.is_null() {
        return HResult::E_POINTER;
    }
    *out = ptr::null_mut();
    match Bstr::new(DOC_VERSION) {
        Some(version) => {
            *out = version.into_raw();
            HResult::S_OK
        }
        None => HResult::E_OUTOFMEMORY,
    }
}

unsafe extern "system" fn on_script_terminate(
    _ptr: *mut c_void,
    _result: *const Variant,
    _excep: *const ExcepInfo,
) -> HResult {
    HResult::S_OK
}

unsafe extern "system" fn on_state_change(_ptr: *mut c_void, state: u32) -> HResult {
    tracing::trace!(state, "script state changed");
    HResult::S_OK
}

unsafe extern "system" fn on_script_error(ptr: *mut c_void, error: *mut c_void) -> HResult {
    let site = this(ptr);
    if site.suppress_errors.load(Ordering::Relaxed) {
        tracing::debug!("script error suppressed");
        return HResult::S_OK;
    }
    let Some(error) = ScriptErrorRef::new(error) else {
        return HResult::S_OK;
    };
    let (line, column) = error.source_position();
    let info = error.exception_info();
    let description = to_utf8(info.description()).unwrap_or_default();
    site.console.write_err(&format!(
        "error:{}:{}: {}\n",
        u64::from(line) + 1,
        i64::from(column) + 1,
        description
    ));
    HResult::S_OK
}

unsafe extern "system" fn on_enter_script(_ptr: *mut c_void) -> HResult {
    HResult::S_OK
}

unsafe extern "system" fn on_leave_script(_ptr: *mut c_void) -> HResult {
    HResult::S_OK
}
