//! Active Scripting interface layouts.
//!
//! Vtable slot order is the ABI: every struct here lists its methods in the
//! exact order of the published interface definitions.  The wrappers on
//! [`ComPtr`] at the bottom are the only places the host calls through these
//! tables.

use std::ffi::c_void;
use std::ptr;

use crate::com::{com_interface, ComPtr, Guid, HResult, IUnknownVtbl};
use crate::marshal::WideText;
use crate::oleaut::{bstr_units, free_bstr, RawBstr, Variant};

pub type Lcid = u32;
pub type DispId = i32;

// ── Constants ─────────────────────────────────────────────────────────────────

pub const LOCALE_SYSTEM_DEFAULT: Lcid = 0x0800;

pub const DISPID_VALUE: DispId = 0;
pub const DISPID_UNKNOWN: DispId = -1;

pub const DISPATCH_METHOD: u16 = 0x1;
pub const DISPATCH_PROPERTYGET: u16 = 0x2;

pub const SCRIPTSTATE_UNINITIALIZED: u32 = 0;
pub const SCRIPTSTATE_STARTED: u32 = 1;
pub const SCRIPTSTATE_CONNECTED: u32 = 2;
pub const SCRIPTSTATE_DISCONNECTED: u32 = 3;
pub const SCRIPTSTATE_CLOSED: u32 = 4;
pub const SCRIPTSTATE_INITIALIZED: u32 = 5;

pub const SCRIPTITEM_ISVISIBLE: u32 = 0x2;

pub const SCRIPTINFO_IUNKNOWN: u32 = 0x1;
pub const SCRIPTINFO_ITYPEINFO: u32 = 0x2;

pub const SCRIPTTEXT_ISVISIBLE: u32 = 0x2;
pub const SCRIPTTEXT_ISEXPRESSION: u32 = 0x20;

// ── Structures ────────────────────────────────────────────────────────────────

/// `DISPPARAMS`.  Arguments are stored last-to-first: `rgvarg[0]` is the
/// rightmost argument of the call.
#[repr(C)]
pub struct DispParams {
    pub rgvarg: *mut Variant,
    pub rgdispid_named_args: *mut DispId,
    pub c_args: u32,
    pub c_named_args: u32,
}

impl DispParams {
    /// Parameters for a call passing `args` (already in last-to-first order).
    pub fn positional(args: &mut [Variant]) -> Self {
        Self {
            rgvarg: if args.is_empty() { ptr::null_mut() } else { args.as_mut_ptr() },
            rgdispid_named_args: ptr::null_mut(),
            c_args: args.len() as u32,
            c_named_args: 0,
        }
    }

    /// Borrow the argument array.
    ///
    /// # Safety
    ///
    /// `rgvarg` must point at `c_args` initialized variants that outlive the
    /// returned slice.
    pub unsafe fn args<'a>(&self) -> &'a [Variant] {
        if self.rgvarg.is_null() || self.c_args == 0 {
            return &[];
        }
        std::slice::from_raw_parts(self.rgvarg, self.c_args as usize)
    }
}

pub type DeferredFillInFn = unsafe extern "system" fn(info: *mut ExcepInfo) -> HResult;

/// `EXCEPINFO`.  The three strings belong to whoever holds the struct; an
/// owned `ExcepInfo` frees them on drop.
#[repr(C)]
pub struct ExcepInfo {
    pub code: u16,
    pub reserved: u16,
    pub source: RawBstr,
    pub description: RawBstr,
    pub help_file: RawBstr,
    pub help_context: u32,
    pub reserved_ptr: *mut c_void,
    pub deferred_fill_in: Option<DeferredFillInFn>,
    pub scode: i32,
}

impl ExcepInfo {
    pub fn description(&self) -> &[u16] {
        unsafe { bstr_units(self.description) }
    }
}

impl Default for ExcepInfo {
    fn default() -> Self {
        Self {
            code: 0,
            reserved: 0,
            source: ptr::null_mut(),
            description: ptr::null_mut(),
            help_file: ptr::null_mut(),
            help_context: 0,
            reserved_ptr: ptr::null_mut(),
            deferred_fill_in: None,
            scode: 0,
        }
    }
}

impl Drop for ExcepInfo {
    fn drop(&mut self) {
        for s in [&mut self.source, &mut self.description, &mut self.help_file] {
            unsafe { free_bstr(*s) };
            *s = ptr::null_mut();
        }
    }
}

// ── IClassFactory ─────────────────────────────────────────────────────────────

#[repr(C)]
pub struct IClassFactoryVtbl {
    pub base: IUnknownVtbl,
    pub create_instance: unsafe extern "system" fn(
        this: *mut c_void,
        outer: *mut c_void,
        riid: *const Guid,
        out: *mut *mut c_void,
    ) -> HResult,
    pub lock_server: unsafe extern "system" fn(this: *mut c_void, lock: i32) -> HResult,
}

com_interface!(
    IClassFactory,
    IClassFactoryVtbl,
    Guid::new(0x0000_0001, 0x0000, 0x0000, [0xc0, 0, 0, 0, 0, 0, 0, 0x46])
);

// ── IDispatch ─────────────────────────────────────────────────────────────────

#[repr(C)]
pub struct IDispatchVtbl {
    pub base: IUnknownVtbl,
    pub get_type_info_count: unsafe extern "system" fn(this: *mut c_void, count: *mut u32) -> HResult,
    pub get_type_info: unsafe extern "system" fn(
        this: *mut c_void,
        index: u32,
        lcid: Lcid,
        out: *mut *mut c_void,
    ) -> HResult,
    pub get_ids_of_names: unsafe extern "system" fn(
        this: *mut c_void,
        riid: *const Guid,
        names: *const *const u16,
        count: u32,
        lcid: Lcid,
        ids: *mut DispId,
    ) -> HResult,
    pub invoke: unsafe extern "system" fn(
        this: *mut c_void,
        id: DispId,
        riid: *const Guid,
        lcid: Lcid,
        flags: u16,
        params: *mut DispParams,
        result: *mut Variant,
        excep: *mut ExcepInfo,
        arg_err: *mut u32,
    ) -> HResult,
}

com_interface!(
    IDispatch,
    IDispatchVtbl,
    Guid::new(0x0002_0400, 0x0000, 0x0000, [0xc0, 0, 0, 0, 0, 0, 0, 0x46])
);

// ── IActiveScriptSite ─────────────────────────────────────────────────────────

#[repr(C)]
pub struct IActiveScriptSiteVtbl {
    pub base: IUnknownVtbl,
    pub get_lcid: unsafe extern "system" fn(this: *mut c_void, lcid: *mut Lcid) -> HResult,
    pub get_item_info: unsafe extern "system" fn(
        this: *mut c_void,
        name: *const u16,
        mask: u32,
        item: *mut *mut c_void,
        type_info: *mut *mut c_void,
    ) -> HResult,
    pub get_doc_version_string: unsafe extern "system" fn(this: *mut c_void, out: *mut RawBstr) -> HResult,
    pub on_script_terminate: unsafe extern "system" fn(
        this: *mut c_void,
        result: *const Variant,
        excep: *const ExcepInfo,
    ) -> HResult,
    pub on_state_change: unsafe extern "system" fn(this: *mut c_void, state: u32) -> HResult,
    pub on_script_error: unsafe extern "system" fn(this: *mut c_void, error: *mut c_void) -> HResult,
    pub on_enter_script: unsafe extern "system" fn(this: *mut c_void) -> HResult,
    pub on_leave_script: unsafe extern "system" fn(this: *mut c_void) -> HResult,
}

com_interface!(
    IActiveScriptSite,
    IActiveScriptSiteVtbl,
    Guid::new(0xdb01_a1e3, 0xa42b, 0x11cf, [0x8f, 0x20, 0x00, 0x80, 0x5f, 0x2c, 0xd0, 0x64])
);

// ── IActiveScriptError ────────────────────────────────────────────────────────

#[repr(C)]
pub struct IActiveScriptErrorVtbl {
    pub base: IUnknownVtbl,
    pub get_exception_info: unsafe extern "system" fn(this: *mut c_void, info: *mut ExcepInfo) -> HResult,
    pub get_source_position: unsafe extern "system" fn(
        this: *mut c_void,
        context: *mut u32,
        line: *mut u32,
        column: *mut i32,
    ) -> HResult,
    pub get_source_line_text: unsafe extern "system" fn(this: *mut c_void, out: *mut RawBstr) -> HResult,
}

com_interface!(
    IActiveScriptError,
    IActiveScriptErrorVtbl,
    Guid::new(0xeae1_ba61, 0xa4ed, 0x11cf, [0x8f, 0x20, 0x00, 0x80, 0x5f, 0x2c, 0xd0, 0x64])
);

// ── IActiveScript ─────────────────────────────────────────────────────────────

#[repr(C)]
pub struct IActiveScriptVtbl {
    pub base: IUnknownVtbl,
    pub set_script_site: unsafe extern "system" fn(this: *mut c_void, site: *mut c_void) -> HResult,
    pub get_script_site: unsafe extern "system" fn(
        this: *mut c_void,
        riid: *const Guid,
        out: *mut *mut c_void,
    ) -> HResult,
    pub set_script_state: unsafe extern "system" fn(this: *mut c_void, state: u32) -> HResult,
    pub get_script_state: unsafe extern "system" fn(this: *mut c_void, state: *mut u32) -> HResult,
    pub close: unsafe extern "system" fn(this: *mut c_void) -> HResult,
    pub add_named_item: unsafe extern "system" fn(this: *mut c_void, name: *const u16, flags: u32) -> HResult,
    pub add_type_lib: unsafe extern "system" fn(
        this: *mut c_void,
        libid: *const Guid,
        major: u32,
        minor: u32,
        flags: u32,
    ) -> HResult,
    pub get_script_dispatch: unsafe extern "system" fn(
        this: *mut c_void,
        item_name: *const u16,
        out: *mut *mut c_void,
    ) -> HResult,
    pub get_current_script_thread_id: unsafe extern "system" fn(this: *mut c_void, id: *mut u32) -> HResult,
    pub get_script_thread_id: unsafe extern "system" fn(
        this: *mut c_void,
        win32_id: u32,
        id: *mut u32,
    ) -> HResult,
    pub get_script_thread_state: unsafe extern "system" fn(
        this: *mut c_void,
        id: u32,
        state: *mut u32,
    ) -> HResult,
    pub interrupt_script_thread: unsafe extern "system" fn(
        this: *mut c_void,
        id: u32,
        excep: *const ExcepInfo,
        flags: u32,
    ) -> HResult,
    pub clone: unsafe extern "system" fn(this: *mut c_void, out: *mut *mut c_void) -> HResult,
}

com_interface!(
    IActiveScript,
    IActiveScriptVtbl,
    Guid::new(0xbb1a_2ae1, 0xa4f9, 0x11cf, [0x8f, 0x20, 0x00, 0x80, 0x5f, 0x2c, 0xd0, 0x64])
);

// ── IActiveScriptParse ────────────────────────────────────────────────────────

/// `IActiveScriptParse32` / `IActiveScriptParse64`.  The two differ only in
/// the width of the source-context cookie and in their IID.
#[repr(C)]
pub struct IActiveScriptParseVtbl {
    pub base: IUnknownVtbl,
    pub init_new: unsafe extern "system" fn(this: *mut c_void) -> HResult,
    pub add_scriptlet: unsafe extern "system" fn(
        this: *mut c_void,
        default_name: *const u16,
        code: *const u16,
        item_name: *const u16,
        sub_item_name: *const u16,
        event_name: *const u16,
        delimiter: *const u16,
        context: usize,
        start_line: u32,
        flags: u32,
        name: *mut RawBstr,
        excep: *mut ExcepInfo,
    ) -> HResult,
    pub parse_script_text: unsafe extern "system" fn(
        this: *mut c_void,
        code: *const u16,
        item_name: *const u16,
        context: *mut c_void,
        delimiter: *const u16,
        source_context: usize,
        start_line: u32,
        flags: u32,
        result: *mut Variant,
        excep: *mut ExcepInfo,
    ) -> HResult,
}

#[cfg(target_pointer_width = "64")]
const IID_IACTIVESCRIPTPARSE: Guid =
    Guid::new(0xc7ef_7658, 0xe1ee, 0x480e, [0x97, 0xea, 0xd5, 0x2c, 0xb4, 0xd7, 0x6d, 0x17]);
#[cfg(not(target_pointer_width = "64"))]
const IID_IACTIVESCRIPTPARSE: Guid =
    Guid::new(0xbb1a_2ae2, 0xa4f9, 0x11cf, [0x8f, 0x20, 0x00, 0x80, 0x5f, 0x2c, 0xd0, 0x64]);

com_interface!(IActiveScriptParse, IActiveScriptParseVtbl, IID_IACTIVESCRIPTPARSE);

// ── Call wrappers ─────────────────────────────────────────────────────────────

impl ComPtr<IActiveScript> {
    pub fn set_script_site(&self, site: *mut c_void) -> HResult {
        unsafe { (self.vtbl().set_script_site)(self.this(), site) }
    }

    pub fn set_script_state(&self, state: u32) -> HResult {
        unsafe { (self.vtbl().set_script_state)(self.this(), state) }
    }

    pub fn add_named_item(&self, name: &WideText, flags: u32) -> HResult {
        unsafe { (self.vtbl().add_named_item)(self.this(), name.as_ptr(), flags) }
    }

    pub fn close(&self) -> HResult {
        unsafe { (self.vtbl().close)(self.this()) }
    }
}

impl ComPtr<IActiveScriptParse> {
    pub fn init_new(&self) -> HResult {
        unsafe { (self.vtbl().init_new)(self.this()) }
    }

    /// `ParseScriptText` with no item, context, or delimiter.  `result` may
    /// be null for statement blocks.
    pub fn parse_script_text(
        &self,
        code: &WideText,
        flags: u32,
        result: *mut Variant,
        excep: &mut ExcepInfo,
    ) -> HResult {
        unsafe {
            (self.vtbl().parse_script_text)(
                self.this(),
                code.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
                ptr::null(),
                0,
                0,
                flags,
                result,
                excep,
            )
        }
    }
}

impl ComPtr<IDispatch> {
    /// Resolve one member name to its dispatch id.
    pub fn get_id_of_name(&self, name: &str) -> Result<DispId, HResult> {
        let name = WideText::new(name);
        let names = [name.as_ptr()];
        let mut id = DISPID_UNKNOWN;
        let hr = unsafe {
            (self.vtbl().get_ids_of_names)(self.this(), &Guid::NULL, names.as_ptr(), 1, LOCALE_SYSTEM_DEFAULT, &mut id)
        };
        hr.ok().map(|()| id)
    }

    /// `Invoke` with explicit flags.  `args` is in last-to-first order.
    pub fn invoke(&self, id: DispId, flags: u16, args: &mut [Variant]) -> Result<Variant, HResult> {
        let mut params = DispParams::positional(args);
        let mut result = Variant::empty();
        let mut excep = ExcepInfo::default();
        let mut arg_err = 0u32;
        let hr = unsafe {
            (self.vtbl().invoke)(
                self.this(),
                id,
                &Guid::NULL,
                LOCALE_SYSTEM_DEFAULT,
                flags,
                &mut params,
                &mut result,
                &mut excep,
                &mut arg_err,
            )
        };
        hr.ok().map(|()| result)
    }

    pub fn call_method(&self, id: DispId, args: &mut [Variant]) -> Result<Variant, HResult> {
        self.invoke(id, DISPATCH_METHOD, args)
    }

    pub fn property_get(&self, id: DispId) -> Result<Variant, HResult> {
        self.invoke(id, DISPATCH_PROPERTYGET, &mut [])
    }
}

/// Borrowed view of an `IActiveScriptError` handed to the site.
pub struct ScriptErrorRef(*mut c_void);

impl ScriptErrorRef {
    /// # Safety
    ///
    /// `raw` must be null or a live `IActiveScriptError` for the lifetime of
    /// the returned view.
    pub unsafe fn new(raw: *mut c_void) -> Option<Self> {
        (!raw.is_null()).then_some(Self(raw))
    }

    fn vtbl(&self) -> &IActiveScriptErrorVtbl {
        unsafe { &**self.0.cast::<*const IActiveScriptErrorVtbl>() }
    }

    /// Zero-based `(line, column)`; `(0, 0)` if the engine has none.
    pub fn source_position(&self) -> (u32, i32) {
        let (mut context, mut line, mut column) = (0u32, 0u32, 0i32);
        let hr = unsafe { (self.vtbl().get_source_position)(self.0, &mut context, &mut line, &mut column) };
        if hr.is_err() {
            return (0, 0);
        }
        (line, column)
    }

    pub fn exception_info(&self) -> ExcepInfo {
        let mut info = ExcepInfo::default();
        let hr = unsafe { (self.vtbl().get_exception_info)(self.0, &mut info) };
        if hr.is_err() {
            tracing::debug!(%hr, "GetExceptionInfo failed");
        }
        info
    }
}
