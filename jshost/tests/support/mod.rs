//! A fake script engine plugin for driving the host without `jscript.dll`.
//!
//! It speaks the same class-factory / `IActiveScript` /
//! `IActiveScriptParse` / `IActiveScriptError` contract as the real engine
//! and understands a tiny expression language: integer and string literals,
//! `+`, `undefined`, the `ScriptEngine*Version()` functions, `print(...)`,
//! `console.log(...)` and `WScript.Echo(...)`.  Statements are separated by
//! `;` or newlines.
//!
//! Every call is logged, live objects are counted, and any setup step can be
//! made to fail.  Fake objects are never freed: when their count reaches
//! zero they are marked dead, so a stray `Release` is detected instead of
//! touching freed memory.  State is per thread, so tests stay independent.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::ffi::c_void;
use std::mem::offset_of;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use jshost::activscp::{
    ExcepInfo, IActiveScript, IActiveScriptError, IActiveScriptErrorVtbl, IActiveScriptParse,
    IActiveScriptParseVtbl, IActiveScriptSiteVtbl, IActiveScriptVtbl, IClassFactory, IClassFactoryVtbl,
    IDispatch, SCRIPTINFO_IUNKNOWN, SCRIPTSTATE_CLOSED, SCRIPTSTATE_UNINITIALIZED, SCRIPTTEXT_ISEXPRESSION,
};
use jshost::com::{ComPtr, Guid, HResult, IUnknown, IUnknownVtbl, Interface, CLSID_JSCRIPT};
use jshost::console::{Capture, Console};
use jshost::engine::Engine;
use jshost::error::EngineError;
use jshost::marshal::{wide_from_ptr, WideText};
use jshost::module::{DllGetClassObjectFn, ModuleLoader, PluginModule};
use jshost::oleaut::{Bstr, RawBstr, Variant};

pub const MAJOR: i64 = 5;
pub const MINOR: i64 = 8;
pub const BUILD: i64 = 16384;

const CLASS_E_NOAGGREGATION: HResult = HResult(0x8004_0110_u32 as i32);

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    ClassObject,
    CreateInstance,
    QueryParse,
    SetScriptSite,
    InitNew,
    AddNamedItem,
    SetScriptState,
    Bootstrap,
}

impl FailPoint {
    pub const ALL: [FailPoint; 8] = [
        FailPoint::ClassObject,
        FailPoint::CreateInstance,
        FailPoint::QueryParse,
        FailPoint::SetScriptSite,
        FailPoint::InitNew,
        FailPoint::AddNamedItem,
        FailPoint::SetScriptState,
        FailPoint::Bootstrap,
    ];
}

#[derive(Default)]
struct PluginState {
    fail_at: Option<FailPoint>,
    events: Vec<String>,
    live: i32,
    over_released: bool,
    site_refs: i32,
    unloads: u32,
}

thread_local! {
    static STATE: RefCell<PluginState> = RefCell::new(PluginState::default());
}

fn with_state<R>(f: impl FnOnce(&mut PluginState) -> R) -> R {
    STATE.with(|s| f(&mut s.borrow_mut()))
}

fn record(event: impl Into<String>) {
    let event = event.into();
    with_state(|s| s.events.push(event));
}

fn should_fail(point: FailPoint) -> bool {
    with_state(|s| s.fail_at == Some(point))
}

/// Start a fresh scenario on this thread.
pub fn reset(fail_at: Option<FailPoint>) {
    with_state(|s| {
        *s = PluginState {
            fail_at,
            ..PluginState::default()
        }
    });
}

pub fn events() -> Vec<String> {
    with_state(|s| s.events.clone())
}

pub fn live_objects() -> i32 {
    with_state(|s| s.live)
}

pub fn over_released() -> bool {
    with_state(|s| s.over_released)
}

pub fn site_refs() -> i32 {
    with_state(|s| s.site_refs)
}

pub fn unloads() -> u32 {
    with_state(|s| s.unloads)
}

fn add_ref_count(refs: &AtomicU32) -> u32 {
    refs.fetch_add(1, Ordering::SeqCst) + 1
}

fn release_count(refs: &AtomicU32, what: &str) -> u32 {
    if refs.load(Ordering::SeqCst) == 0 {
        with_state(|s| s.over_released = true);
        return 0;
    }
    let n = refs.fetch_sub(1, Ordering::SeqCst) - 1;
    if n == 0 {
        with_state(|s| {
            s.live -= 1;
            s.events.push(format!("{what} freed"));
        });
    }
    n
}

fn born(what: &str) {
    with_state(|s| {
        s.live += 1;
        s.events.push(format!("{what} created"));
    });
}

// ── Loader ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
pub struct FakeLoader {
    /// Behave as if the module file does not exist.
    pub missing: bool,
    /// Load a module that lacks `DllGetClassObject`.
    pub no_entry: bool,
}

struct FakeModule {
    no_entry: bool,
}

impl PluginModule for FakeModule {
    fn class_object_entry(&self) -> Option<DllGetClassObjectFn> {
        (!self.no_entry).then_some(dll_get_class_object as DllGetClassObjectFn)
    }
}

impl Drop for FakeModule {
    fn drop(&mut self) {
        with_state(|s| {
            s.unloads += 1;
            s.events.push("unload".to_owned());
        });
    }
}

impl ModuleLoader for FakeLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>, EngineError> {
        if self.missing {
            return Err(EngineError::ModuleLoad {
                path: path.to_path_buf(),
                reason: "no such file".to_owned(),
            });
        }
        record("load");
        Ok(Box::new(FakeModule { no_entry: self.no_entry }))
    }
}

/// Set up an engine on the fake plugin with captured output.
pub fn init_engine(fail_at: Option<FailPoint>) -> (Result<Engine, EngineError>, Capture) {
    let (console, capture) = Console::capture();
    (init_engine_on(console, fail_at), capture)
}

/// Like [`init_engine`], writing to a console the caller keeps.
pub fn init_engine_on(console: Console, fail_at: Option<FailPoint>) -> Result<Engine, EngineError> {
    reset(fail_at);
    Engine::init(&FakeLoader::default(), Path::new("fake.dll"), console)
}

/// The `eval` / `exec` calls recorded since `since`.
pub fn runs_since(since: usize) -> Vec<String> {
    events()
        .into_iter()
        .skip(since)
        .filter(|e| e == "eval" || e == "exec")
        .collect()
}

// ── Class factory ─────────────────────────────────────────────────────────────

#[repr(C)]
struct FakeFactory {
    iface: IClassFactory,
    refs: AtomicU32,
}

static FACTORY_VTBL: IClassFactoryVtbl = IClassFactoryVtbl {
    base: IUnknownVtbl {
        query_interface: factory_query_interface,
        add_ref: factory_add_ref,
        release: factory_release,
    },
    create_instance,
    lock_server,
};

unsafe extern "system" fn dll_get_class_object(
    clsid: *const Guid,
    riid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    *out = ptr::null_mut();
    if should_fail(FailPoint::ClassObject) || *clsid != CLSID_JSCRIPT {
        return HResult::CLASS_E_CLASSNOTAVAILABLE;
    }
    if *riid != IClassFactory::IID {
        return HResult::E_NOINTERFACE;
    }
    let factory = Box::leak(Box::new(FakeFactory {
        iface: IClassFactory { vtbl: &FACTORY_VTBL },
        refs: AtomicU32::new(1),
    }));
    born("factory");
    *out = (factory as *mut FakeFactory).cast();
    HResult::S_OK
}

unsafe fn factory<'a>(ptr: *mut c_void) -> &'a FakeFactory {
    &*ptr.cast::<FakeFactory>()
}

unsafe extern "system" fn factory_query_interface(
    ptr: *mut c_void,
    riid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    *out = ptr::null_mut();
    if *riid == IUnknown::IID || *riid == IClassFactory::IID {
        add_ref_count(&factory(ptr).refs);
        *out = ptr;
        return HResult::S_OK;
    }
    HResult::E_NOINTERFACE
}

unsafe extern "system" fn factory_add_ref(ptr: *mut c_void) -> u32 {
    add_ref_count(&factory(ptr).refs)
}

unsafe extern "system" fn factory_release(ptr: *mut c_void) -> u32 {
    release_count(&factory(ptr).refs, "factory")
}

unsafe extern "system" fn create_instance(
    _ptr: *mut c_void,
    outer: *mut c_void,
    riid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    *out = ptr::null_mut();
    if !outer.is_null() {
        return CLASS_E_NOAGGREGATION;
    }
    if should_fail(FailPoint::CreateInstance) {
        return HResult::E_OUTOFMEMORY;
    }
    if *riid != IActiveScript::IID {
        return HResult::E_NOINTERFACE;
    }
    let engine = Box::leak(Box::new(FakeEngine {
        script: IActiveScript { vtbl: &SCRIPT_VTBL },
        parse: IActiveScriptParse { vtbl: &PARSE_VTBL },
        refs: AtomicU32::new(1),
        site: Cell::new(ptr::null_mut()),
        state: Cell::new(SCRIPTSTATE_UNINITIALIZED),
        named_items: RefCell::new(Vec::new()),
        initialized: Cell::new(false),
        bootstrapped: Cell::new(false),
    }));
    born("engine");
    *out = (engine as *mut FakeEngine).cast();
    HResult::S_OK
}

unsafe extern "system" fn lock_server(_ptr: *mut c_void, _lock: i32) -> HResult {
    HResult::S_OK
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// One object behind both `IActiveScript` and `IActiveScriptParse`.
#[repr(C)]
struct FakeEngine {
    script: IActiveScript,
    parse: IActiveScriptParse,
    refs: AtomicU32,
    site: Cell<*mut c_void>,
    state: Cell<u32>,
    named_items: RefCell<Vec<String>>,
    initialized: Cell<bool>,
    bootstrapped: Cell<bool>,
}

unsafe fn from_script<'a>(ptr: *mut c_void) -> &'a FakeEngine {
    &*ptr.cast::<FakeEngine>()
}

unsafe fn from_parse<'a>(ptr: *mut c_void) -> &'a FakeEngine {
    &*ptr.cast::<u8>().sub(offset_of!(FakeEngine, parse)).cast::<FakeEngine>()
}

fn site_vtbl<'a>(site: *mut c_void) -> &'a IActiveScriptSiteVtbl {
    unsafe { &**site.cast::<*const IActiveScriptSiteVtbl>() }
}

impl FakeEngine {
    fn query(&self, riid: &Guid, out: *mut *mut c_void) -> HResult {
        let target: *mut c_void = if *riid == IUnknown::IID || *riid == IActiveScript::IID {
            ptr::addr_of!(self.script).cast_mut().cast()
        } else if *riid == IActiveScriptParse::IID {
            record("query parse");
            if should_fail(FailPoint::QueryParse) {
                return HResult::E_NOINTERFACE;
            }
            ptr::addr_of!(self.parse).cast_mut().cast()
        } else {
            return HResult::E_NOINTERFACE;
        };
        add_ref_count(&self.refs);
        unsafe { *out = target };
        HResult::S_OK
    }

    fn release(&self, via: &str) -> u32 {
        record(format!("release {via}"));
        let n = release_count(&self.refs, "engine");
        if n == 0 {
            self.drop_site();
        }
        n
    }

    fn hold_site(&self, site: *mut c_void) {
        unsafe { (site_vtbl(site).base.add_ref)(site) };
        with_state(|s| s.site_refs += 1);
        self.site.set(site);
    }

    fn drop_site(&self) {
        let site = self.site.replace(ptr::null_mut());
        if !site.is_null() {
            unsafe { (site_vtbl(site).base.release)(site) };
            with_state(|s| s.site_refs -= 1);
        }
    }

    fn has_named_item(&self, name: &str) -> bool {
        self.named_items.borrow().iter().any(|n| n.eq_ignore_ascii_case(name))
    }

    // ── Script execution ──────────────────────────────────────────────────

    fn parse_text(&self, code: &str, flags: u32, result: *mut Variant) -> HResult {
        if self.site.get().is_null() || !self.initialized.get() {
            return HResult::E_UNEXPECTED;
        }
        if code.starts_with("function print(") {
            record("bootstrap");
            if should_fail(FailPoint::Bootstrap) {
                return HResult::E_FAIL;
            }
            self.bootstrapped.set(true);
            return HResult::S_OK;
        }
        if flags & SCRIPTTEXT_ISEXPRESSION != 0 {
            record("eval");
            let lead = code.len() - code.trim_start().len();
            return match self.eval_statement(code.trim()) {
                Ok(value) => {
                    if !result.is_null() {
                        unsafe { *result = value.into_variant() };
                    }
                    HResult::S_OK
                }
                Err(e) => self.report(0, lead + e.offset, &e.message),
            };
        }
        record("exec");
        for (line_no, line) in code.split('\n').enumerate() {
            let mut column = 0;
            for stmt in line.trim_end_matches('\r').split(';') {
                let start = column;
                column += stmt.len() + 1;
                if stmt.trim().is_empty() {
                    continue;
                }
                let lead = stmt.len() - stmt.trim_start().len();
                if let Err(e) = self.eval_statement(stmt.trim()) {
                    return self.report(line_no, start + lead + e.offset, &e.message);
                }
            }
        }
        HResult::S_OK
    }

    fn eval_statement(&self, src: &str) -> Result<Val, ScriptError> {
        let toks = tokenize(src)?;
        let mut ev = Eval {
            engine: self,
            toks,
            pos: 0,
            end: src.len(),
        };
        let value = ev.expr()?;
        match ev.toks.get(ev.pos) {
            Some((at, _)) => Err(ScriptError::syntax(*at)),
            None => Ok(value),
        }
    }

    fn call(&self, name: &str, args: Vec<Val>) -> Result<Val, String> {
        match name {
            "ScriptEngineMajorVersion" => Ok(Val::Int(MAJOR)),
            "ScriptEngineMinorVersion" => Ok(Val::Int(MINOR)),
            "ScriptEngineBuildVersion" => Ok(Val::Int(BUILD)),
            "print" | "console.log" if self.bootstrapped.get() => {
                let line = args.iter().map(Val::join_text).collect::<Vec<_>>().join(" ");
                self.echo(vec![Val::Str(line)])
            }
            "WScript.Echo" => self.echo(args),
            _ => Err(format!("'{name}' is undefined")),
        }
    }

    /// Call `WScript.Echo` the way a real engine does: resolve the named
    /// item through the site, then go through `IDispatch`.
    fn echo(&self, args: Vec<Val>) -> Result<Val, String> {
        if !self.has_named_item("WScript") {
            return Err("'WScript' is undefined".to_owned());
        }
        let item = unsafe { site_item(self.site.get(), "WScript") }
            .map_err(|hr| format!("GetItemInfo failed: {hr}"))?;
        let disp = item
            .query::<IDispatch>()
            .map_err(|hr| format!("Object doesn't support this property or method ({hr})"))?;
        let id = disp
            .get_id_of_name("Echo")
            .map_err(|hr| format!("Object doesn't support this property or method ({hr})"))?;
        let mut argv: Vec<Variant> = args.into_iter().rev().map(Val::into_variant).collect();
        disp.call_method(id, &mut argv).map_err(|hr| format!("Echo failed: {hr}"))?;
        Ok(Val::Undefined)
    }

    fn report(&self, line: usize, column: usize, message: &str) -> HResult {
        let error = Box::leak(Box::new(FakeError {
            iface: IActiveScriptError { vtbl: &ERROR_VTBL },
            refs: AtomicU32::new(1),
            line: line as u32,
            column: column as i32,
            description: message.to_owned(),
        }));
        born("error");
        let site = self.site.get();
        let raw: *mut c_void = (error as *mut FakeError).cast();
        unsafe {
            (site_vtbl(site).on_script_error)(site, raw);
            error_release(raw);
        }
        HResult::SCRIPT_E_REPORTED
    }
}

unsafe fn site_item(site: *mut c_void, name: &str) -> Result<ComPtr<IUnknown>, HResult> {
    let name = WideText::new(name);
    let mut item = ptr::null_mut();
    let hr = (site_vtbl(site).get_item_info)(site, name.as_ptr(), SCRIPTINFO_IUNKNOWN, &mut item, ptr::null_mut());
    hr.ok()?;
    ComPtr::from_raw(item.cast::<IUnknown>()).ok_or(HResult::E_POINTER)
}

static SCRIPT_VTBL: IActiveScriptVtbl = IActiveScriptVtbl {
    base: IUnknownVtbl {
        query_interface: script_query_interface,
        add_ref: script_add_ref,
        release: script_release,
    },
    set_script_site,
    get_script_site,
    set_script_state,
    get_script_state,
    close,
    add_named_item,
    add_type_lib,
    get_script_dispatch,
    get_current_script_thread_id,
    get_script_thread_id,
    get_script_thread_state,
    interrupt_script_thread,
    clone: clone_script,
};

static PARSE_VTBL: IActiveScriptParseVtbl = IActiveScriptParseVtbl {
    base: IUnknownVtbl {
        query_interface: parse_query_interface,
        add_ref: parse_add_ref,
        release: parse_release,
    },
    init_new,
    add_scriptlet,
    parse_script_text,
};

unsafe extern "system" fn script_query_interface(
    ptr: *mut c_void,
    riid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    *out = ptr::null_mut();
    from_script(ptr).query(&*riid, out)
}

unsafe extern "system" fn script_add_ref(ptr: *mut c_void) -> u32 {
    add_ref_count(&from_script(ptr).refs)
}

unsafe extern "system" fn script_release(ptr: *mut c_void) -> u32 {
    from_script(ptr).release("script")
}

unsafe extern "system" fn parse_query_interface(
    ptr: *mut c_void,
    riid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    *out = ptr::null_mut();
    from_parse(ptr).query(&*riid, out)
}

unsafe extern "system" fn parse_add_ref(ptr: *mut c_void) -> u32 {
    add_ref_count(&from_parse(ptr).refs)
}

unsafe extern "system" fn parse_release(ptr: *mut c_void) -> u32 {
    from_parse(ptr).release("parse")
}

unsafe extern "system" fn set_script_site(ptr: *mut c_void, site: *mut c_void) -> HResult {
    record("set site");
    if should_fail(FailPoint::SetScriptSite) {
        return HResult::E_FAIL;
    }
    if site.is_null() {
        return HResult::E_POINTER;
    }
    let engine = from_script(ptr);
    if !engine.site.get().is_null() {
        return HResult::E_UNEXPECTED;
    }
    engine.hold_site(site);
    HResult::S_OK
}

unsafe extern "system" fn get_script_site(
    _ptr: *mut c_void,
    _riid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    *out = ptr::null_mut();
    HResult::E_NOTIMPL
}

unsafe extern "system" fn set_script_state(ptr: *mut c_void, state: u32) -> HResult {
    record(format!("set state {state}"));
    if should_fail(FailPoint::SetScriptState) {
        return HResult::E_FAIL;
    }
    from_script(ptr).state.set(state);
    HResult::S_OK
}

unsafe extern "system" fn get_script_state(ptr: *mut c_void, state: *mut u32) -> HResult {
    *state = from_script(ptr).state.get();
    HResult::S_OK
}

unsafe extern "system" fn close(ptr: *mut c_void) -> HResult {
    record("close");
    let engine = from_script(ptr);
    engine.drop_site();
    engine.state.set(SCRIPTSTATE_CLOSED);
    HResult::S_OK
}

unsafe extern "system" fn add_named_item(ptr: *mut c_void, name: *const u16, flags: u32) -> HResult {
    let name = wide_from_ptr(name).map(String::from_utf16_lossy).unwrap_or_default();
    record(format!("add named item {name} {flags}"));
    if should_fail(FailPoint::AddNamedItem) {
        return HResult::E_FAIL;
    }
    from_script(ptr).named_items.borrow_mut().push(name);
    HResult::S_OK
}

unsafe extern "system" fn add_type_lib(
    _ptr: *mut c_void,
    _libid: *const Guid,
    _major: u32,
    _minor: u32,
    _flags: u32,
) -> HResult {
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_script_dispatch(
    _ptr: *mut c_void,
    _item_name: *const u16,
    out: *mut *mut c_void,
) -> HResult {
    *out = ptr::null_mut();
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_current_script_thread_id(_ptr: *mut c_void, _id: *mut u32) -> HResult {
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_script_thread_id(_ptr: *mut c_void, _win32_id: u32, _id: *mut u32) -> HResult {
    HResult::E_NOTIMPL
}

unsafe extern "system" fn get_script_thread_state(_ptr: *mut c_void, _id: u32, _state: *mut u32) -> HResult {
    HResult::E_NOTIMPL
}

unsafe extern "system" fn interrupt_script_thread(
    _ptr: *mut c_void,
    _id: u32,
    _excep: *const ExcepInfo,
    _flags: u32,
) -> HResult {
    HResult::E_NOTIMPL
}

unsafe extern "system" fn clone_script(_ptr: *mut c_void, out: *mut *mut c_void) -> HResult {
    *out = ptr::null_mut();
    HResult::E_NOTIMPL
}

unsafe extern "system" fn init_new(ptr: *mut c_void) -> HResult {
    record("init new");
    if should_fail(FailPoint::InitNew) {
        return HResult::E_FAIL;
    }
    from_parse(ptr).initialized.set(true);
    HResult::S_OK
}

unsafe extern "system" fn add_scriptlet(
    _ptr: *mut c_void,
    _default_name: *const u16,
    _code: *const u16,
    _item_name: *const u16,
    _sub_item_name: *const u16,
    _event_name: *const u16,
    _delimiter: *const u16,
    _context: usize,
    _start_line: u32,
    _flags: u32,
    name: *mut RawBstr,
    _excep: *mut ExcepInfo,
) -> HResult {
    if !name.is_null() {
        *name = ptr::null_mut();
    }
    HResult::E_NOTIMPL
}

unsafe extern "system" fn parse_script_text(
    ptr: *mut c_void,
    code: *const u16,
    _item_name: *const u16,
    _context: *mut c_void,
    _delimiter: *const u16,
    _source_context: usize,
    _start_line: u32,
    flags: u32,
    result: *mut Variant,
    _excep: *mut ExcepInfo,
) -> HResult {
    let Some(code) = wide_from_ptr(code) else {
        return HResult::E_POINTER;
    };
    let code = String::from_utf16_lossy(code);
    from_parse(ptr).parse_text(&code, flags, result)
}

// ── Error object ──────────────────────────────────────────────────────────────

#[repr(C)]
struct FakeError {
    iface: IActiveScriptError,
    refs: AtomicU32,
    line: u32,
    column: i32,
    description: String,
}

static ERROR_VTBL: IActiveScriptErrorVtbl = IActiveScriptErrorVtbl {
    base: IUnknownVtbl {
        query_interface: error_query_interface,
        add_ref: error_add_ref,
        release: error_release,
    },
    get_exception_info,
    get_source_position,
    get_source_line_text,
};

unsafe fn error<'a>(ptr: *mut c_void) -> &'a FakeError {
    &*ptr.cast::<FakeError>()
}

unsafe extern "system" fn error_query_interface(
    ptr: *mut c_void,
    riid: *const Guid,
    out: *mut *mut c_void,
) -> HResult {
    *out = ptr::null_mut();
    if *riid == IUnknown::IID || *riid == IActiveScriptError::IID {
        add_ref_count(&error(ptr).refs);
        *out = ptr;
        return HResult::S_OK;
    }
    HResult::E_NOINTERFACE
}

unsafe extern "system" fn error_add_ref(ptr: *mut c_void) -> u32 {
    add_ref_count(&error(ptr).refs)
}

unsafe extern "system" fn error_release(ptr: *mut c_void) -> u32 {
    release_count(&error(ptr).refs, "error")
}

unsafe extern "system" fn get_exception_info(ptr: *mut c_void, info: *mut ExcepInfo) -> HResult {
    let err = error(ptr);
    let info = &mut *info;
    info.scode = HResult::E_FAIL.0;
    info.source = Bstr::new("Microsoft JScript runtime error").map_or(ptr::null_mut(), Bstr::into_raw);
    info.description = Bstr::new(&err.description).map_or(ptr::null_mut(), Bstr::into_raw);
    HResult::S_OK
}

unsafe extern "system" fn get_source_position(
    ptr: *mut c_void,
    context: *mut u32,
    line: *mut u32,
    column: *mut i32,
) -> HResult {
    let err = error(ptr);
    if !context.is_null() {
        *context = 0;
    }
    if !line.is_null() {
        *line = err.line;
    }
    if !column.is_null() {
        *column = err.column;
    }
    HResult::S_OK
}

unsafe extern "system" fn get_source_line_text(_ptr: *mut c_void, out: *mut RawBstr) -> HResult {
    *out = ptr::null_mut();
    HResult::E_NOTIMPL
}

// ── Mini language ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Val {
    Undefined,
    Int(i64),
    Str(String),
}

impl Val {
    /// `String(v)`.
    fn text(&self) -> String {
        match self {
            Val::Undefined => "undefined".to_owned(),
            Val::Int(n) => n.to_string(),
            Val::Str(s) => s.clone(),
        }
    }

    /// How `Array.prototype.join` renders an element.
    fn join_text(&self) -> String {
        match self {
            Val::Undefined => String::new(),
            other => other.text(),
        }
    }

    fn into_variant(self) -> Variant {
        match self {
            Val::Undefined => Variant::empty(),
            Val::Int(n) => match i32::try_from(n) {
                Ok(n) => Variant::from_i32(n),
                Err(_) => Variant::from_f64(n as f64),
            },
            Val::Str(s) => Variant::from_str(&s).unwrap_or_default(),
        }
    }
}

fn add(lhs: Val, rhs: Val) -> Val {
    match (lhs, rhs) {
        (Val::Int(a), Val::Int(b)) => Val::Int(a + b),
        (a, b) => Val::Str(a.text() + &b.text()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Plus,
}

struct ScriptError {
    offset: usize,
    message: String,
}

impl ScriptError {
    fn syntax(offset: usize) -> Self {
        Self {
            offset,
            message: "Syntax error".to_owned(),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(usize, Tok)>, ScriptError> {
    let mut toks = Vec::new();
    let mut chars = src.char_indices().peekable();
    while let Some(&(at, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | ',' | '+' => {
                chars.next();
                toks.push((
                    at,
                    match c {
                        '(' => Tok::LParen,
                        ')' => Tok::RParen,
                        ',' => Tok::Comma,
                        _ => Tok::Plus,
                    },
                ));
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, q)) if q == c => break,
                        Some((_, ch)) => text.push(ch),
                        None => {
                            return Err(ScriptError {
                                offset: at,
                                message: "Unterminated string constant".to_owned(),
                            })
                        }
                    }
                }
                toks.push((at, Tok::Str(text)));
            }
            c if c.is_ascii_digit() => {
                let mut n: i64 = 0;
                while let Some(&(_, d)) = chars.peek() {
                    let Some(v) = d.to_digit(10) else { break };
                    n = n.saturating_mul(10).saturating_add(i64::from(v));
                    chars.next();
                }
                toks.push((at, Tok::Num(n)));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut name = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' || ch == '$' || ch == '.' {
                        name.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                toks.push((at, Tok::Ident(name)));
            }
            _ => return Err(ScriptError::syntax(at)),
        }
    }
    Ok(toks)
}

struct Eval<'a> {
    engine: &'a FakeEngine,
    toks: Vec<(usize, Tok)>,
    pos: usize,
    end: usize,
}

impl Eval<'_> {
    fn next(&mut self) -> Option<(usize, Tok)> {
        let tok = self.toks.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, want: &Tok) -> bool {
        if self.toks.get(self.pos).map(|(_, t)| t) == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn here(&self) -> usize {
        self.toks.get(self.pos).map_or(self.end, |(at, _)| *at)
    }

    fn expr(&mut self) -> Result<Val, ScriptError> {
        let mut value = self.term()?;
        while self.eat(&Tok::Plus) {
            let rhs = self.term()?;
            value = add(value, rhs);
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<Val, ScriptError> {
        let Some((at, tok)) = self.next() else {
            return Err(ScriptError::syntax(self.end));
        };
        match tok {
            Tok::Num(n) => Ok(Val::Int(n)),
            Tok::Str(s) => Ok(Val::Str(s)),
            Tok::Ident(name) if self.eat(&Tok::LParen) => {
                let mut args = Vec::new();
                if !self.eat(&Tok::RParen) {
                    loop {
                        args.push(self.expr()?);
                        if self.eat(&Tok::RParen) {
                            break;
                        }
                        if !self.eat(&Tok::Comma) {
                            return Err(ScriptError::syntax(self.here()));
                        }
                    }
                }
                self.engine
                    .call(&name, args)
                    .map_err(|message| ScriptError { offset: at, message })
            }
            Tok::Ident(name) if name == "undefined" => Ok(Val::Undefined),
            Tok::Ident(name) => Err(ScriptError {
                offset: at,
                message: format!("'{name}' is undefined"),
            }),
            _ => Err(ScriptError::syntax(at)),
        }
    }
}
