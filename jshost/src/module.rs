//! Locating and instantiating the script engine plugin.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr;

use crate::activscp::{IActiveScript, IClassFactory};
use crate::com::{ComPtr, Guid, HResult, Interface, CLSID_JSCRIPT};
use crate::error::{EngineError, InitStep};

/// `DllGetClassObject`.
pub type DllGetClassObjectFn =
    unsafe extern "system" fn(clsid: *const Guid, riid: *const Guid, out: *mut *mut c_void) -> HResult;

pub const DEFAULT_MODULE: &str = "jscript.dll";

const ENTRY_POINT: &[u8] = b"DllGetClassObject\0";

/// A loaded plugin.  Dropping it unloads the module, so it must outlive
/// every object created from it.
pub trait PluginModule {
    fn class_object_entry(&self) -> Option<DllGetClassObjectFn>;
}

pub trait ModuleLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>, EngineError>;
}

// ── System loader ─────────────────────────────────────────────────────────────

/// Loads plugins from disk with the platform dynamic loader.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLoader;

struct LoadedLibrary {
    entry: Option<DllGetClassObjectFn>,
    _lib: libloading::Library,
}

impl PluginModule for LoadedLibrary {
    fn class_object_entry(&self) -> Option<DllGetClassObjectFn> {
        self.entry
    }
}

impl ModuleLoader for SystemLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>, EngineError> {
        // SAFETY: loading runs the module's initializers; the module is
        // trusted to be a script engine.
        let lib = unsafe { libloading::Library::new(path) }.map_err(|e| EngineError::ModuleLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let entry = unsafe { lib.get::<DllGetClassObjectFn>(ENTRY_POINT) }
            .map(|sym| *sym)
            .ok();
        tracing::debug!(path = %path.display(), has_entry = entry.is_some(), "module loaded");
        Ok(Box::new(LoadedLibrary { entry, _lib: lib }))
    }
}

// ── Instantiation ─────────────────────────────────────────────────────────────

/// Ask the module's class factory for a new engine instance.  The factory
/// itself is released before returning.
pub fn create_engine(module: &dyn PluginModule, path: &Path) -> Result<ComPtr<IActiveScript>, EngineError> {
    let entry = module
        .class_object_entry()
        .ok_or_else(|| EngineError::EntryPointMissing { path: PathBuf::from(path) })?;

    let mut raw = ptr::null_mut();
    let hr = unsafe { entry(&CLSID_JSCRIPT, &IClassFactory::IID, &mut raw) };
    hr.ok().map_err(|hr| EngineError::init(InitStep::ClassFactory, hr))?;
    let factory = unsafe { ComPtr::from_raw(raw.cast::<IClassFactory>()) }
        .ok_or_else(|| EngineError::init(InitStep::ClassFactory, HResult::E_POINTER))?;

    let mut raw = ptr::null_mut();
    let hr = unsafe {
        (factory.vtbl().create_instance)(factory.this(), ptr::null_mut(), &IActiveScript::IID, &mut raw)
    };
    hr.ok().map_err(|hr| EngineError::init(InitStep::CreateInstance, hr))?;
    unsafe { ComPtr::from_raw(raw.cast::<IActiveScript>()) }
        .ok_or_else(|| EngineError::init(InitStep::CreateInstance, HResult::E_POINTER))
}
