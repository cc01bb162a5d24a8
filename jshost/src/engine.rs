//! Engine lifecycle: set up a script engine from a plugin module, run code
//! in it, and tear it down again.
//!
//! Everything acquired during [`Engine::init`] is released in reverse order
//! by [`Engine::destroy`], whether setup completed or stopped part way.

use std::path::Path;
use std::ptr;

use crate::activscp::{
    ExcepInfo, IActiveScript, IActiveScriptParse, SCRIPTITEM_ISVISIBLE, SCRIPTSTATE_STARTED,
    SCRIPTTEXT_ISEXPRESSION, SCRIPTTEXT_ISVISIBLE,
};
use crate::com::{ComPtr, HResult};
use crate::console::Console;
use crate::error::{EngineError, InitStep};
use crate::marshal::WideText;
use crate::module::{create_engine, ModuleLoader, PluginModule};
use crate::oleaut::Variant;
use crate::site::{SiteRef, NAMED_ITEM};

/// Defines `print` and `console.log` on top of `WScript.Echo`.
pub const BOOTSTRAP: &str =
    "function print(){WScript.Echo(Array.prototype.join.call(arguments,' '));}; var console={log:print};";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// A block of statements; produces no value.
    Statements,
    /// A single expression whose value is returned.
    Expression,
}

impl ExecMode {
    fn flags(self) -> u32 {
        match self {
            ExecMode::Statements => SCRIPTTEXT_ISVISIBLE,
            ExecMode::Expression => SCRIPTTEXT_ISVISIBLE | SCRIPTTEXT_ISEXPRESSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Initializing,
    Ready,
    Executing,
    Destroyed,
}

pub struct Engine {
    module: Option<Box<dyn PluginModule>>,
    script: Option<ComPtr<IActiveScript>>,
    parse: Option<ComPtr<IActiveScriptParse>>,
    site: Option<SiteRef>,
    state: EngineState,
}

impl Engine {
    /// Load the plugin at `path`, connect a site exposing `WScript`, and run
    /// the bootstrap.  On failure everything acquired so far is released
    /// before the error is returned.
    pub fn init(loader: &dyn ModuleLoader, path: &Path, console: Console) -> Result<Engine, EngineError> {
        let mut engine = Engine {
            module: None,
            script: None,
            parse: None,
            site: None,
            state: EngineState::Initializing,
        };
        match engine.start(loader, path, console) {
            Ok(()) => {
                engine.state = EngineState::Ready;
                tracing::debug!(path = %path.display(), "engine ready");
                Ok(engine)
            }
            Err(e) => {
                tracing::debug!(error = %e, "engine setup failed");
                engine.destroy();
                Err(e)
            }
        }
    }

    fn start(&mut self, loader: &dyn ModuleLoader, path: &Path, console: Console) -> Result<(), EngineError> {
        let module = self.module.insert(loader.load(path)?);
        let script = self.script.insert(create_engine(&**module, path)?);

        let parse = script
            .query::<IActiveScriptParse>()
            .map_err(|hr| EngineError::init(InitStep::QueryParser, hr))?;
        let parse = self.parse.insert(parse);

        let site = self.site.insert(SiteRef::new(console));

        script
            .set_script_site(site.as_iface())
            .ok()
            .map_err(|hr| EngineError::init(InitStep::SetScriptSite, hr))?;
        parse
            .init_new()
            .ok()
            .map_err(|hr| EngineError::init(InitStep::InitNew, hr))?;
        script
            .add_named_item(&WideText::new(NAMED_ITEM), SCRIPTITEM_ISVISIBLE)
            .ok()
            .map_err(|hr| EngineError::init(InitStep::AddNamedItem, hr))?;
        script
            .set_script_state(SCRIPTSTATE_STARTED)
            .ok()
            .map_err(|hr| EngineError::init(InitStep::SetScriptState, hr))?;

        let mut excep = ExcepInfo::default();
        parse
            .parse_script_text(&WideText::new(BOOTSTRAP), ExecMode::Statements.flags(), ptr::null_mut(), &mut excep)
            .ok()
            .map_err(|hr| EngineError::init(InitStep::Bootstrap, hr))
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Run `code`.  In expression mode the value lands in `result`, which
    /// the caller owns.  With `suppress` set the site stays quiet about
    /// errors for this call only; the failure is still returned.
    pub fn exec(
        &mut self,
        code: &WideText,
        mode: ExecMode,
        mut result: Option<&mut Variant>,
        suppress: bool,
    ) -> Result<(), EngineError> {
        if self.state != EngineState::Ready {
            return Err(EngineError::NotReady);
        }
        let (Some(parse), Some(site)) = (self.parse.as_ref(), self.site.as_ref()) else {
            return Err(EngineError::NotReady);
        };
        let slot = match result.as_deref_mut() {
            Some(value) => {
                value.clear();
                value as *mut Variant
            }
            None => ptr::null_mut(),
        };

        let previous = site.set_suppress_errors(suppress);
        self.state = EngineState::Executing;
        let mut excep = ExcepInfo::default();
        let hr = parse.parse_script_text(code, mode.flags(), slot, &mut excep);
        self.state = EngineState::Ready;
        site.set_suppress_errors(previous);

        tracing::trace!(?mode, %hr, "ParseScriptText");
        hr.ok().map_err(EngineError::Script)
    }

    /// Evaluate one expression and return its value.
    pub fn eval(&mut self, code: &WideText, suppress: bool) -> Result<Variant, EngineError> {
        let mut value = Variant::empty();
        self.exec(code, ExecMode::Expression, Some(&mut value), suppress)?;
        Ok(value)
    }

    /// Close the engine and release everything in reverse order of
    /// acquisition.  Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.state == EngineState::Destroyed {
            return;
        }
        if let Some(script) = self.script.as_ref() {
            let hr = script.close();
            if hr != HResult::S_OK {
                tracing::debug!(%hr, "Close");
            }
        }
        self.parse = None;
        self.script = None;
        self.site = None;
        self.module = None;
        self.state = EngineState::Destroyed;
        tracing::trace!("engine destroyed");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("state", &self.state).finish_non_exhaustive()
    }
}
