use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::com::HResult;

/// The engine setup step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    ClassFactory,
    CreateInstance,
    QueryParser,
    SetScriptSite,
    InitNew,
    AddNamedItem,
    SetScriptState,
    Bootstrap,
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InitStep::ClassFactory => "DllGetClassObject",
            InitStep::CreateInstance => "CreateInstance",
            InitStep::QueryParser => "QueryInterface(IActiveScriptParse)",
            InitStep::SetScriptSite => "SetScriptSite",
            InitStep::InitNew => "InitNew",
            InitStep::AddNamedItem => "AddNamedItem",
            InitStep::SetScriptState => "SetScriptState",
            InitStep::Bootstrap => "bootstrap",
        })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot load {}: {reason}", path.display())]
    ModuleLoad { path: PathBuf, reason: String },

    #[error("{} does not export DllGetClassObject", path.display())]
    EntryPointMissing { path: PathBuf },

    #[error("{step} failed: {hr}")]
    Init { step: InitStep, hr: HResult },

    #[error("engine is not ready")]
    NotReady,

    #[error("script failed: {0}")]
    Script(HResult),
}

impl EngineError {
    pub fn init(step: InitStep, hr: HResult) -> Self {
        EngineError::Init { step, hr }
    }

    /// The single failure code surfaced for this error.
    pub fn hresult(&self) -> HResult {
        match self {
            EngineError::ModuleLoad { .. } => HResult::E_FAIL,
            EngineError::EntryPointMissing { .. } => HResult::E_NOINTERFACE,
            EngineError::Init { hr, .. } | EngineError::Script(hr) => *hr,
            EngineError::NotReady => HResult::E_UNEXPECTED,
        }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid UTF-8 at byte {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("file is empty")]
    Empty,
}
