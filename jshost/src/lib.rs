//! A minimal Active Scripting host.
//!
//! Loads a script engine plugin (`jscript.dll` by default) through its class
//! factory, exposes a `WScript` object with an `Echo` method, and runs script
//! files or an interactive prompt against it.

pub mod activscp;
pub mod cli;
pub mod com;
pub mod console;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod host;
pub mod marshal;
pub mod module;
pub mod oleaut;
pub mod site;
