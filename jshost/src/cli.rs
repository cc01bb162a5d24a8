//! Command-line argument parsing.
//!
//! Usage:
//!   jshost [--dll <path>] [--version | <script>]

use std::path::PathBuf;

use crate::module::DEFAULT_MODULE;

pub const USAGE: &str = "Usage: jshost [--dll jscript.dll] [--version|script.js]";

/// Environment override for the engine module path.
pub const ENGINE_MODULE_ENV: &str = "JSHOST_DLL";

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Engine module override (`--dll <path>`).
    pub dll: Option<PathBuf>,
    /// What to do once the engine is up.
    pub action: Action,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub enum Action {
    /// `--help` / `-h`: print usage; no engine is created.
    Help,
    /// `--version`: print the engine's version.
    Version,
    /// Run one script file.
    Script(PathBuf),
    /// Interactive prompt (no script, no `--version`).
    #[default]
    Repl,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    parse_argv(&raw)
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut script: Option<PathBuf> = None;
    let mut version = false;
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();
        let flag = arg.to_ascii_lowercase();

        match flag.as_str() {
            "--help" | "-h" => {
                args.action = Action::Help;
                return Ok(args);
            }
            "--dll" => {
                i += 1;
                let path = argv.get(i).ok_or("--dll requires a module path")?;
                args.dll = Some(PathBuf::from(path));
            }
            "--version" => version = true,
            _ if script.is_none() => script = Some(PathBuf::from(arg)),
            _ => return Err("only one script file is supported".to_owned()),
        }
        i += 1;
    }

    args.action = match (version, script) {
        (true, _) => Action::Version,
        (false, Some(path)) => Action::Script(path),
        (false, None) => Action::Repl,
    };
    Ok(args)
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Determine the engine module to load.
///
/// Priority: `--dll <path>` → `JSHOST_DLL` env var → `jscript.dll`.  Empty
/// values fall through to the next source.
pub fn resolve_engine_module(cli_override: Option<&PathBuf>) -> PathBuf {
    if let Some(p) = cli_override.filter(|p| !p.as_os_str().is_empty()) {
        return p.clone();
    }
    match std::env::var_os(ENGINE_MODULE_ENV) {
        Some(p) if !p.is_empty() => PathBuf::from(p),
        _ => PathBuf::from(DEFAULT_MODULE),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
