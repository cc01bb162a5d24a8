//! Script-file runner, interactive prompt, and top-level dispatch.

use std::io::BufRead;
use std::path::Path;

use crate::cli::{resolve_engine_module, Action, CliArgs, USAGE};
use crate::com::Apartment;
use crate::console::Console;
use crate::engine::{Engine, ExecMode};
use crate::marshal::{read_utf8_file, to_text, to_utf8, WideText};
use crate::module::ModuleLoader;

pub const PROMPT: &str = "> ";

/// Input buffer size in UTF-16 units, terminator included.
pub const LINE_CAPACITY: usize = 8192;

pub const VERSION_EXPR: &str =
    "print(ScriptEngineMajorVersion()+'.'+ScriptEngineMinorVersion()+'.'+ScriptEngineBuildVersion())";

const EOT: &str = "\u{4}";

/// Run a script file as one statement block.  Returns the exit status.
pub fn run_script(engine: &mut Engine, path: &Path, console: &Console) -> i32 {
    let code = match read_utf8_file(path) {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "script decode failed");
            console.write_err(&format!("Failed to read file: {}\n", path.display()));
            return 1;
        }
    };
    let status = match engine.exec(&code, ExecMode::Statements, None, false) {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!(error = %e, "script failed");
            1
        }
    };
    console.flush_out();
    status
}

/// Print the engine's `major.minor.build` version through `print`.
pub fn show_version(engine: &mut Engine, console: &Console) -> i32 {
    let result = engine.exec(&WideText::new(VERSION_EXPR), ExecMode::Statements, None, false);
    console.flush_out();
    match result {
        Ok(()) => 0,
        Err(e) => {
            tracing::debug!(error = %e, "version query failed");
            1
        }
    }
}

/// Read, evaluate, print.  Ends on EOF, a lone Ctrl-D, `exit` or `quit`.
pub fn run_repl(engine: &mut Engine, input: &mut dyn BufRead, console: &Console) -> i32 {
    let mut raw = Vec::new();
    loop {
        console.write_out(PROMPT);
        console.flush_out();

        raw.clear();
        match input.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "stdin read failed");
                break;
            }
        }
        let text = String::from_utf8_lossy(&raw);
        let line = text.split(['\r', '\n']).next().unwrap_or_default();
        let mut code = WideText::new(line);
        code.truncate(LINE_CAPACITY - 1);

        if code.is_empty() {
            continue;
        }
        let line = code.to_string();
        if line == EOT || line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        match engine.eval(&code, true) {
            Ok(value) => {
                if let Some(text) = to_text(&value).and_then(|t| to_utf8(t.as_wide())) {
                    console.write_out(&text);
                    console.write_out("\n");
                }
            }
            Err(_) => {
                // Not an expression (or a failing one): run it for real so
                // the error is reported.
                let _ = engine.exec(&code, ExecMode::Statements, None, false);
            }
        }
    }
    console.flush_out();
    0
}

/// Everything after argument parsing.  Returns the process exit status.
pub fn run(args: &CliArgs, loader: &dyn ModuleLoader, console: Console, input: &mut dyn BufRead) -> i32 {
    if args.action == Action::Help {
        console.write_out(USAGE);
        console.write_out("\n\n");
        console.flush_out();
        return 0;
    }

    let _apartment = match Apartment::enter() {
        Ok(apartment) => apartment,
        Err(hr) => {
            console.write_err(&format!("CoInitializeEx failed: {hr}\n"));
            return 1;
        }
    };

    let path = resolve_engine_module(args.dll.as_ref());
    let mut engine = match Engine::init(loader, &path, console.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            console.write_err(&format!("jshost: {e}\n"));
            return 1;
        }
    };

    let status = match &args.action {
        Action::Version => show_version(&mut engine, &console),
        Action::Script(script) => run_script(&mut engine, script, &console),
        Action::Repl => run_repl(&mut engine, input, &console),
        Action::Help => 0,
    };
    engine.destroy();
    status
}
