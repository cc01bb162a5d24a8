use std::process::ExitCode;

use jshost::cli::{self, USAGE};
use jshost::console::Console;
use jshost::frontend;
use jshost::module::SystemLoader;

/// Log filter directives, e.g. `JSHOST_LOG=jshost=trace`.
const LOG_ENV: &str = "JSHOST_LOG";

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logging();

    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("jshost: {e}");
            eprintln!("{USAGE}");
            return ExitCode::from(1);
        }
    };
    tracing::debug!(?args, "arguments");

    let stdin = std::io::stdin();
    let status = frontend::run(&args, &SystemLoader, Console::stdio(), &mut stdin.lock());
    ExitCode::from(u8::try_from(status).unwrap_or(1))
}
