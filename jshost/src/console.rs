//! Output streams shared by the host object, the site and the frontends.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard};

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Script output goes to `out`, plugin diagnostics to `err`.
#[derive(Clone)]
pub struct Console {
    out: Sink,
    err: Sink,
}

fn lock(sink: &Sink) -> MutexGuard<'_, Box<dyn Write + Send>> {
    sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Console {
    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            err: Arc::new(Mutex::new(err)),
        }
    }

    pub fn stdio() -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// A console writing into memory, plus a handle to read it back.
    pub fn capture() -> (Self, Capture) {
        let capture = Capture::default();
        let console = Self::new(
            Box::new(SharedBuf(capture.out.clone())),
            Box::new(SharedBuf(capture.err.clone())),
        );
        (console, capture)
    }

    // Write failures on the standard streams have nowhere to be reported.
    pub fn write_out(&self, text: &str) {
        let _ = lock(&self.out).write_all(text.as_bytes());
    }

    pub fn write_err(&self, text: &str) {
        let mut err = lock(&self.err);
        let _ = err.write_all(text.as_bytes());
        let _ = err.flush();
    }

    pub fn flush_out(&self) {
        let _ = lock(&self.out).flush();
    }
}

impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Console")
    }
}

// ── Capture ───────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct Capture {
    out: Arc<Mutex<Vec<u8>>>,
    err: Arc<Mutex<Vec<u8>>>,
}

impl Capture {
    pub fn stdout(&self) -> String {
        Self::read(&self.out)
    }

    pub fn stderr(&self) -> String {
        Self::read(&self.err)
    }

    fn read(buf: &Mutex<Vec<u8>>) -> String {
        let bytes = buf.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
