use std::io::Write;

/// The process environment a command runs in.
///
/// Commands never touch stdout, stderr, or `process::exit` directly, so tests can
/// capture everything a command prints and the status it would exit with.
pub trait Host: Send + Sync {
    /// Stream for results.
    fn output(&mut self) -> impl Write;

    /// Stream for per-repository failures and summaries.
    fn error(&mut self) -> impl Write;

    /// Ends the process with `code`. Test hosts record the code and return.
    fn exit(&mut self, code: i32);
}

/// Test host that captures output to in-memory buffers
#[cfg(test)]
#[derive(Debug, Default)]
pub struct TestHost {
    pub output_buf: Vec<u8>,
    pub error_buf: Vec<u8>,
    pub exit_code: Option<i32>,
}

#[cfg(test)]
impl TestHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_text(&self) -> String {
        String::from_utf8_lossy(&self.output_buf).into_owned()
    }

    pub fn error_text(&self) -> String {
        String::from_utf8_lossy(&self.error_buf).into_owned()
    }
}

#[cfg(test)]
impl Host for TestHost {
    fn output(&mut self) -> impl Write {
        &mut self.output_buf
    }

    fn error(&mut self) -> impl Write {
        &mut self.error_buf
    }

    fn exit(&mut self, code: i32) {
        self.exit_code = Some(code);
    }
}
