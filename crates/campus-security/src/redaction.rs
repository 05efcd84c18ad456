use std::io::{self, Write};
use std::sync::LazyLock;

use regex::Regex;
use tracing_subscriber::fmt::MakeWriter;

/// Wraps any [`MakeWriter`] so every log line is passed through
/// [`redact_secrets`] first.
pub struct RedactingWriter<M> {
    make: M,
}

impl<M> RedactingWriter<M> {
    pub fn new(make: M) -> Self {
        Self { make }
    }
}

impl RedactingWriter<fn() -> io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr)
    }
}

/// Writer handed out per event by [`RedactingWriter`].
pub struct Redacted<W> {
    inner: W,
}

impl<W: Write> Write for Redacted<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let line = String::from_utf8_lossy(buf);
        self.inner.write_all(redact_secrets(&line).as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<'a, M: MakeWriter<'a>> MakeWriter<'a> for RedactingWriter<M> {
    type Writer = Redacted<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Redacted {
            inner: self.make.make_writer(),
        }
    }
}

static SECRET_PATTERNS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
          sk-[A-Za-z0-9_\-]{16,}                          # OpenAI-compatible keys
        | Bearer\s+[A-Za-z0-9_\-\.=]{16,}                 # Authorization headers
        | eyJ[A-Za-z0-9_\-]{8,}\.[A-Za-z0-9_\-]{8,}\.[A-Za-z0-9_\-]+  # JWTs
        | \b1[3-9]\d{9}\b                                 # mobile numbers
        ",
    )
    .ok()
});

/// Replace API keys, bearer tokens, JWTs and mainland mobile numbers with `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    match SECRET_PATTERNS.as_ref() {
        Some(re) => re.replace_all(input, "[REDACTED]").into_owned(),
        None => input.to_string(),
    }
}
