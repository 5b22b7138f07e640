//! Logging setup
//!
//! All log output goes through [`RedactingMakeWriter`], so known secret values
//! are replaced before any text leaves the process. Call sites never redact.

use anyhow::{Context, Result};
use regex::Regex;
use std::io::{self, Write};
use std::sync::{Arc, OnceLock, RwLock};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

const MASK: &str = "***";

/// SHA-1 and SHA-256 object ids
const OBJECT_ID_LENGTHS: [usize; 2] = [40, 64];

fn hex_run() -> &'static Regex {
    static HEX_RUN: OnceLock<Regex> = OnceLock::new();
    HEX_RUN.get_or_init(|| Regex::new(r"\b[A-Fa-f0-9]{32,}\b").expect("static regex is valid"))
}

/// Replaces known secret values with `***`
///
/// Secrets can be registered after logging is initialised (the token is only
/// known once authentication has run). Hexadecimal runs of 32 or more
/// characters are masked too, except SHA-1 and SHA-256 object ids.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Arc<RwLock<Vec<String>>>,
}

impl Redactor {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let redactor = Self::default();
        for secret in secrets {
            redactor.add_secret(secret);
        }
        redactor
    }

    pub fn add_secret(&self, secret: impl Into<String>) {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return;
        }
        if let Ok(mut secrets) = self.secrets.write() {
            if !secrets.contains(&secret) {
                secrets.push(secret);
                // Longest first, so a secret containing another is masked whole
                secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
            }
        }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        if let Ok(secrets) = self.secrets.read() {
            for secret in secrets.iter() {
                if redacted.contains(secret.as_str()) {
                    redacted = redacted.replace(secret.as_str(), MASK);
                }
            }
        }
        hex_run()
            .replace_all(&redacted, |caps: &regex::Captures<'_>| {
                let run = &caps[0];
                if OBJECT_ID_LENGTHS.contains(&run.len()) {
                    run.to_string()
                } else {
                    MASK.to_string()
                }
            })
            .into_owned()
    }
}

/// `MakeWriter` decorator that redacts every formatted event
pub struct RedactingMakeWriter<M> {
    inner: M,
    redactor: Redactor,
}

impl<M> RedactingMakeWriter<M> {
    pub fn new(inner: M, redactor: Redactor) -> Self {
        Self { inner, redactor }
    }
}

impl<'a, M> MakeWriter<'a> for RedactingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = RedactingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: self.inner.make_writer(),
            redactor: self.redactor.clone(),
            buffer: Vec::new(),
        }
    }
}

/// Buffers one event and writes it redacted on flush or drop
pub struct RedactingWriter<W: Write> {
    inner: W,
    redactor: Redactor,
    buffer: Vec<u8>,
}

impl<W: Write> RedactingWriter<W> {
    fn emit(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&self.buffer);
        let redacted = self.redactor.redact(&text);
        self.buffer.clear();
        self.inner.write_all(redacted.as_bytes())
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.emit()?;
        self.inner.flush()
    }
}

impl<W: Write> Drop for RedactingWriter<W> {
    fn drop(&mut self) {
        let _ = self.emit();
    }
}

/// Initialize logging based on configuration and verbosity
///
/// `RUST_LOG` overrides both. Logs go to stderr; stdout is reserved for the
/// run summary.
pub fn init_logging(config: &LoggingConfig, verbose: bool, redactor: Redactor) -> Result<()> {
    let default_level = if verbose { "debug" } else { config.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let writer = RedactingMakeWriter::new(io::stderr, redactor);

    match config.format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(writer))
            .with(filter)
            .try_init(),
        "pretty" => tracing_subscriber::registry()
            .with(fmt::layer().pretty().with_ansi(config.color).with_writer(writer))
            .with(filter)
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(fmt::layer().compact().with_ansi(config.color).with_writer(writer))
            .with(filter)
            .try_init(),
    }
    .context("Failed to initialize logging")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;
        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_redacts_registered_secrets() {
        let redactor = Redactor::new(["ghs_supersecret"]);
        assert_eq!(
            redactor.redact("token=ghs_supersecret rejected"),
            "token=*** rejected"
        );
    }

    #[test]
    fn test_secrets_added_later_are_redacted() {
        let redactor = Redactor::default();
        let shared = redactor.clone();
        shared.add_secret("late-token");
        assert_eq!(redactor.redact("using late-token"), "using ***");
    }

    #[test]
    fn test_empty_secrets_are_ignored() {
        let redactor = Redactor::new(["", "   "]);
        assert_eq!(redactor.redact("nothing to hide"), "nothing to hide");
    }

    #[test]
    fn test_long_hex_runs_masked_but_object_ids_kept() {
        let redactor = Redactor::default();
        let sha1 = "a".repeat(40);
        let sha256 = "c".repeat(64);
        let key = "b".repeat(48);
        let text = format!("sha {} oid {} key {}", sha1, sha256, key);
        assert_eq!(
            redactor.redact(&text),
            format!("sha {} oid {} key ***", sha1, sha256)
        );
        assert_eq!(redactor.redact(&"d".repeat(32)), "***");
    }

    #[test]
    fn test_writer_redacts_split_writes() {
        let sink = Captured::default();
        let make = RedactingMakeWriter::new(sink.clone(), Redactor::new(["hunter2"]));
        {
            let mut writer = make.make_writer();
            writer.write_all(b"password is hun").unwrap();
            writer.write_all(b"ter2\n").unwrap();
        }
        let out = String::from_utf8(sink.0.lock().unwrap().clone()).unwrap();
        assert_eq!(out, "password is ***\n");
    }
}
