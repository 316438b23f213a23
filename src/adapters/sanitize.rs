//! Log sanitization for patient identifiers and secrets.
//!
//! Formatted log lines pass through [`SanitizingMakeWriter`] before reaching
//! the sink. Redacted:
//! - Patient identifiers (`PT-00042`) and prediction identifiers
//! - Email addresses and phone numbers
//! - Key material (long hex runs, `key=...` style secrets, PEM blocks)
//!
//! Input is capped at `PTLD_SANITIZE_MAX_BYTES` (default 16 KiB) per call.
//! Regexes are linear-time, but scanning very long lines still costs.

use regex::{Regex, RegexSet};
use std::sync::OnceLock;
use tracing_subscriber::fmt::MakeWriter;

static REDACTION_RULES: OnceLock<RedactionRules> = OnceLock::new();

const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;
const MAX_BYTES_ENV: &str = "PTLD_SANITIZE_MAX_BYTES";

struct Redaction {
    regex: Regex,
    replacement: &'static str,
}

struct RedactionRules {
    line_set: RegexSet,
    line_rules: Vec<Redaction>,
    pem_rules: Vec<Redaction>,
}

fn truncate_to_char_boundary(input: &str, max_bytes: usize) -> (&str, bool) {
    if input.len() <= max_bytes {
        return (input, false);
    }
    let mut end = max_bytes;
    while end > 0 && !input.is_char_boundary(end) {
        end -= 1;
    }
    (&input[..end], true)
}

fn max_sanitize_bytes() -> usize {
    std::env::var(MAX_BYTES_ENV)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES)
}

fn rules() -> &'static RedactionRules {
    REDACTION_RULES.get_or_init(|| {
        // Order matters: prediction ids embed a patient id and must go first.
        let line_patterns: [(&str, &str); 7] = [
            (
                r"\bPR-[A-Za-z0-9_-]{1,64}-[0-9a-f]{16}\b",
                "[REDACTED-PREDICTION]",
            ),
            (r"\bPT-\d{3,}\b", "[REDACTED-PATIENT]"),
            (
                r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b",
                "[REDACTED-EMAIL]",
            ),
            // International and Brazilian formats: +55 (11) 91234-5678, 555-123-4567
            (
                r"(?:\+\d{1,3}[-.\s]?)?\(?\b\d{2,3}\)?[-.\s]?\d{4,5}[-.\s]\d{4}\b",
                "[REDACTED-PHONE]",
            ),
            (
                r"(?i)\b(?:api[_-]?key|token|secret|password|seed|signature|sig|pubkey|signing[_-]?key|key)\b\s*[:=]\s*[A-Za-z0-9+/]{32,}={0,2}",
                "[REDACTED-SECRET]",
            ),
            (
                r"(?i)\b(?:api[_-]?key|token|secret|password|seed|signature|sig|pubkey|signing[_-]?key|key)\b\s*[:=]\s*[0-9a-f]{16,}\b",
                "[REDACTED-SECRET]",
            ),
            (r"\b[0-9a-fA-F]{32,}\b", "[REDACTED-KEY]"),
        ];

        // Kept out of the RegexSet: bounded dot-all patterns bloat the merged program.
        let pem_rules = vec![Redaction {
            regex: Regex::new(
                r"(?s)-----BEGIN [A-Z0-9 ]{0,40}PRIVATE KEY-----[\s\S]{0,8192}-----END [A-Z0-9 ]{0,40}PRIVATE KEY-----",
            )
            .expect("Valid regex"),
            replacement: "[REDACTED-PEM-PRIVATE-KEY]",
        }];

        let line_set =
            RegexSet::new(line_patterns.iter().map(|(p, _)| *p)).expect("Valid regex set");
        let line_rules = line_patterns
            .into_iter()
            .map(|(pattern, replacement)| Redaction {
                regex: Regex::new(pattern).expect("Valid regex"),
                replacement,
            })
            .collect();

        RedactionRules {
            line_set,
            line_rules,
            pem_rules,
        }
    })
}

/// Replace identifiers and secrets in `input`.
#[must_use]
pub fn sanitize(input: &str) -> String {
    sanitize_with_limit(input, max_sanitize_bytes())
}

fn sanitize_with_limit(input: &str, max_bytes: usize) -> String {
    let rules = rules();
    let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);

    let mut result = prefix.to_string();
    // RegexSet indices come back ascending, preserving rule order
    for idx in &rules.line_set.matches(prefix) {
        let rule = &rules.line_rules[idx];
        result = rule.regex.replace_all(&result, rule.replacement).into_owned();
    }

    if result.contains("-----BEGIN ") {
        for rule in &rules.pem_rules {
            result = rule.regex.replace_all(&result, rule.replacement).into_owned();
        }
    }

    if truncated {
        result.push_str(" [TRUNCATED]");
        // Keep line framing for the writer
        if input.ends_with('\n') {
            result.push('\n');
        }
    }
    result
}

/// Whether `input` contains anything `sanitize` would redact.
#[must_use]
pub fn contains_sensitive(input: &str) -> bool {
    let rules = rules();
    let (prefix, _) = truncate_to_char_boundary(input, max_sanitize_bytes());
    rules.line_set.is_match(prefix)
        || (prefix.contains("-----BEGIN ") && rules.pem_rules.iter().any(|r| r.regex.is_match(prefix)))
}

/// A `tracing_subscriber` writer wrapper that sanitizes each formatted line
/// before it reaches the underlying sink.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M) -> Self {
        Self { inner }
    }
}

pub struct SanitizingWriter<W> {
    inner: W,
    buffer: Vec<u8>,
}

impl<W> SanitizingWriter<W>
where
    W: std::io::Write,
{
    fn write_sanitized(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let sanitized = sanitize(&String::from_utf8_lossy(bytes));
        self.inner.write_all(sanitized.as_bytes())
    }

    fn flush_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.write_sanitized(&line)?;
        }
        Ok(())
    }
}

impl<W> std::io::Write for SanitizingWriter<W>
where
    W: std::io::Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        // A single huge line without newlines is flushed (and capped) early
        let hard_cap = max_sanitize_bytes().saturating_mul(2);
        if self.buffer.len() > hard_cap {
            let pending = std::mem::take(&mut self.buffer);
            self.write_sanitized(&pending)?;
            self.inner.write_all(b"\n")?;
            return Ok(buf.len());
        }

        self.flush_lines()?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_lines()?;
        if !self.buffer.is_empty() {
            let pending = std::mem::take(&mut self.buffer);
            self.write_sanitized(&pending)?;
        }
        self.inner.flush()
    }
}

impl<'a, M> MakeWriter<'a> for SanitizingMakeWriter<M>
where
    M: MakeWriter<'a>,
{
    type Writer = SanitizingWriter<M::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        SanitizingWriter {
            inner: self.inner.make_writer(),
            buffer: Vec::new(),
        }
    }
}
