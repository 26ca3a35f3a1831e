//! Log redaction for patient identifiers and submitted feature values.
//!
//! Formatted log lines pass through a [`Redactor`] before reaching the sink:
//! - Assessment ids and other UUIDs
//! - Medical record numbers
//! - Email addresses and phone numbers
//! - `name=value` / `name: value` pairs whose name is a feature of the active schema
//!
//! Redaction is a fallback. Request code should not format patient values
//! into log messages in the first place.

use std::sync::{Arc, OnceLock};

use regex::{Regex, RegexSet};
use tracing_subscriber::fmt::MakeWriter;

/// Default cap on the bytes scanned per log line.
const DEFAULT_SANITIZE_MAX_BYTES: usize = 16 * 1024;

static IDENTIFIER_PATTERNS: OnceLock<Result<IdentifierPatterns, regex::Error>> = OnceLock::new();

struct Rule {
    regex: Regex,
    replacement: &'static str,
}

struct IdentifierPatterns {
    set: RegexSet,
    rules: Vec<Rule>,
}

const IDENTIFIER_RULES: &[(&str, &str)] = &[
    (
        r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}",
        "[REDACTED-UUID]",
    ),
    (r"(?i)\bMRN[:#\s]?\s*\d{6,10}\b", "[REDACTED-MRN]"),
    (
        r"(?i)\b[a-z0-9](?:[a-z0-9._%+-]{0,62}[a-z0-9])?@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}\b",
        "[REDACTED-EMAIL]",
    ),
    (
        r"\b(?:\+?\d{1,3}[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3,4}[-.\s]\d{4}\b",
        "[REDACTED-PHONE]",
    ),
];

fn identifier_patterns() -> Option<&'static IdentifierPatterns> {
    IDENTIFIER_PATTERNS
        .get_or_init(|| {
            let set = RegexSet::new(IDENTIFIER_RULES.iter().map(|(p, _)| *p))?;
            let rules = IDENTIFIER_RULES
                .iter()
                .map(|(pattern, replacement)| {
                    Ok(Rule {
                        regex: Regex::new(pattern)?,
                        replacement,
                    })
                })
                .collect::<Result<Vec<_>, regex::Error>>()?;
            Ok(IdentifierPatterns { set, rules })
        })
        .as_ref()
        .ok()
}

fn max_sanitize_bytes() -> usize {
    std::env::var("STRATIFY_SANITIZE_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&v| v > 0)
        .unwrap_or(DEFAULT_SANITIZE_MAX_BYTES)
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

/// Masks identifiers and the values of known feature names.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    feature_values: Option<Regex>,
}

impl Redactor {
    /// Redactor for identifiers only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also mask values logged next to any of `names`.
    ///
    /// # Errors
    /// Returns the regex error if the combined pattern cannot be compiled.
    pub fn with_feature_names<'a>(
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, regex::Error> {
        let alternation = names
            .into_iter()
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("|");
        if alternation.is_empty() {
            return Ok(Self::default());
        }
        let pattern = format!(r#"\b({alternation})(\s*[=:]\s*)"?[-+]?[0-9][0-9.eE+-]*"?"#);
        Ok(Self {
            feature_values: Some(Regex::new(&pattern)?),
        })
    }

    /// Redact `input`, scanning at most the configured number of bytes.
    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        self.redact_with_limit(input, max_sanitize_bytes())
    }

    fn redact_with_limit(&self, input: &str, max_bytes: usize) -> String {
        let (prefix, truncated) = truncate_to_char_boundary(input, max_bytes);
        let mut result = prefix.to_string();

        if let Some(patterns) = identifier_patterns() {
            for idx in patterns.set.matches(prefix).into_iter() {
                let rule = &patterns.rules[idx];
                result = rule.regex.replace_all(&result, rule.replacement).into_owned();
            }
        }

        if let Some(regex) = &self.feature_values {
            result = regex.replace_all(&result, "$1$2[REDACTED]").into_owned();
        }

        if truncated {
            result.push_str(" [TRUNCATED]");
        }
        result
    }

    /// Whether `input` holds anything this redactor would mask.
    #[must_use]
    pub fn needs_redaction(&self, input: &str) -> bool {
        identifier_patterns().is_some_and(|p| p.set.is_match(input))
            || self.feature_values.as_ref().is_some_and(|r| r.is_match(input))
    }
}

/// A `tracing_subscriber` writer factory that redacts each formatted line.
#[derive(Debug, Clone)]
pub struct SanitizingMakeWriter<M> {
    inner: M,
    redactor: Arc<Redactor>,
}

impl<M> SanitizingMakeWriter<M> {
    #[must_use]
    pub fn new(inner: M, redactor: Redactor) -> Self {
        Self {
            inner,
            redactor: Arc::new(redactor),
        }
    }
}

pub struct SanitizingWriter<W> {
    inner: W,
    redactor: Arc<Redactor>,
    buffer: Vec<u8>,
}

impl<W: std::io::Write> SanitizingWriter<W> {
    fn write_redacted(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let text = String::from_utf8_lossy(bytes);
        let redacted = self.redactor.redact(&text);
        self.inner.write_all(redacted.as_bytes())
    }

    fn flush_lines(&mut self) -> std::io::Result<()> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.write_redacted(&line)?;
        }
        Ok(())
    }
}

impl<W: std::io::Write> std::io::Write for SanitizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);

        // A line with no newline must not buffer without bound.
        if self.buffer.len() > max_sanitize_bytes().saturating_mul(2) {
            let pending = std::mem::take(&mut self.buffer);
            self.write_redacted(&pending)?;
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
            self.write_redacted(&pending)?;
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
            redactor: Arc::clone(&self.redactor),
            buffer: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_redacts_assessment_ids() {
        let out = Redactor::new().redact("assessment 550e8400-e29b-41d4-a716-446655440000 done");
        assert!(out.contains("[REDACTED-UUID]"));
        assert!(!out.contains("550e8400"));
    }

    #[test]
    fn test_redacts_mrn_email_phone() {
        let redactor = Redactor::new();
        assert!(redactor.redact("MRN: 12345678").contains("[REDACTED-MRN]"));
        assert!(redactor
            .redact("contact patient@hospital.org")
            .contains("[REDACTED-EMAIL]"));
        assert!(redactor.redact("call 555-123-4567").contains("[REDACTED-PHONE]"));
    }

    #[test]
    fn test_feature_values_masked_only_for_known_names() {
        let redactor = Redactor::with_feature_names(["FVC", "Mg", "uric_acid"]).expect("redactor");
        let out = redactor.redact("input FVC=85.5 Mg: 0.9 uric_acid=\"300\" n_features=12");
        assert!(out.contains("FVC=[REDACTED]"));
        assert!(out.contains("Mg: [REDACTED]"));
        assert!(out.contains("uric_acid=[REDACTED]"));
        assert!(out.contains("n_features=12"));
        assert!(!out.contains("85.5"));
    }

    #[test]
    fn test_plain_text_untouched() {
        let redactor = Redactor::with_feature_names(["FVC"]).expect("redactor");
        let line = "Loaded stacked ensemble (n_classes=4)";
        assert!(!redactor.needs_redaction(line));
        assert_eq!(redactor.redact(line), line);
    }

    #[test]
    fn test_truncates_large_inputs() {
        let out = Redactor::new().redact_with_limit("0123456789abcdef", 4);
        assert_eq!(out, "0123 [TRUNCATED]");
    }

    #[test]
    fn test_writer_redacts_per_line() {
        #[derive(Clone, Default)]
        struct Sink(Arc<std::sync::Mutex<Vec<u8>>>);

        impl Write for Sink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().expect("lock").extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sink = Sink::default();
        let handle = sink.clone();
        let make = SanitizingMakeWriter::new(
            move || handle.clone(),
            Redactor::with_feature_names(["BMI"]).expect("redactor"),
        );
        let mut writer = make.make_writer();
        writer.write_all(b"BMI=22.5\nnext ").expect("write");
        writer.write_all(b"line\n").expect("write");
        writer.flush().expect("flush");

        let written = String::from_utf8(sink.0.lock().expect("lock").clone()).expect("utf8");
        assert_eq!(written, "BMI=[REDACTED]\nnext line\n");
    }
}
