use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use serde_json::Value;

const MASK: &str = "***REDACTED***";

/// Matches `password=`, `secret=`, `token=` (and the `:` separator form),
/// case-insensitive, capturing the value up to the next whitespace/comma/
/// quote/brace so multiple occurrences in one message are each masked.
static BUILTIN_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["password", "secret", "token"]
        .iter()
        .map(|key| {
            Regex::new(&format!(
                r#"(?i)\b{key}\s*[=:]\s*("(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|[^\s,;}}]+)"#
            ))
            .expect("builtin redaction pattern is valid")
        })
        .collect()
});

/// Applies the built-in password/secret/token redaction plus any operator-
/// supplied extra patterns (`log.redaction_patterns`). The only component
/// permitted to format a `JobLogEntry` for persistence or the wire is
/// `LogSink`, which always routes through this.
pub struct Redactor {
    patterns: Vec<Regex>,
    /// Used only to fail fast on construction if an extra pattern is invalid.
    _validated: RegexSet,
}

impl Redactor {
    pub fn new(extra_patterns: &[String]) -> Result<Self, regex::Error> {
        let mut patterns = BUILTIN_PATTERNS.clone();
        for p in extra_patterns {
            patterns.push(Regex::new(p)?);
        }
        let validated = RegexSet::new(patterns.iter().map(|r| r.as_str()))?;
        Ok(Redactor { patterns, _validated: validated })
    }

    pub fn empty() -> Self {
        Redactor::new(&[]).expect("builtin-only redactor never fails to construct")
    }

    pub fn redact_str(&self, input: &str) -> String {
        let mut out = input.to_string();
        for re in &self.patterns {
            out = re
                .replace_all(&out, |caps: &regex::Captures| {
                    let whole = caps.get(0).expect("capture 0 is always present");
                    match caps.get(1) {
                        // Splice by the captured group's byte range within the
                        // whole match, not by searching for its text inside
                        // the match — a value that recurs earlier in the
                        // match (e.g. `password=pass`, value `pass`) would
                        // otherwise mask the wrong occurrence and leak the
                        // real one.
                        Some(value) => {
                            let rel_start = value.start() - whole.start();
                            let rel_end = value.end() - whole.start();
                            let mut replaced = String::with_capacity(whole.as_str().len());
                            replaced.push_str(&whole.as_str()[..rel_start]);
                            replaced.push_str(MASK);
                            replaced.push_str(&whole.as_str()[rel_end..]);
                            replaced
                        }
                        None => whole.as_str().to_string(),
                    }
                })
                .into_owned();
        }
        out
    }

    pub fn redact_context(&self, context: &mut serde_json::Map<String, Value>) {
        for (_k, v) in context.iter_mut() {
            redact_value(self, v);
        }
    }
}

fn redact_value(redactor: &Redactor, v: &mut Value) {
    match v {
        Value::String(s) => *s = redactor.redact_str(s),
        Value::Array(items) => items.iter_mut().for_each(|i| redact_value(redactor, i)),
        Value::Object(map) => redactor.redact_context(map),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_password_with_equals() {
        let r = Redactor::empty();
        let out = r.redact_str("connecting with password=hunter2 now");
        assert!(out.contains(MASK));
        assert!(!out.contains("hunter2"));
    }

    #[test]
    fn masks_multiple_occurrences_case_insensitive() {
        let r = Redactor::empty();
        let out = r.redact_str("Token: abc123, then secret=xyz789");
        assert!(!out.contains("abc123"));
        assert!(!out.contains("xyz789"));
        assert_eq!(out.matches(MASK).count(), 2);
    }

    #[test]
    fn value_recurring_inside_the_key_does_not_leak() {
        // "pass" (the value) also occurs inside "password" (the key) at an
        // earlier byte offset — a text-search replace would mask that
        // occurrence instead and leave the real secret in the output.
        let r = Redactor::empty();
        let out = r.redact_str("password=pass");
        assert_eq!(out, format!("password={MASK}"));
        assert!(!out.contains("=pass"));
    }

    #[test]
    fn extra_pattern_is_applied() {
        let r = Redactor::new(&[r"(?i)apikey=(\S+)".to_string()]).unwrap();
        let out = r.redact_str("apikey=deadbeef");
        assert!(!out.contains("deadbeef"));
    }

    #[test]
    fn redacts_nested_context_values() {
        let r = Redactor::empty();
        let mut ctx = serde_json::Map::new();
        ctx.insert("note".into(), Value::String("password=swordfish".into()));
        r.redact_context(&mut ctx);
        assert!(!ctx.get("note").unwrap().as_str().unwrap().contains("swordfish"));
    }
}
