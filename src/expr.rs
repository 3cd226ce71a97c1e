//! Typed test expressions evaluated against a probe's raw output.
//!
//! A check's `tests` block becomes a small tree: atomic [`TestItem`]s combined
//! with explicit `All` / `Any` nodes. Grouping is always explicit; the loader
//! rejects blocks with several items and no combinator.

use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Has,
    NotHave,
    Regex,
    Bitmask,
}

#[derive(Debug, Clone)]
pub struct Comparison {
    pub op: CompareOp,
    pub value: String,
    pattern: Option<Regex>,
}

impl Comparison {
    /// Builds a comparison, compiling the pattern up front for `regex`.
    pub fn new(op: CompareOp, value: impl Into<String>) -> Result<Self, regex::Error> {
        let value = value.into();
        let pattern = match op {
            CompareOp::Regex => Some(Regex::new(&value)?),
            _ => None,
        };
        Ok(Self { op, value, pattern })
    }

    pub fn holds(&self, actual: &str) -> bool {
        let expected = self.value.as_str();
        match self.op {
            CompareOp::Eq => actual == expected,
            CompareOp::NotEq => actual != expected,
            CompareOp::Gt => numeric(actual, expected, |a, e| a > e),
            CompareOp::Gte => numeric(actual, expected, |a, e| a >= e),
            CompareOp::Lt => numeric(actual, expected, |a, e| a < e),
            CompareOp::Lte => numeric(actual, expected, |a, e| a <= e),
            CompareOp::Has => actual.contains(expected),
            CompareOp::NotHave => !actual.contains(expected),
            CompareOp::Regex => self.pattern.as_ref().map(|re| re.is_match(actual)).unwrap_or(false),
            CompareOp::Bitmask => match (octal(actual), octal(expected)) {
                (Some(a), Some(mask)) => a & !mask == 0,
                _ => false,
            },
        }
    }
}

fn numeric(actual: &str, expected: &str, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (actual.trim().parse::<f64>(), expected.trim().parse::<f64>()) {
        (Ok(a), Ok(e)) => cmp(a, e),
        _ => false,
    }
}

fn octal(s: &str) -> Option<u32> {
    u32::from_str_radix(s.trim(), 8).ok()
}

/// One atomic condition. Without a flag the comparison applies to the whole
/// trimmed output; with a flag it applies to the value found for that flag.
#[derive(Debug, Clone)]
pub struct TestItem {
    pub flag: Option<String>,
    pub set: Option<bool>,
    pub compare: Option<Comparison>,
}

impl TestItem {
    pub fn holds(&self, output: &str) -> bool {
        match &self.flag {
            None => self
                .compare
                .as_ref()
                .map(|c| c.holds(output.trim()))
                .unwrap_or(false),
            Some(flag) => {
                let found = flag_value(output, flag);
                match (&found, &self.compare) {
                    (Some(value), Some(compare)) => compare.holds(value),
                    _ => found.is_some() == self.set.unwrap_or(true),
                }
            }
        }
    }
}

/// Finds `flag` in command output and returns its value, if present.
///
/// Understands `--flag=value`, `--flag value` and `key: value`; a flag present
/// with no value yields an empty string.
pub fn flag_value(output: &str, flag: &str) -> Option<String> {
    for line in output.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix(flag).and_then(|r| r.strip_prefix(':')) {
            return Some(unquote(rest.trim()).to_string());
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        for (i, token) in tokens.iter().enumerate() {
            let token = unquote(token);
            if token == flag {
                let value = tokens
                    .get(i + 1)
                    .map(|next| unquote(next))
                    .filter(|next| !looks_like_flag(next))
                    .unwrap_or("");
                return Some(value.to_string());
            }
            if let Some(value) = token.strip_prefix(flag).and_then(|r| r.strip_prefix('=')) {
                return Some(unquote(value).to_string());
            }
        }
    }
    None
}

/// `--name` or `-x`; a negative number such as `-1` is a value.
fn looks_like_flag(token: &str) -> bool {
    token.starts_with("--") || token.strip_prefix('-').and_then(|r| r.chars().next()).is_some_and(char::is_alphabetic)
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '"' || c == '\'')
}

#[derive(Debug, Clone)]
pub enum TestExpr {
    Item(TestItem),
    All(Vec<TestExpr>),
    Any(Vec<TestExpr>),
}

impl TestExpr {
    pub fn holds(&self, output: &str) -> bool {
        match self {
            TestExpr::Item(item) => item.holds(output),
            TestExpr::All(items) => items.iter().all(|e| e.holds(output)),
            TestExpr::Any(items) => items.iter().any(|e| e.holds(output)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(flag: Option<&str>, set: Option<bool>, cmp: Option<(CompareOp, &str)>) -> TestExpr {
        TestExpr::Item(TestItem {
            flag: flag.map(String::from),
            set,
            compare: cmp.map(|(op, v)| Comparison::new(op, v).unwrap()),
        })
    }

    #[test]
    fn whole_output_equality_ignores_trailing_newline() {
        let e = item(None, None, Some((CompareOp::Eq, "1")));
        assert!(e.holds("1\n"));
        assert!(!e.holds("0\n"));
    }

    #[test]
    fn flag_forms_are_recognised() {
        let out = "root 12 /usr/bin/kube-apiserver --anonymous-auth=false --port 0 --profiling";
        assert_eq!(flag_value(out, "--anonymous-auth").as_deref(), Some("false"));
        assert_eq!(flag_value(out, "--port").as_deref(), Some("0"));
        assert_eq!(flag_value(out, "--profiling").as_deref(), Some(""));
        assert_eq!(flag_value(out, "--missing"), None);
        assert_eq!(flag_value("  readOnlyPort: 0\n", "readOnlyPort").as_deref(), Some("0"));
    }

    #[test]
    fn negative_values_after_a_space_are_kept() {
        let out = "kube-controller-manager --terminated-pod-gc-threshold -1 --profiling -v 2";
        assert_eq!(flag_value(out, "--terminated-pod-gc-threshold").as_deref(), Some("-1"));
        assert_eq!(flag_value(out, "--profiling").as_deref(), Some(""));
        assert_eq!(flag_value("--x -1", "--x").as_deref(), Some("-1"));
        assert_eq!(flag_value("--x --y", "--x").as_deref(), Some(""));
        assert!(item(Some("--x"), None, Some((CompareOp::Lt, "0"))).holds("--x -1"));
    }

    #[test]
    fn set_false_passes_when_flag_absent() {
        let e = item(Some("--insecure-port"), Some(false), None);
        assert!(e.holds("kube-apiserver --secure-port=6443"));
        assert!(!e.holds("kube-apiserver --insecure-port=8080"));
    }

    #[test]
    fn numeric_and_bitmask_operators() {
        assert!(item(None, None, Some((CompareOp::Gte, "10"))).holds("12"));
        assert!(!item(None, None, Some((CompareOp::Lt, "10"))).holds("abc"));
        assert!(item(None, None, Some((CompareOp::Bitmask, "644"))).holds("600"));
        assert!(!item(None, None, Some((CompareOp::Bitmask, "644"))).holds("666"));
    }

    #[test]
    fn combinators() {
        let out = "--authorization-mode=Node,RBAC --audit-log-path=/var/log/audit";
        let has_rbac = item(Some("--authorization-mode"), None, Some((CompareOp::Has, "RBAC")));
        let always = item(Some("--always-allow"), Some(true), None);
        assert!(!TestExpr::All(vec![has_rbac.clone(), always.clone()]).holds(out));
        assert!(TestExpr::Any(vec![has_rbac, always]).holds(out));
    }

    #[test]
    fn invalid_regex_is_rejected_at_construction() {
        assert!(Comparison::new(CompareOp::Regex, "(").is_err());
        assert!(item(None, None, Some((CompareOp::Regex, "^v1\\.1[0-9]"))).holds("v1.13.2"));
    }
}
