use crate::model::{Controls, State, Summary};
use serde::Serialize;
use std::fmt::Write as _;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat { Text, Json }

/// Which sections of the text report to print.
#[derive(Clone, Copy, Debug)]
pub struct Sections {
    pub results: bool,
    pub remediations: bool,
    pub summary: bool,
    /// Print raw probe output under FAIL checks.
    pub test_output: bool,
}

impl Default for Sections {
    fn default() -> Self {
        Self { results: true, remediations: true, summary: true, test_output: false }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    #[serde(flatten)]
    controls: &'a Controls,
    #[serde(flatten)]
    summary: Summary,
}

pub struct Reporter {
    format: OutputFormat,
    sections: Sections,
}

impl Reporter {
    pub fn new(format: OutputFormat, sections: Sections) -> Self { Self { format, sections } }

    pub fn render(&self, controls: &Controls, summary: &Summary) -> Result<String, serde_json::Error> {
        match self.format {
            OutputFormat::Text => Ok(self.render_text(controls, summary)),
            OutputFormat::Json => serde_json::to_string(&JsonReport { controls, summary: *summary }),
        }
    }

    fn render_text(&self, controls: &Controls, summary: &Summary) -> String {
        let mut out = String::new();
        if self.sections.results {
            line(&mut out, State::Info, &format!("{} {}", controls.id, controls.text));
            for group in &controls.groups {
                line(&mut out, State::Info, &format!("{} {}", group.id, group.text));
                for check in &group.checks {
                    let Some(state) = check.state else { continue };
                    line(&mut out, state, &format!("{} {}", check.id, check.text));
                    if self.sections.test_output && state.is_fail() {
                        if let Some(actual) = check.actual_value.as_deref().filter(|a| !a.is_empty()) {
                            for row in actual.split('\n') {
                                let _ = writeln!(out, "\t {}", row);
                            }
                        }
                    }
                }
            }
            out.push('\n');
        }

        if self.sections.remediations && (summary.fail > 0 || summary.warn > 0) {
            out.push_str("== Remediations ==\n");
            for (_, check) in controls.checks() {
                if check.state.map(|s| s.needs_remediation()).unwrap_or(false) {
                    let _ = writeln!(out, "{} {}", check.id, check.remediation);
                }
            }
            out.push('\n');
        }

        if self.sections.summary {
            let _ = writeln!(out, "== Summary: {} ==", summary.status());
            let _ = writeln!(
                out,
                "{} checks PASS\n{} checks FAIL\n{} checks WARN\n{} checks INFO",
                summary.pass, summary.fail, summary.warn, summary.info
            );
        }
        out
    }
}

fn line(out: &mut String, state: State, text: &str) {
    let _ = writeln!(out, "[{}] {}", state, text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Check, CheckType, Group, NodeType, Probe};

    fn check(id: &str, state: Option<State>, actual: &str) -> Check {
        Check {
            id: id.into(),
            text: format!("text {}", id),
            probe: Probe::Command { audit: "cat x".into() },
            check_type: CheckType::Standard,
            test: None,
            unresolved: Vec::new(),
            scored: true,
            remediation: format!("fix {}", id),
            state,
            actual_value: state.map(|_| actual.to_string()),
        }
    }

    fn controls() -> Controls {
        Controls {
            id: "1".into(),
            text: "Master".into(),
            node_type: NodeType::Master,
            groups: vec![Group {
                id: "1.1".into(),
                text: "API Server".into(),
                checks: vec![
                    check("1.1.1", Some(State::Pass), "ok"),
                    check("1.1.2", Some(State::Fail), "line one\nline two"),
                    check("1.1.3", None, ""),
                    check("1.1.4", Some(State::Warn), ""),
                ],
            }],
        }
    }

    #[test]
    fn text_report_lists_results_remediations_and_summary() {
        let c = controls();
        let sections = Sections { test_output: true, ..Sections::default() };
        let text = Reporter::new(OutputFormat::Text, sections).render(&c, &c.summary()).unwrap();
        assert!(text.starts_with("[INFO] 1 Master\n[INFO] 1.1 API Server\n[PASS] 1.1.1 text 1.1.1\n[FAIL] 1.1.2"));
        assert!(text.contains("\t line one\n\t line two\n"));
        assert!(!text.contains("1.1.3"));
        assert!(text.contains("== Remediations ==\n1.1.2 fix 1.1.2\n1.1.4 fix 1.1.4\n"));
        assert!(!text.contains("fix 1.1.1"));
        assert!(text.contains("== Summary: FAIL ==\n1 checks PASS\n1 checks FAIL\n1 checks WARN\n0 checks INFO\n"));
    }

    #[test]
    fn sections_can_be_turned_off() {
        let c = controls();
        let sections = Sections { results: false, remediations: false, summary: true, test_output: false };
        let text = Reporter::new(OutputFormat::Text, sections).render(&c, &c.summary()).unwrap();
        assert!(text.starts_with("== Summary"));
    }

    #[test]
    fn json_report_has_stable_field_names() {
        let c = controls();
        let json = Reporter::new(OutputFormat::Json, Sections::default()).render(&c, &c.summary()).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["id"], "1");
        assert_eq!(v["node_type"], "master");
        assert_eq!(v["total_fail"], 1);
        let first = &v["groups"][0]["checks"][0];
        assert_eq!(first["id"], "1.1.1");
        assert_eq!(first["state"], "PASS");
        assert_eq!(first["actual_value"], "ok");
        assert_eq!(first["audit"], "cat x");
        assert!(v["groups"][0]["checks"][2].get("state").is_none());
    }
}
