use crate::expr::TestExpr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which benchmark (and which fact categories) a run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Master,
    Node,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Master => "master",
            NodeType::Node => "node",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum State {
    Pass,
    Fail,
    Warn,
    Info,
}

impl State {
    pub fn is_fail(&self) -> bool { matches!(self, State::Fail) }
    pub fn is_warn(&self) -> bool { matches!(self, State::Warn) }

    /// Whether remediation text is worth surfacing for this state.
    pub fn needs_remediation(&self) -> bool { matches!(self, State::Fail | State::Warn) }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Pass => "PASS",
            State::Fail => "FAIL",
            State::Warn => "WARN",
            State::Info => "INFO",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    #[default]
    Standard,
    /// Not automatable; reported as WARN without running the probe.
    Manual,
    /// Deliberately not evaluated; reported as INFO without running the probe.
    Skip,
}

impl CheckType {
    fn is_standard(&self) -> bool { matches!(self, CheckType::Standard) }
}

/// How a check obtains its actual value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Probe {
    Command { audit: String },
    File { audit_file: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Check {
    pub id: String,
    pub text: String,
    #[serde(flatten)]
    pub probe: Probe,
    #[serde(rename = "type", skip_serializing_if = "CheckType::is_standard")]
    pub check_type: CheckType,
    #[serde(skip)]
    pub test: Option<TestExpr>,
    /// Placeholders in the probe that no fact resolved, e.g. `$apiserverbin`.
    #[serde(skip)]
    pub unresolved: Vec<String>,
    pub scored: bool,
    pub remediation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<State>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_value: Option<String>,
}

impl Check {
    /// Records the outcome of the single evaluation this check gets per run.
    /// Later calls are ignored so a recorded result can never be overwritten.
    pub fn record(&mut self, state: State, actual_value: String) {
        if self.state.is_some() {
            tracing::warn!(check = %self.id, "result already recorded; ignoring second write");
            return;
        }
        self.state = Some(state);
        self.actual_value = Some(actual_value);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub id: String,
    pub text: String,
    pub checks: Vec<Check>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Controls {
    pub id: String,
    pub text: String,
    pub node_type: NodeType,
    pub groups: Vec<Group>,
}

impl Controls {
    /// Tallies every check that has a recorded state. Pure read; calling it again
    /// on the same graph yields the same counts.
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for check in self.groups.iter().flat_map(|g| g.checks.iter()) {
            if let Some(state) = check.state {
                summary.add(state);
            }
        }
        summary
    }

    pub fn checks(&self) -> impl Iterator<Item = (&Group, &Check)> {
        self.groups.iter().flat_map(|g| g.checks.iter().map(move |c| (g, c)))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(rename = "total_pass")]
    pub pass: usize,
    #[serde(rename = "total_fail")]
    pub fail: usize,
    #[serde(rename = "total_warn")]
    pub warn: usize,
    #[serde(rename = "total_info")]
    pub info: usize,
}

impl Summary {
    pub fn add(&mut self, state: State) {
        match state {
            State::Pass => self.pass += 1,
            State::Fail => self.fail += 1,
            State::Warn => self.warn += 1,
            State::Info => self.info += 1,
        }
    }

    pub fn total(&self) -> usize { self.pass + self.fail + self.warn + self.info }

    /// Worst state of the run: FAIL over WARN over PASS. INFO never dominates.
    pub fn status(&self) -> State {
        if self.fail > 0 {
            State::Fail
        } else if self.warn > 0 {
            State::Warn
        } else {
            State::Pass
        }
    }
}
