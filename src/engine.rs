use crate::config::Config;
use crate::error::EngineResult;
use crate::facts::{FactResolver, FactSet, ProcessTable};
use crate::filter::{FilterOpts, Predicate};
use crate::loader;
use crate::model::{Check, CheckType, Controls, NodeType, State, Summary};
use crate::probe::{ProbeOutcome, Prober};
use crate::substitute::substitute;
use std::path::Path;
use tracing::{debug, info, warn};

/// Executes selected checks in document order and records their results.
pub struct Runner<'a> {
    prober: &'a dyn Prober,
}

impl<'a> Runner<'a> {
    pub fn new(prober: &'a dyn Prober) -> Self {
        Self { prober }
    }

    pub fn run_checks(&self, controls: &mut Controls, predicate: &Predicate) -> Summary {
        for group in controls.groups.iter_mut() {
            // Split the borrow so the predicate sees the group while its checks are mutated.
            let mut checks = std::mem::take(&mut group.checks);
            for check in checks.iter_mut() {
                if !predicate.selects(group, check) {
                    debug!(group = %group.id, check = %check.id, "skipped by filter");
                    continue;
                }
                let (state, actual) = self.evaluate(check);
                debug!(check = %check.id, state = %state, "evaluated");
                check.record(state, actual);
            }
            group.checks = checks;
        }
        controls.summary()
    }

    fn evaluate(&self, check: &Check) -> (State, String) {
        match check.check_type {
            CheckType::Skip => return (State::Info, String::new()),
            // Manual checks are never run; one with a test still needs a person to verify it.
            CheckType::Manual => {
                let state = if check.test.is_some() { State::Warn } else { State::Info };
                return (state, String::new());
            }
            CheckType::Standard => {}
        }

        if check.test.is_some() && !check.unresolved.is_empty() {
            let reason = format!("unresolved {}", check.unresolved.join(" "));
            info!(check = %check.id, reason = %reason, "probe cannot run");
            return (State::Warn, reason);
        }

        let outcome = self.prober.run(&check.probe);
        let Some(test) = &check.test else {
            return (State::Info, outcome_text(outcome));
        };
        match outcome {
            ProbeOutcome::Unavailable { reason, output } => {
                info!(check = %check.id, reason = %reason, "probe could not run");
                let actual = if output.is_empty() { reason } else { output };
                (State::Warn, actual)
            }
            ProbeOutcome::Completed { output, .. } => {
                let state = if test.holds(&output) { State::Pass } else { State::Fail };
                (state, output)
            }
        }
    }
}

fn outcome_text(outcome: ProbeOutcome) -> String {
    match outcome {
        ProbeOutcome::Completed { output, .. } => output,
        ProbeOutcome::Unavailable { reason, output } => if output.is_empty() { reason } else { output },
    }
}

/// A finished run: the evaluated graph plus its tallies.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub controls: Controls,
    pub summary: Summary,
}

/// Wires facts, substitution, loading, filtering and execution for one node type.
pub struct AuditEngine<'a> {
    config: &'a Config,
    processes: &'a dyn ProcessTable,
    prober: &'a dyn Prober,
}

impl<'a> AuditEngine<'a> {
    pub fn new(config: &'a Config, processes: &'a dyn ProcessTable, prober: &'a dyn Prober) -> Self {
        Self { config, processes, prober }
    }

    pub fn resolve_facts(&self, node_type: NodeType) -> EngineResult<FactSet> {
        let node = self.config.node(node_type)?;
        Ok(FactResolver::new(node, self.processes).resolve()?)
    }

    /// True when any master component binary is running on this host.
    pub fn is_master(&self) -> bool {
        match self.config.node(NodeType::Master) {
            Ok(master) => FactResolver::new(master, self.processes).any_binary_running(),
            Err(e) => {
                debug!(error = %e, "no master configuration");
                false
            }
        }
    }

    /// Runs the benchmark at `benchmark`. Every structural problem surfaces
    /// before the first probe executes.
    pub fn run(&self, node_type: NodeType, benchmark: &Path, filter: &FilterOpts) -> EngineResult<RunReport> {
        let predicate = Predicate::new(filter)?;
        let facts = self.resolve_facts(node_type)?;
        for fact in facts.facts() {
            debug!(role = %fact.role, category = ?fact.category, value = %fact.value, "fact");
        }

        let raw = loader::read_benchmark(benchmark)?;
        let substituted = substitute(&raw, &facts);
        let mut controls = loader::parse_controls(&substituted.text, node_type)?;
        loader::mark_unresolved(&mut controls, &raw, &substituted.unresolved)?;
        info!(benchmark = %benchmark.display(), id = %controls.id, "running {} checks", node_type);

        let summary = Runner::new(self.prober).run_checks(&mut controls, &predicate);
        if summary.total() == 0 {
            warn!("no checks matched the selection");
        }
        Ok(RunReport { controls, summary })
    }
}
