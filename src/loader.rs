//! Parses a concrete (already substituted) benchmark document into the
//! Controls -> Group -> Check graph, validating IDs and test blocks.

use crate::error::LoadError;
use crate::expr::{CompareOp, Comparison, TestExpr, TestItem};
use crate::model::{Check, CheckType, Controls, Group, NodeType, Probe};
use crate::substitute::markers;
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawControls {
    id: Option<String>,
    text: Option<String>,
    #[serde(rename = "type")]
    node_type: Option<NodeType>,
    #[serde(default)]
    groups: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGroup {
    id: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    checks: Vec<RawCheck>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCheck {
    id: Option<String>,
    #[serde(default)]
    text: String,
    audit: Option<String>,
    audit_file: Option<String>,
    #[serde(rename = "type", default)]
    check_type: CheckType,
    tests: Option<RawTests>,
    #[serde(default)]
    remediation: String,
    #[serde(default)]
    scored: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum BinOp {
    And,
    Or,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTests {
    bin_op: Option<BinOp>,
    #[serde(default)]
    test_items: Vec<RawTestNode>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTestNode {
    Block(RawTests),
    Item(RawTestItem),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTestItem {
    flag: Option<String>,
    set: Option<bool>,
    compare: Option<RawCompare>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCompare {
    op: CompareOp,
    value: serde_yaml::Value,
}

/// Probe text of the raw, unsubstituted document, in document order.
#[derive(Debug, Deserialize)]
struct ProbeDocument {
    #[serde(default)]
    groups: Vec<ProbeGroup>,
}

#[derive(Debug, Deserialize)]
struct ProbeGroup {
    #[serde(default)]
    checks: Vec<ProbeCheck>,
}

#[derive(Debug, Deserialize)]
struct ProbeCheck {
    audit: Option<String>,
    audit_file: Option<String>,
}

pub fn read_benchmark(path: &Path) -> Result<String, LoadError> {
    let raw = fs::read_to_string(path).map_err(|source| LoadError::Read { path: path.to_path_buf(), source })?;
    debug!(path = %path.display(), "using benchmark file");
    Ok(raw)
}

/// Records on each check which of the `unresolved` markers its probe used in
/// `raw`, the document before substitution. Substitution leaves the shape of
/// the document alone, so checks line up by position.
pub fn mark_unresolved(controls: &mut Controls, raw: &str, unresolved: &BTreeSet<String>) -> Result<(), LoadError> {
    if unresolved.is_empty() {
        return Ok(());
    }
    let doc: ProbeDocument = serde_yaml::from_str(raw)?;
    for (group, raw_group) in controls.groups.iter_mut().zip(doc.groups) {
        for (check, raw_check) in group.checks.iter_mut().zip(raw_group.checks) {
            let text = raw_check.audit.or(raw_check.audit_file).unwrap_or_default();
            let mut missing: Vec<String> = Vec::new();
            for marker in markers(&text).filter(|m| unresolved.contains(*m)) {
                if !missing.iter().any(|seen| seen == marker) {
                    missing.push(marker.to_string());
                }
            }
            if !missing.is_empty() {
                debug!(check = %check.id, markers = ?missing, "probe uses unresolved placeholders");
                check.unresolved = missing;
            }
        }
    }
    Ok(())
}

pub fn parse_controls(document: &str, node_type: NodeType) -> Result<Controls, LoadError> {
    let raw: RawControls = serde_yaml::from_str(document)?;

    let id = raw.id.ok_or(LoadError::MissingField { context: "controls".into(), field: "id" })?;
    if let Some(found) = raw.node_type {
        if found != node_type {
            return Err(LoadError::NodeTypeMismatch { expected: node_type.to_string(), found: found.to_string() });
        }
    }

    let mut group_ids = HashSet::new();
    let mut groups = Vec::with_capacity(raw.groups.len());
    for (gi, g) in raw.groups.into_iter().enumerate() {
        let gid = g
            .id
            .ok_or_else(|| LoadError::MissingField { context: format!("group #{}", gi + 1), field: "id" })?;
        if !group_ids.insert(gid.clone()) {
            return Err(LoadError::DuplicateGroup(gid));
        }

        let mut check_ids = HashSet::new();
        let mut checks = Vec::with_capacity(g.checks.len());
        for (ci, c) in g.checks.into_iter().enumerate() {
            let check = build_check(&gid, ci, c)?;
            if !check_ids.insert(check.id.clone()) {
                return Err(LoadError::DuplicateCheck { group: gid, check: check.id });
            }
            checks.push(check);
        }
        groups.push(Group { id: gid, text: g.text, checks });
    }

    Ok(Controls { id, text: raw.text.unwrap_or_default(), node_type, groups })
}

fn build_check(group: &str, index: usize, raw: RawCheck) -> Result<Check, LoadError> {
    let id = raw.id.ok_or_else(|| LoadError::MissingField {
        context: format!("group {} check #{}", group, index + 1),
        field: "id",
    })?;
    let probe = match (raw.audit, raw.audit_file) {
        (Some(_), Some(_)) => {
            return Err(LoadError::InvalidTest { check: id, reason: "audit and audit_file are mutually exclusive".into() })
        }
        (None, Some(path)) => Probe::File { audit_file: path },
        (audit, None) => Probe::Command { audit: audit.unwrap_or_default() },
    };
    let test = raw
        .tests
        .map(|t| build_block(t).map_err(|reason| LoadError::InvalidTest { check: id.clone(), reason }))
        .transpose()?;

    Ok(Check {
        id,
        text: raw.text,
        probe,
        check_type: raw.check_type,
        test,
        unresolved: Vec::new(),
        scored: raw.scored,
        remediation: raw.remediation,
        state: None,
        actual_value: None,
    })
}

fn build_block(raw: RawTests) -> Result<TestExpr, String> {
    let mut items = raw.test_items.into_iter().map(build_node).collect::<Result<Vec<_>, _>>()?;
    match (items.len(), raw.bin_op) {
        (0, _) => Err("test block has no test_items".into()),
        (1, None) => Ok(items.remove(0)),
        (_, None) => Err("several test_items need an explicit bin_op (and/or)".into()),
        (_, Some(BinOp::And)) => Ok(TestExpr::All(items)),
        (_, Some(BinOp::Or)) => Ok(TestExpr::Any(items)),
    }
}

fn build_node(raw: RawTestNode) -> Result<TestExpr, String> {
    match raw {
        RawTestNode::Block(block) => build_block(block),
        RawTestNode::Item(item) => build_item(item).map(TestExpr::Item),
    }
}

fn build_item(raw: RawTestItem) -> Result<TestItem, String> {
    if raw.flag.is_none() && raw.compare.is_none() {
        return Err("test item needs a flag or a compare".into());
    }
    let compare = raw
        .compare
        .map(|c| {
            let value = scalar(&c.value)?;
            Comparison::new(c.op, value).map_err(|e| format!("invalid regex: {}", e))
        })
        .transpose()?;
    Ok(TestItem { flag: raw.flag, set: raw.set, compare })
}

fn scalar(value: &serde_yaml::Value) -> Result<String, String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Null => Ok(String::new()),
        other => Err(format!("compare value must be a scalar, got {:?}", other)),
    }
}
