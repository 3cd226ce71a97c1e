use crate::error::ConfigError;
use crate::model::{Check, Group};
use std::collections::BTreeSet;

/// User selection of what to run.
#[derive(Debug, Clone, Default)]
pub struct FilterOpts {
    /// Comma-separated group IDs.
    pub group_list: String,
    /// Comma-separated check IDs.
    pub check_list: String,
    pub scored: bool,
    pub unscored: bool,
}

/// Decides whether a (group, check) pair is run. Holds no state beyond the
/// selection it was built from.
#[derive(Debug, Clone)]
pub struct Predicate {
    groups: BTreeSet<String>,
    checks: BTreeSet<String>,
    scored: bool,
    unscored: bool,
}

impl Predicate {
    pub fn new(opts: &FilterOpts) -> Result<Self, ConfigError> {
        let groups = clean_ids(&opts.group_list);
        let checks = clean_ids(&opts.check_list);
        if !groups.is_empty() && !checks.is_empty() {
            return Err(ConfigError::GroupAndCheckList);
        }
        if !opts.scored && !opts.unscored {
            return Err(ConfigError::NoScoringSelected);
        }
        Ok(Self { groups, checks, scored: opts.scored, unscored: opts.unscored })
    }

    pub fn selects(&self, group: &Group, check: &Check) -> bool {
        let group_ok = self.groups.is_empty() || self.groups.contains(&group.id);
        let check_ok = self.checks.is_empty() || self.checks.contains(&check.id);
        let scoring_ok = (self.scored && check.scored) || (self.unscored && !check.scored);
        group_ok && check_ok && scoring_ok
    }
}

fn clean_ids(list: &str) -> BTreeSet<String> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}
