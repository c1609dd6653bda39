//! Regex rules deciding node availability from `Node.status.conditions`.

use std::collections::HashMap;
use std::sync::RwLock;

use k8s_openapi::api::core::v1::Node;
use regex::Regex;
use tracing::warn;

/// Condition types a healthy node must satisfy when the operator is given no
/// rules of its own.
pub const DEFAULT_AVAILABLE_CONDITIONS: &[(&str, &str)] = &[("Ready", "True")];

struct CompiledRule {
    type_pattern: String,
    status_pattern: String,
    // `None` when the pattern does not compile; such rules never match.
    type_re: Option<Regex>,
    status_re: Option<Regex>,
}

/// Thread-safe effective rule set: user patterns merged with defaults for any
/// default condition type no user pattern already covers.
pub struct NodeConditionRules {
    rules: RwLock<Vec<CompiledRule>>,
}

impl NodeConditionRules {
    pub fn new(user: &HashMap<String, String>) -> Self {
        let this = Self { rules: RwLock::new(Vec::new()) };
        this.set_rules(user);
        this
    }

    /// Recompute the effective set. Type patterns are anchored at the start;
    /// status patterns must match the whole status. Invalid regexes are kept
    /// (they show up in `get_rules`) but never match.
    pub fn set_rules(&self, user: &HashMap<String, String>) {
        let mut effective: Vec<CompiledRule> = user
            .iter()
            .map(|(t, s)| compile_rule(&anchor(t), s))
            .collect();
        for (def_type, def_status) in DEFAULT_AVAILABLE_CONDITIONS {
            let covered = effective
                .iter()
                .any(|r| r.type_re.as_ref().is_some_and(|re| re.is_match(def_type)));
            if !covered {
                effective.push(compile_rule(&anchor(def_type), def_status));
            }
        }
        *self.rules.write().expect("rule set poisoned") = effective;
    }

    /// Defensive copy of the effective pattern set; mutating the returned map
    /// does not touch the live rules.
    pub fn get_rules(&self) -> HashMap<String, String> {
        self.rules
            .read()
            .expect("rule set poisoned")
            .iter()
            .map(|r| (r.type_pattern.clone(), r.status_pattern.clone()))
            .collect()
    }

    /// A node is available unless it is unschedulable, or some condition is
    /// matched by at least one rule's type pattern while its status satisfies
    /// none of those rules.
    pub fn is_node_available(&self, node: &Node) -> bool {
        if node.spec.as_ref().and_then(|s| s.unschedulable) == Some(true) {
            return false;
        }
        let rules = self.rules.read().expect("rule set poisoned");
        let conditions = node
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .map(|c| c.as_slice())
            .unwrap_or_default();
        for cond in conditions {
            let mut matched = false;
            let mut allowed = false;
            for rule in rules.iter() {
                let Some(type_re) = &rule.type_re else { continue };
                if !type_re.is_match(&cond.type_) {
                    continue;
                }
                matched = true;
                if rule.status_re.as_ref().is_some_and(|re| re.is_match(&cond.status)) {
                    allowed = true;
                    break;
                }
            }
            if matched && !allowed {
                return false;
            }
        }
        true
    }
}

fn anchor(pattern: &str) -> String {
    if pattern.starts_with('^') {
        pattern.to_string()
    } else {
        format!("^{pattern}")
    }
}

fn compile_rule(type_pattern: &str, status_pattern: &str) -> CompiledRule {
    let type_re = match Regex::new(type_pattern) {
        Ok(re) => Some(re),
        Err(error) => {
            warn!(pattern = type_pattern, %error, "invalid condition type pattern");
            None
        }
    };
    // Status must match in full.
    let status_re = match Regex::new(&format!("^(?:{status_pattern})$")) {
        Ok(re) => Some(re),
        Err(error) => {
            warn!(pattern = status_pattern, %error, "invalid condition status pattern");
            None
        }
    };
    CompiledRule {
        type_pattern: type_pattern.to_string(),
        status_pattern: status_pattern.to_string(),
        type_re,
        status_re,
    }
}
