//! Filter Rule Types
//!
//! Domain types for the provider's filtered-stream rules.
//!
//! # Design
//!
//! Reconciliation is a destructive reset: every rule currently registered
//! with the provider is deleted, then the configured rule list is added.
//! Nothing here diffs the two sets.

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Rule
// =============================================================================

/// A single filter rule.
///
/// `id` is assigned by the provider and is only present on rules that are
/// already registered remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Provider-assigned rule id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Filter expression (keyword / boolean query).
    pub value: String,
    /// Optional label echoed back in matching records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Rule {
    /// Create an unregistered rule with the given filter expression.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            id: None,
            value: value.into(),
            tag: None,
        }
    }

    /// Attach a tag to the rule.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

// =============================================================================
// Desired Rules
// =============================================================================

/// The fixed rule list the remote rule set is reset to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRules {
    rules: Vec<Rule>,
}

impl DesiredRules {
    /// Create a desired rule list. Provider ids are stripped.
    #[must_use]
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|rule| Rule { id: None, ..rule })
                .collect(),
        }
    }

    /// Parse a `;`-separated rule list. `value::tag` attaches a tag.
    ///
    /// Blank entries are skipped. Returns `None` if no rule remains.
    #[must_use]
    pub fn parse(list: &str) -> Option<Self> {
        let rules: Vec<Rule> = list
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| match entry.rsplit_once("::") {
                Some((value, tag)) if !value.trim().is_empty() && !tag.trim().is_empty() => {
                    Some(Rule::new(value.trim()).with_tag(tag.trim()))
                }
                Some((value, _)) if value.trim().is_empty() => None,
                Some((value, _)) => Some(Rule::new(value.trim())),
                None => Some(Rule::new(entry)),
            })
            .collect();

        if rules.is_empty() {
            None
        } else {
            Some(Self { rules })
        }
    }

    /// Get the rules.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of desired rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Check if the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Build the add request body for these rules.
    #[must_use]
    pub fn to_add_request(&self) -> AddRulesRequest {
        AddRulesRequest {
            add: self.rules.clone(),
        }
    }
}

impl Default for DesiredRules {
    fn default() -> Self {
        Self::new(vec![Rule::new("cars")])
    }
}

// =============================================================================
// Rule Set Snapshot
// =============================================================================

/// A response from the rule-management endpoint.
///
/// `data` is `None` when the provider sent no rule list, or sent something
/// that is not a list of rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Registered rules, if the response carried a rule list.
    #[serde(
        default,
        deserialize_with = "lenient_rule_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Vec<Rule>>,
    /// Provider metadata (`sent`, `result_count`, `summary`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    /// Provider-reported errors on an otherwise successful call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<serde_json::Value>>,
}

impl RuleSet {
    /// Build a snapshot holding the given rules.
    #[must_use]
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self {
            data: Some(rules),
            ..Self::default()
        }
    }

    /// Ids of every registered rule, in response order.
    ///
    /// Returns `None` when the snapshot has no rule list.
    #[must_use]
    pub fn rule_ids(&self) -> Option<Vec<String>> {
        self.data
            .as_ref()
            .map(|rules| rules.iter().filter_map(|rule| rule.id.clone()).collect())
    }

    /// Build the delete request covering every registered rule.
    ///
    /// Returns `None` when there is nothing to delete.
    #[must_use]
    pub fn to_delete_request(&self) -> Option<DeleteRulesRequest> {
        let ids = self.rule_ids()?;
        if ids.is_empty() {
            return None;
        }
        Some(DeleteRulesRequest {
            delete: DeleteIds { ids },
        })
    }

    /// Number of rules in the snapshot.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    /// Provider errors carried by the response, if any.
    #[must_use]
    pub fn provider_errors(&self) -> &[serde_json::Value] {
        self.errors.as_deref().unwrap_or_default()
    }
}

fn lenient_rule_list<'de, D>(deserializer: D) -> Result<Option<Vec<Rule>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => {
            Some(items.into_iter().filter_map(registered_rule).collect())
        }
        _ => None,
    })
}

/// Keep any entry that carries an id, even when its other fields are unusable.
fn registered_rule(item: serde_json::Value) -> Option<Rule> {
    let id = match item.get("id") {
        Some(serde_json::Value::String(id)) => Some(id.clone()),
        Some(serde_json::Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };
    let parsed = serde_json::from_value::<Rule>(item).ok();
    match (id, parsed) {
        (Some(id), Some(rule)) => Some(Rule {
            id: Some(id),
            ..rule
        }),
        (Some(id), None) => Some(Rule {
            id: Some(id),
            ..Rule::new(String::new())
        }),
        (None, parsed) => parsed,
    }
}

// =============================================================================
// Request Bodies
// =============================================================================

/// `{ "add": [ ... ] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddRulesRequest {
    /// Rules to register.
    pub add: Vec<Rule>,
}

/// `{ "delete": { "ids": [ ... ] } }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteRulesRequest {
    /// Ids to delete.
    pub delete: DeleteIds,
}

/// Id list inside a delete request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteIds {
    /// Provider rule ids.
    pub ids: Vec<String>,
}

// =============================================================================
// Tests
// =============================================================================
