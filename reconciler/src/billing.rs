use serde::{Deserialize, Serialize};
use std::fmt;

const ACCOUNT_PREFIX: &str = "billingAccounts/";
const BUDGETS_PREFIX: &str = "budgets/";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BillingAccountError {
    #[error("billing account id is empty")]
    Empty,
    #[error("invalid billing account id: {0}")]
    Invalid(String),
}

/// A billing account id such as `000000-AAAAAA-BBBBBB`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BillingAccount(String);

impl BillingAccount {
    /// Accepts either the bare id or the `billingAccounts/{id}` resource name.
    pub fn parse(s: &str) -> Result<Self, BillingAccountError> {
        let id = s.trim();
        let id = id.strip_prefix(ACCOUNT_PREFIX).unwrap_or(id);

        if id.is_empty() {
            return Err(BillingAccountError::Empty);
        }
        if !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(BillingAccountError::Invalid(s.to_owned()));
        }

        Ok(BillingAccount(id.to_owned()))
    }

    pub fn id(&self) -> &str {
        &self.0
    }

    pub fn resource_name(&self) -> String {
        format!("{ACCOUNT_PREFIX}{}", self.0)
    }

    pub fn budget_name(&self, budget_id: &str) -> String {
        format!("{ACCOUNT_PREFIX}{}/{BUDGETS_PREFIX}{budget_id}", self.0)
    }
}

impl fmt::Display for BillingAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_name())
    }
}

/// Extract the budget id from a budget resource name.
///
/// `billingAccounts/XXX/budgets/YYY` yields `YYY`.
pub fn budget_id_from_name(name: &str) -> Option<&str> {
    let start = name.find(BUDGETS_PREFIX)? + BUDGETS_PREFIX.len();
    let id = &name[start..];
    (!id.is_empty()).then_some(id)
}

/// Request body of a budget, in the shape the budgets API expects.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetSpec {
    pub display_name: String,
    pub budget_filter: BudgetFilter,
    pub amount: BudgetAmount,
    pub all_updates_rule: AllUpdatesRule,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct BudgetFilter {
    pub projects: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BudgetAmount {
    pub specified_amount: Money,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Money {
    pub currency_code: String,
    // int64 values travel as JSON strings
    pub units: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AllUpdatesRule {
    pub pubsub_topic: String,
    pub schema_version: String,
}

/// A budget as returned by the budgets API. Only the name is used.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Budget {
    pub name: String,
}

/// Settings shared by every budget this service creates.
#[derive(Clone, Debug, PartialEq)]
pub struct BudgetTemplate {
    pub currency_code: String,
    pub units: u64,
    pub notification_topic: String,
    pub schema_version: String,
}

impl BudgetTemplate {
    pub fn for_project(&self, project_id: &str, project_number: &str) -> BudgetSpec {
        BudgetSpec {
            display_name: format!("budget-{project_id}"),
            budget_filter: BudgetFilter {
                projects: vec![format!("projects/{project_number}")],
            },
            amount: BudgetAmount {
                specified_amount: Money {
                    currency_code: self.currency_code.clone(),
                    units: self.units.to_string(),
                },
            },
            all_updates_rule: AllUpdatesRule {
                pubsub_topic: self.notification_topic.clone(),
                schema_version: self.schema_version.clone(),
            },
        }
    }
}
