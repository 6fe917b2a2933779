use crate::billing::{BillingAccount, BillingAccountError, BudgetTemplate};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Invalid billing account: {0}")]
    BillingAccount(#[from] BillingAccountError),

    #[error("Notification topic must look like projects/{{project}}/topics/{{topic}}, got {0}")]
    InvalidTopic(String),

    #[error("Budget amount must be greater than zero")]
    ZeroBudget,

    #[error("Currency code must be a three letter ISO 4217 code, got {0}")]
    InvalidCurrency(String),

    #[error("Label {0} is managed by the reconciler and cannot be configured")]
    ReservedLabel(String),
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    fn with_port(port: u16) -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

fn default_listener() -> Listener {
    Listener::with_port(8080)
}

fn default_admin_listener() -> Listener {
    Listener::with_port(8081)
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Budget {
    #[serde(default = "default_currency")]
    pub currency_code: String,
    #[serde(default = "default_units")]
    pub units: u64,
    /// Where budget updates are published. Usually the topic that triggers this service.
    pub notification_topic: String,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

fn default_currency() -> String {
    "USD".into()
}

fn default_units() -> u64 {
    30
}

fn default_schema_version() -> String {
    "1.0".into()
}

impl Budget {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.units == 0 {
            return Err(ValidationError::ZeroBudget);
        }

        if self.currency_code.len() != 3
            || !self.currency_code.chars().all(|c| c.is_ascii_uppercase())
        {
            return Err(ValidationError::InvalidCurrency(self.currency_code.clone()));
        }

        let parts: Vec<&str> = self.notification_topic.split('/').collect();
        match parts.as_slice() {
            ["projects", project, "topics", topic] if !project.is_empty() && !topic.is_empty() => {
                Ok(())
            }
            _ => Err(ValidationError::InvalidTopic(self.notification_topic.clone())),
        }
    }

    pub fn template(&self) -> BudgetTemplate {
        BudgetTemplate {
            currency_code: self.currency_code.clone(),
            units: self.units,
            notification_topic: self.notification_topic.clone(),
            schema_version: self.schema_version.clone(),
        }
    }
}

/// How provisioning treats labels that already exist on the project.
#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LabelPolicy {
    /// Replace the whole label set. Labels set by anyone else are lost.
    #[default]
    Replace,
    /// Keep existing labels and overwrite only the keys this service writes.
    Merge,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Labels {
    #[serde(default)]
    pub policy: LabelPolicy,
    #[serde(default = "default_fixed_labels")]
    pub fixed: BTreeMap<String, String>,
}

impl Default for Labels {
    fn default() -> Self {
        Labels {
            policy: LabelPolicy::default(),
            fixed: default_fixed_labels(),
        }
    }
}

fn default_fixed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("component".into(), "sandbox".into()),
        ("env".into(), "sandbox".into()),
        ("projectid".into(), "abc0123".into()),
        ("team".into(), "development".into()),
    ])
}

impl Labels {
    pub fn validate(&self) -> Result<(), ValidationError> {
        for reserved in [crate::event::BUDGET_ID_LABEL, crate::event::PROJECT_ID_LABEL] {
            if self.fixed.contains_key(reserved) {
                return Err(ValidationError::ReservedLabel(reserved.into()));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct ApiEndpoints {
    #[serde(default = "default_billing_url")]
    pub billing_url: String,
    #[serde(default = "default_budgets_url")]
    pub budgets_url: String,
    #[serde(default = "default_resource_manager_url")]
    pub resource_manager_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        ApiEndpoints {
            billing_url: default_billing_url(),
            budgets_url: default_budgets_url(),
            resource_manager_url: default_resource_manager_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_billing_url() -> String {
    "https://cloudbilling.googleapis.com".into()
}

fn default_budgets_url() -> String {
    "https://billingbudgets.googleapis.com".into()
}

fn default_resource_manager_url() -> String {
    "https://cloudresourcemanager.googleapis.com".into()
}

fn default_timeout_secs() -> u64 {
    30
}

/// Where the bearer token for API calls comes from.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
#[serde(tag = "type")]
pub enum Auth {
    MetadataServer {
        #[serde(default = "default_metadata_url")]
        url: String,
    },
    Static {
        token: String,
    },
    /// No Authorization header, for local emulators.
    Anonymous,
}

impl Default for Auth {
    fn default() -> Self {
        Auth::MetadataServer {
            url: default_metadata_url(),
        }
    }
}

fn default_metadata_url() -> String {
    METADATA_TOKEN_URL.into()
}

/// Reconciler configuration
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    /// Listener for push deliveries
    #[serde(default = "default_listener")]
    pub listener: Listener,
    /// Listener for health and readiness probes
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    /// Billing account assigned to every new project
    pub billing_account: String,
    pub budget: Budget,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub api: ApiEndpoints,
    #[serde(default)]
    pub auth: Auth,
}

impl Config {
    /// Validates the reconciler configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        BillingAccount::parse(&self.billing_account)?;
        self.budget.validate()?;
        self.labels.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    const MINIMAL: &str = r#"
        billing_account: 000000-AAAAAA-BBBBBB
        budget:
            notification_topic: projects/ops/topics/project-changes
        "#;

    #[test]
    fn test_defaults() {
        let config = parse(MINIMAL);
        config.validate().unwrap();

        assert_eq!(config.listener, Listener::with_port(8080));
        assert_eq!(config.admin_listener, Listener::with_port(8081));
        assert_eq!(config.budget.currency_code, "USD");
        assert_eq!(config.budget.units, 30);
        assert_eq!(config.budget.schema_version, "1.0");
        assert_eq!(config.labels.policy, LabelPolicy::Replace);
        assert_eq!(config.labels.fixed.get("team").map(String::as_str), Some("development"));
        assert_eq!(config.api, ApiEndpoints::default());
        assert_eq!(config.auth, Auth::default());
    }

    #[test]
    fn test_full_config() {
        let config = parse(
            r#"
            listener:
                host: 0.0.0.0
                port: 9000
            admin_listener:
                host: 0.0.0.0
                port: 9001
            billing_account: billingAccounts/000000-AAAAAA-BBBBBB
            budget:
                currency_code: EUR
                units: 100
                notification_topic: projects/ops/topics/project-changes
            labels:
                policy: merge
                fixed:
                    env: prod
            api:
                budgets_url: http://localhost:9090
                timeout_secs: 5
            auth:
                type: static
                token: abc
            "#,
        );
        config.validate().unwrap();

        assert_eq!(config.listener.port, 9000);
        assert_eq!(config.budget.units, 100);
        assert_eq!(config.labels.policy, LabelPolicy::Merge);
        assert_eq!(config.labels.fixed.len(), 1);
        assert_eq!(config.api.budgets_url, "http://localhost:9090");
        assert_eq!(config.api.billing_url, "https://cloudbilling.googleapis.com");
        assert_eq!(
            config.auth,
            Auth::Static {
                token: "abc".into()
            }
        );
    }

    #[test]
    fn test_metadata_auth_default_url() {
        let auth: Auth = serde_yaml::from_str("type: metadata_server").unwrap();
        assert_eq!(auth, Auth::default());

        let auth: Auth = serde_yaml::from_str("type: anonymous").unwrap();
        assert_eq!(auth, Auth::Anonymous);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = parse(MINIMAL);
        config.listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = parse(MINIMAL);
        config.billing_account = "".into();
        assert_eq!(
            config.validate(),
            Err(ValidationError::BillingAccount(BillingAccountError::Empty))
        );

        let mut config = parse(MINIMAL);
        config.budget.notification_topic = "project-changes".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidTopic(_))
        ));

        let mut config = parse(MINIMAL);
        config.budget.units = 0;
        assert_eq!(config.validate(), Err(ValidationError::ZeroBudget));

        let mut config = parse(MINIMAL);
        config.budget.currency_code = "usd".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidCurrency(_))
        ));

        let mut config = parse(MINIMAL);
        config
            .labels
            .fixed
            .insert("budget-id".into(), "nope".into());
        assert_eq!(
            config.validate(),
            Err(ValidationError::ReservedLabel("budget-id".into()))
        );
    }
}
