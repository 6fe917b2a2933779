use crate::billing::{Budget, BudgetSpec};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("could not obtain access token: {0}")]
    Auth(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// A project resource as returned by the resource manager.
///
/// Fields other than `labels` are kept verbatim so that writing the project back
/// does not drop anything the API returned.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct Project(Map<String, Value>);

impl Project {
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.0
            .get("labels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_labels(&mut self, labels: BTreeMap<String, String>) {
        let labels = labels
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        self.0.insert("labels".into(), Value::Object(labels));
    }
}

/// The administrative calls the reconciler makes against the cloud provider.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Obtain credentials once and return a handle that reuses them. Every call
    /// made while handling one event goes through the same session.
    async fn session(&self) -> Result<Arc<dyn CloudApi>, ApiError>;

    async fn set_billing_account(
        &self,
        project_id: &str,
        billing_account_name: &str,
    ) -> Result<(), ApiError>;

    async fn create_budget(
        &self,
        billing_account_name: &str,
        budget: &BudgetSpec,
    ) -> Result<Budget, ApiError>;

    async fn delete_budget(&self, budget_name: &str) -> Result<(), ApiError>;

    async fn get_project(&self, project_number: &str) -> Result<Project, ApiError>;

    async fn update_project(
        &self,
        project_number: &str,
        project: &Project,
    ) -> Result<Project, ApiError>;
}
