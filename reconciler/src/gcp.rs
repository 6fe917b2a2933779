use crate::billing::{Budget, BudgetSpec};
use crate::cloud::{ApiError, CloudApi, Project};
use crate::config::{ApiEndpoints, Auth};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const METADATA_FLAVOR: (&str, &str) = ("Metadata-Flavor", "Google");

#[derive(Deserialize)]
struct AccessToken {
    access_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BillingInfo<'a> {
    billing_account_name: &'a str,
}

#[derive(Serialize)]
struct CreateBudgetRequest<'a> {
    budget: &'a BudgetSpec,
}

/// REST client for the billing, budgets and resource manager APIs.
pub struct GcpClient {
    client: reqwest::Client,
    endpoints: ApiEndpoints,
    auth: Auth,
}

impl GcpClient {
    pub fn new(endpoints: ApiEndpoints, auth: Auth) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoints.timeout_secs))
            .build()?;

        Ok(GcpClient {
            client,
            endpoints,
            auth,
        })
    }

    fn url(base: &str, path: &str) -> Result<Url, ApiError> {
        let full = format!("{}/{}", base.trim_end_matches('/'), path);
        Url::parse(&full).map_err(|e| ApiError::InvalidUrl(format!("{full}: {e}")))
    }

    async fn access_token(&self) -> Result<Option<String>, ApiError> {
        match &self.auth {
            Auth::Anonymous => Ok(None),
            Auth::Static { token } => Ok(Some(token.clone())),
            Auth::MetadataServer { url } => {
                let response = self
                    .client
                    .get(url.as_str())
                    .header(METADATA_FLAVOR.0, METADATA_FLAVOR.1)
                    .send()
                    .await
                    .map_err(|e| ApiError::Auth(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(ApiError::Auth(format!(
                        "metadata server returned {}",
                        response.status()
                    )));
                }

                let token = response
                    .json::<AccessToken>()
                    .await
                    .map_err(|e| ApiError::Auth(e.to_string()))?;
                Ok(Some(token.access_token))
            }
        }
    }

    /// Authorize and send the request. Any non-2xx status is an error.
    async fn send(&self, request: RequestBuilder) -> Result<Response, ApiError> {
        let request = match self.access_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl CloudApi for GcpClient {
    async fn session(&self) -> Result<Arc<dyn CloudApi>, ApiError> {
        let auth = match self.access_token().await? {
            Some(token) => Auth::Static { token },
            None => Auth::Anonymous,
        };

        Ok(Arc::new(GcpClient {
            client: self.client.clone(),
            endpoints: self.endpoints.clone(),
            auth,
        }))
    }

    async fn set_billing_account(
        &self,
        project_id: &str,
        billing_account_name: &str,
    ) -> Result<(), ApiError> {
        let url = Self::url(
            &self.endpoints.billing_url,
            &format!("v1/projects/{project_id}/billingInfo"),
        )?;
        let body = BillingInfo {
            billing_account_name,
        };

        let response = self.send(self.client.put(url).json(&body)).await?;
        tracing::debug!(status = %response.status(), project_id, "billing info updated");
        Ok(())
    }

    async fn create_budget(
        &self,
        billing_account_name: &str,
        budget: &BudgetSpec,
    ) -> Result<Budget, ApiError> {
        let url = Self::url(
            &self.endpoints.budgets_url,
            &format!("v1beta1/{billing_account_name}/budgets"),
        )?;
        let body = CreateBudgetRequest { budget };

        let response = self.send(self.client.post(url).json(&body)).await?;
        Ok(response.json::<Budget>().await?)
    }

    async fn delete_budget(&self, budget_name: &str) -> Result<(), ApiError> {
        let url = Self::url(&self.endpoints.budgets_url, &format!("v1beta1/{budget_name}"))?;
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn get_project(&self, project_number: &str) -> Result<Project, ApiError> {
        let url = Self::url(
            &self.endpoints.resource_manager_url,
            &format!("v1/projects/{project_number}"),
        )?;

        let response = self.send(self.client.get(url)).await?;
        Ok(response.json::<Project>().await?)
    }

    async fn update_project(
        &self,
        project_number: &str,
        project: &Project,
    ) -> Result<Project, ApiError> {
        let url = Self::url(
            &self.endpoints.resource_manager_url,
            &format!("v1/projects/{project_number}"),
        )?;

        let response = self.send(self.client.put(url).json(project)).await?;
        Ok(response.json::<Project>().await?)
    }
}
