use crate::billing::{Budget, BudgetSpec};
use crate::cloud::{ApiError, CloudApi, Project};
use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub authorization: Option<String>,
    pub metadata_flavor: Option<String>,
    pub body: Bytes,
}

impl RecordedRequest {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub struct MockResponse {
    status: u16,
    body: Bytes,
}

impl MockResponse {
    pub fn json(status: u16, body: Value) -> Self {
        MockResponse {
            status,
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn raw(status: u16, body: Bytes) -> Self {
        MockResponse { status, body }
    }
}

/// Start an HTTP server on a random local port that records every request and
/// answers using `respond(method, body)`.
pub async fn start_mock_server<F>(respond: F) -> (u16, Arc<Mutex<Vec<RecordedRequest>>>)
where
    F: Fn(Method, Bytes) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let respond = Arc::new(respond);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = TokioIo::new(stream);
            let respond = respond.clone();
            let recorded = recorded.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<Incoming>| {
                    let respond = respond.clone();
                    let recorded = recorded.clone();
                    async move {
                        let header = |name: &str| {
                            req.headers()
                                .get(name)
                                .and_then(|v| v.to_str().ok())
                                .map(String::from)
                        };
                        let method = req.method().clone();
                        let path = req.uri().path().to_owned();
                        let authorization = header("authorization");
                        let metadata_flavor = header("metadata-flavor");
                        let body = req.into_body().collect().await.unwrap().to_bytes();

                        recorded.lock().await.push(RecordedRequest {
                            method: method.clone(),
                            path,
                            authorization,
                            metadata_flavor,
                            body: body.clone(),
                        });

                        let mock = respond(method, body);
                        let mut response = Response::new(Full::new(mock.body));
                        *response.status_mut() = StatusCode::from_u16(mock.status).unwrap();
                        Ok::<_, Infallible>(response)
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (port, requests)
}

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    SetBillingAccount { project_id: String, account: String },
    CreateBudget { account: String, spec: BudgetSpec },
    DeleteBudget { name: String },
    GetProject { number: String },
    UpdateProject { number: String, project: Project },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FailAt {
    Session,
    SetBillingAccount,
    CreateBudget,
    DeleteBudget,
    GetProject,
    UpdateProject,
}

/// In-memory `CloudApi` that records every call. Sessions share the recording.
#[derive(Clone)]
pub struct FakeCloudApi {
    pub calls: Arc<Mutex<Vec<Call>>>,
    pub sessions: Arc<AtomicUsize>,
    pub budget_name: String,
    pub project: Project,
    pub fail_at: Option<FailAt>,
}

impl FakeCloudApi {
    pub fn new() -> Self {
        FakeCloudApi {
            calls: Arc::new(Mutex::new(Vec::new())),
            sessions: Arc::new(AtomicUsize::new(0)),
            budget_name: "billingAccounts/000000-AAAAAA-BBBBBB/budgets/2f9ab7c1-1d4e".into(),
            project: serde_json::from_value(json!({
                "projectNumber": "123456789012",
                "projectId": "sandbox-one",
                "lifecycleState": "ACTIVE",
                "labels": {"cost-center": "r-and-d"},
            }))
            .unwrap(),
            fail_at: None,
        }
    }

    pub fn failing_at(step: FailAt) -> Self {
        FakeCloudApi {
            fail_at: Some(step),
            ..Self::new()
        }
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    fn fail(&self, step: FailAt) -> Result<(), ApiError> {
        match self.fail_at {
            Some(fail_at) if fail_at == step => Err(ApiError::Status {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "boom".into(),
            }),
            _ => Ok(()),
        }
    }

    async fn record(&self, step: FailAt, call: Call) -> Result<(), ApiError> {
        self.calls.lock().await.push(call);
        self.fail(step)
    }
}

#[async_trait]
impl CloudApi for FakeCloudApi {
    async fn session(&self) -> Result<Arc<dyn CloudApi>, ApiError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        self.fail(FailAt::Session)?;
        Ok(Arc::new(self.clone()))
    }

    async fn set_billing_account(
        &self,
        project_id: &str,
        billing_account_name: &str,
    ) -> Result<(), ApiError> {
        let call = Call::SetBillingAccount {
            project_id: project_id.into(),
            account: billing_account_name.into(),
        };
        self.record(FailAt::SetBillingAccount, call).await
    }

    async fn create_budget(
        &self,
        billing_account_name: &str,
        budget: &BudgetSpec,
    ) -> Result<Budget, ApiError> {
        let call = Call::CreateBudget {
            account: billing_account_name.into(),
            spec: budget.clone(),
        };
        self.record(FailAt::CreateBudget, call).await?;
        Ok(Budget {
            name: self.budget_name.clone(),
        })
    }

    async fn delete_budget(&self, budget_name: &str) -> Result<(), ApiError> {
        let call = Call::DeleteBudget {
            name: budget_name.into(),
        };
        self.record(FailAt::DeleteBudget, call).await
    }

    async fn get_project(&self, project_number: &str) -> Result<Project, ApiError> {
        let call = Call::GetProject {
            number: project_number.into(),
        };
        self.record(FailAt::GetProject, call).await?;
        Ok(self.project.clone())
    }

    async fn update_project(
        &self,
        project_number: &str,
        project: &Project,
    ) -> Result<Project, ApiError> {
        let call = Call::UpdateProject {
            number: project_number.into(),
            project: project.clone(),
        };
        self.record(FailAt::UpdateProject, call).await?;
        Ok(project.clone())
    }
}
