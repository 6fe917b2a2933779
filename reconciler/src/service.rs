use crate::event::{EventError, PubSubMessage, PushEnvelope};
use crate::reconciler::{Outcome, ProjectLifecycleReconciler, ReconcileError};
use http_body_util::BodyExt;
use hyper::body::{Body, Bytes};
use hyper::service::Service;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use shared::http::{ResponseBody, make_boxed_error_response, make_empty_response};
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;

#[derive(thiserror::Error, Debug)]
pub enum HandleError {
    #[error("could not decode message: {0}")]
    Event(#[from] EventError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Decode one trigger message and act on it. This is a single invocation.
pub async fn handle_message(
    reconciler: &ProjectLifecycleReconciler,
    message: &PubSubMessage,
) -> Result<Outcome, HandleError> {
    let notification = message.decode()?;
    Ok(reconciler.handle_notification(notification).await?)
}

// Push subscriptions wrap the message in an envelope, but a bare message is
// accepted as well.
#[derive(Deserialize)]
#[serde(untagged)]
enum Delivery {
    Envelope(PushEnvelope),
    Message(PubSubMessage),
}

impl Delivery {
    fn into_message(self) -> PubSubMessage {
        match self {
            Delivery::Envelope(envelope) => envelope.message,
            Delivery::Message(message) => message,
        }
    }
}

/// Receives push deliveries.
///
/// A 2xx response acknowledges the message. Reconciliation failures answer 500
/// so the message is redelivered. Messages whose payload cannot be decoded are
/// logged and acknowledged. Bodies that are not push deliveries answer 400.
#[derive(Clone)]
pub struct PushService {
    reconciler: ProjectLifecycleReconciler,
}

impl PushService {
    pub fn new(reconciler: ProjectLifecycleReconciler) -> Self {
        PushService { reconciler }
    }
}

impl<B> Service<Request<B>> for PushService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Display + Send,
{
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let reconciler = self.reconciler.clone();
        Box::pin(async move { Ok(handle_request(&reconciler, req).await) })
    }
}

async fn handle_request<B>(
    reconciler: &ProjectLifecycleReconciler,
    req: Request<B>,
) -> Response<ResponseBody>
where
    B: Body,
    B::Error: Display,
{
    if req.method() != Method::POST {
        return make_boxed_error_response(StatusCode::METHOD_NOT_ALLOWED);
    }

    let body: Bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to read request body");
            return make_boxed_error_response(StatusCode::BAD_REQUEST);
        }
    };

    let message = match serde_json::from_slice::<Delivery>(&body) {
        Ok(delivery) => delivery.into_message(),
        Err(e) => {
            tracing::error!(error = %e, "request body is not a push delivery");
            return make_boxed_error_response(StatusCode::BAD_REQUEST);
        }
    };

    match handle_message(reconciler, &message).await {
        Ok(outcome) => {
            tracing::debug!(
                message_id = ?message.message_id,
                publish_time = ?message.publish_time,
                ?outcome,
                "message handled"
            );
            make_empty_response(StatusCode::NO_CONTENT)
        }
        Err(HandleError::Event(e)) => {
            tracing::error!(
                message_id = ?message.message_id,
                publish_time = ?message.publish_time,
                error = %e,
                "dropping undecodable message"
            );
            make_empty_response(StatusCode::NO_CONTENT)
        }
        Err(HandleError::Reconcile(_)) => {
            make_boxed_error_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
