//! HTTP remote-apply handler.
//!
//! Each mutation kind maps to a collection under the base URL:
//! `POST` creates, `PUT` updates and `DELETE` deletes `<base>/<kind>`.
//! The payload travels as the JSON body.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::ApplyError;
use crate::queue::{MutationKind, MutationOperation, PendingMutation};
use crate::sync::MutationHandler;

#[derive(Clone)]
pub struct HttpMutationHandler {
  client: Client,
  base_url: Url,
}

impl HttpMutationHandler {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApplyError> {
    // Trailing slash so join() appends instead of replacing the last segment
    let normalized = if base_url.ends_with('/') {
      base_url.to_string()
    } else {
      format!("{}/", base_url)
    };
    let base_url = Url::parse(&normalized)
      .map_err(|e| ApplyError::Rejected(format!("invalid base URL {}: {}", base_url, e)))?;

    let client = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ApplyError::Transport(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self { client, base_url })
  }

  pub fn endpoint(&self, kind: MutationKind) -> Result<Url, ApplyError> {
    self
      .base_url
      .join(kind.as_str())
      .map_err(|e| ApplyError::Rejected(format!("invalid endpoint for {}: {}", kind, e)))
  }

  fn method(operation: MutationOperation) -> Method {
    match operation {
      MutationOperation::Create => Method::POST,
      MutationOperation::Update => Method::PUT,
      MutationOperation::Delete => Method::DELETE,
    }
  }
}

#[async_trait]
impl MutationHandler for HttpMutationHandler {
  async fn apply(&self, mutation: &PendingMutation) -> Result<(), ApplyError> {
    let url = self.endpoint(mutation.kind)?;
    let method = Self::method(mutation.operation);
    debug!("{} {} for mutation {}", method, url, mutation.id);

    let response = self
      .client
      .request(method, url)
      .header("Idempotency-Key", &mutation.id)
      .json(&mutation.payload)
      .send()
      .await
      .map_err(|e| ApplyError::Transport(e.to_string()))?;

    classify(response.status())
  }
}

/// 2xx applies, 4xx is a refusal, everything else is worth retrying.
fn classify(status: StatusCode) -> Result<(), ApplyError> {
  if status.is_success() {
    Ok(())
  } else if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT {
    Err(ApplyError::Rejected(format!("remote answered {}", status)))
  } else {
    Err(ApplyError::Transport(format!("remote answered {}", status)))
  }
}
