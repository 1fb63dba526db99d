use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_lambda::error::{DisplayErrorContext, SdkError};
use aws_sdk_lambda::Client;
use log::*;

use crate::error::FetchError;

/// Source of the raw tags of one resource.
#[async_trait]
pub trait TagSource: Send + Sync {
    async fn fetch_tags(&self, resource: &str) -> Result<HashMap<String, String>, FetchError>;
}

/// Reads function tags through the Lambda `GetFunction` call.
pub struct LambdaTags {
    client: Client,
}

impl LambdaTags {
    /// Builds the one SDK client used for the lifetime of the process.
    /// Credentials and region come from the usual AWS environment
    /// (env vars, shared profiles, IMDS).
    pub async fn connect(endpoint_url: Option<String>) -> Self {
        let sdk_config = aws_config::load_from_env().await;

        let mut builder = aws_sdk_lambda::config::Builder::from(&sdk_config);
        if let Some(url) = endpoint_url {
            info!("Using Lambda endpoint {url}");
            builder = builder.endpoint_url(url);
        }

        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl TagSource for LambdaTags {
    async fn fetch_tags(&self, resource: &str) -> Result<HashMap<String, String>, FetchError> {
        if resource.is_empty() {
            return Err(FetchError::EmptyIdentifier);
        }

        let out = self
            .client
            .get_function()
            .function_name(resource)
            .send()
            .await
            .map_err(|err| {
                let not_found = match &err {
                    SdkError::ServiceError(e) => e.err().is_resource_not_found_exception(),
                    _ => false,
                };

                if not_found {
                    FetchError::NotFound(resource.to_string())
                } else {
                    FetchError::Api {
                        resource: resource.to_string(),
                        message: DisplayErrorContext(&err).to_string(),
                    }
                }
            })?;

        Ok(out.tags().cloned().unwrap_or_default())
    }
}
