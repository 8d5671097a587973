//! # Scan Control API
//!
//! The orchestration core only needs a handful of the daemon's control API
//! endpoints. [`ControlApi`] exposes them as typed operations on top of two
//! primitives, [`ControlApi::call`] and [`ControlApi::fetch`], so that
//! implementations (the [`http`] client, or the in-memory fake used by tests)
//! only deal with transport.
//!
//! Every call answers with a JSON object. A `code` key in that object means
//! the daemon rejected the call; its message is surfaced as
//! [`ApiError::Rejected`].

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub mod http;
pub mod operations;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use http::HttpControlClient;
pub use operations::Operation;

use operations as ops;

/// A decoded control API reply.
pub type Response = serde_json::Map<String, Value>;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const TRUE: &str = "True";
const FALSE: &str = "False";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unable to create control API client: {0}")]
    Client(#[source] BoxError),

    #[error("{operation} request failed: {source}")]
    Transport {
        operation: Operation,
        #[source]
        source: BoxError,
    },

    #[error("{operation} answered with HTTP status {status}")]
    Status { operation: Operation, status: u16 },

    #[error("{operation} answered with something other than a JSON object")]
    Decode { operation: Operation },

    #[error("{operation} failed with error code '{code}'{}", with_message(.message))]
    Rejected {
        operation: Operation,
        code: String,
        message: Option<String>,
    },

    #[error("{operation} answered without a value for key {key}")]
    MissingKey {
        operation: Operation,
        key: &'static str,
    },

    #[error("{operation} value {value:?} for key {key} is not a number")]
    NotANumber {
        operation: Operation,
        key: &'static str,
        value: String,
    },
}

fn with_message(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(" with message '{m}'"),
        None => String::new(),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fails when the daemon flagged the reply with an error `code`.
pub fn check(operation: Operation, response: &Response) -> Result<(), ApiError> {
    if let Some(code) = response.get("code") {
        return Err(ApiError::Rejected {
            operation,
            code: as_text(code),
            message: response.get("message").map(as_text),
        });
    }
    Ok(())
}

pub fn string_result(
    operation: Operation,
    key: &'static str,
    response: &Response,
) -> Result<String, ApiError> {
    check(operation, response)?;
    match response.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ApiError::MissingKey { operation, key }),
    }
}

pub fn int_result(
    operation: Operation,
    key: &'static str,
    response: &Response,
) -> Result<i64, ApiError> {
    let value = string_result(operation, key, response)?;
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::NotANumber { operation, key, value })
}

/// Number of entries in `addedNodes`. Anything but a list counts as zero.
pub fn added_node_count(response: &Response) -> usize {
    match response.get("addedNodes") {
        Some(Value::Array(nodes)) => nodes.len(),
        _ => 0,
    }
}

fn flag(enabled: bool) -> &'static str {
    if enabled { TRUE } else { FALSE }
}

/// Typed access to the daemon's control API.
///
/// Empty parameter values are not sent; the daemon then applies its own default.
#[async_trait]
pub trait ControlApi: Send + Sync {
    /// Performs a JSON operation and returns the decoded object.
    async fn call(
        &self,
        operation: Operation,
        params: &[(&str, &str)],
    ) -> Result<Response, ApiError>;

    /// Performs an operation whose reply is raw bytes.
    async fn fetch(&self, operation: Operation) -> Result<Vec<u8>, ApiError>;

    async fn version(&self) -> Result<String, ApiError> {
        let response = self.call(ops::VERSION, &[]).await?;
        string_result(ops::VERSION, "version", &response)
    }

    /// Creates a context and returns the identifier the daemon assigned to it.
    async fn new_context(&self, context_name: &str) -> Result<String, ApiError> {
        let response = self
            .call(ops::NEW_CONTEXT, &[("contextName", context_name)])
            .await?;
        string_result(ops::NEW_CONTEXT, "contextId", &response)
    }

    async fn include_in_context(&self, context_name: &str, regex: &str) -> Result<(), ApiError> {
        let params = [("contextName", context_name), ("regex", regex)];
        let response = self.call(ops::INCLUDE_IN_CONTEXT, &params).await?;
        check(ops::INCLUDE_IN_CONTEXT, &response)
    }

    async fn exclude_from_context(&self, context_name: &str, regex: &str) -> Result<(), ApiError> {
        let params = [("contextName", context_name), ("regex", regex)];
        let response = self.call(ops::EXCLUDE_FROM_CONTEXT, &params).await?;
        check(ops::EXCLUDE_FROM_CONTEXT, &response)
    }

    async fn export_context(&self, context_name: &str, context_file: &str) -> Result<(), ApiError> {
        let params = [("contextName", context_name), ("contextFile", context_file)];
        let response = self.call(ops::EXPORT_CONTEXT, &params).await?;
        check(ops::EXPORT_CONTEXT, &response)
    }

    async fn import_urls(&self, file_path: &str) -> Result<(), ApiError> {
        let response = self.call(ops::IMPORT_URLS, &[("filePath", file_path)]).await?;
        check(ops::IMPORT_URLS, &response)
    }

    async fn set_authentication_method(
        &self,
        context_id: &str,
        method_name: &str,
        config_params: &str,
    ) -> Result<(), ApiError> {
        let params = [
            ("contextId", context_id),
            ("authMethodName", method_name),
            ("authMethodConfigParams", config_params),
        ];
        let response = self.call(ops::SET_AUTHENTICATION_METHOD, &params).await?;
        check(ops::SET_AUTHENTICATION_METHOD, &response)
    }

    async fn set_logged_in_indicator(&self, context_id: &str, regex: &str) -> Result<(), ApiError> {
        let params = [("contextId", context_id), ("loggedInIndicatorRegex", regex)];
        let response = self.call(ops::SET_LOGGED_IN_INDICATOR, &params).await?;
        check(ops::SET_LOGGED_IN_INDICATOR, &response)
    }

    async fn add_anti_csrf_token(&self, token_name: &str) -> Result<(), ApiError> {
        let response = self
            .call(ops::ADD_ANTI_CSRF_TOKEN, &[("String", token_name)])
            .await?;
        check(ops::ADD_ANTI_CSRF_TOKEN, &response)
    }

    async fn load_script(
        &self,
        script_name: &str,
        script_type: &str,
        engine: &str,
        file_name: &str,
    ) -> Result<(), ApiError> {
        let params = [
            ("scriptName", script_name),
            ("scriptType", script_type),
            ("scriptEngine", engine),
            ("fileName", file_name),
        ];
        let response = self.call(ops::LOAD_SCRIPT, &params).await?;
        check(ops::LOAD_SCRIPT, &response)
    }

    /// Creates a user and returns its daemon-assigned identifier.
    async fn new_user(&self, context_id: &str, name: &str) -> Result<String, ApiError> {
        let params = [("contextId", context_id), ("name", name)];
        let response = self.call(ops::NEW_USER, &params).await?;
        let id = int_result(ops::NEW_USER, "userId", &response)?;
        Ok(id.to_string())
    }

    async fn set_authentication_credentials(
        &self,
        context_id: &str,
        user_id: &str,
        config_params: &str,
    ) -> Result<(), ApiError> {
        let params = [
            ("contextId", context_id),
            ("userId", user_id),
            ("authCredentialsConfigParams", config_params),
        ];
        let response = self.call(ops::SET_AUTHENTICATION_CREDENTIALS, &params).await?;
        check(ops::SET_AUTHENTICATION_CREDENTIALS, &response)
    }

    async fn set_user_enabled(
        &self,
        context_id: &str,
        user_id: &str,
        enabled: bool,
    ) -> Result<(), ApiError> {
        let params = [
            ("contextId", context_id),
            ("userId", user_id),
            ("enabled", flag(enabled)),
        ];
        let response = self.call(ops::SET_USER_ENABLED, &params).await?;
        check(ops::SET_USER_ENABLED, &response)
    }

    async fn set_forced_user_mode_enabled(&self, enabled: bool) -> Result<(), ApiError> {
        let response = self
            .call(ops::SET_FORCED_USER_MODE_ENABLED, &[("boolean", flag(enabled))])
            .await?;
        check(ops::SET_FORCED_USER_MODE_ENABLED, &response)
    }

    async fn set_forced_user(&self, context_id: &str, user_id: &str) -> Result<(), ApiError> {
        let params = [("contextId", context_id), ("userId", user_id)];
        let response = self.call(ops::SET_FORCED_USER, &params).await?;
        check(ops::SET_FORCED_USER, &response)
    }

    /// Starts an anonymous crawl and returns its scan identifier.
    async fn spider_scan(&self, url: &str, context_name: &str) -> Result<String, ApiError> {
        let params = [
            ("url", url),
            ("recurse", TRUE),
            ("contextName", context_name),
            ("subtreeOnly", TRUE),
        ];
        let response = self.call(ops::SPIDER_SCAN, &params).await?;
        string_result(ops::SPIDER_SCAN, "scan", &response)
    }

    async fn spider_scan_as_user(
        &self,
        context_id: &str,
        user_id: &str,
        url: &str,
    ) -> Result<String, ApiError> {
        let params = [
            ("contextId", context_id),
            ("userId", user_id),
            ("url", url),
            ("recurse", TRUE),
            ("subtreeOnly", TRUE),
        ];
        let response = self.call(ops::SPIDER_SCAN_AS_USER, &params).await?;
        string_result(ops::SPIDER_SCAN_AS_USER, "scanAsUser", &response)
    }

    /// Crawl progress in percent.
    async fn spider_status(&self, scan_id: &str) -> Result<i64, ApiError> {
        let response = self.call(ops::SPIDER_STATUS, &[("scanId", scan_id)]).await?;
        int_result(ops::SPIDER_STATUS, "status", &response)
    }

    async fn spider_added_nodes(&self, scan_id: &str) -> Result<usize, ApiError> {
        let response = self
            .call(ops::SPIDER_ADDED_NODES, &[("scanId", scan_id)])
            .await?;
        check(ops::SPIDER_ADDED_NODES, &response)?;
        Ok(added_node_count(&response))
    }

    /// Responses still queued for passive analysis.
    async fn passive_records_to_scan(&self) -> Result<i64, ApiError> {
        let response = self.call(ops::PASSIVE_RECORDS_TO_SCAN, &[]).await?;
        int_result(ops::PASSIVE_RECORDS_TO_SCAN, "recordsToScan", &response)
    }

    async fn active_scan(&self, url: &str, context_id: &str) -> Result<String, ApiError> {
        let params = [
            ("url", url),
            ("recurse", TRUE),
            ("inScopeOnly", TRUE),
            ("contextId", context_id),
        ];
        let response = self.call(ops::ACTIVE_SCAN, &params).await?;
        string_result(ops::ACTIVE_SCAN, "scan", &response)
    }

    async fn active_scan_as_user(
        &self,
        url: &str,
        context_id: &str,
        user_id: &str,
    ) -> Result<String, ApiError> {
        let params = [
            ("url", url),
            ("contextId", context_id),
            ("userId", user_id),
            ("recurse", TRUE),
        ];
        let response = self.call(ops::ACTIVE_SCAN_AS_USER, &params).await?;
        string_result(ops::ACTIVE_SCAN_AS_USER, "scanAsUser", &response)
    }

    /// Active scan progress in percent.
    async fn active_scan_status(&self, scan_id: &str) -> Result<i64, ApiError> {
        let response = self
            .call(ops::ACTIVE_SCAN_STATUS, &[("scanId", scan_id)])
            .await?;
        int_result(ops::ACTIVE_SCAN_STATUS, "status", &response)
    }

    async fn xml_report(&self) -> Result<Vec<u8>, ApiError> {
        self.fetch(ops::XML_REPORT).await
    }
}
