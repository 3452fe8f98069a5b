//! Operation services tying key lookup, state checks, primitives,
//! metrics, and logging together.

pub mod encryption;
pub mod signature;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crypto_service_common::error::Error;
use crypto_service_common::metrics::metrics;
use crypto_service_keys::types::KeyId;

use crate::clients::logging::{LogLevel, LoggingClient};

/// Per-request context attached to every operation: the correlation id
/// from the incoming trace plus the authenticated caller identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationContext {
    pub correlation_id: String,
    pub caller_identity: String,
    pub caller_service: String,
}

impl OperationContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self { correlation_id: correlation_id.into(), ..Default::default() }
    }
}

/// Record a failed operation exactly once: error counter plus one log
/// line at the origin. Returns the error with the correlation id
/// attached; downstream callers must not re-log it.
pub(crate) fn fail(
    logging: Option<&Arc<LoggingClient>>,
    operation: &str,
    key_id: Option<&KeyId>,
    ctx: &OperationContext,
    err: Error,
) -> Error {
    metrics().record_error(err.code);
    let err = if ctx.correlation_id.is_empty() {
        err
    } else {
        err.with_correlation_id(ctx.correlation_id.clone())
    };

    if let Some(client) = logging {
        let mut fields = operation_fields(operation, key_id, ctx, false);
        fields.insert("error_code".to_string(), err.code.as_str().to_string());
        client.log(
            LogLevel::Error,
            format!("{operation} operation failed"),
            Some(ctx.correlation_id.clone()),
            fields,
        );
    } else {
        tracing::error!(
            operation,
            correlation_id = %ctx.correlation_id,
            error = %err.to_log_string(),
            "operation failed"
        );
    }

    err
}

/// Log a completed operation.
pub(crate) fn succeed(
    logging: Option<&Arc<LoggingClient>>,
    operation: &str,
    key_id: Option<&KeyId>,
    ctx: &OperationContext,
) {
    if let Some(client) = logging {
        client.log(
            LogLevel::Info,
            format!("{operation} operation completed"),
            Some(ctx.correlation_id.clone()),
            operation_fields(operation, key_id, ctx, true),
        );
    } else {
        tracing::debug!(operation, correlation_id = %ctx.correlation_id, "operation completed");
    }
}

fn operation_fields(
    operation: &str,
    key_id: Option<&KeyId>,
    ctx: &OperationContext,
    success: bool,
) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    fields.insert("operation".to_string(), operation.to_string());
    if let Some(id) = key_id {
        fields.insert("key_id".to_string(), id.to_string());
    }
    fields.insert("caller_identity".to_string(), ctx.caller_identity.clone());
    fields.insert("caller_service".to_string(), ctx.caller_service.clone());
    fields.insert("success".to_string(), success.to_string());
    fields
}
