// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Handling of traffic the server initiates: requests sent to the client
//! and notifications.
//!
//! Every server request gets an answer so the server never blocks waiting on
//! us. Methods the engine has no use for are refused with `MethodNotFound`.

use lsp_types::{ConfigurationParams, LogMessageParams, ProgressParams};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace, warn};

use super::protocol::{self, Notification, Request, Response};
use super::state::ProgressTracker;

/// Builds the reply to a request the server sent to the client.
#[must_use]
pub fn reply_to(request: &Request) -> Response {
    debug!(
        "Received server request: {} (id: {})",
        request.method, request.id
    );

    let id = request.id.clone();
    match request.method.as_str() {
        "workspace/configuration" => {
            // One entry per requested item; null means "no settings".
            let items = request
                .params
                .clone()
                .and_then(|p| serde_json::from_value::<ConfigurationParams>(p).ok())
                .map_or(0, |p| p.items.len());
            Response::success(id, Value::Array(vec![Value::Null; items]))
        }
        "client/registerCapability"
        | "client/unregisterCapability"
        | "window/workDoneProgress/create" => Response::success(id, Value::Null),
        "workspace/executeClientCommand" => Response::success(id, Value::Array(Vec::new())),
        other => Response::failure(
            id,
            protocol::METHOD_NOT_FOUND,
            format!("Method '{other}' not supported by client"),
        ),
    }
}

/// Routes a server notification to logging or progress tracking.
pub fn handle_notification(notification: &Notification, progress: &Mutex<ProgressTracker>) {
    let params = notification.params.clone().unwrap_or(Value::Null);
    match notification.method.as_str() {
        "$/progress" => match serde_json::from_value::<ProgressParams>(params) {
            Ok(params) => progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .update(&params),
            Err(e) => warn!("Failed to parse $/progress params: {}", e),
        },
        "window/logMessage" | "window/showMessage" => {
            if let Ok(message) = serde_json::from_value::<LogMessageParams>(params) {
                debug!("LSP server message ({:?}): {}", message.typ, message.message);
            }
        }
        _ => {
            trace!(
                "Ignoring notification: {} params={:?}",
                notification.method, notification.params
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::protocol::RequestId;
    use serde_json::json;

    fn request(method: &str, params: Option<Value>) -> Request {
        Request::new(RequestId::Number(4), method, params)
    }

    #[test]
    fn test_configuration_answers_one_null_per_item() {
        let params = json!({ "items": [{ "section": "swift" }, { "section": "sourcekit" }] });
        let reply = reply_to(&request("workspace/configuration", Some(params)));
        assert_eq!(reply.id, Some(RequestId::Number(4)));
        assert_eq!(reply.result, Some(json!([null, null])));
        assert!(reply.error.is_none());
    }

    #[test]
    fn test_registration_acknowledged_with_null() {
        let reply = reply_to(&request(
            "client/registerCapability",
            Some(json!({ "registrations": [] })),
        ));
        assert_eq!(reply.result, Some(Value::Null));
        assert!(reply.error.is_none());

        let reply = reply_to(&request("window/workDoneProgress/create", None));
        assert_eq!(reply.result, Some(Value::Null));
    }

    #[test]
    fn test_unknown_request_is_method_not_found() {
        let reply = reply_to(&request("workspace/applyEdit", None));
        assert!(reply.result.is_none());
        let error = reply.error.as_ref().map(|e| e.code);
        assert_eq!(error, Some(protocol::METHOD_NOT_FOUND));
    }

    #[test]
    fn test_progress_notification_updates_tracker() {
        let tracker = Mutex::new(ProgressTracker::new());
        let begin = Notification::new(
            "$/progress",
            Some(json!({
                "token": "index",
                "value": { "kind": "begin", "title": "Indexing", "percentage": 5 }
            })),
        );
        handle_notification(&begin, &tracker);
        assert!(tracker.lock().unwrap_or_else(PoisonError::into_inner).is_busy());

        let end = Notification::new(
            "$/progress",
            Some(json!({ "token": "index", "value": { "kind": "end" } })),
        );
        handle_notification(&end, &tracker);
        assert!(!tracker.lock().unwrap_or_else(PoisonError::into_inner).is_busy());
    }

    #[test]
    fn test_log_and_unknown_notifications_are_harmless() {
        let tracker = Mutex::new(ProgressTracker::new());
        handle_notification(
            &Notification::new(
                "window/logMessage",
                Some(json!({ "type": 3, "message": "hello" })),
            ),
            &tracker,
        );
        handle_notification(&Notification::new("custom/thing", None), &tracker);
        assert!(!tracker.lock().unwrap_or_else(PoisonError::into_inner).is_busy());
    }
}
