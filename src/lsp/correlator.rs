// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Request/response correlation.
//!
//! Each outgoing request gets a fresh id from a strictly increasing counter
//! and a completion slot in the pending table. The single reader task hands
//! every inbound response to [`Correlator::handle_response`], which resolves
//! exactly the slot with the matching id, in whatever order responses arrive.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::protocol::{self, Message, Notification, Request, RequestId, Response};
use crate::error::{EngineError, Result};

/// How many timed-out or cancelled ids to remember so their late responses
/// can be told apart from genuinely unknown ids.
const RETIRED_CAPACITY: usize = 256;

type WriteAck = oneshot::Sender<std::io::Result<()>>;

/// A frame waiting for the writer task, with an optional completion signal.
struct Outbound {
    frame: Vec<u8>,
    ack: Option<WriteAck>,
}

/// Cooperative cancellation signal for one or more in-flight requests.
#[derive(Debug, Clone)]
pub struct CancelToken(Arc<watch::Sender<bool>>);

impl Default for CancelToken {
    fn default() -> Self {
        Self(Arc::new(watch::channel(false).0))
    }
}

impl CancelToken {
    /// Creates an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels every request waiting on this token.
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    /// Whether [`CancelToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.0.subscribe();
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Deadline for this call instead of the session default.
    pub timeout: Option<Duration>,
    /// Token that cancels this call.
    pub cancel: Option<CancelToken>,
}

impl RequestOptions {
    /// Options with a custom deadline.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            cancel: None,
        }
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Why the correlator stopped accepting requests.
#[derive(Debug, Clone)]
pub enum CloseReason {
    /// The server process died.
    Crashed(Option<String>),
    /// The session was shut down.
    Shutdown,
}

impl CloseReason {
    fn error(&self) -> EngineError {
        match self {
            Self::Crashed(status) => EngineError::ServerCrashed {
                status: status.clone(),
            },
            Self::Shutdown => EngineError::SessionClosed,
        }
    }
}

struct PendingRequest {
    method: String,
    deadline: Instant,
    slot: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct PendingTable {
    entries: HashMap<RequestId, PendingRequest>,
    retired: VecDeque<(RequestId, String)>,
    closed: Option<CloseReason>,
}

impl PendingTable {
    fn retire(&mut self, id: &RequestId) -> Option<PendingRequest> {
        let entry = self.entries.remove(id)?;
        if self.retired.len() == RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back((id.clone(), entry.method.clone()));
        Some(entry)
    }
}

/// Matches responses to outstanding requests and owns the write half of the
/// connection.
pub struct Correlator {
    next_id: AtomicI64,
    outbox: mpsc::UnboundedSender<Outbound>,
    pending: Mutex<PendingTable>,
    default_timeout: Duration,
}

impl Correlator {
    /// Creates a correlator writing frames to `writer`.
    ///
    /// Frames are written in order by a task spawned on the current runtime,
    /// which owns `writer` and stops at the first failed write.
    pub fn new<W>(writer: W, default_timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbox, queue) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(writer, queue));
        Self {
            next_id: AtomicI64::new(1),
            outbox,
            pending: Mutex::new(PendingTable::default()),
            default_timeout,
        }
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.table().entries.len()
    }

    /// Queues one framed message behind everything already queued.
    ///
    /// Returns once the frame is queued, not once it is written, so a server
    /// that stops reading its stdin never blocks the caller.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] if the writer has stopped after a
    /// failed write.
    pub fn post(&self, message: &Message) -> Result<()> {
        self.enqueue(message, None)
    }

    /// Queues a notification (no response expected).
    ///
    /// # Errors
    ///
    /// See [`Correlator::post`].
    pub fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.post(&Message::Notification(Notification::new(method, params)))
    }

    fn enqueue(&self, message: &Message, ack: Option<WriteAck>) -> Result<()> {
        let frame = protocol::encode(message)?;
        trace!("Sending LSP message: {}", String::from_utf8_lossy(&frame));
        self.outbox
            .send(Outbound { frame, ack })
            .map_err(|_| writer_stopped())
    }

    /// Sends a request with default options and waits for its result.
    ///
    /// # Errors
    ///
    /// See [`Correlator::send_with`].
    pub async fn send(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.send_with(method, params, &RequestOptions::default())
            .await
    }

    /// Sends a request and waits for the matching response.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Timeout`] if the deadline passes first.
    /// - [`EngineError::Cancelled`] if the options' token fires first.
    /// - [`EngineError::Server`] if the server answers with an error object.
    /// - [`EngineError::ServerCrashed`] / [`EngineError::SessionClosed`] if the
    ///   connection goes away while waiting, or already has.
    pub async fn send_with(
        &self,
        method: &str,
        params: Option<Value>,
        options: &RequestOptions,
    ) -> Result<Value> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let deadline = Instant::now() + timeout;
        let (id, rx) = self.register(method, deadline)?;
        let mut guard = AbandonGuard {
            correlator: self,
            id: Some(id.clone()),
        };

        let request = Message::Request(Request::new(id.clone(), method, params));
        let (ack, written) = oneshot::channel();
        if let Err(e) = self.enqueue(&request, Some(ack)) {
            self.table().entries.remove(&id);
            guard.disarm();
            return Err(e);
        }

        // The deadline and the token also cover the time spent waiting for
        // the frame to reach the server.
        let exchange = async {
            match written.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(EngineError::Transport(e)),
                Err(_) => return Err(writer_stopped()),
            }
            rx.await.unwrap_or(Err(EngineError::SessionClosed))
        };

        let outcome = tokio::select! {
            received = exchange => {
                if matches!(received, Err(EngineError::Transport(_))) {
                    self.table().entries.remove(&id);
                }
                received
            }
            () = tokio::time::sleep_until(deadline) => {
                self.table().retire(&id);
                Err(EngineError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
            () = wait_cancelled(options.cancel.as_ref()) => {
                self.cancel(&id);
                Err(EngineError::Cancelled {
                    method: method.to_string(),
                    id: id.clone(),
                })
            }
        };

        guard.disarm();
        outcome
    }

    /// Sends a typed request and decodes the typed result.
    ///
    /// # Errors
    ///
    /// See [`Correlator::send_with`]; a result of the wrong shape is a
    /// [`EngineError::Protocol`] error.
    pub async fn request<P, R>(&self, method: &str, params: &P, options: &RequestOptions) -> Result<R>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        let params = serde_json::to_value(params)?;
        let result = self.send_with(method, Some(params), options).await?;
        serde_json::from_value(result)
            .map_err(|e| EngineError::Protocol(format!("unexpected '{method}' result: {e}")))
    }

    fn register(
        &self,
        method: &str,
        deadline: Instant,
    ) -> Result<(RequestId, oneshot::Receiver<Result<Value>>)> {
        let mut table = self.table();
        if let Some(reason) = &table.closed {
            return Err(reason.error());
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = oneshot::channel();
        table.entries.insert(
            id.clone(),
            PendingRequest {
                method: method.to_string(),
                deadline,
                slot: tx,
            },
        );
        Ok((id, rx))
    }

    /// Cancels a pending request: its caller is resolved with
    /// [`EngineError::Cancelled`] and the server is sent `$/cancelRequest`.
    ///
    /// Returns false if no such request is pending.
    pub fn cancel(&self, id: &RequestId) -> bool {
        let Some(entry) = self.table().retire(id) else {
            return false;
        };

        debug!("Cancelling LSP request {} ({})", id, entry.method);
        let _ = entry.slot.send(Err(EngineError::Cancelled {
            method: entry.method,
            id: id.clone(),
        }));

        let params = serde_json::json!({ "id": id });
        if let Err(e) = self.notify("$/cancelRequest", Some(params)) {
            debug!("Failed to send $/cancelRequest for {}: {}", id, e);
        }
        true
    }

    /// Routes a response to the request that is waiting for it.
    ///
    /// Late responses for timed-out or cancelled requests are dropped silently.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Protocol`] when no request with this id was
    /// ever outstanding. The response is discarded; the caller decides how
    /// loudly to report it.
    pub fn handle_response(&self, response: Response) -> Result<()> {
        let Some(id) = response.id else {
            let message = response.error.map(|e| e.message).unwrap_or_default();
            return Err(EngineError::Protocol(format!(
                "response without id: {message}"
            )));
        };

        let entry = {
            let mut table = self.table();
            match table.entries.remove(&id) {
                Some(entry) => entry,
                None => {
                    if let Some(pos) = table.retired.iter().position(|(r, _)| r == &id) {
                        if let Some((_, method)) = table.retired.remove(pos) {
                            debug!("Discarding late response for {} ({})", id, method);
                        }
                        return Ok(());
                    }
                    return Err(EngineError::Protocol(format!(
                        "response for unknown request id {id}"
                    )));
                }
            }
        };

        let outcome = match response.error {
            Some(error) if error.code == protocol::REQUEST_CANCELLED => {
                Err(EngineError::Cancelled {
                    method: entry.method.clone(),
                    id: id.clone(),
                })
            }
            Some(error) => Err(EngineError::Server {
                code: error.code,
                message: error.message,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        trace!(
            "Response for {} ({}) with {:?} to spare",
            id,
            entry.method,
            entry.deadline.saturating_duration_since(Instant::now())
        );
        if entry.slot.send(outcome).is_err() {
            debug!("Caller for {} ({}) went away", id, entry.method);
        }
        Ok(())
    }

    /// Fails every pending request with `reason` but keeps accepting new
    /// ones. Returns the number of requests that were failed.
    pub fn fail_pending(&self, reason: &CloseReason) -> usize {
        let drained: Vec<(RequestId, PendingRequest)> = {
            let mut table = self.table();
            let ids: Vec<RequestId> = table.entries.keys().cloned().collect();
            ids.iter()
                .filter_map(|id| table.retire(id).map(|entry| (id.clone(), entry)))
                .collect()
        };
        Self::fail(drained, reason)
    }

    /// Stops accepting requests and fails everything pending.
    ///
    /// Returns the number of requests that were failed. Only the first call
    /// has an effect.
    pub fn close(&self, reason: CloseReason) -> usize {
        let drained: Vec<(RequestId, PendingRequest)> = {
            let mut table = self.table();
            if table.closed.is_some() {
                return 0;
            }
            table.closed = Some(reason.clone());
            table.retired.clear();
            table.entries.drain().collect()
        };
        Self::fail(drained, &reason)
    }

    /// Whether [`Correlator::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.table().closed.is_some()
    }

    fn fail(drained: Vec<(RequestId, PendingRequest)>, reason: &CloseReason) -> usize {
        let count = drained.len();
        for (id, entry) in drained {
            debug!("Failing pending request {} ({}): {:?}", id, entry.method, reason);
            let _ = entry.slot.send(Err(reason.error()));
        }
        count
    }
}

/// Drops the pending entry if the waiting future is dropped mid-flight.
struct AbandonGuard<'a> {
    correlator: &'a Correlator,
    id: Option<RequestId>,
}

impl AbandonGuard<'_> {
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take()
            && let Some(entry) = self.correlator.table().retire(&id)
        {
            debug!("Request {} ({}) abandoned by caller", id, entry.method);
        }
    }
}

/// Drains the outbox into the server's stdin.
async fn write_loop<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<Outbound>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(Outbound { frame, ack }) = queue.recv().await {
        let result = match writer.write_all(&frame).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        let failed = result.is_err();
        match (ack, result) {
            (Some(ack), result) => {
                let _ = ack.send(result);
            }
            (None, Err(e)) => warn!("Failed to write to language server: {}", e),
            (None, Ok(())) => {}
        }
        if failed {
            break;
        }
    }
    debug!("LSP writer stopped");
}

fn writer_stopped() -> EngineError {
    EngineError::Transport(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "language server stdin is closed",
    ))
}

async fn wait_cancelled(token: Option<&CancelToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Tests use unwrap/panic for clear failure messages"
)]
mod tests {
    use super::*;
    use crate::lsp::protocol::{DEFAULT_MAX_FRAME_BYTES, MessageReader};
    use serde_json::json;
    use tokio::io::DuplexStream;

    fn harness() -> (Arc<Correlator>, MessageReader<DuplexStream>) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let correlator = Arc::new(Correlator::new(client, Duration::from_secs(5)));
        (
            correlator,
            MessageReader::new(server, DEFAULT_MAX_FRAME_BYTES),
        )
    }

    async fn next_request(wire: &mut MessageReader<DuplexStream>) -> Request {
        match wire.next_message().await.unwrap() {
            Some(Message::Request(request)) => request,
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_responses_reach_their_callers() {
        let (correlator, mut wire) = harness();

        let mut callers = Vec::new();
        for method in ["a", "b", "c"] {
            let c = correlator.clone();
            callers.push(tokio::spawn(async move { c.send(method, None).await }));
        }

        let mut requests = Vec::new();
        for _ in 0..3 {
            requests.push(next_request(&mut wire).await);
        }

        let mut ids: Vec<_> = requests.iter().map(|r| r.id.clone()).collect();
        ids.sort_by_key(ToString::to_string);
        ids.dedup();
        assert_eq!(ids.len(), 3, "ids must be unique");

        for request in requests.iter().rev() {
            correlator
                .handle_response(Response::success(
                    request.id.clone(),
                    json!({ "echo": request.method }),
                ))
                .unwrap();
        }

        for (caller, method) in callers.into_iter().zip(["a", "b", "c"]) {
            let result = caller.await.unwrap().unwrap();
            assert_eq!(result, json!({ "echo": method }));
        }
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_strictly_increase() {
        let (correlator, mut wire) = harness();
        let c = correlator.clone();
        let sender = tokio::spawn(async move {
            for _ in 0..3 {
                let _ = c.send_with("x", None, &RequestOptions::timeout(Duration::from_millis(1))).await;
            }
        });

        let mut last = 0;
        for _ in 0..3 {
            let RequestId::Number(n) = next_request(&mut wire).await.id else {
                panic!("client ids are numeric");
            };
            assert!(n > last);
            last = n;
        }
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_timeout_then_late_response_is_discarded() {
        let (correlator, mut wire) = harness();
        let started = std::time::Instant::now();

        let c = correlator.clone();
        let caller = tokio::spawn(async move {
            c.send_with(
                "textDocument/hover",
                None,
                &RequestOptions::timeout(Duration::from_millis(50)),
            )
            .await
        });
        let request = next_request(&mut wire).await;

        let result = caller.await.unwrap();
        assert!(matches!(result, Err(EngineError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(correlator.pending_count(), 0);

        let late = Response::success(request.id, json!("too late"));
        assert!(correlator.handle_response(late).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_id_is_protocol_error() {
        let (correlator, _wire) = harness();
        let stray = Response::success(RequestId::Number(999), json!({}));
        assert!(matches!(
            correlator.handle_response(stray),
            Err(EngineError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_response_is_protocol_error() {
        let (correlator, mut wire) = harness();
        let c = correlator.clone();
        let caller = tokio::spawn(async move { c.send("m", None).await });
        let request = next_request(&mut wire).await;

        let response = Response::success(request.id, json!(1));
        correlator.handle_response(response.clone()).unwrap();
        assert_eq!(caller.await.unwrap().unwrap(), json!(1));
        assert!(matches!(
            correlator.handle_response(response),
            Err(EngineError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_token_sends_cancel_request() {
        let (correlator, mut wire) = harness();
        let token = CancelToken::new();

        let c = correlator.clone();
        let options = RequestOptions::default().with_cancel(token.clone());
        let caller = tokio::spawn(async move { c.send_with("slow", None, &options).await });
        let request = next_request(&mut wire).await;

        token.cancel();
        let result = caller.await.unwrap();
        assert!(matches!(result, Err(EngineError::Cancelled { ref id, .. }) if *id == request.id));

        let Some(Message::Notification(cancel)) = wire.next_message().await.unwrap() else {
            panic!("expected $/cancelRequest");
        };
        assert_eq!(cancel.method, "$/cancelRequest");
        assert_eq!(cancel.params, Some(json!({ "id": request.id })));

        let late = Response::success(request.id, Value::Null);
        assert!(correlator.handle_response(late).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_only_affects_one_request() {
        let (correlator, mut wire) = harness();

        let c1 = correlator.clone();
        let first = tokio::spawn(async move { c1.send("first", None).await });
        let first_req = next_request(&mut wire).await;
        let c2 = correlator.clone();
        let second = tokio::spawn(async move { c2.send("second", None).await });
        let second_req = next_request(&mut wire).await;

        assert!(correlator.cancel(&first_req.id));
        assert!(!correlator.cancel(&first_req.id));
        correlator
            .handle_response(Response::success(second_req.id, json!("ok")))
            .unwrap();

        assert!(matches!(
            first.await.unwrap(),
            Err(EngineError::Cancelled { .. })
        ));
        assert_eq!(second.await.unwrap().unwrap(), json!("ok"));
    }

    #[tokio::test]
    async fn test_close_fails_all_pending() {
        let (correlator, mut wire) = harness();

        let mut callers = Vec::new();
        for _ in 0..3 {
            let c = correlator.clone();
            callers.push(tokio::spawn(async move { c.send("hang", None).await }));
            next_request(&mut wire).await;
        }

        let failed = correlator.close(CloseReason::Crashed(Some("exit status: 1".to_string())));
        assert_eq!(failed, 3);
        for caller in callers {
            assert!(matches!(
                caller.await.unwrap(),
                Err(EngineError::ServerCrashed { .. })
            ));
        }

        assert!(matches!(
            correlator.send("after", None).await,
            Err(EngineError::ServerCrashed { .. })
        ));
        assert_eq!(correlator.close(CloseReason::Shutdown), 0);
        assert!(correlator.is_closed());
    }

    #[tokio::test]
    async fn test_fail_pending_keeps_accepting() {
        let (correlator, mut wire) = harness();
        let c = correlator.clone();
        let caller = tokio::spawn(async move { c.send("hang", None).await });
        next_request(&mut wire).await;

        assert_eq!(correlator.fail_pending(&CloseReason::Shutdown), 1);
        assert!(matches!(
            caller.await.unwrap(),
            Err(EngineError::SessionClosed)
        ));
        assert!(!correlator.is_closed());

        let c = correlator.clone();
        let next = tokio::spawn(async move { c.send("shutdown", None).await });
        let request = next_request(&mut wire).await;
        assert_eq!(request.method, "shutdown");
        correlator
            .handle_response(Response::success(request.id, Value::Null))
            .unwrap();
        assert_eq!(next.await.unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_server_error_is_typed() {
        let (correlator, mut wire) = harness();
        let c = correlator.clone();
        let caller = tokio::spawn(async move { c.send("boom", None).await });
        let request = next_request(&mut wire).await;

        correlator
            .handle_response(Response::failure(request.id, protocol::INTERNAL_ERROR, "nope"))
            .unwrap();
        let Err(EngineError::Server { code, message }) = caller.await.unwrap() else {
            panic!("expected server error");
        };
        assert_eq!(code, protocol::INTERNAL_ERROR);
        assert_eq!(message, "nope");
    }

    #[tokio::test]
    async fn test_server_side_cancellation_is_cancelled() {
        let (correlator, mut wire) = harness();
        let c = correlator.clone();
        let caller = tokio::spawn(async move { c.send("textDocument/hover", None).await });
        let request = next_request(&mut wire).await;

        correlator
            .handle_response(Response::failure(
                request.id.clone(),
                protocol::REQUEST_CANCELLED,
                "content modified",
            ))
            .unwrap();
        let Err(EngineError::Cancelled { method, id }) = caller.await.unwrap() else {
            panic!("expected cancellation");
        };
        assert_eq!(method, "textDocument/hover");
        assert_eq!(id, request.id);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_caller_releases_entry() {
        let (correlator, mut wire) = harness();
        let c = correlator.clone();
        let caller = tokio::spawn(async move {
            tokio::time::timeout(Duration::from_millis(20), c.send("dropped", None)).await
        });
        let request = next_request(&mut wire).await;

        assert!(caller.await.unwrap().is_err());
        assert_eq!(correlator.pending_count(), 0);
        assert!(
            correlator
                .handle_response(Response::success(request.id, Value::Null))
                .is_ok()
        );
    }

    /// A server that never reads its stdin: the pipe fills and stays full.
    fn stalled_harness() -> (Arc<Correlator>, DuplexStream) {
        let (client, server) = tokio::io::duplex(1024);
        (
            Arc::new(Correlator::new(client, Duration::from_secs(5))),
            server,
        )
    }

    fn large_params() -> Option<Value> {
        Some(json!({ "text": "x".repeat(8 * 1024) }))
    }

    #[tokio::test]
    async fn test_deadline_covers_a_blocked_write() {
        let (correlator, _server) = stalled_harness();

        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            correlator.send_with(
                "textDocument/hover",
                large_params(),
                &RequestOptions::timeout(Duration::from_millis(50)),
            ),
        )
        .await
        .expect("deadline must fire while the write is stuck");

        let Err(EngineError::Timeout { method, .. }) = outcome else {
            panic!("expected timeout, got {outcome:?}");
        };
        assert_eq!(method, "textDocument/hover");
        assert_eq!(correlator.pending_count(), 0);

        // Queuing more frames still returns immediately.
        correlator.notify("$/cancelRequest", Some(json!({ "id": 1 }))).unwrap();
    }

    #[tokio::test]
    async fn test_cancel_token_covers_a_blocked_write() {
        let (correlator, _server) = stalled_harness();
        let token = CancelToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let options = RequestOptions::timeout(Duration::from_secs(30)).with_cancel(token);
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            correlator.send_with("textDocument/hover", large_params(), &options),
        )
        .await
        .expect("cancellation must win while the write is stuck");

        assert!(matches!(outcome, Err(EngineError::Cancelled { .. })));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_pipe_is_a_transport_error() {
        let (client, server) = tokio::io::duplex(1024);
        drop(server);
        let correlator = Correlator::new(client, Duration::from_secs(5));

        let outcome = correlator.send("initialize", None).await;
        assert!(matches!(outcome, Err(EngineError::Transport(_))));
        assert_eq!(correlator.pending_count(), 0);

        // The writer has stopped; later frames fail fast.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(
            correlator.notify("exit", None),
            Err(EngineError::Transport(_))
        ));
    }
}
