// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A configurable mock LSP server for testing.
//!
//! Speaks the LSP protocol over stdin/stdout using Content-Length framed
//! JSON-RPC. CLI flags control capabilities, timing, and failure modes.
//! No tokio; `std::thread` handles delayed responses and notifications.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mock LSP server for integration testing.
#[derive(Parser, Debug)]
#[command(name = "mockls")]
struct Args {
    /// Do not advertise this feature (repeatable): definition, hover,
    /// document-symbols, rename, workspace-symbols.
    #[arg(long)]
    disable: Vec<String>,

    /// Answer METHOD after MS milliseconds, from another thread (repeatable).
    #[arg(long, value_name = "METHOD=MS", value_parser = parse_delay)]
    delay_on: Vec<(String, u64)>,

    /// Never respond to this method (repeatable).
    #[arg(long)]
    hang_on: Vec<String>,

    /// Return `InternalError` for this method (repeatable).
    #[arg(long)]
    fail_on: Vec<String>,

    /// Exit after n responses (simulate crash).
    #[arg(long)]
    drop_after: Option<u64>,

    /// Exit with status 1 this many milliseconds after `initialized`.
    #[arg(long)]
    crash_after: Option<u64>,

    /// Append the method of every inbound message to this file.
    #[arg(long)]
    record: Option<PathBuf>,

    /// Emit progress begin/end after initialized (milliseconds).
    #[arg(long, default_value_t = 0)]
    indexing_delay: u64,

    /// Send workspace/configuration request after initialize.
    #[arg(long)]
    send_configuration_request: bool,

    /// Stop reading stdin after `initialized`, so the client's pipe fills up.
    #[arg(long)]
    stop_reading: bool,
}

fn parse_delay(s: &str) -> Result<(String, u64), String> {
    let (method, ms) = s
        .split_once('=')
        .ok_or_else(|| format!("expected METHOD=MS, got '{s}'"))?;
    let ms = ms.parse().map_err(|e| format!("invalid delay '{ms}': {e}"))?;
    Ok((method.to_string(), ms))
}

/// Any inbound JSON-RPC message.
#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<Value>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
}

/// A JSON-RPC response.
#[derive(Debug, Serialize)]
struct Response {
    jsonrpc: String,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl Response {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError { code, message }),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// Thread-safe writer handle. Wraps `std::io::Stdout` for production,
/// or a shared `Vec<u8>` for tests.
type Writer = Arc<Mutex<Box<dyn Write + Send>>>;

/// Create a writer that forwards to stdout.
fn stdout_writer() -> Writer {
    Arc::new(Mutex::new(Box::new(std::io::stdout())))
}

#[cfg(test)]
fn buffer_writer() -> (Writer, Arc<Mutex<Vec<u8>>>) {
    let buf = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer: Box<dyn Write + Send> = Box::new(SharedVecWriter(buf.clone()));
    (Arc::new(Mutex::new(writer)), buf)
}

/// Write adapter for `Arc<Mutex<Vec<u8>>>` used in tests.
#[cfg(test)]
struct SharedVecWriter(Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl Write for SharedVecWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Shared state for the mock server.
struct MockServer {
    args: Args,
    documents: HashMap<String, String>,
    response_count: u64,
    writer: Writer,
    record: Option<File>,
    next_request_id: Arc<AtomicU64>,
}

impl MockServer {
    fn new(args: Args, writer: Writer) -> Self {
        let record = args.record.as_ref().and_then(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        Self {
            args,
            documents: HashMap::new(),
            response_count: 0,
            writer,
            record,
            next_request_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Run the server, reading from the given reader.
    fn run(&mut self, reader: &mut dyn Read) {
        let mut buffer = Vec::new();
        let mut temp = [0u8; 4096];

        loop {
            match reader.read(&mut temp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer.extend_from_slice(&temp[..n]),
            }

            while let Some((message, consumed)) = try_parse_message(&buffer) {
                buffer.drain(..consumed);

                let Ok(incoming) = serde_json::from_str::<Incoming>(&message) else {
                    continue;
                };

                self.handle_message(incoming);
            }
        }
    }

    fn record(&mut self, line: &str) {
        if let Some(file) = self.record.as_mut() {
            let _ = writeln!(file, "{line}");
            let _ = file.flush();
        }
    }

    fn handle_message(&mut self, incoming: Incoming) {
        let Some(method) = incoming.method.clone() else {
            // A response to one of our own requests.
            let id = incoming.id.unwrap_or(Value::Null);
            let result = incoming.result.unwrap_or(Value::Null);
            self.record(&format!("response:{id} {result}"));
            return;
        };

        self.record(&method);
        if let Some(id) = incoming.id {
            self.handle_request(&method, id, &incoming.params);
        } else {
            self.handle_notification(&method, &incoming.params);
        }
    }

    fn is_disabled(&self, feature: &str) -> bool {
        self.args.disable.iter().any(|d| d == feature)
    }

    fn handle_request(&mut self, method: &str, id: Value, params: &Value) {
        // hang_on: never respond
        if self.args.hang_on.iter().any(|m| m == method) {
            return;
        }

        // fail_on: return `InternalError`
        if self.args.fail_on.iter().any(|m| m == method) {
            self.send_response(&Response::failure(
                id,
                -32603,
                format!("mockls: configured to fail on {method}"),
            ));
            return;
        }

        let result = match method {
            "initialize" => Some(self.handle_initialize()),
            "shutdown" => None,
            "textDocument/hover" => self.handle_hover(params),
            "textDocument/definition" => self.handle_definition(params),
            "textDocument/documentSymbol" => self.handle_document_symbols(params),
            "textDocument/rename" => self.handle_rename(params),
            "workspace/symbol" => Some(self.handle_workspace_symbols(params)),
            _ => {
                self.send_response(&Response::failure(
                    id,
                    -32601,
                    format!("mockls: method not found: {method}"),
                ));
                return;
            }
        };

        // "No result" is an explicit null, never an absent field.
        let response = Response::success(id, result.unwrap_or(Value::Null));

        let delay = self
            .args
            .delay_on
            .iter()
            .find(|(m, _)| m == method)
            .map(|(_, ms)| *ms);
        if let Some(ms) = delay {
            let writer = self.writer.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(ms));
                if let Ok(json) = serde_json::to_string(&response) {
                    write_framed(&writer, &json);
                }
            });
        } else {
            self.send_response(&response);
        }

        if method == "initialize" && self.args.send_configuration_request {
            self.send_configuration_request();
        }
    }

    fn handle_notification(&mut self, method: &str, params: &Value) {
        match method {
            "initialized" => {
                if self.args.indexing_delay > 0 {
                    self.start_indexing_simulation();
                }
                if let Some(ms) = self.args.crash_after {
                    std::thread::spawn(move || {
                        std::thread::sleep(Duration::from_millis(ms));
                        std::process::exit(1);
                    });
                }
                if self.args.stop_reading {
                    loop {
                        std::thread::park();
                    }
                }
            }
            "textDocument/didOpen" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    let text = td.get("text").and_then(Value::as_str).unwrap_or_default();
                    self.documents.insert(uri.to_string(), text.to_string());
                }
            }
            "textDocument/didChange" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    if let Some(text) = params
                        .get("contentChanges")
                        .and_then(Value::as_array)
                        .and_then(|arr| arr.last())
                        .and_then(|c| c.get("text"))
                        .and_then(Value::as_str)
                    {
                        self.documents.insert(uri.to_string(), text.to_string());
                    }
                }
            }
            "textDocument/didClose" => {
                if let Some(td) = params.get("textDocument") {
                    let uri = td.get("uri").and_then(Value::as_str).unwrap_or_default();
                    self.documents.remove(uri);
                }
            }
            "exit" => std::process::exit(0),
            // $/cancelRequest and all others are silently accepted
            _ => {}
        }
    }

    fn handle_initialize(&self) -> Value {
        serde_json::json!({
            "capabilities": {
                "hoverProvider": !self.is_disabled("hover"),
                "definitionProvider": !self.is_disabled("definition"),
                "documentSymbolProvider": !self.is_disabled("document-symbols"),
                "renameProvider": !self.is_disabled("rename"),
                "workspaceSymbolProvider": !self.is_disabled("workspace-symbols"),
                "positionEncoding": "utf-16",
                "textDocumentSync": {
                    "openClose": true,
                    "change": 1
                }
            },
            "serverInfo": { "name": "mockls", "version": env!("CARGO_PKG_VERSION") }
        })
    }

    fn handle_hover(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        Some(serde_json::json!({
            "contents": {
                "kind": "markdown",
                "value": format!("```swift\n{word}\n```")
            }
        }))
    }

    fn handle_definition(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        for symbol in extract_symbols(content) {
            if symbol["name"] == word.as_str() {
                return Some(serde_json::json!({
                    "uri": uri,
                    "range": symbol["selectionRange"]
                }));
            }
        }

        // Fall back to first occurrence
        for (line_idx, line_text) in content.lines().enumerate() {
            if let Some(col_idx) = find_word(line_text, &word, 0) {
                return Some(location_json(uri, line_idx, col_idx, col_idx + word.len()));
            }
        }

        None
    }

    fn handle_rename(&self, params: &Value) -> Option<Value> {
        let (uri, line, col) = extract_position(params)?;
        let new_name = params.get("newName").and_then(Value::as_str)?;
        let content = self.documents.get(uri)?;
        let word = extract_word(content, line, col)?;

        let mut edits = Vec::new();
        for (line_idx, line_text) in content.lines().enumerate() {
            let mut start = 0;
            while let Some(col_idx) = find_word(line_text, &word, start) {
                let mut edit = location_json(uri, line_idx, col_idx, col_idx + word.len());
                if let Some(obj) = edit.as_object_mut() {
                    obj.remove("uri");
                    obj.insert("newText".to_string(), Value::String(new_name.to_string()));
                }
                edits.push(edit);
                start = col_idx + word.len();
            }
        }

        Some(serde_json::json!({ "changes": { uri: edits } }))
    }

    fn handle_document_symbols(&self, params: &Value) -> Option<Value> {
        let uri = params
            .get("textDocument")
            .and_then(|td| td.get("uri"))
            .and_then(Value::as_str)?;

        let content = self.documents.get(uri)?;
        Some(Value::Array(extract_symbols(content)))
    }

    fn handle_workspace_symbols(&self, params: &Value) -> Value {
        let query = params.get("query").and_then(Value::as_str).unwrap_or("");

        let mut all_symbols = Vec::new();
        for (uri, content) in &self.documents {
            for mut sym in extract_symbols(content) {
                let matches = sym
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|n| query.is_empty() || n.contains(query));

                if matches && let Some(range) = sym.get("range").cloned() {
                    if let Some(obj) = sym.as_object_mut() {
                        obj.insert(
                            "location".to_string(),
                            serde_json::json!({ "uri": uri, "range": range }),
                        );
                        obj.remove("range");
                        obj.remove("selectionRange");
                    }
                    all_symbols.push(sym);
                }
            }
        }

        Value::Array(all_symbols)
    }

    fn start_indexing_simulation(&self) {
        let delay = self.args.indexing_delay;
        let writer = self.writer.clone();
        let next_id = self.next_request_id.clone();

        std::thread::spawn(move || {
            let token = "mockls-indexing";

            let req_id = next_id.fetch_add(1, Ordering::SeqCst);
            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": req_id,
                    "method": "window/workDoneProgress/create",
                    "params": { "token": token }
                }),
            );

            std::thread::sleep(Duration::from_millis(50));

            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "$/progress",
                    "params": {
                        "token": token,
                        "value": { "kind": "begin", "title": "Indexing", "percentage": 0 }
                    }
                }),
            );

            std::thread::sleep(Duration::from_millis(delay));

            send_message(
                &writer,
                &serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "$/progress",
                    "params": {
                        "token": token,
                        "value": { "kind": "end", "message": "Indexing complete" }
                    }
                }),
            );
        });
    }

    fn send_configuration_request(&self) {
        let req_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        send_message(
            &self.writer,
            &serde_json::json!({
                "jsonrpc": "2.0",
                "id": req_id,
                "method": "workspace/configuration",
                "params": { "items": [{ "section": "mockls" }] }
            }),
        );
    }

    fn send_response(&mut self, response: &Response) {
        let Ok(json) = serde_json::to_string(response) else {
            return;
        };

        write_framed(&self.writer, &json);

        self.response_count += 1;

        if let Some(max) = self.args.drop_after
            && self.response_count >= max
        {
            std::process::exit(1);
        }
    }
}

/// Extract `(uri, line, col)` from a `textDocument/position` params object.
fn extract_position(params: &Value) -> Option<(&str, usize, usize)> {
    let uri = params
        .get("textDocument")
        .and_then(|td| td.get("uri"))
        .and_then(Value::as_str)?;
    let line = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("line"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    let col = usize::try_from(
        params
            .get("position")
            .and_then(|p| p.get("character"))
            .and_then(Value::as_u64)?,
    )
    .ok()?;
    Some((uri, line, col))
}

/// Build a JSON `Location` object.
fn location_json(uri: &str, line: usize, start: usize, end: usize) -> Value {
    serde_json::json!({
        "uri": uri,
        "range": {
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        }
    })
}

/// Write a Content-Length framed JSON string.
fn write_framed(writer: &Writer, json: &str) {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    let Ok(mut w) = writer.lock() else { return };
    let _ = w.write_all(header.as_bytes());
    let _ = w.write_all(json.as_bytes());
    let _ = w.flush();
}

/// Send a JSON-RPC message to the client.
fn send_message(writer: &Writer, value: &Value) {
    let Ok(json) = serde_json::to_string(value) else {
        return;
    };
    write_framed(writer, &json);
}

/// Parse a Content-Length framed message from a buffer.
/// Returns the message string and the number of bytes consumed.
fn try_parse_message(buffer: &[u8]) -> Option<(String, usize)> {
    let header_end = buffer.windows(4).position(|w| w == b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&buffer[..header_end]).ok()?;

    let mut content_length: Option<usize> = None;
    for line in headers.lines() {
        if line.to_ascii_lowercase().starts_with("content-length:") {
            content_length = line
                .split_once(':')
                .and_then(|(_, v)| v.trim().parse().ok());
        }
    }

    let content_length = content_length?;
    let total = header_end + 4 + content_length;

    if buffer.len() < total {
        return None;
    }

    let body = std::str::from_utf8(&buffer[header_end + 4..total]).ok()?;
    Some((body.to_string(), total))
}

/// Extract the word at a given line and column from content.
fn extract_word(content: &str, line: usize, col: usize) -> Option<String> {
    let line_text = content.lines().nth(line)?;

    if col >= line_text.len() {
        return None;
    }

    let bytes = line_text.as_bytes();

    let start = (0..=col)
        .rev()
        .find(|&i| !is_word_char(bytes[i]))
        .map_or(0, |i| i + 1);

    let end = (col..bytes.len())
        .find(|&i| !is_word_char(bytes[i]))
        .unwrap_or(bytes.len());

    if start >= end {
        return None;
    }

    Some(line_text[start..end].to_string())
}

/// Find `word` in `line` at or after `from`, on word boundaries.
fn find_word(line: &str, word: &str, from: usize) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut start = from;
    while let Some(pos) = line.get(start..)?.find(word) {
        let idx = start + pos;
        let end = idx + word.len();
        let before_ok = idx == 0 || !is_word_char(bytes[idx - 1]);
        let after_ok = end >= bytes.len() || !is_word_char(bytes[end]);
        if before_ok && after_ok {
            return Some(idx);
        }
        start = end;
    }
    None
}

const fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Declaration keywords and the LSP `SymbolKind` they produce.
const DECLARATIONS: &[(&str, u32)] = &[
    ("func ", 12),
    ("fn ", 12),
    ("struct ", 23),
    ("class ", 5),
    ("enum ", 10),
    ("protocol ", 11),
    ("let ", 14),
    ("var ", 13),
];

/// Extract symbol definitions from content.
fn extract_symbols(content: &str) -> Vec<Value> {
    let mut symbols = Vec::new();

    for (line_idx, line_text) in content.lines().enumerate() {
        let trimmed = line_text.trim_start();
        let Some((keyword, kind_num)) = DECLARATIONS
            .iter()
            .find(|(keyword, _)| trimmed.starts_with(keyword))
        else {
            continue;
        };
        let prefix_len = keyword.len();

        let after_keyword = &trimmed[prefix_len..];
        let name: String = after_keyword
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .collect();

        if name.is_empty() {
            continue;
        }

        let indent = line_text.len() - trimmed.len();
        let col_start = indent + prefix_len;

        symbols.push(serde_json::json!({
            "name": name,
            "kind": kind_num,
            "range": {
                "start": { "line": line_idx, "character": indent },
                "end": { "line": line_idx, "character": line_text.len() }
            },
            "selectionRange": {
                "start": { "line": line_idx, "character": col_start },
                "end": { "line": line_idx, "character": col_start + name.len() }
            }
        }));
    }

    symbols
}

fn main() {
    let args = Args::parse();
    let writer = stdout_writer();
    let mut server = MockServer::new(args, writer);
    let mut stdin = std::io::stdin().lock();
    server.run(&mut stdin);
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    reason = "Tests use expect/unwrap for clear failure messages"
)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn default_args() -> Args {
        Args {
            disable: vec![],
            delay_on: vec![],
            hang_on: vec![],
            fail_on: vec![],
            drop_after: None,
            crash_after: None,
            record: None,
            indexing_delay: 0,
            send_configuration_request: false,
            stop_reading: false,
        }
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{}", body.len(), body).into_bytes()
    }

    fn extract_messages(data: &[u8]) -> Vec<Value> {
        let mut messages = Vec::new();
        let mut buf = data.to_vec();
        while let Some((msg, consumed)) = try_parse_message(&buf) {
            if let Ok(v) = serde_json::from_str::<Value>(&msg) {
                messages.push(v);
            }
            buf.drain(..consumed);
        }
        messages
    }

    fn run_server_wait(args: Args, input: &[u8], wait_ms: u64) -> Vec<Value> {
        let (writer, buf) = buffer_writer();
        let mut server = MockServer::new(args, writer);
        let mut reader = Cursor::new(input.to_vec());
        server.run(&mut reader);
        std::thread::sleep(Duration::from_millis(wait_ms));
        let data = buf
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        extract_messages(&data)
    }

    fn run_server_with(args: Args, input: &[u8]) -> Vec<Value> {
        run_server_wait(args, input, 0)
    }

    fn response_to(messages: &[Value], id: u64) -> &Value {
        messages
            .iter()
            .find(|m| m.get("id").and_then(Value::as_u64) == Some(id) && m.get("method").is_none())
            .expect("response with matching id")
    }

    fn request(id: u64, method: &str, params: &Value) -> Vec<u8> {
        frame(
            &serde_json::json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
                .to_string(),
        )
    }

    fn notification(method: &str, params: &Value) -> Vec<u8> {
        frame(&serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": params }).to_string())
    }

    fn initialize(id: u64) -> Vec<u8> {
        request(
            id,
            "initialize",
            &serde_json::json!({ "processId": null, "capabilities": {} }),
        )
    }

    fn did_open(uri: &str, text: &str) -> Vec<u8> {
        notification(
            "textDocument/didOpen",
            &serde_json::json!({
                "textDocument": { "uri": uri, "languageId": "swift", "version": 1, "text": text }
            }),
        )
    }

    fn position(uri: &str, line: u64, character: u64) -> Value {
        serde_json::json!({
            "textDocument": { "uri": uri },
            "position": { "line": line, "character": character }
        })
    }

    const URI: &str = "file:///tmp/greeter.swift";
    const SOURCE: &str =
        "struct Greeter {\n    func greet() -> String {\n        return greet_name\n    }\n}\n";

    #[test]
    fn test_initialize_advertises_features() {
        let messages = run_server_with(default_args(), &initialize(1));
        let caps = &response_to(&messages, 1)["result"]["capabilities"];
        assert_eq!(caps["hoverProvider"], true);
        assert_eq!(caps["definitionProvider"], true);
        assert_eq!(caps["documentSymbolProvider"], true);
        assert_eq!(caps["renameProvider"], true);
        assert_eq!(caps["workspaceSymbolProvider"], true);
    }

    #[test]
    fn test_disable_feature() {
        let mut args = default_args();
        args.disable = vec!["rename".to_string()];
        let messages = run_server_with(args, &initialize(1));
        let caps = &response_to(&messages, 1)["result"]["capabilities"];
        assert_eq!(caps["renameProvider"], false);
        assert_eq!(caps["hoverProvider"], true);
    }

    #[test]
    fn test_no_result_is_explicit_null() {
        let mut input = initialize(1);
        input.extend(request(2, "textDocument/hover", &position("file:///nope", 0, 0)));
        input.extend(request(3, "shutdown", &Value::Null));

        let messages = run_server_with(default_args(), &input);
        for id in [2, 3] {
            let response = response_to(&messages, id).as_object().expect("object");
            assert_eq!(response.get("result"), Some(&Value::Null));
        }
    }

    #[test]
    fn test_document_symbols_and_definition() {
        let mut input = initialize(1);
        input.extend(did_open(URI, SOURCE));
        input.extend(request(
            2,
            "textDocument/documentSymbol",
            &serde_json::json!({ "textDocument": { "uri": URI } }),
        ));
        input.extend(request(3, "textDocument/definition", &position(URI, 0, 9)));

        let messages = run_server_with(default_args(), &input);
        let symbols = response_to(&messages, 2)["result"].as_array().expect("array");
        let names: Vec<_> = symbols.iter().map(|s| s["name"].clone()).collect();
        assert_eq!(names, ["Greeter", "greet"]);
        assert_eq!(symbols[0]["kind"], 23);

        let def = &response_to(&messages, 3)["result"];
        assert_eq!(def["uri"], URI);
        assert_eq!(def["range"]["start"]["character"], 7);
    }

    #[test]
    fn test_rename_respects_word_boundaries() {
        let mut input = initialize(1);
        input.extend(did_open(URI, SOURCE));
        let mut params = position(URI, 1, 10);
        params["newName"] = Value::String("welcome".to_string());
        input.extend(request(2, "textDocument/rename", &params));

        let messages = run_server_with(default_args(), &input);
        let edits = response_to(&messages, 2)["result"]["changes"][URI]
            .as_array()
            .expect("edits");
        // `greet_name` is a different identifier
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0]["newText"], "welcome");
        assert_eq!(edits[0]["range"]["start"]["line"], 1);
    }

    #[test]
    fn test_fail_and_hang() {
        let mut args = default_args();
        args.fail_on = vec!["textDocument/hover".to_string()];
        args.hang_on = vec!["workspace/symbol".to_string()];

        let mut input = initialize(1);
        input.extend(request(2, "textDocument/hover", &position(URI, 0, 0)));
        input.extend(request(3, "workspace/symbol", &serde_json::json!({ "query": "" })));

        let messages = run_server_with(args, &input);
        assert_eq!(response_to(&messages, 2)["error"]["code"], -32603);
        assert!(
            !messages
                .iter()
                .any(|m| m.get("id").and_then(Value::as_u64) == Some(3))
        );
    }

    #[test]
    fn test_delayed_response_arrives_later() {
        let mut args = default_args();
        args.delay_on = vec![("workspace/symbol".to_string(), 50)];

        let mut input = initialize(1);
        input.extend(request(2, "workspace/symbol", &serde_json::json!({ "query": "" })));
        input.extend(request(3, "shutdown", &Value::Null));

        let messages = run_server_wait(args, &input, 200);
        let order: Vec<_> = messages.iter().filter_map(|m| m["id"].as_u64()).collect();
        assert_eq!(order, [1, 3, 2]);
    }

    #[test]
    fn test_record_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("record.log");
        let mut args = default_args();
        args.record = Some(path.clone());

        let mut input = initialize(1);
        input.extend(notification("initialized", &serde_json::json!({})));
        input.extend(did_open(URI, SOURCE));
        input.extend(frame(r#"{"jsonrpc":"2.0","id":7,"result":[null]}"#));

        run_server_with(args, &input);
        let record = std::fs::read_to_string(&path).expect("record file");
        let lines: Vec<_> = record.lines().collect();
        assert_eq!(
            lines,
            [
                "initialize",
                "initialized",
                "textDocument/didOpen",
                "response:7 [null]"
            ]
        );
    }

    #[test]
    fn test_progress_sequence() {
        let mut args = default_args();
        args.indexing_delay = 100;

        let mut input = initialize(1);
        input.extend(notification("initialized", &serde_json::json!({})));

        let messages = run_server_wait(args, &input, 250);

        let has_create = messages.iter().any(|m| {
            m.get("method").and_then(Value::as_str) == Some("window/workDoneProgress/create")
        });
        assert!(
            has_create,
            "Expected workDoneProgress/create. Got: {messages:?}"
        );

        let kinds: Vec<_> = messages
            .iter()
            .filter(|m| m.get("method").and_then(Value::as_str) == Some("$/progress"))
            .map(|m| m["params"]["value"]["kind"].clone())
            .collect();
        assert_eq!(kinds, ["begin", "end"]);
    }

    #[test]
    fn test_configuration_request_follows_initialize() {
        let mut args = default_args();
        args.send_configuration_request = true;

        let messages = run_server_with(args, &initialize(1));
        assert_eq!(messages[0]["id"], 1);
        assert_eq!(messages[1]["method"], "workspace/configuration");
        assert_eq!(messages[1]["params"]["items"][0]["section"], "mockls");
    }

    #[test]
    fn test_parse_delay() {
        assert_eq!(
            parse_delay("textDocument/hover=250"),
            Ok(("textDocument/hover".to_string(), 250))
        );
        assert!(parse_delay("textDocument/hover").is_err());
        assert!(parse_delay("x=soon").is_err());
    }

    #[test]
    fn test_find_word() {
        assert_eq!(find_word("greet_name greet", "greet", 0), Some(11));
        assert_eq!(find_word("greet()", "greet", 0), Some(0));
        assert_eq!(find_word("regreet", "greet", 0), None);
    }
}
