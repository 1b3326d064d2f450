// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Domain results returned by the query façade.
//!
//! Servers answer the same query in several shapes (a single location or a
//! list, nested or flat symbols, `changes` or `documentChanges`). Each
//! mapping here accepts every shape the protocol allows and produces one
//! type. A `null` result maps to the empty value.

use lsp_types::{
    DocumentChangeOperation, DocumentChanges, DocumentSymbol, DocumentSymbolResponse,
    GotoDefinitionResponse, Hover, HoverContents, Location, MarkedString, OneOf, Range,
    SymbolInformation, SymbolKind, SymbolTag, TextEdit, Uri, WorkspaceEdit, WorkspaceSymbolResponse,
};
use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

use crate::error::{EngineError, Result};

/// Edits keyed by the document they apply to.
pub type RenameEdits = HashMap<Uri, Vec<TextEdit>>;

/// Hover text at a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoverInfo {
    /// Rendered contents. Marked strings with a language become fenced blocks.
    pub contents: String,
    /// Range the hover applies to, if the server said.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

/// A symbol in a document outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    /// Symbol name.
    pub name: String,
    /// Symbol kind.
    #[serde(serialize_with = "kind_name")]
    pub kind: SymbolKind,
    /// Extra detail such as a signature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Full extent of the symbol.
    pub range: Range,
    /// The part to highlight, usually the name.
    pub selection_range: Range,
    /// Enclosing symbol name (flat responses only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Nested symbols.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Self>,
}

/// A workspace-wide symbol search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceSymbolMatch {
    /// Symbol name.
    pub name: String,
    /// Symbol kind.
    #[serde(serialize_with = "kind_name")]
    pub kind: SymbolKind,
    /// Enclosing symbol name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Document containing the symbol.
    pub uri: Uri,
    /// Location within the document; absent when the server only knows the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    /// Symbol tags such as deprecated.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<SymbolTag>,
    /// Opaque server data, passed back when resolving the symbol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Lower-case name of a symbol kind, as printed by the CLI.
#[must_use]
pub fn symbol_kind_name(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::FILE => "file",
        SymbolKind::MODULE => "module",
        SymbolKind::NAMESPACE => "namespace",
        SymbolKind::PACKAGE => "package",
        SymbolKind::CLASS => "class",
        SymbolKind::METHOD => "method",
        SymbolKind::PROPERTY => "property",
        SymbolKind::FIELD => "field",
        SymbolKind::CONSTRUCTOR => "constructor",
        SymbolKind::ENUM => "enum",
        SymbolKind::INTERFACE => "interface",
        SymbolKind::FUNCTION => "function",
        SymbolKind::VARIABLE => "variable",
        SymbolKind::CONSTANT => "constant",
        SymbolKind::STRING => "string",
        SymbolKind::NUMBER => "number",
        SymbolKind::BOOLEAN => "boolean",
        SymbolKind::ARRAY => "array",
        SymbolKind::OBJECT => "object",
        SymbolKind::KEY => "key",
        SymbolKind::NULL => "null",
        SymbolKind::ENUM_MEMBER => "enum_member",
        SymbolKind::STRUCT => "struct",
        SymbolKind::EVENT => "event",
        SymbolKind::OPERATOR => "operator",
        SymbolKind::TYPE_PARAMETER => "type_parameter",
        _ => "unknown",
    }
}

fn kind_name<S: Serializer>(kind: &SymbolKind, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(symbol_kind_name(*kind))
}

fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<Option<T>> {
    serde_json::from_value(value)
        .map_err(|e| EngineError::Protocol(format!("unexpected '{method}' result: {e}")))
}

/// Maps a `textDocument/definition` result.
///
/// # Errors
///
/// Returns [`EngineError::Protocol`] if the result matches no known shape.
pub fn locations(value: Value) -> Result<Vec<Location>> {
    let response: Option<GotoDefinitionResponse> = decode("textDocument/definition", value)?;
    Ok(match response {
        None => Vec::new(),
        Some(GotoDefinitionResponse::Scalar(location)) => vec![location],
        Some(GotoDefinitionResponse::Array(locations)) => locations,
        Some(GotoDefinitionResponse::Link(links)) => links
            .into_iter()
            .map(|link| Location {
                uri: link.target_uri,
                range: link.target_selection_range,
            })
            .collect(),
    })
}

fn render_marked(marked: MarkedString) -> String {
    match marked {
        MarkedString::String(text) => text,
        MarkedString::LanguageString(code) => {
            format!("```{}\n{}\n```", code.language, code.value)
        }
    }
}

/// Maps a `textDocument/hover` result. Empty contents count as no hover.
///
/// # Errors
///
/// Returns [`EngineError::Protocol`] if the result matches no known shape.
pub fn hover(value: Value) -> Result<Option<HoverInfo>> {
    let Some(hover) = decode::<Hover>("textDocument/hover", value)? else {
        return Ok(None);
    };

    let contents = match hover.contents {
        HoverContents::Scalar(marked) => render_marked(marked),
        HoverContents::Array(parts) => parts
            .into_iter()
            .map(render_marked)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        HoverContents::Markup(markup) => markup.value,
    };

    if contents.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(HoverInfo {
        contents,
        range: hover.range,
    }))
}

fn from_nested(symbol: DocumentSymbol) -> Symbol {
    Symbol {
        name: symbol.name,
        kind: symbol.kind,
        detail: symbol.detail,
        range: symbol.range,
        selection_range: symbol.selection_range,
        container: None,
        children: symbol
            .children
            .unwrap_or_default()
            .into_iter()
            .map(from_nested)
            .collect(),
    }
}

fn from_flat(symbol: SymbolInformation) -> Symbol {
    Symbol {
        name: symbol.name,
        kind: symbol.kind,
        detail: None,
        range: symbol.location.range,
        selection_range: symbol.location.range,
        container: symbol.container_name,
        children: Vec::new(),
    }
}

/// Maps a `textDocument/documentSymbol` result.
///
/// # Errors
///
/// Returns [`EngineError::Protocol`] if the result matches no known shape.
pub fn symbols(value: Value) -> Result<Vec<Symbol>> {
    let response: Option<DocumentSymbolResponse> =
        decode("textDocument/documentSymbol", value)?;
    Ok(match response {
        None => Vec::new(),
        Some(DocumentSymbolResponse::Nested(nested)) => {
            nested.into_iter().map(from_nested).collect()
        }
        Some(DocumentSymbolResponse::Flat(flat)) => flat.into_iter().map(from_flat).collect(),
    })
}

/// Maps a `textDocument/rename` result into edits per document.
///
/// `documentChanges` wins over `changes` when both are present. Create,
/// rename and delete file operations are not edits and are skipped.
///
/// # Errors
///
/// Returns [`EngineError::Protocol`] if the result matches no known shape.
pub fn rename_edits(value: Value) -> Result<RenameEdits> {
    let Some(edit) = decode::<WorkspaceEdit>("textDocument/rename", value)? else {
        return Ok(RenameEdits::new());
    };

    let Some(document_changes) = edit.document_changes else {
        return Ok(edit.changes.unwrap_or_default());
    };

    let text_edits = match document_changes {
        DocumentChanges::Edits(edits) => edits,
        DocumentChanges::Operations(operations) => operations
            .into_iter()
            .filter_map(|operation| match operation {
                DocumentChangeOperation::Edit(edit) => Some(edit),
                DocumentChangeOperation::Op(op) => {
                    warn!("Skipping resource operation in rename result: {:?}", op);
                    None
                }
            })
            .collect(),
    };

    let mut edits = RenameEdits::new();
    for document_edit in text_edits {
        edits
            .entry(document_edit.text_document.uri)
            .or_default()
            .extend(document_edit.edits.into_iter().map(|edit| match edit {
                OneOf::Left(edit) => edit,
                OneOf::Right(annotated) => annotated.text_edit,
            }));
    }
    Ok(edits)
}

/// Maps a `workspace/symbol` result.
///
/// # Errors
///
/// Returns [`EngineError::Protocol`] if the result matches no known shape.
pub fn workspace_symbols(value: Value) -> Result<Vec<WorkspaceSymbolMatch>> {
    let response: Option<WorkspaceSymbolResponse> = decode("workspace/symbol", value)?;
    Ok(match response {
        None => Vec::new(),
        Some(WorkspaceSymbolResponse::Flat(flat)) => flat
            .into_iter()
            .map(|symbol| {
                let mut tags = symbol.tags.unwrap_or_default();
                #[allow(deprecated, reason = "Older servers flag deprecation with the boolean")]
                if symbol.deprecated == Some(true) && !tags.contains(&SymbolTag::DEPRECATED) {
                    tags.push(SymbolTag::DEPRECATED);
                }
                WorkspaceSymbolMatch {
                    name: symbol.name,
                    kind: symbol.kind,
                    container: symbol.container_name,
                    uri: symbol.location.uri,
                    range: Some(symbol.location.range),
                    tags,
                    data: None,
                }
            })
            .collect(),
        Some(WorkspaceSymbolResponse::Nested(nested)) => nested
            .into_iter()
            .map(|symbol| {
                let (uri, range) = match symbol.location {
                    OneOf::Left(location) => (location.uri, Some(location.range)),
                    OneOf::Right(location) => (location.uri, None),
                };
                WorkspaceSymbolMatch {
                    name: symbol.name,
                    kind: symbol.kind,
                    container: symbol.container_name,
                    uri,
                    range,
                    tags: symbol.tags.unwrap_or_default(),
                    data: symbol.data,
                }
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use lsp_types::Position;
    use serde_json::json;

    fn range(line: u32, start: u32, end: u32) -> Value {
        json!({
            "start": { "line": line, "character": start },
            "end": { "line": line, "character": end }
        })
    }

    #[test]
    fn test_definition_shapes() -> Result<()> {
        let single = locations(json!({ "uri": "file:///a.swift", "range": range(3, 4, 9) }))?;
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].range.start, Position::new(3, 4));

        let many = locations(json!([
            { "uri": "file:///a.swift", "range": range(1, 0, 1) },
            { "uri": "file:///b.swift", "range": range(2, 0, 1) }
        ]))?;
        assert_eq!(many.len(), 2);

        let links = locations(json!([{
            "targetUri": "file:///c.swift",
            "targetRange": range(10, 0, 40),
            "targetSelectionRange": range(10, 7, 12)
        }]))?;
        assert_eq!(links[0].uri.as_str(), "file:///c.swift");
        assert_eq!(links[0].range.start, Position::new(10, 7));

        assert!(locations(Value::Null)?.is_empty());
        assert!(locations(json!([]))?.is_empty());
        Ok(())
    }

    #[test]
    fn test_definition_garbage_is_protocol_error() {
        assert!(matches!(
            locations(json!({ "nope": true })),
            Err(EngineError::Protocol(_))
        ));
    }

    #[test]
    fn test_hover_shapes() -> Result<()> {
        let markup = hover(json!({
            "contents": { "kind": "markdown", "value": "```swift\nfunc greet()\n```" },
            "range": range(0, 5, 10)
        }))?
        .context("markup hover")?;
        assert!(markup.contents.contains("func greet()"));
        assert!(markup.range.is_some());

        let marked = hover(json!({
            "contents": [{ "language": "swift", "value": "let x: Int" }, "A counter."]
        }))?
        .context("marked hover")?;
        assert_eq!(marked.contents, "```swift\nlet x: Int\n```\n\nA counter.");

        let plain = hover(json!({ "contents": "just text" }))?.context("plain hover")?;
        assert_eq!(plain.contents, "just text");

        assert!(hover(Value::Null)?.is_none());
        assert!(hover(json!({ "contents": "" }))?.is_none());
        assert!(hover(json!({ "contents": [] }))?.is_none());
        Ok(())
    }

    #[test]
    fn test_nested_symbols_keep_hierarchy() -> Result<()> {
        let result = symbols(json!([{
            "name": "Greeter",
            "kind": 23,
            "range": range(0, 0, 50),
            "selectionRange": range(0, 7, 14),
            "children": [{
                "name": "greet",
                "kind": 6,
                "detail": "() -> String",
                "range": range(1, 4, 30),
                "selectionRange": range(1, 9, 14)
            }]
        }]))?;

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].kind, SymbolKind::STRUCT);
        assert_eq!(result[0].children[0].name, "greet");
        assert_eq!(result[0].children[0].detail.as_deref(), Some("() -> String"));

        let json = serde_json::to_value(&result[0])?;
        assert_eq!(json["kind"], "struct");
        assert_eq!(json["children"][0]["kind"], "method");
        Ok(())
    }

    #[test]
    fn test_flat_symbols() -> Result<()> {
        let result = symbols(json!([{
            "name": "main",
            "kind": 12,
            "location": { "uri": "file:///a.swift", "range": range(4, 0, 20) },
            "containerName": "App"
        }]))?;
        assert_eq!(result[0].kind, SymbolKind::FUNCTION);
        assert_eq!(result[0].container.as_deref(), Some("App"));
        assert_eq!(result[0].range, result[0].selection_range);
        assert!(symbols(Value::Null)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_rename_changes_form() -> Result<()> {
        let edits = rename_edits(json!({
            "changes": {
                "file:///a.swift": [
                    { "range": range(0, 4, 9), "newText": "count" },
                    { "range": range(3, 8, 13), "newText": "count" }
                ]
            }
        }))?;
        assert_eq!(edits.len(), 1);
        let (uri, list) = edits.iter().next().context("one document")?;
        assert_eq!(uri.as_str(), "file:///a.swift");
        assert_eq!(list.len(), 2);
        assert!(list.iter().all(|e| e.new_text == "count"));
        Ok(())
    }

    #[test]
    fn test_rename_document_changes_form() -> Result<()> {
        let edits = rename_edits(json!({
            "changes": { "file:///ignored.swift": [] },
            "documentChanges": [
                {
                    "textDocument": { "uri": "file:///a.swift", "version": 3 },
                    "edits": [
                        { "range": range(0, 4, 9), "newText": "total" },
                        { "range": range(2, 0, 5), "newText": "total", "annotationId": "rename" }
                    ]
                },
                { "kind": "rename", "oldUri": "file:///a.swift", "newUri": "file:///b.swift" },
                {
                    "textDocument": { "uri": "file:///c.swift", "version": null },
                    "edits": [{ "range": range(7, 1, 6), "newText": "total" }]
                }
            ]
        }))?;

        assert_eq!(edits.len(), 2);
        let a = edits
            .iter()
            .find(|(uri, _)| uri.as_str() == "file:///a.swift")
            .context("edits for a.swift")?;
        assert_eq!(a.1.len(), 2);
        assert!(!edits.keys().any(|uri| uri.as_str() == "file:///ignored.swift"));
        assert!(rename_edits(Value::Null)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_workspace_symbol_shapes() -> Result<()> {
        let flat = workspace_symbols(json!([{
            "name": "Greeter",
            "kind": 5,
            "location": { "uri": "file:///a.swift", "range": range(0, 0, 10) }
        }]))?;
        assert_eq!(flat[0].kind, SymbolKind::CLASS);
        assert!(flat[0].range.is_some());

        let nested = workspace_symbols(json!([
            {
                "name": "helper",
                "kind": 12,
                "containerName": "Utils",
                "location": { "uri": "file:///u.swift" }
            },
            {
                "name": "other",
                "kind": 12,
                "location": { "uri": "file:///o.swift", "range": range(9, 0, 3) }
            }
        ]))?;
        assert_eq!(nested[0].uri.as_str(), "file:///u.swift");
        assert!(nested[0].range.is_none());
        assert_eq!(nested[0].container.as_deref(), Some("Utils"));
        assert!(nested[1].range.is_some());
        assert!(nested[0].tags.is_empty());
        assert!(nested[0].data.is_none());

        assert!(workspace_symbols(Value::Null)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_workspace_symbol_tags_and_data() -> Result<()> {
        let nested = workspace_symbols(json!([{
            "name": "legacy",
            "kind": 12,
            "tags": [1],
            "location": { "uri": "file:///l.swift" },
            "data": { "usr": "s:6legacy" }
        }]))?;
        assert_eq!(nested[0].tags, vec![SymbolTag::DEPRECATED]);
        assert_eq!(nested[0].data, Some(json!({ "usr": "s:6legacy" })));

        let rendered = serde_json::to_value(&nested[0])?;
        assert_eq!(rendered["tags"], json!([1]));
        assert_eq!(rendered["data"]["usr"], "s:6legacy");

        let flat = workspace_symbols(json!([{
            "name": "old",
            "kind": 12,
            "deprecated": true,
            "location": { "uri": "file:///o.swift", "range": range(0, 0, 3) }
        }]))?;
        assert_eq!(flat[0].tags, vec![SymbolTag::DEPRECATED]);
        let rendered = serde_json::to_value(&flat[0])?;
        assert!(rendered.get("data").is_none());
        Ok(())
    }
}
