//! `{{ expression }}` binding templates.
//!
//! A property string containing at least one `{{ ... }}` segment is a
//! binding. A template made of exactly one segment evaluates to the raw
//! value of its expression; mixed text concatenates display strings.

use super::ast::Expr;
use super::parser::parse_expression;
use crate::types::TesseraError;
use crate::value::Value;

/// One piece of a binding template.
#[derive(Debug, Clone, PartialEq)]
pub enum BindingSegment {
    Text(String),
    Expr { source: String, expr: Expr },
}

/// A parsed binding template.
#[derive(Debug, Clone, PartialEq)]
pub struct BindingTemplate {
    segments: Vec<BindingSegment>,
}

impl BindingTemplate {
    /// Whether `text` contains a `{{ ... }}` segment.
    #[must_use]
    pub fn is_binding(text: &str) -> bool {
        text.find("{{")
            .is_some_and(|start| text[start + 2..].contains("}}"))
    }

    /// Parse a template. Every segment must be a valid expression.
    pub fn parse(text: &str) -> Result<Self, TesseraError> {
        let mut segments = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            if start > 0 {
                segments.push(BindingSegment::Text(rest[..start].to_string()));
            }
            let body = &rest[start + 2..];
            let end = find_close(body).ok_or_else(|| TesseraError::Syntax {
                message: "Unterminated binding".into(),
                line: 1,
                column: text.len() - rest.len() + start + 1,
            })?;
            let source = body[..end].trim().to_string();
            let expr = parse_expression(&source)?;
            segments.push(BindingSegment::Expr { source, expr });
            rest = &body[end + 2..];
        }
        if !rest.is_empty() {
            segments.push(BindingSegment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    #[must_use]
    pub fn segments(&self) -> &[BindingSegment] {
        &self.segments
    }

    /// Expressions in source order.
    pub fn expressions(&self) -> impl Iterator<Item = &Expr> {
        self.segments.iter().filter_map(|segment| match segment {
            BindingSegment::Expr { expr, .. } => Some(expr),
            BindingSegment::Text(_) => None,
        })
    }

    /// Evaluate with `eval` resolving each expression.
    pub fn render<F>(&self, mut eval: F) -> Result<Value, TesseraError>
    where
        F: FnMut(&Expr) -> Result<Value, TesseraError>,
    {
        if let [BindingSegment::Expr { expr, .. }] = self.segments.as_slice() {
            return eval(expr);
        }
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                BindingSegment::Text(text) => out.push_str(text),
                BindingSegment::Expr { expr, .. } => {
                    out.push_str(&eval(expr)?.to_display_string());
                }
            }
        }
        Ok(Value::String(out))
    }
}

/// Offset of the `}}` closing a segment, skipping braces that belong to
/// object literals or string contents inside the expression.
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 1;
            } else if b == q {
                quote = None;
            }
        } else {
            match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'{' => depth += 1,
                b'}' if depth > 0 => depth -= 1,
                b'}' if bytes.get(i + 1) == Some(&b'}') => return Some(i),
                _ => {}
            }
        }
        i += 1;
    }
    None
}
