//! # Reports
//!
//! Serializable results of each CLI command, plus their plain-text
//! rendering. `--json-mode` prints the structs as JSON; otherwise
//! [`Report::render`] produces the human-readable form.

use serde::Serialize;
use std::collections::BTreeMap;
use tessera_core::{
    AppliedUpdate, DependencyGraph, Engine, EvaluationOrder, ExecutionOutcome, LogEntry, Patch,
    TesseraError,
};

/// Something a command can print.
pub trait Report: Serialize {
    /// Plain-text rendering.
    fn render(&self) -> String;

    /// Pretty JSON rendering.
    fn to_json(&self) -> Result<String, TesseraError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TesseraError::SerializationError(e.to_string()))
    }
}

// =============================================================================
// EVAL
// =============================================================================

/// Result of `tessera eval`.
#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub order: Vec<String>,
    pub cyclic: Vec<String>,
    pub tree: serde_json::Value,
    pub logs: Vec<LogEntry>,
}

impl EvalReport {
    /// Collect the state of an engine after a full pass.
    pub fn collect(engine: &mut Engine, order: EvaluationOrder) -> Result<Self, TesseraError> {
        Ok(Self {
            order: order.order,
            cyclic: order.cyclic,
            tree: engine.tree().to_json()?,
            logs: engine.drain_logs(),
        })
    }
}

impl Report for EvalReport {
    fn render(&self) -> String {
        let mut out = String::new();
        line(&mut out, "Evaluated Tree");
        line(&mut out, "==============");
        render_tree(&mut out, &self.tree);
        if !self.cyclic.is_empty() {
            out.push('\n');
            line(&mut out, &format!("Cyclic: {}", self.cyclic.join(", ")));
        }
        render_logs(&mut out, &self.logs);
        out
    }
}

// =============================================================================
// RUN
// =============================================================================

/// Result of `tessera run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub function: String,
    pub value: serde_json::Value,
    pub error: Option<String>,
    pub is_async: bool,
    pub patches: Vec<Patch>,
    pub touched: Vec<String>,
    pub recomputed: Vec<String>,
    pub tree: serde_json::Value,
    pub logs: Vec<LogEntry>,
}

impl RunReport {
    /// Collect an execution outcome and the updates that followed it.
    pub fn collect(
        engine: &mut Engine,
        function: &str,
        outcome: ExecutionOutcome,
        updates: &[AppliedUpdate],
    ) -> Result<Self, TesseraError> {
        let touched = updates
            .iter()
            .flat_map(|update| update.touched.iter().map(ToString::to_string))
            .collect();
        let recomputed = updates
            .iter()
            .flat_map(|update| update.recomputed.iter().cloned())
            .collect();
        Ok(Self {
            function: function.to_string(),
            value: outcome.value.to_json(),
            error: outcome.error,
            is_async: outcome.is_async,
            patches: outcome.patches,
            touched,
            recomputed,
            tree: engine.tree().to_json()?,
            logs: engine.drain_logs(),
        })
    }
}

impl Report for RunReport {
    fn render(&self) -> String {
        let mut out = String::new();
        line(&mut out, &format!("Executed {}", self.function));
        line(&mut out, &format!("=========={}", "=".repeat(self.function.len())));
        match &self.error {
            Some(error) => {
                line(&mut out, &format!("Error:  {}", error));
            }
            None => {
                line(&mut out, &format!("Result: {}", self.value));
            }
        }
        line(&mut out, &format!("Async:  {}", self.is_async));
        out.push('\n');
        line(&mut out, &format!("Patches ({}):", self.patches.len()));
        for patch in &self.patches {
            line(&mut out, &format!("  {}", describe_patch(patch)));
        }
        out.push('\n');
        line(&mut out, &format!("Touched:    {}", list_or_none(&self.touched)));
        line(&mut out, &format!("Recomputed: {}", list_or_none(&self.recomputed)));
        out.push('\n');
        render_tree(&mut out, &self.tree);
        render_logs(&mut out, &self.logs);
        out
    }
}

/// One-line description of a patch.
pub fn describe_patch(patch: &Patch) -> String {
    match patch {
        Patch::Set { path, value } => format!("SET {} = {}", path, value.to_json()),
        Patch::Delete { path } => format!("DELETE {}", path),
        Patch::MethodCall { path, method, args } => {
            let args: Vec<String> = args.iter().map(|arg| arg.to_json().to_string()).collect();
            format!("CALL {}.{}({})", path, method.name(), args.join(", "))
        }
    }
}

// =============================================================================
// CLASSIFY
// =============================================================================

/// Result of `tessera classify`.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifyReport {
    pub functions: BTreeMap<String, bool>,
    pub logs: Vec<LogEntry>,
}

impl Report for ClassifyReport {
    fn render(&self) -> String {
        let mut out = String::new();
        line(&mut out, "Function Classification");
        line(&mut out, "=======================");
        if self.functions.is_empty() {
            line(&mut out, "(no functions)");
        }
        let width = self.functions.keys().map(String::len).max().unwrap_or(0);
        for (path, is_async) in &self.functions {
            let kind = if *is_async { "async" } else { "sync" };
            line(&mut out, &format!("{:<width$}  {}", path, kind, width = width));
        }
        render_logs(&mut out, &self.logs);
        out
    }
}

// =============================================================================
// DEPS
// =============================================================================

/// A dependency edge: `to` reads `from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeJson {
    pub from: String,
    pub to: String,
}

/// Result of `tessera deps`.
#[derive(Debug, Clone, Serialize)]
pub struct DepsReport {
    pub order: Vec<String>,
    pub cyclic: Vec<String>,
    pub edges: Vec<EdgeJson>,
}

impl DepsReport {
    pub fn collect(graph: &DependencyGraph) -> Self {
        let order = graph.evaluation_order();
        let edges = graph
            .edges()
            .map(|(from, to)| EdgeJson {
                from: from.to_string(),
                to: to.to_string(),
            })
            .collect();
        Self {
            order: order.order,
            cyclic: order.cyclic,
            edges,
        }
    }
}

impl Report for DepsReport {
    fn render(&self) -> String {
        let mut out = String::new();
        line(&mut out, "Evaluation Order");
        line(&mut out, "================");
        for (i, path) in self.order.iter().enumerate() {
            line(&mut out, &format!("{:>4}. {}", i + 1, path));
        }
        if !self.cyclic.is_empty() {
            out.push('\n');
            line(&mut out, &format!("Cyclic: {}", self.cyclic.join(", ")));
        }
        out.push('\n');
        line(&mut out, &format!("Edges ({}):", self.edges.len()));
        for edge in &self.edges {
            line(&mut out, &format!("  {} -> {}", edge.from, edge.to));
        }
        out
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn render_tree(out: &mut String, tree: &serde_json::Value) {
    let Some(entities) = tree.as_object() else {
        return;
    };
    for (name, entity) in entities {
        let kind = entity.get("kind").and_then(|k| k.as_str()).unwrap_or("?");
        line(out, &format!("{} ({})", name, kind));
        if let Some(values) = entity.get("values").and_then(|v| v.as_object()) {
            for (key, value) in values {
                line(out, &format!("  {}: {}", key, value));
            }
        }
    }
}

fn render_logs(out: &mut String, logs: &[LogEntry]) {
    if logs.is_empty() {
        return;
    }
    out.push('\n');
    line(out, &format!("Logs ({}):", logs.len()));
    for entry in logs {
        line(
            out,
            &format!(
                "  [{}] {} {}: {}",
                entry.level,
                entry.category,
                entry.entity.as_deref().unwrap_or("-"),
                entry.message
            ),
        );
    }
}

fn line(out: &mut String, text: &str) {
    out.push_str(text);
    out.push('\n');
}

fn list_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}
