//! # CLI Command Implementations
//!
//! Each command has a `*_report` function that does the work and returns a
//! [`Report`], and a `cmd_*` wrapper that prints it.

use crate::config::{load_config, load_document};
use crate::report::{ClassifyReport, DepsReport, EvalReport, Report, RunReport};
use std::path::Path;
use tessera_core::{DependencyGraph, Engine, TesseraError, Value, primitives::PATH_SEPARATOR};

/// Shared inputs of every command.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    pub config: Option<&'a Path>,
    pub json_mode: bool,
}

/// Build an engine from the configuration and load `document` into it.
pub fn load_engine(ctx: CommandContext<'_>, document: &Path) -> Result<Engine, TesseraError> {
    let config = load_config(ctx.config)?;
    let mut engine = Engine::new(config)?;
    engine.load(load_document(document)?)?;
    Ok(engine)
}

fn print_report<R: Report>(report: &R, json_mode: bool) -> Result<(), TesseraError> {
    if json_mode {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", report.render());
    }
    Ok(())
}

// =============================================================================
// EVAL COMMAND
// =============================================================================

/// Full pass over a document.
pub fn eval_report(ctx: CommandContext<'_>, document: &Path) -> Result<EvalReport, TesseraError> {
    let config = load_config(ctx.config)?;
    let mut engine = Engine::new(config)?;
    let order = engine.load(load_document(document)?)?;
    EvalReport::collect(&mut engine, order)
}

pub fn cmd_eval(ctx: CommandContext<'_>, document: &Path) -> Result<(), TesseraError> {
    let report = eval_report(ctx, document)?;
    print_report(&report, ctx.json_mode)
}

// =============================================================================
// RUN COMMAND
// =============================================================================

/// Split `Entity.function`.
pub fn parse_target(target: &str) -> Result<(&str, &str), TesseraError> {
    match target.split_once(PATH_SEPARATOR) {
        Some((entity, function)) if !entity.is_empty() && !function.is_empty() => {
            Ok((entity, function))
        }
        _ => Err(TesseraError::FunctionNotFound(format!(
            "'{}' is not of the form Entity.function",
            target
        ))),
    }
}

/// Parse call arguments. A JSON array spreads into positional arguments;
/// any other JSON value is passed as the single argument.
pub fn parse_args(args: Option<&str>) -> Result<Vec<Value>, TesseraError> {
    let Some(text) = args else {
        return Ok(Vec::new());
    };
    let json: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| TesseraError::DeserializationError(format!("Arguments: {}", e)))?;
    Ok(match json {
        serde_json::Value::Array(items) => items.iter().map(Value::from).collect(),
        other => vec![Value::from(other)],
    })
}

/// Full pass, execute one function, then drain the apply tasks it queued.
pub fn run_report(
    ctx: CommandContext<'_>,
    document: &Path,
    target: &str,
    args: Option<&str>,
) -> Result<RunReport, TesseraError> {
    let (entity, function) = parse_target(target)?;
    let args = parse_args(args)?;
    let mut engine = load_engine(ctx, document)?;
    // logs from the full pass are not part of this report
    engine.drain_logs();

    let outcome = engine.execute_function(entity, function, args)?;
    let updates = engine.run_pending_tasks();
    RunReport::collect(&mut engine, target, outcome, &updates)
}

pub fn cmd_run(
    ctx: CommandContext<'_>,
    document: &Path,
    target: &str,
    args: Option<&str>,
) -> Result<(), TesseraError> {
    tracing::info!("Running {}", target);
    let report = run_report(ctx, document, target, args)?;
    print_report(&report, ctx.json_mode)
}

// =============================================================================
// CLASSIFY COMMAND
// =============================================================================

/// Sync/async status of every function in the document.
pub fn classify_report(
    ctx: CommandContext<'_>,
    document: &Path,
) -> Result<ClassifyReport, TesseraError> {
    let mut engine = load_engine(ctx, document)?;
    engine.drain_logs();
    let functions = engine.classify_functions();
    Ok(ClassifyReport {
        functions,
        logs: engine.drain_logs(),
    })
}

pub fn cmd_classify(ctx: CommandContext<'_>, document: &Path) -> Result<(), TesseraError> {
    let report = classify_report(ctx, document)?;
    print_report(&report, ctx.json_mode)
}

// =============================================================================
// DEPS COMMAND
// =============================================================================

/// Dependency graph of a document. Nothing is evaluated.
pub fn deps_report(document: &Path) -> Result<DepsReport, TesseraError> {
    let document = load_document(document)?;
    Ok(DepsReport::collect(&DependencyGraph::build(&document)))
}

pub fn cmd_deps(ctx: CommandContext<'_>, document: &Path) -> Result<(), TesseraError> {
    let report = deps_report(document)?;
    print_report(&report, ctx.json_mode)
}
