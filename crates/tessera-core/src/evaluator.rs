//! # Dependency Evaluator
//!
//! Computes the Evaluated Tree from a document, in dependency order.
//!
//! - A full pass rebuilds the tree, the variable state and the resolved
//!   functions from scratch.
//! - A scoped pass recomputes only the bindings that transitively depend
//!   on a set of touched paths, against the current state. It never
//!   re-runs variable initializers.
//!
//! Both passes run inside a binding-mode, untracked sandbox session. An
//! erroring binding is logged and keeps its previous value (or
//! `undefined`); it never stops the pass.

use crate::dependency::{DependencyGraph, DependencyNode, EvaluationOrder, NodeSource};
use crate::logs::{LogCategory, LogLevel};
use crate::sandbox::{Sandbox, SandboxOptions, SandboxServices, SandboxSession};
use crate::tree::{EvaluatedEntity, EvaluatedTree};
use crate::types::Document;
use crate::value::{Function, Value};
use crate::variables::{ResolvedFunctions, VariableMap, VariableStateStore};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Full and scoped evaluation passes.
pub struct Evaluator;

impl Evaluator {
    /// Rebuild `tree`, `variables` and `functions` from `document`.
    pub fn evaluate_full(
        services: SandboxServices<'_>,
        document: &Document,
        graph: &DependencyGraph,
        tree: &mut EvaluatedTree,
        variables: &mut VariableStateStore,
        functions: &mut ResolvedFunctions,
    ) -> EvaluationOrder {
        let previous = std::mem::take(tree);
        for entity in &document.entities {
            let mut evaluated = EvaluatedEntity::new(entity.kind);
            evaluated.variables = entity.variables.keys().cloned().collect();
            evaluated.functions = entity.functions.keys().cloned().collect();
            tree.insert(entity.name.clone(), evaluated);
        }
        variables.clear();
        functions.clear();

        let plan = graph.evaluation_order();
        let mut state: BTreeMap<String, VariableMap> = BTreeMap::new();
        let mut bound: BTreeMap<String, BTreeMap<String, Rc<Function>>> = BTreeMap::new();
        let mut session = Sandbox::prepare(
            services,
            tree,
            variables,
            functions,
            SandboxOptions::binding(),
        );

        for path in &plan.cyclic {
            let Some(node) = graph.node(path) else {
                continue;
            };
            report_cycle(&mut session, path);
            let fallback = previous_value(&previous, node);
            if matches!(node.source, NodeSource::Variable(_)) {
                state
                    .entry(node.entity.clone())
                    .or_default()
                    .insert(node.property.clone(), fallback.clone());
            }
            publish(&mut session, tree, node, fallback);
        }

        for path in &plan.order {
            let Some(node) = graph.node(path) else {
                continue;
            };
            let value = match &node.source {
                NodeSource::Variable(initializer) => {
                    let value = match session.evaluate_expr(initializer, Some(&node.entity)) {
                        Ok(value) => value,
                        Err(e) => {
                            report_error(&mut session, path, &e.to_string());
                            previous_value(&previous, node)
                        }
                    };
                    state
                        .entry(node.entity.clone())
                        .or_default()
                        .insert(node.property.clone(), value.clone());
                    value
                }
                NodeSource::Function(definition) => {
                    let function = Rc::new(Function::bound(
                        Rc::clone(definition),
                        &node.entity,
                        &node.property,
                    ));
                    bound
                        .entry(node.entity.clone())
                        .or_default()
                        .insert(node.property.clone(), Rc::clone(&function));
                    Value::Function(function)
                }
                _ => compute(&mut session, node, path, previous_value(&previous, node)),
            };
            publish(&mut session, tree, node, value);
        }

        drop(session);
        variables.replace_all(state);
        functions.replace_all(bound);
        tracing::debug!(
            nodes = plan.order.len(),
            cyclic = plan.cyclic.len(),
            "full evaluation complete"
        );
        plan
    }

    /// Recompute the bindings depending on `touched` (and any touched
    /// path that is itself a binding or static property). Returns the
    /// recomputed paths in evaluation order.
    pub fn evaluate_scoped<S: AsRef<str>>(
        services: SandboxServices<'_>,
        graph: &DependencyGraph,
        tree: &mut EvaluatedTree,
        variables: &VariableStateStore,
        functions: &ResolvedFunctions,
        touched: &[S],
    ) -> Vec<String> {
        let mut affected = graph.dependents_of(touched);
        for path in touched {
            let path = path.as_ref();
            if graph
                .node(path)
                .is_some_and(|node| node.source.is_recomputable())
            {
                affected.insert(path.to_string());
            }
        }
        if affected.is_empty() {
            return Vec::new();
        }

        let plan = graph.evaluation_order();
        let mut session = Sandbox::prepare(
            services,
            tree,
            variables,
            functions,
            SandboxOptions::binding(),
        );
        for path in plan.cyclic.iter().filter(|p| affected.contains(p.as_str())) {
            report_cycle(&mut session, path);
        }

        let mut recomputed = Vec::new();
        for path in plan.order.iter().filter(|p| affected.contains(p.as_str())) {
            let Some(node) = graph.node(path) else {
                continue;
            };
            if !node.source.is_recomputable() {
                continue;
            }
            let fallback = previous_value(tree, node);
            let value = compute(&mut session, node, path, fallback);
            publish(&mut session, tree, node, value);
            recomputed.push(path.clone());
        }
        tracing::debug!(
            touched = touched.len(),
            recomputed = recomputed.len(),
            "scoped evaluation complete"
        );
        recomputed
    }
}

fn previous_value(tree: &EvaluatedTree, node: &DependencyNode) -> Value {
    tree.value_at(&node.entity, &[node.property.as_str()])
        .unwrap_or_default()
}

/// Value of a static, binding or invalid node.
fn compute(
    session: &mut SandboxSession<'_>,
    node: &DependencyNode,
    path: &str,
    fallback: Value,
) -> Value {
    match &node.source {
        NodeSource::Static(json) => Value::from(json),
        NodeSource::Binding(template) => {
            match session.evaluate_template(template, Some(&node.entity)) {
                Ok(value) => value,
                Err(e) => {
                    report_error(session, path, &e.to_string());
                    fallback
                }
            }
        }
        NodeSource::Invalid(message) => {
            report_error(session, path, message);
            fallback
        }
        NodeSource::Variable(_) | NodeSource::Function(_) => fallback,
    }
}

fn publish(session: &mut SandboxSession<'_>, tree: &mut EvaluatedTree, node: &DependencyNode, value: Value) {
    let property = [node.property.as_str()];
    if let Err(e) = tree.set_value(&node.entity, &property, value.clone()) {
        tracing::warn!(path = %node.path(), error = %e, "tree write failed");
    }
    if let Err(e) = session.set_entity_value(&node.entity, &node.property, value) {
        tracing::warn!(path = %node.path(), error = %e, "session publish failed");
    }
}

fn report_error(session: &mut SandboxSession<'_>, path: &str, message: &str) {
    session.log(
        LogLevel::Error,
        LogCategory::ExpressionEvaluation,
        Some(path),
        message,
    );
}

fn report_cycle(session: &mut SandboxSession<'_>, path: &str) {
    session.log(
        LogLevel::Error,
        LogCategory::CyclicDependency,
        Some(path),
        format!("Cyclic dependency found while evaluating {}", path),
    );
}

// =============================================================================
// TESTS
// =============================================================================
