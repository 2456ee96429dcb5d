//! # Dependency Graph
//!
//! Nodes are property paths (`Entity.prop`) for every widget/action
//! property, script-object variable and script-object function. An edge
//! runs from a dependency to its dependent.
//!
//! References are the member chains rooted at entity names found in
//! binding and function sources (`Obj1.v.a`, `Input1.text`, bare `Obj1`).
//! A reference matches a node when either path is a prefix of the other at
//! a segment boundary.
//!
//! ## Ordering
//!
//! [`DependencyGraph::evaluation_order`] is Kahn's algorithm over ordered
//! maps, so ties always break by path. Function nodes have no ordering
//! constraints of their own (a function value exists before its body
//! runs); a node that calls a function is ordered after everything the
//! function reads.

use crate::primitives::PATH_SEPARATOR;
use crate::script::ast::{
    Expr, FunctionBody, FunctionExpr, Literal, MemberProperty, PropertyKey, Stmt, TemplatePart,
};
use crate::script::{BindingTemplate, parse_expression, parse_function};
use crate::types::{Document, EntityDecl};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

// =============================================================================
// NODES
// =============================================================================

/// What a node is computed from.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeSource {
    /// Plain JSON data.
    Static(serde_json::Value),
    /// A `{{ }}` template.
    Binding(BindingTemplate),
    /// A script-object variable initializer.
    Variable(Expr),
    /// A script-object function definition.
    Function(Rc<FunctionExpr>),
    /// Source that failed to parse; evaluates to an error entry.
    Invalid(String),
}

impl NodeSource {
    fn from_property(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) if BindingTemplate::is_binding(text) => {
                match BindingTemplate::parse(text) {
                    Ok(template) => Self::Binding(template),
                    Err(e) => Self::Invalid(e.to_string()),
                }
            }
            other => Self::Static(other.clone()),
        }
    }

    /// Whether a scoped re-evaluation recomputes this node.
    #[must_use]
    pub fn is_recomputable(&self) -> bool {
        matches!(self, Self::Static(_) | Self::Binding(_) | Self::Invalid(_))
    }
}

/// One property path.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyNode {
    pub entity: String,
    pub property: String,
    pub source: NodeSource,
}

impl DependencyNode {
    #[must_use]
    pub fn path(&self) -> String {
        format!("{}{}{}", self.entity, PATH_SEPARATOR, self.property)
    }
}

/// Result of ordering the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvaluationOrder {
    /// Acyclic nodes, dependencies first.
    pub order: Vec<String>,
    /// Nodes on or behind a cycle.
    pub cyclic: Vec<String>,
}

// =============================================================================
// GRAPH
// =============================================================================

/// Property-path dependency graph of a document.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DependencyNode>,
    /// dependency -> dependents
    dependents: BTreeMap<String, BTreeSet<String>>,
    /// dependent -> dependencies
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Parse every source in `document` and link references.
    #[must_use]
    pub fn build(document: &Document) -> Self {
        let mut graph = Self::default();
        let entity_names = document.names();
        let mut references: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for entity in &document.entities {
            for (path, node) in nodes_of(entity) {
                let mut found = BTreeSet::new();
                collect_node_references(&node, &entity_names, &mut found);
                references.insert(path.clone(), found);
                graph.nodes.insert(path, node);
            }
        }

        for (dependent, refs) in &references {
            for reference in refs {
                let entity = reference
                    .split(PATH_SEPARATOR)
                    .next()
                    .unwrap_or_default();
                let matches: Vec<String> = graph
                    .entity_nodes(entity)
                    .filter(|node| {
                        is_path_prefix(node, reference) || is_path_prefix(reference, node)
                    })
                    .filter(|node| *node != dependent.as_str())
                    .map(str::to_string)
                    .collect();
                for dependency in matches {
                    graph.link(dependency, dependent.clone());
                }
            }
        }
        graph
    }

    fn link(&mut self, dependency: String, dependent: String) {
        self.dependencies
            .entry(dependent.clone())
            .or_default()
            .insert(dependency.clone());
        self.dependents.entry(dependency).or_default().insert(dependent);
    }

    fn entity_nodes<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.nodes
            .iter()
            .filter(move |(_, node)| node.entity == entity)
            .map(|(path, _)| path.as_str())
    }

    #[must_use]
    pub fn node(&self, path: &str) -> Option<&DependencyNode> {
        self.nodes.get(path)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct dependencies of `path`.
    pub fn dependencies_of(&self, path: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(path)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Every `(dependency, dependent)` edge in path order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dependents.iter().flat_map(|(from, to)| {
            to.iter().map(move |dependent| (from.as_str(), dependent.as_str()))
        })
    }

    fn is_function(&self, path: &str) -> bool {
        matches!(
            self.nodes.get(path).map(|node| &node.source),
            Some(NodeSource::Function(_))
        )
    }

    /// Nodes that must be computed before `path`. Function nodes are
    /// looked through: calling a function reads what the function reads.
    fn ordering_dependencies<'a>(&'a self, path: &'a str) -> BTreeSet<&'a str> {
        let mut result = BTreeSet::new();
        let mut visited = BTreeSet::new();
        let mut stack: Vec<&str> = self.dependencies_of(path).collect();
        while let Some(dependency) = stack.pop() {
            if dependency == path || !visited.insert(dependency) {
                continue;
            }
            if !self.nodes.contains_key(dependency) {
                continue;
            }
            result.insert(dependency);
            if self.is_function(dependency) {
                stack.extend(self.dependencies_of(dependency));
            }
        }
        result
    }

    /// Deterministic topological order. Nodes that never reach in-degree
    /// zero are reported as cyclic.
    #[must_use]
    pub fn evaluation_order(&self) -> EvaluationOrder {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut unlocks: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for path in self.nodes.keys() {
            let path = path.as_str();
            let dependencies = if self.is_function(path) {
                BTreeSet::new()
            } else {
                self.ordering_dependencies(path)
            };
            in_degree.insert(path, dependencies.len());
            for dependency in dependencies {
                unlocks.entry(dependency).or_default().push(path);
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(path, _)| *path)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(path) = ready.pop_first() {
            order.push(path.to_string());
            for &dependent in unlocks.get(path).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        let placed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let cyclic = self
            .nodes
            .keys()
            .filter(|path| !placed.contains(path.as_str()))
            .cloned()
            .collect();
        EvaluationOrder { order, cyclic }
    }

    /// Transitive dependents of the nodes matching `touched`, breadth-first.
    /// Matching nodes themselves are not included unless reached again
    /// through an edge.
    #[must_use]
    pub fn dependents_of<S: AsRef<str>>(&self, touched: &[S]) -> BTreeSet<String> {
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut seeds = BTreeSet::new();
        for path in touched {
            let path = path.as_ref();
            let entity = path.split(PATH_SEPARATOR).next().unwrap_or_default();
            for node in self.entity_nodes(entity) {
                if (is_path_prefix(node, path) || is_path_prefix(path, node)) && seeds.insert(node) {
                    queue.push_back(node);
                }
            }
        }

        let mut seen = BTreeSet::new();
        while let Some(path) = queue.pop_front() {
            for dependent in self.dependents.get(path).into_iter().flatten() {
                if seen.insert(dependent.clone()) {
                    queue.push_back(dependent.as_str());
                }
            }
        }
        seen
    }
}

/// Whether `prefix` equals `path` or is an ancestor of it.
fn is_path_prefix(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with(PATH_SEPARATOR),
        None => false,
    }
}

fn nodes_of(entity: &EntityDecl) -> Vec<(String, DependencyNode)> {
    let node = |property: &str, source: NodeSource| {
        let node = DependencyNode {
            entity: entity.name.clone(),
            property: property.to_string(),
            source,
        };
        (node.path(), node)
    };

    let properties = entity
        .properties
        .iter()
        .map(|(name, value)| node(name, NodeSource::from_property(value)));
    let variables = entity.variables.iter().map(|(name, source)| {
        let source = match parse_expression(source) {
            Ok(expr) => NodeSource::Variable(expr),
            Err(e) => NodeSource::Invalid(e.to_string()),
        };
        node(name, source)
    });
    let functions = entity.functions.iter().map(|(name, source)| {
        let source = match parse_function(source) {
            Ok(definition) => NodeSource::Function(definition),
            Err(e) => NodeSource::Invalid(e.to_string()),
        };
        node(name, source)
    });
    properties.chain(variables).chain(functions).collect()
}

// =============================================================================
// REFERENCE COLLECTION
// =============================================================================

/// AST walk collecting entity-rooted member chains.
struct References<'a> {
    entities: &'a BTreeSet<&'a str>,
    this_entity: Option<&'a str>,
    found: &'a mut BTreeSet<String>,
}

fn collect_node_references(
    node: &DependencyNode,
    entities: &BTreeSet<&str>,
    found: &mut BTreeSet<String>,
) {
    let mut walker = References {
        entities,
        this_entity: Some(node.entity.as_str()),
        found,
    };
    match &node.source {
        NodeSource::Binding(template) => {
            for expr in template.expressions() {
                walker.expr(expr);
            }
        }
        NodeSource::Variable(expr) => walker.expr(expr),
        NodeSource::Function(definition) => walker.function(definition),
        NodeSource::Static(_) | NodeSource::Invalid(_) => {}
    }
}

impl References<'_> {
    /// `Root.a.b` for a member chain of named or literal keys. The chain
    /// is closed at the first computed key.
    fn chain(&self, expr: &Expr) -> Option<(Vec<String>, bool)> {
        match expr {
            Expr::Identifier(name) if self.entities.contains(name.as_str()) => {
                Some((vec![name.clone()], true))
            }
            Expr::This => self.this_entity.map(|entity| (vec![entity.to_string()], true)),
            Expr::Member {
                object, property, ..
            } => {
                let (mut chain, open) = self.chain(object)?;
                if !open {
                    return Some((chain, false));
                }
                let segment = match property {
                    MemberProperty::Named(name) => Some(name.clone()),
                    MemberProperty::Computed(key) => match key.as_ref() {
                        Expr::Literal(Literal::String(s)) => Some(s.clone()),
                        Expr::Literal(Literal::Number(n)) if n.fract() == 0.0 && *n >= 0.0 => {
                            Some(format!("{}", *n as u64))
                        }
                        _ => None,
                    },
                };
                match segment {
                    Some(segment) => {
                        chain.push(segment);
                        Some((chain, true))
                    }
                    None => Some((chain, false)),
                }
            }
            _ => None,
        }
    }

    fn expr(&mut self, expr: &Expr) {
        if let Some((chain, _)) = self.chain(expr) {
            self.found.insert(chain.join(&PATH_SEPARATOR.to_string()));
            self.computed_keys(expr);
            return;
        }
        match expr {
            Expr::Literal(_) | Expr::Identifier(_) | Expr::This => {}
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Expr(e) = part {
                        self.expr(e);
                    }
                }
            }
            Expr::Array(items) => items.iter().for_each(|e| self.expr(e)),
            Expr::Object(entries) => {
                for (key, value) in entries {
                    if let PropertyKey::Computed(k) = key {
                        self.expr(k);
                    }
                    self.expr(value);
                }
            }
            Expr::Member {
                object, property, ..
            } => {
                self.expr(object);
                if let MemberProperty::Computed(key) = property {
                    self.expr(key);
                }
            }
            Expr::Call { callee, args } | Expr::New { callee, args } => {
                self.expr(callee);
                args.iter().for_each(|e| self.expr(e));
            }
            Expr::Unary { operand: e, .. }
            | Expr::Update { target: e, .. }
            | Expr::Await(e)
            | Expr::Delete(e) => self.expr(e),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.expr(consequent);
                self.expr(alternate);
            }
            Expr::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            Expr::Function(definition) => self.function(definition),
        }
    }

    /// Walk computed keys inside an entity-rooted chain.
    fn computed_keys(&mut self, expr: &Expr) {
        if let Expr::Member {
            object, property, ..
        } = expr
        {
            self.computed_keys(object);
            if let MemberProperty::Computed(key) = property {
                self.expr(key);
            }
        }
    }

    fn function(&mut self, definition: &FunctionExpr) {
        for param in &definition.params {
            if let Some(default) = &param.default {
                self.expr(default);
            }
        }
        match &definition.body {
            FunctionBody::Expression(expr) => self.expr(expr),
            FunctionBody::Block(body) => self.stmts(body),
        }
    }

    fn stmts(&mut self, body: &[Stmt]) {
        body.iter().for_each(|stmt| self.stmt(stmt));
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::VarDecl { declarations, .. } => {
                for init in declarations.iter().filter_map(|(_, init)| init.as_ref()) {
                    self.expr(init);
                }
            }
            Stmt::FunctionDecl(definition) => self.function(definition),
            Stmt::Expr(expr) | Stmt::Throw(expr) => self.expr(expr),
            Stmt::Return(expr) => {
                if let Some(expr) = expr {
                    self.expr(expr);
                }
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.stmt(consequent);
                if let Some(alternate) = alternate {
                    self.stmt(alternate);
                }
            }
            Stmt::While { test, body } => {
                self.expr(test);
                self.stmt(body);
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                if let Some(init) = init {
                    self.stmt(init);
                }
                if let Some(test) = test {
                    self.expr(test);
                }
                if let Some(update) = update {
                    self.expr(update);
                }
                self.stmt(body);
            }
            Stmt::ForOf { iterable, body, .. } => {
                self.expr(iterable);
                self.stmt(body);
            }
            Stmt::Block(body) => self.stmts(body),
            Stmt::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                self.stmts(block);
                if let Some(handler) = handler {
                    self.stmts(handler);
                }
                if let Some(finalizer) = finalizer {
                    self.stmts(finalizer);
                }
            }
            Stmt::Break | Stmt::Continue | Stmt::Empty => {}
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityKind;
    use serde_json::json;

    fn document() -> Document {
        Document::from_entities(vec![
            EntityDecl::new("Input1", EntityKind::Widget)
                .with_property("text", json!("hello"))
                .with_property("label", json!("{{ Input1.text.toUpperCase() }}")),
            EntityDecl::new("Obj1", EntityKind::JsAction)
                .with_variable("v", "{ a: [] }")
                .with_variable("greeting", "Input1.text + '!'")
                .with_function("count", "function () { return this.v.a.length; }"),
            EntityDecl::new("Text1", EntityKind::Widget)
                .with_property("value", json!("{{ Obj1.v.a.length }}"))
                .with_property("summary", json!("n={{ Obj1.count() }}")),
        ])
        .expect("valid")
    }

    #[test]
    fn prefix_matching_respects_segments() {
        assert!(is_path_prefix("Obj1.v", "Obj1.v.a"));
        assert!(is_path_prefix("Obj1.v", "Obj1.v"));
        assert!(!is_path_prefix("Obj1.v", "Obj1.values"));
    }

    #[test]
    fn edges_follow_references() {
        let graph = DependencyGraph::build(&document());
        let edges: Vec<(&str, &str)> = graph.edges().collect();
        assert!(edges.contains(&("Input1.text", "Input1.label")));
        assert!(edges.contains(&("Input1.text", "Obj1.greeting")));
        assert!(edges.contains(&("Obj1.v", "Text1.value")));
        assert!(edges.contains(&("Obj1.v", "Obj1.count")));
        assert!(edges.contains(&("Obj1.count", "Text1.summary")));
        assert!(!edges.iter().any(|(from, to)| from == to));
    }

    #[test]
    fn order_puts_dependencies_first() {
        let graph = DependencyGraph::build(&document());
        let result = graph.evaluation_order();
        assert!(result.cyclic.is_empty());
        let position = |p: &str| result.order.iter().position(|x| x == p).expect("ordered");
        assert!(position("Input1.text") < position("Input1.label"));
        assert!(position("Obj1.v") < position("Text1.value"));
        assert!(position("Obj1.count") < position("Text1.summary"));
        assert_eq!(result.order.len(), graph.len());
    }

    #[test]
    fn cycles_are_reported_not_ordered() {
        let doc = Document::from_entities(vec![
            EntityDecl::new("A", EntityKind::Widget).with_property("x", json!("{{ B.y }}")),
            EntityDecl::new("B", EntityKind::Widget).with_property("y", json!("{{ A.x }}")),
            EntityDecl::new("C", EntityKind::Widget).with_property("z", json!("{{ 1 + 1 }}")),
        ])
        .expect("valid");
        let result = DependencyGraph::build(&doc).evaluation_order();
        assert_eq!(result.order, vec!["C.z"]);
        assert_eq!(result.cyclic, vec!["A.x", "B.y"]);
    }

    #[test]
    fn mutually_recursive_functions_are_not_cyclic() {
        let doc = Document::from_entities(vec![
            EntityDecl::new("Obj1", EntityKind::JsAction)
                .with_function("even", "(n) => n === 0 ? true : this.odd(n - 1)")
                .with_function("odd", "(n) => n === 0 ? false : this.even(n - 1)"),
        ])
        .expect("valid");
        assert!(DependencyGraph::build(&doc).evaluation_order().cyclic.is_empty());
    }

    #[test]
    fn dependents_are_transitive() {
        let graph = DependencyGraph::build(&document());
        let dependents = graph.dependents_of(&["Obj1.v.a"]);
        let expected: BTreeSet<String> = ["Obj1.count", "Text1.summary", "Text1.value"]
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(dependents, expected);
        assert!(graph.dependents_of(&["Nope.x"]).is_empty());
    }

    #[test]
    fn invalid_sources_become_invalid_nodes() {
        let doc = Document::from_entities(vec![
            EntityDecl::new("W", EntityKind::Widget).with_property("x", json!("{{ 1 + }}")),
        ])
        .expect("valid");
        let graph = DependencyGraph::build(&doc);
        assert!(matches!(
            graph.node("W.x").map(|n| &n.source),
            Some(NodeSource::Invalid(_))
        ));
    }
}
