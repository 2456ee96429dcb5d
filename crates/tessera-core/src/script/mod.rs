//! # Script Language
//!
//! A JavaScript subset used by bindings and script-object functions:
//! tokenizer, AST, parser, `{{ }}` binding templates, builtins and a
//! tree-walking interpreter.

pub mod ast;
pub mod binding;
pub mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod parser;

pub use binding::BindingTemplate;
pub use interpreter::{Environment, Interpreter, ScriptHost};
pub use parser::{parse_expression, parse_function, parse_program};
