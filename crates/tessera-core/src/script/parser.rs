//! # Script Parser
//!
//! `chumsky` grammar for the script language, run over the tokens produced by
//! [`lexer`](super::lexer).
//!
//! Before parsing, line breaks are turned into semicolons where a statement
//! can end (automatic semicolon insertion) and the token stream is checked
//! against [`MAX_NESTING_DEPTH`]. The combinators recurse once per nesting
//! level, so sources nested deeper than the limit are rejected as syntax
//! errors before the grammar runs.

use chumsky::{input::ValueInput, pratt::*, prelude::*};
use std::rc::Rc;

use super::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, FunctionExpr, Literal, LogicalOp,
    MemberProperty, Param, Program, PropertyKey, Stmt, TemplatePart, UnaryOp, UpdateOp,
};
use super::lexer::{ParseError, Span, Spanned, SyntaxError, TemplateChunk, Token, tokenize};
use crate::types::TesseraError;
use crate::value::format_number;

/// Words that can never be used as identifiers.
const KEYWORDS: &[&str] = &[
    "await", "break", "case", "catch", "const", "continue", "delete", "do", "else", "false",
    "finally", "for", "function", "if", "in", "instanceof", "let", "new", "null", "return",
    "this", "throw", "true", "try", "typeof", "var", "void", "while",
];

/// Deepest nesting of brackets, templates, operators and control statements
/// a source may reach.
pub const MAX_NESTING_DEPTH: usize = 48;

const DEPTH_EXCEEDED: &str = "Maximum nesting depth exceeded";

type Extra<'src> = extra::Err<ParseError<'src, Token<'src>>>;

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Parse a statement list.
pub fn parse_program(source: &str) -> Result<Program, TesseraError> {
    program_source(source, 0)
        .map(|body| Program { body })
        .map_err(|error| error.located(source))
}

/// Parse a single expression spanning the whole source.
pub fn parse_expression(source: &str) -> Result<Expr, TesseraError> {
    expression_source(source, 0).map_err(|error| error.located(source))
}

/// Parse a function expression (`function () {}`, `async () => x`, ...).
pub fn parse_function(source: &str) -> Result<Rc<FunctionExpr>, TesseraError> {
    match parse_expression(source)? {
        Expr::Function(function) => Ok(function),
        _ => Err(TesseraError::Syntax {
            message: "Expected a function expression".into(),
            line: 1,
            column: 1,
        }),
    }
}

fn program_source(source: &str, depth: usize) -> Result<Vec<Stmt>, SyntaxError> {
    let (tokens, depth) = prepare(source, depth)?;
    let eoi = Span::from(source.len()..source.len());
    program_parser(depth)
        .parse(tokens.as_slice().map(eoi, |Spanned { node, span }| (node, span)))
        .into_result()
        .map_err(|errors| SyntaxError::first(errors, |token| format!("Unexpected token {}", token)))
}

/// `depth` is the nesting already spent by enclosing sources (template
/// substitutions).
fn expression_source(source: &str, depth: usize) -> Result<Expr, SyntaxError> {
    let (tokens, depth) = prepare(source, depth)?;
    let eoi = Span::from(source.len()..source.len());
    expression_parser(depth)
        .parse(tokens.as_slice().map(eoi, |Spanned { node, span }| (node, span)))
        .into_result()
        .map_err(|errors| SyntaxError::first(errors, |token| format!("Unexpected token {}", token)))
}

/// Tokenize, insert semicolons and bound the nesting depth. Returns the
/// tokens and the deepest nesting reached.
fn prepare(source: &str, depth: usize) -> Result<(Vec<Spanned<Token<'_>>>, usize), SyntaxError> {
    check_bracket_nesting(source, depth)?;
    let tokens = insert_semicolons(tokenize(source)?);
    let deepest = check_nesting(&tokens, depth)?;
    Ok((tokens, deepest))
}

// =============================================================================
// SEMICOLON INSERTION
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Frame {
    /// `head` is set for `if (...)`, `while (...)`, `for (...)`, `catch (...)`.
    Paren { head: bool },
    Bracket,
    Brace,
}

/// Words after which a line break never ends a statement.
const CONTINUATION_WORDS: &[&str] = &[
    "typeof", "void", "delete", "await", "new", "in", "of", "instanceof", "else", "try",
    "finally", "let", "const", "var", "function",
];

/// Replace line breaks with `;` where the previous token can end a statement
/// and the next one cannot continue it. Inside `(...)` and `[...]` line
/// breaks are dropped.
fn insert_semicolons(tokens: Vec<Spanned<Token<'_>>>) -> Vec<Spanned<Token<'_>>> {
    let mut out: Vec<Spanned<Token<'_>>> = Vec::with_capacity(tokens.len());
    let mut frames = Vec::new();
    let mut head_closed = false;
    let mut line_break: Option<Span> = None;

    for token in tokens {
        if token.node == Token::Newline {
            if line_break.is_none() {
                line_break = Some(token.span);
            }
            continue;
        }
        if let Some(span) = line_break.take() {
            let in_statements = matches!(frames.last(), None | Some(Frame::Brace));
            let insert = in_statements
                && out.last().is_some_and(|previous| {
                    ends_statement(&previous.node, head_closed)
                        && !continues_statement(&token.node, &previous.node)
                });
            if insert {
                out.push(Spanned {
                    node: Token::Punct(";"),
                    span,
                });
            }
        }

        head_closed = false;
        match token.node {
            Token::Punct("(") => {
                let head = matches!(
                    out.last().map(|t| &t.node),
                    Some(Token::Ident("if" | "while" | "for" | "catch"))
                );
                frames.push(Frame::Paren { head });
            }
            Token::Punct("[") => frames.push(Frame::Bracket),
            Token::Punct("{") => frames.push(Frame::Brace),
            Token::Punct(")") => {
                if let Some(Frame::Paren { head }) = frames.pop() {
                    head_closed = head;
                }
            }
            Token::Punct("]" | "}") => {
                frames.pop();
            }
            _ => {}
        }
        out.push(token);
    }
    out
}

fn ends_statement(previous: &Token<'_>, head_closed: bool) -> bool {
    match previous {
        Token::Punct(")") => !head_closed,
        Token::Punct(p) => matches!(*p, "]" | "}" | "++" | "--"),
        Token::Ident(word) => !CONTINUATION_WORDS.contains(word),
        _ => true,
    }
}

fn continues_statement(next: &Token<'_>, previous: &Token<'_>) -> bool {
    match next {
        Token::Punct("++" | "--" | "!" | "...") => false,
        Token::Punct("{") => matches!(previous, Token::Punct(")")),
        Token::Punct(_) => true,
        Token::Ident("in" | "of" | "instanceof") => true,
        Token::Ident("else" | "catch" | "finally") => matches!(previous, Token::Punct("}")),
        _ => false,
    }
}

// =============================================================================
// NESTING LIMIT
// =============================================================================

/// Bound bracket and template nesting on the raw text. Template
/// substitutions are balanced by the lexer, so this has to run before it.
fn check_bracket_nesting(source: &str, base: usize) -> Result<(), SyntaxError> {
    #[derive(PartialEq)]
    enum Mode {
        Bracket,
        Template,
        Substitution,
    }

    let mut modes = Vec::new();
    let mut chars = source.char_indices().peekable();
    while let Some((offset, c)) = chars.next() {
        let opened = if modes.last() == Some(&Mode::Template) {
            match c {
                '\\' => {
                    chars.next();
                    None
                }
                '`' => {
                    modes.pop();
                    None
                }
                '$' if chars.next_if(|(_, next)| *next == '{').is_some() => {
                    Some(Mode::Substitution)
                }
                _ => None,
            }
        } else {
            match c {
                '"' | '\'' => {
                    while let Some((_, inner)) = chars.next() {
                        match inner {
                            '\\' => {
                                chars.next();
                            }
                            '\n' => break,
                            _ if inner == c => break,
                            _ => {}
                        }
                    }
                    None
                }
                '/' if chars.next_if(|(_, next)| *next == '/').is_some() => {
                    while chars.next_if(|(_, next)| *next != '\n').is_some() {}
                    None
                }
                '/' if chars.next_if(|(_, next)| *next == '*').is_some() => {
                    let mut star = false;
                    for (_, inner) in chars.by_ref() {
                        if star && inner == '/' {
                            break;
                        }
                        star = inner == '*';
                    }
                    None
                }
                '`' => Some(Mode::Template),
                '(' | '[' | '{' => Some(Mode::Bracket),
                ')' | ']' => {
                    if modes.last() == Some(&Mode::Bracket) {
                        modes.pop();
                    }
                    None
                }
                '}' => {
                    if matches!(modes.last(), Some(Mode::Bracket | Mode::Substitution)) {
                        modes.pop();
                    }
                    None
                }
                _ => None,
            }
        };
        if let Some(mode) = opened {
            modes.push(mode);
            if base + modes.len() > MAX_NESTING_DEPTH {
                return Err(SyntaxError::new(DEPTH_EXCEEDED, offset));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Scope {
    /// `if`/`while`/`for` statements whose body is still open.
    statements: usize,
    /// Operators and member or call suffixes in the current expression.
    expressions: usize,
}

impl Scope {
    fn weight(&self) -> usize {
        self.statements + self.expressions
    }
}

fn ends_operand(token: &Token<'_>) -> bool {
    match token {
        Token::Ident(word) => {
            !KEYWORDS.contains(word) || matches!(*word, "this" | "true" | "false" | "null")
        }
        Token::Punct(p) => matches!(*p, ")" | "]" | "}"),
        _ => true,
    }
}

/// Bound how deep the grammar will recurse for these tokens. Returns the
/// deepest nesting reached.
fn check_nesting(tokens: &[Spanned<Token<'_>>], base: usize) -> Result<usize, SyntaxError> {
    let mut outer = base;
    let mut scopes: Vec<Scope> = Vec::new();
    let mut current = Scope::default();
    let mut deepest = base;

    for (index, token) in tokens.iter().enumerate() {
        let follows_operand = index
            .checked_sub(1)
            .and_then(|i| tokens.get(i))
            .is_some_and(|previous| ends_operand(&previous.node));
        let next = tokens.get(index + 1).map(|t| &t.node);

        match &token.node {
            Token::Punct(open @ ("(" | "[" | "{")) => {
                if follows_operand && *open != "{" {
                    current.expressions += 1;
                }
                outer += 1 + current.weight();
                scopes.push(std::mem::take(&mut current));
            }
            Token::Punct(")" | "]" | "}") => {
                if let Some(scope) = scopes.pop() {
                    outer -= 1 + scope.weight();
                    current = scope;
                }
            }
            Token::Punct(";") => {
                current.expressions = 0;
                if !matches!(next, Some(Token::Ident("else"))) {
                    current.statements = 0;
                }
            }
            Token::Punct(",") => current.expressions = 0,
            Token::Punct(":") => {}
            Token::Punct(_) => current.expressions += 1,
            Token::Ident("if" | "while" | "for") => current.statements += 1,
            Token::Ident("typeof" | "void" | "delete" | "await" | "new" | "in" | "instanceof") => {
                current.expressions += 1;
            }
            _ => {}
        }

        let depth = outer + current.weight();
        if depth > MAX_NESTING_DEPTH {
            return Err(SyntaxError::new(DEPTH_EXCEEDED, token.span.start));
        }
        deepest = deepest.max(depth);
    }
    Ok(deepest)
}

// =============================================================================
// GRAMMAR
// =============================================================================

fn punct<'src, I>(p: &'static str) -> impl Parser<'src, I, (), Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    just(Token::Punct(p)).ignored()
}

fn word<'src, I>(w: &'static str) -> impl Parser<'src, I, (), Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    just(Token::Ident(w)).ignored()
}

/// An identifier that is not a keyword.
fn binding_name<'src, I>() -> impl Parser<'src, I, String, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    select! { Token::Ident(name) if !KEYWORDS.contains(&name) => name.to_string() }
}

/// Any identifier, keywords included.
fn property_name<'src, I>() -> impl Parser<'src, I, String, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    select! { Token::Ident(name) => name.to_string() }
}

fn operator<'src, I>(ops: &'static [&'static str]) -> impl Parser<'src, I, &'static str, Extra<'src>> + Clone
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    select! { Token::Punct(p) if ops.contains(&p) => p }
}

#[derive(Debug, Clone, Copy)]
enum Prefix {
    Unary(UnaryOp),
    Delete,
    Await,
}

enum Suffix {
    Member(MemberProperty, bool),
    Call(Vec<Expr>),
}

#[derive(Debug, Clone)]
enum EntryTail {
    Method(Vec<Param>, Vec<Stmt>),
    Value(Expr),
    Shorthand,
}

fn program_parser<'src, I>(depth: usize) -> impl Parser<'src, I, Vec<Stmt>, Extra<'src>>
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    grammar(depth).0.then_ignore(end())
}

fn expression_parser<'src, I>(depth: usize) -> impl Parser<'src, I, Expr, Extra<'src>>
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    grammar(depth)
        .1
        .then_ignore(punct(";").or_not())
        .then_ignore(end())
}

/// Statement-list and expression parsers sharing one grammar. `depth` is the
/// nesting spent so far, charged to template substitutions.
fn grammar<'src, I>(
    depth: usize,
) -> (
    impl Parser<'src, I, Vec<Stmt>, Extra<'src>> + Clone,
    impl Parser<'src, I, Expr, Extra<'src>> + Clone,
)
where
    I: ValueInput<'src, Token = Token<'src>, Span = Span>,
{
    let mut statement = Recursive::declare();
    let mut expression = Recursive::declare();

    let is_async = word("async").or_not().map(|a| a.is_some());

    let block = statement
        .clone()
        .repeated()
        .collect::<Vec<_>>()
        .delimited_by(punct("{"), punct("}"))
        .map(without_empty);

    let params = binding_name()
        .then(punct("=").ignore_then(expression.clone()).or_not())
        .map(|(name, default)| Param { name, default })
        .separated_by(punct(","))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(punct("("), punct(")"));

    let args = expression
        .clone()
        .separated_by(punct(","))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(punct("("), punct(")"));

    // ---- functions ----

    let function = group((
        is_async.clone(),
        word("function"),
        binding_name().or_not(),
        params.clone(),
        block.clone(),
    ))
    .map(|(is_async, (), name, params, body)| {
        Expr::Function(Rc::new(FunctionExpr {
            name,
            params,
            body: FunctionBody::Block(body),
            is_async,
            is_arrow: false,
        }))
    });

    let arrow_tail = punct("=>").ignore_then(choice((
        block.clone().map(FunctionBody::Block),
        expression.clone().map(FunctionBody::Expression),
    )));

    let async_arrow = word("async")
        .ignore_then(binding_name())
        .then(arrow_tail.clone())
        .map(|(name, body)| arrow(vec![Param { name, default: None }], body, true));

    // `(a, b = 1)` is read as an expression list and reinterpreted as
    // parameters when `=>` follows.
    let parenthesized = group((
        is_async.clone(),
        expression
            .clone()
            .separated_by(punct(","))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(punct("("), punct(")")),
        arrow_tail.clone().or_not(),
    ))
    .try_map(|(is_async, items, body), span| match body {
        Some(body) => arrow_params(items)
            .map(|params| arrow(params, body, is_async))
            .ok_or_else(|| ParseError::custom(span, "Invalid arrow function parameters")),
        None => match <[Expr; 1]>::try_from(items) {
            Ok([expr]) if !is_async => Ok(expr),
            _ => Err(ParseError::custom(span, "Expected '=>' after parameter list")),
        },
    });

    let identifier = binding_name()
        .then(arrow_tail.or_not())
        .map(|(name, body)| match body {
            Some(body) => arrow(vec![Param { name, default: None }], body, false),
            None => Expr::Identifier(name),
        });

    // ---- literals ----

    let literal = select! {
        Token::Number(n) => Expr::Literal(Literal::Number(n)),
        Token::Str(text) => Expr::Literal(Literal::String(text)),
        Token::Ident("true") => Expr::Literal(Literal::Bool(true)),
        Token::Ident("false") => Expr::Literal(Literal::Bool(false)),
        Token::Ident("null") => Expr::Literal(Literal::Null),
        Token::Ident("undefined") => Expr::Literal(Literal::Undefined),
        Token::Ident("this") => Expr::This,
    };

    let template = select! { Token::Template(chunks) => chunks }.try_map(move |chunks, _| {
        chunks
            .into_iter()
            .map(|chunk| match chunk {
                TemplateChunk::Text(text) => Ok(TemplatePart::Text(text)),
                TemplateChunk::Code { source, offset } => expression_source(source, depth + 1)
                    .map(TemplatePart::Expr)
                    .map_err(|error| {
                        let at = offset + error.offset;
                        ParseError::custom(Span::from(at..at), error.message)
                    }),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Expr::Template)
    });

    let array = expression
        .clone()
        .separated_by(punct(","))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(punct("["), punct("]"))
        .map(Expr::Array);

    // The flag marks keys that may stand alone as shorthand.
    let property_key = choice((
        select! { Token::Ident(name) => (PropertyKey::Named(name.to_string()), !KEYWORDS.contains(&name)) },
        select! { Token::Str(text) => (PropertyKey::Named(text), false) },
        select! { Token::Number(n) => (PropertyKey::Named(format_number(n)), false) },
        expression
            .clone()
            .delimited_by(punct("["), punct("]"))
            .map(|key| (PropertyKey::Computed(key), false)),
    ));

    let method_tail = params.clone().then(block.clone());
    let async_method = word("async")
        .ignore_then(property_key.clone())
        .then(method_tail.clone())
        .map(|((key, _), (params, body))| method(key, params, body, true));
    let entry = property_key
        .then(choice((
            method_tail.map(|(params, body)| EntryTail::Method(params, body)),
            punct(":").ignore_then(expression.clone()).map(EntryTail::Value),
            empty().to(EntryTail::Shorthand),
        )))
        .try_map(|((key, shorthand), tail), span| match (key, tail) {
            (key, EntryTail::Method(params, body)) => Ok(method(key, params, body, false)),
            (key, EntryTail::Value(value)) => Ok((key, value)),
            (PropertyKey::Named(name), EntryTail::Shorthand) if shorthand => {
                Ok((PropertyKey::Named(name.clone()), Expr::Identifier(name)))
            }
            _ => Err(ParseError::custom(span, "Expected ':' after property name")),
        });
    let object = choice((async_method, entry))
        .separated_by(punct(","))
        .allow_trailing()
        .collect::<Vec<_>>()
        .delimited_by(punct("{"), punct("}"))
        .map(Expr::Object);

    let primary = choice((
        literal,
        template,
        function,
        async_arrow,
        parenthesized,
        array,
        object,
        identifier,
    ))
    .boxed();

    // ---- member and call chains ----

    let new_expr = word("new")
        .ignore_then(primary.clone().foldl(
            punct(".").ignore_then(property_name()).repeated(),
            |object, name| member(object, MemberProperty::Named(name), false),
        ))
        .then(args.clone().or_not())
        .map(|(callee, args)| Expr::New {
            callee: Box::new(callee),
            args: args.unwrap_or_default(),
        });

    let index = expression
        .clone()
        .delimited_by(punct("["), punct("]"))
        .map(|key| MemberProperty::Computed(Box::new(key)));
    let suffix = choice((
        punct(".")
            .ignore_then(property_name())
            .map(|name| Suffix::Member(MemberProperty::Named(name), false)),
        punct("?.")
            .ignore_then(choice((
                index.clone(),
                property_name().map(MemberProperty::Named),
            )))
            .map(|property| Suffix::Member(property, true)),
        index.map(|property| Suffix::Member(property, false)),
        args.map(Suffix::Call),
    ));

    let call_member = choice((new_expr, primary))
        .foldl(suffix.repeated(), |expr, suffix| match suffix {
            Suffix::Member(property, optional) => member(expr, property, optional),
            Suffix::Call(args) => Expr::Call {
                callee: Box::new(expr),
                args,
            },
        })
        .boxed();

    // ---- operators ----

    let update_op = select! {
        Token::Punct("++") => UpdateOp::Increment,
        Token::Punct("--") => UpdateOp::Decrement,
    };
    let prefix_update = update_op
        .clone()
        .then(call_member.clone())
        .try_map(|(op, target), span| update(op, true, target, span));
    let postfix_update = call_member
        .then(update_op.or_not())
        .try_map(|(target, op), span| match op {
            Some(op) => update(op, false, target, span),
            None => Ok(target),
        });

    let prefix_op = select! {
        Token::Punct("!") => Prefix::Unary(UnaryOp::Not),
        Token::Punct("-") => Prefix::Unary(UnaryOp::Negate),
        Token::Punct("+") => Prefix::Unary(UnaryOp::Plus),
        Token::Ident("typeof") => Prefix::Unary(UnaryOp::Typeof),
        Token::Ident("void") => Prefix::Unary(UnaryOp::Void),
        Token::Ident("delete") => Prefix::Delete,
        Token::Ident("await") => Prefix::Await,
    };

    let binary = choice((prefix_update, postfix_update)).pratt((
        prefix(12, prefix_op, |op, operand, _| apply_prefix(op, operand)),
        infix(right(11), operator(&["**"]), |l, op, r, _| combine_binary(op, l, r)),
        infix(left(10), operator(&["*", "/", "%"]), |l, op, r, _| combine_binary(op, l, r)),
        infix(left(9), operator(&["+", "-"]), |l, op, r, _| combine_binary(op, l, r)),
        infix(left(7), operator(&["<", ">", "<=", ">="]), |l, op, r, _| combine_binary(op, l, r)),
        infix(left(6), operator(&["==", "!=", "===", "!=="]), |l, op, r, _| {
            combine_binary(op, l, r)
        }),
        infix(left(3), operator(&["&&"]), |l, op, r, _| combine_binary(op, l, r)),
        infix(left(2), operator(&["||"]), |l, op, r, _| combine_binary(op, l, r)),
        infix(left(1), operator(&["??"]), |l, op, r, _| combine_binary(op, l, r)),
    ));

    let conditional = binary
        .then(
            punct("?")
                .ignore_then(expression.clone())
                .then_ignore(punct(":"))
                .then(expression.clone())
                .or_not(),
        )
        .map(|(test, branches)| match branches {
            Some((consequent, alternate)) => Expr::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            None => test,
        });

    let assign_op = select! {
        Token::Punct("=") => AssignOp::Assign,
        Token::Punct("+=") => AssignOp::Compound(BinaryOp::Add),
        Token::Punct("-=") => AssignOp::Compound(BinaryOp::Sub),
        Token::Punct("*=") => AssignOp::Compound(BinaryOp::Mul),
        Token::Punct("/=") => AssignOp::Compound(BinaryOp::Div),
        Token::Punct("%=") => AssignOp::Compound(BinaryOp::Rem),
        Token::Punct("**=") => AssignOp::Compound(BinaryOp::Pow),
    };
    let assignment = conditional
        .then(assign_op.then(expression.clone()).or_not())
        .try_map(|(target, rest), span| match rest {
            None => Ok(target),
            Some((op, value)) if is_assignable(&target) => Ok(Expr::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            }),
            Some(_) => Err(ParseError::custom(span, "Invalid left-hand side in assignment")),
        });

    expression.define(assignment);

    // ---- statements ----

    let terminator = choice((punct(";"), punct("}").rewind(), end()));

    let decl_kind = select! {
        Token::Ident("let") => DeclKind::Let,
        Token::Ident("const") => DeclKind::Const,
        Token::Ident("var") => DeclKind::Var,
    };
    let declarations = decl_kind
        .clone()
        .then(
            binding_name()
                .then(punct("=").ignore_then(expression.clone()).or_not())
                .separated_by(punct(","))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .try_map(|(kind, declarations), span| {
            if kind == DeclKind::Const && declarations.iter().any(|(_, init)| init.is_none()) {
                Err(ParseError::custom(span, "Missing initializer in const declaration"))
            } else {
                Ok(Stmt::VarDecl { kind, declarations })
            }
        });

    let function_decl = group((
        is_async,
        word("function"),
        binding_name(),
        params,
        block.clone(),
    ))
    .map(|(is_async, (), name, params, body)| {
        Stmt::FunctionDecl(Rc::new(FunctionExpr {
            name: Some(name),
            params,
            body: FunctionBody::Block(body),
            is_async,
            is_arrow: false,
        }))
    });

    let condition = expression.clone().delimited_by(punct("("), punct(")"));

    let if_stmt = word("if")
        .ignore_then(condition.clone())
        .then(statement.clone())
        .then(word("else").ignore_then(statement.clone()).or_not())
        .map(|((test, consequent), alternate)| Stmt::If {
            test,
            consequent: Box::new(consequent),
            alternate: alternate.map(Box::new),
        });

    let while_stmt = word("while")
        .ignore_then(condition)
        .then(statement.clone())
        .map(|(test, body)| Stmt::While {
            test,
            body: Box::new(body),
        });

    let for_of = word("for")
        .ignore_then(
            group((decl_kind, binding_name(), word("of"), expression.clone()))
                .delimited_by(punct("("), punct(")")),
        )
        .then(statement.clone())
        .map(|((kind, binding, (), iterable), body)| Stmt::ForOf {
            kind,
            binding,
            iterable,
            body: Box::new(body),
        });

    let for_init = choice((
        punct(";").to(None),
        declarations
            .clone()
            .then_ignore(punct(";"))
            .map(|decl| Some(Box::new(decl))),
        expression
            .clone()
            .then_ignore(punct(";"))
            .map(|expr| Some(Box::new(Stmt::Expr(expr)))),
    ));
    let for_classic = word("for")
        .ignore_then(
            group((
                for_init,
                expression.clone().or_not(),
                punct(";"),
                expression.clone().or_not(),
            ))
            .delimited_by(punct("("), punct(")")),
        )
        .then(statement.clone())
        .map(|((init, test, (), update), body)| Stmt::For {
            init,
            test,
            update,
            body: Box::new(body),
        });

    let return_stmt = word("return")
        .ignore_then(expression.clone().or_not())
        .then_ignore(terminator.clone())
        .map(Stmt::Return);

    let throw_stmt = word("throw")
        .ignore_then(expression.clone())
        .then_ignore(terminator.clone())
        .map(Stmt::Throw);

    let catch_clause = word("catch")
        .ignore_then(binding_name().delimited_by(punct("("), punct(")")).or_not())
        .then(block.clone());
    let try_stmt = word("try")
        .ignore_then(block.clone())
        .then(catch_clause.or_not())
        .then(word("finally").ignore_then(block.clone()).or_not())
        .try_map(|((block, catch), finalizer), span| {
            if catch.is_none() && finalizer.is_none() {
                return Err(ParseError::custom(span, "Missing catch or finally after try"));
            }
            let (param, handler) = match catch {
                Some((param, handler)) => (param, Some(handler)),
                None => (None, None),
            };
            Ok(Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            })
        });

    statement.define(
        choice((
            block.map(Stmt::Block),
            punct(";").to(Stmt::Empty),
            declarations.then_ignore(terminator.clone()),
            function_decl,
            if_stmt,
            while_stmt,
            for_of,
            for_classic,
            return_stmt,
            word("break").then_ignore(terminator.clone()).to(Stmt::Break),
            word("continue").then_ignore(terminator.clone()).to(Stmt::Continue),
            throw_stmt,
            try_stmt,
            expression.clone().then_ignore(terminator).map(Stmt::Expr),
        ))
        .boxed(),
    );

    let program = statement.repeated().collect::<Vec<_>>().map(without_empty);
    (program, expression)
}

// =============================================================================
// AST HELPERS
// =============================================================================

/// Blocks drop the empty statements left by semicolon insertion.
fn without_empty(body: Vec<Stmt>) -> Vec<Stmt> {
    body.into_iter()
        .filter(|stmt| !matches!(stmt, Stmt::Empty))
        .collect()
}

fn arrow(params: Vec<Param>, body: FunctionBody, is_async: bool) -> Expr {
    Expr::Function(Rc::new(FunctionExpr {
        name: None,
        params,
        body,
        is_async,
        is_arrow: true,
    }))
}

fn arrow_params(items: Vec<Expr>) -> Option<Vec<Param>> {
    items
        .into_iter()
        .map(|item| match item {
            Expr::Identifier(name) => Some(Param { name, default: None }),
            Expr::Assign {
                op: AssignOp::Assign,
                target,
                value,
            } => match *target {
                Expr::Identifier(name) => Some(Param {
                    name,
                    default: Some(*value),
                }),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

fn method(key: PropertyKey, params: Vec<Param>, body: Vec<Stmt>, is_async: bool) -> (PropertyKey, Expr) {
    let name = match &key {
        PropertyKey::Named(name) => Some(name.clone()),
        PropertyKey::Computed(_) => None,
    };
    let function = FunctionExpr {
        name,
        params,
        body: FunctionBody::Block(body),
        is_async,
        is_arrow: false,
    };
    (key, Expr::Function(Rc::new(function)))
}

fn member(object: Expr, property: MemberProperty, optional: bool) -> Expr {
    Expr::Member {
        object: Box::new(object),
        property,
        optional,
    }
}

fn update<'src>(
    op: UpdateOp,
    prefix: bool,
    target: Expr,
    span: Span,
) -> Result<Expr, ParseError<'src, Token<'src>>> {
    if !is_assignable(&target) {
        let message = if prefix {
            "Invalid left-hand side in prefix operation"
        } else {
            "Invalid left-hand side in postfix operation"
        };
        return Err(ParseError::custom(span, message));
    }
    Ok(Expr::Update {
        op,
        prefix,
        target: Box::new(target),
    })
}

fn apply_prefix(op: Prefix, operand: Expr) -> Expr {
    match op {
        Prefix::Unary(op) => Expr::Unary {
            op,
            operand: Box::new(operand),
        },
        Prefix::Delete => Expr::Delete(Box::new(operand)),
        Prefix::Await => Expr::Await(Box::new(operand)),
    }
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Identifier(_) | Expr::Member { optional: false, .. }
    )
}

fn combine_binary(punct: &str, left: Expr, right: Expr) -> Expr {
    let logical = match punct {
        "&&" => Some(LogicalOp::And),
        "||" => Some(LogicalOp::Or),
        "??" => Some(LogicalOp::Nullish),
        _ => None,
    };
    if let Some(op) = logical {
        return Expr::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }
    let op = match punct {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "**" => BinaryOp::Pow,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::NotEq,
        "===" => BinaryOp::StrictEq,
        "!==" => BinaryOp::StrictNotEq,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::LtEq,
        ">" => BinaryOp::Gt,
        _ => BinaryOp::GtEq,
    };
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
