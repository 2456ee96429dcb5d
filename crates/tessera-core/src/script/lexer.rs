//! Tokenizer for the script language.
//!
//! Built from `chumsky` combinators over `&str`. Line breaks are kept as
//! [`Token::Newline`] so the parser can insert semicolons; comments are
//! dropped after lexing.

use chumsky::error::RichReason;
use chumsky::prelude::*;
use std::fmt;

use crate::types::TesseraError;
use crate::value::format_number;

pub type Span = SimpleSpan;
pub type ParseError<'src, T> = Rich<'src, T, Span>;

/// Punctuators, longest first so that greedy matching is correct.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "**=", "...", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "++", "--", "+=",
    "-=", "*=", "/=", "%=", "**", "{", "}", "(", ")", "[", "]", ";", ",", "<", ">", "+", "-", "*",
    "/", "%", "!", "?", ":", "=", ".",
];

#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk<'src> {
    Text(String),
    /// A `${ ... }` substitution; `offset` is where `source` starts in the
    /// lexer input.
    Code { source: &'src str, offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token<'src> {
    Number(f64),
    Str(String),
    Template(Vec<TemplateChunk<'src>>),
    Ident(&'src str),
    Punct(&'static str),
    Newline,
    Comment,
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Number(n) => f.write_str(&format_number(*n)),
            Self::Str(_) => f.write_str("string"),
            Self::Template(_) => f.write_str("template"),
            Self::Ident(name) => write!(f, "'{}'", name),
            Self::Punct(p) => write!(f, "'{}'", p),
            Self::Newline => f.write_str("line break"),
            Self::Comment => f.write_str("comment"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

// =============================================================================
// ERRORS
// =============================================================================

/// A syntax error positioned by byte offset into the text being parsed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SyntaxError {
    pub message: String,
    pub offset: usize,
}

impl SyntaxError {
    pub(crate) fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }

    /// Keep the first error chumsky reports.
    pub(crate) fn first<T>(
        errors: Vec<ParseError<'_, T>>,
        describe: impl Fn(&T) -> String,
    ) -> Self {
        let Some(error) = errors.into_iter().next() else {
            return Self::new("Unexpected end of input", 0);
        };
        let message = match error.reason() {
            RichReason::Custom(message) => message.clone(),
            _ => error
                .found()
                .map_or_else(|| "Unexpected end of input".to_string(), |found| describe(found)),
        };
        Self::new(message, error.span().start)
    }

    /// Resolve the offset to a line and column of `source`.
    pub(crate) fn located(self, source: &str) -> TesseraError {
        let (line, column) = position(source, self.offset);
        TesseraError::Syntax {
            message: self.message,
            line,
            column,
        }
    }
}

/// 1-based line and column of a byte offset.
pub(crate) fn position(source: &str, offset: usize) -> (usize, usize) {
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let column = before.rsplit('\n').next().map_or(0, |tail| tail.chars().count()) + 1;
    (line, column)
}

// =============================================================================
// LEXER
// =============================================================================

fn is_ident_start(c: &char) -> bool {
    c.is_alphabetic() || *c == '_' || *c == '$'
}

fn is_ident_char(c: &char) -> bool {
    c.is_alphanumeric() || *c == '_' || *c == '$'
}

pub fn lexer<'src>()
-> impl Parser<'src, &'src str, Vec<Spanned<Token<'src>>>, extra::Err<ParseError<'src, char>>> {
    let digits = any().filter(char::is_ascii_digit).repeated().at_least(1);

    let hex = just('0')
        .then(one_of("xX"))
        .ignore_then(any().filter(char::is_ascii_hexdigit).repeated().at_least(1).to_slice())
        .try_map(|digits: &str, span| {
            i64::from_str_radix(digits, 16)
                .map(|n| n as f64)
                .map_err(|_| ParseError::custom(span, "Invalid hexadecimal literal"))
        });

    // `1.toFixed` is a member access, not a fraction.
    let fraction = just('.')
        .then(any().filter(is_ident_start).not())
        .then(any().filter(char::is_ascii_digit).repeated());
    let integer = any()
        .filter(char::is_ascii_digit)
        .then(any().filter(|c: &char| c.is_ascii_digit() || *c == '_').repeated());
    let exponent = one_of("eE").then(one_of("+-").or_not()).then(digits.clone());
    let decimal = choice((
        integer.then(fraction.or_not()).ignored(),
        just('.').then(digits).ignored(),
    ))
    .then(exponent.or_not())
    .to_slice()
    .try_map(|text: &str, span| {
        text.replace('_', "")
            .parse::<f64>()
            .map_err(|_| ParseError::custom(span, format!("Invalid number literal '{}'", text)))
    });

    let number = choice((hex, decimal))
        .then(any().filter(is_ident_char).rewind().or_not())
        .try_map(|(value, trailing), span| match trailing {
            Some(_) => Err(ParseError::custom(span, "Identifier directly after number")),
            None => Ok(Token::Number(value)),
        });

    let hex_code = |len: usize| {
        any()
            .filter(char::is_ascii_hexdigit)
            .repeated()
            .exactly(len)
            .to_slice()
            .try_map(|digits: &str, span| {
                u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| ParseError::custom(span, "Invalid escape code point"))
            })
    };

    // `None` is a line continuation.
    let escape = just('\\').ignore_then(choice((
        just('\n').to(None),
        just('x').ignore_then(hex_code(2)).map(Some),
        just('u').ignore_then(hex_code(4)).map(Some),
        any().map(|c| {
            Some(match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                'b' => '\u{8}',
                'f' => '\u{c}',
                'v' => '\u{b}',
                '0' => '\0',
                other => other,
            })
        }),
    )));

    let quoted = |quote: char| {
        just(quote)
            .ignore_then(
                choice((escape.clone(), none_of([quote, '\\', '\n']).map(Some)))
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .then_ignore(just(quote))
            .map(|chars| chars.into_iter().flatten().collect::<String>())
    };

    // Substitution source with balanced braces; string literals may hold
    // unbalanced ones.
    let substitution = recursive(|substitution| {
        choice((
            just('{').then(substitution).then(just('}')).ignored(),
            quoted('"').ignored(),
            quoted('\'').ignored(),
            just('`').then(none_of('`').repeated()).then(just('`')).ignored(),
            none_of("{}\"'`").ignored(),
        ))
        .repeated()
        .to_slice()
    });

    let template_code = just("${")
        .ignore_then(substitution)
        .then_ignore(just('}'))
        .map_with(|source: &str, extra| {
            let span: Span = extra.span();
            TemplateChunk::Code {
                source,
                offset: span.start + 2,
            }
        });
    let template_text = choice((
        escape.clone(),
        none_of("`\\$").map(Some),
        just('$').then_ignore(just('{').not()).map(Some),
    ))
    .repeated()
    .at_least(1)
    .collect::<Vec<_>>()
    .map(|chars| TemplateChunk::Text(chars.into_iter().flatten().collect()));
    let template = just('`')
        .ignore_then(choice((template_code, template_text)).repeated().collect::<Vec<_>>())
        .then_ignore(just('`'))
        .map(Token::Template);

    let ident = any()
        .filter(is_ident_start)
        .then(any().filter(is_ident_char).repeated())
        .to_slice()
        .map(Token::Ident);

    // `a ? .5 : 1` is a conditional, not optional chaining.
    let optional_chain = just("?.")
        .then(any().filter(char::is_ascii_digit).not())
        .to(Token::Punct("?."));
    let punctuator = optional_chain.or(choice(
        PUNCTUATORS
            .iter()
            .map(|p| just(*p).to(Token::Punct(*p)))
            .collect::<Vec<_>>(),
    ));

    let line_comment = just("//").then(none_of('\n').repeated()).to(Token::Comment);
    let block_comment = just("/*")
        .ignore_then(any().and_is(just("*/").not()).repeated().to_slice())
        .then_ignore(just("*/"))
        .map(|body: &str| {
            if body.contains('\n') {
                Token::Newline
            } else {
                Token::Comment
            }
        });

    let token = choice((
        line_comment,
        block_comment,
        just('\n').to(Token::Newline),
        number,
        quoted('"').map(Token::Str),
        quoted('\'').map(Token::Str),
        template,
        ident,
        punctuator,
    ));

    let inline_space = any()
        .filter(|c: &char| c.is_whitespace() && *c != '\n')
        .repeated();

    inline_space.clone().ignore_then(
        token
            .map_with(|node, extra| Spanned {
                node,
                span: extra.span(),
            })
            .then_ignore(inline_space)
            .repeated()
            .collect(),
    )
}

/// Split source text into tokens, comments removed.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned<Token<'_>>>, SyntaxError> {
    let mut tokens = lexer()
        .then_ignore(end())
        .parse(source)
        .into_result()
        .map_err(|errors| SyntaxError::first(errors, |c| format!("Unexpected character '{}'", c)))?;
    tokens.retain(|token| token.node != Token::Comment);
    Ok(tokens)
}
