//! Conditional template engine
//!
//! The engine has two layers:
//!
//! - the expression evaluator: a mini-language over a variable map that
//!   produces a tagged [`Value`] (safety sandbox, precedence parser with a
//!   parse cache, built-in functions for version and capability checks)
//! - the template renderer: extracts `{{#if}}/{{#unless}}/{{#each}}/{{#with}}`
//!   blocks, evaluates each condition through the evaluator, expands
//!   variables, and maintains compile and result caches
//!
//! Evaluation is fully synchronous; all state the engine shares (parse
//! cache, render caches) sits behind short `parking_lot` critical sections.

pub mod ast;
pub mod evaluator;
pub mod functions;
pub mod parser;
pub mod renderer;
pub mod value;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use evaluator::Evaluator;
pub use renderer::{Compiled, RenderContext, RenderResult, TemplateRenderer};
pub use value::Value;

use thiserror::Error;

/// Errors produced by expression parsing and evaluation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// The expression tripped the safety sandbox.
    #[error("unsafe expression: {0}")]
    UnsafeExpression(String),

    /// The expression failed to parse.
    #[error("parse error at position {pos}: {message}")]
    ParseError {
        /// Human-readable description.
        message: String,
        /// Byte offset into the expression text.
        pos: usize,
    },

    /// The root name of a variable reference is absent from the scope.
    #[error("undefined variable: {0}")]
    VariableUndefined(String),

    /// A call referenced a function that is not registered.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A function was called with the wrong number of arguments.
    #[error("function {name} expects {expected} argument(s), got {got}")]
    ArityMismatch {
        /// Function name.
        name: String,
        /// Expected argument count.
        expected: usize,
        /// Actual argument count.
        got: usize,
    },

    /// An operator was applied to operands it does not accept.
    #[error("type mismatch for {op}: {left} vs {right}")]
    TypeMismatch {
        /// Operator spelling.
        op: String,
        /// Left operand kind.
        left: &'static str,
        /// Right operand kind.
        right: &'static str,
    },

    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// The right operand of `matches` is not a valid regular expression.
    #[error("invalid regular expression: {0}")]
    RegexError(String),
}

/// Result type for evaluator operations.
pub type EvalResult<T> = Result<T, EvalError>;

/// Errors produced by template rendering.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RenderError {
    /// Block recursion exceeded the configured nesting limit.
    #[error("block nesting exceeds limit of {0}")]
    NestingTooDeep(u32),

    /// A block marker is malformed or unbalanced.
    #[error("block syntax error: {0}")]
    BlockSyntaxError(String),

    /// An expression failed at the top level of a render.
    #[error(transparent)]
    Eval(#[from] EvalError),
}
