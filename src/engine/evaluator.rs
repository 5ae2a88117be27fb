//! Expression evaluator
//!
//! Walks the parsed tree against a variable scope. Parsing is cached by
//! exact input text; trees are immutable after parse and shared by
//! reference between the cache and every evaluation. User functions can
//! be registered alongside the built-ins.

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::functions;
use super::parser;
use super::value::Value;
use super::{EvalError, EvalResult};
use parking_lot::RwLock;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Signature of a registered function: a slice of evaluated arguments in,
/// a value or an evaluation error out.
pub type UserFn = dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync;

/// Variable scope handed to every evaluation.
pub type Scope = BTreeMap<String, Value>;

/// Expression evaluator with a parse cache and a function registry.
pub struct Evaluator {
    parse_cache: RwLock<HashMap<String, Arc<Expr>>>,
    functions: RwLock<HashMap<String, Arc<UserFn>>>,
}

impl Evaluator {
    /// Create an evaluator with the built-in function set registered.
    pub fn new() -> Self {
        let mut fns: HashMap<String, Arc<UserFn>> = HashMap::new();
        functions::register_builtins(&mut fns);
        Self {
            parse_cache: RwLock::new(HashMap::new()),
            functions: RwLock::new(fns),
        }
    }

    /// Register (or replace) a named function.
    pub fn register_function<F>(&self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.functions.write().insert(name.to_string(), Arc::new(f));
    }

    /// Drop all cached parse trees.
    pub fn clear_cache(&self) {
        self.parse_cache.write().clear();
    }

    /// Number of cached parse trees.
    pub fn cached_expressions(&self) -> usize {
        self.parse_cache.read().len()
    }

    /// Parse `text` (through the cache) and evaluate it against `variables`.
    pub fn evaluate(&self, text: &str, variables: &Scope) -> EvalResult<Value> {
        let extra = HashMap::new();
        self.evaluate_with(text, variables, &extra)
    }

    /// Like [`Evaluator::evaluate`], with an extra per-call function map
    /// consulted before the shared registry. The renderer uses this to
    /// honor functions carried by a render context without mutating the
    /// shared evaluator.
    pub fn evaluate_with(
        &self,
        text: &str,
        variables: &Scope,
        extra: &HashMap<String, Arc<UserFn>>,
    ) -> EvalResult<Value> {
        let expr = self.parse_cached(text)?;
        self.eval_expr(&expr, variables, extra)
    }

    fn parse_cached(&self, text: &str) -> EvalResult<Arc<Expr>> {
        if let Some(expr) = self.parse_cache.read().get(text) {
            return Ok(Arc::clone(expr));
        }
        let expr = Arc::new(parser::parse(text)?);
        self.parse_cache
            .write()
            .insert(text.to_string(), Arc::clone(&expr));
        Ok(expr)
    }

    fn eval_expr(
        &self,
        expr: &Expr,
        scope: &Scope,
        extra: &HashMap<String, Arc<UserFn>>,
    ) -> EvalResult<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::VarRef(path) => resolve_path(path, scope),
            Expr::Unary { op, child } => {
                let v = self.eval_expr(child, scope, extra)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!v.is_truthy()),
                    UnaryOp::Neg => Value::Number(-v.as_number()),
                })
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, scope, extra),
            Expr::Call { name, args } => {
                let f = match extra.get(name) {
                    Some(f) => Arc::clone(f),
                    None => self
                        .functions
                        .read()
                        .get(name)
                        .cloned()
                        .ok_or_else(|| EvalError::UnknownFunction(name.clone()))?,
                };
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval_expr(arg, scope, extra)?);
                }
                f(&evaluated)
            }
        }
    }

    fn eval_binary(
        &self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        scope: &Scope,
        extra: &HashMap<String, Arc<UserFn>>,
    ) -> EvalResult<Value> {
        // Logical operators short-circuit over truthiness.
        match op {
            BinaryOp::Or => {
                let l = self.eval_expr(left, scope, extra)?;
                if l.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                let r = self.eval_expr(right, scope, extra)?;
                return Ok(Value::Bool(r.is_truthy()));
            }
            BinaryOp::And => {
                let l = self.eval_expr(left, scope, extra)?;
                if !l.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                let r = self.eval_expr(right, scope, extra)?;
                return Ok(Value::Bool(r.is_truthy()));
            }
            _ => {}
        }

        let l = self.eval_expr(left, scope, extra)?;
        let r = self.eval_expr(right, scope, extra)?;

        match op {
            BinaryOp::Or | BinaryOp::And => unreachable!("short-circuited above"),
            BinaryOp::Xor => Ok(Value::Bool(l.is_truthy() ^ r.is_truthy())),
            BinaryOp::Eq => Ok(Value::Bool(l == r)),
            BinaryOp::Ne => Ok(Value::Bool(l != r)),
            BinaryOp::Lt => Ok(Value::Bool(l.as_number() < r.as_number())),
            BinaryOp::Le => Ok(Value::Bool(l.as_number() <= r.as_number())),
            BinaryOp::Gt => Ok(Value::Bool(l.as_number() > r.as_number())),
            BinaryOp::Ge => Ok(Value::Bool(l.as_number() >= r.as_number())),
            BinaryOp::Add => Ok(Value::Number(l.as_number() + r.as_number())),
            BinaryOp::Sub => Ok(Value::Number(l.as_number() - r.as_number())),
            BinaryOp::Mul => Ok(Value::Number(l.as_number() * r.as_number())),
            BinaryOp::Div => {
                let divisor = r.as_number();
                if divisor == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(Value::Number(l.as_number() / divisor))
            }
            BinaryOp::Mod => {
                let divisor = r.as_number();
                if divisor == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                Ok(Value::Number(l.as_number() % divisor))
            }
            BinaryOp::Contains => Ok(Value::Bool(l.to_text().contains(&r.to_text()))),
            BinaryOp::StartsWith => Ok(Value::Bool(l.to_text().starts_with(&r.to_text()))),
            BinaryOp::EndsWith => Ok(Value::Bool(l.to_text().ends_with(&r.to_text()))),
            BinaryOp::Matches => {
                let pattern =
                    Regex::new(&r.to_text()).map_err(|e| EvalError::RegexError(e.to_string()))?;
                Ok(Value::Bool(pattern.is_match(&l.to_text())))
            }
            BinaryOp::Includes => match &l {
                Value::List(xs) => Ok(Value::Bool(xs.iter().any(|el| *el == r))),
                Value::Text(s) => Ok(Value::Bool(s.contains(&r.to_text()))),
                _ => Err(EvalError::TypeMismatch {
                    op: "includes".to_string(),
                    left: l.kind(),
                    right: r.kind(),
                }),
            },
        }
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk a dotted path through nested maps. A missing intermediate key
/// yields `Null`; an absent root name is an error.
fn resolve_path(path: &[String], scope: &Scope) -> EvalResult<Value> {
    let root = match path.first() {
        Some(root) => root,
        None => return Ok(Value::Null),
    };
    let mut current = scope
        .get(root)
        .cloned()
        .ok_or_else(|| EvalError::VariableUndefined(path.join(".")))?;
    for segment in &path[1..] {
        current = match current {
            Value::Map(ref m) => m.get(segment).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        };
        if current == Value::Null {
            // Remaining segments cannot resolve any further.
            return Ok(Value::Null);
        }
    }
    Ok(current)
}
