//! Conditional block renderer
//!
//! Processes `{{#if}}/{{#unless}}/{{#each}}/{{#with}}` regions with an
//! optional `{{else}}` branch, then substitutes `{{ path }}` variable
//! markers with the text form of the evaluated value. Nested blocks are
//! handled by recursion on the block body.
//!
//! Block rewrites are applied from the highest start position to the
//! lowest so span indices stay valid during rewrite. A compiled-template
//! cache and a rendered-result cache (keyed by template and variable
//! fingerprints) sit in front of the work; both evict in insertion order.

use super::evaluator::{Evaluator, Scope, UserFn};
use super::value::Value;
use super::{EvalError, RenderError};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Default recursion limit for nested blocks.
pub const DEFAULT_MAX_NESTING: u32 = 10;

/// Default bound for the compile and result caches.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 1_000;

static MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\{\{(?:#(if|unless|each|with)\s+(.+?)|/(if|unless|each|with)|(else))\}\}")
        .expect("block marker pattern")
});

static VARIABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^#/{}][^{}]*?)\s*\}\}").expect("variable marker pattern"));

static TRIPLE_NEWLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n{3,}").expect("newline collapse pattern"));

/// Block kinds recognized by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Emit the body when the condition is truthy.
    If,
    /// Emit the body when the condition is falsy.
    Unless,
    /// Iterate a list, binding `this`, `@index`, `@first`, `@last`.
    Each,
    /// Splice a map's entries into scope for the body.
    With,
}

impl BlockKind {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "if" => Some(BlockKind::If),
            "unless" => Some(BlockKind::Unless),
            "each" => Some(BlockKind::Each),
            "with" => Some(BlockKind::With),
            _ => None,
        }
    }
}

/// An extracted template block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// The block kind.
    pub kind: BlockKind,
    /// Condition text, trimmed.
    pub condition: String,
    /// Body between the open marker and the `{{else}}`/close marker.
    pub body: String,
    /// Optional else branch.
    pub else_text: Option<String>,
    /// Byte span of the whole block in the source text.
    pub span: (usize, usize),
}

/// Context handed to every render call.
#[derive(Clone)]
pub struct RenderContext {
    /// Variable scope for expression evaluation and substitution.
    pub variables: Scope,
    /// Per-render functions, consulted before the shared registry.
    pub functions: HashMap<String, Arc<UserFn>>,
    /// Attach timing and cache information to the result.
    pub debug: bool,
    /// Consult and populate the rendered-result cache.
    pub cache_enabled: bool,
    /// Maximum block nesting depth.
    pub max_nesting: u32,
}

impl Default for RenderContext {
    fn default() -> Self {
        Self {
            variables: Scope::new(),
            functions: HashMap::new(),
            debug: false,
            cache_enabled: true,
            max_nesting: DEFAULT_MAX_NESTING,
        }
    }
}

impl RenderContext {
    /// Context with the given variables and default settings.
    pub fn with_variables(variables: Scope) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }
}

/// Outcome of a render. A failed render never panics; it reports
/// `ok: false` with the errors collected.
#[derive(Debug, Clone, Default)]
pub struct RenderResult {
    /// True when the render completed without top-level errors.
    pub ok: bool,
    /// The rendered text (empty on top-level failure).
    pub text: String,
    /// Top-level errors.
    pub errors: Vec<String>,
    /// Per-block degradations.
    pub warnings: Vec<String>,
    /// Timing and cache details when the context asked for them.
    pub debug: Option<RenderDebugInfo>,
}

/// Debug payload attached when `RenderContext::debug` is set.
#[derive(Debug, Clone, Default)]
pub struct RenderDebugInfo {
    /// Wall time of the render in microseconds.
    pub elapsed_micros: u128,
    /// Whether the result came from the rendered-result cache.
    pub from_cache: bool,
    /// Top-level blocks processed.
    pub blocks: usize,
}

/// A template with its top-level blocks extracted.
#[derive(Debug, Clone)]
pub struct Compiled {
    /// Original template text.
    pub source: String,
    /// Fingerprint of the source, used as a cache key component.
    pub fingerprint: String,
    /// Top-level blocks, ordered by start position.
    pub blocks: Vec<Block>,
}

/// Hit/miss counters for one renderer cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounters {
    /// Lookups that found an entry.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Fresh compilations performed.
    pub compilations: u64,
    /// Entries dropped to stay within the size bound.
    pub evictions: u64,
}

/// Insertion-ordered bounded cache used for compiled templates and
/// rendered results.
struct BoundedCache<T> {
    map: HashMap<String, T>,
    order: VecDeque<String>,
    capacity: usize,
    counters: CacheCounters,
}

impl<T: Clone> BoundedCache<T> {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            counters: CacheCounters::default(),
        }
    }

    fn get(&mut self, key: &str) -> Option<T> {
        match self.map.get(key) {
            Some(v) => {
                self.counters.hits += 1;
                Some(v.clone())
            }
            None => {
                self.counters.misses += 1;
                None
            }
        }
    }

    fn insert(&mut self, key: String, value: T) {
        if self.map.contains_key(&key) {
            self.map.insert(key, value);
            return;
        }
        while self.map.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
                self.counters.evictions += 1;
            } else {
                break;
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }

    fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

/// The block renderer.
pub struct TemplateRenderer {
    evaluator: Arc<Evaluator>,
    compile_cache: RwLock<BoundedCache<Arc<Compiled>>>,
    result_cache: RwLock<BoundedCache<String>>,
}

impl TemplateRenderer {
    /// Renderer with a fresh evaluator and default cache bounds.
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(Evaluator::new()), DEFAULT_MAX_CACHE_SIZE)
    }

    /// Renderer over a shared evaluator and an explicit cache bound.
    pub fn with_evaluator(evaluator: Arc<Evaluator>, max_cache_size: usize) -> Self {
        Self {
            evaluator,
            compile_cache: RwLock::new(BoundedCache::new(max_cache_size)),
            result_cache: RwLock::new(BoundedCache::new(max_cache_size)),
        }
    }

    /// The evaluator used for conditions and substitutions.
    pub fn evaluator(&self) -> &Arc<Evaluator> {
        &self.evaluator
    }

    /// Compile a template: extract its top-level blocks, through the
    /// compile cache.
    pub fn compile(&self, template: &str) -> Result<Arc<Compiled>, RenderError> {
        if let Some(compiled) = self.compile_cache.write().get(template) {
            return Ok(compiled);
        }
        let blocks = extract_blocks(template)?;
        let compiled = Arc::new(Compiled {
            source: template.to_string(),
            fingerprint: fingerprint(template.as_bytes()),
            blocks,
        });
        let mut cache = self.compile_cache.write();
        cache.counters.compilations += 1;
        cache.insert(template.to_string(), Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Render a template against a context.
    pub fn render(&self, template: &str, ctx: &RenderContext) -> RenderResult {
        let started = Instant::now();
        let compiled = match self.compile(template) {
            Ok(compiled) => compiled,
            Err(e) => return failure(e.to_string(), ctx, started),
        };
        self.render_compiled_timed(&compiled, ctx, started)
    }

    /// Render a previously compiled template.
    pub fn render_compiled(&self, compiled: &Compiled, ctx: &RenderContext) -> RenderResult {
        self.render_compiled_timed(compiled, ctx, Instant::now())
    }

    fn render_compiled_timed(
        &self,
        compiled: &Compiled,
        ctx: &RenderContext,
        started: Instant,
    ) -> RenderResult {
        let cache_key = if result_cacheable(ctx) {
            let key = result_key(&compiled.fingerprint, &ctx.variables);
            if let Some(text) = self.result_cache.write().get(&key) {
                return RenderResult {
                    ok: true,
                    text,
                    errors: Vec::new(),
                    warnings: Vec::new(),
                    debug: ctx.debug.then(|| RenderDebugInfo {
                        elapsed_micros: started.elapsed().as_micros(),
                        from_cache: true,
                        blocks: compiled.blocks.len(),
                    }),
                };
            }
            Some(key)
        } else {
            None
        };

        let mut warnings = Vec::new();
        let text = match self.render_body(
            &compiled.source,
            Some(compiled.blocks.as_slice()),
            ctx,
            0,
            &mut warnings,
        ) {
            Ok(text) => text,
            Err(e) => return failure_with_warnings(e.to_string(), warnings, ctx, started),
        };

        let text = TRIPLE_NEWLINE_RE.replace_all(&text, "\n\n").into_owned();

        if let Some(key) = cache_key {
            self.result_cache.write().insert(key, text.clone());
        }

        RenderResult {
            ok: true,
            text,
            errors: Vec::new(),
            warnings,
            debug: ctx.debug.then(|| RenderDebugInfo {
                elapsed_micros: started.elapsed().as_micros(),
                from_cache: false,
                blocks: compiled.blocks.len(),
            }),
        }
    }

    /// Counters for the compile cache.
    pub fn compile_stats(&self) -> CacheCounters {
        self.compile_cache.read().counters
    }

    /// Counters for the rendered-result cache.
    pub fn result_stats(&self) -> CacheCounters {
        self.result_cache.read().counters
    }

    /// Drop both caches.
    pub fn clear_caches(&self) {
        self.compile_cache.write().clear();
        self.result_cache.write().clear();
    }

    /// Render one nesting level: rewrite blocks from the highest start
    /// position to the lowest, then substitute variable markers with this
    /// level's scope.
    fn render_body(
        &self,
        text: &str,
        precomputed: Option<&[Block]>,
        ctx: &RenderContext,
        depth: u32,
        warnings: &mut Vec<String>,
    ) -> Result<String, RenderError> {
        if depth > ctx.max_nesting {
            return Err(RenderError::NestingTooDeep(ctx.max_nesting));
        }

        let owned;
        let blocks: &[Block] = match precomputed {
            Some(blocks) => blocks,
            None => {
                owned = extract_blocks(text)?;
                &owned
            }
        };

        let mut result = text.to_string();
        for block in blocks.iter().rev() {
            let replacement = self.render_block(block, ctx, depth, warnings)?;
            result.replace_range(block.span.0..block.span.1, &replacement);
        }

        Ok(self.substitute_variables(&result, ctx, warnings))
    }

    fn render_block(
        &self,
        block: &Block,
        ctx: &RenderContext,
        depth: u32,
        warnings: &mut Vec<String>,
    ) -> Result<String, RenderError> {
        let condition = self
            .evaluator
            .evaluate_with(&block.condition, &ctx.variables, &ctx.functions);

        match block.kind {
            BlockKind::If | BlockKind::Unless => {
                let truthy = match condition {
                    Ok(v) => v.is_truthy(),
                    Err(e) => {
                        // A failed condition degrades: falsy for `if`,
                        // truthy for `unless` (the else branch either way).
                        warnings.push(format!(
                            "condition `{}` failed: {}",
                            block.condition, e
                        ));
                        block.kind == BlockKind::Unless
                    }
                };
                let emit_body = match block.kind {
                    BlockKind::If => truthy,
                    _ => !truthy,
                };
                if emit_body {
                    self.render_body(&block.body, None, ctx, depth + 1, warnings)
                } else if let Some(else_text) = &block.else_text {
                    self.render_body(else_text, None, ctx, depth + 1, warnings)
                } else {
                    Ok(String::new())
                }
            }
            BlockKind::Each => {
                let items = match condition {
                    Ok(Value::List(items)) => items,
                    Ok(other) => {
                        warnings.push(format!(
                            "each expects a list, `{}` evaluated to {}",
                            block.condition,
                            other.kind()
                        ));
                        return self.render_else(block, ctx, depth, warnings);
                    }
                    Err(e) => {
                        warnings.push(format!(
                            "condition `{}` failed: {}",
                            block.condition, e
                        ));
                        return self.render_else(block, ctx, depth, warnings);
                    }
                };

                let len = items.len();
                let mut out = String::new();
                for (i, item) in items.into_iter().enumerate() {
                    let mut child = ctx.clone();
                    child.variables.insert("this".to_string(), item);
                    child
                        .variables
                        .insert("@index".to_string(), Value::Number(i as f64));
                    child
                        .variables
                        .insert("@first".to_string(), Value::Bool(i == 0));
                    child
                        .variables
                        .insert("@last".to_string(), Value::Bool(i + 1 == len));
                    match self.render_body(&block.body, None, &child, depth + 1, warnings) {
                        Ok(rendered) => out.push_str(&rendered),
                        Err(RenderError::NestingTooDeep(limit)) => {
                            return Err(RenderError::NestingTooDeep(limit));
                        }
                        Err(e) => {
                            // A failed iteration contributes nothing.
                            warnings.push(format!("each iteration {} failed: {}", i, e));
                        }
                    }
                }
                Ok(out)
            }
            BlockKind::With => {
                let scoped = match condition {
                    Ok(Value::Map(entries)) => entries,
                    Ok(other) => {
                        warnings.push(format!(
                            "with expects a map, `{}` evaluated to {}",
                            block.condition,
                            other.kind()
                        ));
                        return self.render_else(block, ctx, depth, warnings);
                    }
                    Err(e) => {
                        warnings.push(format!(
                            "condition `{}` failed: {}",
                            block.condition, e
                        ));
                        return self.render_else(block, ctx, depth, warnings);
                    }
                };

                let mut child = ctx.clone();
                for (k, v) in scoped {
                    // Scoped entries win on key collision.
                    child.variables.insert(k, v);
                }
                match self.render_body(&block.body, None, &child, depth + 1, warnings) {
                    Ok(rendered) => Ok(rendered),
                    Err(RenderError::NestingTooDeep(limit)) => {
                        Err(RenderError::NestingTooDeep(limit))
                    }
                    Err(e) => {
                        warnings.push(format!("with body failed: {}", e));
                        Ok(String::new())
                    }
                }
            }
        }
    }

    fn render_else(
        &self,
        block: &Block,
        ctx: &RenderContext,
        depth: u32,
        warnings: &mut Vec<String>,
    ) -> Result<String, RenderError> {
        match &block.else_text {
            Some(else_text) => self.render_body(else_text, None, ctx, depth + 1, warnings),
            None => Ok(String::new()),
        }
    }

    fn substitute_variables(
        &self,
        text: &str,
        ctx: &RenderContext,
        warnings: &mut Vec<String>,
    ) -> String {
        VARIABLE_RE
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let inner = caps[1].trim();
                if inner == "else" {
                    return caps[0].to_string();
                }
                match self
                    .evaluator
                    .evaluate_with(inner, &ctx.variables, &ctx.functions)
                {
                    Ok(value) => value.to_text(),
                    Err(EvalError::VariableUndefined(path)) => {
                        warnings.push(format!("undefined variable `{}`", path));
                        String::new()
                    }
                    Err(e) => {
                        warnings.push(format!("substitution `{}` failed: {}", inner, e));
                        String::new()
                    }
                }
            })
            .into_owned()
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract all top-level blocks of every kind, ordered by start position.
/// Nested blocks stay inside their parent's body and are extracted again
/// when the body is rendered.
pub fn extract_blocks(text: &str) -> Result<Vec<Block>, RenderError> {
    struct OpenBlock {
        kind: BlockKind,
        condition: String,
        open_start: usize,
        body_start: usize,
        else_span: Option<(usize, usize)>,
    }

    let mut blocks = Vec::new();
    let mut stack: Vec<OpenBlock> = Vec::new();

    for caps in MARKER_RE.captures_iter(text) {
        let whole = caps.get(0).expect("match span");

        if let Some(open_tag) = caps.get(1) {
            let kind = BlockKind::parse(open_tag.as_str())
                .ok_or_else(|| RenderError::BlockSyntaxError("unknown block kind".into()))?;
            stack.push(OpenBlock {
                kind,
                condition: caps[2].trim().to_string(),
                open_start: whole.start(),
                body_start: whole.end(),
                else_span: None,
            });
        } else if let Some(close_tag) = caps.get(3) {
            let kind = BlockKind::parse(close_tag.as_str())
                .ok_or_else(|| RenderError::BlockSyntaxError("unknown block kind".into()))?;
            let open = stack.pop().ok_or_else(|| {
                RenderError::BlockSyntaxError(format!(
                    "unmatched closing marker {{{{/{}}}}} at {}",
                    close_tag.as_str(),
                    whole.start()
                ))
            })?;
            if open.kind != kind {
                return Err(RenderError::BlockSyntaxError(format!(
                    "mismatched block: opened {:?}, closed {:?}",
                    open.kind, kind
                )));
            }
            if stack.is_empty() {
                let (body, else_text) = match open.else_span {
                    Some((else_start, else_end)) => (
                        text[open.body_start..else_start].to_string(),
                        Some(text[else_end..whole.start()].to_string()),
                    ),
                    None => (text[open.body_start..whole.start()].to_string(), None),
                };
                blocks.push(Block {
                    kind: open.kind,
                    condition: open.condition,
                    body,
                    else_text,
                    span: (open.open_start, whole.end()),
                });
            }
        } else if caps.get(4).is_some() {
            // `{{else}}` binds to the innermost open block; only the
            // top-level block's else matters at this extraction level.
            let stack_len = stack.len();
            match stack.last_mut() {
                Some(open) if stack_len == 1 => {
                    open.else_span = Some((whole.start(), whole.end()));
                }
                Some(_) => {}
                None => {
                    return Err(RenderError::BlockSyntaxError(format!(
                        "stray {{{{else}}}} at {}",
                        whole.start()
                    )));
                }
            }
        }
    }

    if let Some(open) = stack.first() {
        return Err(RenderError::BlockSyntaxError(format!(
            "unclosed {:?} block at {}",
            open.kind, open.open_start
        )));
    }

    blocks.sort_by_key(|b| b.span.0);
    Ok(blocks)
}

fn result_cacheable(ctx: &RenderContext) -> bool {
    ctx.cache_enabled && !ctx.variables.keys().any(|k| k.starts_with('@'))
}

fn result_key(template_fp: &str, variables: &Scope) -> String {
    let canonical = serde_json::to_string(variables).unwrap_or_default();
    let vars_fp = fingerprint(canonical.as_bytes());
    fingerprint(format!("{}\u{1f}{}", template_fp, vars_fp).as_bytes())
}

fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn failure(message: String, ctx: &RenderContext, started: Instant) -> RenderResult {
    failure_with_warnings(message, Vec::new(), ctx, started)
}

fn failure_with_warnings(
    message: String,
    warnings: Vec<String>,
    ctx: &RenderContext,
    started: Instant,
) -> RenderResult {
    RenderResult {
        ok: false,
        text: String::new(),
        errors: vec![message],
        warnings,
        debug: ctx.debug.then(|| RenderDebugInfo {
            elapsed_micros: started.elapsed().as_micros(),
            from_cache: false,
            blocks: 0,
        }),
    }
}
