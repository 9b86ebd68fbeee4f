//! Bundled reference engine.
//!
//! `MiniEngine` interprets a small, deterministic script subset sufficient to
//! exercise every scheduler path: broadcast compilation, function calls over
//! JSON-serialized values, non-terminating bodies for timeout supervision,
//! and forced termination with reset.
//!
//! Supported scripts are sequences of statements; `function name(a, b) { .. }`
//! definitions are registered into the context, everything else is only
//! syntax-checked. Bodies are one of:
//! - `return <expr>;` where `<expr>` is a `+`-chain of `Number(x)` casts,
//!   parameters, and string/number literals with JS-like add semantics
//! - a spin loop (`while (true)` / `for (;;)`) that only exits when the
//!   termination flag is raised
//! - empty or unrecognized statements, which evaluate to `null`

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde_json::Value;

use crate::module::registry;
use crate::module::ModuleCache;

use super::{EngineError, ExecutionEngine, Terminator};

/// How often a spinning call polls the termination flag.
const SPIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

fn func_head_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"function\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*\(([^()]*)\)\s*\{")
            .unwrap_or_else(|e| panic!("invalid function-head regex: {}", e))
    })
}

fn spin_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"while\s*\(\s*true\s*\)|for\s*\(\s*;\s*;\s*\)")
            .unwrap_or_else(|e| panic!("invalid spin regex: {}", e))
    })
}

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$")
            .unwrap_or_else(|e| panic!("invalid identifier regex: {}", e))
    })
}

/// A single term in an additive expression.
#[derive(Debug, Clone)]
enum Term {
    NumLit(f64),
    StrLit(String),
    Var(String),
    NumberCast(Box<Term>),
}

#[derive(Debug, Clone)]
struct Expr {
    terms: Vec<Term>,
}

#[derive(Debug, Clone)]
enum Body {
    Empty,
    Spin,
    Return(Expr),
}

#[derive(Debug, Clone)]
struct ScriptFn {
    params: Vec<String>,
    body: Body,
}

/// Intermediate value during evaluation.
enum EvalValue {
    Num(f64),
    Str(String),
    Null,
}

/// Latched termination request, shared with supervisor threads.
#[derive(Default)]
struct InterruptFlag(AtomicBool);

impl InterruptFlag {
    fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Terminator for InterruptFlag {
    fn terminate(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// The bundled deterministic script engine. One instance per worker.
pub struct MiniEngine {
    functions: HashMap<String, ScriptFn>,
    interrupt: Arc<InterruptFlag>,
    modules: Option<Arc<ModuleCache>>,
}

impl MiniEngine {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
            interrupt: Arc::new(InterruptFlag::default()),
            modules: None,
        }
    }

    /// Attach a zone module cache consulted for `module.function` calls.
    pub fn with_modules(mut self, modules: Arc<ModuleCache>) -> Self {
        self.modules = Some(modules);
        self
    }

    fn run_function(&self, func: &ScriptFn, args: &[String]) -> Result<String, EngineError> {
        let mut scope: HashMap<String, Value> = HashMap::new();
        for (i, param) in func.params.iter().enumerate() {
            scope.insert(param.clone(), parse_arg(args.get(i)));
        }

        match &func.body {
            Body::Empty => Ok("null".to_string()),
            Body::Spin => {
                // Non-cooperative computation: only the termination flag,
                // raised by a supervisor, gets us out of here.
                loop {
                    if self.interrupt.is_raised() {
                        return Err(EngineError::Terminated);
                    }
                    std::thread::sleep(SPIN_POLL_INTERVAL);
                }
            }
            Body::Return(expr) => {
                let value = eval_expr(expr, &scope)?;
                Ok(serialize(value))
            }
        }
    }

    /// Dispatch a `module.function` call to a builtin or zone native module.
    fn call_native(&self, module: &str, function: &str, args: &[String]) -> Result<String, EngineError> {
        let native = registry::builtin(module)
            .map(|m| m.function(function))
            .or_else(|| {
                self.modules
                    .as_ref()
                    .and_then(|cache| cache.get(module))
                    .map(|m| m.function(function))
            });

        let native_fn = match native {
            Some(Some(f)) => f,
            Some(None) => {
                return Err(EngineError::Runtime(format!(
                    "{}.{} is not defined",
                    module, function
                )))
            }
            None => {
                return Err(EngineError::Runtime(format!(
                    "{} is not defined",
                    function
                )))
            }
        };

        let values: Vec<Value> = args.iter().map(|a| parse_arg(Some(a))).collect();
        let result = native_fn(&values).map_err(EngineError::Runtime)?;
        serde_json::to_string(&result)
            .map_err(|e| EngineError::Runtime(format!("unsupported return value: {}", e)))
    }
}

impl Default for MiniEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionEngine for MiniEngine {
    fn compile(&mut self, script: &str) -> Result<(), EngineError> {
        syntax_check(script)?;

        for caps in func_head_re().captures_iter(script) {
            let whole = caps.get(0).ok_or_else(|| {
                EngineError::Compile("malformed function definition".to_string())
            })?;
            let name = caps[1].to_string();
            let params: Vec<String> = caps[2]
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();

            let body_src = extract_body(&script[whole.end()..])?;
            let body = parse_body(body_src)?;
            // Redefinition replaces the previous registration, like a
            // re-declared script function would.
            self.functions.insert(name, ScriptFn { params, body });
        }

        Ok(())
    }

    fn call(&mut self, function: &str, args: &[String]) -> Result<String, EngineError> {
        if self.interrupt.is_raised() {
            // A latched termination fails everything until reset confirms
            // the context is sound again.
            return Err(EngineError::Terminated);
        }

        if let Some(func) = self.functions.get(function) {
            let func = func.clone();
            return self.run_function(&func, args);
        }

        if let Some((module, name)) = function.rsplit_once('.') {
            return self.call_native(module, name, args);
        }

        Err(EngineError::Runtime(format!("{} is not defined", function)))
    }

    fn terminator(&self) -> Arc<dyn Terminator> {
        self.interrupt.clone()
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.interrupt.clear();
        Ok(())
    }
}

/// Parse a serialized argument; non-JSON input degrades to a raw string.
fn parse_arg(arg: Option<&String>) -> Value {
    match arg {
        None => Value::Null,
        Some(raw) => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone())),
    }
}

/// Reject scripts with unbalanced delimiters or a dangling binary operator.
fn syntax_check(script: &str) -> Result<(), EngineError> {
    let mut paren = 0i32;
    let mut brace = 0i32;
    let mut bracket = 0i32;
    let mut string_quote: Option<char> = None;
    let mut escaped = false;
    let mut last_significant: Option<char> = None;

    for ch in script.chars() {
        if let Some(quote) = string_quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                string_quote = None;
                last_significant = Some(quote);
            }
            continue;
        }

        match ch {
            '\'' | '"' => string_quote = Some(ch),
            '(' => paren += 1,
            ')' => paren -= 1,
            '{' => brace += 1,
            '}' => brace -= 1,
            '[' => bracket += 1,
            ']' => bracket -= 1,
            _ => {}
        }
        if paren < 0 || brace < 0 || bracket < 0 {
            return Err(EngineError::Compile("unbalanced delimiters".to_string()));
        }
        if !ch.is_whitespace() {
            last_significant = Some(ch);
        }
    }

    if string_quote.is_some() {
        return Err(EngineError::Compile("unterminated string literal".to_string()));
    }
    if paren != 0 || brace != 0 || bracket != 0 {
        return Err(EngineError::Compile("unbalanced delimiters".to_string()));
    }
    if let Some(ch) = last_significant {
        if matches!(ch, '+' | '-' | '*' | '/' | '=' | ',') {
            return Err(EngineError::Compile(format!(
                "unexpected end of input after '{}'",
                ch
            )));
        }
    }

    Ok(())
}

/// Slice out a brace-balanced function body. `rest` starts just after the
/// opening brace.
fn extract_body(rest: &str) -> Result<&str, EngineError> {
    let mut depth = 1i32;
    let mut string_quote: Option<char> = None;
    let mut escaped = false;

    for (i, ch) in rest.char_indices() {
        if let Some(quote) = string_quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                string_quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => string_quote = Some(ch),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&rest[..i]);
                }
            }
            _ => {}
        }
    }

    Err(EngineError::Compile("unterminated function body".to_string()))
}

fn parse_body(src: &str) -> Result<Body, EngineError> {
    let trimmed = src.trim();
    if spin_re().is_match(trimmed) {
        return Ok(Body::Spin);
    }
    if trimmed.is_empty() {
        return Ok(Body::Empty);
    }
    if let Some(rest) = trimmed.strip_prefix("return") {
        let expr_src = rest.split(';').next().unwrap_or(rest).trim();
        if expr_src.is_empty() {
            return Ok(Body::Empty);
        }
        return Ok(Body::Return(parse_expr(expr_src)?));
    }
    // Side-effecting statements are accepted but contribute nothing.
    Ok(Body::Empty)
}

fn parse_expr(src: &str) -> Result<Expr, EngineError> {
    let mut terms = Vec::new();
    for piece in split_top_level(src, '+') {
        terms.push(parse_term(piece.trim())?);
    }
    if terms.is_empty() {
        return Err(EngineError::Compile("empty expression".to_string()));
    }
    Ok(Expr { terms })
}

/// Split on a separator at paren depth zero, outside string literals.
fn split_top_level(src: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut string_quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, ch) in src.char_indices() {
        if let Some(quote) = string_quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                string_quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => string_quote = Some(ch),
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            c if c == sep && depth == 0 => {
                pieces.push(&src[start..i]);
                start = i + ch.len_utf8();
            }
            _ => {}
        }
    }
    pieces.push(&src[start..]);
    pieces
}

fn parse_term(src: &str) -> Result<Term, EngineError> {
    let src = src.trim();

    if let Some(rest) = src.strip_prefix("Number") {
        let rest = rest.trim_start();
        if let Some(inner) = rest.strip_prefix('(').and_then(|r| r.strip_suffix(')')) {
            return Ok(Term::NumberCast(Box::new(parse_term(inner)?)));
        }
    }

    if src.len() >= 2 {
        let bytes = src.as_bytes();
        if (bytes[0] == b'\'' && bytes[src.len() - 1] == b'\'')
            || (bytes[0] == b'"' && bytes[src.len() - 1] == b'"')
        {
            return Ok(Term::StrLit(src[1..src.len() - 1].to_string()));
        }
    }

    if let Ok(n) = src.parse::<f64>() {
        return Ok(Term::NumLit(n));
    }

    if ident_re().is_match(src) {
        return Ok(Term::Var(src.to_string()));
    }

    Err(EngineError::Compile(format!(
        "unsupported expression: {}",
        src
    )))
}

fn eval_term(term: &Term, scope: &HashMap<String, Value>) -> Result<EvalValue, EngineError> {
    match term {
        Term::NumLit(n) => Ok(EvalValue::Num(*n)),
        Term::StrLit(s) => Ok(EvalValue::Str(s.clone())),
        Term::Var(name) => match scope.get(name) {
            None => Err(EngineError::Runtime(format!("{} is not defined", name))),
            Some(Value::Null) => Ok(EvalValue::Null),
            Some(Value::Number(n)) => Ok(EvalValue::Num(n.as_f64().unwrap_or(f64::NAN))),
            Some(Value::String(s)) => Ok(EvalValue::Str(s.clone())),
            Some(other) => Ok(EvalValue::Str(other.to_string())),
        },
        Term::NumberCast(inner) => match eval_term(inner, scope)? {
            EvalValue::Num(n) => Ok(EvalValue::Num(n)),
            EvalValue::Null => Ok(EvalValue::Num(0.0)),
            EvalValue::Str(s) => s.trim().parse::<f64>().map(EvalValue::Num).map_err(|_| {
                EngineError::Runtime(format!("cannot convert '{}' to a number", s))
            }),
        },
    }
}

/// JS-like `+`: numeric addition unless any operand is a string, in which
/// case everything concatenates.
fn eval_expr(expr: &Expr, scope: &HashMap<String, Value>) -> Result<EvalValue, EngineError> {
    let values = expr
        .terms
        .iter()
        .map(|t| eval_term(t, scope))
        .collect::<Result<Vec<_>, _>>()?;

    if values.iter().any(|v| matches!(v, EvalValue::Str(_))) {
        let mut out = String::new();
        for value in &values {
            match value {
                EvalValue::Num(n) => out.push_str(&format_number(*n)),
                EvalValue::Str(s) => out.push_str(s),
                EvalValue::Null => out.push_str("null"),
            }
        }
        return Ok(EvalValue::Str(out));
    }

    let mut sum = 0.0;
    for value in &values {
        match value {
            EvalValue::Num(n) => sum += n,
            EvalValue::Null => {}
            EvalValue::Str(_) => unreachable!("string operands handled above"),
        }
    }
    Ok(EvalValue::Num(sum))
}

/// Render integral results without a fractional part, so 2 + 3 is "5".
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn serialize(value: EvalValue) -> String {
    match value {
        EvalValue::Num(n) => format_number(n),
        EvalValue::Str(s) => serde_json::to_string(&s).unwrap_or_else(|_| "null".to_string()),
        EvalValue::Null => "null".to_string(),
    }
}
