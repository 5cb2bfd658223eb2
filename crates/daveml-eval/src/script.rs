//! The script runner: scripted variables hold a compiled `rhai` AST that is
//! evaluated against a scope of live variable values.
//!
//! The compile pass rewrites the two privileged built-ins —
//! `setVarDef(v, expr, …)` (non-sticky) and `setVarDefSticky(v, expr, …)`
//! (persistent) — into plain scope assignments while recording their target
//! sets, rewrites the quiet-read helper `getValueQuietly(v)` into a bare
//! read, collects every remaining symbol that names a variable as a
//! dependency edge, and refuses `return` statements and writes to Input
//! variables outright.

use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone)]
pub struct CompiledScript {
    /// Preprocessed source actually compiled.
    pub source: String,
    pub ast: rhai::AST,
    /// Dependency edges (variable indices), first-use order.
    pub deps: Vec<usize>,
    /// Variables read quietly: bound at evaluation, but no dependency edge.
    pub quiet: Vec<usize>,
    /// `setVarDefSticky` targets, written back after evaluation.
    pub sticky: Vec<usize>,
    /// `setVarDef` targets, restored (i.e. never written back).
    pub nonsticky: Vec<usize>,
    pub reads_self: bool,
    pub assigns_self: bool,
    pub uses_set_var_def: bool,
}

/// The shared `rhai` engine with the auxiliary function set registered.
pub struct ScriptRuntime {
    engine: rhai::Engine,
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ScriptRuntime")
    }
}

impl ScriptRuntime {
    pub fn new() -> Self {
        let mut engine = rhai::Engine::new();

        engine.register_fn("sec", |x: f64| 1.0 / x.cos());
        engine.register_fn("csc", |x: f64| 1.0 / x.sin());
        engine.register_fn("cot", |x: f64| 1.0 / x.tan());
        engine.register_fn("asec", |x: f64| (1.0 / x).acos());
        engine.register_fn("acsc", |x: f64| (1.0 / x).asin());
        engine.register_fn("acot", |x: f64| (1.0 / x).atan());
        engine.register_fn("deg2rad", |x: f64| x.to_radians());
        engine.register_fn("rad2deg", |x: f64| x.to_degrees());
        engine.register_fn("power", |a: f64, b: f64| a.powf(b));
        engine.register_fn("rootn", |x: f64, n: f64| x.powf(1.0 / n));
        engine.register_fn("logn", |x: f64, base: f64| x.ln() / base.ln());
        engine.register_fn("log10", |x: f64| x.log10());
        engine.register_fn("quot", |a: f64, b: f64| (a / b).trunc());
        engine.register_fn("frac", |x: f64| x.fract());
        engine.register_fn("fmod", |a: f64, b: f64| a % b);
        engine.register_fn("copysign", |a: f64, b: f64| a.copysign(b));
        engine.register_fn("bound", daveml_common::matrix::bound);
        engine.register_fn("fact", daveml_common::matrix::fact);
        engine.register_fn("sgn", |x: f64| {
            if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        });
        engine.register_fn("atan2", |y: f64, x: f64| y.atan2(x));
        engine.register_fn("min", |a: f64, b: f64| a.min(b));
        engine.register_fn("max", |a: f64, b: f64| a.max(b));
        engine.register_fn("round_even", |x: f64| x.round_ties_even());
        engine.register_fn("nan", || f64::NAN);
        engine.register_fn("inf", || f64::INFINITY);
        engine.register_fn("linterp", |x: f64, xl: f64, xh: f64, yl: f64, yh: f64| {
            if xl < xh {
                if x <= xl {
                    return yl;
                }
                if x >= xh {
                    return yh;
                }
            } else if xl > xh {
                if x >= xl {
                    return yl;
                }
                if x <= xh {
                    return yh;
                }
            }
            (yh - yl) / (xh - xl) * (x - xl) + yl
        });
        engine.register_fn("linterpe", |x: f64, xl: f64, xh: f64, yl: f64, yh: f64| {
            (yh - yl) / (xh - xl) * (x - xl) + yl
        });

        ScriptRuntime { engine }
    }

    pub fn compile(&self, source: &str) -> Result<rhai::AST, String> {
        self.engine.compile(source).map_err(|e| e.to_string())
    }

    pub fn eval(
        &self,
        ast: &rhai::AST,
        scope: &mut rhai::Scope<'static>,
    ) -> Result<rhai::Dynamic, String> {
        self.engine
            .eval_ast_with_scope::<rhai::Dynamic>(scope, ast)
            .map_err(|e| e.to_string())
    }
}

impl Default for ScriptRuntime {
    fn default() -> Self {
        Self::new()
    }
}

pub fn dynamic_to_f64(d: &rhai::Dynamic) -> Option<f64> {
    if let Some(f) = d.clone().try_cast::<f64>() {
        return Some(f);
    }
    if let Some(i) = d.clone().try_cast::<i64>() {
        return Some(i as f64);
    }
    if let Some(b) = d.clone().try_cast::<bool>() {
        return Some(if b { 1.0 } else { 0.0 });
    }
    None
}

/* ───────────── lexical analysis ───────────── */

const KEYWORDS: &[&str] = &[
    "let", "const", "if", "else", "switch", "while", "do", "until", "loop", "for", "in",
    "continue", "break", "return", "throw", "try", "catch", "fn", "private", "import",
    "export", "as", "global", "true", "false", "this",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    /// Followed by an assignment operator (`=`, `+=`, …, but not `==`).
    pub assigned: bool,
    /// Immediately followed by `(` — a function call, not a variable.
    pub called: bool,
    /// Preceded by `.` — a method or property access.
    pub method: bool,
}

/// Identifier occurrences in source order, skipping comments and strings.
pub fn scan_symbols(source: &str) -> Vec<Symbol> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut i = 0usize;
    let mut prev_nonspace: Option<u8> = None;

    while i < bytes.len() {
        let c = bytes[i];
        // Comments.
        if c == b'/' && i + 1 < bytes.len() {
            if bytes[i + 1] == b'/' {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            if bytes[i + 1] == b'*' {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
                continue;
            }
        }
        // Strings.
        if c == b'"' || c == b'`' {
            let quote = c;
            i += 1;
            while i < bytes.len() && bytes[i] != quote {
                if bytes[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
            prev_nonspace = Some(quote);
            continue;
        }
        // Identifiers.
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            let name = &source[start..i];

            let mut j = i;
            while j < bytes.len() && (bytes[j] == b' ' || bytes[j] == b'\t') {
                j += 1;
            }
            let called = j < bytes.len() && bytes[j] == b'(';
            let assigned = j + 1 < bytes.len()
                && ((bytes[j] == b'=' && bytes[j + 1] != b'=')
                    || (matches!(bytes[j], b'+' | b'-' | b'*' | b'/' | b'%')
                        && bytes[j + 1] == b'='));
            let method = prev_nonspace == Some(b'.');

            out.push(Symbol {
                name: name.to_owned(),
                assigned,
                called,
                method,
            });
            prev_nonspace = Some(bytes[i - 1]);
            continue;
        }
        if !c.is_ascii_whitespace() {
            prev_nonspace = Some(c);
        }
        i += 1;
    }
    out
}

/// Locals introduced by `let`/`const`/`for` declarations.
fn declared_locals(symbols: &[Symbol]) -> FxHashSet<String> {
    let mut locals = FxHashSet::default();
    let mut after_decl = false;
    for symbol in symbols {
        if after_decl && !symbol.called {
            locals.insert(symbol.name.clone());
        }
        after_decl = matches!(symbol.name.as_str(), "let" | "const" | "for");
    }
    locals
}

/* ───────────── compile pass ───────────── */

pub struct Preprocessed {
    pub source: String,
    pub sticky_names: Vec<String>,
    pub nonsticky_names: Vec<String>,
    pub quiet_names: Vec<String>,
}

/// Errors carry plain strings; the loader wraps them with the varID.
pub fn preprocess(source: &str) -> Result<Preprocessed, String> {
    for symbol in scan_symbols(source) {
        if symbol.name == "return" {
            return Err("scripts don't support \"return\" statements".into());
        }
    }

    let mut sticky_names = Vec::new();
    let mut nonsticky_names = Vec::new();
    let mut text = source.to_owned();

    // Rewrite setVarDef / setVarDefSticky calls into scope assignments.
    loop {
        let Some((start, name_len, sticky)) = find_set_var_def(&text) else {
            break;
        };
        let open = match text[start + name_len..].find('(') {
            Some(off) => start + name_len + off,
            None => return Err("setVarDef requires an argument list".into()),
        };
        let close = matching_paren(&text, open)
            .ok_or_else(|| "setVarDef has unbalanced brackets".to_string())?;
        let args = split_top_level(&text[open + 1..close]);
        if args.is_empty() || args.len() % 2 != 0 {
            return Err("setVarDef must have an even number of arguments".into());
        }

        let mut replacement = String::new();
        for pair in args.chunks(2) {
            let target = pair[0].trim().to_owned();
            let expr = pair[1].trim();
            if target.is_empty() {
                return Err("setVarDef target is empty".into());
            }
            replacement.push_str(&format!("{target} = ({expr});"));
            if sticky {
                sticky_names.push(target);
            } else {
                nonsticky_names.push(target);
            }
        }

        // Swallow the trailing semicolon of the original call.
        let mut end = close + 1;
        let rest = text[end..].trim_start();
        if rest.starts_with(';') {
            end += text[end..].len() - rest.len() + 1;
        }
        text.replace_range(start..end, &replacement);
    }

    // Rewrite quiet reads into bare identifiers.
    let mut quiet_names = Vec::new();
    loop {
        let Some(start) = find_identifier(&text, "getValueQuietly") else {
            break;
        };
        let open = match text[start..].find('(') {
            Some(off) => start + off,
            None => return Err("getValueQuietly requires an argument".into()),
        };
        let close = matching_paren(&text, open)
            .ok_or_else(|| "getValueQuietly has unbalanced brackets".to_string())?;
        let name = text[open + 1..close].trim().to_owned();
        if name.is_empty() {
            return Err("getValueQuietly requires a variable name".into());
        }
        quiet_names.push(name.clone());
        text.replace_range(start..close + 1, &name);
    }

    Ok(Preprocessed {
        source: text,
        sticky_names,
        nonsticky_names,
        quiet_names,
    })
}

/// Dependency symbols of a preprocessed script: identifiers that are not
/// keywords, locals, calls, methods or members of `exclude`.
pub fn dependency_names(source: &str, exclude: &FxHashSet<String>) -> Vec<String> {
    let symbols = scan_symbols(source);
    let locals = declared_locals(&symbols);
    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for symbol in &symbols {
        if symbol.called
            || symbol.method
            || KEYWORDS.contains(&symbol.name.as_str())
            || locals.contains(&symbol.name)
            || exclude.contains(&symbol.name)
        {
            continue;
        }
        if seen.insert(symbol.name.clone()) {
            out.push(symbol.name.clone());
        }
    }
    out
}

/// Whether the script assigns to `name` anywhere.
pub fn assigns_to(source: &str, name: &str) -> bool {
    scan_symbols(source)
        .iter()
        .any(|s| s.name == name && s.assigned && !s.method)
}

/// Whether the script mentions `name` as a plain symbol.
pub fn mentions(source: &str, name: &str) -> bool {
    scan_symbols(source)
        .iter()
        .any(|s| s.name == name && !s.called && !s.method)
}

/// Map symbol names to variable indices, preserving order and dropping
/// unknown names (they are script locals created by assignment).
pub fn resolve_names(names: &[String], index: &FxHashMap<String, usize>) -> Vec<usize> {
    let mut out = Vec::new();
    for name in names {
        if let Some(&i) = index.get(name) {
            if !out.contains(&i) {
                out.push(i);
            }
        }
    }
    out
}

fn find_set_var_def(text: &str) -> Option<(usize, usize, bool)> {
    for symbol_start in find_identifier_all(text, "setVarDefSticky") {
        return Some((symbol_start, "setVarDefSticky".len(), true));
    }
    for symbol_start in find_identifier_all(text, "setVarDef") {
        return Some((symbol_start, "setVarDef".len(), false));
    }
    None
}

/// First occurrence of `name` as a standalone identifier.
fn find_identifier(text: &str, name: &str) -> Option<usize> {
    find_identifier_all(text, name).into_iter().next()
}

fn find_identifier_all(text: &str, name: &str) -> Vec<usize> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut from = 0usize;
    while let Some(offset) = text[from..].find(name) {
        let start = from + offset;
        let end = start + name.len();
        let before_ok = start == 0
            || !(bytes[start - 1].is_ascii_alphanumeric() || bytes[start - 1] == b'_');
        let after_ok =
            end >= bytes.len() || !(bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_');
        if before_ok && after_ok {
            out.push(start);
        }
        from = end;
    }
    out
}

/// Index of the `)` matching the `(` at `open`.
fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    for (i, &c) in bytes.iter().enumerate().skip(open) {
        match c {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on top-level commas, ignoring commas inside any bracket pair.
fn split_top_level(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut last = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                out.push(text[last..i].to_owned());
                last = i + 1;
            }
            _ => {}
        }
    }
    let tail = text[last..].trim();
    if !tail.is_empty() || !out.is_empty() {
        out.push(text[last..].to_owned());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_skip_comments_strings_and_calls() {
        let symbols = scan_symbols(
            "// alpha\nlet t = beta + sin(gamma); /* delta */ let s = \"epsilon\"; t.abs()",
        );
        let names: Vec<_> = symbols
            .iter()
            .filter(|s| !s.called && !s.method && !KEYWORDS.contains(&s.name.as_str()))
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["t", "beta", "gamma", "s", "t"]);
    }

    #[test]
    fn dependency_names_exclude_locals_and_calls() {
        let exclude = FxHashSet::default();
        let deps = dependency_names("let t = beta + sin(gamma); t * delta", &exclude);
        assert_eq!(deps, vec!["beta", "gamma", "delta"]);
    }

    #[test]
    fn set_var_def_rewrites_to_assignments() {
        let p = preprocess("setVarDef( xDot, 2.0 * x, v, x + 1.0 ); xDot * v").unwrap();
        assert_eq!(p.nonsticky_names, vec!["xDot", "v"]);
        assert!(p.source.contains("xDot = (2.0 * x);"));
        assert!(p.source.contains("v = (x + 1.0);"));
        assert!(!p.source.contains("setVarDef"));
    }

    #[test]
    fn sticky_and_quiet_forms() {
        let p = preprocess("setVarDefSticky( trim, alpha * 0.5 ); getValueQuietly( gain ) * trim")
            .unwrap();
        assert_eq!(p.sticky_names, vec!["trim"]);
        assert_eq!(p.quiet_names, vec!["gain"]);
        assert!(p.source.contains("trim = (alpha * 0.5);"));
        assert!(p.source.ends_with("gain * trim"));
    }

    #[test]
    fn return_statements_are_refused() {
        assert!(preprocess("return 1.0;").is_err());
    }

    #[test]
    fn odd_set_var_def_arguments_are_refused() {
        assert!(preprocess("setVarDef( x );").is_err());
    }

    #[test]
    fn assignment_detection() {
        assert!(assigns_to("x = 2.0;", "x"));
        assert!(assigns_to("x += 1.0;", "x"));
        assert!(!assigns_to("y = x == 2.0;", "x"));
        assert!(!assigns_to("y = x;", "x"));
    }

    #[test]
    fn runtime_evaluates_with_scope() {
        let runtime = ScriptRuntime::new();
        let ast = runtime.compile("bound(alpha * 2.0, 0.0, 10.0)").unwrap();
        let mut scope = rhai::Scope::new();
        scope.push("alpha", 3.0f64);
        let result = runtime.eval(&ast, &mut scope).unwrap();
        assert_eq!(dynamic_to_f64(&result), Some(6.0));
    }

    #[test]
    fn scope_assignments_are_visible_after_eval() {
        let runtime = ScriptRuntime::new();
        let ast = runtime.compile("out = alpha + 1.0; out * 2.0").unwrap();
        let mut scope = rhai::Scope::new();
        scope.push("alpha", 2.0f64);
        scope.push("out", 0.0f64);
        let result = runtime.eval(&ast, &mut scope).unwrap();
        assert_eq!(dynamic_to_f64(&result), Some(6.0));
        let out = scope.get_value::<f64>("out").unwrap();
        assert_eq!(out, 3.0);
    }
}
