//! PEG-style parser construction and execution.
//!
//! The `parser` special form translates a syntax expression into a
//! combinator tree ([`PegNode`]) and packages it with an optional generator
//! expression and whitespace skipper as a first-class [`ScmParser`] value.
//! Calling the parser scans the input text: atoms and regexes consume
//! characters (skipping whitespace/comments between them), alternatives take
//! the first success, and `(define var sub)` nodes bind sub-results into a
//! scope the generator can read.
//!
//! Symbols inside the syntax refer to other parsers. Forward references are
//! allowed: a symbol that is not bound at construction time becomes a lazy
//! handle resolved against the captured environment on first match and
//! cached afterwards.

use std::{cell::RefCell, rc::Rc, sync::OnceLock};

use crate::{
    env::{Env, EnvRef},
    error::{ErrorKind, EvalError, EvalResult},
    eval,
    value::{CompiledRegex, Value},
};

/// Default inter-atom skipper: ASCII whitespace and `/* ... */` comments.
fn default_skip_len(text: &str) -> usize {
    static SKIP: OnceLock<regex::Regex> = OnceLock::new();
    let re = SKIP.get_or_init(|| regex::Regex::new(r"(?s)^(?:\s+|/\*.*?\*/)+").expect("static skip regex"));
    re.find(text).map_or(0, |m| m.end())
}

/// One node of the compiled combinator tree.
#[derive(Debug)]
pub enum PegNode {
    /// Literal text, optionally case-insensitive, optionally skipping
    /// whitespace first.
    Atom { text: Rc<str>, ci: bool, skip_ws: bool },
    /// Anchored regex match; the result is the matched text, or the list of
    /// capture groups when the pattern has any.
    Rx { re: Rc<CompiledRegex>, skip_ws: bool },
    /// Sequence; result is the list of child results.
    Seq(Vec<PegNode>),
    /// First-of alternatives.
    Or(Vec<PegNode>),
    /// Match `p` only if none of `forbidden` match at the same position.
    Not { p: Box<PegNode>, forbidden: Vec<PegNode> },
    /// Kleene/one-or-more with optional separator (separator results drop).
    Rep {
        sub: Box<PegNode>,
        sep: Option<Box<PegNode>>,
        min: u32,
    },
    /// Optional sequence; nil when absent.
    Maybe(Vec<PegNode>),
    /// Run `sub`; on success bind its result to `name` in the parse scope.
    Define { name: Rc<str>, sub: Box<PegNode> },
    /// Run `sub`; result is `(matched_text sub_result)`.
    Capture(Box<PegNode>),
    /// End of input.
    End,
    /// Matches the empty string.
    Empty,
    /// Consumes and returns the rest of the input.
    Rest,
    /// Embedded parser value (precompiled subtree or nested `parser` form).
    Sub(Rc<ScmParser>),
    /// Named reference, resolved lazily against the captured environment.
    Ref(Rc<LazyRef>),
}

/// A forward reference to a parser bound (possibly later) in the
/// environment. Resolved on first match, then cached.
#[derive(Debug)]
pub struct LazyRef {
    name: Rc<str>,
    resolved: RefCell<Option<Rc<ScmParser>>>,
}

impl LazyRef {
    fn resolve(&self, env: &EnvRef) -> EvalResult<Rc<ScmParser>> {
        if let Some(parser) = self.resolved.borrow().as_ref() {
            return Ok(parser.clone());
        }
        let value = env
            .lookup(&self.name)
            .ok_or_else(|| EvalError::unbound(&self.name))?;
        match value.into_peeled() {
            Value::Parser(parser) => {
                *self.resolved.borrow_mut() = Some(parser.clone());
                Ok(parser)
            }
            other => Err(EvalError::type_mismatch(format!(
                "`{}` referenced from a parser is {}, not a parser",
                self.name,
                other.tag()
            ))),
        }
    }
}

/// A first-class parser value.
#[derive(Debug)]
pub struct ScmParser {
    node: PegNode,
    generator: Option<Value>,
    skipper: Option<Rc<CompiledRegex>>,
    env: EnvRef,
    /// The original syntax expression, kept for printing.
    syntax: Value,
}

struct Scanner<'t> {
    text: &'t str,
    pos: usize,
}

impl ScmParser {
    /// The printable `(parser ...)` form.
    #[must_use]
    pub fn display_form(&self) -> Value {
        let mut out = vec![Value::symbol("parser"), self.syntax.clone()];
        if let Some(generator) = &self.generator {
            out.push(generator.clone());
        }
        Value::list(out)
    }

    /// Parses `text` from the beginning and requires the whole input to be
    /// consumed (modulo trailing skippable text).
    pub fn parse_str(&self, text: &str) -> EvalResult<Value> {
        let mut scanner = Scanner { text, pos: 0 };
        let binds = Env::child_no_define(&self.env);
        let Some(result) = self.run(&self.node, &mut scanner, &binds)? else {
            return Err(EvalError::new(
                ErrorKind::ParserFailed,
                format!("no match at offset {}", scanner.pos),
            ));
        };
        self.skip(&mut scanner);
        if scanner.pos != text.len() {
            return Err(EvalError::new(
                ErrorKind::ParserFailed,
                format!("unconsumed input at offset {}", scanner.pos),
            ));
        }
        match &self.generator {
            Some(generator) => eval::eval(generator, &binds),
            None => Ok(result),
        }
    }

    fn skip(&self, scanner: &mut Scanner<'_>) {
        let rest = &scanner.text[scanner.pos..];
        let len = match &self.skipper {
            Some(skipper) => skipper
                .re
                .find(rest)
                .filter(|m| m.start() == 0)
                .map_or(0, |m| m.end()),
            None => default_skip_len(rest),
        };
        scanner.pos += len;
    }

    /// Executes one node. `Ok(None)` is a clean mismatch (the scanner
    /// position is restored by the caller); errors abort the whole parse.
    fn run(&self, node: &PegNode, scanner: &mut Scanner<'_>, binds: &EnvRef) -> EvalResult<Option<Value>> {
        match node {
            PegNode::Atom { text, ci, skip_ws } => {
                if *skip_ws {
                    self.skip(scanner);
                }
                let rest = &scanner.text[scanner.pos..];
                let matched = if *ci {
                    rest.get(..text.len()).is_some_and(|head| head.eq_ignore_ascii_case(text))
                } else {
                    rest.starts_with(&**text)
                };
                if !matched {
                    return Ok(None);
                }
                let consumed = &rest[..text.len()];
                scanner.pos += text.len();
                Ok(Some(Value::string(consumed)))
            }
            PegNode::Rx { re, skip_ws } => {
                if *skip_ws {
                    self.skip(scanner);
                }
                let rest = &scanner.text[scanner.pos..];
                let Some(captures) = re.re.captures(rest) else { return Ok(None) };
                let whole = captures.get(0).ok_or_else(|| EvalError::internal("regex match without group 0"))?;
                if whole.start() != 0 {
                    return Ok(None);
                }
                scanner.pos += whole.end();
                if captures.len() > 1 {
                    let groups = (1..captures.len())
                        .map(|i| captures.get(i).map_or(Value::Nil, |m| Value::string(m.as_str())))
                        .collect();
                    Ok(Some(Value::list(groups)))
                } else {
                    Ok(Some(Value::string(whole.as_str())))
                }
            }
            PegNode::Seq(subs) => {
                let start = scanner.pos;
                let mut results = Vec::with_capacity(subs.len());
                for sub in subs {
                    match self.run(sub, scanner, binds)? {
                        Some(v) => results.push(v),
                        None => {
                            scanner.pos = start;
                            return Ok(None);
                        }
                    }
                }
                if results.len() == 1 {
                    Ok(results.pop())
                } else {
                    Ok(Some(Value::list(results)))
                }
            }
            PegNode::Or(alternatives) => {
                let start = scanner.pos;
                for alternative in alternatives {
                    if let Some(v) = self.run(alternative, scanner, binds)? {
                        return Ok(Some(v));
                    }
                    scanner.pos = start;
                }
                Ok(None)
            }
            PegNode::Not { p, forbidden } => {
                let start = scanner.pos;
                for alternative in forbidden {
                    if self.run(alternative, scanner, binds)?.is_some() {
                        scanner.pos = start;
                        return Ok(None);
                    }
                    scanner.pos = start;
                }
                self.run(p, scanner, binds)
            }
            PegNode::Rep { sub, sep, min } => {
                let mut results = Vec::new();
                let mut last_good = scanner.pos;
                loop {
                    if !results.is_empty()
                        && let Some(sep) = sep
                    {
                        if self.run(sep, scanner, binds)?.is_none() {
                            scanner.pos = last_good;
                            break;
                        }
                    }
                    match self.run(sub, scanner, binds)? {
                        Some(v) => {
                            results.push(v);
                            last_good = scanner.pos;
                        }
                        None => {
                            scanner.pos = last_good;
                            break;
                        }
                    }
                }
                if (results.len() as u32) < *min {
                    return Ok(None);
                }
                Ok(Some(Value::list(results)))
            }
            PegNode::Maybe(subs) => {
                let start = scanner.pos;
                let mut results = Vec::with_capacity(subs.len());
                for sub in subs {
                    match self.run(sub, scanner, binds)? {
                        Some(v) => results.push(v),
                        None => {
                            scanner.pos = start;
                            return Ok(Some(Value::Nil));
                        }
                    }
                }
                if results.len() == 1 {
                    Ok(results.pop())
                } else {
                    Ok(Some(Value::list(results)))
                }
            }
            PegNode::Define { name, sub } => {
                let result = self.run(sub, scanner, binds)?;
                if let Some(v) = &result {
                    binds.bind(name.clone(), v.clone());
                }
                Ok(result)
            }
            PegNode::Capture(sub) => {
                let start = scanner.pos;
                match self.run(sub, scanner, binds)? {
                    Some(v) => {
                        let matched = Value::string(&scanner.text[start..scanner.pos]);
                        Ok(Some(Value::list(vec![matched, v])))
                    }
                    None => Ok(None),
                }
            }
            PegNode::End => {
                self.skip(scanner);
                if scanner.pos == scanner.text.len() {
                    Ok(Some(Value::Nil))
                } else {
                    Ok(None)
                }
            }
            PegNode::Empty => Ok(Some(Value::string(""))),
            PegNode::Rest => {
                self.skip(scanner);
                let rest = Value::string(&scanner.text[scanner.pos..]);
                scanner.pos = scanner.text.len();
                Ok(Some(rest))
            }
            PegNode::Sub(parser) => self.run_sub(parser, scanner),
            PegNode::Ref(lazy) => {
                let parser = lazy.resolve(&self.env)?;
                self.run_sub(&parser, scanner)
            }
        }
    }

    /// Runs a nested parser against the shared scanner: its own bind scope,
    /// its own generator, no end-of-input requirement.
    fn run_sub(&self, parser: &Rc<ScmParser>, scanner: &mut Scanner<'_>) -> EvalResult<Option<Value>> {
        let binds = Env::child_no_define(&parser.env);
        let start = scanner.pos;
        let Some(result) = parser.run(&parser.node, scanner, &binds)? else {
            scanner.pos = start;
            return Ok(None);
        };
        match &parser.generator {
            Some(generator) => Ok(Some(eval::eval(generator, &binds)?)),
            None => Ok(Some(result)),
        }
    }
}

/// Builds a parser value from the (unevaluated) syntax expression of a
/// `parser` form.
pub fn construct(
    syntax: &Value,
    generator: Option<&Value>,
    skipper: Option<&Value>,
    env: &EnvRef,
) -> EvalResult<ScmParser> {
    let node = translate(syntax, Some(env))?;
    let skipper = match skipper.map(Value::peel_source) {
        None | Some(Value::Nil) => None,
        Some(Value::Regex(re)) => Some(re.clone()),
        Some(Value::String(pattern)) => Some(Rc::new(
            CompiledRegex::compile(pattern, false)
                .map_err(|e| EvalError::pattern(format!("invalid skipper regex: {e}")))?,
        )),
        Some(other) => {
            return Err(EvalError::type_mismatch(format!(
                "parser skipper must be a regex or string, got {}",
                other.tag()
            )));
        }
    };
    // a literal nil generator means "no generator", so a skipper can be
    // passed without one
    let generator = match generator.map(Value::peel_source) {
        None | Some(Value::Nil) => None,
        Some(_) => generator.cloned(),
    };
    Ok(ScmParser {
        node,
        generator,
        skipper,
        env: env.clone(),
        syntax: syntax.clone(),
    })
}

/// Translates one syntax form into a node. With `env` present, symbols
/// resolve eagerly when already bound and lazily otherwise; without an
/// environment (the optimizer's precompile pass) symbols are rejected so
/// only closed subtrees are materialized.
fn translate(syntax: &Value, env: Option<&EnvRef>) -> EvalResult<PegNode> {
    let syntax = syntax.peel_source();
    match syntax {
        Value::String(text) => Ok(PegNode::Atom {
            text: text.clone(),
            ci: false,
            skip_ws: true,
        }),
        Value::Regex(re) => Ok(PegNode::Rx {
            re: re.clone(),
            skip_ws: true,
        }),
        Value::Parser(parser) => Ok(PegNode::Sub(parser.clone())),
        Value::Symbol(name) => match &**name {
            "$" => Ok(PegNode::End),
            "empty" => Ok(PegNode::Empty),
            "rest" => Ok(PegNode::Rest),
            _ => {
                let Some(env) = env else {
                    return Err(EvalError::pattern("open parser reference"));
                };
                if let Some(Value::Parser(parser)) = env.lookup(name).map(Value::into_peeled) {
                    return Ok(PegNode::Sub(parser));
                }
                Ok(PegNode::Ref(Rc::new(LazyRef {
                    name: name.clone(),
                    resolved: RefCell::new(None),
                })))
            }
        },
        Value::List(items) if !items.is_empty() => translate_list(items, env),
        other => Err(EvalError::pattern(format!(
            "unsupported parser syntax of kind {}",
            other.tag()
        ))),
    }
}

fn flag(items: &[Value], idx: usize) -> bool {
    items.get(idx).is_some_and(|v| v.peel_source().is_truthy())
}

fn translate_list(items: &[Value], env: Option<&EnvRef>) -> EvalResult<PegNode> {
    let head = items[0].peel_source();
    let Some(head_name) = head.as_str_symbol() else {
        // a bare sequence like ("a" b "c")
        let subs = items.iter().map(|s| translate(s, env)).collect::<EvalResult<Vec<_>>>()?;
        return Ok(PegNode::Seq(subs));
    };
    let args = &items[1..];
    match head_name {
        "atom" => {
            let Some(text) = args.first().map(Value::coerce_string) else {
                return Err(EvalError::pattern("`atom` needs its text"));
            };
            Ok(PegNode::Atom {
                text: Rc::from(text.as_str()),
                ci: flag(args, 1),
                skip_ws: !args.get(2).is_some_and(|v| !v.peel_source().is_truthy()),
            })
        }
        "regex" => {
            let re = match args.first().map(Value::peel_source) {
                Some(Value::Regex(re)) => re.clone(),
                Some(Value::String(pattern)) => Rc::new(
                    CompiledRegex::compile(pattern, flag(args, 1))
                        .map_err(|e| EvalError::pattern(format!("invalid parser regex: {e}")))?,
                ),
                _ => return Err(EvalError::pattern("`regex` needs a pattern string")),
            };
            Ok(PegNode::Rx {
                re,
                skip_ws: !args.get(2).is_some_and(|v| !v.peel_source().is_truthy()),
            })
        }
        "list" => {
            let subs = args.iter().map(|s| translate(s, env)).collect::<EvalResult<Vec<_>>>()?;
            Ok(PegNode::Seq(subs))
        }
        "or" => {
            let subs = args.iter().map(|s| translate(s, env)).collect::<EvalResult<Vec<_>>>()?;
            Ok(PegNode::Or(subs))
        }
        "not" => {
            let Some(p) = args.first() else {
                return Err(EvalError::pattern("`not` needs a subject parser"));
            };
            let forbidden = args[1..].iter().map(|s| translate(s, env)).collect::<EvalResult<Vec<_>>>()?;
            Ok(PegNode::Not {
                p: Box::new(translate(p, env)?),
                forbidden,
            })
        }
        "*" | "+" => {
            let Some(sub) = args.first() else {
                return Err(EvalError::pattern(format!("`{head_name}` needs a sub-parser")));
            };
            let sep = match args.get(1) {
                Some(s) => Some(Box::new(translate(s, env)?)),
                None => None,
            };
            Ok(PegNode::Rep {
                sub: Box::new(translate(sub, env)?),
                sep,
                min: u32::from(head_name == "+"),
            })
        }
        "?" => {
            let subs = args.iter().map(|s| translate(s, env)).collect::<EvalResult<Vec<_>>>()?;
            Ok(PegNode::Maybe(subs))
        }
        "define" => {
            // bindings must land in the caller's parse scope, so a define
            // can never be sealed into a precompiled subtree
            if env.is_none() {
                return Err(EvalError::pattern("open parser reference"));
            }
            let Some(Value::Symbol(name)) = args.first().map(Value::peel_source) else {
                return Err(EvalError::pattern("parser `define` needs a symbol"));
            };
            let Some(sub) = args.get(1) else {
                return Err(EvalError::pattern("parser `define` needs a sub-parser"));
            };
            Ok(PegNode::Define {
                name: name.clone(),
                sub: Box::new(translate(sub, env)?),
            })
        }
        "capture" => {
            let Some(sub) = args.first() else {
                return Err(EvalError::pattern("`capture` needs a sub-parser"));
            };
            Ok(PegNode::Capture(Box::new(translate(sub, env)?)))
        }
        "parser" => {
            // nested full parser form with its own generator
            let Some(env) = env else {
                return Err(EvalError::pattern("open parser reference"));
            };
            let parser = construct(&items[1], items.get(2), items.get(3), env)?;
            Ok(PegNode::Sub(Rc::new(parser)))
        }
        "quote" => match args.first() {
            Some(inner) => translate(inner, env),
            None => Err(EvalError::pattern("`quote` parser syntax needs a form")),
        },
        other => Err(EvalError::pattern(format!("unknown parser combinator `{other}`"))),
    }
}

/// Optimizer hook: materializes closed subtrees of a `parser` syntax
/// expression as parser values. Anything mentioning a symbol reference stays
/// symbolic so it can resolve against the runtime environment.
#[must_use]
pub fn precompile(syntax: &Value) -> Value {
    match translate(syntax, None) {
        Ok(node) => Value::Parser(Rc::new(ScmParser {
            node,
            generator: None,
            skipper: None,
            env: Env::new_global(),
            syntax: syntax.clone(),
        })),
        // open subtree: recurse into combinator arguments so closed children
        // still precompile
        Err(_) => match syntax.peel_source() {
            Value::List(items) if !items.is_empty() => {
                let head = items[0].peel_source().as_str_symbol();
                match head {
                    Some("list" | "or" | "not" | "*" | "+" | "?") => {
                        let mut out = vec![items[0].clone()];
                        out.extend(items[1..].iter().map(precompile));
                        Value::list(out)
                    }
                    Some("define" | "capture") if items.len() >= 2 => {
                        let mut out = items[..items.len() - 1].to_vec();
                        out.push(precompile(&items[items.len() - 1]));
                        Value::list(out)
                    }
                    _ => syntax.clone(),
                }
            }
            other => other.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader;

    fn build(syntax_text: &str) -> ScmParser {
        let env = Env::new_global();
        let syntax = reader::read_one("test", syntax_text).unwrap();
        construct(&syntax, None, None, &env).unwrap()
    }

    #[test]
    fn atom_sequences_skip_whitespace() {
        let parser = build("'(\"select\" \"from\")");
        let result = parser.parse_str("select   from").unwrap();
        assert_eq!(result, Value::list(vec![Value::string("select"), Value::string("from")]));
        assert!(parser.parse_str("select grom").is_err());
    }

    #[test]
    fn or_takes_first_success() {
        let parser = build("(or \"a\" \"ab\")");
        // PEG first-match: "a" wins and "b" is left over, failing the parse
        assert!(parser.parse_str("ab").is_err());
        assert_eq!(parser.parse_str("a").unwrap(), Value::string("a"));
    }

    #[test]
    fn repetition_with_separator_drops_separators() {
        let parser = build("(* (regex \"[0-9]+\") \",\")");
        let result = parser.parse_str("1, 2, 3").unwrap();
        assert_eq!(
            result,
            Value::list(vec![Value::string("1"), Value::string("2"), Value::string("3")])
        );
        assert_eq!(parser.parse_str("").unwrap(), Value::empty_list());
    }

    #[test]
    fn plus_requires_one() {
        let parser = build("(+ (regex \"[0-9]+\"))");
        assert!(parser.parse_str("").is_err());
        let result = parser.parse_str("1 2 3").unwrap();
        assert_eq!(result.as_list().unwrap().len(), 3);
    }

    #[test]
    fn maybe_yields_nil_when_absent() {
        let parser = build("'((? \"not\") \"null\")");
        assert_eq!(
            parser.parse_str("null").unwrap(),
            Value::list(vec![Value::Nil, Value::string("null")])
        );
        assert_eq!(
            parser.parse_str("not null").unwrap(),
            Value::list(vec![Value::string("not"), Value::string("null")])
        );
    }

    #[test]
    fn not_guards_the_position() {
        let parser = build("(not (regex \"[a-z]+\") \"from\")");
        assert_eq!(parser.parse_str("table").unwrap(), Value::string("table"));
        assert!(parser.parse_str("from").is_err());
    }

    #[test]
    fn capture_returns_text_and_result() {
        let parser = build("(capture (* (regex \"[0-9]\") \",\"))");
        let result = parser.parse_str("1,2").unwrap();
        let items = result.as_list().unwrap();
        assert_eq!(items[0], Value::string("1,2"));
        assert_eq!(items[1].as_list().unwrap().len(), 2);
    }

    #[test]
    fn regex_groups_become_lists() {
        let parser = build("(regex \"([a-z]+)=([0-9]+)\")");
        let result = parser.parse_str("x=42").unwrap();
        assert_eq!(result, Value::list(vec![Value::string("x"), Value::string("42")]));
    }

    #[test]
    fn forward_references_resolve_lazily() {
        let env = Env::new_global();
        let outer_syntax = reader::read_one("test", "'(\"[\" inner \"]\")").unwrap();
        let outer = construct(&outer_syntax, None, None, &env).unwrap();
        // `inner` is defined only after the outer parser was constructed
        let inner_syntax = reader::read_one("test", "(regex \"[0-9]+\")").unwrap();
        let inner = construct(&inner_syntax, None, None, &env).unwrap();
        env.bind("inner".into(), Value::Parser(Rc::new(inner)));
        let result = outer.parse_str("[7]").unwrap();
        assert_eq!(
            result,
            Value::list(vec![Value::string("["), Value::string("7"), Value::string("]")])
        );
    }

    #[test]
    fn precompile_materializes_closed_subtrees() {
        let syntax = reader::read_one("test", "(or \"a\" openref)").unwrap();
        let rewritten = precompile(&syntax);
        let items = rewritten.as_list().unwrap();
        assert!(matches!(items[1], Value::Parser(_)));
        assert_eq!(items[2].peel_source(), &Value::symbol("openref"));
        // fully closed syntax precompiles to a single parser value
        let closed = reader::read_one("test", "(* \"x\")").unwrap();
        assert!(matches!(precompile(&closed), Value::Parser(_)));
    }

    #[test]
    fn end_and_rest() {
        let parser = build("'(\"a\" rest)");
        let result = parser.parse_str("a b c").unwrap();
        assert_eq!(
            result,
            Value::list(vec![Value::string("a"), Value::string("b c")])
        );
        let parser = build("'(\"a\" $)");
        assert!(parser.parse_str("a  ").is_ok());
        assert!(parser.parse_str("a b").is_err());
    }
}
