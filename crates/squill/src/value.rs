//! The tagged runtime value.
//!
//! Every piece of data the interpreter touches (literals, S-expression
//! syntax, closures, parsers, compiled code) is a [`Value`]. Syntax is not a
//! separate AST type: a call expression is a `List` whose head is a symbol,
//! and the optimizer rewrites symbols into `NthLocalVar` slot references in
//! the same representation.
//!
//! Values are cheap to clone: payloads are `Rc` handles. Interior sharing is
//! immutable except for `FastDict` (promoted associations mutate in place
//! when uniquely held) and `Opaque` (host objects such as stream handles).
//! The original engine packed values into 16 bytes; that layout is an
//! optimization, not a contract, and this implementation uses a plain wider
//! enum instead.

use std::{
    any::Any,
    cell::RefCell,
    cmp::Ordering,
    fmt::{self, Write},
    hash::{BuildHasher, Hash, Hasher},
    rc::Rc,
};

use ahash::RandomState;
use strum::{Display, IntoStaticStr};

use crate::{
    decl,
    dict::Dict,
    env::EnvRef,
    error::{EvalResult, SourceLoc},
    jit::JitProc,
    peg::ScmParser,
};

/// Native builtin taking evaluated arguments only.
pub type NativeFn = fn(&[Value]) -> EvalResult<Value>;

/// Native builtin that also receives the calling environment.
pub type EnvFn = fn(&EnvRef, &[Value]) -> EvalResult<Value>;

/// Fixed seeds so key hashes are stable for the lifetime of a dict index.
const HASH_SEEDS: (u64, u64, u64, u64) = (0x5175_696c_6c21, 0x517c_3323, 0x9e37_79b9_7f4a_7c15, 0x2545_f491_4f6c_dd1d);

/// Value kind. The explicit discriminants are the tag codes the JIT compares
/// against, so they must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[repr(u64)]
pub enum Tag {
    Nil = 0,
    Bool = 1,
    Int = 2,
    Float = 3,
    Date = 4,
    String = 5,
    Symbol = 6,
    List = 7,
    Vector = 8,
    FastDict = 9,
    Func = 10,
    FuncEnv = 11,
    Proc = 12,
    Jit = 13,
    Parser = 14,
    NthLocalVar = 15,
    SourceInfo = 16,
    Regex = 17,
    Opaque = 18,
}

/// An interpreted lambda: parameter spec, body, and the defining environment.
///
/// `params` is either a list of parameter symbols, a single symbol (bind the
/// whole argument list to it), or nil (no parameters). After optimization the
/// parameter symbols in the body have been rewritten to positional slots and
/// `num_positional_vars` carries the slot count the body needs.
#[derive(Debug)]
pub struct Proc {
    pub params: Value,
    pub body: Value,
    pub env: EnvRef,
    pub num_positional_vars: u32,
}

/// Source annotation wrapping an inner form. Peeled transparently by the
/// evaluator; on error the location is appended to the unwinding trace.
#[derive(Debug)]
pub struct SrcInfo {
    pub source: Rc<str>,
    pub line: u32,
    pub col: u32,
    pub inner: Value,
}

impl SrcInfo {
    #[must_use]
    pub fn loc(&self) -> SourceLoc {
        SourceLoc {
            source: self.source.to_string(),
            line: self.line,
            col: self.col,
        }
    }
}

/// A compiled regular expression together with its source pattern. The
/// pattern is kept for printing and equality.
#[derive(Debug)]
pub struct CompiledRegex {
    pub pattern: Rc<str>,
    pub re: regex::Regex,
}

impl CompiledRegex {
    pub fn compile(pattern: &str, case_insensitive: bool) -> Result<Self, regex::Error> {
        let re = regex::RegexBuilder::new(pattern).case_insensitive(case_insensitive).build()?;
        Ok(Self {
            pattern: Rc::from(pattern),
            re,
        })
    }
}

/// A host object carried through the interpreter opaquely.
///
/// `tag` identifies the concrete type: interpreter-internal objects (streams,
/// sessions, contexts) use tags below 100, host-defined custom types use 100
/// and above.
pub struct OpaqueValue {
    pub tag: u32,
    pub name: &'static str,
    pub data: RefCell<Box<dyn Any>>,
}

impl OpaqueValue {
    pub fn new<T: 'static>(tag: u32, name: &'static str, data: T) -> Rc<Self> {
        Rc::new(Self {
            tag,
            name,
            data: RefCell::new(Box::new(data)),
        })
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OpaqueValue({}#{})", self.name, self.tag)
    }
}

/// Primary runtime value. See the module docs for the representation notes.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    /// Exact integer.
    Int(i64),
    Float(f64),
    /// Unix epoch seconds. Distinct from `Int` so comparisons cannot mix a
    /// timestamp with a plain number.
    Date(i64),
    String(Rc<str>),
    Symbol(Rc<str>),
    /// Immutable sequence; also the syntax node for call expressions.
    List(Rc<[Value]>),
    /// Dense numeric sequence for vector math.
    Vector(Rc<[f64]>),
    /// Promoted association (insertion-ordered pairs plus hash index).
    FastDict(Rc<RefCell<Dict>>),
    Func(NativeFn),
    FuncEnv(EnvFn),
    Proc(Rc<Proc>),
    /// A procedure with a compiled native entry; falls back to interpreting
    /// the wrapped proc whenever the compiled code bails.
    Jit(Rc<JitProc>),
    Parser(Rc<ScmParser>),
    /// AST-only reference to a positional frame slot.
    NthLocalVar(u32),
    SourceInfo(Rc<SrcInfo>),
    Regex(Rc<CompiledRegex>),
    Opaque(Rc<OpaqueValue>),
}

impl Value {
    #[must_use]
    pub fn tag(&self) -> Tag {
        match self {
            Self::Nil => Tag::Nil,
            Self::Bool(_) => Tag::Bool,
            Self::Int(_) => Tag::Int,
            Self::Float(_) => Tag::Float,
            Self::Date(_) => Tag::Date,
            Self::String(_) => Tag::String,
            Self::Symbol(_) => Tag::Symbol,
            Self::List(_) => Tag::List,
            Self::Vector(_) => Tag::Vector,
            Self::FastDict(_) => Tag::FastDict,
            Self::Func(_) => Tag::Func,
            Self::FuncEnv(_) => Tag::FuncEnv,
            Self::Proc(_) => Tag::Proc,
            Self::Jit(_) => Tag::Jit,
            Self::Parser(_) => Tag::Parser,
            Self::NthLocalVar(_) => Tag::NthLocalVar,
            Self::SourceInfo(_) => Tag::SourceInfo,
            Self::Regex(_) => Tag::Regex,
            Self::Opaque(_) => Tag::Opaque,
        }
    }

    // --- constructors ---

    #[must_use]
    pub fn string(text: impl AsRef<str>) -> Self {
        Self::String(Rc::from(text.as_ref()))
    }

    #[must_use]
    pub fn symbol(text: impl AsRef<str>) -> Self {
        Self::Symbol(Rc::from(text.as_ref()))
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::from(items))
    }

    #[must_use]
    pub fn empty_list() -> Self {
        Self::List(Rc::from(Vec::new()))
    }

    /// Numeric-type inference: literals parse as floats, exact integers are
    /// recovered here. Whole floats within the exactly-representable range
    /// become `Int`.
    #[must_use]
    pub fn number(f: f64) -> Self {
        const EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
        if f.fract() == 0.0 && f.abs() < EXACT {
            Self::Int(f as i64)
        } else {
            Self::Float(f)
        }
    }

    // --- accessors ---

    /// Text of a `String` or `Symbol`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) | Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Head symbol text of a call expression, peeling source info.
    #[must_use]
    pub fn head_symbol(&self) -> Option<&str> {
        match self.peel_source() {
            Self::List(items) => items.first()?.peel_source().as_str_symbol(),
            _ => None,
        }
    }

    /// Text of a `Symbol` only (strings excluded).
    #[must_use]
    pub fn as_str_symbol(&self) -> Option<&str> {
        match self {
            Self::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Peels any number of `SourceInfo` wrappers off a reference.
    #[must_use]
    pub fn peel_source(&self) -> &Self {
        let mut v = self;
        while let Self::SourceInfo(info) = v {
            v = &info.inner;
        }
        v
    }

    /// Like [`Value::peel_source`] but consumes the value.
    #[must_use]
    pub fn into_peeled(self) -> Self {
        match self {
            Self::SourceInfo(info) => info.inner.clone().into_peeled(),
            other => other,
        }
    }

    // --- coercions ---

    /// Falsy values: nil, false, zero, and the empty string.
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self.peel_source() {
            Self::Nil => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self.peel_source(), Self::Nil)
    }

    /// Numeric coercion. Unparseable strings coerce to zero rather than
    /// raising, matching SQL expression semantics.
    #[must_use]
    pub fn to_f64(&self) -> f64 {
        match self.peel_source() {
            Self::Bool(b) => f64::from(*b),
            Self::Int(i) | Self::Date(i) => *i as f64,
            Self::Float(f) => *f,
            Self::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    #[must_use]
    pub fn to_i64(&self) -> i64 {
        match self.peel_source() {
            Self::Bool(b) => i64::from(*b),
            Self::Int(i) | Self::Date(i) => *i,
            Self::Float(f) => *f as i64,
            Self::String(s) => {
                let t = s.trim();
                t.parse::<i64>().unwrap_or_else(|_| t.parse::<f64>().unwrap_or(0.0) as i64)
            }
            _ => 0,
        }
    }

    /// String coercion: strings pass through, symbols yield their text,
    /// everything else prints canonically.
    #[must_use]
    pub fn coerce_string(&self) -> String {
        match self.peel_source() {
            Self::String(s) | Self::Symbol(s) => s.to_string(),
            other => other.to_string(),
        }
    }

    // --- equality, ordering, hashing ---

    /// Rich equality: peels source info, compares `Int` and `Float` across
    /// tags numerically, and compares associations as unordered pair
    /// multisets (including a promoted dict against a flat pairs list).
    /// Strings and symbols never compare equal to each other.
    #[must_use]
    pub fn equal(&self, other: &Self) -> bool {
        let a = self.peel_source();
        let b = other.peel_source();
        match (a, b) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(x), Self::Bool(y)) => x == y,
            (Self::Int(x), Self::Int(y)) => x == y,
            (Self::Float(x), Self::Float(y)) => x == y,
            (Self::Int(x), Self::Float(y)) | (Self::Float(y), Self::Int(x)) => (*x as f64) == *y,
            (Self::Date(x), Self::Date(y)) => x == y,
            (Self::String(x), Self::String(y)) | (Self::Symbol(x), Self::Symbol(y)) => x == y,
            (Self::List(x), Self::List(y)) => x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| l.equal(r)),
            (Self::Vector(x), Self::Vector(y)) => x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| l == r),
            (Self::FastDict(x), Self::FastDict(y)) => x.borrow().equal_unordered(&y.borrow()),
            (Self::FastDict(d), Self::List(flat)) | (Self::List(flat), Self::FastDict(d)) => {
                d.borrow().equal_flat_pairs(flat)
            }
            (Self::Func(x), Self::Func(y)) => std::ptr::fn_addr_eq(*x, *y),
            (Self::FuncEnv(x), Self::FuncEnv(y)) => std::ptr::fn_addr_eq(*x, *y),
            (Self::Proc(x), Self::Proc(y)) => Rc::ptr_eq(x, y),
            (Self::Jit(x), Self::Jit(y)) => Rc::ptr_eq(x, y),
            (Self::Parser(x), Self::Parser(y)) => Rc::ptr_eq(x, y),
            (Self::NthLocalVar(x), Self::NthLocalVar(y)) => x == y,
            (Self::Regex(x), Self::Regex(y)) => x.pattern == y.pattern,
            (Self::Opaque(x), Self::Opaque(y)) => Rc::ptr_eq(x, y),
            _ => false,
        }
    }

    /// Strict equality: same tag required, no numeric cross-type collapse.
    #[must_use]
    pub fn equal_strict(&self, other: &Self) -> bool {
        let a = self.peel_source();
        let b = other.peel_source();
        a.tag() == b.tag() && a.equal(b)
    }

    /// Total ordering for sorting and collation. Kinds rank
    /// nil < bool < numbers < dates < strings < symbols < lists < vectors <
    /// dicts < the rest; within a kind the natural order applies.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Nil => 0,
                Value::Bool(_) => 1,
                Value::Int(_) | Value::Float(_) => 2,
                Value::Date(_) => 3,
                Value::String(_) => 4,
                Value::Symbol(_) => 5,
                Value::List(_) => 6,
                Value::Vector(_) => 7,
                Value::FastDict(_) => 8,
                other => 9 + other.tag() as u8,
            }
        }
        let a = self.peel_source();
        let b = other.peel_source();
        match (a, b) {
            (Self::Bool(x), Self::Bool(y)) => x.cmp(y),
            (Self::Int(x), Self::Int(y)) => x.cmp(y),
            (Self::Date(x), Self::Date(y)) => x.cmp(y),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => a.to_f64().total_cmp(&b.to_f64()),
            (Self::String(x), Self::String(y)) | (Self::Symbol(x), Self::Symbol(y)) => x.cmp(y),
            (Self::List(x), Self::List(y)) => {
                for (l, r) in x.iter().zip(y.iter()) {
                    let ord = l.compare(r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            (Self::Vector(x), Self::Vector(y)) => {
                for (l, r) in x.iter().zip(y.iter()) {
                    let ord = l.total_cmp(r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => {
                let by_rank = rank(a).cmp(&rank(b));
                if by_rank != Ordering::Equal {
                    by_rank
                } else if a.equal(b) {
                    Ordering::Equal
                } else {
                    // arbitrary but deterministic within a process
                    (a as *const Self as usize).cmp(&(b as *const Self as usize))
                }
            }
        }
    }

    /// Stable content hash used by the dict index. Values that compare
    /// [`Value::equal`] hash identically; in particular whole floats hash as
    /// their integer value.
    #[must_use]
    pub fn stable_hash(&self) -> u64 {
        let state = RandomState::with_seeds(HASH_SEEDS.0, HASH_SEEDS.1, HASH_SEEDS.2, HASH_SEEDS.3);
        let mut hasher = state.build_hasher();
        self.hash_into(&mut hasher);
        hasher.finish()
    }

    fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        match self.peel_source() {
            Self::Nil => 0u8.hash(hasher),
            Self::Bool(b) => (1u8, b).hash(hasher),
            Self::Int(i) => (2u8, i).hash(hasher),
            Self::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
                    (2u8, *f as i64).hash(hasher);
                } else {
                    (3u8, f.to_bits()).hash(hasher);
                }
            }
            Self::Date(d) => (4u8, d).hash(hasher),
            Self::String(s) => (5u8, s.as_bytes()).hash(hasher),
            Self::Symbol(s) => (6u8, s.as_bytes()).hash(hasher),
            Self::List(items) => {
                (7u8, items.len()).hash(hasher);
                for item in items.iter() {
                    item.hash_into(hasher);
                }
            }
            Self::Vector(items) => {
                (8u8, items.len()).hash(hasher);
                for f in items.iter() {
                    f.to_bits().hash(hasher);
                }
            }
            other => (9u8, other.tag() as u64).hash(hasher),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equal(other)
    }
}

/// Writes `text` double-quoted with the reader's escape set.
pub fn write_quoted(f: &mut impl Write, text: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in text.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '"' => f.write_str("\\\"")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

fn symbol_needs_unquote(text: &str) -> bool {
    text.is_empty() || text.chars().any(|c| c.is_whitespace() || matches!(c, '(' | ')' | '"' | '\''))
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_char(' ')?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    /// The canonical textual form. Strings are double-quoted and escaped,
    /// symbols containing whitespace or parentheses print as
    /// `(unquote "...")`, lists whose head is `list` print with a leading
    /// quote, and lambdas print without descending into their captured
    /// environments.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => {
                let mut buffer = ryu::Buffer::new();
                f.write_str(buffer.format(*x))
            }
            Self::Date(secs) => write!(f, "(date {secs})"),
            Self::String(s) => write_quoted(f, s),
            Self::Symbol(s) => {
                if symbol_needs_unquote(s) {
                    f.write_str("(unquote ")?;
                    write_quoted(f, s)?;
                    f.write_str(")")
                } else {
                    f.write_str(s)
                }
            }
            Self::List(items) => {
                if items.first().and_then(Value::as_str_symbol) == Some("list") {
                    f.write_str("'(")?;
                    write_items(f, &items[1..])?;
                } else {
                    f.write_str("(")?;
                    write_items(f, items)?;
                }
                f.write_str(")")
            }
            Self::Vector(items) => {
                f.write_str("(vector")?;
                let mut buffer = ryu::Buffer::new();
                for x in items.iter() {
                    f.write_str(" ")?;
                    f.write_str(buffer.format(*x))?;
                }
                f.write_str(")")
            }
            Self::FastDict(dict) => {
                f.write_str("'(")?;
                write_items(f, dict.borrow().pairs())?;
                f.write_str(")")
            }
            Self::Func(imp) => match decl::name_of_native(*imp) {
                Some(name) => f.write_str(name),
                None => f.write_str("?"),
            },
            Self::FuncEnv(imp) => match decl::name_of_env_native(*imp) {
                Some(name) => f.write_str(name),
                None => f.write_str("?"),
            },
            Self::Proc(proc) => {
                write!(f, "(lambda {} {}", proc.params, proc.body)?;
                if proc.num_positional_vars > 0 {
                    write!(f, " {}", proc.num_positional_vars)?;
                }
                f.write_str(")")
            }
            Self::Jit(jit) => write!(f, "{}", Self::Proc(jit.proc().clone())),
            Self::Parser(parser) => write!(f, "{}", parser.display_form()),
            Self::NthLocalVar(i) => write!(f, "(var {i})"),
            Self::SourceInfo(info) => write!(f, "{}", info.inner),
            Self::Regex(regex) => {
                f.write_str("(regex ")?;
                write_quoted(f, &regex.pattern)?;
                f.write_str(")")
            }
            Self::Opaque(opaque) => write!(f, "<{}#{}>", opaque.name, opaque.tag),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_inference_recovers_ints() {
        assert_eq!(Value::number(3.0), Value::Int(3));
        assert_eq!(Value::number(3.5), Value::Float(3.5));
        assert_eq!(Value::number(-0.0), Value::Int(0));
        assert!(matches!(Value::number(1e300), Value::Float(_)));
    }

    #[test]
    fn cross_type_numeric_equality() {
        assert!(Value::Int(2).equal(&Value::Float(2.0)));
        assert!(!Value::Int(2).equal_strict(&Value::Float(2.0)));
        assert!(!Value::Int(2).equal(&Value::Date(2)));
        assert!(!Value::string("a").equal(&Value::symbol("a")));
    }

    #[test]
    fn source_info_is_transparent_to_equality() {
        let wrapped = Value::SourceInfo(Rc::new(SrcInfo {
            source: "t".into(),
            line: 1,
            col: 1,
            inner: Value::Int(5),
        }));
        assert!(wrapped.equal(&Value::Int(5)));
        assert_eq!(wrapped.stable_hash(), Value::Int(5).stable_hash());
    }

    #[test]
    fn printer_escapes_strings() {
        assert_eq!(Value::string("a\"b\\c\nd").to_string(), r#""a\"b\\c\nd""#);
    }

    #[test]
    fn printer_quotes_data_lists() {
        let v = Value::list(vec![Value::symbol("list"), Value::Int(1), Value::Int(2)]);
        assert_eq!(v.to_string(), "'(1 2)");
        let call = Value::list(vec![Value::symbol("+"), Value::Int(1), Value::Int(2)]);
        assert_eq!(call.to_string(), "(+ 1 2)");
    }

    #[test]
    fn printer_unquotes_odd_symbols() {
        assert_eq!(Value::symbol("two words").to_string(), "(unquote \"two words\")");
        assert_eq!(Value::symbol("plain").to_string(), "plain");
    }

    #[test]
    fn coercion_of_unparseable_strings_is_zero() {
        assert_eq!(Value::string("bogus").to_f64(), 0.0);
        assert_eq!(Value::string(" 42 ").to_i64(), 42);
        assert_eq!(Value::string("2.5").to_f64(), 2.5);
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::string("").is_truthy());
        assert!(Value::string("x").is_truthy());
        assert!(Value::empty_list().is_truthy());
    }
}
