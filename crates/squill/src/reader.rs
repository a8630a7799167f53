//! S-expression reader.
//!
//! Tokenizes UTF-8 source with a character-level state machine and builds the
//! value tree. Each `(` records its source name, line, and column; a
//! completed list is wrapped in `SourceInfo` so runtime errors can report
//! where the form came from. Numeric literals parse as floats; exact integers
//! are recovered by [`Value::number`].

use std::rc::Rc;

use crate::{
    error::{ReadError, SourceLoc},
    value::{SrcInfo, Value},
};

/// Tokenizer states. `Default` dispatches on the next character; the rest
/// accumulate one token kind each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Default,
    InNumber,
    InSymbol,
    InString,
    InStringEscape,
    InBlockComment,
    CommentClosing,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(SourceLoc),
    Close(SourceLoc),
    Quote,
    Atom(Value),
}

struct Lexer<'a> {
    source: Rc<str>,
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    fn new(source: &str, text: &'a str) -> Self {
        Self {
            source: Rc::from(source),
            chars: text.chars().peekable(),
            line: 1,
            col: 1,
        }
    }

    fn loc(&self) -> SourceLoc {
        SourceLoc {
            source: self.source.to_string(),
            line: self.line,
            col: self.col,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn is_delimiter(c: char) -> bool {
        c.is_whitespace() || matches!(c, '(' | ')' | '"' | '\'')
    }

    /// Runs the state machine until one token is complete.
    fn next_token(&mut self) -> Result<Option<Token>, ReadError> {
        let mut state = State::Default;
        let mut buf = String::new();
        // set when a token starts; comments reset to Default without one
        let mut start = self.loc();
        let mut comment_open = start.clone();

        loop {
            match state {
                State::Default => {
                    let Some(&c) = self.chars.peek() else {
                        return Ok(None);
                    };
                    if c.is_whitespace() {
                        self.bump();
                        continue;
                    }
                    start = self.loc();
                    match c {
                        '(' => {
                            self.bump();
                            return Ok(Some(Token::Open(start)));
                        }
                        ')' => {
                            self.bump();
                            return Ok(Some(Token::Close(start)));
                        }
                        '\'' => {
                            self.bump();
                            return Ok(Some(Token::Quote));
                        }
                        '"' => {
                            self.bump();
                            state = State::InString;
                        }
                        '/' => {
                            self.bump();
                            if self.chars.peek() == Some(&'*') {
                                self.bump();
                                comment_open = start.clone();
                                state = State::InBlockComment;
                            } else {
                                buf.push('/');
                                state = State::InSymbol;
                            }
                        }
                        c if c.is_ascii_digit() => {
                            state = State::InNumber;
                        }
                        '-' | '+' | '.' => {
                            // sign or dot starts a number only when a digit follows
                            let mut probe = self.chars.clone();
                            probe.next();
                            state = if probe.peek().is_some_and(char::is_ascii_digit) {
                                State::InNumber
                            } else {
                                State::InSymbol
                            };
                        }
                        _ => {
                            state = State::InSymbol;
                        }
                    }
                }
                State::InNumber | State::InSymbol => {
                    match self.chars.peek() {
                        Some(&c) if !Self::is_delimiter(c) => {
                            buf.push(c);
                            self.bump();
                        }
                        _ => {
                            if state == State::InNumber
                                && let Ok(f) = buf.parse::<f64>()
                            {
                                return Ok(Some(Token::Atom(Value::number(f))));
                            }
                            // the three literal keywords are values, not names
                            let atom = match buf.as_str() {
                                "nil" => Value::Nil,
                                "true" => Value::Bool(true),
                                "false" => Value::Bool(false),
                                _ => Value::symbol(&buf),
                            };
                            return Ok(Some(Token::Atom(atom)));
                        }
                    }
                }
                State::InString => match self.bump() {
                    None => return Err(ReadError::UnterminatedString(start)),
                    Some('"') => return Ok(Some(Token::Atom(Value::string(&buf)))),
                    Some('\\') => state = State::InStringEscape,
                    Some(c) => buf.push(c),
                },
                State::InStringEscape => {
                    let escape_loc = self.loc();
                    match self.bump() {
                        None => return Err(ReadError::UnterminatedString(start)),
                        Some('\\') => buf.push('\\'),
                        Some('"') => buf.push('"'),
                        Some('n') => buf.push('\n'),
                        Some('r') => buf.push('\r'),
                        Some('t') => buf.push('\t'),
                        Some(c) => return Err(ReadError::BadEscape(escape_loc, c)),
                    }
                    state = State::InString;
                }
                State::InBlockComment => match self.bump() {
                    None => return Err(ReadError::UnclosedComment(comment_open)),
                    Some('*') => state = State::CommentClosing,
                    Some(_) => {}
                },
                State::CommentClosing => match self.bump() {
                    None => return Err(ReadError::UnclosedComment(comment_open)),
                    Some('/') => state = State::Default,
                    Some('*') => {}
                    Some(_) => state = State::InBlockComment,
                },
            }
        }
    }
}

fn tokenize(source: &str, text: &str) -> Result<Vec<Token>, ReadError> {
    let mut lexer = Lexer::new(source, text);
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

struct TreeBuilder {
    tokens: Vec<Token>,
    pos: usize,
}

impl TreeBuilder {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parses one form. `quote_depth` tracks whether we are inside quoted
    /// data, so `'` before `(` becomes a `list` head.
    fn form(&mut self) -> Result<Value, ReadError> {
        match self.next() {
            // input ran out mid-form (e.g. a quote with nothing after it)
            None => Err(ReadError::Unclosed(SourceLoc {
                source: String::new(),
                line: 0,
                col: 0,
            })),
            Some(Token::Close(loc)) => Err(ReadError::UnexpectedClose(loc)),
            Some(Token::Atom(v)) => Ok(v),
            Some(Token::Quote) => match self.peek() {
                Some(Token::Open(_)) => {
                    let Some(Token::Open(loc)) = self.next() else { unreachable!() };
                    self.list_body(loc, Some(Value::symbol("list")))
                }
                _ => {
                    let inner = self.form()?;
                    Ok(Value::list(vec![Value::symbol("quote"), inner]))
                }
            },
            Some(Token::Open(loc)) => self.list_body(loc, None),
        }
    }

    /// Consumes forms up to the matching `)` and wraps the list in source
    /// info at the opening location.
    fn list_body(&mut self, open: SourceLoc, head: Option<Value>) -> Result<Value, ReadError> {
        let mut items = Vec::new();
        if let Some(head) = head {
            items.push(head);
        }
        loop {
            match self.peek() {
                None => return Err(ReadError::Unclosed(open)),
                Some(Token::Close(_)) => {
                    self.next();
                    let list = Value::list(items);
                    return Ok(Value::SourceInfo(Rc::new(SrcInfo {
                        source: Rc::from(open.source.as_str()),
                        line: open.line,
                        col: open.col,
                        inner: list,
                    })));
                }
                Some(_) => items.push(self.form()?),
            }
        }
    }
}

/// Reads every top-level form in `text`.
pub fn read_multi(source: &str, text: &str) -> Result<Vec<Value>, ReadError> {
    let tokens = tokenize(source, text)?;
    let mut builder = TreeBuilder { tokens, pos: 0 };
    let mut forms = Vec::new();
    while builder.peek().is_some() {
        forms.push(builder.form()?);
    }
    Ok(forms)
}

/// Reads `text` and returns the last top-level form, nil for empty input.
pub fn read_one(source: &str, text: &str) -> Result<Value, ReadError> {
    let mut forms = read_multi(source, text)?;
    Ok(forms.pop().unwrap_or(Value::Nil))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peeled(text: &str) -> Value {
        read_one("test", text).unwrap().into_peeled()
    }

    #[test]
    fn reads_numbers_and_symbols() {
        assert_eq!(peeled("42"), Value::Int(42));
        assert_eq!(peeled("2.5"), Value::Float(2.5));
        assert_eq!(peeled("-7"), Value::Int(-7));
        assert_eq!(peeled("foo"), Value::symbol("foo"));
        assert_eq!(peeled("-"), Value::symbol("-"));
        assert_eq!(peeled("/"), Value::symbol("/"));
    }

    #[test]
    fn keyword_literals_read_as_values() {
        assert_eq!(peeled("nil"), Value::Nil);
        assert_eq!(peeled("true"), Value::Bool(true));
        assert_eq!(peeled("false"), Value::Bool(false));
        // only exact matches are literals
        assert_eq!(peeled("nils"), Value::symbol("nils"));
    }

    #[test]
    fn reads_call_forms() {
        let v = peeled("(+ 1 2 3)");
        let items = v.as_list().unwrap();
        assert_eq!(items[0].peel_source(), &Value::symbol("+"));
        assert_eq!(items.len(), 4);
    }

    #[test]
    fn quote_before_list_reads_as_list_head() {
        let v = peeled("'(1 2)");
        let items = v.as_list().unwrap();
        assert_eq!(items[0].peel_source(), &Value::symbol("list"));
        assert_eq!(items[1].peel_source(), &Value::Int(1));
    }

    #[test]
    fn quote_before_atom_reads_as_quote() {
        let v = peeled("'x");
        let items = v.as_list().unwrap();
        assert_eq!(items[0], Value::symbol("quote"));
        assert_eq!(items[1], Value::symbol("x"));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(peeled(r#""a\"b\n""#), Value::string("a\"b\n"));
        assert!(matches!(
            read_one("test", r#""a\q""#),
            Err(ReadError::BadEscape(_, 'q'))
        ));
    }

    #[test]
    fn unterminated_string_reports_opening_location() {
        let Err(ReadError::UnterminatedString(loc)) = read_one("test", "  \"abc") else {
            panic!("expected UnterminatedString");
        };
        assert_eq!((loc.line, loc.col), (1, 3));
    }

    #[test]
    fn unclosed_list_reports_opening_location() {
        let Err(ReadError::Unclosed(loc)) = read_one("test", "(foo (bar") else {
            panic!("expected Unclosed");
        };
        assert_eq!((loc.line, loc.col), (1, 6));
    }

    #[test]
    fn block_comments_are_skipped() {
        assert_eq!(peeled("/* note */ 5"), Value::Int(5));
        assert_eq!(peeled("(+ 1 /* two */ 2)").as_list().unwrap().len(), 3);
    }

    #[test]
    fn source_info_carries_open_location() {
        let v = read_one("db.scm", "\n  (x)").unwrap();
        let Value::SourceInfo(info) = v else { panic!("expected source info") };
        assert_eq!((&*info.source, info.line, info.col), ("db.scm", 2, 3));
    }

    #[test]
    fn multi_form_input_returns_last() {
        assert_eq!(peeled("1 2 3"), Value::Int(3));
        let forms = read_multi("test", "1 2 3").unwrap();
        assert_eq!(forms.len(), 3);
    }
}
