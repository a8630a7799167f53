//! Persistent interactive sessions.
//!
//! `ReplSession` keeps a global scope alive across `execute()` calls so
//! interactive snippets share definitions. Incomplete forms (an unclosed
//! list or string) keep their partial text buffered and signal the caller to
//! switch to the continuation prompt; anything else either evaluates or
//! reports an error and discards the buffer.

use crate::{
    env::{Env, EnvRef},
    error::ReplError,
    eval, optimizer, reader,
    value::Value,
};

/// Interpreter configuration, fixed per session.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Keep source annotations through optimization so error chains carry
    /// `at file:line:col` locations.
    pub debug: bool,
    /// Let `lambda` hand trivially shaped procedures to the native emitter.
    pub jit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self { debug: true, jit: true }
    }
}

/// Result of feeding one line to the session.
#[derive(Debug)]
pub enum ReplProgress {
    /// The buffered input formed complete expressions; this is the last
    /// result.
    Complete(Value),
    /// The input is not a complete form yet; feed more lines.
    Incomplete,
}

/// An interactive session holding its global scope and partial input.
pub struct ReplSession {
    globals: EnvRef,
    config: Config,
    buffer: String,
}

impl ReplSession {
    #[must_use]
    pub fn new(config: Config) -> Self {
        eval::set_jit_enabled(config.jit);
        Self {
            globals: Env::new_global(),
            config,
            buffer: String::new(),
        }
    }

    /// The session's global scope, for hosts that want to inject bindings.
    #[must_use]
    pub fn globals(&self) -> &EnvRef {
        &self.globals
    }

    /// True when a previous line left an unfinished form buffered.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Drops any buffered partial input (the Ctrl-C behavior).
    pub fn clear_pending(&mut self) {
        self.buffer.clear();
    }

    /// Feeds one line of input. Evaluates every completed top-level form and
    /// returns the last result, or asks for more input.
    pub fn execute(&mut self, line: &str) -> Result<ReplProgress, ReplError> {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(line);
        let forms = match reader::read_multi("repl", &self.buffer) {
            Ok(forms) => forms,
            Err(error) if error.is_incomplete() => return Ok(ReplProgress::Incomplete),
            Err(error) => {
                self.buffer.clear();
                return Err(error.into());
            }
        };
        self.buffer.clear();
        let mut last = Value::Nil;
        for form in &forms {
            let optimized = optimizer::optimize(form, self.config.debug);
            last = eval::eval(&optimized, &self.globals)?;
        }
        Ok(ReplProgress::Complete(last))
    }
}

/// Runs a whole source text in a fresh global scope and returns the value of
/// the last top-level form.
pub fn run_source(source: &str, text: &str, config: Config) -> Result<Value, ReplError> {
    eval::set_jit_enabled(config.jit);
    let globals = Env::new_global();
    let mut last = Value::Nil;
    for form in &reader::read_multi(source, text)? {
        let optimized = optimizer::optimize(form, config.debug);
        last = eval::eval(&optimized, &globals)?;
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definitions_persist_across_lines() {
        let mut session = ReplSession::new(Config::default());
        session.execute("(define x 20)").unwrap();
        let ReplProgress::Complete(v) = session.execute("(+ x 2)").unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(v, Value::Int(22));
    }

    #[test]
    fn incomplete_forms_stay_buffered() {
        let mut session = ReplSession::new(Config::default());
        assert!(matches!(session.execute("(+ 1").unwrap(), ReplProgress::Incomplete));
        assert!(session.is_pending());
        let ReplProgress::Complete(v) = session.execute("2)").unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(v, Value::Int(3));
        assert!(!session.is_pending());
    }

    #[test]
    fn a_stray_close_discards_the_buffer() {
        let mut session = ReplSession::new(Config::default());
        assert!(session.execute(")").is_err());
        assert!(!session.is_pending());
    }

    #[test]
    fn errors_carry_source_locations_in_debug() {
        let mut session = ReplSession::new(Config::default());
        let err = session.execute("(car '())").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("repl:1:"), "missing location in {message}");
    }
}
