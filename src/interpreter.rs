//! Tree-walking execution core.
//!
//! The `Interpreter` owns the environment chain, the current-generator slot
//! used by the suspension engine, and the voice channel. Statement and
//! expression evaluation live in `runtime`; the value model in `value`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{Program, StmtKind};
use crate::builtins::Builtin;
use crate::voice::{self, Voice};

pub mod env;
pub mod error;
pub mod value;

mod runtime;

use env::{env_define, Environment, EnvRef};
use error::RuntimeError;
use value::{GenFrame, Generator, Value};

use runtime::Flow;

pub struct Interpreter {
    pub(crate) global_env: EnvRef,
    pub(crate) current_env: EnvRef,

    /// Generator currently being driven, if any.
    pub(crate) current_gen: Option<Rc<RefCell<Generator>>>,
    /// Saved suspension frames being consumed during a resume, outermost last.
    pub(crate) resume: Vec<GenFrame>,
    pub(crate) resuming: bool,
    /// Value injected by `disrupt`, raised at the next statement boundary
    /// after the resume position is reconstructed.
    pub(crate) pending_disrupt: Option<Value>,

    pub(crate) anomaly_mode: bool,

    /// Consecutive-repeat tracking for the escalating error report.
    last_error: String,
    error_repeats: u32,

    pub(crate) voice: Box<dyn Voice>,
}

impl Interpreter {
    pub fn new(voice: Box<dyn Voice>) -> Self {
        let global_env = Environment::root();
        for (name, builtin) in Builtin::bindings() {
            env_define(&global_env, name, Value::Builtin(*builtin));
        }
        Self {
            current_env: global_env.clone(),
            global_env,
            current_gen: None,
            resume: Vec::new(),
            resuming: false,
            pending_disrupt: None,
            anomaly_mode: false,
            last_error: String::new(),
            error_repeats: 0,
            voice,
        }
    }

    /// Execute a parsed program; the result is the value of the last
    /// top-level expression statement (for REPL display), or null.
    pub fn execute(&mut self, program: &Program) -> Result<Value, RuntimeError> {
        let mut last = Value::Null;
        for stmt in &program.statements {
            if let StmtKind::Expr(expr) = &stmt.kind {
                last = self.eval_expr(expr)?;
            } else {
                last = Value::Null;
                match self.exec_stmt_top(stmt)? {
                    Flow::Normal => {}
                    // A stray yield/break/continue at the top level ends the
                    // run quietly.
                    _ => break,
                }
            }
        }
        Ok(last)
    }

    fn exec_stmt_top(&mut self, stmt: &crate::ast::Stmt) -> Result<Flow, RuntimeError> {
        self.exec_block(std::slice::from_ref(stmt))
    }

    pub fn anomaly_mode(&self) -> bool {
        self.anomaly_mode
    }

    /// The root scope, for embedders that pre-bind values.
    pub fn global_env(&self) -> &EnvRef {
        &self.global_env
    }

    /// Record and narrate a runtime failure; consecutive repeats of the same
    /// message escalate the report.
    pub(crate) fn raise(&mut self, message: impl Into<String>, line: usize) -> RuntimeError {
        let message = message.into();
        if message == self.last_error {
            self.error_repeats += 1;
        } else {
            self.last_error = message.clone();
            self.error_repeats = 1;
        }
        self.voice
            .narrate(&voice::runtime_error(&message, line, self.error_repeats));
        RuntimeError::raised(message, line)
    }
}
