use std::cell::RefCell;
use std::rc::Rc;

use crate::ast::{
    BinaryOp, Expr, ExprKind, LambdaBody, Param, Stmt, StmtKind, UnaryOp,
};
use crate::builtins::{self, Builtin};
use crate::voice;
use crate::{lexer, parser};

use super::env::{env_define, env_force_set_global, env_get, env_set, Environment};
use super::error::RuntimeError;
use super::value::{
    ClassDef, Function, FunctionKind, GenFrame, GenStatus, Generator, Instance, PromiseState,
    Value,
};
use super::Interpreter;

/// Control-flow outcome of statement execution. `Return` carries the value
/// of a `yield`: the return value of an ordinary call, or the yielded value
/// of a suspending generator.
pub(crate) enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

type Exec = Result<Flow, RuntimeError>;

fn stmts_addr(stmts: &[Stmt]) -> usize {
    stmts.as_ptr() as usize
}

fn stmt_addr(stmt: &Stmt) -> usize {
    stmt as *const Stmt as usize
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::IntDiv => "//",
        BinaryOp::Mod => "%",
        BinaryOp::Pow => "**",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
    }
}

impl Interpreter {
    // ------------------------------------------------------------------
    // Blocks and the suspension stack
    // ------------------------------------------------------------------

    fn gen_stack_len(&self) -> usize {
        self.current_gen
            .as_ref()
            .map(|g| g.borrow().stack.len())
            .unwrap_or(0)
    }

    fn push_gen_frame(&mut self, frame: GenFrame) {
        if let Some(gen) = &self.current_gen {
            gen.borrow_mut().stack.push(frame);
        }
    }

    fn pop_resume(&mut self) {
        self.resume.pop();
        self.resuming = !self.resume.is_empty();
    }

    pub(crate) fn exec_block(&mut self, stmts: &[Stmt]) -> Exec {
        let mut start = 0;
        if self.resuming {
            if let Some(GenFrame::Block { node, index }) = self.resume.last() {
                if *node == stmts_addr(stmts) {
                    start = *index;
                    self.pop_resume();
                }
                // A non-matching frame belongs to a deeper construct; leave
                // it for the handler that owns it.
            }
        }

        let mut i = start;
        while i < stmts.len() {
            if !self.resuming {
                if let Some(thrown) = self.pending_disrupt.take() {
                    let line = stmts[i].line();
                    return Err(
                        self.raise(format!("Disruption injected: {}", thrown.raw_text()), line)
                    );
                }
            }
            let depth = self.gen_stack_len();
            match self.exec_stmt(&stmts[i])? {
                Flow::Normal => {}
                Flow::Return(value) => {
                    if self.current_gen.is_some() {
                        // If a child construct recorded its position, control
                        // must re-enter this statement, not the next one.
                        let child_suspended = self.gen_stack_len() > depth;
                        self.push_gen_frame(GenFrame::Block {
                            node: stmts_addr(stmts),
                            index: if child_suspended { i } else { i + 1 },
                        });
                    }
                    return Ok(Flow::Return(value));
                }
                other => return Ok(other),
            }
            i += 1;
        }
        Ok(Flow::Normal)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn exec_stmt(&mut self, stmt: &Stmt) -> Exec {
        match &stmt.kind {
            StmtKind::Designate { target, value } => {
                let value = self.eval_expr(value)?;
                self.assign_to_target(target, value, true)?;
                Ok(Flow::Normal)
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval_expr(value)?;
                self.assign_to_target(target, value, false)?;
                Ok(Flow::Normal)
            }
            StmtKind::Expr(expr) => {
                self.eval_expr(expr)?;
                Ok(Flow::Normal)
            }
            StmtKind::Foresee {
                condition,
                body,
                alternates,
                otherwise,
            } => {
                let taken = self.eval_expr(condition)?.is_truthy();
                if taken {
                    return self.exec_block(body);
                }
                for (alt_condition, alt_body) in alternates {
                    if self.eval_expr(alt_condition)?.is_truthy() {
                        return self.exec_block(alt_body);
                    }
                }
                if !otherwise.is_empty() {
                    return self.exec_block(otherwise);
                }
                Ok(Flow::Normal)
            }
            StmtKind::CycleWhile { condition, body } => {
                self.exec_cycle_while(stmt, condition, body)
            }
            StmtKind::CycleThrough {
                iterable,
                pattern,
                body,
            } => self.exec_cycle_through(stmt, iterable, pattern, body),
            StmtKind::CycleFromTo {
                start,
                end,
                pattern,
                body,
            } => self.exec_cycle_from_to(stmt, start, end, pattern, body),
            StmtKind::Protocol(def) => {
                let func = Function::protocol(def.clone(), self.current_env.clone());
                env_define(
                    &self.current_env,
                    &def.name,
                    Value::Function(Rc::new(func)),
                );
                Ok(Flow::Normal)
            }
            StmtKind::Yield(value) => {
                let value = match value {
                    Some(expr) => self.eval_expr(expr)?,
                    None => Value::Null,
                };
                Ok(Flow::Return(value))
            }
            StmtKind::Break => Ok(Flow::Break),
            StmtKind::Continue => Ok(Flow::Continue),
            StmtKind::Delegate(iterable) => self.exec_delegate(stmt, iterable),
            StmtKind::Scheme { body } => {
                self.voice.narrate(&voice::scheme_registered());
                let flow = self.exec_block(body)?;
                self.voice.narrate(&voice::scheme_executed());
                Ok(flow)
            }
            StmtKind::Preview(expr) => {
                let value = self.eval_expr(expr)?;
                self.voice.narrate(&voice::preview(&value.to_display()));
                Ok(Flow::Normal)
            }
            StmtKind::Override { name, value } => {
                let value = self.eval_expr(value)?;
                env_force_set_global(&self.current_env, name, value.clone());
                self.voice
                    .narrate(&voice::override_applied(name, &value.to_display()));
                Ok(Flow::Normal)
            }
            StmtKind::Absolute { condition, text } => {
                let value = self.eval_expr(condition)?;
                if !value.is_truthy() {
                    self.voice.narrate(&voice::absolute_failed(text));
                }
                Ok(Flow::Normal)
            }
            StmtKind::Anomaly { body } => {
                self.voice.narrate(&voice::anomaly_enter());
                self.anomaly_mode = true;
                let result = self.exec_block(body);
                self.anomaly_mode = false;
                self.voice.narrate(&voice::anomaly_exit());
                result
            }
            StmtKind::Entity {
                name,
                parent,
                members,
            } => self.exec_entity(name, parent.as_deref(), members),
            StmtKind::Incorporate { path } => self.exec_incorporate(path, stmt.line()),
            StmtKind::Attempt { body, recover } => {
                match self.exec_block(body) {
                    Ok(flow) => Ok(flow),
                    Err(err @ RuntimeError::Terminated { .. }) => Err(err),
                    Err(err) => {
                        let Some(recover) = recover else {
                            return Err(err);
                        };
                        self.voice.narrate(&voice::deviation_intercepted());
                        if let Some(binding) = &recover.binding {
                            env_define(
                                &self.current_env,
                                binding,
                                Value::Str(err.message()),
                            );
                        }
                        self.exec_block(&recover.body)
                    }
                }
            }
            StmtKind::Situation { value, alignments } => {
                let scrutinee = self.eval_expr(value)?;
                for alignment in alignments.iter().filter(|a| !a.is_otherwise) {
                    for candidate in &alignment.values {
                        if self.eval_expr(candidate)? == scrutinee {
                            return self.exec_block(&alignment.body);
                        }
                    }
                }
                if let Some(fallback) = alignments.iter().find(|a| a.is_otherwise) {
                    return self.exec_block(&fallback.body);
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn exec_cycle_while(&mut self, stmt: &Stmt, condition: &Expr, body: &[Stmt]) -> Exec {
        let node = stmt_addr(stmt);
        loop {
            let mut resumed_into_body = false;
            if self.resuming {
                if let Some(GenFrame::CycleWhile { node: n }) = self.resume.last() {
                    if *n == node {
                        self.pop_resume();
                        resumed_into_body = true;
                    }
                }
            }
            if !resumed_into_body && !self.eval_expr(condition)?.is_truthy() {
                break;
            }
            match self.exec_block(body)? {
                Flow::Normal => {}
                Flow::Continue => continue,
                Flow::Break => break,
                Flow::Return(value) => {
                    if self.current_gen.is_some() {
                        self.push_gen_frame(GenFrame::CycleWhile { node });
                    }
                    return Ok(Flow::Return(value));
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_cycle_through(
        &mut self,
        stmt: &Stmt,
        iterable_expr: &Expr,
        pattern: &Expr,
        body: &[Stmt],
    ) -> Exec {
        let node = stmt_addr(stmt);
        let mut start_idx = 0usize;
        let mut saved_iterable = None;
        let mut resuming_into_gen_body = false;

        if self.resuming {
            if let Some(GenFrame::CycleThrough {
                node: n,
                iterable,
                index,
            }) = self.resume.last()
            {
                if *n == node {
                    saved_iterable = Some(iterable.clone());
                    start_idx = *index;
                }
            }
            if saved_iterable.is_some() {
                self.pop_resume();
                // For a generator source, deeper frames mean control resumes
                // inside the body rather than pulling a fresh value.
                if matches!(saved_iterable, Some(Value::Generator(_))) && self.resuming {
                    resuming_into_gen_body = true;
                }
            }
        }

        let iterable = match saved_iterable {
            Some(v) => v,
            None => self.eval_expr(iterable_expr)?,
        };

        match &iterable {
            Value::List(items) => {
                let items = items.clone();
                let mut idx = start_idx;
                while idx < items.len() {
                    self.assign_to_target(pattern, items[idx].clone(), true)?;
                    match self.exec_block(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        Flow::Return(value) => {
                            if self.current_gen.is_some() {
                                self.push_gen_frame(GenFrame::CycleThrough {
                                    node,
                                    iterable: iterable.clone(),
                                    index: idx,
                                });
                            }
                            return Ok(Flow::Return(value));
                        }
                    }
                    idx += 1;
                }
                Ok(Flow::Normal)
            }
            Value::Generator(inner) => {
                let inner = inner.clone();
                let mut first_iteration = true;
                loop {
                    let resuming_into_body = first_iteration && resuming_into_gen_body;
                    first_iteration = false;

                    if !resuming_into_body {
                        let next = self.generator_next(&inner)?;
                        let done = inner.borrow().status == GenStatus::Done;
                        if matches!(next, Value::Null) && done {
                            break;
                        }
                        self.assign_to_target(pattern, next, true)?;
                    }

                    match self.exec_block(body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        Flow::Return(value) => {
                            if self.current_gen.is_some() {
                                self.push_gen_frame(GenFrame::CycleThrough {
                                    node,
                                    iterable: iterable.clone(),
                                    index: 0,
                                });
                            }
                            return Ok(Flow::Return(value));
                        }
                    }
                }
                Ok(Flow::Normal)
            }
            _ => Err(self.raise("Can only cycle through a list or sequence.", stmt.line())),
        }
    }

    fn exec_cycle_from_to(
        &mut self,
        stmt: &Stmt,
        start: &Expr,
        end: &Expr,
        pattern: &Expr,
        body: &[Stmt],
    ) -> Exec {
        let node = stmt_addr(stmt);
        let mut resumed_bounds = None;
        if self.resuming {
            if let Some(GenFrame::CycleFromTo {
                node: n,
                current,
                end,
            }) = self.resume.last()
            {
                if *n == node {
                    resumed_bounds = Some((*current, *end));
                }
            }
            if resumed_bounds.is_some() {
                self.pop_resume();
            }
        }

        let (mut current, end_val) = match resumed_bounds {
            Some(bounds) => bounds,
            None => {
                let start = match self.eval_expr(start)? {
                    Value::Int(i) => i,
                    _ => 0,
                };
                let end = match self.eval_expr(end)? {
                    Value::Int(i) => i,
                    _ => 0,
                };
                (start, end)
            }
        };

        while current < end_val {
            self.assign_to_target(pattern, Value::Int(current), true)?;
            match self.exec_block(body)? {
                Flow::Normal | Flow::Continue => {}
                Flow::Break => break,
                Flow::Return(value) => {
                    if self.current_gen.is_some() {
                        self.push_gen_frame(GenFrame::CycleFromTo {
                            node,
                            current,
                            end: end_val,
                        });
                    }
                    return Ok(Flow::Return(value));
                }
            }
            current += 1;
        }
        Ok(Flow::Normal)
    }

    fn exec_delegate(&mut self, stmt: &Stmt, iterable_expr: &Expr) -> Exec {
        let node = stmt_addr(stmt);
        let mut start_idx = 0usize;
        let mut saved_iterable = None;

        if self.resuming {
            if let Some(GenFrame::Delegate {
                node: n,
                iterable,
                index,
            }) = self.resume.last()
            {
                if *n == node {
                    saved_iterable = Some(iterable.clone());
                    start_idx = *index;
                }
            }
            if saved_iterable.is_some() {
                self.pop_resume();
            }
        }

        let iterable = match saved_iterable {
            Some(v) => v,
            None => self.eval_expr(iterable_expr)?,
        };

        match &iterable {
            Value::List(items) => {
                if start_idx < items.len() {
                    let value = items[start_idx].clone();
                    if self.current_gen.is_some() {
                        self.push_gen_frame(GenFrame::Delegate {
                            node,
                            iterable: iterable.clone(),
                            index: start_idx + 1,
                        });
                    }
                    return Ok(Flow::Return(value));
                }
                Ok(Flow::Normal)
            }
            Value::Generator(inner) => {
                let inner = inner.clone();
                let next = self.generator_next(&inner)?;
                let done = inner.borrow().status == GenStatus::Done;
                if matches!(next, Value::Null) && done {
                    return Ok(Flow::Normal);
                }
                if self.current_gen.is_some() {
                    self.push_gen_frame(GenFrame::Delegate {
                        node,
                        iterable: iterable.clone(),
                        index: 0,
                    });
                }
                Ok(Flow::Return(next))
            }
            _ => Err(self.raise("Can only delegate to a list or sequence.", stmt.line())),
        }
    }

    fn exec_entity(&mut self, name: &str, parent: Option<&str>, members: &[Stmt]) -> Exec {
        let parent_class = parent.and_then(|pname| match env_get(&self.global_env, pname) {
            Some(Value::Class(p)) => Some(p),
            _ => None,
        });
        let methods = match &parent_class {
            Some(p) => Environment::child(p.methods.clone()),
            None => Environment::child(self.current_env.clone()),
        };

        for member in members {
            if let StmtKind::Protocol(def) = &member.kind {
                let method = Function::protocol(def.clone(), methods.clone());
                env_define(&methods, &def.name, Value::Function(Rc::new(method)));
            }
        }

        let class = Rc::new(ClassDef {
            name: name.to_string(),
            parent: parent_class,
            methods,
        });
        env_define(&self.global_env, name, Value::Class(class));
        self.voice.narrate(&voice::entity_defined(name));
        Ok(Flow::Normal)
    }

    fn exec_incorporate(&mut self, path: &str, line: usize) -> Exec {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(_) => {
                self.voice.narrate(&voice::incorporate_missing(path));
                return Err(self.raise("Incorporate failed: file not found", line));
            }
        };
        self.voice.narrate(&voice::incorporate(path));

        let tokens = match lexer::tokenize(&source) {
            Ok(tokens) => tokens,
            Err(e) => return Err(self.raise(format!("Incorporate failed: {e}"), line)),
        };
        let program = match parser::parse_tokens(tokens, &source) {
            Ok(program) => program,
            Err(e) => return Err(self.raise(format!("Incorporate failed: {e}"), line)),
        };
        // Definitions hold their AST behind Rc, so the imported program can
        // drop here without dangling anything.
        self.exec_block(&program.statements)
    }

    // ------------------------------------------------------------------
    // Assignment targets
    // ------------------------------------------------------------------

    pub(crate) fn assign_to_target(
        &mut self,
        target: &Expr,
        value: Value,
        designate: bool,
    ) -> Result<(), RuntimeError> {
        match &target.kind {
            ExprKind::Identifier(name) => {
                if designate {
                    env_define(&self.current_env, name, value);
                } else {
                    env_set(&self.current_env, name, value);
                }
                Ok(())
            }
            ExprKind::List(patterns) => {
                let Value::List(items) = value else {
                    return Err(
                        self.raise("Unable to destructure non-list value.", target.line())
                    );
                };
                // Extra target slots get null; extra source items are dropped.
                for (i, pattern) in patterns.iter().enumerate() {
                    let item = items.get(i).cloned().unwrap_or(Value::Null);
                    self.assign_to_target(pattern, item, designate)?;
                }
                Ok(())
            }
            ExprKind::Member { object, name } => {
                let obj = self.eval_expr(object)?;
                let Value::Instance(instance) = obj else {
                    return Err(self.raise("Only instances have properties.", target.line()));
                };
                self.check_private_access(name, &instance, target.line(), true)?;
                env_set(&instance.fields, name, value);
                Ok(())
            }
            ExprKind::Index { object, index } => {
                let idx = self.eval_expr(index)?;
                let mut container = self.eval_expr(object)?;
                match (&mut container, &idx) {
                    (Value::List(items), Value::Int(i)) => {
                        if *i >= 0 && (*i as usize) < items.len() {
                            items[*i as usize] = value;
                        } else {
                            return Err(self.raise("List index out of bounds.", target.line()));
                        }
                    }
                    (Value::Dict(pairs), Value::Str(key)) => {
                        if let Some(slot) = pairs.iter_mut().find(|(k, _)| k == key) {
                            slot.1 = value;
                        } else {
                            pairs.push((key.clone(), value));
                        }
                    }
                    _ => return Err(self.raise("Invalid index access.", target.line())),
                }
                // Write the updated container back through its own l-value.
                self.assign_to_target(object, container, false)
            }
            _ => Err(self.raise("Invalid assignment target.", target.line())),
        }
    }

    fn check_private_access(
        &mut self,
        name: &str,
        instance: &Rc<Instance>,
        line: usize,
        write: bool,
    ) -> Result<(), RuntimeError> {
        if !name.starts_with('_') {
            return Ok(());
        }
        match env_get(&self.current_env, "self") {
            Some(Value::Instance(current)) if Rc::ptr_eq(&current, instance) => Ok(()),
            _ => {
                let message = if write {
                    "Modification of private member inhibited."
                } else {
                    "Access to private member inhibited."
                };
                Err(self.raise(message, line))
            }
        }
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(crate) fn eval_expr(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        match &expr.kind {
            ExprKind::Integer(i) => Ok(Value::Int(*i)),
            ExprKind::Float(f) => Ok(Value::Float(*f)),
            ExprKind::Str(s) => Ok(Value::Str(s.clone())),
            ExprKind::Bool(b) => Ok(Value::Bool(*b)),
            ExprKind::List(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    if let ExprKind::Spread(inner) = &element.kind {
                        if let Value::List(spread) = self.eval_expr(inner)? {
                            items.extend(spread);
                        }
                    } else {
                        items.push(self.eval_expr(element)?);
                    }
                }
                Ok(Value::List(items))
            }
            ExprKind::Dict(pairs) => {
                let mut entries: Vec<(String, Value)> = Vec::with_capacity(pairs.len());
                for (key_expr, value_expr) in pairs {
                    let key = self.eval_expr(key_expr)?.raw_text();
                    let value = self.eval_expr(value_expr)?;
                    if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
                        slot.1 = value;
                    } else {
                        entries.push((key, value));
                    }
                }
                Ok(Value::Dict(entries))
            }
            ExprKind::Identifier(name) => match env_get(&self.current_env, name) {
                Some(value) => Ok(value),
                None => Err(self.raise(
                    format!("'{name}' is unknown. Perhaps you intended to designate it first."),
                    expr.line(),
                )),
            },
            ExprKind::Binary { op, left, right } => self.eval_binary(*op, left, right, expr.line()),
            ExprKind::Unary { op, operand } => {
                let value = self.eval_expr(operand)?;
                Ok(match op {
                    UnaryOp::Neg => match value {
                        Value::Int(i) => Value::Int(i.wrapping_neg()),
                        Value::Float(f) => Value::Float(-f),
                        _ => Value::Null,
                    },
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                })
            }
            ExprKind::Call { name, args } => self.eval_call(name, args, expr.line()),
            ExprKind::Index { object, index } => {
                let obj = self.eval_expr(object)?;
                let idx = self.eval_expr(index)?;
                Ok(match (obj, idx) {
                    (Value::List(items), Value::Int(i)) => {
                        if i >= 0 && (i as usize) < items.len() {
                            items[i as usize].clone()
                        } else {
                            // Out-of-range indexing yields null, not an error.
                            Value::Null
                        }
                    }
                    (Value::Dict(pairs), Value::Str(key)) => pairs
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Null),
                    _ => Value::Null,
                })
            }
            ExprKind::Slice {
                object,
                start,
                end,
                step,
            } => self.eval_slice(object, start, end, step, expr.line()),
            ExprKind::Member { object, name } => {
                let obj = self.eval_expr(object)?;
                let Value::Instance(instance) = obj else {
                    return Err(self.raise("Only instances have members.", expr.line()));
                };
                self.check_private_access(name, &instance, expr.line(), false)?;
                if let Some(value) = env_get(&instance.fields, name) {
                    return Ok(value);
                }
                if let Some(value) = env_get(&instance.class.methods, name) {
                    return Ok(value);
                }
                Err(self.raise(
                    format!(
                        "Member '{name}' not found on instance of '{}'.",
                        instance.class.name
                    ),
                    expr.line(),
                ))
            }
            ExprKind::MethodCall {
                object,
                method,
                args,
            } => {
                let obj = self.eval_expr(object)?;
                let Value::Instance(instance) = &obj else {
                    return Err(self.raise(
                        "Method calls only supported on class instances.",
                        expr.line(),
                    ));
                };
                let Some(Value::Function(func)) = env_get(&instance.class.methods, method) else {
                    return Err(self.raise(format!("Method '{method}' not found."), expr.line()));
                };
                let argv = self.eval_args(args)?;
                self.call_function(&func, obj.clone(), argv)
            }
            ExprKind::Ascend { name, args } => {
                let self_val = match env_get(&self.current_env, "self") {
                    Some(v @ Value::Instance(_)) => v,
                    _ => {
                        return Err(self.raise(
                            "'ascend' can only be used inside an instance protocol.",
                            expr.line(),
                        ));
                    }
                };
                let Value::Instance(instance) = &self_val else {
                    unreachable!("checked above");
                };
                let Some(parent) = &instance.class.parent else {
                    return Err(
                        self.raise("This entity does not ascend to any parent.", expr.line())
                    );
                };
                let Some(Value::Function(func)) = env_get(&parent.methods, name) else {
                    return Err(
                        self.raise(format!("Parent protocol '{name}' not found."), expr.line())
                    );
                };
                let argv = self.eval_args(args)?;
                self.call_function(&func, self_val.clone(), argv)
            }
            ExprKind::Manifest { class, args } => {
                let Some(Value::Class(class_def)) = env_get(&self.global_env, class) else {
                    return Err(self.raise(format!("Entity '{class}' is not defined"), expr.line()));
                };
                let instance = Rc::new(Instance {
                    class: class_def.clone(),
                    fields: Environment::root(),
                });
                if let Some(Value::Function(construct)) = env_get(&class_def.methods, "construct") {
                    let argv = self.eval_args(args)?;
                    self.call_function(&construct, Value::Instance(instance.clone()), argv)?;
                }
                Ok(Value::Instance(instance))
            }
            ExprKind::SelfRef => match env_get(&self.current_env, "self") {
                Some(value) => Ok(value),
                None => Err(self.raise("'self' can only be used inside a method", expr.line())),
            },
            ExprKind::Lambda(def) => Ok(Value::Function(Rc::new(Function::lambda(
                def.clone(),
                self.current_env.clone(),
            )))),
            ExprKind::Ternary {
                condition,
                when_true,
                when_false,
            } => {
                if self.eval_expr(condition)?.is_truthy() {
                    self.eval_expr(when_true)
                } else {
                    self.eval_expr(when_false)
                }
            }
            ExprKind::ListComp {
                expr: map_expr,
                iterable,
                var,
                condition,
            } => {
                let Value::List(items) = self.eval_expr(iterable)? else {
                    return Err(self.raise("Iteration target must be a list.", expr.line()));
                };
                let mut result = Vec::new();
                for item in items {
                    if let Some(mapped) =
                        self.comp_item(var, item, condition.as_deref(), map_expr)?
                    {
                        result.push(mapped);
                    }
                }
                Ok(Value::List(result))
            }
            ExprKind::GenExpr {
                expr: map_expr,
                iterable,
                var,
                condition,
            } => {
                // Evaluated eagerly over the source iterable; see DESIGN.md.
                match self.eval_expr(iterable)? {
                    Value::List(items) => {
                        let mut result = Vec::new();
                        for item in items {
                            if let Some(mapped) =
                                self.comp_item(var, item, condition.as_deref(), map_expr)?
                            {
                                result.push(mapped);
                            }
                        }
                        Ok(Value::List(result))
                    }
                    Value::Generator(gen) => {
                        let gen = gen.clone();
                        let mut result = Vec::new();
                        loop {
                            let next = self.generator_next(&gen)?;
                            if matches!(next, Value::Null)
                                && gen.borrow().status == GenStatus::Done
                            {
                                break;
                            }
                            if let Some(mapped) =
                                self.comp_item(var, next, condition.as_deref(), map_expr)?
                            {
                                result.push(mapped);
                            }
                        }
                        Ok(Value::List(result))
                    }
                    _ => Err(self.raise(
                        "Generator expression requires an iterable.",
                        expr.line(),
                    )),
                }
            }
            ExprKind::Spread(inner) => self.eval_expr(inner),
            ExprKind::Await(inner) => {
                let awaited = self.eval_expr(inner)?;
                match &awaited {
                    Value::Promise(promise) => {
                        let state = promise.borrow().state;
                        match state {
                            PromiseState::Resolved => Ok(promise.borrow().result.clone()),
                            PromiseState::Rejected => {
                                Err(self.raise("Promise rejected", expr.line()))
                            }
                            // Pending promises pass through unchanged; there
                            // is no event loop to park on.
                            PromiseState::Pending => Ok(awaited.clone()),
                        }
                    }
                    Value::Generator(gen) => {
                        let gen = gen.clone();
                        self.generator_next(&gen)
                    }
                    _ => Ok(awaited),
                }
            }
        }
    }

    /// Evaluate one comprehension item in a child scope: bind the variable,
    /// apply the filter, map the expression.
    fn comp_item(
        &mut self,
        var: &str,
        item: Value,
        condition: Option<&Expr>,
        map_expr: &Expr,
    ) -> Result<Option<Value>, RuntimeError> {
        let child = Environment::child(self.current_env.clone());
        let saved = std::mem::replace(&mut self.current_env, child);
        let result = (|interp: &mut Self| {
            env_define(&interp.current_env, var, item);
            if let Some(cond) = condition {
                if !interp.eval_expr(cond)?.is_truthy() {
                    return Ok(None);
                }
            }
            interp.eval_expr(map_expr).map(Some)
        })(self);
        self.current_env = saved;
        result
    }

    fn eval_binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        // Short-circuit forms yield booleans, not operands.
        if op == BinaryOp::And {
            if !self.eval_expr(left)?.is_truthy() {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(self.eval_expr(right)?.is_truthy()));
        }
        if op == BinaryOp::Or {
            if self.eval_expr(left)?.is_truthy() {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(self.eval_expr(right)?.is_truthy()));
        }

        let lhs = self.eval_expr(left)?;
        let rhs = self.eval_expr(right)?;

        // String concatenation stringifies the other side.
        if op == BinaryOp::Add
            && (matches!(lhs, Value::Str(_)) || matches!(rhs, Value::Str(_)))
        {
            return Ok(Value::Str(format!("{}{}", lhs.raw_text(), rhs.raw_text())));
        }
        // String repetition.
        if op == BinaryOp::Mul {
            if let (Value::Str(s), Value::Int(times)) = (&lhs, &rhs) {
                let times = (*times).max(0) as usize;
                return Ok(Value::Str(s.repeat(times)));
            }
        }

        if op == BinaryOp::Eq {
            return Ok(Value::Bool(lhs == rhs));
        }
        if op == BinaryOp::Ne {
            return Ok(Value::Bool(lhs != rhs));
        }

        let numeric = |v: &Value| match v {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        };

        if let (Some(a), Some(b)) = (numeric(&lhs), numeric(&rhs)) {
            let both_int = matches!((&lhs, &rhs), (Value::Int(_), Value::Int(_)));
            return match op {
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => Ok(if both_int {
                    let (Value::Int(x), Value::Int(y)) = (&lhs, &rhs) else {
                        unreachable!("both_int checked");
                    };
                    Value::Int(match op {
                        BinaryOp::Add => x.wrapping_add(*y),
                        BinaryOp::Sub => x.wrapping_sub(*y),
                        _ => x.wrapping_mul(*y),
                    })
                } else {
                    Value::Float(match op {
                        BinaryOp::Add => a + b,
                        BinaryOp::Sub => a - b,
                        _ => a * b,
                    })
                }),
                BinaryOp::Div => {
                    if b == 0.0 {
                        Err(self.raise("Division by zero. Even infinity has its limits.", line))
                    } else {
                        // True division always yields a float.
                        Ok(Value::Float(a / b))
                    }
                }
                BinaryOp::IntDiv => {
                    if b == 0.0 {
                        Err(self.raise("Division by zero. Even infinity has its limits.", line))
                    } else if both_int {
                        let (Value::Int(x), Value::Int(y)) = (&lhs, &rhs) else {
                            unreachable!("both_int checked");
                        };
                        Ok(Value::Int(x.wrapping_div(*y)))
                    } else {
                        Ok(Value::Int((a / b) as i64))
                    }
                }
                BinaryOp::Mod => {
                    // Modulo stays integral regardless of operand kinds.
                    let x = a as i64;
                    let y = b as i64;
                    if y == 0 {
                        Err(self.raise("Division by zero. Even infinity has its limits.", line))
                    } else {
                        Ok(Value::Int(x.wrapping_rem(y)))
                    }
                }
                BinaryOp::Pow => Ok(Value::Float(a.powf(b))),
                BinaryOp::Lt => Ok(Value::Bool(a < b)),
                BinaryOp::Le => Ok(Value::Bool(a <= b)),
                BinaryOp::Gt => Ok(Value::Bool(a > b)),
                BinaryOp::Ge => Ok(Value::Bool(a >= b)),
                BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => {
                    unreachable!("handled above")
                }
            };
        }

        // Byte-wise ordering for string pairs.
        if let (Value::Str(a), Value::Str(b)) = (&lhs, &rhs) {
            let ordered = match op {
                BinaryOp::Lt => Some(a < b),
                BinaryOp::Le => Some(a <= b),
                BinaryOp::Gt => Some(a > b),
                BinaryOp::Ge => Some(a >= b),
                _ => None,
            };
            if let Some(result) = ordered {
                return Ok(Value::Bool(result));
            }
        }

        Err(self.raise(
            format!(
                "Cannot apply '{}' to {} and {}.",
                op_symbol(op),
                lhs.type_name(),
                rhs.type_name()
            ),
            line,
        ))
    }

    fn eval_slice(
        &mut self,
        object: &Expr,
        start: &Option<Box<Expr>>,
        end: &Option<Box<Expr>>,
        step: &Option<Box<Expr>>,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        let obj = self.eval_expr(object)?;
        let len = match &obj {
            Value::List(items) => items.len() as i64,
            Value::Str(s) => s.len() as i64,
            _ => return Err(self.raise("Slice requires list or string", line)),
        };

        let mut bound = |expr: &Option<Box<Expr>>| -> Result<Option<i64>, RuntimeError> {
            match expr {
                Some(e) => match self.eval_expr(e)? {
                    Value::Int(i) => Ok(Some(i)),
                    _ => Ok(None),
                },
                None => Ok(None),
            }
        };
        let start_bound = bound(start)?;
        let end_bound = bound(end)?;
        let step = match step {
            Some(e) => match self.eval_expr(e)? {
                Value::Int(i) => i,
                _ => 1,
            },
            None => 1,
        };
        if step == 0 {
            return Err(self.raise("Slice step cannot be zero", line));
        }

        // Negative bounds wrap by length; defaults depend on direction.
        let resolve = |bound: Option<i64>, default: i64| match bound {
            Some(v) if v < 0 => v + len,
            Some(v) => v,
            None => default,
        };
        let (start_idx, end_idx) = if step > 0 {
            (
                resolve(start_bound, 0).clamp(0, len),
                resolve(end_bound, len).clamp(0, len),
            )
        } else {
            (
                resolve(start_bound, len - 1).clamp(-1, len - 1),
                resolve(end_bound, -1).clamp(-1, len),
            )
        };

        let mut indices = Vec::new();
        let mut i = start_idx;
        while (step > 0 && i < end_idx) || (step < 0 && i > end_idx) {
            if i >= 0 && i < len {
                indices.push(i as usize);
            }
            i += step;
        }

        Ok(match &obj {
            Value::List(items) => {
                Value::List(indices.iter().map(|&i| items[i].clone()).collect())
            }
            Value::Str(s) => {
                let bytes = s.as_bytes();
                let picked: Vec<u8> = indices.iter().map(|&i| bytes[i]).collect();
                Value::Str(String::from_utf8_lossy(&picked).into_owned())
            }
            _ => unreachable!("length check matched list or string"),
        })
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, RuntimeError> {
        let mut argv = Vec::with_capacity(args.len());
        for arg in args {
            if let ExprKind::Spread(inner) = &arg.kind {
                // A spread list splices its elements; anything else
                // contributes nothing.
                if let Value::List(items) = self.eval_expr(inner)? {
                    argv.extend(items);
                }
            } else {
                argv.push(self.eval_expr(arg)?);
            }
        }
        Ok(argv)
    }

    fn eval_call(
        &mut self,
        name: &str,
        args: &[Expr],
        line: usize,
    ) -> Result<Value, RuntimeError> {
        let Some(callee) = env_get(&self.current_env, name) else {
            return Err(self.raise(
                format!("'{name}' is unknown. Perhaps you intended to define it first."),
                line,
            ));
        };
        let argv = self.eval_args(args)?;
        match callee {
            Value::Builtin(builtin) => self.call_builtin(builtin, argv, line),
            Value::Function(func) => self.call_function(&func, Value::Null, argv),
            _ => Err(self.raise(format!("'{name}' is not callable."), line)),
        }
    }

    /// Call a function or lambda value. The callee runs in a fresh scope
    /// under its captured closure; the caller's generator context is parked
    /// for the duration, so a `yield` inside the callee is its return and
    /// never suspends through the call boundary.
    pub(crate) fn call_function(
        &mut self,
        func: &Rc<Function>,
        self_val: Value,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let call_env = Environment::child(func.closure.clone());
        let saved_env = std::mem::replace(&mut self.current_env, call_env);
        let saved_gen = self.current_gen.take();
        let saved_resuming = std::mem::replace(&mut self.resuming, false);
        let saved_resume = std::mem::take(&mut self.resume);
        let saved_pending = self.pending_disrupt.take();

        let result = self.run_call(func, self_val, args);

        self.current_env = saved_env;
        self.current_gen = saved_gen;
        self.resuming = saved_resuming;
        self.resume = saved_resume;
        self.pending_disrupt = saved_pending;
        result
    }

    fn run_call(
        &mut self,
        func: &Rc<Function>,
        self_val: Value,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        if !matches!(self_val, Value::Null) {
            env_define(&self.current_env, "self", self_val.clone());
        }
        match &func.kind {
            FunctionKind::Protocol(def) => {
                self.bind_params(&def.params, &args)?;
                if func.is_sequence {
                    // A sequence call packages its environment instead of
                    // executing.
                    let gen = Generator::new(func.clone(), self.current_env.clone(), self_val);
                    return Ok(Value::Generator(Rc::new(RefCell::new(gen))));
                }
                let def = def.clone();
                match self.exec_block(&def.body)? {
                    Flow::Return(value) => Ok(value),
                    _ => Ok(Value::Null),
                }
            }
            FunctionKind::Lambda(def) => {
                self.bind_params(&def.params, &args)?;
                let def = def.clone();
                match &def.body {
                    LambdaBody::Expr(expr) => self.eval_expr(expr),
                    LambdaBody::Block(stmts) => match self.exec_block(stmts)? {
                        Flow::Return(value) => Ok(value),
                        _ => Ok(Value::Null),
                    },
                }
            }
        }
    }

    fn bind_params(&mut self, params: &[Param], args: &[Value]) -> Result<(), RuntimeError> {
        for (i, param) in params.iter().enumerate() {
            if param.is_rest {
                let rest = args.get(i..).map(<[Value]>::to_vec).unwrap_or_default();
                self.assign_to_target(&param.pattern, Value::List(rest), true)?;
                break;
            }
            let value = if let Some(v) = args.get(i) {
                v.clone()
            } else if let Some(default) = &param.default {
                self.eval_expr(default)?
            } else {
                Value::Null
            };
            self.assign_to_target(&param.pattern, value, true)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Generator engine
    // ------------------------------------------------------------------

    /// Resume a generator: install its environment and saved suspension
    /// stack, re-enter the body, and capture the new suspension record.
    pub(crate) fn generator_next(
        &mut self,
        gen_rc: &Rc<RefCell<Generator>>,
    ) -> Result<Value, RuntimeError> {
        let (func, gen_env, thrown, stack) = {
            let mut gen = gen_rc.borrow_mut();
            match gen.status {
                GenStatus::Done => return Ok(Value::Null),
                // A generator cannot re-enter itself.
                GenStatus::Running => return Ok(Value::Null),
                GenStatus::Suspended => {}
            }
            gen.status = GenStatus::Running;
            let stack = std::mem::take(&mut gen.stack);
            (gen.func.clone(), gen.env.clone(), gen.thrown.take(), stack)
        };
        let FunctionKind::Protocol(def) = &func.kind else {
            gen_rc.borrow_mut().status = GenStatus::Done;
            return Ok(Value::Null);
        };
        let def = def.clone();

        let saved_env = std::mem::replace(&mut self.current_env, gen_env);
        let saved_gen = self.current_gen.replace(gen_rc.clone());
        let saved_resuming = self.resuming;
        let saved_resume = std::mem::replace(&mut self.resume, stack);
        let saved_pending = self.pending_disrupt.take();
        self.resuming = !self.resume.is_empty();
        self.pending_disrupt = thrown;

        let flow = self.exec_block(&def.body);

        self.current_env = saved_env;
        self.current_gen = saved_gen;
        self.resuming = saved_resuming;
        self.resume = saved_resume;
        self.pending_disrupt = saved_pending;

        let mut gen = gen_rc.borrow_mut();
        match flow {
            Ok(Flow::Return(value)) => {
                gen.status = GenStatus::Suspended;
                Ok(value)
            }
            Ok(_) => {
                gen.status = GenStatus::Done;
                Ok(Value::Null)
            }
            Err(err) => {
                gen.status = GenStatus::Done;
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Builtin dispatch
    // ------------------------------------------------------------------

    pub(crate) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        line: usize,
    ) -> Result<Value, RuntimeError> {
        match builtin {
            Builtin::Declare => {
                let rendered = args
                    .iter()
                    .map(Value::raw_text)
                    .collect::<Vec<_>>()
                    .join(" ");
                self.voice.display(&format!("  {rendered}"));
                Ok(Value::Null)
            }
            Builtin::Inquire => {
                if let Some(Value::Str(prompt)) = args.first() {
                    self.voice.prompt(&format!("  {prompt}"));
                }
                let mut buffer = String::new();
                if std::io::stdin().read_line(&mut buffer).is_ok() {
                    while buffer.ends_with('\n') || buffer.ends_with('\r') {
                        buffer.pop();
                    }
                    Ok(Value::Str(buffer))
                } else {
                    Ok(Value::Str(String::new()))
                }
            }
            Builtin::Measure => Ok(builtins::measure(&args)),
            Builtin::Span => Ok(builtins::span(&args)),
            Builtin::Text => Ok(builtins::text(&args)),
            Builtin::Number => Ok(builtins::number(&args)),
            Builtin::Decimal => Ok(builtins::decimal(&args)),
            Builtin::Boolean => Ok(builtins::boolean(&args)),
            Builtin::Classify => Ok(builtins::classify(&args)),
            Builtin::Inscribe => {
                let (Some(Value::Str(path)), Some(content)) = (args.first(), args.get(1)) else {
                    return Ok(Value::Bool(false));
                };
                match std::fs::write(path, content.raw_text()) {
                    Ok(()) => {
                        self.voice.narrate(&voice::inscribe_done(path));
                        Ok(Value::Bool(true))
                    }
                    Err(_) => {
                        self.voice.narrate(&voice::inscribe_failed(path));
                        Ok(Value::Bool(false))
                    }
                }
            }
            Builtin::Decipher => {
                let Some(Value::Str(path)) = args.first() else {
                    return Ok(Value::Null);
                };
                match std::fs::read_to_string(path) {
                    Ok(content) => Ok(Value::Str(content)),
                    Err(_) => {
                        self.voice.narrate(&voice::decipher_missing(path));
                        Ok(Value::Null)
                    }
                }
            }
            Builtin::Chronicle => {
                let (Some(Value::Str(path)), Some(content)) = (args.first(), args.get(1)) else {
                    return Ok(Value::Bool(false));
                };
                use std::io::Write;
                let appended = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .and_then(|mut file| file.write_all(content.raw_text().as_bytes()));
                Ok(Value::Bool(appended.is_ok()))
            }
            Builtin::Exists => {
                let exists = matches!(args.first(), Some(Value::Str(path))
                    if std::path::Path::new(path).exists());
                Ok(Value::Bool(exists))
            }
            Builtin::Abs => Ok(builtins::abs(&args)),
            Builtin::Sqrt => Ok(builtins::sqrt(&args)),
            Builtin::Min => Ok(builtins::min(&args)),
            Builtin::Max => Ok(builtins::max(&args)),
            Builtin::Random => Ok(builtins::random(&args)),
            Builtin::Uppercase => Ok(builtins::uppercase(&args)),
            Builtin::Lowercase => Ok(builtins::lowercase(&args)),
            Builtin::Split => Ok(builtins::split(&args)),
            Builtin::Join => Ok(builtins::join(&args)),
            Builtin::Contains => Ok(builtins::contains(&args)),
            Builtin::Push => Ok(builtins::push(&args)),
            Builtin::Reverse => Ok(builtins::reverse(&args)),
            Builtin::Clock | Builtin::Timestamp => Ok(builtins::clock()),
            Builtin::Sleep => {
                if let Some(Value::Int(ms)) = args.first() {
                    if *ms > 0 {
                        std::thread::sleep(std::time::Duration::from_millis(*ms as u64));
                    }
                }
                Ok(Value::Null)
            }
            Builtin::Terminate => {
                let code = match args.first() {
                    Some(Value::Int(code)) => *code as i32,
                    _ => 0,
                };
                Err(RuntimeError::Terminated { code })
            }
            Builtin::Transform => {
                let (Some(Value::List(items)), Some(Value::Function(func))) =
                    (args.first(), args.get(1))
                else {
                    return Ok(Value::Null);
                };
                let func = func.clone();
                let items = items.clone();
                let mut result = Vec::with_capacity(items.len());
                for item in items {
                    result.push(self.call_function(&func, Value::Null, vec![item])?);
                }
                Ok(Value::List(result))
            }
            Builtin::Select => {
                let (Some(Value::List(items)), Some(Value::Function(func))) =
                    (args.first(), args.get(1))
                else {
                    return Ok(Value::Null);
                };
                let func = func.clone();
                let items = items.clone();
                let mut result = Vec::new();
                for item in items {
                    let keep = self.call_function(&func, Value::Null, vec![item.clone()])?;
                    if keep.is_truthy() {
                        result.push(item);
                    }
                }
                Ok(Value::List(result))
            }
            Builtin::Fold => {
                let (Some(Value::List(items)), Some(Value::Function(func)), Some(init)) =
                    (args.first(), args.get(1), args.get(2))
                else {
                    return Ok(Value::Null);
                };
                let func = func.clone();
                let items = items.clone();
                let mut acc = init.clone();
                for item in items {
                    acc = self.call_function(&func, Value::Null, vec![acc, item])?;
                }
                Ok(acc)
            }
            Builtin::EncodeJson => Ok(builtins::encode_json(&args)),
            Builtin::DecodeJson => Ok(builtins::decode_json(&args)),
            Builtin::Proceed => {
                let Some(Value::Generator(gen)) = args.first() else {
                    return Ok(Value::Null);
                };
                let gen = gen.clone();
                self.generator_next(&gen)
            }
            Builtin::Transmit => {
                let (Some(Value::Generator(gen)), Some(value)) = (args.first(), args.get(1))
                else {
                    return Ok(Value::Null);
                };
                let gen = gen.clone();
                gen.borrow_mut().sent = Some(value.clone());
                self.generator_next(&gen)
            }
            Builtin::Receive => Ok(self
                .current_gen
                .as_ref()
                .and_then(|gen| gen.borrow_mut().sent.take())
                .unwrap_or(Value::Null)),
            Builtin::Disrupt => {
                let (Some(Value::Generator(gen)), Some(err)) = (args.first(), args.get(1)) else {
                    return Ok(Value::Null);
                };
                let gen = gen.clone();
                gen.borrow_mut().thrown = Some(err.clone());
                self.generator_next(&gen)
            }
            Builtin::Resolve => Ok(Value::promise_resolved(
                args.first().cloned().unwrap_or(Value::Null),
            )),
            Builtin::Defer => {
                let Some(Value::Int(ms)) = args.first() else {
                    return Ok(Value::Null);
                };
                if *ms > 0 {
                    std::thread::sleep(std::time::Duration::from_millis(*ms as u64));
                }
                match args.get(1) {
                    Some(Value::Function(func)) => {
                        let func = func.clone();
                        self.call_function(&func, Value::Null, args[2..].to_vec())
                    }
                    Some(Value::Builtin(builtin)) => {
                        let builtin = *builtin;
                        self.call_builtin(builtin, args[2..].to_vec(), line)
                    }
                    _ => Ok(Value::Null),
                }
            }
        }
    }
}

// Tests for the evaluator and the generator engine live in
// `tests/programs.rs`, where whole programs run through the pipeline; the
// cases here pin the suspension machinery's internals.
#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::interpreter::value::{GenStatus, Value};
    use crate::interpreter::Interpreter;
    use crate::lexer::tokenize;
    use crate::parser::parse_tokens;
    use crate::voice::RecordedVoice;
    use indoc::indoc;

    fn run(source: &str) -> (Vec<String>, Value) {
        let recorder = Rc::new(RefCell::new(RecordedVoice::default()));
        let mut interp = Interpreter::new(Box::new(recorder.clone()));
        let tokens = tokenize(source).expect("tokenize should succeed");
        let program = parse_tokens(tokens, source).expect("parse should succeed");
        let value = interp.execute(&program).expect("execution should succeed");
        let displayed = recorder.borrow().displayed.clone();
        (displayed, value)
    }

    fn displayed(source: &str) -> Vec<String> {
        run(source).0
    }

    #[test]
    fn nested_loop_suspension_enumerates_all_pairs() {
        let lines = displayed(indoc! {"
            sequence pairs():
                cycle through [1, 2, 3] as a:
                    cycle from 0 to 2 as b:
                        yield a * 10 + b
            g := pairs()
            cycle from 0 to 8 as n:
                declare(proceed(g))
        "});
        assert_eq!(
            lines,
            vec!["  10", "  11", "  20", "  21", "  30", "  31", "  void", "  void"]
        );
    }

    #[test]
    fn exhausted_generator_is_done_and_yields_null() {
        let source = indoc! {"
            sequence g():
                yield 1
            h := g()
            a = proceed(h)
            b = proceed(h)
            c = proceed(h)
            declare(a, b, c)
        "};
        let (lines, _) = run(source);
        assert_eq!(lines, vec!["  1 void void"]);
    }

    #[test]
    fn generator_status_transitions() {
        let recorder = Rc::new(RefCell::new(RecordedVoice::default()));
        let mut interp = Interpreter::new(Box::new(recorder));
        let source = indoc! {"
            sequence g():
                yield 1
            designate h = g()
        "};
        let tokens = tokenize(source).expect("tokenize");
        let program = parse_tokens(tokens, source).expect("parse");
        interp.execute(&program).expect("execute");

        let gen = match crate::interpreter::env::env_get(&interp.global_env, "h") {
            Some(Value::Generator(gen)) => gen,
            other => panic!("expected generator binding, got {other:?}"),
        };
        assert_eq!(gen.borrow().status, GenStatus::Suspended);
        let first = interp.generator_next(&gen).expect("first resume");
        assert_eq!(first, Value::Int(1));
        assert_eq!(gen.borrow().status, GenStatus::Suspended);
        let second = interp.generator_next(&gen).expect("second resume");
        assert_eq!(second, Value::Null);
        assert_eq!(gen.borrow().status, GenStatus::Done);
    }

    #[test]
    fn yield_inside_nested_call_is_a_plain_return() {
        // The inner protocol's yield must not corrupt the generator's
        // suspension stack.
        let lines = displayed(indoc! {"
            protocol double(x):
                yield x * 2
            sequence g():
                cycle from 1 to 4 as n:
                    yield double(n)
            h := g()
            declare(proceed(h), proceed(h), proceed(h))
        "});
        assert_eq!(lines, vec!["  2 4 6"]);
    }

    #[test]
    fn delegate_resumes_at_saved_index() {
        let lines = displayed(indoc! {"
            sequence inner():
                yield 10
                yield 20
            sequence outer():
                yield 1
                delegate [2, 3]
                delegate inner()
                yield 4
            g := outer()
            cycle from 0 to 6 as n:
                declare(proceed(g))
        "});
        assert_eq!(lines, vec!["  1", "  2", "  3", "  10", "  20", "  4"]);
    }

    #[test]
    fn disrupt_raises_inside_generator_and_is_catchable() {
        let lines = displayed(indoc! {"
            sequence guarded():
                attempt:
                    cycle while true:
                        yield 1
                recover e:
                    yield \"caught:\" + e
            g := guarded()
            declare(proceed(g))
            declare(disrupt(g, \"stop\"))
        "});
        assert_eq!(lines, vec!["  1", "  caught:Disruption injected: stop"]);
    }

    #[test]
    fn disrupt_without_attempt_surfaces_as_error_and_finishes_generator() {
        let recorder = Rc::new(RefCell::new(RecordedVoice::default()));
        let mut interp = Interpreter::new(Box::new(recorder));
        let source = indoc! {"
            sequence g():
                cycle while true:
                    yield 1
            designate h = g()
            proceed(h)
        "};
        let tokens = tokenize(source).expect("tokenize");
        let program = parse_tokens(tokens, source).expect("parse");
        interp.execute(&program).expect("execute");

        let gen = match crate::interpreter::env::env_get(&interp.global_env, "h") {
            Some(Value::Generator(gen)) => gen,
            other => panic!("expected generator binding, got {other:?}"),
        };
        gen.borrow_mut().thrown = Some(Value::Str("boom".to_string()));
        let err = interp
            .generator_next(&gen)
            .expect_err("expected the disruption to surface");
        assert!(err.to_string().contains("boom"));
        assert_eq!(gen.borrow().status, GenStatus::Done);
    }

    #[test]
    fn transmit_value_is_consumed_exactly_once() {
        let lines = displayed(indoc! {"
            sequence echo():
                cycle while true:
                    m := receive()
                    yield text(m)
            g := echo()
            proceed(g)
            declare(transmit(g, 7))
            declare(proceed(g))
        "});
        // The second resume has no sent value pending.
        assert_eq!(lines, vec!["  7", "  void"]);
    }

    #[test]
    fn generator_deep_copy_runs_independently() {
        let recorder = Rc::new(RefCell::new(RecordedVoice::default()));
        let mut interp = Interpreter::new(Box::new(recorder));
        let source = indoc! {"
            sequence count():
                cycle from 0 to 5 as n:
                    yield n
            designate g = count()
            proceed(g)
            proceed(g)
        "};
        let tokens = tokenize(source).expect("tokenize");
        let program = parse_tokens(tokens, source).expect("parse");
        interp.execute(&program).expect("execute");

        let gen = match crate::interpreter::env::env_get(&interp.global_env, "g") {
            Some(gen @ Value::Generator(_)) => gen,
            other => panic!("expected generator binding, got {other:?}"),
        };
        let copy = gen.deep_copy();
        let (Value::Generator(original), Value::Generator(copied)) = (&gen, &copy) else {
            panic!("expected generators");
        };
        // Both continue from the same point, independently.
        assert_eq!(interp.generator_next(copied).expect("copy resume"), Value::Int(2));
        assert_eq!(interp.generator_next(original).expect("orig resume"), Value::Int(2));
        assert_eq!(interp.generator_next(copied).expect("copy resume"), Value::Int(3));
    }

    #[test]
    fn cycle_through_a_generator_pulls_until_done() {
        let lines = displayed(indoc! {"
            sequence three():
                yield 1
                yield 2
                yield 3
            cycle through three() as n:
                declare(n)
        "});
        assert_eq!(lines, vec!["  1", "  2", "  3"]);
    }

    #[test]
    fn generator_over_generator_suspends_correctly() {
        let lines = displayed(indoc! {"
            sequence inner():
                yield 1
                yield 2
            sequence outer():
                cycle through inner() as n:
                    yield n * 100
            g := outer()
            declare(proceed(g), proceed(g), proceed(g))
        "});
        assert_eq!(lines, vec!["  100 200 void"]);
    }
}
