use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::ast::{LambdaDef, ProtocolDef};
use crate::builtins::Builtin;

use super::env::{self, EnvRef};

/// Runtime value model: a closed sum over thirteen kinds.
///
/// Cloning a `Value` is the language's copy operation: strings, lists and
/// dicts copy by value; functions, classes, instances, generators and
/// promises are shared references. `deep_copy` additionally duplicates
/// generator state.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// Insertion-ordered string-keyed map.
    Dict(Vec<(String, Value)>),
    Function(Rc<Function>),
    Builtin(Builtin),
    Class(Rc<ClassDef>),
    Instance(Rc<Instance>),
    Generator(Rc<RefCell<Generator>>),
    Promise(Rc<RefCell<Promise>>),
}

pub enum FunctionKind {
    Protocol(Rc<ProtocolDef>),
    Lambda(Rc<LambdaDef>),
}

pub struct Function {
    pub name: String,
    pub kind: FunctionKind,
    pub closure: EnvRef,
    pub is_sequence: bool,
    pub is_async: bool,
}

impl Function {
    pub fn protocol(def: Rc<ProtocolDef>, closure: EnvRef) -> Self {
        Self {
            name: def.name.clone(),
            is_sequence: def.is_sequence,
            is_async: def.is_async,
            kind: FunctionKind::Protocol(def),
            closure,
        }
    }

    pub fn lambda(def: Rc<LambdaDef>, closure: EnvRef) -> Self {
        Self {
            name: "lambda".to_string(),
            kind: FunctionKind::Lambda(def),
            closure,
            is_sequence: false,
            is_async: false,
        }
    }
}

pub struct ClassDef {
    pub name: String,
    pub parent: Option<Rc<ClassDef>>,
    /// Method table: an environment chained to the parent class's table (or
    /// the defining scope), so inherited lookups walk automatically.
    pub methods: EnvRef,
}

pub struct Instance {
    pub class: Rc<ClassDef>,
    pub fields: EnvRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenStatus {
    Suspended,
    Running,
    Done,
}

/// One saved level of a suspended generator's control state. `node` is the
/// address of the AST node (or statement list) the frame belongs to; the
/// generator's function value keeps that tree alive.
#[derive(Debug, Clone)]
pub enum GenFrame {
    Block {
        node: usize,
        index: usize,
    },
    CycleWhile {
        node: usize,
    },
    CycleThrough {
        node: usize,
        iterable: Value,
        index: usize,
    },
    CycleFromTo {
        node: usize,
        current: i64,
        end: i64,
    },
    Delegate {
        node: usize,
        iterable: Value,
        index: usize,
    },
}

pub struct Generator {
    pub func: Rc<Function>,
    pub env: EnvRef,
    pub self_val: Value,
    pub status: GenStatus,
    pub stack: Vec<GenFrame>,
    pub sent: Option<Value>,
    pub thrown: Option<Value>,
}

impl Generator {
    pub fn new(func: Rc<Function>, env: EnvRef, self_val: Value) -> Self {
        Self {
            func,
            env,
            self_val,
            status: GenStatus::Suspended,
            stack: Vec::new(),
            sent: None,
            thrown: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Resolved,
    Rejected,
}

pub struct Promise {
    pub state: PromiseState,
    pub result: Value,
}

impl Promise {
    pub fn resolved(result: Value) -> Self {
        Self {
            state: PromiseState::Resolved,
            result,
        }
    }

    pub fn pending() -> Self {
        Self {
            state: PromiseState::Pending,
            result: Value::Null,
        }
    }
}

impl Value {
    pub fn promise_resolved(result: Value) -> Self {
        Value::Promise(Rc::new(RefCell::new(Promise::resolved(result))))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "void",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Function(_) => "protocol",
            Value::Builtin(_) => "builtin",
            Value::Class(_) => "entity",
            Value::Instance(_) => "instance",
            Value::Generator(_) => "sequence",
            Value::Promise(_) => "promise",
        }
    }

    /// Null, false, zero, the empty string and the empty list are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            _ => true,
        }
    }

    /// Display form: strings wrap in double quotes, lists and dicts render
    /// recursively, opaque kinds render as `<kind name>`.
    pub fn to_display(&self) -> String {
        match self {
            Value::Null => "void".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => format!("\"{s}\""),
            Value::List(items) => {
                let rendered = items
                    .iter()
                    .map(Value::to_display)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("[{rendered}]")
            }
            Value::Dict(pairs) => {
                let rendered = pairs
                    .iter()
                    .map(|(k, v)| format!("\"{k}\": {}", v.to_display()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{rendered}}}")
            }
            Value::Function(f) => format!("<protocol {}>", f.name),
            Value::Builtin(_) => "<builtin>".to_string(),
            Value::Class(c) => format!("<entity {}>", c.name),
            Value::Instance(i) => format!("<manifestation of {}>", i.class.name),
            Value::Generator(g) => format!("<sequence {}>", g.borrow().func.name),
            Value::Promise(_) => "<promise>".to_string(),
        }
    }

    /// Like `to_display`, but strings render without quotes. Used for
    /// `declare` output and string concatenation.
    pub fn raw_text(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.to_display(),
        }
    }

    /// Structural duplication: lists and dicts copy element-wise, generators
    /// get a fresh environment and suspension stack, reference kinds stay
    /// shared.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::List(items) => Value::List(items.iter().map(Value::deep_copy).collect()),
            Value::Dict(pairs) => Value::Dict(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_copy()))
                    .collect(),
            ),
            Value::Generator(gen) => {
                let gen = gen.borrow();
                let copy = Generator {
                    func: gen.func.clone(),
                    env: env::duplicate(&gen.env),
                    self_val: gen.self_val.clone(),
                    status: gen.status,
                    stack: gen
                        .stack
                        .iter()
                        .map(|frame| match frame {
                            GenFrame::CycleThrough {
                                node,
                                iterable,
                                index,
                            } => GenFrame::CycleThrough {
                                node: *node,
                                iterable: iterable.deep_copy(),
                                index: *index,
                            },
                            GenFrame::Delegate {
                                node,
                                iterable,
                                index,
                            } => GenFrame::Delegate {
                                node: *node,
                                iterable: iterable.deep_copy(),
                                index: *index,
                            },
                            other => other.clone(),
                        })
                        .collect(),
                    sent: None,
                    thrown: None,
                };
                Value::Generator(Rc::new(RefCell::new(copy)))
            }
            other => other.clone(),
        }
    }
}

impl PartialEq for Value {
    /// Structural equality for primitives, strings, lists and dicts;
    /// identity for functions, classes, instances, generators and promises.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            (Value::Generator(a), Value::Generator(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Int(i) => write!(f, "Int({i})"),
            Value::Float(x) => write!(f, "Float({x})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::List(items) => f.debug_tuple("List").field(items).finish(),
            Value::Dict(pairs) => f.debug_tuple("Dict").field(pairs).finish(),
            other => write!(f, "Value({})", other.type_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::env::Environment;

    #[test]
    fn truthiness_table() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Float(0.0).is_truthy());
        assert!(!Value::Str(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());

        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(-1).is_truthy());
        assert!(Value::Str("x".to_string()).is_truthy());
        assert!(Value::List(vec![Value::Null]).is_truthy());
        // An empty dict is still truthy.
        assert!(Value::Dict(vec![]).is_truthy());
    }

    #[test]
    fn display_forms() {
        assert_eq!(Value::Null.to_display(), "void");
        assert_eq!(Value::Bool(true).to_display(), "true");
        assert_eq!(Value::Int(7).to_display(), "7");
        assert_eq!(Value::Float(2.0).to_display(), "2");
        assert_eq!(Value::Float(2.5).to_display(), "2.5");
        assert_eq!(Value::Str("hi".to_string()).to_display(), "\"hi\"");
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Str("a".to_string())]).to_display(),
            "[1, \"a\"]"
        );
        assert_eq!(
            Value::Dict(vec![("a".to_string(), Value::Int(1))]).to_display(),
            "{\"a\": 1}"
        );
    }

    #[test]
    fn stringify_does_not_mutate() {
        let v = Value::List(vec![Value::Int(1), Value::Int(2)]);
        let before = v.clone();
        let _ = v.to_display();
        assert_eq!(v, before);
    }

    #[test]
    fn equality_is_structural_for_data_and_identity_for_objects() {
        assert_eq!(
            Value::List(vec![Value::Int(1)]),
            Value::List(vec![Value::Int(1)])
        );
        assert_eq!(
            Value::Dict(vec![("k".to_string(), Value::Int(1))]),
            Value::Dict(vec![("k".to_string(), Value::Int(1))])
        );
        assert_ne!(Value::Int(1), Value::Float(1.0));

        let env = Environment::root();
        let class = Rc::new(ClassDef {
            name: "A".to_string(),
            parent: None,
            methods: env.clone(),
        });
        let a = Value::Instance(Rc::new(Instance {
            class: class.clone(),
            fields: Environment::root(),
        }));
        let b = Value::Instance(Rc::new(Instance {
            class,
            fields: Environment::root(),
        }));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn deep_copy_compares_equal_for_data_values() {
        let v = Value::List(vec![
            Value::Int(1),
            Value::Str("s".to_string()),
            Value::Dict(vec![("k".to_string(), Value::Float(1.5))]),
        ]);
        assert_eq!(v.deep_copy(), v);
    }
}
