use core::cmp::Ordering;
use std::sync::Arc;

use super::code::{Region, SwitchTable};
use super::instruction::{ArithOp, CmpOp, Instruction};
use super::{Code, LambdaCode, RuntimeError, Stack};
use crate::types::{ClassId, Type};
use crate::values::{ArrayData, Delegate, Instance, StrongBox, Value};

/// An active `EnterTry`.
struct HandlerFrame {
    region: u32,
    stack_depth: usize,
}

/// What to do when a finally or fault handler reaches `EndFinally`.
enum Continuation {
    /// Resume a `Leave`: exit `frames` more regions, then jump to `target`.
    Leave { target: u32, frames: u32 },
    /// Resume propagating an exception.
    Throw(Value),
}

struct Pending {
    continuation: Continuation,
    /// Handler depth while the handler runs. An exception escaping the
    /// handler unwinds below it and abandons the continuation.
    depth: usize,
}

pub struct VM<'a> {
    code: &'a Code,
    captures: &'a [StrongBox],
    ip: usize,
    stack: Stack<Value>,
    locals: Vec<Value>,
    handlers: Vec<HandlerFrame>,
    pending: Vec<Pending>,
}

/// Runs a compiled lambda. `args` must already match the signature, with
/// by-ref arguments passed as boxes.
pub fn execute(lambda: &LambdaCode, captures: &[StrongBox], args: Vec<Value>) -> Result<Value, RuntimeError> {
    VM::new(&lambda.code, captures, args).run()
}

impl<'a> VM<'a> {
    /// Create a new VM.
    ///
    /// # Arguments
    /// * `code` - The code to execute
    /// * `captures` - Boxes captured by the closure being run
    /// * `args` - Arguments; they occupy the first local slots
    pub fn new(code: &'a Code, captures: &'a [StrongBox], mut args: Vec<Value>) -> Self {
        if args.len() < code.num_locals {
            args.resize(code.num_locals, Value::Void);
        }
        VM {
            code,
            captures,
            ip: 0,
            stack: Stack::new(code.max_stack_size),
            locals: args,
            handlers: Vec::new(),
            pending: Vec::new(),
        }
    }

    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            match self.run_main_loop() {
                Ok(value) => {
                    debug_assert!(self.stack.is_empty(), "Stack should be empty.");
                    return Ok(value);
                }
                Err(RuntimeError::Thrown(exception)) => self.handle_exception(exception)?,
                Err(error) => {
                    self.stack.clear();
                    return Err(error);
                }
            }
        }
    }

    /// Transfers control to the innermost handler for `exception`, or
    /// returns it when no region of this frame handles it.
    fn handle_exception(&mut self, exception: Value) -> Result<(), RuntimeError> {
        let thrown = exception.runtime_type();
        while let Some(frame) = self.handlers.pop() {
            let depth = self.handlers.len();
            while self.pending.last().is_some_and(|pending| pending.depth > depth) {
                self.pending.pop();
            }
            self.stack.truncate(frame.stack_depth);

            match &self.code.regions[frame.region as usize] {
                Region::Catch(clauses) => {
                    let clause = clauses.iter().find(|clause| match clause.class {
                        None => true,
                        Some(class) => Type::Class(class).is_assignable_from(&thrown),
                    });
                    if let Some(clause) = clause {
                        tracing::debug!(exception = %exception, target = clause.target, "Exception caught");
                        self.locals[clause.slot as usize] = exception;
                        self.ip = clause.target as usize;
                        return Ok(());
                    }
                }
                Region::Finally { handler } | Region::Fault { handler } => {
                    self.pending.push(Pending {
                        continuation: Continuation::Throw(exception),
                        depth,
                    });
                    self.ip = *handler as usize;
                    return Ok(());
                }
            }
        }
        self.stack.clear();
        Err(RuntimeError::Thrown(exception))
    }

    /// Exits `frames` regions, running finally handlers on the way, then
    /// continues at `target`.
    fn leave(&mut self, target: u32, mut frames: u32) {
        while frames > 0 {
            let Some(frame) = self.handlers.pop() else {
                break;
            };
            frames -= 1;
            if let Region::Finally { handler } = &self.code.regions[frame.region as usize] {
                self.stack.truncate(frame.stack_depth);
                self.pending.push(Pending {
                    continuation: Continuation::Leave { target, frames },
                    depth: self.handlers.len(),
                });
                self.ip = *handler as usize;
                return;
            }
        }
        self.ip = target as usize;
    }

    fn run_main_loop(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let instruction = self.code.instructions[self.ip];
            self.ip += 1;

            use Instruction::*;
            match instruction {
                Const(index) => self.stack.push(self.code.constants[index as usize].clone()),
                PushVoid => self.stack.push(Value::Void),
                Pop => {
                    self.stack.pop();
                }
                Dup => {
                    let top = self.stack.peek().cloned().ok_or_else(|| internal("dup on empty stack"))?;
                    self.stack.push(top);
                }

                LoadLocal(slot) => self.stack.push(self.locals[slot as usize].clone()),
                StoreLocal(slot) => self.locals[slot as usize] = self.stack.pop(),
                LoadBoxed(slot) => {
                    let value = self.local_box(slot)?.get();
                    self.stack.push(value);
                }
                StoreBoxed(slot) => {
                    let value = self.stack.pop();
                    self.local_box(slot)?.set(value);
                }
                NewBox(slot) => {
                    let value = self.stack.pop();
                    self.locals[slot as usize] = Value::Box(StrongBox::new(value));
                }
                LoadBox(slot) => {
                    let cell = self.local_box(slot)?.clone();
                    self.stack.push(Value::Box(cell));
                }
                LoadCapture(index) => self.stack.push(self.captures[index as usize].get()),
                StoreCapture(index) => {
                    let value = self.stack.pop();
                    self.captures[index as usize].set(value);
                }
                LoadCaptureBox(index) => {
                    self.stack.push(Value::Box(self.captures[index as usize].clone()));
                }

                IntOp(op) => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.stack.push(Value::Int(int_op(op, a, b)?));
                }
                FloatOp(op) => {
                    let b = self.pop_float()?;
                    let a = self.pop_float()?;
                    let result = match op {
                        ArithOp::Add => a + b,
                        ArithOp::Sub => a - b,
                        ArithOp::Mul => a * b,
                        ArithOp::Div => a / b,
                        ArithOp::Rem => a % b,
                        _ => return Err(internal(&format!("{op:?} is not a float operation"))),
                    };
                    self.stack.push(Value::Float(result));
                }
                BoolOp(op) => {
                    let b = self.pop_bool()?;
                    let a = self.pop_bool()?;
                    let result = match op {
                        ArithOp::And => a & b,
                        ArithOp::Or => a | b,
                        ArithOp::Xor => a ^ b,
                        _ => return Err(internal(&format!("{op:?} is not a bool operation"))),
                    };
                    self.stack.push(Value::Bool(result));
                }
                IntCmp(op) => {
                    let b = self.pop_int()?;
                    let a = self.pop_int()?;
                    self.stack.push(Value::Bool(compare(op, a.cmp(&b))));
                }
                FloatCmp(op) => {
                    let b = self.pop_float()?;
                    let a = self.pop_float()?;
                    let result = match op {
                        CmpOp::Lt => a < b,
                        CmpOp::Le => a <= b,
                        CmpOp::Gt => a > b,
                        CmpOp::Ge => a >= b,
                    };
                    self.stack.push(Value::Bool(result));
                }
                StrCmp(op) => {
                    let b = self.stack.pop();
                    let a = self.stack.pop();
                    let (Some(a), Some(b)) = (a.as_str(), b.as_str()) else {
                        return Err(null_reference("string comparison"));
                    };
                    self.stack.push(Value::Bool(compare(op, a.cmp(b))));
                }
                NegInt => {
                    let a = self.pop_int()?;
                    self.stack.push(Value::Int(a.wrapping_neg()));
                }
                NegFloat => {
                    let a = self.pop_float()?;
                    self.stack.push(Value::Float(-a));
                }
                Not => {
                    let a = self.pop_bool()?;
                    self.stack.push(Value::Bool(!a));
                }
                BitNot => {
                    let a = self.pop_int()?;
                    self.stack.push(Value::Int(!a));
                }
                Equal | NotEqual => {
                    let b = self.stack.pop();
                    let a = self.stack.pop();
                    let equal = a == b;
                    self.stack.push(Value::Bool(equal == (instruction == Equal)));
                }

                IntToFloat => {
                    let a = self.pop_int()?;
                    self.stack.push(Value::Float(a as f64));
                }
                FloatToInt => {
                    let a = self.pop_float()?;
                    self.stack.push(Value::Int(a as i64));
                }
                CastTo(index) => {
                    let target = self.type_constant(index)?;
                    let value = self.stack.pop();
                    let ok = match &value {
                        Value::Null => target.is_reference(),
                        _ => target.is_assignable_from(&value.runtime_type()),
                    };
                    if !ok {
                        return Err(RuntimeError::throw(
                            ClassId::INVALID_CAST,
                            &format!("cannot cast '{}' to '{target}'", value.runtime_type()),
                        ));
                    }
                    self.stack.push(value);
                }
                TypeOf => {
                    let value = self.stack.pop();
                    self.stack.push(Value::Type(value.runtime_type()));
                }
                TypeIs(index) => {
                    let target = self.type_constant(index)?;
                    let value = self.stack.pop();
                    let result = !value.is_null() && target.is_assignable_from(&value.runtime_type());
                    self.stack.push(Value::Bool(result));
                }
                TypeEqual(index) => {
                    let target = self.type_constant(index)?;
                    let value = self.stack.pop();
                    let result = !value.is_null() && value.runtime_type() == *target;
                    self.stack.push(Value::Bool(result));
                }

                LoadField(slot) => {
                    let object = self.pop_object("field read")?;
                    self.stack.push(object.get(slot));
                }
                StoreField(slot) => {
                    let value = self.stack.pop();
                    let object = self.pop_object("field write")?;
                    object.set(slot, value);
                }
                NewObject { class, argc } => {
                    let fields = self.stack.pop_n(argc as usize);
                    self.stack.push(Value::Object(Instance::new(ClassId::from_raw(class), fields)));
                }
                NewArray { elem, count } => {
                    let elem = self.type_constant(elem)?.clone();
                    let items = self.stack.pop_n(count as usize);
                    self.stack.push(Value::Array(ArrayData::new(elem, items)));
                }
                LoadElement => {
                    let index = self.pop_int()?;
                    let array = self.pop_array("element read")?;
                    let value = usize::try_from(index)
                        .ok()
                        .and_then(|i| array.get(i))
                        .ok_or_else(|| out_of_range(index, array.len()))?;
                    self.stack.push(value);
                }
                StoreElement => {
                    let value = self.stack.pop();
                    let index = self.pop_int()?;
                    let array = self.pop_array("element write")?;
                    let mut items = array.items.lock();
                    let len = items.len();
                    match usize::try_from(index).ok().and_then(|i| items.get_mut(i)) {
                        Some(slot) => *slot = value,
                        None => return Err(out_of_range(index, len)),
                    }
                }

                CallMethod(index) => {
                    let method = &self.code.methods[index as usize];
                    let args = self.stack.pop_n(method.stack_arity());
                    if !method.is_static() && args.first().is_some_and(Value::is_null) {
                        return Err(null_reference(&format!("call to '{}'", method.name())));
                    }
                    let result = method.invoke(&args)?;
                    self.stack.push(result);
                }
                Invoke(argc) => {
                    let args = self.stack.pop_n(argc as usize);
                    let delegate = match self.stack.pop() {
                        Value::Function(delegate) => delegate,
                        Value::Null => return Err(null_reference("invoke")),
                        other => return Err(internal(&format!("cannot invoke {other:?}"))),
                    };
                    let result = delegate.call(args)?;
                    self.stack.push(result);
                }
                MakeClosure(index) => {
                    let lambda = self.code.lambdas[index as usize].clone();
                    let captured = self.stack.pop_n(lambda.num_captures as usize);
                    let boxes = captured
                        .into_iter()
                        .map(|value| match value {
                            Value::Box(cell) => Ok(cell),
                            other => Err(internal(&format!("capture must be a box, found {other:?}"))),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    self.stack.push(Value::Function(Delegate::new(lambda, boxes)));
                }
                Dynamic(index) => {
                    let site = &self.code.sites[index as usize];
                    let args = self.stack.pop_n(site.arity());
                    let result = site.invoke(&args)?;
                    self.stack.push(result);
                }

                Jump(target) => self.ip = target as usize,
                JumpIfFalse(target) => {
                    if !self.pop_bool()? {
                        self.ip = target as usize;
                    }
                }
                JumpIfTrue(target) => {
                    if self.pop_bool()? {
                        self.ip = target as usize;
                    }
                }
                Switch(index) => {
                    let value = self.stack.pop();
                    let table: &SwitchTable = &self.code.switches[index as usize];
                    self.ip = table.lookup(&value) as usize;
                }
                Return => {
                    debug_assert!(self.handlers.is_empty(), "Return inside a protected region");
                    return Ok(self.stack.pop());
                }

                EnterTry(region) => self.handlers.push(HandlerFrame {
                    region,
                    stack_depth: self.stack.len(),
                }),
                Leave { target, frames } => self.leave(target, frames),
                EndFinally => match self.pending.pop().map(|pending| pending.continuation) {
                    Some(Continuation::Leave { target, frames }) => self.leave(target, frames),
                    Some(Continuation::Throw(exception)) => return Err(RuntimeError::Thrown(exception)),
                    None => return Err(internal("end of finally without a pending continuation")),
                },
                Throw => {
                    let exception = self.stack.pop();
                    if exception.is_null() {
                        return Err(null_reference("throw"));
                    }
                    return Err(RuntimeError::Thrown(exception));
                }
                Rethrow(slot) => {
                    return Err(RuntimeError::Thrown(self.locals[slot as usize].clone()));
                }
            }
        }
    }

    fn local_box(&self, slot: u32) -> Result<&StrongBox, RuntimeError> {
        match &self.locals[slot as usize] {
            Value::Box(cell) => Ok(cell),
            other => Err(internal(&format!("local {slot} is not boxed: {other:?}"))),
        }
    }

    /// Borrows from the code rather than the VM, so the stack stays usable.
    fn type_constant(&self, index: u32) -> Result<&'a Type, RuntimeError> {
        let code: &'a Code = self.code;
        match &code.constants[index as usize] {
            Value::Type(ty) => Ok(ty),
            other => Err(internal(&format!("constant {index} is not a type: {other:?}"))),
        }
    }

    fn pop_int(&mut self) -> Result<i64, RuntimeError> {
        match self.stack.pop() {
            Value::Int(i) => Ok(i),
            other => Err(internal(&format!("expected int, found {other:?}"))),
        }
    }

    fn pop_float(&mut self) -> Result<f64, RuntimeError> {
        match self.stack.pop() {
            Value::Float(f) => Ok(f),
            other => Err(internal(&format!("expected float, found {other:?}"))),
        }
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeError> {
        match self.stack.pop() {
            Value::Bool(b) => Ok(b),
            other => Err(internal(&format!("expected bool, found {other:?}"))),
        }
    }

    fn pop_object(&mut self, context: &str) -> Result<Arc<Instance>, RuntimeError> {
        match self.stack.pop() {
            Value::Object(instance) => Ok(instance),
            Value::Null => Err(null_reference(context)),
            other => Err(internal(&format!("expected object, found {other:?}"))),
        }
    }

    fn pop_array(&mut self, context: &str) -> Result<Arc<ArrayData>, RuntimeError> {
        match self.stack.pop() {
            Value::Array(array) => Ok(array),
            Value::Null => Err(null_reference(context)),
            other => Err(internal(&format!("expected array, found {other:?}"))),
        }
    }
}

fn int_op(op: ArithOp, a: i64, b: i64) -> Result<i64, RuntimeError> {
    Ok(match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Div | ArithOp::Rem if b == 0 => {
            return Err(RuntimeError::throw(ClassId::DIVIDE_BY_ZERO, "attempted to divide by zero"));
        }
        ArithOp::Div => a.wrapping_div(b),
        ArithOp::Rem => a.wrapping_rem(b),
        ArithOp::And => a & b,
        ArithOp::Or => a | b,
        ArithOp::Xor => a ^ b,
        ArithOp::Shl => a.wrapping_shl(b as u32),
        ArithOp::Shr => a.wrapping_shr(b as u32),
    })
}

fn compare(op: CmpOp, ordering: Ordering) -> bool {
    match op {
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::Le => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        CmpOp::Ge => ordering != Ordering::Less,
    }
}

fn internal(message: &str) -> RuntimeError {
    RuntimeError::Internal(message.into())
}

fn null_reference(context: &str) -> RuntimeError {
    RuntimeError::throw(ClassId::NULL_REFERENCE, &format!("{context} on a null reference"))
}

fn out_of_range(index: i64, len: usize) -> RuntimeError {
    RuntimeError::throw(
        ClassId::INDEX_OUT_OF_RANGE,
        &format!("index {index} is outside an array of length {len}"),
    )
}
