//! Lowering of a spilled lambda to VM code.
//!
//! Every expression leaves exactly one value on the operand stack; `void`
//! expressions push `Value::Void`. Control constructs that jump (`Try`,
//! `Loop`, `Switch`, `Label`, `Goto`) run on an empty stack, which the
//! spiller guarantees, so values flowing out of them travel through local
//! slots rather than the stack.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};

use super::switch::{self, Lowering};
use super::{CompileError, hoist};
use crate::expr::{
    Args, BinaryOp, CatchBlock, Expr, ExprKind, LabelId, LabelTarget, LambdaNode, NodeKind, ParamId, Parameter,
    SwitchCase, TypeTestOp, UnaryOp,
};
use crate::options::CompileOptions;
use crate::site::CallSite;
use crate::types::{MethodId, MethodInfo, Signature, Type};
use crate::values::{Value, ValueKey};
use crate::vm::{ArithOp, CatchClause, CmpOp, Code, DebugInfo, Instruction, LambdaCode, Region, SwitchTable};

/// Placeholder target of a jump that is patched later.
const UNPATCHED: u32 = u32::MAX;

/// Where a variable lives.
#[derive(Clone, Copy, Debug)]
enum Storage {
    Local(u32),
    /// A local slot holding a strong box.
    Boxed(u32),
    /// A box captured by the closure.
    Captured(u32),
}

/// One level of nesting that a jump may have to leave.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Scope {
    /// Inside the region opened by `EnterTry(index)`.
    Region(u32),
    /// Inside a finally or fault handler, which only `EndFinally` leaves.
    Handler,
}

struct LabelInfo {
    name: String,
    position: Option<u32>,
    /// Scopes enclosing the definition.
    scopes: Vec<Scope>,
    /// Local carrying the value of jumps to a non-void label.
    slot: Option<u32>,
    /// Forward jumps waiting for the definition, with the scopes they
    /// were emitted in.
    pending: Vec<(usize, Vec<Scope>)>,
}

/// How control reaches the cases of a switch.
enum Dispatch {
    Chain {
        /// `(case index, jump)` for every case value.
        jumps: Vec<(usize, usize)>,
        default_jump: usize,
    },
    Table(usize),
}

/// Compiles one lambda body. Nested lambdas get their own compiler.
pub(crate) struct LambdaCompiler<'o> {
    options: &'o CompileOptions,

    instructions: Vec<Instruction>,
    /// Node kind each instruction was emitted for.
    nodes: Vec<NodeKind>,
    node_stack: Vec<NodeKind>,

    constants: Vec<Value>,
    /// Constant deduplication map: key -> index
    constant_map: HashMap<ValueKey, u32>,
    methods: Vec<Arc<MethodInfo>>,
    method_map: HashMap<MethodId, u32>,
    sites: Vec<Arc<CallSite>>,
    lambdas: Vec<Arc<LambdaCode>>,
    regions: Vec<Region>,
    switches: Vec<SwitchTable>,

    num_locals: u32,
    current_stack_depth: usize,
    max_stack_size: usize,

    variables: HashMap<ParamId, Storage>,
    /// Variables declared by this lambda that need a box.
    boxed: HashSet<ParamId>,
    labels: HashMap<LabelId, LabelInfo>,
    /// Regions and handlers enclosing the current instruction.
    scopes: Vec<Scope>,
    /// Exception slots of the catch handlers being compiled, innermost last.
    catch_slots: Vec<u32>,
}

/// Compiles `lambda` with `captures` bound, in order, to the closure's
/// boxes.
pub(crate) fn compile_lambda(
    options: &CompileOptions,
    lambda: &LambdaNode,
    captures: &[Parameter],
) -> Result<LambdaCode, CompileError> {
    let mut compiler = LambdaCompiler::new(options, hoist::boxed_variables(&lambda.params, &lambda.body));
    compiler.bind_parameters(&lambda.params)?;
    for (index, capture) in captures.iter().enumerate() {
        let index = u32::try_from(index).map_err(|_| CompileError::TooLarge("capture list"))?;
        compiler.variables.insert(capture.id(), Storage::Captured(index));
    }

    compiler.compile_as(&lambda.body, &lambda.signature.ret)?;
    debug_assert_eq!(compiler.current_stack_depth, 1);
    compiler.emit(Instruction::Return);

    let num_captures = u32::try_from(captures.len()).map_err(|_| CompileError::TooLarge("capture list"))?;
    compiler.finish(lambda, num_captures)
}

impl<'o> LambdaCompiler<'o> {
    fn new(options: &'o CompileOptions, boxed: HashSet<ParamId>) -> Self {
        Self {
            options,
            instructions: Vec::new(),
            nodes: Vec::new(),
            node_stack: Vec::new(),
            constants: Vec::new(),
            constant_map: HashMap::new(),
            methods: Vec::new(),
            method_map: HashMap::new(),
            sites: Vec::new(),
            lambdas: Vec::new(),
            regions: Vec::new(),
            switches: Vec::new(),
            num_locals: 0,
            current_stack_depth: 0,
            max_stack_size: 0,
            variables: HashMap::new(),
            boxed,
            labels: HashMap::new(),
            scopes: Vec::new(),
            catch_slots: Vec::new(),
        }
    }

    fn finish(self, lambda: &LambdaNode, num_captures: u32) -> Result<LambdaCode, CompileError> {
        if let Some(label) = self
            .labels
            .values()
            .find(|label| label.position.is_none() && !label.pending.is_empty())
        {
            return Err(CompileError::UndefinedLabel(label.name.clone()));
        }

        let debug = self.options.emit_debug_info.then(|| DebugInfo {
            name: lambda.name.clone(),
            nodes: self.nodes,
        });
        let code = Code {
            instructions: self.instructions,
            constants: self.constants,
            methods: self.methods,
            sites: self.sites,
            lambdas: self.lambdas,
            regions: self.regions,
            switches: self.switches,
            num_locals: self.num_locals as usize,
            max_stack_size: self.max_stack_size,
            debug,
        };
        tracing::debug!(
            name = lambda.name.as_deref().unwrap_or("<lambda>"),
            instructions = code.instructions.len(),
            max_stack = code.max_stack_size,
            "Compiled lambda"
        );
        Ok(LambdaCode {
            name: lambda.name.clone(),
            signature: lambda.signature.clone(),
            num_captures,
            code,
        })
    }

    // === Stack Management ===

    fn push_stack(&mut self) {
        self.current_stack_depth += 1;
        if self.current_stack_depth > self.max_stack_size {
            self.max_stack_size = self.current_stack_depth;
        }
    }

    fn pop_stack_n(&mut self, n: usize) {
        debug_assert!(
            self.current_stack_depth >= n,
            "Stack underflow: trying to pop {} but depth is {}",
            n,
            self.current_stack_depth
        );
        self.current_stack_depth -= n;
    }

    fn require_empty_stack(&self, kind: NodeKind) -> Result<(), CompileError> {
        match self.current_stack_depth {
            0 => Ok(()),
            depth => Err(CompileError::StackNotEmpty(kind, depth)),
        }
    }

    // === Instruction Emission ===

    /// Appends an instruction and applies its fixed stack effect. Callers
    /// of instructions without one adjust the depth themselves.
    fn emit(&mut self, instruction: Instruction) -> usize {
        match instruction.stack_effect() {
            Some(effect) if effect > 0 => (0..effect).for_each(|_| self.push_stack()),
            Some(effect) => self.pop_stack_n(effect.unsigned_abs() as usize),
            None => {}
        }
        let index = self.instructions.len();
        self.instructions.push(instruction);
        self.nodes
            .push(self.node_stack.last().copied().unwrap_or(NodeKind::Lambda));
        index
    }

    /// Index of the next instruction.
    fn here(&self) -> Result<u32, CompileError> {
        u32::try_from(self.instructions.len()).map_err(|_| CompileError::TooLarge("instruction stream"))
    }

    fn jump_placeholder(&mut self, make_jump: fn(u32) -> Instruction) -> usize {
        self.emit(make_jump(UNPATCHED))
    }

    fn leave_placeholder(&mut self, frames: u32) -> usize {
        self.emit(Instruction::Leave {
            target: UNPATCHED,
            frames,
        })
    }

    fn patch_jump(&mut self, at: usize, target: u32) {
        use Instruction::*;
        self.instructions[at] = match self.instructions[at] {
            Jump(_) => Jump(target),
            JumpIfFalse(_) => JumpIfFalse(target),
            JumpIfTrue(_) => JumpIfTrue(target),
            Leave { frames, .. } => Leave { target, frames },
            other => unreachable!("patching {other:?}, which is not a jump"),
        };
    }

    fn patch_to_here(&mut self, jumps: impl IntoIterator<Item = usize>) -> Result<(), CompileError> {
        let target = self.here()?;
        for at in jumps {
            self.patch_jump(at, target);
        }
        Ok(())
    }

    // === Tables ===

    fn add_constant(&mut self, value: Value) -> Result<u32, CompileError> {
        let key = value.key();
        if let Some(key) = &key
            && let Some(&index) = self.constant_map.get(key)
        {
            return Ok(index);
        }
        let index = u32::try_from(self.constants.len()).map_err(|_| CompileError::TooLarge("constant pool"))?;
        self.constants.push(value);
        if let Some(key) = key {
            self.constant_map.insert(key, index);
        }
        Ok(index)
    }

    fn add_type(&mut self, ty: &Type) -> Result<u32, CompileError> {
        self.add_constant(Value::Type(ty.clone()))
    }

    fn add_method(&mut self, method: &Arc<MethodInfo>) -> Result<u32, CompileError> {
        if let Some(&index) = self.method_map.get(&method.id()) {
            return Ok(index);
        }
        let index = u32::try_from(self.methods.len()).map_err(|_| CompileError::TooLarge("method table"))?;
        self.methods.push(method.clone());
        self.method_map.insert(method.id(), index);
        Ok(index)
    }

    fn reserve_region(&mut self) -> Result<u32, CompileError> {
        let index = u32::try_from(self.regions.len()).map_err(|_| CompileError::TooLarge("region table"))?;
        self.regions.push(Region::Catch(Vec::new()));
        Ok(index)
    }

    // === Variables ===

    fn allocate_local(&mut self) -> Result<u32, CompileError> {
        let index = self.num_locals;
        self.num_locals = index.checked_add(1).ok_or(CompileError::TooLarge("local slots"))?;
        Ok(index)
    }

    /// Arguments occupy the first slots. Parameters that are captured get
    /// a fresh box holding the argument; by-ref arguments arrive boxed.
    fn bind_parameters(&mut self, params: &[Parameter]) -> Result<(), CompileError> {
        for param in params {
            let slot = self.allocate_local()?;
            let storage = if param.is_by_ref() {
                Storage::Boxed(slot)
            } else if self.boxed.contains(&param.id()) {
                self.emit(Instruction::LoadLocal(slot));
                self.emit(Instruction::NewBox(slot));
                Storage::Boxed(slot)
            } else {
                Storage::Local(slot)
            };
            self.variables.insert(param.id(), storage);
        }
        Ok(())
    }

    /// Gives `var` a slot for the scope being entered. Returns the storage
    /// it shadows, to be restored on exit.
    fn declare(&mut self, var: &Parameter) -> Result<(Storage, Option<Storage>), CompileError> {
        let slot = self.allocate_local()?;
        let storage = if self.boxed.contains(&var.id()) {
            Storage::Boxed(slot)
        } else {
            Storage::Local(slot)
        };
        Ok((storage, self.variables.insert(var.id(), storage)))
    }

    fn undeclare(&mut self, var: &Parameter, previous: Option<Storage>) {
        match previous {
            Some(storage) => self.variables.insert(var.id(), storage),
            None => self.variables.remove(&var.id()),
        };
    }

    fn storage(&self, var: &Parameter) -> Result<Storage, CompileError> {
        self.variables
            .get(&var.id())
            .copied()
            .ok_or_else(|| CompileError::UnboundVariable(var.display_name()))
    }

    fn load_variable(&mut self, var: &Parameter) -> Result<(), CompileError> {
        let instruction = match self.storage(var)? {
            Storage::Local(slot) => Instruction::LoadLocal(slot),
            Storage::Boxed(slot) => Instruction::LoadBoxed(slot),
            Storage::Captured(index) => Instruction::LoadCapture(index),
        };
        self.emit(instruction);
        Ok(())
    }

    /// Pops the top of the stack into `var`.
    fn store_variable(&mut self, var: &Parameter) -> Result<(), CompileError> {
        let instruction = match self.storage(var)? {
            Storage::Local(slot) => Instruction::StoreLocal(slot),
            Storage::Boxed(slot) => Instruction::StoreBoxed(slot),
            Storage::Captured(index) => Instruction::StoreCapture(index),
        };
        self.emit(instruction);
        Ok(())
    }

    /// Pops the top of the stack as the initial value of a freshly declared
    /// variable. Boxed variables get a new box on every entry.
    fn initialize_variable(&mut self, storage: Storage) {
        match storage {
            Storage::Local(slot) => self.emit(Instruction::StoreLocal(slot)),
            Storage::Boxed(slot) => self.emit(Instruction::NewBox(slot)),
            Storage::Captured(_) => unreachable!("declared variables are never captures"),
        };
    }

    /// Pushes the box holding `var`, for a closure or a by-ref argument.
    fn push_variable_box(&mut self, var: &Parameter) -> Result<(), CompileError> {
        let instruction = match self.storage(var)? {
            Storage::Boxed(slot) => Instruction::LoadBox(slot),
            Storage::Captured(index) => Instruction::LoadCaptureBox(index),
            Storage::Local(_) => unreachable!(
                "variable '{}' is shared but was not hoisted into a box",
                var.display_name()
            ),
        };
        self.emit(instruction);
        Ok(())
    }

    // === Expressions ===

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        if expr.can_reduce() {
            let reduced = expr.reduce_extensions()?;
            return self.compile_expr(&reduced);
        }
        self.node_stack.push(expr.node_kind());
        let result = self.compile_node(expr);
        self.node_stack.pop();
        result
    }

    /// Compiles `expr` where a value of type `ty` is expected. A `void`
    /// context discards the value.
    fn compile_as(&mut self, expr: &Expr, ty: &Type) -> Result<(), CompileError> {
        self.compile_expr(expr)?;
        if ty.is_void() && !expr.ty().is_void() {
            self.emit(Instruction::Pop);
            self.emit(Instruction::PushVoid);
        }
        Ok(())
    }

    fn compile_all(&mut self, exprs: &[Expr]) -> Result<(), CompileError> {
        exprs.iter().try_for_each(|expr| self.compile_expr(expr))
    }

    fn compile_node(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr.kind() {
            ExprKind::Constant(value) => self.compile_constant(value),
            ExprKind::Default => self.compile_constant(&Value::default_for(expr.ty())),
            ExprKind::Parameter(var) => self.load_variable(var),
            ExprKind::Unary { op, operand } => self.compile_unary(*op, operand, expr.ty()),
            ExprKind::Binary { op, left, right } => self.compile_binary(*op, left, right),
            ExprKind::TypeBinary { op, operand, test } => {
                self.compile_expr(operand)?;
                let index = self.add_type(test)?;
                self.emit(match op {
                    TypeTestOp::TypeIs => Instruction::TypeIs(index),
                    TypeTestOp::TypeEqual => Instruction::TypeEqual(index),
                });
                Ok(())
            }
            ExprKind::Member { object, field } => {
                self.compile_expr(object)?;
                self.emit(Instruction::LoadField(field.index()));
                Ok(())
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.emit(Instruction::LoadElement);
                Ok(())
            }
            ExprKind::Call { object, method, args } => {
                if let Some(object) = object {
                    self.compile_expr(object)?;
                }
                self.compile_all(args)?;
                let index = self.add_method(method)?;
                self.emit(Instruction::CallMethod(index));
                self.pop_stack_n(method.stack_arity());
                self.push_stack();
                Ok(())
            }
            ExprKind::Invoke { target, args } => self.compile_invoke(target, args),
            ExprKind::New { class, args } => {
                self.compile_all(args)?;
                let argc = u32::try_from(args.len()).map_err(|_| CompileError::TooLarge("constructor arguments"))?;
                self.emit(Instruction::NewObject {
                    class: class.raw(),
                    argc,
                });
                Ok(())
            }
            ExprKind::NewArray { items } => {
                self.compile_all(items)?;
                let elem = expr.ty().element_type().cloned().unwrap_or(Type::Object);
                let elem = self.add_type(&elem)?;
                let count = u32::try_from(items.len()).map_err(|_| CompileError::TooLarge("array literal"))?;
                self.emit(Instruction::NewArray { elem, count });
                Ok(())
            }
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => self.compile_conditional(test, if_true, if_false, expr.ty()),
            ExprKind::Loop {
                body,
                break_label,
                continue_label,
            } => self.compile_loop(body, break_label.as_ref(), continue_label.as_ref()),
            ExprKind::Block { variables, exprs } => self.compile_block(variables, exprs, expr.ty()),
            ExprKind::Goto { target, value, .. } => self.compile_goto(target, value.as_ref()),
            ExprKind::Label { target, default } => self.compile_label(target, default.as_ref()),
            ExprKind::Switch {
                value,
                cases,
                default,
            } => self.compile_switch(value, cases, default.as_ref(), expr.ty()),
            ExprKind::Try {
                body,
                handlers,
                finally,
                fault,
            } => self.compile_try(body, handlers, finally.as_ref(), fault.as_ref(), expr.ty()),
            ExprKind::Throw { value } => self.compile_throw(value.as_ref()),
            ExprKind::Lambda(node) => self.compile_closure(node),
            ExprKind::Dynamic { binder, args } => {
                let signature = Signature::new(args.iter().map(|arg| arg.ty().clone()), expr.ty().clone());
                let site = CallSite::new(
                    binder.clone(),
                    signature,
                    self.options.cache.clone(),
                    self.options.shared_rules.clone(),
                );
                self.compile_all(args)?;
                let index = u32::try_from(self.sites.len()).map_err(|_| CompileError::TooLarge("call site table"))?;
                self.sites.push(Arc::new(site));
                self.emit(Instruction::Dynamic(index));
                self.pop_stack_n(args.len());
                self.push_stack();
                Ok(())
            }
            ExprKind::Extension(ext) => Err(CompileError::UnreducibleExtension(ext.name().into())),
            ExprKind::MemberInit { .. }
            | ExprKind::ListInit { .. }
            | ExprKind::Increment { .. }
            | ExprKind::CompoundAssign { .. } => unreachable!("reducible nodes are reduced before lowering"),
        }
    }

    fn compile_constant(&mut self, value: &Value) -> Result<(), CompileError> {
        if let Value::Void = value {
            self.emit(Instruction::PushVoid);
            return Ok(());
        }
        let index = self.add_constant(value.clone())?;
        self.emit(Instruction::Const(index));
        Ok(())
    }

    fn compile_unary(&mut self, op: UnaryOp, operand: &Expr, ty: &Type) -> Result<(), CompileError> {
        self.compile_expr(operand)?;
        let instruction = match (op, operand.ty()) {
            (UnaryOp::Convert, from) => return self.compile_convert(from, ty),
            (UnaryOp::Negate, Type::Float) => Instruction::NegFloat,
            (UnaryOp::Negate, _) => Instruction::NegInt,
            (UnaryOp::Not, Type::Bool) => Instruction::Not,
            (UnaryOp::Not | UnaryOp::OnesComplement, _) => Instruction::BitNot,
            (UnaryOp::TypeOf, _) => Instruction::TypeOf,
        };
        self.emit(instruction);
        Ok(())
    }

    /// Converts the value on top of the stack from `from` to `to`.
    fn compile_convert(&mut self, from: &Type, to: &Type) -> Result<(), CompileError> {
        if to.is_void() {
            self.emit(Instruction::Pop);
            self.emit(Instruction::PushVoid);
            return Ok(());
        }
        match (from, to) {
            _ if from == to => {}
            (Type::Int, Type::Float) => {
                self.emit(Instruction::IntToFloat);
            }
            (Type::Float, Type::Int) => {
                self.emit(Instruction::FloatToInt);
            }
            _ if to.is_assignable_from(from) => {}
            _ => {
                let index = self.add_type(to)?;
                self.emit(Instruction::CastTo(index));
            }
        }
        Ok(())
    }

    fn compile_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        match op {
            BinaryOp::Assign => return self.compile_assign(left, right),
            BinaryOp::AndAlso => return self.compile_short_circuit(left, right, Instruction::JumpIfFalse),
            BinaryOp::OrElse => return self.compile_short_circuit(left, right, Instruction::JumpIfTrue),
            _ => {}
        }

        self.compile_expr(left)?;
        self.compile_expr(right)?;
        let instruction = if op.is_equality() {
            if op == BinaryOp::Equal {
                Instruction::Equal
            } else {
                Instruction::NotEqual
            }
        } else if op.is_ordering() {
            let cmp = cmp_op(op);
            match left.ty() {
                Type::Float => Instruction::FloatCmp(cmp),
                Type::Str => Instruction::StrCmp(cmp),
                _ => Instruction::IntCmp(cmp),
            }
        } else {
            let arith = arith_op(op);
            match left.ty() {
                Type::Float => Instruction::FloatOp(arith),
                Type::Bool => Instruction::BoolOp(arith),
                _ => Instruction::IntOp(arith),
            }
        };
        self.emit(instruction);
        Ok(())
    }

    /// `left; dup; jump-if end; pop; right; end:`
    fn compile_short_circuit(
        &mut self,
        left: &Expr,
        right: &Expr,
        make_jump: fn(u32) -> Instruction,
    ) -> Result<(), CompileError> {
        self.compile_expr(left)?;
        self.emit(Instruction::Dup);
        let skip = self.jump_placeholder(make_jump);
        self.emit(Instruction::Pop);
        self.compile_expr(right)?;
        self.patch_to_here([skip])
    }

    fn compile_assign(&mut self, target: &Expr, value: &Expr) -> Result<(), CompileError> {
        match target.kind() {
            ExprKind::Parameter(var) => {
                self.compile_expr(value)?;
                self.emit(Instruction::Dup);
                self.store_variable(var)
            }
            ExprKind::Member { object, field } => {
                self.compile_expr(object)?;
                self.compile_expr(value)?;
                let temp = self.allocate_local()?;
                self.emit(Instruction::StoreLocal(temp));
                self.emit(Instruction::LoadLocal(temp));
                self.emit(Instruction::StoreField(field.index()));
                self.emit(Instruction::LoadLocal(temp));
                Ok(())
            }
            ExprKind::Index { object, index } => {
                self.compile_expr(object)?;
                self.compile_expr(index)?;
                self.compile_expr(value)?;
                let temp = self.allocate_local()?;
                self.emit(Instruction::StoreLocal(temp));
                self.emit(Instruction::LoadLocal(temp));
                self.emit(Instruction::StoreElement);
                self.emit(Instruction::LoadLocal(temp));
                Ok(())
            }
            _ => unreachable!("assignment targets are validated to be writable"),
        }
    }

    fn compile_invoke(&mut self, target: &Expr, args: &Args) -> Result<(), CompileError> {
        self.compile_expr(target)?;
        let by_ref: Vec<bool> = match target.ty() {
            Type::Function(signature) => signature.params.iter().map(|param| param.by_ref).collect(),
            _ => Vec::new(),
        };
        for (i, arg) in args.iter().enumerate() {
            match arg.as_parameter() {
                Some(var) if by_ref.get(i).copied().unwrap_or(false) => self.push_variable_box(var)?,
                _ => self.compile_expr(arg)?,
            }
        }
        let argc = u32::try_from(args.len()).map_err(|_| CompileError::TooLarge("invoke arguments"))?;
        self.emit(Instruction::Invoke(argc));
        Ok(())
    }

    fn compile_closure(&mut self, lambda: &LambdaNode) -> Result<(), CompileError> {
        let captures = hoist::free_variables(&lambda.params, &lambda.body);
        let code = compile_lambda(self.options, lambda, &captures)?;
        for var in &captures {
            self.push_variable_box(var)?;
        }
        let index = u32::try_from(self.lambdas.len()).map_err(|_| CompileError::TooLarge("lambda table"))?;
        self.lambdas.push(Arc::new(code));
        self.emit(Instruction::MakeClosure(index));
        self.pop_stack_n(captures.len());
        self.push_stack();
        Ok(())
    }

    fn compile_conditional(
        &mut self,
        test: &Expr,
        if_true: &Expr,
        if_false: &Expr,
        ty: &Type,
    ) -> Result<(), CompileError> {
        self.compile_expr(test)?;
        let to_else = self.jump_placeholder(Instruction::JumpIfFalse);
        let depth = self.current_stack_depth;

        self.compile_as(if_true, ty)?;
        let to_end = self.jump_placeholder(Instruction::Jump);

        self.current_stack_depth = depth;
        self.patch_to_here([to_else])?;
        self.compile_as(if_false, ty)?;
        self.patch_to_here([to_end])
    }

    fn compile_block(&mut self, variables: &[Parameter], exprs: &[Expr], ty: &Type) -> Result<(), CompileError> {
        let mut shadowed = Vec::with_capacity(variables.len());
        for var in variables {
            let (storage, previous) = self.declare(var)?;
            self.compile_constant(&Value::default_for(var.ty()))?;
            self.initialize_variable(storage);
            shadowed.push(previous);
        }

        let (last, init) = exprs.split_last().expect("blocks are validated to be non-empty");
        for expr in init {
            self.compile_expr(expr)?;
            self.emit(Instruction::Pop);
        }
        self.compile_as(last, ty)?;

        for (var, previous) in variables.iter().zip(shadowed) {
            self.undeclare(var, previous);
        }
        Ok(())
    }

    // === Labels and jumps ===

    /// Registers `target` on first use and returns its value slot.
    fn label_slot(&mut self, target: &LabelTarget) -> Result<Option<u32>, CompileError> {
        if let Some(info) = self.labels.get(&target.id()) {
            return Ok(info.slot);
        }
        let slot = if target.ty().is_void() {
            None
        } else {
            Some(self.allocate_local()?)
        };
        self.labels.insert(
            target.id(),
            LabelInfo {
                name: target.display_name(),
                position: None,
                scopes: Vec::new(),
                slot,
                pending: Vec::new(),
            },
        );
        Ok(slot)
    }

    fn label_mut(&mut self, target: &LabelTarget) -> &mut LabelInfo {
        self.labels
            .get_mut(&target.id())
            .expect("label registered by label_slot")
    }

    /// Jumps to `target`, leaving the regions in between.
    fn emit_branch(&mut self, target: &LabelTarget) -> Result<(), CompileError> {
        self.label_slot(target)?;
        let from = self.scopes.clone();
        let info = self.label_mut(target);
        let resolved = match info.position {
            Some(position) => Some(resolve_jump(&info.name, &info.scopes, position, &from)?),
            None => None,
        };
        match resolved {
            Some(instruction) => {
                self.emit(instruction);
            }
            None => {
                let at = self.jump_placeholder(Instruction::Jump);
                self.label_mut(target).pending.push((at, from));
            }
        }
        Ok(())
    }

    /// Places `target` at the next instruction and patches the jumps
    /// waiting for it.
    fn define_label(&mut self, target: &LabelTarget) -> Result<(), CompileError> {
        self.label_slot(target)?;
        let position = self.here()?;
        let scopes = self.scopes.clone();
        let info = self.label_mut(target);
        if info.position.is_some() {
            return Err(CompileError::LabelRedefined(info.name.clone()));
        }
        info.position = Some(position);
        info.scopes = scopes.clone();
        let name = info.name.clone();
        let pending = core::mem::take(&mut info.pending);
        for (at, from) in pending {
            self.instructions[at] = resolve_jump(&name, &scopes, position, &from)?;
        }
        Ok(())
    }

    /// Pushes the value held in `slot`, or void.
    fn load_slot(&mut self, slot: Option<u32>) {
        match slot {
            Some(slot) => self.emit(Instruction::LoadLocal(slot)),
            None => self.emit(Instruction::PushVoid),
        };
    }

    fn compile_goto(&mut self, target: &LabelTarget, value: Option<&Expr>) -> Result<(), CompileError> {
        self.require_empty_stack(NodeKind::Goto)?;
        let slot = self.label_slot(target)?;
        if let Some(value) = value {
            self.compile_expr(value)?;
            match slot {
                Some(slot) => self.emit(Instruction::StoreLocal(slot)),
                None => self.emit(Instruction::Pop),
            };
        }
        self.emit_branch(target)?;
        // Unreachable, but what follows expects the goto's value.
        self.push_stack();
        Ok(())
    }

    fn compile_label(&mut self, target: &LabelTarget, default: Option<&Expr>) -> Result<(), CompileError> {
        self.require_empty_stack(NodeKind::Label)?;
        let slot = self.label_slot(target)?;
        if let Some(default) = default {
            self.compile_expr(default)?;
            match slot {
                Some(slot) => self.emit(Instruction::StoreLocal(slot)),
                None => self.emit(Instruction::Pop),
            };
        }
        self.define_label(target)?;
        self.load_slot(slot);
        Ok(())
    }

    fn compile_loop(
        &mut self,
        body: &Expr,
        break_label: Option<&LabelTarget>,
        continue_label: Option<&LabelTarget>,
    ) -> Result<(), CompileError> {
        self.require_empty_stack(NodeKind::Loop)?;
        let top = self.here()?;
        if let Some(label) = continue_label {
            self.define_label(label)?;
        }
        self.compile_expr(body)?;
        self.emit(Instruction::Pop);
        self.emit(Instruction::Jump(top));

        match break_label {
            Some(label) => {
                let slot = self.label_slot(label)?;
                self.define_label(label)?;
                self.load_slot(slot);
            }
            None => {
                self.emit(Instruction::PushVoid);
            }
        }
        Ok(())
    }

    // === Switch ===

    fn compile_switch(
        &mut self,
        value: &Expr,
        cases: &[SwitchCase],
        default: Option<&Expr>,
        ty: &Type,
    ) -> Result<(), CompileError> {
        self.require_empty_stack(NodeKind::Switch)?;
        let tests: Vec<&Value> = cases.iter().flat_map(|case| case.values()).collect();
        let lowering = switch::choose(&tests, &self.options.switch);
        self.compile_expr(value)?;

        let dispatch = match lowering {
            Lowering::Chain => {
                let temp = self.allocate_local()?;
                self.emit(Instruction::StoreLocal(temp));
                let mut jumps = Vec::with_capacity(tests.len());
                for (i, case) in cases.iter().enumerate() {
                    for test in case.values() {
                        self.emit(Instruction::LoadLocal(temp));
                        self.compile_constant(test)?;
                        self.emit(Instruction::Equal);
                        jumps.push((i, self.jump_placeholder(Instruction::JumpIfTrue)));
                    }
                }
                let default_jump = self.jump_placeholder(Instruction::Jump);
                Dispatch::Chain { jumps, default_jump }
            }
            Lowering::Dense { .. } | Lowering::Hashed => {
                let index = u32::try_from(self.switches.len()).map_err(|_| CompileError::TooLarge("switch table"))?;
                self.switches.push(SwitchTable::Hashed {
                    targets: HashMap::new(),
                    default: UNPATCHED,
                });
                self.emit(Instruction::Switch(index));
                Dispatch::Table(index as usize)
            }
        };

        let mut starts = Vec::with_capacity(cases.len());
        let mut exits = Vec::with_capacity(cases.len());
        for case in cases {
            starts.push(self.here()?);
            self.compile_as(case.body(), ty)?;
            exits.push(self.jump_placeholder(Instruction::Jump));
            self.current_stack_depth = 0;
        }
        let default_start = self.here()?;
        match default {
            Some(default) => self.compile_as(default, ty)?,
            None => {
                self.emit(Instruction::PushVoid);
            }
        }
        self.patch_to_here(exits)?;

        match dispatch {
            Dispatch::Chain { jumps, default_jump } => {
                for (case, at) in jumps {
                    self.patch_jump(at, starts[case]);
                }
                self.patch_jump(default_jump, default_start);
            }
            Dispatch::Table(index) => {
                self.switches[index] = build_table(lowering, cases, &starts, default_start);
            }
        }
        Ok(())
    }

    // === Exceptions ===

    /// Lowers a try node. The value of the body or handler travels through
    /// a local since leaving a region discards the operand stack:
    ///
    /// ```text
    ///     EnterTry(outer)          ; finally or fault
    ///     EnterTry(catch)
    ///     <body>; store result
    ///     Leave(after_catch, 1)
    /// handler_i:
    ///     <handler>; store result
    ///     Jump(after_catch)
    /// after_catch:
    ///     Leave(end, 1)
    /// finally:
    ///     <finally>; Pop; EndFinally
    /// end:
    ///     load result
    /// ```
    fn compile_try(
        &mut self,
        body: &Expr,
        handlers: &[CatchBlock],
        finally: Option<&Expr>,
        fault: Option<&Expr>,
        ty: &Type,
    ) -> Result<(), CompileError> {
        self.require_empty_stack(NodeKind::Try)?;
        let result = if ty.is_void() {
            None
        } else {
            Some(self.allocate_local()?)
        };

        let outer = match finally.or(fault) {
            Some(block) => {
                let region = self.reserve_region()?;
                self.emit(Instruction::EnterTry(region));
                self.scopes.push(Scope::Region(region));
                Some((region, block))
            }
            None => None,
        };

        if handlers.is_empty() {
            self.compile_as(body, ty)?;
            self.store_result(result);
        } else {
            self.compile_guarded(body, handlers, ty, result)?;
        }

        if let Some((region, block)) = outer {
            let leave = self.leave_placeholder(1);
            self.scopes.pop();

            let handler = self.here()?;
            self.scopes.push(Scope::Handler);
            self.compile_expr(block)?;
            self.emit(Instruction::Pop);
            self.emit(Instruction::EndFinally);
            self.scopes.pop();

            self.regions[region as usize] = if finally.is_some() {
                Region::Finally { handler }
            } else {
                Region::Fault { handler }
            };
            self.patch_to_here([leave])?;
        }

        self.load_slot(result);
        Ok(())
    }

    /// The catch region of a try node and its handlers.
    fn compile_guarded(
        &mut self,
        body: &Expr,
        handlers: &[CatchBlock],
        ty: &Type,
        result: Option<u32>,
    ) -> Result<(), CompileError> {
        let region = self.reserve_region()?;
        self.emit(Instruction::EnterTry(region));
        self.scopes.push(Scope::Region(region));
        self.compile_as(body, ty)?;
        self.store_result(result);
        let mut exits = vec![self.leave_placeholder(1)];
        self.scopes.pop();

        let mut clauses = Vec::with_capacity(handlers.len());
        for handler in handlers {
            // The VM enters the handler with an empty stack and the
            // exception in `slot`.
            let slot = self.allocate_local()?;
            clauses.push(CatchClause {
                class: handler.test().class_id(),
                slot,
                target: self.here()?,
            });

            let variable = match handler.variable() {
                Some(var) => {
                    let (storage, previous) = self.declare(var)?;
                    self.emit(Instruction::LoadLocal(slot));
                    self.initialize_variable(storage);
                    Some((var, previous))
                }
                None => None,
            };

            self.catch_slots.push(slot);
            let compiled = self.compile_as(handler.body(), ty);
            self.catch_slots.pop();
            compiled?;
            self.store_result(result);

            if let Some((var, previous)) = variable {
                self.undeclare(var, previous);
            }
            exits.push(self.jump_placeholder(Instruction::Jump));
        }

        self.regions[region as usize] = Region::Catch(clauses);
        self.patch_to_here(exits)
    }

    fn store_result(&mut self, result: Option<u32>) {
        match result {
            Some(slot) => self.emit(Instruction::StoreLocal(slot)),
            None => self.emit(Instruction::Pop),
        };
    }

    fn compile_throw(&mut self, value: Option<&Expr>) -> Result<(), CompileError> {
        match value {
            Some(value) => {
                self.compile_expr(value)?;
                self.emit(Instruction::Throw);
            }
            None => {
                let slot = *self.catch_slots.last().ok_or(CompileError::RethrowOutsideCatch)?;
                self.emit(Instruction::Rethrow(slot));
            }
        }
        // Unreachable, but what follows expects the throw's value.
        self.push_stack();
        Ok(())
    }
}

/// The instruction that jumps from code nested in `from` to a label
/// defined in `label_scopes`.
fn resolve_jump(name: &str, label_scopes: &[Scope], position: u32, from: &[Scope]) -> Result<Instruction, CompileError> {
    if !from.starts_with(label_scopes) {
        return Err(CompileError::JumpIntoTry(name.into()));
    }
    let exited = &from[label_scopes.len()..];
    if exited.contains(&Scope::Handler) {
        return Err(CompileError::JumpOutOfFinally(name.into()));
    }
    Ok(match exited.len() {
        0 => Instruction::Jump(position),
        frames => Instruction::Leave {
            target: position,
            frames: u32::try_from(frames).map_err(|_| CompileError::TooLarge("region nesting"))?,
        },
    })
}

fn build_table(lowering: Lowering, cases: &[SwitchCase], starts: &[u32], default: u32) -> SwitchTable {
    match lowering {
        Lowering::Dense { min, span } => {
            let mut targets = vec![default; span];
            for (case, &start) in cases.iter().zip(starts) {
                for test in case.values() {
                    let value = test.as_int().expect("dense switch tables only hold int cases");
                    let offset = value.wrapping_sub(min) as usize;
                    targets[offset] = start;
                }
            }
            SwitchTable::Dense { min, targets, default }
        }
        Lowering::Hashed | Lowering::Chain => {
            let mut targets = HashMap::new();
            for (case, &start) in cases.iter().zip(starts) {
                for test in case.values() {
                    let key = test.key().expect("switch case values are validated to be hashable");
                    targets.insert(key, start);
                }
            }
            SwitchTable::Hashed { targets, default }
        }
    }
}

fn arith_op(op: BinaryOp) -> ArithOp {
    match op {
        BinaryOp::Add => ArithOp::Add,
        BinaryOp::Subtract => ArithOp::Sub,
        BinaryOp::Multiply => ArithOp::Mul,
        BinaryOp::Divide => ArithOp::Div,
        BinaryOp::Modulo => ArithOp::Rem,
        BinaryOp::And => ArithOp::And,
        BinaryOp::Or => ArithOp::Or,
        BinaryOp::ExclusiveOr => ArithOp::Xor,
        BinaryOp::LeftShift => ArithOp::Shl,
        BinaryOp::RightShift => ArithOp::Shr,
        other => unreachable!("'{other}' is not an arithmetic operator"),
    }
}

fn cmp_op(op: BinaryOp) -> CmpOp {
    match op {
        BinaryOp::LessThan => CmpOp::Lt,
        BinaryOp::LessThanOrEqual => CmpOp::Le,
        BinaryOp::GreaterThan => CmpOp::Gt,
        BinaryOp::GreaterThanOrEqual => CmpOp::Ge,
        other => unreachable!("'{other}' is not an ordering operator"),
    }
}
