/// Arithmetic, bitwise and logical operators shared by the typed operation
/// instructions. Not every operator is valid for every type: `FloatOp` never
/// sees the bitwise ones, `BoolOp` only sees `And`, `Or` and `Xor`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Ordering comparisons. Equality uses the untyped `Equal`/`NotEqual`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// One VM instruction.
///
/// Operands index into the tables of the enclosing [`Code`](super::Code):
/// constants, methods, sites, lambdas, regions and switch tables. Jump
/// targets are absolute instruction indices.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Instruction {
    Const(u32),
    PushVoid,
    Pop,
    Dup,

    // Variables. A boxed local holds a `Value::Box`; captures are always
    // boxes shared with the creating frame.
    LoadLocal(u32),
    StoreLocal(u32),
    LoadBoxed(u32),
    StoreBoxed(u32),
    /// Pops a value and stores a fresh box holding it in the slot.
    NewBox(u32),
    /// Pushes the box held by a boxed local.
    LoadBox(u32),
    LoadCapture(u32),
    StoreCapture(u32),
    LoadCaptureBox(u32),

    IntOp(ArithOp),
    FloatOp(ArithOp),
    BoolOp(ArithOp),
    IntCmp(CmpOp),
    FloatCmp(CmpOp),
    StrCmp(CmpOp),
    NegInt,
    NegFloat,
    Not,
    BitNot,
    Equal,
    NotEqual,

    IntToFloat,
    FloatToInt,
    /// Checked down-cast to the type token in the constant pool.
    CastTo(u32),
    TypeOf,
    TypeIs(u32),
    TypeEqual(u32),

    /// Operand is the field's slot in the instance layout.
    LoadField(u32),
    StoreField(u32),
    NewObject {
        class: u32,
        argc: u32,
    },
    /// `elem` is a type token in the constant pool.
    NewArray {
        elem: u32,
        count: u32,
    },
    LoadElement,
    StoreElement,

    CallMethod(u32),
    Invoke(u32),
    MakeClosure(u32),
    Dynamic(u32),

    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    Switch(u32),
    Return,

    // Exception regions.
    EnterTry(u32),
    /// Jumps to `target`, leaving `frames` regions first and running the
    /// finally handlers among them.
    Leave {
        target: u32,
        frames: u32,
    },
    EndFinally,
    Throw,
    /// Rethrows the exception stored in a local slot.
    Rethrow(u32),
}

static_assertions::const_assert!(core::mem::size_of::<Instruction>() <= 12);

impl Instruction {
    /// Net effect on the operand stack, for instructions with a fixed
    /// effect. Calls, dynamic operations and closures depend on their
    /// tables and return `None`.
    pub fn stack_effect(self) -> Option<i32> {
        use Instruction::*;
        Some(match self {
            Const(_) | PushVoid | Dup | LoadLocal(_) | LoadBoxed(_) | LoadBox(_) | LoadCapture(_)
            | LoadCaptureBox(_) => 1,
            Pop | StoreLocal(_) | StoreBoxed(_) | NewBox(_) | StoreCapture(_) => -1,
            IntOp(_) | FloatOp(_) | BoolOp(_) | IntCmp(_) | FloatCmp(_) | StrCmp(_) | Equal
            | NotEqual | LoadElement => -1,
            NegInt | NegFloat | Not | BitNot | IntToFloat | FloatToInt | CastTo(_) | TypeOf
            | TypeIs(_) | TypeEqual(_) | LoadField(_) => 0,
            StoreField(_) => -2,
            StoreElement => -3,
            NewObject { argc, .. } => 1 - argc as i32,
            NewArray { count, .. } => 1 - count as i32,
            Invoke(argc) => -(argc as i32),
            Jump(_) | EnterTry(_) | Leave { .. } | EndFinally => 0,
            JumpIfFalse(_) | JumpIfTrue(_) | Switch(_) | Return | Throw => -1,
            Rethrow(_) => 0,
            CallMethod(_) | MakeClosure(_) | Dynamic(_) => return None,
        })
    }
}
