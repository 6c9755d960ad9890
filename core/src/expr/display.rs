//! Human-readable tree dump. Best effort; not a stable format.

use core::fmt::{self, Write};

use super::node::{ExprKind, GotoKind, IncrementKind, TypeTestOp};
use super::{BinaryOp, Expr, Parameter, UnaryOp};

struct TreeWriter<'a, 'b> {
    out: &'a mut fmt::Formatter<'b>,
    depth: usize,
}

impl TreeWriter<'_, '_> {
    fn newline(&mut self) -> fmt::Result {
        self.out.write_char('\n')?;
        for _ in 0..self.depth {
            self.out.write_str("    ")?;
        }
        Ok(())
    }

    fn list(&mut self, exprs: &[Expr]) -> fmt::Result {
        for (i, expr) in exprs.iter().enumerate() {
            if i > 0 {
                self.out.write_str(", ")?;
            }
            self.expr(expr)?;
        }
        Ok(())
    }

    fn variables(&mut self, vars: &[Parameter]) -> fmt::Result {
        for (i, var) in vars.iter().enumerate() {
            if i > 0 {
                self.out.write_str(", ")?;
            }
            let by_ref = if var.is_by_ref() { "ref " } else { "" };
            write!(self.out, "{by_ref}{} ${}", var.ty(), var.display_name())?;
        }
        Ok(())
    }

    /// `{ e1; e2; ... }` with one expression per line.
    fn braced(&mut self, exprs: &[&Expr]) -> fmt::Result {
        self.out.write_str("{")?;
        self.depth += 1;
        for (i, expr) in exprs.iter().enumerate() {
            self.newline()?;
            self.expr(expr)?;
            if i + 1 < exprs.len() {
                self.out.write_char(';')?;
            }
        }
        self.depth -= 1;
        self.newline()?;
        self.out.write_str("}")
    }

    fn expr(&mut self, expr: &Expr) -> fmt::Result {
        match expr.kind() {
            ExprKind::Constant(value) => write!(self.out, "{value:?}"),
            ExprKind::Parameter(p) => write!(self.out, "${}", p.display_name()),
            ExprKind::Default => write!(self.out, ".Default({})", expr.ty()),
            ExprKind::Unary { op, operand } => {
                match op {
                    UnaryOp::Convert => write!(self.out, "({})", expr.ty())?,
                    UnaryOp::TypeOf => self.out.write_str(".TypeOf")?,
                    _ => write!(self.out, "{op}")?,
                }
                self.out.write_char('(')?;
                self.expr(operand)?;
                self.out.write_char(')')
            }
            ExprKind::Binary { op, left, right } => {
                let assign = *op == BinaryOp::Assign;
                if !assign {
                    self.out.write_char('(')?;
                }
                self.expr(left)?;
                write!(self.out, " {op} ")?;
                self.expr(right)?;
                if !assign {
                    self.out.write_char(')')?;
                }
                Ok(())
            }
            ExprKind::TypeBinary { op, operand, test } => {
                let name = match op {
                    TypeTestOp::TypeIs => "is",
                    TypeTestOp::TypeEqual => "TypeEqual",
                };
                self.out.write_char('(')?;
                self.expr(operand)?;
                write!(self.out, " .{name} {test})")
            }
            ExprKind::Member { object, field } => {
                self.expr(object)?;
                write!(self.out, ".{}", field.name())
            }
            ExprKind::Index { object, index } => {
                self.expr(object)?;
                self.out.write_char('[')?;
                self.expr(index)?;
                self.out.write_char(']')
            }
            ExprKind::Call {
                object,
                method,
                args,
            } => {
                match object {
                    Some(object) => {
                        self.expr(object)?;
                        write!(self.out, ".{}(", method.name())?;
                    }
                    None => write!(self.out, ".Call {}(", method.name())?,
                }
                self.list(args)?;
                self.out.write_char(')')
            }
            ExprKind::Invoke { target, args } => {
                self.out.write_str(".Invoke ")?;
                self.expr(target)?;
                self.out.write_char('(')?;
                self.list(args)?;
                self.out.write_char(')')
            }
            ExprKind::New { args, .. } => {
                write!(self.out, ".New {}(", expr.ty())?;
                self.list(args)?;
                self.out.write_char(')')
            }
            ExprKind::NewArray { items } => {
                write!(self.out, ".NewArray {} {{", expr.ty())?;
                self.list(items)?;
                self.out.write_char('}')
            }
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => {
                self.out.write_str(".If (")?;
                self.expr(test)?;
                self.out.write_str(") ")?;
                self.braced(&[if_true])?;
                self.out.write_str(" .Else ")?;
                self.braced(&[if_false])
            }
            ExprKind::Loop {
                body,
                break_label,
                continue_label,
            } => {
                self.out.write_str(".Loop ")?;
                if let Some(label) = continue_label {
                    write!(self.out, ".Continue {} ", label.display_name())?;
                }
                if let Some(label) = break_label {
                    write!(self.out, ".Break {} ", label.display_name())?;
                }
                self.braced(&[body])
            }
            ExprKind::Block { variables, exprs } => {
                self.out.write_str(".Block(")?;
                self.variables(variables)?;
                self.out.write_str(") ")?;
                let exprs: Vec<&Expr> = exprs.iter().collect();
                self.braced(&exprs)
            }
            ExprKind::Goto {
                kind,
                target,
                value,
            } => {
                let word = match kind {
                    GotoKind::Goto => "Goto",
                    GotoKind::Return => "Return",
                    GotoKind::Break => "Break",
                    GotoKind::Continue => "Continue",
                };
                write!(self.out, ".{word} {}", target.display_name())?;
                if let Some(value) = value {
                    self.out.write_str(" { ")?;
                    self.expr(value)?;
                    self.out.write_str(" }")?;
                }
                Ok(())
            }
            ExprKind::Label { target, default } => {
                write!(self.out, ".Label {}", target.display_name())?;
                if let Some(default) = default {
                    self.out.write_char(' ')?;
                    self.braced(&[default])?;
                }
                self.out.write_str(" .LabelTarget")
            }
            ExprKind::Switch {
                value,
                cases,
                default,
            } => {
                self.out.write_str(".Switch (")?;
                self.expr(value)?;
                self.out.write_str(") {")?;
                self.depth += 1;
                for case in cases {
                    self.newline()?;
                    for test in &case.values {
                        write!(self.out, ".Case ({test:?}): ")?;
                    }
                    self.braced(&[&case.body])?;
                }
                if let Some(default) = default {
                    self.newline()?;
                    self.out.write_str(".Default: ")?;
                    self.braced(&[default])?;
                }
                self.depth -= 1;
                self.newline()?;
                self.out.write_char('}')
            }
            ExprKind::Try {
                body,
                handlers,
                finally,
                fault,
            } => {
                self.out.write_str(".Try ")?;
                self.braced(&[body])?;
                for handler in handlers {
                    write!(self.out, " .Catch ({}", handler.test)?;
                    if let Some(var) = &handler.variable {
                        write!(self.out, " ${}", var.display_name())?;
                    }
                    self.out.write_str(") ")?;
                    self.braced(&[&handler.body])?;
                }
                if let Some(finally) = finally {
                    self.out.write_str(" .Finally ")?;
                    self.braced(&[finally])?;
                }
                if let Some(fault) = fault {
                    self.out.write_str(" .Fault ")?;
                    self.braced(&[fault])?;
                }
                Ok(())
            }
            ExprKind::Throw { value } => match value {
                Some(value) => {
                    self.out.write_str(".Throw ")?;
                    self.expr(value)
                }
                None => self.out.write_str(".Rethrow"),
            },
            ExprKind::Lambda(lambda) => {
                write!(
                    self.out,
                    ".Lambda {}(",
                    lambda.name.as_deref().unwrap_or("lambda")
                )?;
                self.variables(&lambda.params)?;
                write!(self.out, ") -> {} ", lambda.signature.ret)?;
                self.braced(&[&lambda.body])
            }
            ExprKind::Dynamic { binder, args } => {
                write!(self.out, ".Dynamic {}(", binder.operation())?;
                self.list(args)?;
                self.out.write_char(')')
            }
            ExprKind::MemberInit { new, bindings } => {
                self.expr(new)?;
                self.out.write_str(" {")?;
                for (i, binding) in bindings.iter().enumerate() {
                    if i > 0 {
                        self.out.write_char(',')?;
                    }
                    write!(self.out, " {} = ", binding.field.name())?;
                    self.expr(&binding.value)?;
                }
                self.out.write_str(" }")
            }
            ExprKind::ListInit { array, items } => {
                self.expr(array)?;
                self.out.write_str(" {")?;
                self.list(items)?;
                self.out.write_char('}')
            }
            ExprKind::Increment { kind, operand } => {
                let (prefix, suffix) = match kind {
                    IncrementKind::PreIncrement => ("++", ""),
                    IncrementKind::PreDecrement => ("--", ""),
                    IncrementKind::PostIncrement => ("", "++"),
                    IncrementKind::PostDecrement => ("", "--"),
                };
                self.out.write_str(prefix)?;
                self.expr(operand)?;
                self.out.write_str(suffix)
            }
            ExprKind::CompoundAssign { op, target, value } => {
                self.expr(target)?;
                write!(self.out, " {op}= ")?;
                self.expr(value)
            }
            ExprKind::Extension(ext) => write!(self.out, ".Extension {}", ext.name()),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        TreeWriter { out: f, depth: 0 }.expr(self)
    }
}
