//! Structural tree comparison.
//!
//! Two trees are compared by flattening both in pre-order (reducible nodes
//! are replaced by their reduction) and walking the sequences in lock-step.
//! They are compatible when every aligned pair has the same node kind, the
//! same static type and the same node-specific identity (operator, method,
//! field, class, binder, switch case values); constants may differ. The
//! constants that differ become the positions a templated rule turns into
//! parameters. Labels, and variables declared inside the trees, are matched
//! by the order in which they appear rather than by identity.
//!
//! Positions are indices into the sequence of `Constant` nodes of the
//! flattened tree.

#[cfg(test)]
mod compare_test;

use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::expr::{BinaryOp, Expr, ExprKind, LabelId, LabelTarget, NodeKind, ParamId, Parameter, Visitor};
use crate::types::Type;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Compatibility {
    Incompatible,
    /// Equal except at positions the right-hand tree already templates.
    Compatible,
    /// Compatible, but at least one constant differs at a position the
    /// right-hand tree does not template yet.
    TooSpecific,
}

/// A constant of the left-hand tree at a position that is (or must become)
/// a template parameter.
#[derive(Clone, Debug)]
pub struct Replacement {
    pub position: usize,
    pub constant: Expr,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MismatchReason {
    /// The flattened trees have different lengths.
    Length,
    NodeKind,
    Type,
    /// Same kind and type, different operator, member, binder or shape.
    Node,
}

/// First aligned position at which the trees disagree.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Mismatch {
    pub index: usize,
    pub reason: MismatchReason,
}

#[derive(Clone, Debug)]
pub struct Comparison {
    pub outcome: Compatibility,
    /// Ordered by position.
    pub replacements: Vec<Replacement>,
    pub mismatch: Option<Mismatch>,
}

impl Comparison {
    fn incompatible(index: usize, reason: MismatchReason) -> Self {
        Comparison {
            outcome: Compatibility::Incompatible,
            replacements: Vec::new(),
            mismatch: Some(Mismatch { index, reason }),
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.outcome != Compatibility::Incompatible
    }

    pub fn is_too_specific(&self) -> bool {
        self.outcome == Compatibility::TooSpecific
    }

    /// The left-hand constants at the replaced positions.
    pub fn differing_constants(&self) -> impl Iterator<Item = &Expr> {
        self.replacements.iter().map(|r| &r.constant)
    }

    pub fn positions(&self) -> BTreeSet<usize> {
        self.replacements.iter().map(|r| r.position).collect()
    }
}

/// Compares two trees neither of which is templated.
pub fn compare(left: &Expr, right: &Expr) -> Comparison {
    compare_templated(left, right, &BTreeSet::new())
}

/// Compares `left` against `right`, where `right` is the representative
/// tree of a template that parameterizes the constants at `templated`.
///
/// Templated positions are always reported as replacements. A differing
/// constant at any other position is reported too, and makes the outcome
/// [`Compatibility::TooSpecific`].
pub fn compare_templated(left: &Expr, right: &Expr, templated: &BTreeSet<usize>) -> Comparison {
    let left = flatten(left);
    let right = flatten(right);
    if left.len() != right.len() {
        return Comparison::incompatible(left.len().min(right.len()), MismatchReason::Length);
    }

    let mut state = Scopes::default();
    let mut replacements = Vec::new();
    let mut too_specific = false;
    let mut position = 0;

    for (index, (l, r)) in left.iter().zip(&right).enumerate() {
        if l.node_kind() != r.node_kind() {
            return Comparison::incompatible(index, MismatchReason::NodeKind);
        }
        if l.ty() != r.ty() {
            return Comparison::incompatible(index, MismatchReason::Type);
        }

        if let (ExprKind::Constant(lv), ExprKind::Constant(rv)) = (l.kind(), r.kind()) {
            if templated.contains(&position) {
                replacements.push(Replacement {
                    position,
                    constant: l.clone(),
                });
            } else if !lv.identical(rv) {
                too_specific = true;
                replacements.push(Replacement {
                    position,
                    constant: l.clone(),
                });
            }
            position += 1;
            continue;
        }

        if !state.compare_node(l, r) {
            return Comparison::incompatible(index, MismatchReason::Node);
        }
    }

    Comparison {
        outcome: if too_specific {
            Compatibility::TooSpecific
        } else {
            Compatibility::Compatible
        },
        replacements,
        mismatch: None,
    }
}

/// Pre-order node sequence with reducible nodes replaced by their
/// reductions.
pub fn flatten(expr: &Expr) -> Vec<Expr> {
    let mut flattener = Flattener(Vec::new());
    flattener.visit(expr);
    flattener.0
}

/// The constant nodes of `expr`, indexed by position.
pub fn constants(expr: &Expr) -> Vec<Expr> {
    flatten(expr)
        .into_iter()
        .filter(|node| node.node_kind() == NodeKind::Constant)
        .collect()
}

struct Flattener(Vec<Expr>);

impl Visitor for Flattener {
    fn visit(&mut self, expr: &Expr) {
        if expr.can_reduce()
            && let Ok(reduced) = expr.reduce_extensions()
        {
            self.visit(&reduced);
            return;
        }
        self.0.push(expr.clone());
        self.walk(expr);
    }
}

/// Alpha-equivalence numbering for variables and labels declared inside
/// the compared trees.
#[derive(Default)]
struct Scopes {
    left_vars: HashMap<ParamId, usize>,
    right_vars: HashMap<ParamId, usize>,
    next_var: usize,
    left_labels: HashMap<LabelId, usize>,
    right_labels: HashMap<LabelId, usize>,
    next_label: usize,
}

/// Types whose equality comparison is by reference. Constants compared
/// with them cannot be templated.
fn is_identity_type(ty: &Type) -> bool {
    matches!(
        ty,
        Type::Object | Type::Null | Type::Class(_) | Type::Array(_) | Type::Function(_)
    )
}

impl Scopes {
    fn declare_vars<'a>(
        &mut self,
        left: impl ExactSizeIterator<Item = &'a Parameter>,
        right: impl ExactSizeIterator<Item = &'a Parameter>,
    ) -> bool {
        if left.len() != right.len() {
            return false;
        }
        for (l, r) in left.zip(right) {
            if l.is_by_ref() != r.is_by_ref() || l.ty() != r.ty() {
                return false;
            }
            self.left_vars.insert(l.id(), self.next_var);
            self.right_vars.insert(r.id(), self.next_var);
            self.next_var += 1;
        }
        true
    }

    fn same_var(&self, l: &Parameter, r: &Parameter) -> bool {
        match (self.left_vars.get(&l.id()), self.right_vars.get(&r.id())) {
            (Some(a), Some(b)) => a == b,
            (None, None) => l == r,
            _ => false,
        }
    }

    fn declare_label(&mut self, l: Option<&LabelTarget>, r: Option<&LabelTarget>) -> bool {
        match (l, r) {
            (Some(l), Some(r)) => {
                self.left_labels.insert(l.id(), self.next_label);
                self.right_labels.insert(r.id(), self.next_label);
                self.next_label += 1;
                l.ty() == r.ty()
            }
            (None, None) => true,
            _ => false,
        }
    }

    /// Labels may be referenced before the node that defines them, so an
    /// unseen pair is numbered on first use.
    fn same_label(&mut self, l: &LabelTarget, r: &LabelTarget) -> bool {
        match (self.left_labels.get(&l.id()), self.right_labels.get(&r.id())) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.declare_label(Some(l), Some(r)),
            _ => false,
        }
    }

    fn compare_node(&mut self, left: &Expr, right: &Expr) -> bool {
        match (left.kind(), right.kind()) {
            (ExprKind::Parameter(l), ExprKind::Parameter(r)) => self.same_var(l, r),
            (ExprKind::Default, ExprKind::Default) => true,
            (ExprKind::Unary { op: a, .. }, ExprKind::Unary { op: b, .. }) => a == b,
            (
                ExprKind::Binary {
                    op: a,
                    left: ll,
                    right: lr,
                },
                ExprKind::Binary {
                    op: b,
                    left: rl,
                    right: rr,
                },
            ) => {
                if a != b {
                    return false;
                }
                if a.is_equality() && is_identity_type(ll.ty()) {
                    return same_identity_constant(ll, rl) && same_identity_constant(lr, rr);
                }
                if *a == BinaryOp::Assign {
                    return ll.node_kind() == rl.node_kind();
                }
                true
            }
            (
                ExprKind::TypeBinary { op: a, test: ta, .. },
                ExprKind::TypeBinary { op: b, test: tb, .. },
            ) => a == b && ta == tb,
            (ExprKind::Member { field: a, .. }, ExprKind::Member { field: b, .. }) => a == b,
            (ExprKind::Index { .. }, ExprKind::Index { .. }) => true,
            (
                ExprKind::Call {
                    object: oa,
                    method: a,
                    ..
                },
                ExprKind::Call {
                    object: ob,
                    method: b,
                    ..
                },
            ) => a.id() == b.id() && oa.is_some() == ob.is_some(),
            (ExprKind::Invoke { args: a, .. }, ExprKind::Invoke { args: b, .. }) => a.len() == b.len(),
            (ExprKind::New { class: a, .. }, ExprKind::New { class: b, .. }) => a == b,
            (ExprKind::NewArray { items: a }, ExprKind::NewArray { items: b }) => a.len() == b.len(),
            (ExprKind::Conditional { .. }, ExprKind::Conditional { .. }) => true,
            (
                ExprKind::Loop {
                    break_label: lb,
                    continue_label: lc,
                    ..
                },
                ExprKind::Loop {
                    break_label: rb,
                    continue_label: rc,
                    ..
                },
            ) => self.declare_label(lb.as_ref(), rb.as_ref()) && self.declare_label(lc.as_ref(), rc.as_ref()),
            (
                ExprKind::Block {
                    variables: lv,
                    exprs: le,
                },
                ExprKind::Block {
                    variables: rv,
                    exprs: re,
                },
            ) => le.len() == re.len() && self.declare_vars(lv.iter(), rv.iter()),
            (
                ExprKind::Goto {
                    kind: ka,
                    target: ta,
                    value: va,
                },
                ExprKind::Goto {
                    kind: kb,
                    target: tb,
                    value: vb,
                },
            ) => ka == kb && va.is_some() == vb.is_some() && self.same_label(ta, tb),
            (
                ExprKind::Try {
                    handlers: ha,
                    finally: fa,
                    fault: qa,
                    ..
                },
                ExprKind::Try {
                    handlers: hb,
                    finally: fb,
                    fault: qb,
                    ..
                },
            ) => {
                if fa.is_some() != fb.is_some() || qa.is_some() != qb.is_some() || ha.len() != hb.len() {
                    return false;
                }
                for (l, r) in ha.iter().zip(hb) {
                    if l.test() != r.test() || l.variable().is_some() != r.variable().is_some() {
                        return false;
                    }
                    if !self.declare_vars(l.variable().into_iter(), r.variable().into_iter()) {
                        return false;
                    }
                }
                true
            }
            (ExprKind::Label { target: ta, default: da }, ExprKind::Label { target: tb, default: db }) => {
                da.is_some() == db.is_some() && self.same_label(ta, tb)
            }
            (
                ExprKind::Switch {
                    cases: ca,
                    default: da,
                    ..
                },
                ExprKind::Switch {
                    cases: cb,
                    default: db,
                    ..
                },
            ) => {
                da.is_some() == db.is_some()
                    && ca.len() == cb.len()
                    && ca.iter().zip(cb).all(|(l, r)| {
                        l.values().len() == r.values().len()
                            && l.values().iter().zip(r.values()).all(|(a, b)| a.identical(b))
                    })
            }
            (ExprKind::Throw { value: a }, ExprKind::Throw { value: b }) => a.is_some() == b.is_some(),
            (ExprKind::Lambda(a), ExprKind::Lambda(b)) => {
                self.declare_vars(a.params.iter(), b.params.iter())
            }
            (ExprKind::Dynamic { binder: a, args: la }, ExprKind::Dynamic { binder: b, args: lb }) => {
                la.len() == lb.len() && a.cache_identity() == b.cache_identity()
            }
            // Extensions that failed to reduce never generalize.
            _ => false,
        }
    }
}

/// Operands of a reference-equality test: constants must be the very same
/// value, anything else is compared by the main walk.
fn same_identity_constant(left: &Expr, right: &Expr) -> bool {
    match (left.as_constant(), right.as_constant()) {
        (Some(a), Some(b)) => a.identical(b),
        _ => true,
    }
}
