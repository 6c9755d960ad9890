//! Variable hoisting analysis.
//!
//! A variable lives in a plain local slot unless something outside the
//! current activation can observe it: a nested lambda that closes over it,
//! or a by-ref argument of an `Invoke`. Those variables are hoisted into a
//! strong box that the closure or callee shares.

use hashbrown::HashSet;

use crate::expr::{Expr, ExprKind, ParamId, Parameter, Visitor};
use crate::types::Type;

/// What one lambda body declares and references, not looking into nested
/// lambdas.
#[derive(Default)]
struct Scan {
    declared: HashSet<ParamId>,
    referenced: Vec<Parameter>,
    seen: HashSet<ParamId>,
    by_ref_args: Vec<Parameter>,
    nested: Vec<(Vec<Parameter>, Expr)>,
}

impl Scan {
    fn run(params: &[Parameter], body: &Expr) -> Self {
        let mut scan = Scan::default();
        scan.declared.extend(params.iter().map(Parameter::id));
        scan.visit(body);
        scan
    }

    fn reference(&mut self, param: &Parameter) {
        if self.seen.insert(param.id()) {
            self.referenced.push(param.clone());
        }
    }
}

impl Visitor for Scan {
    fn visit(&mut self, expr: &Expr) {
        match expr.kind() {
            ExprKind::Parameter(param) => self.reference(param),
            ExprKind::Block { variables, .. } => {
                self.declared.extend(variables.iter().map(Parameter::id));
            }
            ExprKind::Try { handlers, .. } => {
                self.declared
                    .extend(handlers.iter().filter_map(|h| h.variable()).map(Parameter::id));
            }
            ExprKind::Lambda(node) => {
                self.nested.push((node.params.clone(), node.body.clone()));
                return;
            }
            ExprKind::Invoke { target, args } => {
                if let Type::Function(signature) = target.ty() {
                    for (param, arg) in signature.params.iter().zip(args) {
                        if param.by_ref
                            && let Some(var) = arg.as_parameter()
                        {
                            self.by_ref_args.push(var.clone());
                        }
                    }
                }
            }
            _ => {}
        }
        self.walk(expr);
    }
}

/// Variables a lambda uses but does not declare, in order of first use.
/// They become the lambda's captures.
pub(crate) fn free_variables(params: &[Parameter], body: &Expr) -> Vec<Parameter> {
    let scan = Scan::run(params, body);
    let mut seen = HashSet::new();
    let mut free = Vec::new();
    let nested_free = scan
        .nested
        .iter()
        .flat_map(|(params, body)| free_variables(params, body));
    for param in scan.referenced.iter().cloned().chain(nested_free) {
        if !scan.declared.contains(&param.id()) && seen.insert(param.id()) {
            free.push(param);
        }
    }
    free
}

/// Variables declared by this lambda that must live in boxes: captured by
/// a nested lambda or passed by reference. By-ref parameters are boxes
/// already and are included.
pub(crate) fn boxed_variables(params: &[Parameter], body: &Expr) -> HashSet<ParamId> {
    let scan = Scan::run(params, body);
    let mut boxed: HashSet<ParamId> = params
        .iter()
        .filter(|param| param.is_by_ref())
        .map(Parameter::id)
        .collect();
    let captured = scan
        .nested
        .iter()
        .flat_map(|(params, body)| free_variables(params, body));
    for param in captured.chain(scan.by_ref_args.iter().cloned()) {
        if scan.declared.contains(&param.id()) {
            boxed.insert(param.id());
        }
    }
    boxed
}
