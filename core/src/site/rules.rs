//! Cache entries: specific rules and templated rules with binding rows.

use std::collections::BTreeSet;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::binder::{ArgumentShape, BindError, Restrictions};
use crate::compare::{self, Comparison};
use crate::compiler::compile;
use crate::error::RuntimeError;
use crate::expr::{Expr, ExprError, ExprKind, Lambda, Parameter, Rewriter};
use crate::options::CompileOptions;
use crate::values::{Delegate, Value};

/// A rule produced by a binder and compiled for one site signature.
#[derive(Debug)]
pub(crate) struct CompiledRule {
    pub restrictions: Restrictions,
    /// `lambda(site params) { test; body }`, the tree the comparer sees.
    pub tree: Lambda,
    pub delegate: Delegate,
}

/// A rule whose constants at `positions` are lambda parameters.
#[derive(Debug)]
pub(crate) struct Template {
    pub positions: BTreeSet<usize>,
    /// Representative tree; its constants at `positions` stand for all rows.
    pub tree: Lambda,
    /// Takes the site arguments followed by one value per position.
    pub delegate: Delegate,
}

#[derive(Debug, Clone)]
pub(crate) struct TemplateRow {
    pub restrictions: Restrictions,
    pub bindings: Arc<[Value]>,
}

#[derive(Debug, Clone)]
pub(crate) enum RuleEntry {
    Specific(Arc<CompiledRule>),
    Templated {
        template: Arc<Template>,
        rows: Vec<TemplateRow>,
    },
}

/// The implementation selected for one invocation.
pub(crate) struct Matched {
    delegate: Delegate,
    bindings: Option<Arc<[Value]>>,
}

impl Matched {
    pub fn call(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        let extra = self.bindings.as_deref().unwrap_or(&[]);
        let mut all = Vec::with_capacity(args.len() + extra.len());
        all.extend_from_slice(args);
        all.extend_from_slice(extra);
        self.delegate.call(all)
    }
}

impl RuleEntry {
    pub fn lookup(&self, shapes: &[ArgumentShape]) -> Option<Matched> {
        match self {
            RuleEntry::Specific(rule) => rule.restrictions.matches(shapes).then(|| Matched {
                delegate: rule.delegate.clone(),
                bindings: None,
            }),
            RuleEntry::Templated { template, rows } => rows
                .iter()
                .find(|row| row.restrictions.matches(shapes))
                .map(|row| Matched {
                    delegate: template.delegate.clone(),
                    bindings: Some(row.bindings.clone()),
                }),
        }
    }

    /// Whether both entries are the same cached rule.
    pub fn same_entry(&self, other: &RuleEntry) -> bool {
        match (self, other) {
            (RuleEntry::Specific(a), RuleEntry::Specific(b)) => Arc::ptr_eq(a, b),
            (RuleEntry::Templated { template: a, .. }, RuleEntry::Templated { template: b, .. }) => {
                Arc::ptr_eq(a, b)
            }
            _ => false,
        }
    }

    /// Number of shapes this entry covers.
    pub fn row_count(&self) -> usize {
        match self {
            RuleEntry::Specific(_) => 1,
            RuleEntry::Templated { rows, .. } => rows.len(),
        }
    }
}

impl CompiledRule {
    pub fn matched(&self) -> Matched {
        Matched {
            delegate: self.delegate.clone(),
            bindings: None,
        }
    }
}

/// Outcome of trying to fold a new rule into an existing entry.
pub(crate) enum Generalized {
    /// A new templated entry replaces the specific one.
    Created(RuleEntry),
    /// The rule became a new row of the template.
    Row(RuleEntry),
    /// The template was recompiled with more positions.
    Widened(RuleEntry),
}

impl Generalized {
    pub fn into_entry(self) -> RuleEntry {
        match self {
            Generalized::Created(entry) | Generalized::Row(entry) | Generalized::Widened(entry) => entry,
        }
    }
}

/// Attempts to merge `rule` with `existing`. Returns `Ok(None)` when the
/// trees differ in anything other than constants.
pub(crate) fn generalize(
    existing: &RuleEntry,
    rule: &CompiledRule,
    max_rows: usize,
    options: &CompileOptions,
) -> Result<Option<Generalized>, BindError> {
    match existing {
        RuleEntry::Specific(old) => {
            let comparison = compare::compare(&rule.tree, &old.tree);
            if !comparison.is_too_specific() {
                return Ok(None);
            }
            let positions = comparison.positions();
            let template = Template::build(&old.tree, positions, options)?;
            let old_row = template.row_for_representative(&old.restrictions)?;
            let new_row = row_from(&comparison, &rule.restrictions)?;
            Ok(Some(Generalized::Created(RuleEntry::Templated {
                template: Arc::new(template),
                rows: vec![new_row, old_row],
            })))
        }
        RuleEntry::Templated { template, rows } => {
            let comparison = compare::compare_templated(&rule.tree, &template.tree, &template.positions);
            if !comparison.is_compatible() {
                return Ok(None);
            }
            if !comparison.is_too_specific() {
                let mut rows = rows.clone();
                rows.insert(0, row_from(&comparison, &rule.restrictions)?);
                rows.truncate(max_rows);
                return Ok(Some(Generalized::Row(RuleEntry::Templated {
                    template: template.clone(),
                    rows,
                })));
            }

            let positions: BTreeSet<usize> = template.positions.union(&comparison.positions()).copied().collect();
            let widened = Template::build(&template.tree, positions, options)?;
            let mut new_rows = Vec::with_capacity(rows.len() + 1);
            new_rows.push(row_from(&comparison, &rule.restrictions)?);
            for row in rows {
                new_rows.push(widened.extend_row(&template.positions, row)?);
            }
            new_rows.truncate(max_rows);
            Ok(Some(Generalized::Widened(RuleEntry::Templated {
                template: Arc::new(widened),
                rows: new_rows,
            })))
        }
    }
}

fn row_from(comparison: &Comparison, restrictions: &Restrictions) -> Result<TemplateRow, BindError> {
    let bindings = comparison
        .differing_constants()
        .map(constant_value)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(TemplateRow {
        restrictions: restrictions.clone(),
        bindings: bindings.into(),
    })
}

fn constant_value(expr: &Expr) -> Result<Value, BindError> {
    expr.as_constant()
        .cloned()
        .ok_or_else(|| BindError::Custom(format!("expected a constant at a templated position, found {expr}")))
}

impl Template {
    fn build(tree: &Lambda, positions: BTreeSet<usize>, options: &CompileOptions) -> Result<Self, BindError> {
        let constants = compare::constants(tree.as_expr());
        let mut holes = HashMap::with_capacity(positions.len());
        let mut extra = Vec::with_capacity(positions.len());
        for &position in &positions {
            let constant = constants
                .get(position)
                .ok_or_else(|| BindError::Custom(format!("template position {position} is out of range")))?;
            let param = Parameter::temp(constant.ty(), "hole");
            holes.insert(position, param.clone());
            extra.push(param);
        }

        let mut rewriter = Parameterize {
            holes: &holes,
            next: 0,
        };
        let block = rewriter.rewrite(tree.body())?;
        let body = match block.kind() {
            ExprKind::Block { exprs, .. } if exprs.len() == 2 => exprs[1].clone(),
            _ => return Err(BindError::Custom("rule tree is not a test/body block".into())),
        };

        let mut params = tree.params().to_vec();
        params.extend(extra);
        let lambda = Expr::lambda_typed(Some("template"), params, tree.return_type().clone(), body)?;
        let delegate = compile(&lambda, options)?;
        tracing::debug!(positions = ?positions, "Compiled rule template");
        Ok(Template {
            positions,
            tree: tree.clone(),
            delegate,
        })
    }

    /// The row of the rule whose tree is the representative.
    fn row_for_representative(&self, restrictions: &Restrictions) -> Result<TemplateRow, BindError> {
        let constants = compare::constants(self.tree.as_expr());
        let bindings = self
            .positions
            .iter()
            .map(|&position| constant_value(&constants[position]))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TemplateRow {
            restrictions: restrictions.clone(),
            bindings: bindings.into(),
        })
    }

    /// Re-expresses a row of a narrower template over this template's
    /// positions. Positions the row did not bind take the representative's
    /// constant, which every existing row agreed with.
    fn extend_row(&self, old_positions: &BTreeSet<usize>, row: &TemplateRow) -> Result<TemplateRow, BindError> {
        let constants = compare::constants(self.tree.as_expr());
        let mut old = old_positions.iter().zip(row.bindings.iter()).peekable();
        let mut bindings = Vec::with_capacity(self.positions.len());
        for &position in &self.positions {
            match old.peek() {
                Some(&(&bound, ref value)) if bound == position => {
                    bindings.push((*value).clone());
                    old.next();
                }
                _ => bindings.push(constant_value(&constants[position])?),
            }
        }
        Ok(TemplateRow {
            restrictions: row.restrictions.clone(),
            bindings: bindings.into(),
        })
    }
}

/// Replaces the constants at the given pre-order positions with parameter
/// reads. Reducible nodes are reduced first so positions line up with
/// [`compare::flatten`].
struct Parameterize<'a> {
    holes: &'a HashMap<usize, Parameter>,
    next: usize,
}

impl Rewriter for Parameterize<'_> {
    type Error = ExprError;

    fn rewrite(&mut self, expr: &Expr) -> Result<Expr, ExprError> {
        if expr.can_reduce() {
            let reduced = expr.reduce_extensions()?;
            return self.rewrite(&reduced);
        }
        if let ExprKind::Constant(_) = expr.kind() {
            let position = self.next;
            self.next += 1;
            return Ok(match self.holes.get(&position) {
                Some(param) => param.to_expr(),
                None => expr.clone(),
            });
        }
        self.rewrite_children(expr)
    }
}
