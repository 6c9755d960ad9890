//! Tree traversal.
//!
//! Passes implement [`Visitor`] (read-only) or [`Rewriter`] (produces a new
//! tree) and override only the nodes they care about; everything else is
//! handled by the default `walk`/`rewrite_children`, which follow
//! [`Expr::children`]. Adding a pass never requires touching node types.

use super::Expr;

/// Read-only traversal. Override [`visit`](Visitor::visit) and call
/// [`walk`](Visitor::walk) to continue into children.
pub trait Visitor {
    fn visit(&mut self, expr: &Expr) {
        self.walk(expr);
    }

    fn walk(&mut self, expr: &Expr) {
        for child in expr.children() {
            self.visit(child);
        }
    }
}

/// Bottom-up rebuilding traversal. Unchanged subtrees are shared with the
/// input rather than copied.
pub trait Rewriter {
    type Error;

    fn rewrite(&mut self, expr: &Expr) -> Result<Expr, Self::Error> {
        self.rewrite_children(expr)
    }

    fn rewrite_children(&mut self, expr: &Expr) -> Result<Expr, Self::Error> {
        let children = expr.children();
        if children.is_empty() {
            return Ok(expr.clone());
        }
        let mut changed = false;
        let mut rewritten = Vec::with_capacity(children.len());
        for child in children {
            let new = self.rewrite(child)?;
            changed |= !Expr::ptr_eq(&new, child);
            rewritten.push(new);
        }
        Ok(if changed {
            expr.with_children(rewritten)
        } else {
            expr.clone()
        })
    }
}
