//! Choosing how a `Switch` node is lowered.

use crate::options::SwitchPolicy;
use crate::values::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Lowering {
    /// Compare against each case value in order.
    Chain,
    /// Index a jump table by `value - min`.
    Dense { min: i64, span: usize },
    /// Look the value up in a hash table.
    Hashed,
}

pub(crate) fn choose(values: &[&Value], policy: &SwitchPolicy) -> Lowering {
    if values.len() <= policy.max_chain_cases {
        return Lowering::Chain;
    }
    let ints: Option<Vec<i64>> = values.iter().map(|value| value.as_int()).collect();
    let Some(ints) = ints else {
        return Lowering::Hashed;
    };
    let (Some(&min), Some(&max)) = (ints.iter().min(), ints.iter().max()) else {
        return Lowering::Chain;
    };

    // Spans that overflow i64 are never dense.
    let Some(span) = max.checked_sub(min).and_then(|d| u64::try_from(d).ok()).and_then(|d| d.checked_add(1))
    else {
        return Lowering::Hashed;
    };
    let density = ints.len() as f64 / span as f64;
    if span <= policy.max_table_span && density >= policy.min_table_density {
        match usize::try_from(span) {
            Ok(span) => Lowering::Dense { min, span },
            Err(_) => Lowering::Hashed,
        }
    } else {
        Lowering::Hashed
    }
}
