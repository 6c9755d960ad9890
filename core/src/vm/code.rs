use core::fmt;
use core::fmt::Write as _;
use std::sync::Arc;

use ecow::EcoString;
use hashbrown::HashMap;

use super::Instruction;
use crate::expr::NodeKind;
use crate::site::CallSite;
use crate::types::{ClassId, MethodInfo, Signature};
use crate::values::{Value, ValueKey};

/// One handler of a catch region.
#[derive(Debug, Clone)]
pub struct CatchClause {
    /// `None` catches everything.
    pub class: Option<ClassId>,
    /// Local slot receiving the exception object.
    pub slot: u32,
    pub target: u32,
}

/// A protected region entered by `EnterTry`.
#[derive(Debug, Clone)]
pub enum Region {
    Catch(Vec<CatchClause>),
    /// Runs `handler` whenever the region is left, normally or not.
    Finally { handler: u32 },
    /// Runs `handler` only when an exception leaves the region.
    Fault { handler: u32 },
}

#[derive(Debug, Clone)]
pub enum SwitchTable {
    /// `targets[value - min]`.
    Dense {
        min: i64,
        targets: Vec<u32>,
        default: u32,
    },
    Hashed {
        targets: HashMap<ValueKey, u32>,
        default: u32,
    },
}

impl SwitchTable {
    pub fn lookup(&self, value: &Value) -> u32 {
        match self {
            SwitchTable::Dense {
                min,
                targets,
                default,
            } => value
                .as_int()
                .and_then(|v| v.checked_sub(*min))
                .and_then(|offset| usize::try_from(offset).ok())
                .and_then(|offset| targets.get(offset).copied())
                .unwrap_or(*default),
            SwitchTable::Hashed { targets, default } => value
                .key()
                .and_then(|key| targets.get(&key).copied())
                .unwrap_or(*default),
        }
    }
}

/// Optional annotations kept when compiling with debug info.
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub name: Option<EcoString>,
    /// The kind of tree node each instruction was emitted for.
    pub nodes: Vec<NodeKind>,
}

/// A compiled body: instructions plus the tables they index.
pub struct Code {
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Value>,
    pub methods: Vec<Arc<MethodInfo>>,
    pub sites: Vec<Arc<CallSite>>,
    pub lambdas: Vec<Arc<LambdaCode>>,
    pub regions: Vec<Region>,
    pub switches: Vec<SwitchTable>,
    pub num_locals: usize,
    pub max_stack_size: usize,
    pub debug: Option<DebugInfo>,
}

/// A compiled lambda. Instantiated as a [`Delegate`](crate::Delegate) by
/// binding its captures.
pub struct LambdaCode {
    pub name: Option<EcoString>,
    pub signature: Arc<Signature>,
    pub num_captures: u32,
    pub code: Code,
}

impl Code {
    /// A readable listing of the instructions and tables. Nested lambdas
    /// are listed after their parent.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.write_listing(&mut out, "")
            .expect("writing to a String cannot fail");
        out
    }

    fn write_listing(&self, out: &mut String, indent: &str) -> fmt::Result {
        let name = self
            .debug
            .as_ref()
            .and_then(|debug| debug.name.as_deref())
            .unwrap_or("<lambda>");
        writeln!(
            out,
            "{indent}{name}: locals={} stack={}",
            self.num_locals, self.max_stack_size
        )?;

        if !self.constants.is_empty() {
            writeln!(out, "{indent}constants:")?;
            for (i, constant) in self.constants.iter().enumerate() {
                writeln!(out, "{indent}  [{i}] {constant:?}")?;
            }
        }
        if !self.methods.is_empty() {
            writeln!(out, "{indent}methods:")?;
            for (i, method) in self.methods.iter().enumerate() {
                writeln!(out, "{indent}  [{i}] {method:?}")?;
            }
        }
        if !self.sites.is_empty() {
            writeln!(out, "{indent}sites:")?;
            for (i, site) in self.sites.iter().enumerate() {
                writeln!(out, "{indent}  [{i}] {} {}", site.binder().operation(), site.signature())?;
            }
        }
        for (i, region) in self.regions.iter().enumerate() {
            writeln!(out, "{indent}region [{i}] {region:?}")?;
        }
        for (i, table) in self.switches.iter().enumerate() {
            match table {
                SwitchTable::Dense { min, targets, default } => writeln!(
                    out,
                    "{indent}switch [{i}] dense min={min} targets={targets:?} default={default}"
                )?,
                SwitchTable::Hashed { targets, default } => writeln!(
                    out,
                    "{indent}switch [{i}] hashed cases={} default={default}",
                    targets.len()
                )?,
            }
        }

        writeln!(out, "{indent}instructions:")?;
        let nodes = self.debug.as_ref().map(|debug| &debug.nodes);
        for (i, instruction) in self.instructions.iter().enumerate() {
            let listing = format!("{instruction:?}");
            match nodes.and_then(|nodes| nodes.get(i)) {
                Some(node) => writeln!(out, "{indent}  {i:04}  {listing:<28} ; {node:?}")?,
                None => writeln!(out, "{indent}  {i:04}  {listing}")?,
            }
        }

        let nested = format!("{indent}    ");
        for (i, lambda) in self.lambdas.iter().enumerate() {
            writeln!(out, "{indent}lambda [{i}] {}:", lambda.signature)?;
            lambda.code.write_listing(out, &nested)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.disassemble())
    }
}

impl fmt::Debug for LambdaCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LambdaCode")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("num_captures", &self.num_captures)
            .finish_non_exhaustive()
    }
}
