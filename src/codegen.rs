use std::fmt;

use crate::builtins::{self, BuiltinTable, default_table};
use crate::emitter::{DisplacementOverflow, Emitter};
use crate::object::{List, Object};
use crate::region::{Region, RegionError};

/// Upper bound on the emitted stream: everything must stay within rel32
/// patch reach of a single contiguous mapping.
pub const MAX_CODE_BYTES: usize = i32::MAX as usize;

#[derive(Debug)]
pub enum CompileError {
    UnknownOperator(String),
    ArityMismatch {
        op: String,
        expected: usize,
        got: usize,
    },
    TooManyImmediates,
    CodeTooLarge,
    Region(RegionError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::UnknownOperator(name) => write!(f, "unknown operator '{name}'"),
            CompileError::ArityMismatch { op, expected, got } => write!(
                f,
                "operator '{op}' takes {expected} arguments, got {got}"
            ),
            CompileError::TooManyImmediates => {
                write!(f, "immediates table exceeds u32 index range")
            }
            CompileError::CodeTooLarge => {
                write!(f, "emitted code exceeds the {MAX_CODE_BYTES} byte bound")
            }
            CompileError::Region(err) => write!(f, "region creation failed: {err}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<RegionError> for CompileError {
    fn from(err: RegionError) -> Self {
        CompileError::Region(err)
    }
}

impl From<DisplacementOverflow> for CompileError {
    fn from(_: DisplacementOverflow) -> Self {
        CompileError::CodeTooLarge
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Compile `root` against the default builtin table.
pub fn compile(root: &List) -> CompileResult<Region> {
    compile_with_table(root, default_table())
}

/// Compile `root`, resolving operators against `table`. Compile failures
/// leave no region behind.
pub fn compile_with_table(root: &List, table: &BuiltinTable) -> CompileResult<Region> {
    let (code, immediates) = emit_program(root, table)?;
    tracing::debug!(
        "compiled {} code bytes with {} immediates",
        code.len(),
        immediates.len()
    );
    Ok(Region::create(&code, immediates)?)
}

struct Frame<'t> {
    list: &'t List,
    cursor: usize,
}

// Post-order over the tree on an explicit frame stack: every operand is fully
// reduced (left to right) before its operator's call is emitted.
pub(crate) fn emit_program(
    root: &List,
    table: &BuiltinTable,
) -> CompileResult<(Vec<u8>, Vec<Object>)> {
    let mut em = Emitter::new();
    let mut immediates: Vec<Object> = Vec::new();
    let mut exit_patches: Vec<usize> = Vec::new();
    let mut frames = vec![Frame {
        list: root,
        cursor: 0,
    }];

    // Entry state: RDI holds the evaluation stack, RSI the region. The push
    // also brings RSP to a 16-byte boundary for the call sites below.
    em.push_rsi();

    while !frames.is_empty() {
        let top = frames.len() - 1;
        let list = frames[top].list;
        let cursor = frames[top].cursor;

        if cursor == list.items.len() {
            let builtin = table
                .lookup(&list.op)
                .ok_or_else(|| CompileError::UnknownOperator(list.op.clone()))?;
            if list.items.len() != builtin.arity {
                return Err(CompileError::ArityMismatch {
                    op: list.op.clone(),
                    expected: builtin.arity,
                    got: list.items.len(),
                });
            }
            emit_call(&mut em, builtin.entry as usize as u64, None, &mut exit_patches);
            frames.pop();
            if let Some(parent) = frames.last_mut() {
                parent.cursor += 1;
            }
            continue;
        }

        match &list.items[cursor] {
            Object::List(inner) if !inner.op.is_empty() => {
                frames.push(Frame {
                    list: inner,
                    cursor: 0,
                });
            }
            literal => {
                if immediates.len() == u32::MAX as usize {
                    return Err(CompileError::TooManyImmediates);
                }
                let index = immediates.len() as u32;
                immediates.push(literal.clone());
                emit_call(
                    &mut em,
                    builtins::push_immediate_addr(),
                    Some(index),
                    &mut exit_patches,
                );
                frames[top].cursor += 1;
            }
        }
    }

    if em.offset() > MAX_CODE_BYTES {
        return Err(CompileError::CodeTooLarge);
    }

    // A failing builtin jumps straight here with its status still in EAX;
    // the success path falls through with EAX zero from the last call.
    let exit = em.offset();
    for disp in exit_patches {
        em.patch_rel32(disp, exit)?;
    }
    em.pop_rsi();
    em.ret();

    Ok((em.finish(), immediates))
}

// One indirect call: save the entry registers, load the extra argument and
// the target, keep RSP 16-byte aligned across the call, restore, and bail to
// the exit on a nonzero status. The pad accounts for the two register pushes
// that precede every call.
fn emit_call(
    em: &mut Emitter,
    target: u64,
    immediate_index: Option<u32>,
    exit_patches: &mut Vec<usize>,
) {
    em.push_rdi();
    em.push_rsi();
    if let Some(index) = immediate_index {
        em.mov_edx_imm32(index);
    }
    em.mov_rax_imm64(target);
    let pad = !em.depth_parity();
    if pad {
        em.sub_rsp_8();
    }
    em.call_rax();
    if pad {
        em.add_rsp_8();
    }
    em.pop_rsi();
    em.pop_rdi();
    em.test_eax_eax();
    exit_patches.push(em.jne_rel32());
}
