//! x86-64 emitter.
//!
//! Position-independent code over a small register set. The argument-record
//! base pointer arrives in RDI and the record count in RSI (unused once
//! compilation has bounded the highest slot read). RAX and RDX stay
//! reserved as scratch for division, flag materialization, and the
//! two-register result; expression values live in RCX and R8-R11. Running
//! out of registers bails the compilation.
//!
//! Integer operands are assumed throughout: loading an argument emits a tag
//! check that jumps to the shared bail exit when the record is not an exact
//! integer, which makes the compiled code agree with the interpreter on
//! every input (floats, nil propagation, strings) by simply refusing them.

use crate::{
    decl::{self, JitOp},
    value::{Tag, Value},
};

use super::{BAIL, RawVal};

const RAX: u8 = 0;
const RCX: u8 = 1;
const RDX: u8 = 2;
const RDI: u8 = 7;
const R8: u8 = 8;
const R9: u8 = 9;
const R10: u8 = 10;
const R11: u8 = 11;

/// Registers the allocator may hand out.
const ALLOCATABLE: [u8; 5] = [RCX, R8, R9, R10, R11];

/// Compile-time bail marker: the expression shape is not supported.
struct Bail;

type Emit<T> = Result<T, Bail>;

/// Where a compile-time value currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Loc {
    /// Known constant, not yet materialized.
    Imm,
    /// Payload bits in `reg`.
    Reg,
    /// Full record: tag in `reg`, payload in `reg2`.
    Pair,
}

/// Placement record for one compiled value.
#[derive(Debug, Clone, Copy)]
struct ValueDesc {
    loc: Loc,
    ty: Option<Tag>,
    reg: u8,
    reg2: u8,
    imm: RawVal,
}

impl ValueDesc {
    fn imm(tag: Tag, bits: u64) -> Self {
        Self {
            loc: Loc::Imm,
            ty: Some(tag),
            reg: 0,
            reg2: 0,
            imm: RawVal { tag: tag as u64, bits },
        }
    }

    fn reg(reg: u8, ty: Tag) -> Self {
        Self {
            loc: Loc::Reg,
            ty: Some(ty),
            reg,
            reg2: 0,
            imm: RawVal { tag: 0, bits: 0 },
        }
    }
}

/// Finished compilation output.
pub struct Compiled {
    pub code: Vec<u8>,
    pub pool: Vec<Value>,
    pub max_arg: usize,
}

/// Emitter state: code writer, free-register bitmap, label and fixup tables.
struct JitContext {
    code: Vec<u8>,
    free_regs: u16,
    labels: Vec<Option<usize>>,
    fixups: Vec<(usize, usize)>,
    pool: Vec<Value>,
    max_arg: usize,
    bail_label: usize,
}

impl JitContext {
    fn new() -> Self {
        let mut free_regs = 0u16;
        for reg in ALLOCATABLE {
            free_regs |= 1 << reg;
        }
        let mut ctx = Self {
            code: Vec::with_capacity(128),
            free_regs,
            labels: Vec::new(),
            fixups: Vec::new(),
            pool: Vec::new(),
            max_arg: 0,
            bail_label: 0,
        };
        ctx.bail_label = ctx.new_label();
        ctx
    }

    // --- register bitmap ---

    fn alloc_reg(&mut self) -> Emit<u8> {
        for reg in ALLOCATABLE {
            if self.free_regs & (1 << reg) != 0 {
                self.free_regs &= !(1 << reg);
                return Ok(reg);
            }
        }
        Err(Bail)
    }

    fn free_reg(&mut self, reg: u8) {
        self.free_regs |= 1 << reg;
    }

    // --- labels and fixups ---

    /// Reserves a label; `mark` pins it to the current position later.
    fn new_label(&mut self) -> usize {
        self.labels.push(None);
        self.labels.len() - 1
    }

    fn mark(&mut self, label: usize) {
        self.labels[label] = Some(self.code.len());
    }

    /// Patches every recorded rel32 slot once all labels are pinned.
    fn finalize(&mut self) {
        for &(pos, label) in &self.fixups {
            let target = self.labels[label].expect("label marked before finalize");
            let rel = (target as i64 - (pos as i64 + 4)) as i32;
            self.code[pos..pos + 4].copy_from_slice(&rel.to_le_bytes());
        }
    }

    // --- byte emission ---

    fn byte(&mut self, b: u8) {
        self.code.push(b);
    }

    fn rex(&mut self, r: u8, b: u8) {
        self.byte(0x48 | (u8::from(r >= 8) << 2) | u8::from(b >= 8));
    }

    fn modrm(&mut self, mode: u8, reg: u8, rm: u8) {
        self.byte((mode << 6) | ((reg & 7) << 3) | (rm & 7));
    }

    fn imm32(&mut self, v: i32) {
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn mov_ri(&mut self, reg: u8, v: u64) {
        self.rex(0, reg);
        self.byte(0xB8 + (reg & 7));
        self.code.extend_from_slice(&v.to_le_bytes());
    }

    fn mov_rr(&mut self, dst: u8, src: u8) {
        self.rex(src, dst);
        self.byte(0x89);
        self.modrm(3, src, dst);
    }

    /// `mov dst, [rdi + disp]`
    fn mov_r_mem(&mut self, dst: u8, disp: i32) {
        self.rex(dst, RDI);
        self.byte(0x8B);
        self.modrm(2, dst, RDI);
        self.imm32(disp);
    }

    fn add_rr(&mut self, dst: u8, src: u8) {
        self.rex(src, dst);
        self.byte(0x01);
        self.modrm(3, src, dst);
    }

    fn sub_rr(&mut self, dst: u8, src: u8) {
        self.rex(src, dst);
        self.byte(0x29);
        self.modrm(3, src, dst);
    }

    fn imul_rr(&mut self, dst: u8, src: u8) {
        self.rex(dst, src);
        self.byte(0x0F);
        self.byte(0xAF);
        self.modrm(3, dst, src);
    }

    /// `cmp a, b`
    fn cmp_rr(&mut self, a: u8, b: u8) {
        self.rex(b, a);
        self.byte(0x39);
        self.modrm(3, b, a);
    }

    fn test_rr(&mut self, a: u8, b: u8) {
        self.rex(b, a);
        self.byte(0x85);
        self.modrm(3, b, a);
    }

    /// Group-1 ALU op with a 32-bit immediate; `ext` selects the operation
    /// (0 add, 1 or, 5 sub, 7 cmp).
    fn alu_ri(&mut self, ext: u8, reg: u8, v: i32) {
        self.rex(0, reg);
        self.byte(0x81);
        self.modrm(3, ext, reg);
        self.imm32(v);
    }

    fn neg(&mut self, reg: u8) {
        self.rex(0, reg);
        self.byte(0xF7);
        self.modrm(3, 3, reg);
    }

    fn cqo(&mut self) {
        self.byte(0x48);
        self.byte(0x99);
    }

    fn idiv(&mut self, reg: u8) {
        self.rex(0, reg);
        self.byte(0xF7);
        self.modrm(3, 7, reg);
    }

    /// `setcc al`
    fn setcc(&mut self, cc: u8) {
        self.byte(0x0F);
        self.byte(0x90 + cc);
        self.modrm(3, 0, RAX);
    }

    /// `movzx dst, al`
    fn movzx_al(&mut self, dst: u8) {
        self.rex(dst, RAX);
        self.byte(0x0F);
        self.byte(0xB6);
        self.modrm(3, dst, RAX);
    }

    fn jcc(&mut self, cc: u8, label: usize) {
        self.byte(0x0F);
        self.byte(0x80 + cc);
        self.fixups.push((self.code.len(), label));
        self.imm32(0);
    }

    fn ret(&mut self) {
        self.byte(0xC3);
    }

    // --- compound helpers ---

    /// Loads argument record `i`'s payload into a fresh register, bailing at
    /// run time unless the record's tag is `Int`.
    fn load_int_arg(&mut self, slot: u32) -> Emit<u8> {
        let disp = slot as i32 * 16;
        self.max_arg = self.max_arg.max(slot as usize);
        self.mov_r_mem(RAX, disp);
        self.alu_ri(7, RAX, Tag::Int as i32);
        self.jcc(CC_NE, self.bail_label);
        let reg = self.alloc_reg()?;
        self.mov_r_mem(reg, disp + 8);
        Ok(reg)
    }

    /// Loads argument record `i`'s tag into RAX.
    fn load_arg_tag(&mut self, slot: u32) {
        self.max_arg = self.max_arg.max(slot as usize);
        self.mov_r_mem(RAX, slot as i32 * 16);
    }

    /// Materializes an immediate or register descriptor's payload into a
    /// register the caller owns.
    fn materialize(&mut self, desc: ValueDesc) -> Emit<u8> {
        match desc.loc {
            Loc::Reg => Ok(desc.reg),
            Loc::Imm => {
                let reg = self.alloc_reg()?;
                self.mov_ri(reg, desc.imm.bits);
                Ok(reg)
            }
            Loc::Pair => Err(Bail),
        }
    }
}

// condition codes (Jcc 0x80+cc / SETcc 0x90+cc)
const CC_E: u8 = 0x4;
const CC_NE: u8 = 0x5;
const CC_L: u8 = 0xC;
const CC_GE: u8 = 0xD;
const CC_LE: u8 = 0xE;
const CC_G: u8 = 0xF;

/// Compiles a procedure body. `None` when any sub-expression is
/// unsupported; the caller keeps the interpreted form.
#[must_use]
pub fn compile(body: &Value) -> Option<Compiled> {
    let mut ctx = JitContext::new();
    emit_body(&mut ctx, body).ok()?;
    // shared bail exit: hand control back to the interpreter
    ctx.mark(ctx.bail_label);
    ctx.mov_ri(RAX, BAIL);
    ctx.ret();
    ctx.finalize();
    Some(Compiled {
        code: ctx.code,
        pool: ctx.pool,
        max_arg: ctx.max_arg,
    })
}

fn emit_body(ctx: &mut JitContext, body: &Value) -> Emit<()> {
    let body = body.peel_source();
    match body {
        // return-literal shapes
        Value::Nil => emit_return_imm(ctx, Tag::Nil as u64, 0),
        Value::Bool(b) => emit_return_imm(ctx, Tag::Bool as u64, u64::from(*b)),
        Value::Int(i) => emit_return_imm(ctx, Tag::Int as u64, *i as u64),
        Value::Float(f) => emit_return_imm(ctx, Tag::Float as u64, f.to_bits()),
        Value::String(_) => {
            let idx = ctx.pool.len() as u64;
            ctx.pool.push(body.clone());
            emit_return_imm(ctx, Tag::String as u64, idx)
        }
        // load slice[i] into the two result registers
        Value::NthLocalVar(slot) => {
            let disp = *slot as i32 * 16;
            ctx.max_arg = ctx.max_arg.max(*slot as usize);
            ctx.mov_r_mem(RAX, disp);
            ctx.mov_r_mem(RDX, disp + 8);
            let desc = ValueDesc {
                loc: Loc::Pair,
                ty: None,
                reg: RAX,
                reg2: RDX,
                imm: RawVal { tag: 0, bits: 0 },
            };
            emit_return_desc(ctx, desc)
        }
        Value::List(_) => {
            let desc = emit_expr(ctx, body)?;
            emit_return_desc(ctx, desc)
        }
        _ => Err(Bail),
    }
}

fn emit_return_imm(ctx: &mut JitContext, tag: u64, bits: u64) -> Emit<()> {
    ctx.mov_ri(RAX, tag);
    ctx.mov_ri(RDX, bits);
    ctx.ret();
    Ok(())
}

fn emit_return_desc(ctx: &mut JitContext, desc: ValueDesc) -> Emit<()> {
    match desc.loc {
        Loc::Imm => emit_return_imm(ctx, desc.imm.tag, desc.imm.bits),
        Loc::Reg => {
            let tag = desc.ty.ok_or(Bail)? as u64;
            ctx.mov_rr(RDX, desc.reg);
            ctx.mov_ri(RAX, tag);
            ctx.ret();
            Ok(())
        }
        Loc::Pair => {
            // payload first so the tag move cannot clobber it
            if desc.reg2 != RDX {
                ctx.mov_rr(RDX, desc.reg2);
            }
            if desc.reg != RAX {
                ctx.mov_rr(RAX, desc.reg);
            }
            ctx.ret();
            Ok(())
        }
    }
}

/// Compiles an expression into a payload descriptor. Only integer-typed
/// subtrees survive; everything else bails.
fn emit_expr(ctx: &mut JitContext, expr: &Value) -> Emit<ValueDesc> {
    match expr.peel_source() {
        Value::Int(i) => Ok(ValueDesc::imm(Tag::Int, *i as u64)),
        Value::Bool(b) => Ok(ValueDesc::imm(Tag::Bool, u64::from(*b))),
        Value::Nil => Ok(ValueDesc::imm(Tag::Nil, 0)),
        Value::NthLocalVar(slot) => {
            let reg = ctx.load_int_arg(*slot)?;
            Ok(ValueDesc::reg(reg, Tag::Int))
        }
        Value::List(items) if !items.is_empty() => {
            let head = items[0].peel_source().as_str_symbol().ok_or(Bail)?;
            let op = decl::lookup(head).and_then(|d| d.jit).ok_or(Bail)?;
            let args = &items[1..];
            match op {
                JitOp::Add | JitOp::Sub | JitOp::Mul | JitOp::Div => emit_arith(ctx, op, args),
                JitOp::Lt | JitOp::Le | JitOp::Gt | JitOp::Ge => emit_compare(ctx, op, args),
                JitOp::IsNil | JitOp::IsInt | JitOp::IsNumber => emit_tag_test(ctx, op, args),
            }
        }
        _ => Err(Bail),
    }
}

/// An operand ready for an integer ALU op: either a known constant or a
/// register holding checked integer payload bits.
fn int_operand(ctx: &mut JitContext, expr: &Value) -> Emit<ValueDesc> {
    let desc = emit_expr(ctx, expr)?;
    match desc.ty {
        Some(Tag::Int) => Ok(desc),
        _ => Err(Bail),
    }
}

fn emit_arith(ctx: &mut JitContext, op: JitOp, args: &[Value]) -> Emit<ValueDesc> {
    if args.is_empty() {
        return Err(Bail);
    }
    // unary minus negates
    if args.len() == 1 && op == JitOp::Sub {
        let desc = int_operand(ctx, &args[0])?;
        if desc.loc == Loc::Imm {
            return Ok(ValueDesc::imm(Tag::Int, (desc.imm.bits as i64).wrapping_neg() as u64));
        }
        ctx.neg(desc.reg);
        return Ok(desc);
    }

    let mut acc = int_operand(ctx, &args[0])?;
    for arg in &args[1..] {
        let rhs = int_operand(ctx, arg)?;
        // fold while both sides are still constants
        if acc.loc == Loc::Imm && rhs.loc == Loc::Imm {
            let a = acc.imm.bits as i64;
            let b = rhs.imm.bits as i64;
            let folded = match op {
                JitOp::Add => Some(a.wrapping_add(b)),
                JitOp::Sub => Some(a.wrapping_sub(b)),
                JitOp::Mul => Some(a.wrapping_mul(b)),
                JitOp::Div if b != 0 && a % b == 0 && !(a == i64::MIN && b == -1) => Some(a / b),
                _ => None,
            };
            match folded {
                Some(v) => {
                    acc = ValueDesc::imm(Tag::Int, v as u64);
                    continue;
                }
                None => return Err(Bail),
            }
        }
        let acc_reg = ctx.materialize(acc)?;
        match op {
            JitOp::Add | JitOp::Sub | JitOp::Mul => {
                let rhs_reg = ctx.materialize(rhs)?;
                match op {
                    JitOp::Add => ctx.add_rr(acc_reg, rhs_reg),
                    JitOp::Sub => ctx.sub_rr(acc_reg, rhs_reg),
                    _ => ctx.imul_rr(acc_reg, rhs_reg),
                }
                ctx.free_reg(rhs_reg);
            }
            JitOp::Div => {
                let rhs_reg = ctx.materialize(rhs)?;
                // divisor of 0 or -1 and inexact quotients fall back to the
                // interpreter's float semantics
                ctx.test_rr(rhs_reg, rhs_reg);
                ctx.jcc(CC_E, ctx.bail_label);
                ctx.alu_ri(7, rhs_reg, -1);
                ctx.jcc(CC_E, ctx.bail_label);
                ctx.mov_rr(RAX, acc_reg);
                ctx.cqo();
                ctx.idiv(rhs_reg);
                ctx.test_rr(RDX, RDX);
                ctx.jcc(CC_NE, ctx.bail_label);
                ctx.mov_rr(acc_reg, RAX);
                ctx.free_reg(rhs_reg);
            }
            _ => return Err(Bail),
        }
        acc = ValueDesc::reg(acc_reg, Tag::Int);
    }
    Ok(acc)
}

fn emit_compare(ctx: &mut JitContext, op: JitOp, args: &[Value]) -> Emit<ValueDesc> {
    if args.len() != 2 {
        return Err(Bail);
    }
    let lhs = int_operand(ctx, &args[0])?;
    let rhs = int_operand(ctx, &args[1])?;
    if lhs.loc == Loc::Imm && rhs.loc == Loc::Imm {
        let a = lhs.imm.bits as i64;
        let b = rhs.imm.bits as i64;
        let result = match op {
            JitOp::Lt => a < b,
            JitOp::Le => a <= b,
            JitOp::Gt => a > b,
            JitOp::Ge => a >= b,
            _ => return Err(Bail),
        };
        return Ok(ValueDesc::imm(Tag::Bool, u64::from(result)));
    }
    let lhs_reg = ctx.materialize(lhs)?;
    let rhs_reg = ctx.materialize(rhs)?;
    ctx.cmp_rr(lhs_reg, rhs_reg);
    let cc = match op {
        JitOp::Lt => CC_L,
        JitOp::Le => CC_LE,
        JitOp::Gt => CC_G,
        JitOp::Ge => CC_GE,
        _ => return Err(Bail),
    };
    ctx.setcc(cc);
    ctx.movzx_al(lhs_reg);
    ctx.free_reg(rhs_reg);
    Ok(ValueDesc::reg(lhs_reg, Tag::Bool))
}

/// `nil?` / `int?` / `number?`: compiled as a tag comparison without
/// materializing a boxed intermediate. When the operand's type is known
/// statically the whole test folds to a constant.
fn emit_tag_test(ctx: &mut JitContext, op: JitOp, args: &[Value]) -> Emit<ValueDesc> {
    if args.len() != 1 {
        return Err(Bail);
    }
    let test = |tag: Tag| match op {
        JitOp::IsNil => tag == Tag::Nil,
        JitOp::IsInt => tag == Tag::Int,
        JitOp::IsNumber => matches!(tag, Tag::Int | Tag::Float),
        _ => false,
    };
    match args[0].peel_source() {
        Value::NthLocalVar(slot) => {
            ctx.load_arg_tag(*slot);
            let reg = ctx.alloc_reg()?;
            match op {
                JitOp::IsNil => {
                    ctx.alu_ri(7, RAX, Tag::Nil as i32);
                    ctx.setcc(CC_E);
                }
                JitOp::IsInt => {
                    ctx.alu_ri(7, RAX, Tag::Int as i32);
                    ctx.setcc(CC_E);
                }
                JitOp::IsNumber => {
                    // tags Int=2 and Float=3 collapse under `| 1`
                    ctx.alu_ri(1, RAX, 1);
                    ctx.alu_ri(7, RAX, Tag::Float as i32);
                    ctx.setcc(CC_E);
                }
                _ => return Err(Bail),
            }
            ctx.movzx_al(reg);
            Ok(ValueDesc::reg(reg, Tag::Bool))
        }
        _ => {
            // compile the operand; its static type decides the answer, and
            // any runtime bail in the operand still fires first
            let desc = emit_expr(ctx, &args[0])?;
            let tag = desc.ty.ok_or(Bail)?;
            if desc.loc == Loc::Reg {
                ctx.free_reg(desc.reg);
            }
            Ok(ValueDesc::imm(Tag::Bool, u64::from(test(tag))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_body_compiles() {
        assert!(compile(&Value::Int(7)).is_some());
        assert!(compile(&Value::Nil).is_some());
        assert!(compile(&Value::string("x")).is_some());
    }

    #[test]
    fn arg_reference_tracks_max_slot() {
        let compiled = compile(&Value::NthLocalVar(3)).unwrap();
        assert_eq!(compiled.max_arg, 3);
    }

    #[test]
    fn unsupported_shapes_bail() {
        // symbols are unresolved names; only optimized bodies compile
        assert!(compile(&Value::symbol("x")).is_none());
        let call = Value::list(vec![Value::symbol("concat"), Value::NthLocalVar(0)]);
        assert!(compile(&call).is_none());
    }

    #[test]
    fn arithmetic_over_args_compiles() {
        let body = Value::list(vec![
            Value::symbol("+"),
            Value::NthLocalVar(0),
            Value::list(vec![Value::symbol("*"), Value::NthLocalVar(1), Value::Int(2)]),
        ]);
        assert!(compile(&body).is_some());
    }

    #[test]
    fn constant_subtrees_fold() {
        let body = Value::list(vec![Value::symbol("+"), Value::Int(1), Value::Int(2)]);
        let compiled = compile(&body).unwrap();
        // folds to `return 3`: two immediate moves and a ret, plus the bail
        // exit; no ALU opcodes needed
        assert!(!compiled.code.is_empty());
        assert!(compiled.code.len() < 40);
    }
}
