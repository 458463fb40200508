/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! IR to machine-code translation.
//!
//! The encoder runs twice over the whole list. Pass 1 records every node's
//! begin/end virtual address; instruction sizes never depend on jump
//! distances (all jumps and calls are rel32, all rodata loads disp32), so
//! pass 2 can materialise correct displacements from pass 1 addresses, and
//! two passes are always enough. Rodata addresses are assigned between the
//! passes. The optional NASM-style listing is produced alongside pass 1,
//! when operands are still symbolic.

pub mod elf;
pub mod encoder;
pub mod rodata;

use crate::errors::CompilerError;
use crate::ir::{IrList, IrNode, IrNodeId, IrOp, IrOperand, IrRegister, XMM_SLOT_BYTES};
use self::elf::{
    PROGRAM_CODE_ADDR, RODATA_ADDR, STDLIB_HLT, STDLIB_IN_FLOAT, STDLIB_OUT_FLOAT,
    STDLIB_OUT_STRING,
};
use self::encoder::{encode, X64Op, X64Operand, X64Register};
use self::rodata::Rodata;

/// Everything pass 2 leaves behind: final code bytes, the populated rodata
/// tables, and the listing if one was requested.
#[derive(Debug)]
pub struct Translation {
    pub code: Vec<u8>,
    pub rodata: Rodata,
    pub listing: Option<String>,
}

/// Runs both encoding passes over the IR.
///
/// `stdlib_rodata_len` is the size of the standard library's rodata, which
/// user entries are laid out after.
pub fn translate(
    ir: &mut IrList,
    stdlib_rodata_len: u64,
    want_listing: bool,
) -> Result<Translation, CompilerError> {
    let ids: Vec<IrNodeId> = ir.iter().collect();

    let mut rodata = Rodata::new();
    let mut listing = want_listing.then(listing_header);
    let mut pass1_len = 0usize;
    let mut code = Vec::new();

    for pass in 0..2 {
        code = Vec::new();

        for &id in &ids {
            let begin = PROGRAM_CODE_ADDR + code.len() as u64;
            ir.node_mut(id).cmd_begin = begin;

            let node = ir.node(id).clone();
            let target_begin = node.jump_target.map(|t| ir.node(t).cmd_begin);

            let mut emitter = Emitter {
                code: &mut code,
                rodata: &mut rodata,
                // The listing is written once, alongside the first pass.
                listing: listing.as_mut().filter(|_| pass == 0),
            };
            emitter.emit_node(&node, target_begin)?;

            ir.node_mut(id).cmd_end = PROGRAM_CODE_ADDR + code.len() as u64;
        }

        if pass == 0 {
            pass1_len = code.len();
            rodata.assign_addresses(RODATA_ADDR + stdlib_rodata_len);
            if let Some(listing) = listing.as_mut() {
                listing.push_str(&rodata_section(&rodata));
            }
            log::debug!(
                "pass 1: {} code bytes, {} rodata immediates, {} strings",
                code.len(),
                rodata.immediates().len(),
                rodata.strings().len()
            );
        }
    }

    if code.len() != pass1_len {
        return Err(CompilerError::internal(format!(
            "code size changed between passes ({} -> {} bytes)",
            pass1_len,
            code.len()
        )));
    }

    Ok(Translation {
        code,
        rodata,
        listing,
    })
}

fn listing_header() -> String {
    "%include 'StdLib57.s'\n\nsection .text\nglobal _start\n\n".to_string()
}

fn rodata_section(rodata: &Rodata) -> String {
    let mut out = String::from("section .rodata\n\n");

    for entry in rodata.immediates() {
        let bits = (entry.imm as f64).to_bits();
        out.push_str(&format!(
            "{}:\n\tdd {}\n\tdd {}\n\n",
            entry.label,
            bits as u32 as i32,
            (bits >> 32) as u32 as i32
        ));
    }
    for entry in rodata.strings() {
        out.push_str(&format!("{}:\n\tdb '{}', 0\n\n", entry.label, entry.string));
    }

    out
}

struct Emitter<'a> {
    code: &'a mut Vec<u8>,
    rodata: &'a mut Rodata,
    listing: Option<&'a mut String>,
}

impl Emitter<'_> {
    fn cursor(&self) -> u64 {
        PROGRAM_CODE_ADDR + self.code.len() as u64
    }

    fn put(&mut self, op: X64Op, operands: &[X64Operand]) -> Result<(), CompilerError> {
        let bytes = encode(op, operands)?;
        self.code.extend_from_slice(&bytes);
        Ok(())
    }

    /// Encodes a rel32 control transfer to an absolute target address.
    fn put_rel(&mut self, op: X64Op, target: u64) -> Result<(), CompilerError> {
        // Probe for the instruction length first; rel32 is measured from the
        // instruction end.
        let len = encode(op, &[X64Operand::Imm(0)])?.len() as u64;
        let rel = target as i64 - (self.cursor() + len) as i64;
        self.put(op, &[X64Operand::Imm(rel)])
    }

    fn line(&mut self, text: &str) {
        if let Some(listing) = self.listing.as_mut() {
            listing.push_str(text);
            listing.push('\n');
        }
    }

    fn emit_node(
        &mut self,
        node: &IrNode,
        target_begin: Option<u64>,
    ) -> Result<(), CompilerError> {
        match node.op {
            IrOp::Nop => {
                if let Some(label) = &node.label {
                    // Label markers emit no bytes.
                    self.line(&format!("{}:", label));
                    return Ok(());
                }
                self.line("\tNOP");
                self.put(X64Op::Nop, &[])
            }

            IrOp::Push => self.unary_gp(node, X64Op::Push, "PUSH"),
            IrOp::Pop => self.unary_gp(node, X64Op::Pop, "POP"),

            IrOp::Mov => {
                let (dst, src) = two_regs(node)?;
                self.line(&format!("\tMOV {}, {}", dst.name(), src.name()));
                self.put(X64Op::Mov, &[reg(dst)?, reg(src)?])
            }

            IrOp::Add | IrOp::Sub => {
                let x64_op = if node.op == IrOp::Add { X64Op::Add } else { X64Op::Sub };
                let (dst, imm) = reg_imm(node)?;
                self.line(&format!(
                    "\t{} {}, {}",
                    if node.op == IrOp::Add { "ADD" } else { "SUB" },
                    dst.name(),
                    imm
                ));
                self.put(x64_op, &[reg(dst)?, X64Operand::Imm(imm)])
            }

            IrOp::FAdd => self.binary_sse(node, X64Op::Addsd, "ADDSD"),
            IrOp::FSub => self.binary_sse(node, X64Op::Subsd, "SUBSD"),
            IrOp::FMul => self.binary_sse(node, X64Op::Mulsd, "MULSD"),
            IrOp::FDiv => self.binary_sse(node, X64Op::Divsd, "DIVSD"),
            IrOp::FXor => self.binary_sse(node, X64Op::Pxor, "PXOR"),
            IrOp::FAnd => self.binary_sse(node, X64Op::Andpd, "ANDPD"),
            IrOp::FOr => self.binary_sse(node, X64Op::Orpd, "ORPD"),
            IrOp::FCmp => self.binary_sse(node, X64Op::Comisd, "COMISD"),

            IrOp::FSqrt => {
                let src = one_reg(node)?;
                self.line(&format!("\tSQRTPD {}, {}", src.name(), src.name()));
                self.put(X64Op::Sqrtpd, &[reg(src)?, reg(src)?])
            }

            IrOp::FPow | IrOp::FSin | IrOp::FCos | IrOp::FTan | IrOp::FCot => {
                Err(CompilerError::internal(format!(
                    "{:?} has no x86-64 encoding",
                    node.op
                )))
            }

            IrOp::FPush => {
                let src = one_reg(node)?;
                self.line(&format!("\tSUB RSP, {}", XMM_SLOT_BYTES));
                self.line(&format!("\tMOVSD [RSP], {}", src.name()));
                self.put(
                    X64Op::Sub,
                    &[reg(IrRegister::Rsp)?, X64Operand::Imm(XMM_SLOT_BYTES)],
                )?;
                self.put(X64Op::Movsd, &[rsp_slot(), reg(src)?])
            }

            IrOp::FPop => {
                let dst = one_reg(node)?;
                self.line(&format!("\tMOVSD {}, [RSP]", dst.name()));
                self.line(&format!("\tADD RSP, {}", XMM_SLOT_BYTES));
                self.put(X64Op::Movsd, &[reg(dst)?, rsp_slot()])?;
                self.put(
                    X64Op::Add,
                    &[reg(IrRegister::Rsp)?, X64Operand::Imm(XMM_SLOT_BYTES)],
                )
            }

            IrOp::FMov => self.emit_fmov(node),

            IrOp::Jmp => self.emit_jump(node, X64Op::Jmp, "JMP", target_begin),
            IrOp::Je => self.emit_jump(node, X64Op::Je, "JE", target_begin),
            IrOp::Jne => self.emit_jump(node, X64Op::Jne, "JNE", target_begin),
            // COMISD sets CF/ZF, so the ordered comparisons are unsigned.
            IrOp::Jl => self.emit_jump(node, X64Op::Jb, "JB", target_begin),
            IrOp::Jle => self.emit_jump(node, X64Op::Jbe, "JBE", target_begin),
            IrOp::Jg => self.emit_jump(node, X64Op::Ja, "JA", target_begin),
            IrOp::Jge => self.emit_jump(node, X64Op::Jae, "JAE", target_begin),
            IrOp::Call => self.emit_jump(node, X64Op::Call, "CALL", target_begin),

            IrOp::Ret => {
                let imm = match node.operand1 {
                    Some(IrOperand::Imm(imm)) => imm,
                    _ => return Err(shape_error(node)),
                };
                self.line(&format!("\tRET {}", imm));
                self.put(X64Op::Ret, &[X64Operand::Imm(imm)])
            }

            IrOp::FOut => {
                let src = one_reg(node)?;
                self.line(&format!("\tSUB RSP, {}", XMM_SLOT_BYTES));
                self.line(&format!("\tMOVSD [RSP], {}", src.name()));
                self.line("\tCALL StdFOut");
                self.put(
                    X64Op::Sub,
                    &[reg(IrRegister::Rsp)?, X64Operand::Imm(XMM_SLOT_BYTES)],
                )?;
                self.put(X64Op::Movsd, &[rsp_slot(), reg(src)?])?;
                self.put_rel(X64Op::Call, STDLIB_OUT_FLOAT)
            }

            IrOp::FIn => {
                self.line("\tCALL StdIn");
                self.put_rel(X64Op::Call, STDLIB_IN_FLOAT)
            }

            IrOp::StrOut => {
                let Some(IrOperand::Str(string)) = &node.operand1 else {
                    return Err(shape_error(node));
                };
                let entry = self.rodata.intern_string(string);
                let label = entry.label.clone();
                let addr = entry.addr;

                self.line(&format!("\tLEA RAX, [{}]", label));
                self.line("\tPUSH RAX");
                self.line("\tCALL StdStrOut");

                self.put(
                    X64Op::Lea,
                    &[
                        X64Operand::Reg(X64Register::Rax),
                        X64Operand::Mem {
                            base: None,
                            disp: disp32(addr)?,
                        },
                    ],
                )?;
                self.put(X64Op::Push, &[X64Operand::Reg(X64Register::Rax)])?;
                self.put_rel(X64Op::Call, STDLIB_OUT_STRING)
            }

            IrOp::Hlt => {
                self.line("\tCALL StdHlt");
                self.put_rel(X64Op::Call, STDLIB_HLT)
            }
        }
    }

    fn unary_gp(
        &mut self,
        node: &IrNode,
        x64_op: X64Op,
        mnemonic: &str,
    ) -> Result<(), CompilerError> {
        let target = one_reg(node)?;
        self.line(&format!("\t{} {}", mnemonic, target.name()));
        self.put(x64_op, &[reg(target)?])
    }

    fn binary_sse(
        &mut self,
        node: &IrNode,
        x64_op: X64Op,
        mnemonic: &str,
    ) -> Result<(), CompilerError> {
        let (dst, src) = two_regs(node)?;
        self.line(&format!("\t{} {}, {}", mnemonic, dst.name(), src.name()));
        self.put(x64_op, &[reg(dst)?, reg(src)?])
    }

    // F_MOV with an immediate source loads the interned double from rodata;
    // the register/memory forms are plain MOVSD.
    fn emit_fmov(&mut self, node: &IrNode) -> Result<(), CompilerError> {
        match (&node.operand1, &node.operand2) {
            (Some(IrOperand::Reg(dst)), Some(IrOperand::Imm(imm))) => {
                let entry = self.rodata.intern_immediate(*imm);
                let label = entry.label.clone();
                let addr = entry.addr;

                self.line(&format!("\tMOVSD {}, [{}]", dst.name(), label));
                self.put(
                    X64Op::Movsd,
                    &[
                        reg(*dst)?,
                        X64Operand::Mem {
                            base: None,
                            disp: disp32(addr)?,
                        },
                    ],
                )
            }
            (Some(IrOperand::Reg(dst)), Some(IrOperand::Mem { base, disp })) => {
                self.line(&format!("\tMOVSD {}, [{} + {}]", dst.name(), base.name(), disp));
                self.put(X64Op::Movsd, &[reg(*dst)?, mem(*base, *disp)?])
            }
            (Some(IrOperand::Mem { base, disp }), Some(IrOperand::Reg(src))) => {
                self.line(&format!("\tMOVSD [{} + {}], {}", base.name(), disp, src.name()));
                self.put(X64Op::Movsd, &[mem(*base, *disp)?, reg(*src)?])
            }
            _ => Err(shape_error(node)),
        }
    }

    fn emit_jump(
        &mut self,
        node: &IrNode,
        x64_op: X64Op,
        mnemonic: &str,
        target_begin: Option<u64>,
    ) -> Result<(), CompilerError> {
        let Some(IrOperand::Label(label)) = &node.operand1 else {
            return Err(shape_error(node));
        };
        // In pass 1 the target still holds its previous (or zero) address;
        // only the instruction size matters there.
        let target = target_begin.ok_or_else(|| {
            CompilerError::internal(format!("{:?} to '{}' was never patched", node.op, label))
        })?;

        self.line(&format!("\t{} {}", mnemonic, label));
        self.put_rel(x64_op, target)
    }
}

fn shape_error(node: &IrNode) -> CompilerError {
    CompilerError::internal(format!(
        "{:?} node carries operands {:?} / {:?}",
        node.op, node.operand1, node.operand2
    ))
}

fn one_reg(node: &IrNode) -> Result<IrRegister, CompilerError> {
    match node.operand1 {
        Some(IrOperand::Reg(reg)) => Ok(reg),
        _ => Err(shape_error(node)),
    }
}

fn two_regs(node: &IrNode) -> Result<(IrRegister, IrRegister), CompilerError> {
    match (&node.operand1, &node.operand2) {
        (Some(IrOperand::Reg(a)), Some(IrOperand::Reg(b))) => Ok((*a, *b)),
        _ => Err(shape_error(node)),
    }
}

fn reg_imm(node: &IrNode) -> Result<(IrRegister, i64), CompilerError> {
    match (&node.operand1, &node.operand2) {
        (Some(IrOperand::Reg(reg)), Some(IrOperand::Imm(imm))) => Ok((*reg, *imm)),
        _ => Err(shape_error(node)),
    }
}

fn reg(ir_reg: IrRegister) -> Result<X64Operand, CompilerError> {
    Ok(X64Operand::Reg(reg64(ir_reg)?))
}

fn mem(base: IrRegister, disp: i64) -> Result<X64Operand, CompilerError> {
    let base = match base {
        IrRegister::NoReg => None,
        other => Some(reg64(other)?),
    };
    Ok(X64Operand::Mem {
        base,
        disp: i32::try_from(disp).map_err(|_| {
            CompilerError::internal(format!("displacement {} does not fit in 32 bits", disp))
        })?,
    })
}

fn rsp_slot() -> X64Operand {
    X64Operand::Mem {
        base: Some(X64Register::Rsp),
        disp: 0,
    }
}

fn disp32(addr: u64) -> Result<i32, CompilerError> {
    i32::try_from(addr).map_err(|_| {
        CompilerError::internal(format!("address {:#x} does not fit in disp32", addr))
    })
}

fn reg64(ir_reg: IrRegister) -> Result<X64Register, CompilerError> {
    let mapped = match ir_reg {
        IrRegister::NoReg => {
            return Err(CompilerError::internal("NO_REG used as a register operand"));
        }
        IrRegister::Rax => X64Register::Rax,
        IrRegister::Rbx => X64Register::Rbx,
        IrRegister::Rcx => X64Register::Rcx,
        IrRegister::Rdx => X64Register::Rdx,
        IrRegister::Rsi => X64Register::Rsi,
        IrRegister::Rdi => X64Register::Rdi,
        IrRegister::Rbp => X64Register::Rbp,
        IrRegister::Rsp => X64Register::Rsp,
        IrRegister::R8 => X64Register::R8,
        IrRegister::R9 => X64Register::R9,
        IrRegister::R10 => X64Register::R10,
        IrRegister::R11 => X64Register::R11,
        IrRegister::R12 => X64Register::R12,
        IrRegister::R13 => X64Register::R13,
        IrRegister::R14 => X64Register::R14,
        IrRegister::R15 => X64Register::R15,
        IrRegister::Xmm0 => X64Register::Xmm0,
        IrRegister::Xmm1 => X64Register::Xmm1,
        IrRegister::Xmm2 => X64Register::Xmm2,
        IrRegister::Xmm3 => X64Register::Xmm3,
        IrRegister::Xmm4 => X64Register::Xmm4,
        IrRegister::Xmm5 => X64Register::Xmm5,
        IrRegister::Xmm6 => X64Register::Xmm6,
        IrRegister::Xmm7 => X64Register::Xmm7,
        IrRegister::Xmm8 => X64Register::Xmm8,
        IrRegister::Xmm9 => X64Register::Xmm9,
        IrRegister::Xmm10 => X64Register::Xmm10,
        IrRegister::Xmm11 => X64Register::Xmm11,
        IrRegister::Xmm12 => X64Register::Xmm12,
        IrRegister::Xmm13 => X64Register::Xmm13,
        IrRegister::Xmm14 => X64Register::Xmm14,
        IrRegister::Xmm15 => X64Register::Xmm15,
    };
    Ok(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::build::lower;
    use crate::parser::parse_source;

    fn translate_source(source: &str, want_listing: bool) -> Translation {
        let mut ast = parse_source(source).unwrap();
        let lowered = lower(&mut ast).unwrap();
        let mut ir = lowered.ir;
        translate(&mut ir, 0, want_listing).unwrap()
    }

    #[test]
    fn test_straight_line_main_bytes() {
        let translation = translate_source("575757 main 57 0 57 {", false);
        let code = &translation.code;

        // CALL main: main's first instruction sits 10 bytes in, right after
        // this call (5 bytes) and CALL StdHlt (5 bytes).
        assert_eq!(code[0], 0xE8);
        assert_eq!(i32::from_le_bytes(code[1..5].try_into().unwrap()), 5);

        // HLT lowers to CALL StdHlt.
        assert_eq!(code[5], 0xE8);
        let rel = i32::from_le_bytes(code[6..10].try_into().unwrap());
        assert_eq!(
            (PROGRAM_CODE_ADDR + 10) as i64 + rel as i64,
            STDLIB_HLT as i64
        );

        // main: PUSH RBP; MOV RBP, RSP; ADD RSP, 0.
        assert_eq!(code[10], 0x55);
        assert_eq!(&code[11..14], &[0x48, 0x8B, 0xEC]);
        assert_eq!(&code[14..21], &[0x48, 0x81, 0xC4, 0, 0, 0, 0]);

        // return 0: load the interned 0.0, push it, pop it back, epilogue.
        assert_eq!(
            &code[21..30],
            &[0xF2, 0x0F, 0x10, 0x04, 0x25, 0x00, 0x20, 0x40, 0x00]
        );
        let tail = code.len();
        assert_eq!(&code[tail - 3..], &[0xC2, 0x00, 0x00]);
    }

    #[test]
    fn test_passes_agree_on_size_and_displacements() {
        let source = "575757 main 57 \
                      575757 i == 3 57 \
                      57! i 57 57 . i 57 i == i + 1 57 { \
                      0 57 {";
        let mut ast = parse_source(source).unwrap();
        let lowered = lower(&mut ast).unwrap();
        let mut ir = lowered.ir;
        let translation = translate(&mut ir, 0, false).unwrap();

        // Every patched jump's rel32 must resolve exactly to its target's
        // begin address.
        for id in ir.iter() {
            let node = ir.node(id);
            if !node.need_patch {
                continue;
            }
            let target = ir.node(node.jump_target.unwrap()).cmd_begin;

            let offset = (node.cmd_end - PROGRAM_CODE_ADDR) as usize - 4;
            let rel = i32::from_le_bytes(
                translation.code[offset..offset + 4].try_into().unwrap(),
            );
            assert_eq!(node.cmd_end as i64 + rel as i64, target as i64);
        }
    }

    #[test]
    fn test_same_string_printed_twice_shares_rodata() {
        let translation =
            translate_source("575757 main 57 . \"Hi\" 57 . \"Hi\" 57 0 57 {", false);

        assert_eq!(translation.rodata.strings().len(), 1);
        let addr = translation.rodata.strings()[0].addr;

        // Both LEA RAX, [addr] sites point at the same displacement.
        let lea = [0x48, 0x8D, 0x04, 0x25];
        let mut sites = Vec::new();
        for window in translation.code.windows(8) {
            if window[0..4] == lea {
                sites.push(i32::from_le_bytes(window[4..8].try_into().unwrap()));
            }
        }
        assert_eq!(sites.len(), 2);
        assert_eq!(sites[0], sites[1]);
        assert_eq!(sites[0] as u64, addr);
    }

    #[test]
    fn test_listing_shows_labels_and_rodata() {
        let translation =
            translate_source("575757 main 57 . \"Hi\" 57 0 57 {", true);
        let listing = translation.listing.unwrap();

        assert!(listing.starts_with("%include 'StdLib57.s'\n"));
        assert!(listing.contains("_start:\n"));
        assert!(listing.contains("main:\n"));
        assert!(listing.contains("\tCALL main\n"));
        assert!(listing.contains("\tCALL StdHlt\n"));
        assert!(listing.contains("\tLEA RAX, [STR_0]\n"));
        assert!(listing.contains("section .rodata\n"));
        assert!(listing.contains("STR_0:\n\tdb 'Hi', 0\n"));
        assert!(listing.contains("XMM_VALUE_0:\n"));
    }

    #[test]
    fn test_transcendentals_are_rejected() {
        let mut ast = parse_source("575757 main 57 sin ( 1 ) 57 {").unwrap();
        let lowered = lower(&mut ast).unwrap();
        let mut ir = lowered.ir;
        let err = translate(&mut ir, 0, false).unwrap_err();
        assert!(matches!(err, CompilerError::InternalError { .. }), "{err:?}");
    }
}
