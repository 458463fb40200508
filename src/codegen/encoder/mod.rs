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

//! Single-instruction x86-64 encoder.
//!
//! Each operation is described by a small descriptor (prefixes, opcode,
//! ModR/M extension, where each operand's bits land) and assembled into
//! `prefix REX 0F opcode ModR/M SIB disp32 imm` byte order. Memory operands
//! always use a SIB byte: `[base + disp32]` with mod=10, or the absolute
//! `[disp32]` form (mod=00, SIB 0x25) when there is no base register.
//! Operand shapes are checked on every call; a mismatch means the lowering
//! emitted something this back end never produces, and is reported as an
//! internal error.

use crate::errors::CompilerError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum X64Register {
    Rax,
    Rcx,
    Rdx,
    Rbx,
    Rsp,
    Rbp,
    Rsi,
    Rdi,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    Xmm0,
    Xmm1,
    Xmm2,
    Xmm3,
    Xmm4,
    Xmm5,
    Xmm6,
    Xmm7,
    Xmm8,
    Xmm9,
    Xmm10,
    Xmm11,
    Xmm12,
    Xmm13,
    Xmm14,
    Xmm15,
}

impl X64Register {
    /// Low three encoding bits.
    fn low3(self) -> u8 {
        use X64Register::*;
        match self {
            Rax | R8 | Xmm0 | Xmm8 => 0,
            Rcx | R9 | Xmm1 | Xmm9 => 1,
            Rdx | R10 | Xmm2 | Xmm10 => 2,
            Rbx | R11 | Xmm3 | Xmm11 => 3,
            Rsp | R12 | Xmm4 | Xmm12 => 4,
            Rbp | R13 | Xmm5 | Xmm13 => 5,
            Rsi | R14 | Xmm6 | Xmm14 => 6,
            Rdi | R15 | Xmm7 | Xmm15 => 7,
        }
    }

    /// Fourth encoding bit, carried in REX.R/B.
    fn high_bit(self) -> bool {
        use X64Register::*;
        matches!(
            self,
            R8 | R9
                | R10
                | R11
                | R12
                | R13
                | R14
                | R15
                | Xmm8
                | Xmm9
                | Xmm10
                | Xmm11
                | Xmm12
                | Xmm13
                | Xmm14
                | Xmm15
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum X64Operand {
    Reg(X64Register),
    Mem {
        base: Option<X64Register>,
        disp: i32,
    },
    Imm(i64),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum X64Op {
    Nop,
    Push,
    Pop,
    Mov,
    Add,
    Sub,
    Addsd,
    Subsd,
    Mulsd,
    Divsd,
    Pxor,
    Andpd,
    Orpd,
    Sqrtpd,
    Movsd,
    Comisd,
    Jmp,
    Je,
    Jne,
    Jb,
    Jbe,
    Ja,
    Jae,
    Call,
    Ret,
    Lea,
}

/// Where an operand's bits land in the encoded instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Slot {
    None,
    /// Register folded into the opcode's low three bits.
    OpcodeReg,
    /// ModR/M reg field.
    ModRmReg,
    /// ModR/M rm field: register-direct or a SIB memory form.
    ModRmRm,
    Imm32,
    Imm16,
}

struct Descriptor {
    mandatory_prefix: Option<u8>,
    two_byte: bool,
    rex_w: bool,
    opcode: u8,
    /// Opcode extension digit placed in the ModR/M reg field.
    modrm_ext: Option<u8>,
    slots: [Slot; 2],
}

impl Descriptor {
    const fn plain(opcode: u8, slots: [Slot; 2]) -> Self {
        Descriptor {
            mandatory_prefix: None,
            two_byte: false,
            rex_w: false,
            opcode,
            modrm_ext: None,
            slots,
        }
    }

    const fn sse(prefix: u8, opcode: u8, slots: [Slot; 2]) -> Self {
        Descriptor {
            mandatory_prefix: Some(prefix),
            two_byte: true,
            rex_w: false,
            opcode,
            modrm_ext: None,
            slots,
        }
    }
}

fn descriptor(op: X64Op, operands: &[X64Operand]) -> Result<Descriptor, CompilerError> {
    let descriptor = match op {
        X64Op::Nop => Descriptor::plain(0x90, [Slot::None, Slot::None]),

        X64Op::Push => Descriptor::plain(0x50, [Slot::OpcodeReg, Slot::None]),
        X64Op::Pop => Descriptor::plain(0x58, [Slot::OpcodeReg, Slot::None]),

        X64Op::Mov => Descriptor {
            rex_w: true,
            ..Descriptor::plain(0x8B, [Slot::ModRmReg, Slot::ModRmRm])
        },
        X64Op::Lea => Descriptor {
            rex_w: true,
            ..Descriptor::plain(0x8D, [Slot::ModRmReg, Slot::ModRmRm])
        },

        X64Op::Add => Descriptor {
            rex_w: true,
            modrm_ext: Some(0),
            ..Descriptor::plain(0x81, [Slot::ModRmRm, Slot::Imm32])
        },
        X64Op::Sub => Descriptor {
            rex_w: true,
            modrm_ext: Some(5),
            ..Descriptor::plain(0x81, [Slot::ModRmRm, Slot::Imm32])
        },

        X64Op::Addsd => Descriptor::sse(0xF2, 0x58, [Slot::ModRmReg, Slot::ModRmRm]),
        X64Op::Subsd => Descriptor::sse(0xF2, 0x5C, [Slot::ModRmReg, Slot::ModRmRm]),
        X64Op::Mulsd => Descriptor::sse(0xF2, 0x59, [Slot::ModRmReg, Slot::ModRmRm]),
        X64Op::Divsd => Descriptor::sse(0xF2, 0x5E, [Slot::ModRmReg, Slot::ModRmRm]),

        X64Op::Pxor => Descriptor::sse(0x66, 0xEF, [Slot::ModRmReg, Slot::ModRmRm]),
        X64Op::Andpd => Descriptor::sse(0x66, 0x54, [Slot::ModRmReg, Slot::ModRmRm]),
        X64Op::Orpd => Descriptor::sse(0x66, 0x56, [Slot::ModRmReg, Slot::ModRmRm]),
        X64Op::Sqrtpd => Descriptor::sse(0x66, 0x51, [Slot::ModRmReg, Slot::ModRmRm]),
        X64Op::Comisd => Descriptor::sse(0x66, 0x2F, [Slot::ModRmReg, Slot::ModRmRm]),

        // MOVSD direction depends on which side is memory.
        X64Op::Movsd => match operands {
            [X64Operand::Reg(_), X64Operand::Mem { .. }] => {
                Descriptor::sse(0xF2, 0x10, [Slot::ModRmReg, Slot::ModRmRm])
            }
            [X64Operand::Mem { .. }, X64Operand::Reg(_)] => {
                Descriptor::sse(0xF2, 0x11, [Slot::ModRmRm, Slot::ModRmReg])
            }
            _ => {
                return Err(operand_mismatch(op, operands));
            }
        },

        X64Op::Jmp => Descriptor::plain(0xE9, [Slot::Imm32, Slot::None]),
        X64Op::Call => Descriptor::plain(0xE8, [Slot::Imm32, Slot::None]),

        X64Op::Je => jcc(0x84),
        X64Op::Jne => jcc(0x85),
        X64Op::Jb => jcc(0x82),
        X64Op::Jbe => jcc(0x86),
        X64Op::Ja => jcc(0x87),
        X64Op::Jae => jcc(0x83),

        X64Op::Ret => Descriptor::plain(0xC2, [Slot::Imm16, Slot::None]),
    };

    Ok(descriptor)
}

const fn jcc(opcode: u8) -> Descriptor {
    Descriptor {
        mandatory_prefix: None,
        two_byte: true,
        rex_w: false,
        opcode,
        modrm_ext: None,
        slots: [Slot::Imm32, Slot::None],
    }
}

fn operand_mismatch(op: X64Op, operands: &[X64Operand]) -> CompilerError {
    CompilerError::internal(format!(
        "operand shape {:?} is not encodable for {:?}",
        operands, op
    ))
}

const REX_BASE: u8 = 0x40;
const REX_W: u8 = 0x08;
const REX_R: u8 = 0x04;
const REX_B: u8 = 0x01;

struct Instruction {
    mandatory_prefix: Option<u8>,
    rex: u8,
    two_byte: bool,
    opcode: u8,
    modrm: Option<u8>,
    sib: Option<u8>,
    disp32: Option<i32>,
    imm32: Option<i32>,
    imm16: Option<i16>,
}

impl Instruction {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16);

        if let Some(prefix) = self.mandatory_prefix {
            bytes.push(prefix);
        }
        if self.rex != REX_BASE {
            bytes.push(self.rex);
        }
        if self.two_byte {
            bytes.push(0x0F);
        }
        bytes.push(self.opcode);

        if let Some(modrm) = self.modrm {
            bytes.push(modrm);
        }
        if let Some(sib) = self.sib {
            bytes.push(sib);
        }
        if let Some(disp) = self.disp32 {
            bytes.extend_from_slice(&disp.to_le_bytes());
        }
        if let Some(imm) = self.imm16 {
            bytes.extend_from_slice(&imm.to_le_bytes());
        }
        if let Some(imm) = self.imm32 {
            bytes.extend_from_slice(&imm.to_le_bytes());
        }

        bytes
    }
}

/// Encodes one instruction. The result is 1 to 16 bytes.
pub fn encode(op: X64Op, operands: &[X64Operand]) -> Result<Vec<u8>, CompilerError> {
    let descriptor = descriptor(op, operands)?;

    let expected = descriptor.slots.iter().filter(|&&s| s != Slot::None).count();
    if operands.len() != expected {
        return Err(CompilerError::internal(format!(
            "{:?} takes {} operand(s), got {}",
            op,
            expected,
            operands.len()
        )));
    }

    let mut instruction = Instruction {
        mandatory_prefix: descriptor.mandatory_prefix,
        rex: REX_BASE | if descriptor.rex_w { REX_W } else { 0 },
        two_byte: descriptor.two_byte,
        opcode: descriptor.opcode,
        modrm: None,
        sib: None,
        disp32: None,
        imm32: None,
        imm16: None,
    };

    if let Some(ext) = descriptor.modrm_ext {
        set_modrm_bits(&mut instruction, ext << 3);
    }

    for (slot, operand) in descriptor.slots.iter().zip(operands) {
        place_operand(&mut instruction, op, *slot, *operand, operands)?;
    }

    Ok(instruction.to_bytes())
}

fn set_modrm_bits(instruction: &mut Instruction, bits: u8) {
    instruction.modrm = Some(instruction.modrm.unwrap_or(0) | bits);
}

fn place_operand(
    instruction: &mut Instruction,
    op: X64Op,
    slot: Slot,
    operand: X64Operand,
    all: &[X64Operand],
) -> Result<(), CompilerError> {
    match (slot, operand) {
        (Slot::OpcodeReg, X64Operand::Reg(reg)) => {
            instruction.opcode |= reg.low3();
            if reg.high_bit() {
                instruction.rex |= REX_B;
            }
        }

        (Slot::ModRmReg, X64Operand::Reg(reg)) => {
            set_modrm_bits(instruction, reg.low3() << 3);
            if reg.high_bit() {
                instruction.rex |= REX_R;
            }
        }

        (Slot::ModRmRm, X64Operand::Reg(reg)) => {
            set_modrm_bits(instruction, 0b11 << 6 | reg.low3());
            if reg.high_bit() {
                instruction.rex |= REX_B;
            }
        }

        (Slot::ModRmRm, X64Operand::Mem { base, disp }) => {
            // rm=100 selects the SIB byte; index=100 means no index.
            set_modrm_bits(instruction, 0b100);
            match base {
                Some(reg) => {
                    set_modrm_bits(instruction, 0b10 << 6);
                    instruction.sib = Some(0b100 << 3 | reg.low3());
                    if reg.high_bit() {
                        instruction.rex |= REX_B;
                    }
                }
                // Absolute [disp32]: mod=00, SIB base=101 without a base.
                None => {
                    instruction.sib = Some(0b100 << 3 | 0b101);
                }
            }
            instruction.disp32 = Some(disp);
        }

        (Slot::Imm32, X64Operand::Imm(value)) => {
            let value = i32::try_from(value).map_err(|_| {
                CompilerError::internal(format!("immediate {} does not fit in 32 bits", value))
            })?;
            instruction.imm32 = Some(value);
        }

        (Slot::Imm16, X64Operand::Imm(value)) => {
            let value = i16::try_from(value).map_err(|_| {
                CompilerError::internal(format!("immediate {} does not fit in 16 bits", value))
            })?;
            instruction.imm16 = Some(value);
        }

        _ => return Err(operand_mismatch(op, all)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use X64Operand::{Imm, Mem, Reg};
    use X64Register::*;

    #[test]
    fn test_encode_push_pop() {
        assert_eq!(encode(X64Op::Push, &[Reg(Rbp)]).unwrap(), vec![0x55]);
        assert_eq!(encode(X64Op::Pop, &[Reg(Rbp)]).unwrap(), vec![0x5D]);
        assert_eq!(encode(X64Op::Push, &[Reg(Rax)]).unwrap(), vec![0x50]);
        // High registers need REX.B.
        assert_eq!(encode(X64Op::Push, &[Reg(R8)]).unwrap(), vec![0x41, 0x50]);
    }

    #[test]
    fn test_encode_mov_reg_reg() {
        assert_eq!(
            encode(X64Op::Mov, &[Reg(Rbp), Reg(Rsp)]).unwrap(),
            vec![0x48, 0x8B, 0xEC]
        );
        assert_eq!(
            encode(X64Op::Mov, &[Reg(Rsp), Reg(Rbp)]).unwrap(),
            vec![0x48, 0x8B, 0xE5]
        );
    }

    #[test]
    fn test_encode_add_sub_imm() {
        assert_eq!(
            encode(X64Op::Sub, &[Reg(Rsp), Imm(16)]).unwrap(),
            vec![0x48, 0x81, 0xEC, 0x10, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            encode(X64Op::Add, &[Reg(Rsp), Imm(-32)]).unwrap(),
            vec![0x48, 0x81, 0xC4, 0xE0, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_encode_movsd_both_directions() {
        // Store to [RSP].
        assert_eq!(
            encode(
                X64Op::Movsd,
                &[Mem { base: Some(Rsp), disp: 0 }, Reg(Xmm0)]
            )
            .unwrap(),
            vec![0xF2, 0x0F, 0x11, 0x84, 0x24, 0x00, 0x00, 0x00, 0x00]
        );
        // Load from [RBP+16].
        assert_eq!(
            encode(
                X64Op::Movsd,
                &[Reg(Xmm0), Mem { base: Some(Rbp), disp: 16 }]
            )
            .unwrap(),
            vec![0xF2, 0x0F, 0x10, 0x84, 0x25, 0x10, 0x00, 0x00, 0x00]
        );
        // Absolute rodata load.
        assert_eq!(
            encode(
                X64Op::Movsd,
                &[Reg(Xmm0), Mem { base: None, disp: 0x402000 }]
            )
            .unwrap(),
            vec![0xF2, 0x0F, 0x10, 0x04, 0x25, 0x00, 0x20, 0x40, 0x00]
        );
    }

    #[test]
    fn test_encode_sse_arithmetic() {
        assert_eq!(
            encode(X64Op::Addsd, &[Reg(Xmm0), Reg(Xmm1)]).unwrap(),
            vec![0xF2, 0x0F, 0x58, 0xC1]
        );
        assert_eq!(
            encode(X64Op::Pxor, &[Reg(Xmm0), Reg(Xmm0)]).unwrap(),
            vec![0x66, 0x0F, 0xEF, 0xC0]
        );
        assert_eq!(
            encode(X64Op::Comisd, &[Reg(Xmm0), Reg(Xmm1)]).unwrap(),
            vec![0x66, 0x0F, 0x2F, 0xC1]
        );
        assert_eq!(
            encode(X64Op::Sqrtpd, &[Reg(Xmm0), Reg(Xmm0)]).unwrap(),
            vec![0x66, 0x0F, 0x51, 0xC0]
        );
    }

    #[test]
    fn test_encode_control_flow() {
        assert_eq!(
            encode(X64Op::Jmp, &[Imm(-5)]).unwrap(),
            vec![0xE9, 0xFB, 0xFF, 0xFF, 0xFF]
        );
        assert_eq!(
            encode(X64Op::Je, &[Imm(18)]).unwrap(),
            vec![0x0F, 0x84, 0x12, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            encode(X64Op::Call, &[Imm(5)]).unwrap(),
            vec![0xE8, 0x05, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            encode(X64Op::Ret, &[Imm(32)]).unwrap(),
            vec![0xC2, 0x20, 0x00]
        );
    }

    #[test]
    fn test_encode_lea_absolute() {
        assert_eq!(
            encode(X64Op::Lea, &[Reg(Rax), Mem { base: None, disp: 0x402010 }]).unwrap(),
            vec![0x48, 0x8D, 0x04, 0x25, 0x10, 0x20, 0x40, 0x00]
        );
    }

    #[test]
    fn test_operand_shape_mismatch_is_internal_error() {
        let err = encode(X64Op::Comisd, &[Reg(Xmm0), Imm(0)]).unwrap_err();
        assert!(matches!(err, CompilerError::InternalError { .. }), "{err:?}");

        let err = encode(X64Op::Movsd, &[Reg(Xmm0), Imm(1)]).unwrap_err();
        assert!(matches!(err, CompilerError::InternalError { .. }), "{err:?}");
    }

    #[test]
    fn test_rel32_out_of_range_rejected() {
        let err = encode(X64Op::Jmp, &[Imm(i64::MAX)]).unwrap_err();
        assert!(matches!(err, CompilerError::InternalError { .. }), "{err:?}");
    }
}
