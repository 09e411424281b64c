//! Capstone adapter: bytes in, [`Instruction`]s out.

use capstone::arch::{self, ArchOperand};
use capstone::prelude::*;
use capstone::{Capstone, InsnGroupId, InsnGroupType};

use crate::model::{Arch, Instruction, Operand};

#[derive(Debug, thiserror::Error)]
#[error("disassembler error: {0}")]
pub struct DisasmError(pub String);

fn make_cs(target: Arch) -> Result<Capstone, DisasmError> {
    let built = match target {
        Arch::X86_64 => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).detail(true).build()
        }
        Arch::X86 => Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).detail(true).build(),
        Arch::Arm => Capstone::new().arm().mode(arch::arm::ArchMode::Arm).detail(true).build(),
        Arch::Aarch64 => {
            Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).detail(true).build()
        }
    };
    built.map_err(|e| DisasmError(format!("capstone init failed for {target}: {e}")))
}

/// Decodes machine code for one architecture.
pub struct Disassembler {
    cs: Capstone,
    arch: Arch,
}

impl Disassembler {
    pub fn new(arch: Arch) -> Result<Self, DisasmError> {
        Ok(Self { cs: make_cs(arch)?, arch })
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Decode `code` mapped at `address` until the end or the first invalid byte.
    pub fn disassemble(&self, code: &[u8], address: u64) -> Result<Vec<Instruction>, DisasmError> {
        let insns = self
            .cs
            .disasm_all(code, address)
            .map_err(|e| DisasmError(format!("disassembly at 0x{address:X} failed: {e}")))?;
        let mut out = Vec::with_capacity(insns.len());
        for insn in insns.iter() {
            let mnemonic = insn.mnemonic().unwrap_or("").to_lowercase();
            let mut decoded = Instruction::new(insn.address(), insn.bytes().len() as u8, mnemonic);
            if let Ok(detail) = self.cs.insn_detail(insn) {
                decoded.is_branch = detail.groups().iter().any(|g| {
                    *g == InsnGroupId(InsnGroupType::CS_GRP_CALL as u8)
                        || *g == InsnGroupId(InsnGroupType::CS_GRP_JUMP as u8)
                        || *g == InsnGroupId(InsnGroupType::CS_GRP_BRANCH_RELATIVE as u8)
                });
                decoded.operands =
                    detail.arch_detail().operands().iter().map(convert_operand).collect();
            }
            out.push(decoded);
        }
        Ok(out)
    }
}

fn convert_operand(op: &ArchOperand) -> Operand {
    match op {
        ArchOperand::X86Operand(op) => match &op.op_type {
            arch::x86::X86OperandType::Reg(_) => Operand::Register,
            arch::x86::X86OperandType::Imm(imm) => Operand::Immediate(*imm),
            arch::x86::X86OperandType::Mem(mem) => {
                let base = mem.base().0;
                let rip = base == arch::x86::X86Reg::X86_REG_RIP as u16
                    || base == arch::x86::X86Reg::X86_REG_EIP as u16;
                Operand::Memory {
                    has_base: base != 0,
                    has_index: mem.index().0 != 0,
                    pc_relative: rip,
                    displacement: mem.disp(),
                }
            }
            _ => Operand::Other,
        },
        ArchOperand::ArmOperand(op) => match &op.op_type {
            arch::arm::ArmOperandType::Reg(_) => Operand::Register,
            arch::arm::ArmOperandType::Imm(imm) => Operand::Immediate(i64::from(*imm)),
            arch::arm::ArmOperandType::Mem(mem) => Operand::Memory {
                has_base: mem.base().0 != 0,
                has_index: mem.index().0 != 0,
                pc_relative: mem.base().0 == arch::arm::ArmReg::ARM_REG_PC as u16,
                displacement: i64::from(mem.disp()),
            },
            _ => Operand::Other,
        },
        ArchOperand::Arm64Operand(op) => match &op.op_type {
            arch::arm64::Arm64OperandType::Reg(_) => Operand::Register,
            arch::arm64::Arm64OperandType::Imm(imm) => Operand::Immediate(*imm),
            arch::arm64::Arm64OperandType::Mem(mem) => Operand::Memory {
                has_base: mem.base().0 != 0,
                has_index: mem.index().0 != 0,
                pc_relative: false,
                displacement: i64::from(mem.disp()),
            },
            _ => Operand::Other,
        },
        _ => Operand::Other,
    }
}
