//! Human-readable listing of a container's code stream

use std::fmt::Write;

use crate::constant::Constant;
use crate::container::Container;
use crate::error::DecodeError;
use crate::instruction::{InstructionIter, OpcodeTranslator, PoolRef};
use crate::opcode::Opcode;

/// Disassemble the container's code, one instruction per line.
///
/// Lines show the offset, the stored byte, the canonical mnemonic and a
/// resolved operand. Pass the mapping for obfuscated streams.
pub fn disassemble(
    container: &Container,
    translator: Option<&dyn OpcodeTranslator>,
) -> Result<String, DecodeError> {
    let mut out = String::new();
    for instr in InstructionIter::with_translator(&container.code, translator) {
        let instr = instr?;
        let stored = container.code[instr.address];
        let detail = format_operand(container, instr.opcode, instr.operand);
        // Writing to a String cannot fail
        let _ = if detail.is_empty() {
            writeln!(out, "{:04x}  {:02x}  {}", instr.address, stored, instr.opcode.name())
        } else {
            writeln!(
                out,
                "{:04x}  {:02x}  {} {}",
                instr.address,
                stored,
                instr.opcode.name(),
                detail
            )
        };
    }

    if out.is_empty() {
        out.push_str("(empty program)\n");
    }
    Ok(out)
}

fn format_operand(container: &Container, opcode: Opcode, operand: Option<u16>) -> String {
    let Some(operand) = operand else {
        return String::new();
    };
    match opcode {
        Opcode::Push => match PoolRef::from_operand(operand) {
            PoolRef::Constant(idx) => match container.constants.get(idx) {
                Some(Constant::Int(v)) => format!("#{} ({})", idx, v),
                Some(Constant::Float(v)) => format!("#{} ({:?})", idx, v),
                Some(Constant::Str(s)) => format!("#{} ({:?})", idx, s),
                Some(Constant::None) => format!("#{} (none)", idx),
                None => format!("#{} (?)", idx),
            },
            PoolRef::String(idx) => match container.strings.get(idx) {
                Some(s) => format!("@{} ({:?})", idx, s),
                None => format!("@{} (?)", idx),
            },
        },
        Opcode::Load | Opcode::Store => {
            let name = container
                .metadata
                .variables
                .iter()
                .find(|(_, slot)| **slot == operand)
                .map(|(name, _)| name.as_str());
            match name {
                Some(name) => format!("{} ({})", operand, name),
                None => operand.to_string(),
            }
        }
        Opcode::Jump | Opcode::JumpIfFalse | Opcode::Call | Opcode::Repeat => {
            format!("-> {:04x}", operand)
        }
        _ => operand.to_string(),
    }
}
