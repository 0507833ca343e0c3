use std::io::{BufReader, Read};

use tracing::debug;

use crate::error::CompileError;
use crate::instruction::{Instruction, Program, TOKEN_LOOP_END, TOKEN_LOOP_START};

/// Compile a byte stream into a [`Program`].
///
/// The stream is read exactly once, front to back. Bytes outside the eight
/// token alphabet are skipped. Runs of identical non-loop tokens collapse
/// into one instruction. Bracket balance is checked during the scan: an
/// excess `]` fails at its own offset, an unclosed `[` fails at the offset
/// one past the last byte.
pub fn compile<R: Read>(source: R) -> Result<Program, CompileError> {
    // frames[0] is the top level; each open `[` pushes the body being built.
    let mut frames: Vec<Vec<Instruction>> = vec![Vec::new()];
    let mut position = 0usize;

    for byte in BufReader::new(source).bytes() {
        let token = byte.map_err(|source| CompileError::ReadFault { position, source })?;

        match token {
            TOKEN_LOOP_START => frames.push(Vec::new()),
            TOKEN_LOOP_END => {
                if frames.len() == 1 {
                    debug!(position, "loop end without matching start");
                    return Err(CompileError::UnbalancedBracket { position });
                }
                let body = frames.pop().unwrap_or_default();
                if let Some(block) = frames.last_mut() {
                    block.push(Instruction::Loop { body });
                }
            }
            _ => {
                if let Some(block) = frames.last_mut() {
                    append(block, token);
                }
            }
        }
        position += 1;
    }

    if frames.len() != 1 {
        debug!(position, open = frames.len() - 1, "loop start never closed");
        return Err(CompileError::UnbalancedBracket { position });
    }

    let program = Program::from(frames.pop().unwrap_or_default());
    debug!(
        source_bytes = position,
        instructions = program.instruction_count(),
        depth = program.max_depth(),
        "compiled program"
    );
    Ok(program)
}

/// Compile an in-memory source string.
pub fn compile_str(source: &str) -> Result<Program, CompileError> {
    compile(source.as_bytes())
}

/// Fold `token` into the tail of `block`, or start a new instruction.
/// Comment bytes are dropped.
fn append(block: &mut Vec<Instruction>, token: u8) {
    if let Some(last) = block.last_mut() {
        if last.absorbs(token) {
            last.repeat();
            return;
        }
    }
    if let Some(instr) = Instruction::from_token(token) {
        block.push(instr);
    }
}
