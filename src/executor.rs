use std::io::{self, ErrorKind, Read, Write};

use tracing::{debug, trace};

use crate::error::RuntimeError;
use crate::instruction::{Direction, Instruction, Program};
use crate::tape::Tape;

/// Byte stored by `,` once the input source is exhausted.
pub const EOF_SENTINEL: u8 = 0;

/// A position inside one instruction sequence.
struct Frame<'p> {
    block: &'p [Instruction],
    pc: usize,
}

/// Runs programs against a tape, reading from `input` and writing to `output`.
///
/// The program is only borrowed; the same `Program` can be run any number of
/// times against fresh tapes.
pub struct Executor<'t, R, W> {
    tape: &'t mut Tape,
    input: R,
    output: W,
    steps: u64,
}

impl<'t, R: Read, W: Write> Executor<'t, R, W> {
    pub fn new(tape: &'t mut Tape, input: R, output: W) -> Self {
        Self {
            tape,
            input,
            output,
            steps: 0,
        }
    }

    /// Instructions dispatched so far, loop nodes included.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }

    /// Run `program` to completion or to its first fault.
    ///
    /// Output is flushed either way, so bytes written before a fault stay
    /// observable.
    pub fn run(&mut self, program: &Program) -> Result<(), RuntimeError> {
        let result = self.run_block(program.root());
        let flushed = self.output.flush();
        if let Err(ref err) = result {
            debug!(cursor = self.tape.cursor(), steps = self.steps, %err, "execution stopped");
        }
        result?;
        flushed?;
        Ok(())
    }

    /// Walk a block without recursing into loop bodies; nesting lives on
    /// an explicit frame stack.
    fn run_block(&mut self, root: &[Instruction]) -> Result<(), RuntimeError> {
        let mut frames = vec![Frame { block: root, pc: 0 }];

        while let Some(frame) = frames.last_mut() {
            let block = frame.block;
            let Some(instr) = block.get(frame.pc) else {
                // End of a block: re-test the loop that owns it.
                let finished = frames.pop().map(|f| f.block).unwrap_or_default();
                if frames.is_empty() {
                    break;
                }
                if self.tape.current() != 0 {
                    frames.push(Frame { block: finished, pc: 0 });
                } else if let Some(parent) = frames.last_mut() {
                    parent.pc += 1;
                }
                continue;
            };
            self.steps += 1;

            match instr {
                Instruction::Loop { body } => {
                    if self.tape.current() != 0 {
                        trace!(cursor = self.tape.cursor(), depth = frames.len(), "enter loop");
                        frames.push(Frame { block: body, pc: 0 });
                    } else {
                        frame.pc += 1;
                    }
                }
                other => {
                    frame.pc += 1;
                    self.step(other)?;
                }
            }
        }
        Ok(())
    }

    fn step(&mut self, instr: &Instruction) -> Result<(), RuntimeError> {
        match *instr {
            Instruction::Move { direction, count } => {
                check_count(instr, count)?;
                match direction {
                    Direction::Forward => self.tape.move_forward(count),
                    Direction::Backward => self.tape.move_backward(count),
                }
            }
            Instruction::Add { delta } => {
                if delta == 0 {
                    return Err(inconsistent(instr));
                }
                self.tape.add(delta);
                Ok(())
            }
            Instruction::Input { count } => {
                check_count(instr, count)?;
                // Every read is consumed; only the last one stays in the cell.
                for _ in 0..count {
                    let byte = self.read_byte()?;
                    self.tape.set_current(byte);
                }
                Ok(())
            }
            Instruction::Output { count } => {
                check_count(instr, count)?;
                let byte = self.tape.current();
                io::copy(&mut io::repeat(byte).take(count as u64), &mut self.output)?;
                Ok(())
            }
            Instruction::Loop { .. } => Err(RuntimeError::InternalInconsistency {
                detail: "loop dispatched as a plain instruction".to_string(),
            }),
        }
    }

    fn read_byte(&mut self) -> Result<u8, RuntimeError> {
        let mut buf = [0u8; 1];
        loop {
            match self.input.read(&mut buf) {
                Ok(0) => return Ok(EOF_SENTINEL),
                Ok(_) => return Ok(buf[0]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn check_count(instr: &Instruction, count: usize) -> Result<(), RuntimeError> {
    if count == 0 {
        return Err(inconsistent(instr));
    }
    Ok(())
}

fn inconsistent(instr: &Instruction) -> RuntimeError {
    RuntimeError::InternalInconsistency {
        detail: format!("instruction {instr:?} has zero magnitude"),
    }
}

/// Run `program` on `tape` with the given I/O, returning the first fault.
pub fn execute<R: Read, W: Write>(
    program: &Program,
    tape: &mut Tape,
    input: R,
    output: W,
) -> Result<(), RuntimeError> {
    Executor::new(tape, input, output).run(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_str;
    use std::num::NonZeroUsize;

    /// Compile and run on a fresh default tape; returns (result, output, tape).
    fn run(source: &str, input: &[u8]) -> (Result<(), RuntimeError>, Vec<u8>, Tape) {
        let program = compile_str(source).unwrap();
        let mut tape = Tape::default();
        let mut output = Vec::new();
        let result = execute(&program, &mut tape, input, &mut output);
        (result, output, tape)
    }

    #[test]
    fn test_empty_program() {
        let (result, output, tape) = run("", b"");
        assert!(result.is_ok());
        assert!(output.is_empty());
        assert!(tape.cells().iter().all(|&c| c == 0));
        assert_eq!(tape.cursor(), 0);
    }

    #[test]
    fn test_add_then_output() {
        let (result, output, _) = run("+++.", b"");
        assert!(result.is_ok());
        assert_eq!(output, vec![3]);
    }

    #[test]
    fn test_doubling_loop() {
        let (result, output, tape) = run("++[>++<-]>.", b"");
        assert!(result.is_ok());
        assert_eq!(output, vec![4]);
        assert_eq!(tape.cells()[0], 0);
        assert_eq!(tape.cursor(), 1);
    }

    #[test]
    fn test_underflow_at_origin() {
        let (result, output, _) = run("<.", b"");
        assert!(matches!(
            result,
            Err(RuntimeError::TapeUnderflow { cursor: 0, count: 1 })
        ));
        assert!(output.is_empty());
    }

    #[test]
    fn test_underflow_by_repeat_count() {
        let (result, _, tape) = run(">><<<", b"");
        assert!(matches!(
            result,
            Err(RuntimeError::TapeUnderflow { cursor: 2, count: 3 })
        ));
        assert_eq!(tape.cursor(), 2);
    }

    #[test]
    fn test_overflow_at_capacity() {
        let capacity = 16;
        let program = compile_str(&">".repeat(capacity)).unwrap();
        let mut tape = Tape::new(NonZeroUsize::new(capacity).unwrap());
        let result = execute(&program, &mut tape, io::empty(), io::sink());
        assert!(matches!(
            result,
            Err(RuntimeError::TapeOverflow { cursor: 0, count: 16, capacity: 16 })
        ));
        assert_eq!(tape.cursor(), 0);
    }

    #[test]
    fn test_last_cell_is_reachable() {
        let program = compile_str(&format!("{}+.", ">".repeat(15))).unwrap();
        let mut tape = Tape::new(NonZeroUsize::new(16).unwrap());
        let mut output = Vec::new();
        execute(&program, &mut tape, io::empty(), &mut output).unwrap();
        assert_eq!(output, vec![1]);
        assert_eq!(tape.cursor(), 15);
    }

    #[test]
    fn test_fault_inside_loop_aborts_everything() {
        let (result, output, _) = run("+[.<]+++.", b"");
        assert!(matches!(result, Err(RuntimeError::TapeUnderflow { .. })));
        assert_eq!(output, vec![1]);
    }

    #[test]
    fn test_input_at_eof_reads_sentinel() {
        let (result, output, _) = run(",.", b"");
        assert!(result.is_ok());
        assert_eq!(output, vec![EOF_SENTINEL]);
    }

    #[test]
    fn test_input_overwrites_cell() {
        let (result, output, _) = run("+++++,.", b"A");
        assert!(result.is_ok());
        assert_eq!(output, b"A");
    }

    #[test]
    fn test_repeated_input_keeps_last_byte() {
        let program = compile_str(",,,.").unwrap();
        let mut tape = Tape::default();
        let mut input: &[u8] = b"xyzw";
        let mut output = Vec::new();
        execute(&program, &mut tape, &mut input, &mut output).unwrap();
        assert_eq!(output, b"z");
        // All three reads were consumed.
        assert_eq!(input, b"w");
    }

    #[test]
    fn test_repeated_output_writes_every_byte() {
        let (result, output, _) = run("++++++++[>++++++++<-]>+....", b"");
        assert!(result.is_ok());
        assert_eq!(output, b"AAAA");
    }

    #[test]
    fn test_cell_wraps() {
        let (result, output, _) = run("-.+.", b"");
        assert!(result.is_ok());
        assert_eq!(output, vec![255, 0]);
    }

    #[test]
    fn test_zero_iteration_loop_skips_body() {
        let (result, output, tape) = run("[<<<.]+.", b"");
        assert!(result.is_ok());
        assert_eq!(output, vec![1]);
        assert_eq!(tape.cursor(), 0);
    }

    #[test]
    fn test_nested_loops() {
        // 3 * 4 * 5 = 60 accumulated in cell 2.
        let (result, output, _) = run("+++[>++++[>+++++<-]<-]>>.", b"");
        assert!(result.is_ok());
        assert_eq!(output, vec![60]);
    }

    #[test]
    fn test_hello_world() {
        let source = "++++++++[>++++[>++>+++>+++>+<<<<-]>+>+>->>+[<]<-]>>.>---.+++++++..+++.>>.<-.<.+++.------.--------.>>+.>++.";
        let (result, output, _) = run(source, b"");
        assert!(result.is_ok());
        assert_eq!(output, b"Hello World!\n");
    }

    #[test]
    fn test_program_is_reusable() {
        let program = compile_str("++[>+++<-]>.").unwrap();
        for _ in 0..3 {
            let mut tape = Tape::default();
            let mut output = Vec::new();
            execute(&program, &mut tape, io::empty(), &mut output).unwrap();
            assert_eq!(output, vec![6]);
        }
    }

    #[test]
    fn test_steps_are_counted() {
        let program = compile_str("+[-]").unwrap();
        let mut tape = Tape::default();
        let mut exec = Executor::new(&mut tape, io::empty(), io::sink());
        exec.run(&program).unwrap();
        // `+`, the loop, `-`. Re-testing at the end of the body is not a dispatch.
        assert_eq!(exec.steps(), 3);
    }

    #[test]
    fn test_zero_count_is_internal() {
        let program = Program::from(vec![Instruction::Output { count: 0 }]);
        let mut tape = Tape::default();
        let err = execute(&program, &mut tape, io::empty(), io::sink()).unwrap_err();
        assert!(err.is_internal());

        let program = Program::from(vec![Instruction::Add { delta: 0 }]);
        let err = execute(&program, &mut tape, io::empty(), io::sink()).unwrap_err();
        assert!(err.is_internal());
    }

    /// Fails its first read with `Interrupted`, then yields `byte` forever.
    struct InterruptedOnce {
        interrupted: bool,
        byte: u8,
    }

    impl Read for InterruptedOnce {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(ErrorKind::Interrupted.into());
            }
            buf[0] = self.byte;
            Ok(1)
        }
    }

    #[test]
    fn test_interrupted_read_is_retried() {
        let program = compile_str(",.").unwrap();
        let mut tape = Tape::default();
        let input = InterruptedOnce { interrupted: false, byte: b'q' };
        let mut exec = Executor::new(&mut tape, input, Vec::new());
        exec.run(&program).unwrap();
        let (input, output) = exec.into_parts();
        assert!(input.interrupted);
        assert_eq!(output, b"q");
    }

    struct BrokenSource;

    impl Read for BrokenSource {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("keyboard on fire"))
        }
    }

    #[test]
    fn test_input_error_surfaces() {
        let program = compile_str("+.,.").unwrap();
        let mut tape = Tape::default();
        let mut output = Vec::new();
        let err = execute(&program, &mut tape, BrokenSource, &mut output).unwrap_err();
        assert!(matches!(err, RuntimeError::Io(ref e) if e.kind() == ErrorKind::Other));
        assert!(!err.is_internal());
        assert_eq!(output, vec![1]);
    }

    #[test]
    fn test_output_flushed_after_fault() {
        let program = compile_str("+.<").unwrap();
        let mut tape = Tape::default();
        let mut exec = Executor::new(&mut tape, io::empty(), io::BufWriter::new(Vec::new()));
        let err = exec.run(&program).unwrap_err();
        assert!(matches!(err, RuntimeError::TapeUnderflow { cursor: 0, count: 1 }));
        let (_, sink) = exec.into_parts();
        assert!(sink.buffer().is_empty());
        assert_eq!(sink.get_ref(), &vec![1]);
    }

    #[test]
    fn test_deeply_nested_program_compiles_runs_and_drops() {
        let depth = 100_000;
        let source = format!("{}{}", "[".repeat(depth), "]".repeat(depth));
        let program = compile_str(&source).unwrap();
        assert_eq!(program.max_depth(), depth);

        let mut tape = Tape::default();
        execute(&program, &mut tape, io::empty(), io::sink()).unwrap();

        // Entering every level: set the cell, then clear it at the bottom.
        let source = format!("+{}-{}", "[".repeat(depth), "]".repeat(depth));
        let program = compile_str(&source).unwrap();
        let mut tape = Tape::default();
        execute(&program, &mut tape, io::empty(), io::sink()).unwrap();
        assert_eq!(tape.current(), 0);
        drop(program);
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_output_error_surfaces() {
        let program = compile_str("+.").unwrap();
        let mut tape = Tape::default();
        let err = execute(&program, &mut tape, io::empty(), BrokenSink).unwrap_err();
        assert!(matches!(err, RuntimeError::Io(ref e) if e.kind() == ErrorKind::BrokenPipe));
    }
}
