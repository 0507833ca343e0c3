use std::fmt;
use std::slice;

/// Source alphabet. Every other byte is a comment.
pub const TOKEN_FORWARD: u8 = b'>';
pub const TOKEN_BACKWARD: u8 = b'<';
pub const TOKEN_INCREMENT: u8 = b'+';
pub const TOKEN_DECREMENT: u8 = b'-';
pub const TOKEN_OUTPUT: u8 = b'.';
pub const TOKEN_INPUT: u8 = b',';
pub const TOKEN_LOOP_START: u8 = b'[';
pub const TOKEN_LOOP_END: u8 = b']';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// One compiled operation. Repeated tokens are folded into `count` / `delta`.
///
/// Programs are trees: a loop owns its body, so bracket matching is settled
/// once by the compiler and never searched for at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Move { direction: Direction, count: usize },
    /// Positive for a run of `+`, negative for a run of `-`.
    Add { delta: i64 },
    Input { count: usize },
    Output { count: usize },
    Loop { body: Vec<Instruction> },
}

impl Instruction {
    /// The body of a loop, `None` for every other instruction.
    pub fn body(&self) -> Option<&[Instruction]> {
        match self {
            Instruction::Loop { body } => Some(body),
            _ => None,
        }
    }

    /// Whether `token` extends this instruction's run.
    ///
    /// Only identical tokens fold together, so `+-` stays two nodes.
    pub(crate) fn absorbs(&self, token: u8) -> bool {
        match (self, token) {
            (Instruction::Move { direction: Direction::Forward, .. }, TOKEN_FORWARD) => true,
            (Instruction::Move { direction: Direction::Backward, .. }, TOKEN_BACKWARD) => true,
            (Instruction::Add { delta }, TOKEN_INCREMENT) => *delta > 0,
            (Instruction::Add { delta }, TOKEN_DECREMENT) => *delta < 0,
            (Instruction::Input { .. }, TOKEN_INPUT) => true,
            (Instruction::Output { .. }, TOKEN_OUTPUT) => true,
            _ => false,
        }
    }

    /// Fold one more occurrence of this instruction's token into it.
    pub(crate) fn repeat(&mut self) {
        match self {
            Instruction::Move { count, .. }
            | Instruction::Input { count }
            | Instruction::Output { count } => *count += 1,
            Instruction::Add { delta } => *delta += delta.signum(),
            Instruction::Loop { .. } => {}
        }
    }

    /// A single occurrence of a non-loop token, or `None` for anything else.
    pub(crate) fn from_token(token: u8) -> Option<Self> {
        let instr = match token {
            TOKEN_FORWARD => Instruction::Move { direction: Direction::Forward, count: 1 },
            TOKEN_BACKWARD => Instruction::Move { direction: Direction::Backward, count: 1 },
            TOKEN_INCREMENT => Instruction::Add { delta: 1 },
            TOKEN_DECREMENT => Instruction::Add { delta: -1 },
            TOKEN_INPUT => Instruction::Input { count: 1 },
            TOKEN_OUTPUT => Instruction::Output { count: 1 },
            _ => return None,
        };
        Some(instr)
    }
}

/// Nested bodies are detached onto a work list and freed one level at a
/// time, so dropping a deeply nested loop does not recurse.
impl Drop for Instruction {
    fn drop(&mut self) {
        let Instruction::Loop { body } = self else {
            return;
        };
        let mut pending = std::mem::take(body);
        while let Some(mut instr) = pending.pop() {
            if let Instruction::Loop { body } = &mut instr {
                pending.append(body);
            }
        }
    }
}

enum Event<'a> {
    Enter,
    Leave,
    Op(&'a Instruction),
}

/// Pre-order walk over a block, yielding `(depth, event)` pairs.
struct Walk<'a> {
    frames: Vec<slice::Iter<'a, Instruction>>,
}

impl<'a> Walk<'a> {
    fn new(block: &'a [Instruction]) -> Self {
        Self {
            frames: vec![block.iter()],
        }
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = (usize, Event<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let depth = self.frames.len().checked_sub(1)?;
        let frame = self.frames.last_mut()?;
        match frame.next() {
            Some(instr) => match instr.body() {
                Some(body) => {
                    self.frames.push(body.iter());
                    Some((depth, Event::Enter))
                }
                None => Some((depth, Event::Op(instr))),
            },
            None => {
                self.frames.pop();
                if self.frames.is_empty() {
                    None
                } else {
                    Some((depth - 1, Event::Leave))
                }
            }
        }
    }
}

/// Space-separated single-line form, e.g. `+3 >1 [ -1 ]`.
fn write_compact(f: &mut fmt::Formatter<'_>, block: &[Instruction]) -> fmt::Result {
    for (i, (_, event)) in Walk::new(block).enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        match event {
            Event::Enter => f.write_str("[")?,
            Event::Leave => f.write_str("]")?,
            Event::Op(instr) => write!(f, "{instr}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Move { direction: Direction::Forward, count } => write!(f, ">{count}"),
            Instruction::Move { direction: Direction::Backward, count } => write!(f, "<{count}"),
            Instruction::Add { delta } if *delta < 0 => write!(f, "-{}", delta.unsigned_abs()),
            Instruction::Add { delta } => write!(f, "+{delta}"),
            Instruction::Input { count } => write!(f, ",{count}"),
            Instruction::Output { count } => write!(f, ".{count}"),
            Instruction::Loop { .. } => write_compact(f, slice::from_ref(self)),
        }
    }
}

/// A successfully compiled program. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    root: Vec<Instruction>,
}

impl Program {
    pub fn root(&self) -> &[Instruction] {
        &self.root
    }

    /// Number of top-level instructions.
    pub fn len(&self) -> usize {
        self.root.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Total number of nodes, loop bodies included.
    pub fn instruction_count(&self) -> usize {
        let mut pending = vec![self.root.as_slice()];
        let mut total = 0;
        while let Some(block) = pending.pop() {
            total += block.len();
            pending.extend(block.iter().filter_map(Instruction::body));
        }
        total
    }

    /// Deepest loop nesting level; 0 for a loop-free program.
    pub fn max_depth(&self) -> usize {
        let mut pending = vec![(self.root.as_slice(), 0usize)];
        let mut deepest = 0;
        while let Some((block, depth)) = pending.pop() {
            deepest = deepest.max(depth);
            pending.extend(
                block
                    .iter()
                    .filter_map(Instruction::body)
                    .map(|body| (body, depth + 1)),
            );
        }
        deepest
    }

    /// One instruction per line, loop bodies indented.
    pub fn disassemble(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        for (depth, event) in Walk::new(&self.root) {
            let indent = depth * 2;
            let _ = match event {
                Event::Enter => writeln!(out, "{:indent$}[", ""),
                Event::Leave => writeln!(out, "{:indent$}]", ""),
                Event::Op(instr) => writeln!(out, "{:indent$}{instr}", ""),
            };
        }
        out
    }
}

/// Wrap a hand-built instruction list. Nothing is validated here; the
/// executor rejects malformed nodes when it reaches them.
impl From<Vec<Instruction>> for Program {
    fn from(root: Vec<Instruction>) -> Self {
        Self { root }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_compact(f, &self.root)
    }
}
