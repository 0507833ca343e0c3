pub mod error;
pub mod tape;
pub mod instruction;
pub mod compiler;
pub mod executor;

pub use compiler::{compile, compile_str};
pub use error::{CompileError, RuntimeError};
pub use executor::{Executor, execute};
pub use instruction::{Direction, Instruction, Program};
pub use tape::{DEFAULT_TAPE_CAPACITY, Tape};
