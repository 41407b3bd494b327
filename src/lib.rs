//! ristretto is a small interpreter for the IJVM bytecode format: it loads
//! a binary program image (constant pool + instruction stream) and executes
//! it against an operand/local-variable stack and a heap of integer arrays.
//!
//! The crate is organized around the machine's components:
//!
//! * [`loader`] parses the on-disk image into an immutable [`loader::Image`].
//! * [`stack`] is the value stack, used both as the operand stack and as
//!   storage for every active frame's local variables.
//! * [`heap`] is the growable table of integer arrays behind NEWARRAY,
//!   IALOAD and IASTORE.
//! * [`bytecode`] is the fixed opcode table.
//! * [`runtime`] ties them together: the fetch-decode-execute loop, the
//!   call-frame protocol and the introspection surface used by test
//!   harnesses and debuggers.
pub mod bytecode;
pub mod heap;
pub mod loader;
pub mod runtime;
pub mod stack;

/// The machine's universal value type, a 32-bit two's-complement integer.
///
/// A `Word` doubles as a plain integer, a heap reference (index into the
/// array table) and a frame link (index into the value stack) depending on
/// the opcode that consumes it; the format carries no tags.
pub type Word = i32;
