//! Execution engine for the IJVM machine.
//!
//! [`Machine`] owns the loaded image, the value stack and the heap, and
//! runs the fetch-decode-execute loop. Every opcode handler consumes its
//! own operand bytes and advances `pc` past the whole instruction before
//! returning; branches, INVOKEVIRTUAL, TAILCALL and IRETURN redirect `pc`
//! instead.
//!
//! Call frames live entirely inside the value stack. A frame is the
//! contiguous region
//!
//! ```text
//! [link][arg_0..arg_{A-1}][local_0..local_{L-1}][saved_pc][saved_lv]
//! ```
//!
//! where `link`, stored at the frame's local slot 0, is the stack index
//! of the `saved_pc` slot. IRETURN follows the link to find the frame
//! boundary, so no separate frame-pointer stack exists.

use std::fmt;
use std::io::{Read, Write};
use std::path::Path;

use crate::bytecode::OPCode;
use crate::heap::Heap;
use crate::loader::{Image, LoadError};
use crate::stack::Stack;
use crate::Word;

/// Scratch local slots available to top-level code before any call.
const TOP_LEVEL_SLOTS: usize = 256;

/// Fresh local-variable slots are initialized to 1, not 0. The format
/// defines this; programs that read locals before writing them observe it.
const LOCAL_INIT: Word = 1;

type Result<T> = std::result::Result<T, Fault>;

/// Fatal runtime faults. Unlike the recoverable class (unknown opcode,
/// heap errors), a `Fault` is returned as `Err` from [`Machine::step`]
/// and the caller is expected to drop the machine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Pop or top on a logically empty operand stack.
    StackUnderflow,
    /// Local-variable or frame access outside the live stack region.
    BadSlot(usize),
    /// A frame link or saved register held a value that cannot name a
    /// stack slot or text address.
    BadFrameLink(Word),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::StackUnderflow => write!(f, "operand stack underflow"),
            Self::BadSlot(index) => write!(f, "stack slot {index} out of range"),
            Self::BadFrameLink(word) => write!(f, "corrupt frame link {word}"),
        }
    }
}

/// The IJVM machine: image, value stack, heap, registers and the byte
/// streams behind IN and OUT.
pub struct Machine {
    image: Image,
    stack: Stack,
    heap: Heap,
    /// Byte offset of the next instruction; `pc >= text.len()` means the
    /// program has finished.
    pc: usize,
    /// Stack index of the current frame's local slot 0.
    lv: usize,
    /// Active-frame count: 1 for top-level code, +1 per INVOKEVIRTUAL,
    /// -1 per IRETURN, unchanged by TAILCALL.
    call_depth: usize,
    input: Box<dyn Read>,
    output: Box<dyn Write>,
}

// The input/output streams carry no printable state, so they are left
// out of the debug form.
impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Machine")
            .field("image", &self.image)
            .field("stack", &self.stack)
            .field("heap", &self.heap)
            .field("pc", &self.pc)
            .field("lv", &self.lv)
            .field("call_depth", &self.call_depth)
            .finish_non_exhaustive()
    }
}

impl Machine {
    /// Build a machine around a loaded image. The stack starts with
    /// [`TOP_LEVEL_SLOTS`] scratch locals so top-level code can use
    /// ILOAD/ISTORE before any call.
    pub fn new(image: Image, input: Box<dyn Read>, output: Box<dyn Write>) -> Self {
        let mut stack = Stack::new();
        for _ in 0..TOP_LEVEL_SLOTS {
            stack.push(LOCAL_INIT);
        }
        Self {
            image,
            stack,
            heap: Heap::new(),
            pc: 0,
            lv: 0,
            call_depth: 1,
            input,
            output,
        }
    }

    /// Load an image from disk and build a machine around it.
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        input: Box<dyn Read>,
        output: Box<dyn Write>,
    ) -> std::result::Result<Self, LoadError> {
        let image = Image::from_file(path)?;
        Ok(Self::new(image, input, output))
    }

    /// Execute instructions until the program finishes. A recoverable
    /// error halts the program and still returns `Ok`; only a [`Fault`]
    /// surfaces as `Err`.
    pub fn run(&mut self) -> Result<()> {
        while !self.finished() {
            self.step()?;
        }
        Ok(())
    }

    /// Fetch, decode and execute one instruction.
    pub fn step(&mut self) -> Result<()> {
        if self.finished() {
            return Ok(());
        }
        let addr = self.pc;
        let byte = self.image.text()[addr];
        let Some(op) = OPCode::from_u8(byte) else {
            self.diagnostic(format!("unknown opcode 0x{byte:02X} at {addr}"));
            self.halt();
            return Ok(());
        };
        self.execute(op, addr)
    }

    fn execute(&mut self, op: OPCode, addr: usize) -> Result<()> {
        match op {
            OPCode::Nop => {
                self.pc = addr + 1;
            }
            OPCode::Halt => {
                self.halt();
            }
            OPCode::Err => {
                self.diagnostic(format!("ERR at {addr}"));
                self.halt();
            }
            OPCode::BiPush => {
                let Some(byte) = self.operand_u8(addr + 1) else {
                    return Ok(self.truncated(op, addr));
                };
                // Immediate is sign-extended to a full word.
                self.stack.push(Word::from(byte as i8));
                self.pc = addr + 2;
            }
            OPCode::Dup => {
                let top = self.stack.top().ok_or(Fault::StackUnderflow)?;
                self.stack.push(top);
                self.pc = addr + 1;
            }
            OPCode::Pop => {
                self.pop()?;
                self.pc = addr + 1;
            }
            OPCode::Swap => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(b);
                self.stack.push(a);
                self.pc = addr + 1;
            }
            OPCode::IAdd => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(a.wrapping_add(b));
                self.pc = addr + 1;
            }
            OPCode::ISub => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(a.wrapping_sub(b));
                self.pc = addr + 1;
            }
            OPCode::IAnd => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(a & b);
                self.pc = addr + 1;
            }
            OPCode::IOr => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(a | b);
                self.pc = addr + 1;
            }
            OPCode::In => {
                // One byte from the input source; end-of-input pushes the
                // sentinel 0 instead of blocking. A failing source also
                // yields the sentinel, but with a diagnostic so it is not
                // mistaken for a clean end-of-input.
                let mut buf = [0u8; 1];
                let value = match self.input.read(&mut buf) {
                    Ok(1) => Word::from(buf[0]),
                    Ok(_) => 0,
                    Err(err) => {
                        self.diagnostic(format!("IN failed at {addr}: {err}"));
                        0
                    }
                };
                self.stack.push(value);
                self.pc = addr + 1;
            }
            OPCode::Out => {
                let value = self.pop()?;
                let _ = self.output.write_all(&[value as u8]);
                self.pc = addr + 1;
            }
            OPCode::Goto => {
                let Some(offset) = self.operand_u16(addr + 1) else {
                    return Ok(self.truncated(op, addr));
                };
                self.branch(addr, offset as i16);
            }
            OPCode::IfEq => {
                let Some(offset) = self.operand_u16(addr + 1) else {
                    return Ok(self.truncated(op, addr));
                };
                if self.pop()? == 0 {
                    self.branch(addr, offset as i16);
                } else {
                    self.pc = addr + 3;
                }
            }
            OPCode::IfLt => {
                let Some(offset) = self.operand_u16(addr + 1) else {
                    return Ok(self.truncated(op, addr));
                };
                if self.pop()? < 0 {
                    self.branch(addr, offset as i16);
                } else {
                    self.pc = addr + 3;
                }
            }
            OPCode::IfICmpEq => {
                let Some(offset) = self.operand_u16(addr + 1) else {
                    return Ok(self.truncated(op, addr));
                };
                let b = self.pop()?;
                let a = self.pop()?;
                if a == b {
                    self.branch(addr, offset as i16);
                } else {
                    self.pc = addr + 3;
                }
            }
            OPCode::LdcW => {
                let Some(index) = self.operand_u16(addr + 1) else {
                    return Ok(self.truncated(op, addr));
                };
                match self.image.constant_pool().get(index as usize) {
                    Some(&word) => {
                        self.stack.push(word);
                        self.pc = addr + 3;
                    }
                    None => {
                        self.diagnostic(format!("LDC_W index {index} out of range"));
                        self.halt();
                    }
                }
            }
            OPCode::ILoad => {
                let Some(index) = self.operand_u8(addr + 1) else {
                    return Ok(self.truncated(op, addr));
                };
                let value = self.local(index as usize)?;
                self.stack.push(value);
                self.pc = addr + 2;
            }
            OPCode::IStore => {
                let Some(index) = self.operand_u8(addr + 1) else {
                    return Ok(self.truncated(op, addr));
                };
                let value = self.pop()?;
                self.set_local(index as usize, value)?;
                self.pc = addr + 2;
            }
            OPCode::IInc => {
                let (Some(index), Some(delta)) =
                    (self.operand_u8(addr + 1), self.operand_u8(addr + 2))
                else {
                    return Ok(self.truncated(op, addr));
                };
                let index = index as usize;
                let value = self.local(index)?;
                self.set_local(index, value.wrapping_add(Word::from(delta as i8)))?;
                self.pc = addr + 3;
            }
            OPCode::Wide => self.wide(addr)?,
            OPCode::NewArray => {
                let count = self.pop()?;
                match self.heap.allocate(count) {
                    Ok(reference) => {
                        self.stack.push(reference);
                        self.pc = addr + 1;
                    }
                    Err(err) => {
                        self.diagnostic(err.to_string());
                        self.halt();
                    }
                }
            }
            OPCode::IALoad => {
                let reference = self.pop()?;
                let index = self.pop()?;
                match self.heap.load(reference, index) {
                    Ok(value) => {
                        self.stack.push(value);
                        self.pc = addr + 1;
                    }
                    Err(err) => {
                        self.diagnostic(err.to_string());
                        self.halt();
                    }
                }
            }
            OPCode::IAStore => {
                let reference = self.pop()?;
                let index = self.pop()?;
                let value = self.pop()?;
                match self.heap.store(reference, index, value) {
                    Ok(()) => self.pc = addr + 1,
                    Err(err) => {
                        self.diagnostic(err.to_string());
                        self.halt();
                    }
                }
            }
            OPCode::InvokeVirtual => self.invoke(addr)?,
            OPCode::IReturn => self.ireturn()?,
            OPCode::TailCall => self.tailcall(addr)?,
        }
        Ok(())
    }

    /// WIDE prefix: the next opcode byte selects ILOAD/ISTORE/IINC with a
    /// 16-bit unsigned local index (the IINC delta stays one byte).
    fn wide(&mut self, addr: usize) -> Result<()> {
        let Some(sub) = self.operand_u8(addr + 1) else {
            return Ok(self.truncated(OPCode::Wide, addr));
        };
        match OPCode::from_u8(sub) {
            Some(OPCode::ILoad) => {
                let Some(index) = self.operand_u16(addr + 2) else {
                    return Ok(self.truncated(OPCode::Wide, addr));
                };
                let value = self.local(index as usize)?;
                self.stack.push(value);
                self.pc = addr + 4;
            }
            Some(OPCode::IStore) => {
                let Some(index) = self.operand_u16(addr + 2) else {
                    return Ok(self.truncated(OPCode::Wide, addr));
                };
                let value = self.pop()?;
                self.set_local(index as usize, value)?;
                self.pc = addr + 4;
            }
            Some(OPCode::IInc) => {
                let (Some(index), Some(delta)) =
                    (self.operand_u16(addr + 2), self.operand_u8(addr + 4))
                else {
                    return Ok(self.truncated(OPCode::Wide, addr));
                };
                let index = index as usize;
                let value = self.local(index)?;
                self.set_local(index, value.wrapping_add(Word::from(delta as i8)))?;
                self.pc = addr + 5;
            }
            _ => {
                self.diagnostic(format!("WIDE prefix on opcode 0x{sub:02X} at {addr}"));
                self.halt();
            }
        }
        Ok(())
    }

    /// INVOKEVIRTUAL: push a new frame over the already-pushed arguments
    /// and jump to the callee.
    ///
    /// The constant-pool entry at the 16-bit operand is the callee's
    /// entry address in text. The callee header is two big-endian 16-bit
    /// fields: argument count A (counting the receiver slot the link
    /// overwrites) and local count L. The first real instruction is at
    /// entry + 4.
    fn invoke(&mut self, addr: usize) -> Result<()> {
        let Some(index) = self.operand_u16(addr + 1) else {
            return Ok(self.truncated(OPCode::InvokeVirtual, addr));
        };
        let Some((entry, nargs, nlocals)) = self.method_header(index) else {
            return Ok(());
        };
        let sp = self.stack.len();
        if nargs > sp {
            return Err(Fault::StackUnderflow);
        }
        // The arguments already on the stack become the new frame's
        // locals 0..A-1.
        let frame_base = sp - nargs;
        let return_pc = addr + 3;
        let saved_lv = self.lv;
        for _ in 0..nlocals {
            self.stack.push(LOCAL_INIT);
        }
        let link = self.stack.len();
        self.stack.push(return_pc as Word);
        self.stack.push(saved_lv as Word);
        self.lv = frame_base;
        // Local slot 0 (the receiver slot) holds the link to saved_pc.
        self.stack
            .set(frame_base, link as Word)
            .ok_or(Fault::BadSlot(frame_base))?;
        self.pc = entry + 4;
        self.call_depth += 1;
        Ok(())
    }

    /// IRETURN: pop the result, unwind the whole frame through the link
    /// and leave the result where the argument region began.
    fn ireturn(&mut self) -> Result<()> {
        let result = self.pop()?;
        let link = self.slot_index(self.word_at(self.lv)?)?;
        let saved_pc = self.word_at(link)?;
        let saved_lv = self.word_at(link + 1)?;
        let frame_base = self.lv;
        self.stack.truncate(frame_base);
        self.stack.push(result);
        self.pc = self.slot_index(saved_pc)?;
        self.lv = self.slot_index(saved_lv)?;
        self.call_depth = self.call_depth.saturating_sub(1);
        Ok(())
    }

    /// TAILCALL: replace the current frame with the callee's in place.
    ///
    /// The saved pc/lv are carried forward unchanged, so the eventual
    /// IRETURN goes back to the original caller and the call depth does
    /// not grow across a chain of tail calls.
    fn tailcall(&mut self, addr: usize) -> Result<()> {
        let Some(index) = self.operand_u16(addr + 1) else {
            return Ok(self.truncated(OPCode::TailCall, addr));
        };
        let Some((entry, nargs, nlocals)) = self.method_header(index) else {
            return Ok(());
        };
        let link = self.slot_index(self.word_at(self.lv)?)?;
        let saved_pc = self.word_at(link)?;
        let saved_lv = self.word_at(link + 1)?;
        let sp = self.stack.len();
        if nargs > sp {
            return Err(Fault::StackUnderflow);
        }
        // Slide the freshly pushed arguments down over the frame base,
        // then rebuild locals, saved registers and link in place.
        let arg_base = sp - nargs;
        for i in 0..nargs {
            let word = self.word_at(arg_base + i)?;
            self.stack
                .set(self.lv + i, word)
                .ok_or(Fault::BadSlot(self.lv + i))?;
        }
        self.stack.truncate(self.lv + nargs);
        for _ in 0..nlocals {
            self.stack.push(LOCAL_INIT);
        }
        let new_link = self.stack.len();
        self.stack.push(saved_pc);
        self.stack.push(saved_lv);
        self.stack
            .set(self.lv, new_link as Word)
            .ok_or(Fault::BadSlot(self.lv))?;
        self.pc = entry + 4;
        Ok(())
    }

    /// Resolve a constant-pool index to a callee entry address plus its
    /// header fields. Bad pool indices, negative entries and truncated
    /// headers are recoverable: diagnostic, halt, `None`.
    fn method_header(&mut self, pool_index: u16) -> Option<(usize, usize, usize)> {
        let entry = match self.image.constant_pool().get(pool_index as usize) {
            Some(&word) if word >= 0 => word as usize,
            Some(&word) => {
                self.diagnostic(format!("method address {word} is negative"));
                self.halt();
                return None;
            }
            None => {
                self.diagnostic(format!("method index {pool_index} out of range"));
                self.halt();
                return None;
            }
        };
        let (Some(nargs), Some(nlocals)) =
            (self.operand_u16(entry), self.operand_u16(entry + 2))
        else {
            self.diagnostic(format!("truncated method header at {entry}"));
            self.halt();
            return None;
        };
        Some((entry, nargs as usize, nlocals as usize))
    }

    // ---- introspection, consumed by harnesses and debuggers ----

    /// Byte offset of the next instruction.
    pub fn get_program_counter(&self) -> usize {
        self.pc
    }

    /// Top of the operand stack without popping it.
    pub fn tos(&self) -> Result<Word> {
        self.stack.top().ok_or(Fault::StackUnderflow)
    }

    /// Whether the program has run off the end of the text.
    pub fn finished(&self) -> bool {
        self.pc >= self.image.text().len()
    }

    /// Local variable `i` of the active frame.
    pub fn get_local_variable(&self, index: usize) -> Result<Word> {
        self.word_at(self.lv + index)
    }

    /// Constant-pool entry by index. Out-of-range indices report 0 with
    /// a diagnostic on stderr rather than failing.
    pub fn get_constant(&self, index: i32) -> Word {
        if index < 0 || index as usize >= self.image.constant_pool().len() {
            eprintln!("constant index out of bounds: {index}");
            return 0;
        }
        self.image.constant_pool()[index as usize]
    }

    /// Raw instruction bytes.
    pub fn get_text(&self) -> &[u8] {
        self.image.text()
    }

    pub fn get_text_size(&self) -> usize {
        self.image.text().len()
    }

    /// Opcode byte at the program counter; 0 once the program finished.
    pub fn get_instruction(&self) -> u8 {
        self.image.text().get(self.pc).copied().unwrap_or(0)
    }

    /// Active-frame count, starting at 1 for top-level code.
    pub fn get_call_stack_size(&self) -> usize {
        self.call_depth
    }

    /// Whether a heap reference was collected; always `false`, the
    /// machine has no collector.
    pub fn is_heap_freed(&self, reference: Word) -> bool {
        self.heap.is_freed(reference)
    }

    /// Stack pointer, defined as the value stack's logical size.
    pub fn stack_pointer(&self) -> usize {
        self.stack.len()
    }

    // ---- internals ----

    fn pop(&mut self) -> Result<Word> {
        self.stack.pop().ok_or(Fault::StackUnderflow)
    }

    fn word_at(&self, index: usize) -> Result<Word> {
        self.stack.get(index).ok_or(Fault::BadSlot(index))
    }

    fn local(&self, index: usize) -> Result<Word> {
        self.word_at(self.lv + index)
    }

    fn set_local(&mut self, index: usize, value: Word) -> Result<()> {
        let slot = self.lv + index;
        self.stack.set(slot, value).ok_or(Fault::BadSlot(slot))
    }

    /// Reinterpret a saved register or link word as a stack/text index.
    fn slot_index(&self, word: Word) -> Result<usize> {
        usize::try_from(word).map_err(|_| Fault::BadFrameLink(word))
    }

    fn operand_u8(&self, at: usize) -> Option<u8> {
        self.image.text().get(at).copied()
    }

    fn operand_u16(&self, at: usize) -> Option<u16> {
        let text = self.image.text();
        let hi = *text.get(at)?;
        let lo = *text.get(at + 1)?;
        Some(u16::from(hi) << 8 | u16::from(lo))
    }

    /// Branch displacements are signed and relative to the address of
    /// the branch opcode itself, not the address after the instruction.
    fn branch(&mut self, addr: usize, offset: i16) {
        self.pc = addr.wrapping_add_signed(offset as isize);
    }

    /// Force termination: the run loop stops at the next finished check.
    fn halt(&mut self) {
        self.pc = self.image.text().len();
    }

    fn truncated(&mut self, op: OPCode, addr: usize) {
        self.diagnostic(format!("truncated {} at {addr}", op.mnemonic()));
        self.halt();
    }

    /// Advisory diagnostic on the output sink; not part of the program's
    /// semantic output.
    fn diagnostic(&mut self, message: String) {
        let _ = writeln!(self.output, "error: {message}");
    }
}
