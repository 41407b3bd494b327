//! Value stack for the IJVM machine.
//!
//! The stack plays two roles at once: it is the operand stack for
//! arithmetic and it stores every active frame's local variables. Locals
//! and frame bookkeeping go through indexed access at slots below the top;
//! only push/pop move the stack pointer, which is always the logical size.

use crate::Word;

/// Initial capacity in words. Growth doubles from here, delegated to
/// `Vec`; programs only ever observe the LIFO/ordering law, not the
/// growth points.
pub const INITIAL_CAPACITY: usize = 512;

/// Growable sequence of words with stack access on top and indexed
/// access below for local variables.
#[derive(Debug)]
pub struct Stack {
    data: Vec<Word>,
}

impl Stack {
    pub fn new() -> Self {
        Self {
            data: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    /// Logical size; the machine's stack pointer is defined as this value.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, value: Word) {
        self.data.push(value);
    }

    /// Remove and return the top word. `None` on an empty stack, which the
    /// machine treats as fatal.
    pub fn pop(&mut self) -> Option<Word> {
        self.data.pop()
    }

    /// Top word without removing it.
    pub fn top(&self) -> Option<Word> {
        self.data.last().copied()
    }

    /// Read the word at `index`, counted from the bottom. Used for local
    /// variables (`lv + i`) and for following frame links.
    pub fn get(&self, index: usize) -> Option<Word> {
        self.data.get(index).copied()
    }

    /// Write the word at `index` without touching the stack pointer.
    /// Fails if the slot is not within the current logical size.
    pub fn set(&mut self, index: usize, value: Word) -> Option<()> {
        let slot = self.data.get_mut(index)?;
        *slot = value;
        Some(())
    }

    /// Drop every word at or above `len`. Frame deallocation on IRETURN
    /// unwinds the whole callee frame with one call.
    pub fn truncate(&mut self, len: usize) {
        self.data.truncate(len);
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}
