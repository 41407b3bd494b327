//! Heap of integer arrays for NEWARRAY, IALOAD and IASTORE.
//!
//! Arrays live in a growable table and are referred to by table index
//! only, never by location, so a reference is a plain [`Word`] that can
//! sit on the value stack or in the constant pool like any other integer.
//! Nothing is ever freed; the machine has no collector.

use std::fmt;

use crate::Word;

/// Initial capacity of the array table; growth doubles from here.
pub const INITIAL_TABLE_CAPACITY: usize = 10;

type Result<T> = std::result::Result<T, HeapError>;

/// Program-level heap faults. All of these are recoverable: the runtime
/// prints the diagnostic and forces termination, the table stays intact.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeapError {
    /// NEWARRAY with a zero or negative element count.
    InvalidCount(Word),
    /// A word used as an array reference that names no table entry.
    BadReference(Word),
    /// Array index outside `[0, len)`.
    OutOfBounds { reference: Word, index: Word, len: usize },
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidCount(count) => {
                write!(f, "invalid array size {count}")
            }
            Self::BadReference(reference) => {
                write!(f, "invalid array reference {reference}")
            }
            Self::OutOfBounds { reference, index, len } => {
                write!(
                    f,
                    "array index {index} out of bounds for array {reference} of length {len}"
                )
            }
        }
    }
}

/// Table of heap-resident arrays, indexed by reference.
#[derive(Debug)]
pub struct Heap {
    arrays: Vec<Vec<Word>>,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            arrays: Vec::with_capacity(INITIAL_TABLE_CAPACITY),
        }
    }

    /// Allocate a zero-filled array of `count` words and return its
    /// reference. Rejects non-positive counts.
    pub fn allocate(&mut self, count: Word) -> Result<Word> {
        if count <= 0 {
            return Err(HeapError::InvalidCount(count));
        }
        let reference = self.arrays.len() as Word;
        self.arrays.push(vec![0; count as usize]);
        Ok(reference)
    }

    /// Read `array[index]` for the array named by `reference`.
    pub fn load(&self, reference: Word, index: Word) -> Result<Word> {
        let array = self.lookup(reference)?;
        let len = array.len();
        if index < 0 || index as usize >= len {
            return Err(HeapError::OutOfBounds { reference, index, len });
        }
        Ok(array[index as usize])
    }

    /// Write `array[index] = value`. Bounds are checked before anything
    /// is touched, so a failing store leaves the array unchanged.
    pub fn store(&mut self, reference: Word, index: Word, value: Word) -> Result<()> {
        let array = self.lookup(reference)?;
        let len = array.len();
        if index < 0 || index as usize >= len {
            return Err(HeapError::OutOfBounds { reference, index, len });
        }
        self.arrays[reference as usize][index as usize] = value;
        Ok(())
    }

    /// Number of arrays in the table.
    pub fn count(&self) -> usize {
        self.arrays.len()
    }

    /// Whether the array behind `reference` has been collected. There is
    /// no collector, so the answer is always `false`.
    pub fn is_freed(&self, _reference: Word) -> bool {
        false
    }

    fn lookup(&self, reference: Word) -> Result<&Vec<Word>> {
        if reference < 0 {
            return Err(HeapError::BadReference(reference));
        }
        self.arrays
            .get(reference as usize)
            .ok_or(HeapError::BadReference(reference))
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_zero_filled_arrays() {
        let mut heap = Heap::new();
        let a = heap.allocate(4).unwrap();
        let b = heap.allocate(2).unwrap();
        assert_ne!(a, b);
        for i in 0..4 {
            assert_eq!(heap.load(a, i), Ok(0));
        }
        heap.store(a, 2, 77).unwrap();
        assert_eq!(heap.load(a, 2), Ok(77));
        // The second array is untouched.
        assert_eq!(heap.load(b, 0), Ok(0));
    }

    #[test]
    fn rejects_zero_and_negative_counts() {
        let mut heap = Heap::new();
        assert_eq!(heap.allocate(0), Err(HeapError::InvalidCount(0)));
        assert_eq!(heap.allocate(-5), Err(HeapError::InvalidCount(-5)));
        // Failed allocations leave the table empty.
        assert_eq!(heap.count(), 0);
    }

    #[test]
    fn bounds_checks_leave_contents_unchanged() {
        let mut heap = Heap::new();
        let a = heap.allocate(3).unwrap();
        heap.store(a, 0, 10).unwrap();
        heap.store(a, 1, 20).unwrap();
        heap.store(a, 2, 30).unwrap();

        assert!(heap.store(a, 3, 99).is_err());
        assert!(heap.store(a, -1, 99).is_err());
        assert!(heap.load(a, 3).is_err());

        assert_eq!(heap.load(a, 0), Ok(10));
        assert_eq!(heap.load(a, 1), Ok(20));
        assert_eq!(heap.load(a, 2), Ok(30));
    }

    #[test]
    fn unknown_references_are_reported() {
        let mut heap = Heap::new();
        assert_eq!(heap.load(0, 0), Err(HeapError::BadReference(0)));
        assert_eq!(heap.store(7, 0, 1), Err(HeapError::BadReference(7)));
        assert_eq!(heap.load(-1, 0), Err(HeapError::BadReference(-1)));
    }

    #[test]
    fn table_grows_past_initial_capacity_without_losing_arrays() {
        let mut heap = Heap::new();
        let mut refs = Vec::new();
        for i in 0..(INITIAL_TABLE_CAPACITY as Word * 3) {
            let r = heap.allocate(1).unwrap();
            heap.store(r, 0, i).unwrap();
            refs.push(r);
        }
        for (i, r) in refs.iter().enumerate() {
            assert_eq!(heap.load(*r, 0), Ok(i as Word));
        }
    }

    #[test]
    fn references_are_never_freed() {
        let mut heap = Heap::new();
        let a = heap.allocate(1).unwrap();
        assert!(!heap.is_freed(a));
        // Even nonsense references report unfreed; there is no collector
        // to have freed them.
        assert!(!heap.is_freed(1234));
    }
}
