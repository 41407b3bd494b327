//! Loader for IJVM binary images.
//!
//! An image is magic number, constant pool and instruction stream, with
//! every multi-byte field big-endian on the wire:
//!
//! | offset    | field                | size      |
//! |-----------|----------------------|-----------|
//! | 0         | magic (`0x1DEADFAD`) | 4         |
//! | 4         | pool origin, ignored | 4         |
//! | 8         | pool size in bytes   | 4         |
//! | 12        | pool words           | pool size |
//! | +size     | text origin, ignored | 4         |
//! | +size+4   | text size in bytes   | 4         |
//! | +size+8   | text bytes, verbatim | text size |
//!
//! Pool words are converted to host order here; text bytes are stored
//! untouched, the runtime reinterprets multi-byte operands itself.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt};

use crate::Word;

/// First four bytes of every valid IJVM binary.
pub const MAGIC_NUMBER: u32 = 0x1DEA_DFAD;

type Result<T> = std::result::Result<T, LoadError>;

/// Failures while parsing an image. No machine is constructed on any of
/// these; a failed load is terminal for that attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum LoadError {
    /// The first word did not match [`MAGIC_NUMBER`]. Nothing beyond the
    /// magic is read in this case.
    BadMagic(u32),
    /// The stream ended inside a field.
    Truncated,
    /// Constant pool byte length is not a multiple of the word size.
    MisalignedPool(u32),
    /// The underlying source failed outright (not just end-of-stream).
    Io(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::BadMagic(found) => {
                write!(f, "bad magic number 0x{found:08X}, expected 0x{MAGIC_NUMBER:08X}")
            }
            Self::Truncated => write!(f, "truncated image"),
            Self::MisalignedPool(size) => {
                write!(f, "constant pool size {size} is not a multiple of 4")
            }
            Self::Io(err) => write!(f, "i/o error while loading: {err}"),
        }
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::Truncated,
            _ => Self::Io(err.to_string()),
        }
    }
}

/// A loaded program image. Immutable for the machine's lifetime: the
/// runtime reads the pool and the text, it never writes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    constant_pool: Vec<Word>,
    text: Vec<u8>,
}

impl Image {
    /// Build an image directly from its parts, bypassing the wire format.
    /// Used by harnesses that assemble programs in memory.
    pub fn new(constant_pool: Vec<Word>, text: Vec<u8>) -> Self {
        Self { constant_pool, text }
    }

    /// Parse an image from a byte source.
    pub fn parse<R: Read>(source: &mut R) -> Result<Self> {
        let magic = source.read_u32::<BigEndian>()?;
        if magic != MAGIC_NUMBER {
            return Err(LoadError::BadMagic(magic));
        }

        // Constant pool origin is a format artifact, skipped.
        let _pool_origin = source.read_u32::<BigEndian>()?;
        let pool_size = source.read_u32::<BigEndian>()?;
        if pool_size % 4 != 0 {
            return Err(LoadError::MisalignedPool(pool_size));
        }
        let mut constant_pool = Vec::with_capacity(pool_size as usize / 4);
        for _ in 0..pool_size / 4 {
            constant_pool.push(source.read_i32::<BigEndian>()?);
        }

        // Text origin is skipped the same way.
        let _text_origin = source.read_u32::<BigEndian>()?;
        let text_size = source.read_u32::<BigEndian>()?;
        let mut text = vec![0u8; text_size as usize];
        source.read_exact(&mut text)?;

        Ok(Self { constant_pool, text })
    }

    /// Load an image from a file on disk.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::parse(&mut BufReader::new(file))
    }

    /// Constant pool, addressed by word index.
    pub fn constant_pool(&self) -> &[Word] {
        &self.constant_pool
    }

    /// Raw instruction bytes, addressed by byte offset.
    pub fn text(&self) -> &[u8] {
        &self.text
    }
}
