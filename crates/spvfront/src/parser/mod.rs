//! SPIR-V word-stream reader.
//!
//! A module is a flat array of 32-bit words: a five word header followed by
//! instructions. Every instruction starts with a word holding the opcode in
//! the low 16 bits and the total word count (opcode word included) in the
//! high 16 bits. This module validates the header, decodes instructions one
//! at a time and keeps track of the `OpLine` debug location.

use anyhow::{bail, Context, Result};
use rspirv::spirv::Op;
use std::fmt;

/// First word of every SPIR-V module.
pub const MAGIC_NUMBER: u32 = 0x0723_0203;

/// Number of header words preceding the first instruction.
pub const HEADER_WORDS: usize = 5;

/// Lowest accepted version word (SPIR-V 1.0).
pub const MIN_VERSION: u32 = 0x0001_0000;

/// Universal limit on the ID bound.
pub const MAX_ID_BOUND: u32 = 0x003f_ffff;

const OPCODE_MASK: u32 = 0xffff;
const WORD_COUNT_SHIFT: u32 = 16;

/// Validated module header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleHeader {
    /// Raw version word: `0 | major | minor | 0`.
    pub version: u32,
    /// Generator magic of the producing tool.
    pub generator: u32,
    /// Every ID in the module is strictly below this bound.
    pub bound: u32,
}

impl ModuleHeader {
    pub fn major(&self) -> u8 {
        (self.version >> 16) as u8
    }

    pub fn minor(&self) -> u8 {
        (self.version >> 8) as u8
    }
}

/// Validate the five header words.
pub fn parse_header(words: &[u32]) -> Result<ModuleHeader> {
    if words.len() <= HEADER_WORDS {
        bail!(
            "module is {} words long; expected a {HEADER_WORDS}-word header followed by instructions",
            words.len()
        );
    }
    if words[0] != MAGIC_NUMBER {
        bail!("bad magic number {:#010x}", words[0]);
    }
    if words[1] < MIN_VERSION {
        bail!("unsupported SPIR-V version word {:#010x}", words[1]);
    }
    if words[4] != 0 {
        bail!("reserved header word is {:#x}, expected 0", words[4]);
    }
    if words[3] > MAX_ID_BOUND {
        bail!("ID bound {} exceeds the limit of {MAX_ID_BOUND}", words[3]);
    }
    Ok(ModuleHeader {
        version: words[1],
        generator: words[2],
        bound: words[3],
    })
}

/// Reassemble a byte buffer into words, accepting either byte order.
///
/// The byte order is detected from the magic number.
pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        bail!("module size {} is not a multiple of four bytes", bytes.len());
    }
    let head: [u8; 4] = bytes
        .get(0..4)
        .context("module is empty")?
        .try_into()
        .context("module is empty")?;
    let decode: fn([u8; 4]) -> u32 = if u32::from_le_bytes(head) == MAGIC_NUMBER {
        u32::from_le_bytes
    } else if u32::from_be_bytes(head) == MAGIC_NUMBER {
        u32::from_be_bytes
    } else {
        bail!("bad magic number {:#010x}", u32::from_le_bytes(head));
    };
    Ok(bytes
        .chunks_exact(4)
        .map(|c| decode([c[0], c[1], c[2], c[3]]))
        .collect())
}

// ── Source locations ─────────────────────────────────────────────────────────

/// Debug location set by the most recent `OpLine`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceLocation {
    /// ID of the `OpString` naming the file, if an `OpLine` is active.
    pub file: Option<u32>,
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.file {
            Some(file) => write!(f, "%{}:{}:{}", file, self.line, self.column),
            None => write!(f, "<no line info>"),
        }
    }
}

// ── Instructions ─────────────────────────────────────────────────────────────

/// One decoded instruction borrowed from the module's word stream.
#[derive(Debug, Clone, Copy)]
pub struct Instruction<'a> {
    pub opcode: u32,
    /// All words of the instruction, including the leading opcode word.
    pub words: &'a [u32],
    /// Word offset of the instruction within the module.
    pub offset: usize,
}

impl<'a> Instruction<'a> {
    pub fn op(&self) -> Option<Op> {
        Op::from_u32(self.opcode)
    }

    /// Human readable opcode name for diagnostics.
    pub fn name(&self) -> String {
        match self.op() {
            Some(op) => format!("Op{op:?}"),
            None => format!("opcode {}", self.opcode),
        }
    }

    /// Total word count, opcode word included.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Word `i` of the instruction (word 0 is the opcode word).
    pub fn word(&self, i: usize) -> Result<u32> {
        self.words
            .get(i)
            .copied()
            .with_context(|| format!("{} has {} words, operand {i} is missing", self.name(), self.len()))
    }

    /// Words `i..` of the instruction; empty when `i` is past the end.
    pub fn words_from(&self, i: usize) -> &'a [u32] {
        self.words.get(i..).unwrap_or(&[])
    }

    /// Decode a nul-terminated literal string starting at word `i`.
    ///
    /// Returns the string and the number of words it occupies.
    pub fn string(&self, i: usize) -> Result<(String, usize)> {
        decode_string(self.words_from(i))
            .with_context(|| format!("reading literal string operand of {}", self.name()))
    }
}

/// Decode a literal string packed four bytes per word, little-endian first.
pub fn decode_string(words: &[u32]) -> Result<(String, usize)> {
    let mut bytes = Vec::new();
    for (n, word) in words.iter().enumerate() {
        for byte in word.to_le_bytes() {
            if byte == 0 {
                let s = String::from_utf8(bytes).context("literal string is not valid UTF-8")?;
                return Ok((s, n + 1));
            }
            bytes.push(byte);
        }
    }
    bail!("literal string is not nul-terminated")
}

// ── Reader ───────────────────────────────────────────────────────────────────

/// Walks a `start..end` word range one instruction at a time.
///
/// `OpLine` and `OpNoLine` are consumed here to maintain the current
/// [`SourceLocation`]; they are never returned to the caller.
pub struct InstructionReader<'a> {
    words: &'a [u32],
    pos: usize,
    end: usize,
    location: SourceLocation,
}

impl<'a> InstructionReader<'a> {
    pub fn new(words: &'a [u32], start: usize, end: usize) -> Self {
        Self::with_location(words, start, end, SourceLocation::default())
    }

    /// Start a walk that inherits the location left by a previous walk.
    pub fn with_location(words: &'a [u32], start: usize, end: usize, location: SourceLocation) -> Self {
        Self {
            words,
            pos: start,
            end: end.min(words.len()),
            location,
        }
    }

    /// Word offset of the next instruction to decode.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn location(&self) -> SourceLocation {
        self.location
    }

    /// Decode the next instruction, or `None` once the range is exhausted.
    pub fn next_instruction(&mut self) -> Result<Option<Instruction<'a>>> {
        loop {
            if self.pos >= self.end {
                return Ok(None);
            }
            let first = self.words[self.pos];
            let opcode = first & OPCODE_MASK;
            let count = (first >> WORD_COUNT_SHIFT) as usize;
            if count == 0 {
                bail!("instruction at word {} has a word count of zero", self.pos);
            }
            if self.pos + count > self.end {
                bail!(
                    "instruction at word {} ({} words) runs past the end of the module",
                    self.pos,
                    count
                );
            }
            let inst = Instruction {
                opcode,
                words: &self.words[self.pos..self.pos + count],
                offset: self.pos,
            };
            self.pos += count;

            match inst.op() {
                Some(Op::Line) => {
                    self.location = SourceLocation {
                        file: Some(inst.word(1)?),
                        line: inst.word(2)?,
                        column: inst.word(3)?,
                    };
                }
                Some(Op::NoLine) => self.location = SourceLocation::default(),
                _ => return Ok(Some(inst)),
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
