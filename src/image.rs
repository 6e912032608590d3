//! Memory images, the input to the simulator.
//!
//! A [`MemImage`] is a set of non-overlapping blocks of words (each placed at a starting address),
//! an entry point, and a [`SymbolTable`] which labels addresses for presentation.
//!
//! Memory images can be built directly, read from a classic LC-3 object file
//! ([`MemImage::from_obj_bytes`]), or parsed from a small text format (via [`str::parse`]):
//!
//! ```text
//! ; comments start with semicolons
//! .orig x3000          ; opens a block at x3000
//! .entry MAIN          ; sets the entry point (a number or a label)
//! MAIN: x5020          ; a label, then a word (x3000 is labeled MAIN)
//!       #12            ; words can be written in decimal,
//!       -1             ; negative decimal,
//!       .fill x-1      ; or with .fill, which also accepts labels
//!       .fill MAIN
//! .end                 ; closes the block (optional at the end of the file)
//! ```
//!
//! Anything starting with `x` or `X` followed by a hex digit is read as a hex number,
//! so labels cannot start that way: `XAB` is the word `x00AB`, and `xa_loop` is an invalid hex literal.
//!
//! ```
//! use lc3_sim_core::image::MemImage;
//!
//! let image: MemImage = "
//!     .orig x3000
//!     START: x1021
//!            .fill START
//!     .end
//! ".parse().unwrap();
//!
//! assert_eq!(image.entry(), 0x3000);
//! assert_eq!(image.blocks().collect::<Vec<_>>(), [(0x3000, &[0x1021, 0x3000][..])]);
//! assert_eq!(image.symbols().lookup_label("start"), Some(0x3000));
//! ```

pub mod lex;

use std::collections::BTreeMap;

use logos::Logos;

use crate::sim::USER_START;
use lex::{LexErr, Token};

/// Errors raised when building or reading a memory image.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum ImageErr {
    /// The block does not fit in memory (it would run past `xFFFF`).
    #[error("block at x{start:04X} with {len} word(s) runs past xFFFF")]
    InvalidAddress {
        /// The starting address of the block.
        start: u16,
        /// The number of words in the block.
        len: usize
    },
    /// The block overlaps a block which was already added.
    #[error("block at x{start:04X} overlaps block at x{other:04X}")]
    Overlap {
        /// The starting address of the block which was being added.
        start: u16,
        /// The starting address of the existing block.
        other: u16
    },
    /// An object file had an odd number of bytes.
    #[error("object file has an odd number of bytes")]
    OddObjLength,
    /// An object file did not have an origin word.
    #[error("object file is missing its origin")]
    MissingOrigin,
    /// A text image could not be parsed.
    #[error("line {line}: {kind}")]
    Text {
        /// The line of the error (1-indexed).
        line: usize,
        /// The kind of error.
        kind: TextErrKind
    }
}

/// Kinds of errors which can occur in text images.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum TextErrKind {
    /// A token could not be lexed.
    #[error("{0}")]
    Lex(#[from] LexErr),
    /// The directive does not exist.
    #[error("unknown directive .{0}")]
    UnknownDirective(String),
    /// The directive needs an operand.
    #[error(".{0} requires an operand")]
    MissingOperand(String),
    /// A token appeared where it was not expected.
    #[error("unexpected token")]
    UnexpectedToken,
    /// A `.orig` appeared before the previous block was closed.
    #[error(".orig inside of an open block (missing .end)")]
    OrigInsideBlock,
    /// A word, label or `.end` appeared outside of a block.
    #[error("not inside a block (missing .orig)")]
    OutsideBlock,
    /// A label was defined twice.
    #[error("label {0} was already defined")]
    DuplicateLabel(String),
    /// A label was used but never defined.
    #[error("label {0} was never defined")]
    UndefinedLabel(String),
    /// The block opened on this line could not be added to the image.
    #[error("{0}")]
    Block(Box<ImageErr>)
}

/// A mapping between labels and addresses.
///
/// Labels are case-insensitive, and are stored in uppercase.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    labels: BTreeMap<String, u16>
}
impl SymbolTable {
    /// Creates an empty symbol table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Labels the given address.
    ///
    /// This returns false (and does nothing) if the label is already defined.
    pub fn insert(&mut self, label: &str, addr: u16) -> bool {
        use std::collections::btree_map::Entry;

        match self.labels.entry(label.to_uppercase()) {
            Entry::Vacant(e) => {
                e.insert(addr);
                true
            },
            Entry::Occupied(_) => false,
        }
    }

    /// Gets the address of a given label (if it exists).
    pub fn lookup_label(&self, label: &str) -> Option<u16> {
        self.labels.get(&label.to_uppercase()).copied()
    }

    /// Gets the label at a given address (if it exists).
    ///
    /// If multiple labels are at this address, the alphabetically first one is returned.
    pub fn rev_lookup_label(&self, addr: u16) -> Option<&str> {
        self.labels.iter()
            .find(|&(_, &a)| a == addr)
            .map(|(label, _)| &**label)
    }

    /// Iterates over all labels and their addresses, in alphabetical order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> + '_ {
        self.labels.iter().map(|(label, &addr)| (&**label, addr))
    }

    /// The number of labels.
    pub fn len(&self) -> usize {
        self.labels.len()
    }
    /// Whether there are no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// A memory image which can be loaded into the simulator.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemImage {
    /// Invariants:
    /// - Blocks do not overlap.
    /// - Blocks do not run past xFFFF.
    /// - Blocks are not empty.
    blocks: BTreeMap<u16, Vec<u16>>,
    /// The start of the first block which was added.
    first: Option<u16>,
    entry: Option<u16>,
    symbols: SymbolTable
}
impl MemImage {
    /// Creates an empty memory image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a block of words starting at the given address.
    ///
    /// Empty blocks are accepted and ignored.
    ///
    /// # Errors
    ///
    /// Fails if the block would run past `xFFFF` or overlaps a previously added block.
    ///
    /// ```
    /// use lc3_sim_core::image::{ImageErr, MemImage};
    ///
    /// let mut image = MemImage::new();
    /// image.add_block(0x3000, vec![0; 4]).unwrap();
    /// assert_eq!(image.add_block(0x3003, vec![0]), Err(ImageErr::Overlap { start: 0x3003, other: 0x3000 }));
    /// assert_eq!(image.add_block(0xFFFF, vec![0; 2]), Err(ImageErr::InvalidAddress { start: 0xFFFF, len: 2 }));
    /// ```
    pub fn add_block(&mut self, start: u16, words: Vec<u16>) -> Result<(), ImageErr> {
        if words.is_empty() { return Ok(()) };

        let end = usize::from(start) + words.len();
        if end > 1 << 16 {
            return Err(ImageErr::InvalidAddress { start, len: words.len() });
        }

        let prev = self.blocks.range(..=start).next_back()
            .filter(|&(&s, w)| usize::from(s) + w.len() > usize::from(start));
        let next = self.blocks.range(start..).next()
            .filter(|&(&s, _)| usize::from(s) < end);
        if let Some((&other, _)) = prev.or(next) {
            return Err(ImageErr::Overlap { start, other });
        }

        self.first.get_or_insert(start);
        self.blocks.insert(start, words);
        Ok(())
    }

    /// Sets the entry point.
    pub fn set_entry(&mut self, entry: u16) {
        self.entry = Some(entry);
    }
    /// The entry point of this image.
    ///
    /// If none was set, this is the start of the first block added (or `x3000` if there are no blocks).
    pub fn entry(&self) -> u16 {
        self.entry
            .or(self.first)
            .unwrap_or(USER_START)
    }

    /// Iterates over the blocks of this image, in order of address.
    pub fn blocks(&self) -> impl Iterator<Item = (u16, &[u16])> + '_ {
        self.blocks.iter().map(|(&start, words)| (start, words.as_slice()))
    }

    /// The symbol table of this image.
    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }
    /// Mutable access to the symbol table of this image.
    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    /// Reads a classic LC-3 object file.
    ///
    /// The file consists of big-endian words, where the first word is the origin
    /// and the remaining words are placed in memory starting at the origin.
    /// The entry point is the origin.
    ///
    /// ```
    /// use lc3_sim_core::image::MemImage;
    ///
    /// let image = MemImage::from_obj_bytes(&[0x30, 0x00, 0xF0, 0x25]).unwrap();
    /// assert_eq!(image.entry(), 0x3000);
    /// assert_eq!(image.blocks().collect::<Vec<_>>(), [(0x3000, &[0xF025][..])]);
    /// ```
    pub fn from_obj_bytes(bytes: &[u8]) -> Result<Self, ImageErr> {
        if bytes.len() % 2 != 0 {
            return Err(ImageErr::OddObjLength);
        }

        let mut words = bytes.chunks_exact(2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]));
        let origin = words.next().ok_or(ImageErr::MissingOrigin)?;

        let mut image = MemImage::new();
        image.add_block(origin, words.collect())?;
        image.set_entry(origin);
        Ok(image)
    }
}

impl std::str::FromStr for MemImage {
    type Err = ImageErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = TextParser::default();
        let mut line = 1;
        let mut tokens = vec![];

        for token in Token::lexer(s) {
            match token.map_err(|e| ImageErr::Text { line, kind: e.into() })? {
                Token::NewLine => {
                    parser.parse_line(line, &tokens)?;
                    tokens.clear();
                    line += 1;
                },
                Token::Comment => {},
                t => tokens.push(t),
            }
        }
        parser.parse_line(line, &tokens)?;
        parser.finish()
    }
}

/// A word of a text image, before labels are resolved.
enum Operand {
    Value(u16),
    Label { name: String, line: usize }
}
struct OpenBlock {
    start: u16,
    words: Vec<Operand>,
    orig_line: usize
}

#[derive(Default)]
struct TextParser {
    current: Option<OpenBlock>,
    closed: Vec<OpenBlock>,
    entry: Option<Operand>,
    symbols: SymbolTable
}
impl TextParser {
    fn parse_line(&mut self, line: usize, tokens: &[Token]) -> Result<(), ImageErr> {
        let err = |kind| ImageErr::Text { line, kind };

        let mut rest = tokens;
        if let [Token::Ident(label), tail @ ..] = rest {
            let block = self.current.as_ref().ok_or(err(TextErrKind::OutsideBlock))?;
            let addr = block.start.wrapping_add(block.words.len() as u16);
            if !self.symbols.insert(label, addr) {
                return Err(err(TextErrKind::DuplicateLabel(label.to_uppercase())));
            }

            rest = match tail {
                [Token::Colon, t @ ..] => t,
                t => t
            };
        }

        match rest {
            [] => Ok(()),
            [Token::Directive(d), args @ ..] => self.directive(d, args, line).map_err(err),
            [Token::Unsigned(_) | Token::Signed(_)] => {
                let word = operand(rest, line).map_err(err)?;
                self.push(word).map_err(err)
            }
            _ => Err(err(TextErrKind::UnexpectedToken))
        }
    }

    fn directive(&mut self, name: &str, args: &[Token], line: usize) -> Result<(), TextErrKind> {
        let arg = || match args {
            [] => Err(TextErrKind::MissingOperand(name.to_string())),
            _  => operand(args, line)
        };

        match name {
            "orig" => {
                if self.current.is_some() { return Err(TextErrKind::OrigInsideBlock) };
                let Operand::Value(start) = arg()? else { return Err(TextErrKind::UnexpectedToken) };
                self.current = Some(OpenBlock { start, words: vec![], orig_line: line });
                Ok(())
            },
            "end" => {
                if !args.is_empty() { return Err(TextErrKind::UnexpectedToken) };
                let block = self.current.take().ok_or(TextErrKind::OutsideBlock)?;
                self.closed.push(block);
                Ok(())
            },
            "fill" => {
                let word = arg()?;
                self.push(word)
            },
            "entry" => {
                self.entry = Some(arg()?);
                Ok(())
            },
            _ => Err(TextErrKind::UnknownDirective(name.to_string()))
        }
    }

    fn push(&mut self, word: Operand) -> Result<(), TextErrKind> {
        let block = self.current.as_mut().ok_or(TextErrKind::OutsideBlock)?;
        block.words.push(word);
        Ok(())
    }

    fn resolve(&self, word: &Operand) -> Result<u16, ImageErr> {
        match word {
            Operand::Value(v) => Ok(*v),
            Operand::Label { name, line } => self.symbols.lookup_label(name)
                .ok_or_else(|| ImageErr::Text { line: *line, kind: TextErrKind::UndefinedLabel(name.clone()) }),
        }
    }

    fn finish(mut self) -> Result<MemImage, ImageErr> {
        self.closed.extend(self.current.take());

        let mut image = MemImage::new();
        for block in &self.closed {
            let words = block.words.iter()
                .map(|w| self.resolve(w))
                .collect::<Result<Vec<_>, _>>()?;

            image.add_block(block.start, words)
                .map_err(|e| ImageErr::Text { line: block.orig_line, kind: TextErrKind::Block(Box::new(e)) })?;
        }
        if let Some(entry) = &self.entry {
            image.set_entry(self.resolve(entry)?);
        }
        image.symbols = self.symbols;

        log::debug!("parsed text image with {} block(s) and {} label(s)", image.blocks.len(), image.symbols.len());
        Ok(image)
    }
}

/// Reads a single numeric or label operand.
fn operand(tokens: &[Token], line: usize) -> Result<Operand, TextErrKind> {
    match tokens {
        [Token::Unsigned(n)] => Ok(Operand::Value(*n)),
        [Token::Signed(n)]   => Ok(Operand::Value(*n as u16)),
        [Token::Ident(name)] => Ok(Operand::Label { name: name.clone(), line }),
        _ => Err(TextErrKind::UnexpectedToken)
    }
}
