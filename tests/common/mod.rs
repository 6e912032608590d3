//! Helpers to write LC-3 programs in integration tests.
#![allow(dead_code)]

use std::collections::HashMap;

use lc3_sim_core::image::MemImage;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

enum Item {
    Word(u16),
    Addr(String),
    PcRel(String, Box<dyn Fn(i16) -> u16>)
}

/// Builds a memory image out of raw instruction words, resolving labels.
#[derive(Default)]
pub struct ProgramBuilder {
    blocks: Vec<(u16, Vec<Item>)>,
    labels: HashMap<String, u16>,
    entry: Option<u16>
}
impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new block at the given address.
    pub fn orig(mut self, addr: u16) -> Self {
        self.blocks.push((addr, vec![]));
        self
    }
    pub fn entry(mut self, addr: u16) -> Self {
        self.entry = Some(addr);
        self
    }

    fn here(&self) -> u16 {
        let (start, items) = self.blocks.last().expect("label or word outside of block");
        start + items.len() as u16
    }
    fn push(mut self, item: Item) -> Self {
        self.blocks.last_mut()
            .expect("label or word outside of block")
            .1.push(item);
        self
    }

    pub fn label(mut self, name: &str) -> Self {
        let addr = self.here();
        assert!(self.labels.insert(name.to_string(), addr).is_none(), "duplicate label {name}");
        self
    }

    pub fn instr(self, word: u16) -> Self {
        self.push(Item::Word(word))
    }
    /// An instruction with a PC-relative offset to `label`.
    pub fn pc_rel(self, label: &str, f: impl Fn(i16) -> u16 + 'static) -> Self {
        self.push(Item::PcRel(label.to_string(), Box::new(f)))
    }
    pub fn fill(self, word: u16) -> Self {
        self.push(Item::Word(word))
    }
    pub fn fill_label(self, label: &str) -> Self {
        self.push(Item::Addr(label.to_string()))
    }
    pub fn stringz(self, s: &str) -> Self {
        s.bytes()
            .fold(self, |b, byte| b.fill(u16::from(byte)))
            .fill(0)
    }

    pub fn build(self) -> MemImage {
        let labels = &self.labels;
        let lookup = |l: &str| *labels.get(l).unwrap_or_else(|| panic!("undefined label {l}"));

        let mut image = MemImage::new();
        for (start, items) in &self.blocks {
            let words = items.iter()
                .zip(*start..)
                .map(|(item, addr)| match item {
                    Item::Word(w) => *w,
                    Item::Addr(l) => lookup(l),
                    Item::PcRel(l, f) => f(lookup(l).wrapping_sub(addr + 1) as i16),
                })
                .collect();

            image.add_block(*start, words).unwrap();
        }
        for (label, &addr) in labels {
            image.symbols_mut().insert(label, addr);
        }
        if let Some(entry) = self.entry {
            image.set_entry(entry);
        }
        image
    }
}

// Instruction encoders.

fn pc9(opcode: u16, r: u16, off: i16) -> u16 {
    assert!((-256..256).contains(&off), "offset {off} does not fit in 9 bits");
    opcode << 12 | r << 9 | (off as u16 & 0x1FF)
}
fn base6(opcode: u16, r: u16, br: u16, off: i16) -> u16 {
    assert!((-32..32).contains(&off), "offset {off} does not fit in 6 bits");
    opcode << 12 | r << 9 | br << 6 | (off as u16 & 0x3F)
}

pub fn add_imm(dr: u16, sr: u16, imm: i16) -> u16 {
    assert!((-16..16).contains(&imm));
    0x1000 | dr << 9 | sr << 6 | 0x20 | (imm as u16 & 0x1F)
}
pub fn add_reg(dr: u16, sr1: u16, sr2: u16) -> u16 {
    0x1000 | dr << 9 | sr1 << 6 | sr2
}
pub fn and_imm(dr: u16, sr: u16, imm: i16) -> u16 {
    add_imm(dr, sr, imm) ^ 0x4000
}
pub fn not(dr: u16, sr: u16) -> u16 {
    0x903F | dr << 9 | sr << 6
}
/// `nzp` is the condition mask (e.g., `0b010` for BRz).
pub fn br(nzp: u16, off: i16) -> u16 {
    pc9(0b0000, nzp, off)
}
pub fn ld(dr: u16, off: i16) -> u16 {
    pc9(0b0010, dr, off)
}
pub fn st(sr: u16, off: i16) -> u16 {
    pc9(0b0011, sr, off)
}
pub fn ldi(dr: u16, off: i16) -> u16 {
    pc9(0b1010, dr, off)
}
pub fn sti(sr: u16, off: i16) -> u16 {
    pc9(0b1011, sr, off)
}
pub fn lea(dr: u16, off: i16) -> u16 {
    pc9(0b1110, dr, off)
}
pub fn ldr(dr: u16, br: u16, off: i16) -> u16 {
    base6(0b0110, dr, br, off)
}
pub fn rti() -> u16 {
    0x8000
}
pub fn trap(vect: u8) -> u16 {
    0xF000 | u16::from(vect)
}

pub const GETC: u8 = 0x20;
pub const OUT: u8 = 0x21;
pub const PUTS: u8 = 0x22;
pub const HALT: u8 = 0x25;

/// Adds a trap table and polling GETC (x0400), OUT (x0430) and PUTS (x0450) routines.
///
/// If `poll_keyboard` is false, GETC reads KBDR without waiting for KBSR.
pub fn with_os(b: ProgramBuilder, poll_keyboard: bool) -> ProgramBuilder {
    let b = b
        .orig(0x0020)
        .fill_label("GETC")
        .fill_label("OUT")
        .fill_label("PUTS")
        .orig(0x0400)
        .label("GETC");

    let b = match poll_keyboard {
        true => b
            .label("GETC_POLL")
            .pc_rel("GETC_KBSR", |o| ldi(0, o))
            .pc_rel("GETC_POLL", |o| br(0b011, o)),
        false => b,
    };

    b
        .pc_rel("GETC_KBDR", |o| ldi(0, o))
        .instr(rti())
        .label("GETC_KBSR").fill(0xFE00)
        .label("GETC_KBDR").fill(0xFE02)

        .orig(0x0430)
        .label("OUT")
        .pc_rel("OUT_R1", |o| st(1, o))
        .label("OUT_POLL")
        .pc_rel("OUT_DSR", |o| ldi(1, o))
        .pc_rel("OUT_POLL", |o| br(0b011, o))
        .pc_rel("OUT_DDR", |o| sti(0, o))
        .pc_rel("OUT_R1", |o| ld(1, o))
        .instr(rti())
        .label("OUT_DSR").fill(0xFE04)
        .label("OUT_DDR").fill(0xFE06)
        .label("OUT_R1").fill(0)

        .orig(0x0450)
        .label("PUTS")
        .pc_rel("PUTS_R0", |o| st(0, o))
        .pc_rel("PUTS_R1", |o| st(1, o))
        .label("PUTS_LOOP")
        .instr(ldr(1, 0, 0))
        .pc_rel("PUTS_DONE", |o| br(0b010, o))
        .pc_rel("PUTS_DDR", |o| sti(1, o))
        .instr(add_imm(0, 0, 1))
        .pc_rel("PUTS_LOOP", |o| br(0b111, o))
        .label("PUTS_DONE")
        .pc_rel("PUTS_R0", |o| ld(0, o))
        .pc_rel("PUTS_R1", |o| ld(1, o))
        .instr(rti())
        .label("PUTS_DDR").fill(0xFE06)
        .label("PUTS_R0").fill(0)
        .label("PUTS_R1").fill(0)
}
