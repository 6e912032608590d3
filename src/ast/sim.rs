//! Decoded instructions, as executed by the simulator.
//!
//! The key type here is [`SimInstr`]. Every 16-bit word decodes to exactly one `SimInstr`:
//! words that do not form a valid instruction decode to [`SimInstr::Reserved`],
//! which the simulator reports as an illegal instruction.
//!
//! ```
//! use lc3_sim_core::ast::ImmOrReg;
//! use lc3_sim_core::ast::reg_consts::R0;
//! use lc3_sim_core::ast::sim::SimInstr;
//!
//! let instr = SimInstr::decode(0x1021);
//! assert!(matches!(instr, SimInstr::ADD(R0, R0, ImmOrReg::Imm(i)) if i.get() == 1));
//! assert_eq!(instr.to_string(), "ADD R0, R0, #1");
//! assert_eq!(instr.encode(), 0x1021);
//!
//! assert!(matches!(SimInstr::decode(0xD000), SimInstr::Reserved(0xD000)));
//! ```

use super::{CondCode, IOffset, ImmOrReg, Reg, TrapVect8};

const OP_BR:   u16 = 0b0000;
const OP_ADD:  u16 = 0b0001;
const OP_LD:   u16 = 0b0010;
const OP_ST:   u16 = 0b0011;
const OP_JSR:  u16 = 0b0100;
const OP_AND:  u16 = 0b0101;
const OP_LDR:  u16 = 0b0110;
const OP_STR:  u16 = 0b0111;
const OP_RTI:  u16 = 0b1000;
const OP_NOT:  u16 = 0b1001;
const OP_LDI:  u16 = 0b1010;
const OP_STI:  u16 = 0b1011;
const OP_JMP:  u16 = 0b1100;
const OP_LEA:  u16 = 0b1110;
const OP_TRAP: u16 = 0b1111;

/// A decoded instruction word.
///
/// The variants hold the operand fields of the instruction,
/// already sign- or zero-extended as the instruction requires.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimInstr {
    /// `BR[n][z][p] PCoffset9`. A condition code of `000` never branches.
    BR(CondCode, IOffset<9>),
    /// `ADD DR, SR1, SR2` or `ADD DR, SR1, imm5`.
    ADD(Reg, Reg, ImmOrReg<5>),
    /// `LD DR, PCoffset9`.
    LD(Reg, IOffset<9>),
    /// `ST SR, PCoffset9`.
    ST(Reg, IOffset<9>),
    /// `JSR PCoffset11` (immediate) or `JSRR BaseR` (register).
    JSR(ImmOrReg<11>),
    /// `AND DR, SR1, SR2` or `AND DR, SR1, imm5`.
    AND(Reg, Reg, ImmOrReg<5>),
    /// `LDR DR, BaseR, offset6`.
    LDR(Reg, Reg, IOffset<6>),
    /// `STR SR, BaseR, offset6`.
    STR(Reg, Reg, IOffset<6>),
    /// `RTI`.
    RTI,
    /// `NOT DR, SR`.
    NOT(Reg, Reg),
    /// `LDI DR, PCoffset9`.
    LDI(Reg, IOffset<9>),
    /// `STI SR, PCoffset9`.
    STI(Reg, IOffset<9>),
    /// `JMP BaseR` (`RET` when the base register is R7).
    JMP(Reg),
    /// `LEA DR, PCoffset9`.
    LEA(Reg, IOffset<9>),
    /// `TRAP trapvect8`.
    TRAP(TrapVect8),
    /// A word which does not encode any instruction
    /// (the reserved opcode `1101`, or a recognized opcode with malformed fixed fields).
    Reserved(u16),
}

impl SimInstr {
    /// Decodes a word into an instruction.
    ///
    /// This never fails: undecodable words become [`SimInstr::Reserved`].
    pub fn decode(word: u16) -> Self {
        let opcode = word >> 12;
        let dr = Reg::from_field(word, 9);
        let sr1 = Reg::from_field(word, 6);

        match opcode {
            OP_BR => SimInstr::BR(((word >> 9) & 0b111) as CondCode, IOffset::new_trunc(word as i16)),
            OP_ADD | OP_AND => {
                let sr2 = match (word >> 5) & 1 != 0 {
                    true => ImmOrReg::Imm(IOffset::new_trunc(word as i16)),
                    false if word & 0b11000 == 0 => ImmOrReg::Reg(Reg::from_field(word, 0)),
                    false => return SimInstr::Reserved(word),
                };
                match opcode {
                    OP_ADD => SimInstr::ADD(dr, sr1, sr2),
                    _      => SimInstr::AND(dr, sr1, sr2),
                }
            },
            OP_LD  => SimInstr::LD(dr, IOffset::new_trunc(word as i16)),
            OP_ST  => SimInstr::ST(dr, IOffset::new_trunc(word as i16)),
            OP_JSR => match (word >> 11) & 1 != 0 {
                true => SimInstr::JSR(ImmOrReg::Imm(IOffset::new_trunc(word as i16))),
                false if word & 0b0000_0110_0011_1111 == 0 => SimInstr::JSR(ImmOrReg::Reg(sr1)),
                false => SimInstr::Reserved(word),
            },
            OP_LDR => SimInstr::LDR(dr, sr1, IOffset::new_trunc(word as i16)),
            OP_STR => SimInstr::STR(dr, sr1, IOffset::new_trunc(word as i16)),
            OP_RTI if word & 0x0FFF == 0 => SimInstr::RTI,
            OP_NOT if word & 0b11_1111 == 0b11_1111 => SimInstr::NOT(dr, sr1),
            OP_LDI => SimInstr::LDI(dr, IOffset::new_trunc(word as i16)),
            OP_STI => SimInstr::STI(dr, IOffset::new_trunc(word as i16)),
            OP_JMP if word & 0b0000_1110_0011_1111 == 0 => SimInstr::JMP(sr1),
            OP_LEA => SimInstr::LEA(dr, IOffset::new_trunc(word as i16)),
            OP_TRAP if word & 0x0F00 == 0 => SimInstr::TRAP(TrapVect8::new_trunc(word)),
            _ => SimInstr::Reserved(word),
        }
    }

    /// Encodes this instruction back into its word.
    ///
    /// For any word `w`, `SimInstr::decode(w).encode() == w`.
    pub fn encode(&self) -> u16 {
        fn reg(r: Reg, lo: u32) -> u16 {
            u16::from(r.reg_no()) << lo
        }
        fn off<const N: u32>(o: IOffset<N>) -> u16 {
            (o.get() as u16) & ((1 << N) - 1)
        }
        fn imm_or_reg(sr2: ImmOrReg<5>) -> u16 {
            match sr2 {
                ImmOrReg::Imm(i) => 1 << 5 | off(i),
                ImmOrReg::Reg(r) => reg(r, 0),
            }
        }

        match *self {
            SimInstr::BR(cc, o)       => OP_BR << 12 | u16::from(cc & 0b111) << 9 | off(o),
            SimInstr::ADD(dr, sr1, sr2) => OP_ADD << 12 | reg(dr, 9) | reg(sr1, 6) | imm_or_reg(sr2),
            SimInstr::LD(dr, o)       => OP_LD << 12 | reg(dr, 9) | off(o),
            SimInstr::ST(sr, o)       => OP_ST << 12 | reg(sr, 9) | off(o),
            SimInstr::JSR(ImmOrReg::Imm(o)) => OP_JSR << 12 | 1 << 11 | off(o),
            SimInstr::JSR(ImmOrReg::Reg(br)) => OP_JSR << 12 | reg(br, 6),
            SimInstr::AND(dr, sr1, sr2) => OP_AND << 12 | reg(dr, 9) | reg(sr1, 6) | imm_or_reg(sr2),
            SimInstr::LDR(dr, br, o)  => OP_LDR << 12 | reg(dr, 9) | reg(br, 6) | off(o),
            SimInstr::STR(sr, br, o)  => OP_STR << 12 | reg(sr, 9) | reg(br, 6) | off(o),
            SimInstr::RTI             => OP_RTI << 12,
            SimInstr::NOT(dr, sr)     => OP_NOT << 12 | reg(dr, 9) | reg(sr, 6) | 0b11_1111,
            SimInstr::LDI(dr, o)      => OP_LDI << 12 | reg(dr, 9) | off(o),
            SimInstr::STI(sr, o)      => OP_STI << 12 | reg(sr, 9) | off(o),
            SimInstr::JMP(br)         => OP_JMP << 12 | reg(br, 6),
            SimInstr::LEA(dr, o)      => OP_LEA << 12 | reg(dr, 9) | off(o),
            SimInstr::TRAP(vect)      => OP_TRAP << 12 | (vect.get() & 0xFF),
            SimInstr::Reserved(word)  => word,
        }
    }

    /// Whether this word decoded to an actual instruction.
    pub fn is_legal(&self) -> bool {
        !matches!(self, SimInstr::Reserved(_))
    }
}

impl std::fmt::Display for SimInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimInstr::BR(0, _) => f.write_str("NOP"),
            SimInstr::BR(cc, off) => {
                f.write_str("BR")?;
                if cc & 0b100 != 0 { f.write_str("n")?; }
                if cc & 0b010 != 0 { f.write_str("z")?; }
                if cc & 0b001 != 0 { f.write_str("p")?; }
                write!(f, " {off}")
            },
            SimInstr::ADD(dr, sr1, sr2) => write!(f, "ADD {dr}, {sr1}, {sr2}"),
            SimInstr::LD(dr, off)       => write!(f, "LD {dr}, {off}"),
            SimInstr::ST(sr, off)       => write!(f, "ST {sr}, {off}"),
            SimInstr::JSR(ImmOrReg::Imm(off)) => write!(f, "JSR {off}"),
            SimInstr::JSR(ImmOrReg::Reg(br))  => write!(f, "JSRR {br}"),
            SimInstr::AND(dr, sr1, sr2) => write!(f, "AND {dr}, {sr1}, {sr2}"),
            SimInstr::LDR(dr, br, off)  => write!(f, "LDR {dr}, {br}, {off}"),
            SimInstr::STR(sr, br, off)  => write!(f, "STR {sr}, {br}, {off}"),
            SimInstr::RTI               => f.write_str("RTI"),
            SimInstr::NOT(dr, sr)       => write!(f, "NOT {dr}, {sr}"),
            SimInstr::LDI(dr, off)      => write!(f, "LDI {dr}, {off}"),
            SimInstr::STI(sr, off)      => write!(f, "STI {sr}, {off}"),
            SimInstr::JMP(br) if br.reg_no() == 7 => f.write_str("RET"),
            SimInstr::JMP(br)           => write!(f, "JMP {br}"),
            SimInstr::LEA(dr, off)      => write!(f, "LEA {dr}, {off}"),
            SimInstr::TRAP(vect)        => write!(f, "TRAP {vect:02X}"),
            SimInstr::Reserved(word)    => write!(f, ".fill x{word:04X}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::reg_consts::{R0, R1, R2, R3, R5, R6, R7};
    use crate::ast::{IOffset, ImmOrReg, TrapVect8};

    use super::SimInstr;

    #[test]
    fn test_decode_is_total_and_lossless() {
        for word in 0..=u16::MAX {
            assert_eq!(SimInstr::decode(word).encode(), word, "word x{word:04X} did not survive decoding");
        }
    }

    #[test]
    fn test_decode_fields() {
        assert_eq!(SimInstr::decode(0x0FFD), SimInstr::BR(0b111, IOffset::new_trunc(-3)));
        assert_eq!(SimInstr::decode(0x1283), SimInstr::ADD(R1, R2, ImmOrReg::Reg(R3)));
        assert_eq!(SimInstr::decode(0x5020), SimInstr::AND(R0, R0, ImmOrReg::Imm(IOffset::new_trunc(0))));
        assert_eq!(SimInstr::decode(0x6D81), SimInstr::LDR(R6, R6, IOffset::new_trunc(1)));
        assert_eq!(SimInstr::decode(0x4FFF), SimInstr::JSR(ImmOrReg::Imm(IOffset::new_trunc(-1))));
        assert_eq!(SimInstr::decode(0x4140), SimInstr::JSR(ImmOrReg::Reg(R5)));
        assert_eq!(SimInstr::decode(0xC1C0), SimInstr::JMP(R7));
        assert_eq!(SimInstr::decode(0x8000), SimInstr::RTI);
        assert_eq!(SimInstr::decode(0xF025), SimInstr::TRAP(TrapVect8::new_trunc(0x25)));
    }

    #[test]
    fn test_decode_reserved() {
        // reserved opcode
        assert!(!SimInstr::decode(0xD000).is_legal());
        assert!(!SimInstr::decode(0xDFFF).is_legal());
        // ADD/AND with bits 4..3 set in register mode
        assert!(!SimInstr::decode(0x1008).is_legal());
        assert!(!SimInstr::decode(0x5010).is_legal());
        // NOT without the trailing ones
        assert!(!SimInstr::decode(0x903E).is_legal());
        // RTI, JMP, JSRR, TRAP with junk in fixed fields
        assert!(!SimInstr::decode(0x8001).is_legal());
        assert!(!SimInstr::decode(0xC201).is_legal());
        assert!(!SimInstr::decode(0x4201).is_legal());
        assert!(!SimInstr::decode(0xF125).is_legal());
    }

    #[test]
    fn test_display() {
        assert_eq!(SimInstr::decode(0x0000).to_string(), "NOP");
        assert_eq!(SimInstr::decode(0x0BFD).to_string(), "BRnp #-3");
        assert_eq!(SimInstr::decode(0x1283).to_string(), "ADD R1, R2, R3");
        assert_eq!(SimInstr::decode(0x927F).to_string(), "NOT R1, R1");
        assert_eq!(SimInstr::decode(0x4140).to_string(), "JSRR R5");
        assert_eq!(SimInstr::decode(0xC1C0).to_string(), "RET");
        assert_eq!(SimInstr::decode(0xF025).to_string(), "TRAP x25");
        assert_eq!(SimInstr::decode(0xD123).to_string(), ".fill xD123");
    }
}
