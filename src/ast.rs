//! Components describing the operands of LC-3 instructions.
//!
//! These components together are used to construct [`sim::SimInstr`]
//! (a data structure holding one decoded instruction word).

pub mod sim;

use std::fmt::Write as _;
use offset_base::OffsetBacking;

use crate::sim::SimErr;

/// A register. Must be between 0 and 7.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// or by using [`Reg::try_from`].
///
/// ```
/// use lc3_sim_core::ast::Reg;
/// use lc3_sim_core::ast::reg_consts::R3;
///
/// assert_eq!(Reg::try_from(3), Ok(R3));
/// assert!(Reg::try_from(8).is_err());
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Reg(pub(crate) u8);

/// Register constants!
pub mod reg_consts {
    use super::Reg;

    /// The 0th register in the register file.
    pub const R0: Reg = Reg(0);
    /// The 1st register in the register file.
    pub const R1: Reg = Reg(1);
    /// The 2nd register in the register file.
    pub const R2: Reg = Reg(2);
    /// The 3rd register in the register file.
    pub const R3: Reg = Reg(3);
    /// The 4th register in the register file.
    pub const R4: Reg = Reg(4);
    /// The 5th register in the register file.
    pub const R5: Reg = Reg(5);
    /// The 6th register in the register file (the stack pointer for traps and interrupts).
    pub const R6: Reg = Reg(6);
    /// The 7th register in the register file (the link register).
    pub const R7: Reg = Reg(7);
}
impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 7.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// Extracts the 3-bit register field starting at bit `lo` of an instruction word.
    pub(crate) fn from_field(word: u16, lo: u32) -> Self {
        Reg(((word >> lo) & 0b111) as u8)
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "R{}", self.0)
    }
}
impl From<Reg> for usize {
    // Used for indexing the reg file in [`crate::sim::mem::RegFile`].
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = SimErr;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(Reg(value)),
            _     => Err(SimErr::InvalidRegister(value)),
        }
    }
}

/// A condition code (used for `BR`), must be between 0 and 7.
///
/// The condition codes are listed below:
///
/// | instruction   | code (bin) |
/// |---------------|------------|
/// | `NOP`         | `000`      |
/// | `BRn`         | `100`      |
/// | `BRz`         | `010`      |
/// | `BRnz`        | `110`      |
/// | `BRp`         | `001`      |
/// | `BRnp`        | `101`      |
/// | `BRzp`        | `011`      |
/// | `BR`, `BRnzp` | `111`      |
///
pub type CondCode = u8;

/// A value representing a signed offset or a signed immediate value.
///
/// `N` indicates the maximum bit size of this offset/immediate value.
///
/// `IOffset<5>` represents `ADD`/`AND`'s imm5 operand,
/// `IOffset<6>` the base+offset field of `LDR`/`STR`,
/// `IOffset<9>` the PC offset of `BR`, `LD`, `LDI`, `LEA`, `ST`, `STI`,
/// and `IOffset<11>` the PC offset of `JSR`.
pub type IOffset<const N: u32> = Offset<i16, N>;
/// An unsigned 8-bit trap vector (used for `TRAP`).
pub type TrapVect8 = Offset<u16, 8>;

/// A value representing either an immediate value or a register.
///
/// This is used to handle cases where an operand can be either
/// an immediate value or a register (e.g., in `AND` or `ADD`,
/// or `JSR`/`JSRR`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ImmOrReg<const N: u32> {
    #[allow(missing_docs)]
    Imm(IOffset<N>),
    #[allow(missing_docs)]
    Reg(Reg)
}
impl<const N: u32> std::fmt::Display for ImmOrReg<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImmOrReg::Imm(imm) => imm.fmt(f),
            ImmOrReg::Reg(reg) => reg.fmt(f),
        }
    }
}

/// A value representing an offset or an immediate value.
///
/// The `OFF` type represents the backing type of this offset.
/// The signedness of this offset type is dependent on the signedness of the `OFF` type:
/// - `Offset<i16, _>`: signed offset (also aliased as [`IOffset`])
/// - `Offset<u16, _>`: unsigned offset
///
/// `N` indicates the maximum bit size of this offset/immediate value.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Offset<OFF, const N: u32>(OFF);

impl<OFF: std::fmt::Display, const N: u32> std::fmt::Display for Offset<OFF, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_char('#')?;
        self.0.fmt(f)
    }
}
impl<OFF: std::fmt::UpperHex, const N: u32> std::fmt::UpperHex for Offset<OFF, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_char('x')?;
        self.0.fmt(f)
    }
}

mod offset_base {
    /// Any type that could store a value for [`Offset`].
    ///
    /// [`Offset`]: super::Offset
    pub trait OffsetBacking: Copy + Eq {
        /// How many bits are contained within this backing.
        const BITS: u32;

        /// Truncates the given value to the provided `bit_size`,
        /// extending it back to full width (sign-extension for signed backings).
        fn truncate(self, bit_size: u32) -> Self;
    }

    macro_rules! impl_offset_backing_for_ints {
        ($($Int:ty),*) => {
            $(
                impl OffsetBacking for $Int {
                    const BITS: u32 = Self::BITS;

                    fn truncate(self, bit_size: u32) -> Self {
                        (self << (Self::BITS - bit_size)) >> (Self::BITS - bit_size)
                    }
                }
            )*
        }
    }
    impl_offset_backing_for_ints! { u16, i16 }
}

impl<OFF: OffsetBacking, const N: u32> Offset<OFF, N> {
    /// Creates a new offset by extending the first N bits of the integer,
    /// and discarding the rest.
    ///
    /// The extension is considered sign-extended if the offset's backing is signed,
    /// and zero-extended if the offset's backing is unsigned.
    ///
    /// ```
    /// # use lc3_sim_core::ast::Offset;
    /// #
    /// assert_eq!(Offset::<i16, 5>::new_trunc(15).get(),  15); // 0b01111
    /// assert_eq!(Offset::<i16, 5>::new_trunc(16).get(), -16); // 0b10000
    /// assert_eq!(Offset::<u16, 5>::new_trunc(32).get(),   0); // 0b00000
    /// ```
    ///
    /// # Panics
    ///
    /// This will panic if `N` is larger than the offset backing (e.g., for backing `u16`, larger than 16).
    pub fn new_trunc(n: OFF) -> Self {
        assert!(N <= OFF::BITS, "bit size {N} exceeds size of backing ({})", OFF::BITS);
        Self(n.truncate(N))
    }

    /// Gets the value of the offset.
    pub fn get(&self) -> OFF {
        self.0
    }
}
