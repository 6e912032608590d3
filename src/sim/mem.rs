//! Memory handling for the LC-3 simulator.
//!
//! This module consists of:
//! - [`MemArray`]: The memory.
//! - [`RegFile`]: The register file.
//! - [`MachineInitStrategy`]: How the memory and register file are filled on creation.

use rand::rngs::StdRng;
use rand::Rng;

use crate::ast::Reg;

/// Trait that describes types that can be used to create the initial data
/// of the memory and register file.
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> u16;
}
impl WordFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u16 {
        rand::random()
    }
}
impl WordFiller for u16 {
    /// Sets each word to the given value.
    fn generate(&mut self) -> u16 {
        *self
    }
}
impl WordFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u16 {
        self.gen()
    }
}

/// Strategy used to initialize the `reg_file` and `mem` of the [`Simulator`].
///
/// Two simulators created with the same non-`Unseeded` strategy
/// start out bit-identical.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MachineInitStrategy {
    /// Initializes each word randomly and non-deterministically.
    Unseeded,

    /// Initializes each word randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each word to a known value.
    Known {
        /// The value to initialize each value to.
        value: u16
    }
}
impl Default for MachineInitStrategy {
    fn default() -> Self {
        MachineInitStrategy::Known { value: 0 }
    }
}

impl MachineInitStrategy {
    pub(super) fn generator(&self) -> impl WordFiller {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Unseeded => WCGenerator::Unseeded,
            MachineInitStrategy::Seeded { seed } => WCGenerator::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Known { value } => WCGenerator::Known(*value),
        }
    }
}

enum WCGenerator {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u16)
}
impl WordFiller for WCGenerator {
    fn generate(&mut self) -> u16 {
        match self {
            WCGenerator::Unseeded  => ().generate(),
            WCGenerator::Seeded(r) => r.generate(),
            WCGenerator::Known(k)  => k.generate(),
        }
    }
}

const N: usize = 1 << 16;

/// Memory.
///
/// This can be addressed with any `u16` (16-bit address).
///
/// Indexing a `MemArray` directly reads or edits the stored word
/// without triggering any memory-mapped IO effects.
/// To simulate an access (with IO effects and access checks),
/// use [`Simulator::read_mem`] and [`Simulator::write_mem`].
///
/// ```
/// use lc3_sim_core::sim::mem::MemArray;
///
/// let mut mem = MemArray::new(&mut 0u16);
/// mem[0x3000] = 11;
/// assert_eq!(mem[0x3000], 11);
/// assert_eq!(mem[0x3001], 0);
/// ```
///
/// [`Simulator::read_mem`]: super::Simulator::read_mem
/// [`Simulator::write_mem`]: super::Simulator::write_mem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemArray(Box<[u16; N]>);
impl MemArray {
    /// Creates a new memory with a provided word creation strategy.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        let data: Box<[u16]> = std::iter::repeat_with(|| filler.generate())
            .take(N)
            .collect();

        match data.try_into() {
            Ok(arr) => Self(arr),
            Err(_) => unreachable!("iterator should have had {N} elements"),
        }
    }

    /// Copies a block of words into memory, starting at `start`.
    ///
    /// Blocks which run past `xFFFF` wrap around to `x0000`.
    /// Only the first 65536 words of `words` are copied.
    pub fn copy_block(&mut self, start: u16, words: &[u16]) {
        let words = &words[..words.len().min(N)];
        let si = usize::from(start);
        let (head, tail) = words.split_at(words.len().min(N - si));

        self.0[si..(si + head.len())].copy_from_slice(head);
        self.0[..tail.len()].copy_from_slice(tail);
    }

    /// Accesses the memory as a slice.
    pub fn as_slice(&self) -> &[u16] {
        &*self.0
    }
    /// Accesses the memory as a mutable slice.
    pub fn as_slice_mut(&mut self) -> &mut [u16] {
        &mut *self.0
    }
}
impl std::ops::Index<u16> for MemArray {
    type Output = u16;

    fn index(&self, index: u16) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<u16> for MemArray {
    fn index_mut(&mut self, index: u16) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

/// The register file.
///
/// This struct can be indexed with a [`Reg`]
/// (which can be constructed using the [`crate::ast::reg_consts`] module or via [`Reg::try_from`]).
///
/// # Example
///
/// ```
/// use lc3_sim_core::sim::mem::RegFile;
/// use lc3_sim_core::ast::reg_consts::R0;
///
/// let mut reg = RegFile::new(&mut ());
/// reg[R0] = 11;
/// assert_eq!(reg[R0], 11);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegFile([u16; 8]);
impl RegFile {
    /// Creates a register file, filling it with the given strategy.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        Self(std::array::from_fn(|_| filler.generate()))
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u16;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

#[cfg(test)]
mod tests {
    use super::{MachineInitStrategy, MemArray, RegFile};

    #[test]
    fn test_copy_block_wraps() {
        let mut mem = MemArray::new(&mut 0u16);
        mem.copy_block(0xFFFE, &[1, 2, 3, 4]);

        assert_eq!(mem[0xFFFE], 1);
        assert_eq!(mem[0xFFFF], 2);
        assert_eq!(mem[0x0000], 3);
        assert_eq!(mem[0x0001], 4);
        assert_eq!(mem[0x0002], 0);
    }

    #[test]
    fn test_copy_block_oversize() {
        let mut mem = MemArray::new(&mut 0u16);
        let words: Vec<u16> = (0..0x10005).map(|i| (i >> 16) as u16 + 1).collect();
        mem.copy_block(0x3000, &words);

        // everything past the first 65536 words is dropped
        assert!(mem.as_slice().iter().all(|&w| w == 1));
    }

    #[test]
    fn test_init_strategies() {
        let known = MemArray::new(&mut MachineInitStrategy::Known { value: 0xABCD }.generator());
        assert!(known.as_slice().iter().all(|&w| w == 0xABCD));

        let seeded = MachineInitStrategy::Seeded { seed: 2110 };
        let a = MemArray::new(&mut seeded.generator());
        let b = MemArray::new(&mut seeded.generator());
        assert_eq!(a, b);

        let ra = RegFile::new(&mut seeded.generator());
        let rb = RegFile::new(&mut seeded.generator());
        assert_eq!(ra, rb);
    }
}
