//! A deterministic LC-3 simulator core.
//!
//! This crate holds the pieces needed to execute LC-3 machine code
//! under the control of a debugger or an automated grading harness:
//! - [`ast`]: registers, instruction operands and the instruction decoder/disassembler
//! - [`image`]: memory images (object files and a small text format) which are loaded into the simulator
//! - [`sim`]: the simulator itself, its devices, breakpoints and run policies
//!
//! # Usage
//!
//! A memory image is loaded into a simulator, which is then run:
//! ```
//! use lc3_sim_core::image::MemImage;
//! use lc3_sim_core::sim::{Simulator, StopReason};
//!
//! let image: MemImage = "
//!     .orig x3000
//!     xE002 ; LEA R0, #2
//!     xF022 ; TRAP x22 (PUTS)
//!     xF025 ; TRAP x25 (HALT)
//!     x0048 ; 'H'
//!     x0069 ; 'i'
//!     x0000
//!     .end
//!
//!     .orig x0022
//!     .fill PUTS
//!     .end
//!
//!     .orig x0400
//!     PUTS: x6200 ; LDR R1, R0, #0
//!           x0403 ; BRz #3
//!           xB203 ; STI R1, #3
//!           x1021 ; ADD R0, R0, #1
//!           x0FFB ; BRnzp #-5
//!           x8000 ; RTI
//!           xFE06 ; DDR
//!     .end
//! ".parse().unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load(&image);
//!
//! let outcome = sim.run_to_halt(Some(1000));
//! assert_eq!(outcome.reason, StopReason::Halted);
//! assert_eq!(sim.output_string(), "Hi");
//! ```
//!
//! If more granularity is needed, the simulator can also be stepped instruction by instruction,
//! and breakpoints can be set. See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod ast;
pub mod image;
pub mod sim;
