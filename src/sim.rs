//! Simulating and execution for LC-3 machine code.
//!
//! This module is focused on executing a loaded memory image (i.e., [`MemImage`]).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates machine code.
//! - [`mem`]: The module handling memory relating to the registers.
//! - [`device`]: The module handling simulator IO, interrupts, and general handling of external devices.
//! - [`debug`]: The module handling breakpoints for the simulator.
//! - [`run`]: The module holding the run policies (run to halt, run for N steps, run until blocked on input).
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Simulator and load a memory image into it:
//!
//! ```
//! use lc3_sim_core::image::MemImage;
//! use lc3_sim_core::sim::{Simulator, StopReason};
//!
//! let image: MemImage = "
//!     .orig x3000
//!     x5020 ; AND R0, R0, #0
//!     x1021 ; ADD R0, R0, #1
//!     x1021 ; ADD R0, R0, #1
//!     xF025 ; HALT
//!     .end
//! ".parse().unwrap();
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load(&image);
//!
//! let outcome = sim.run_to_halt(Some(1000));
//! assert_eq!(outcome.reason, StopReason::Halted);
//! assert_eq!(sim.read_reg(0), Ok(2));
//! assert_eq!(sim.instructions_run(), 4);
//! ```
//!
//! ## Flags
//!
//! Here, we define `sim` to have the default flags.
//! We could also configure the simulator by editing the flags. For example,
//! if we wish to enforce privilege checks, we can edit the flags like so:
//!
//! ```
//! # use lc3_sim_core::sim::{Simulator, SimFlags};
//! let mut sim = Simulator::new(SimFlags { ignore_privilege: false, ..Default::default() });
//! ```
//!
//! All of the available flags can be found in [`SimFlags`].
//!
//! ## Execution
//!
//! Beyond [`Simulator::step_in`] (which executes one instruction),
//! the run policies are:
//! - [`Simulator::run_to_halt`]: run until the program halts (or faults, or exceeds a limit)
//! - [`Simulator::run_for`]: run a fixed number of instructions
//! - [`Simulator::run_until_input_requested`]: run until the program is about to read the keyboard with no input queued
//!
//! These ignore breakpoint notifications. To be notified of breakpoint hits,
//! create a [`RunController`] with a [`debug::BreakpointHandler`].

pub mod mem;
pub mod debug;
pub mod device;
pub mod run;

use crate::ast::reg_consts::{R6, R7};
use crate::ast::sim::SimInstr;
use crate::ast::{ImmOrReg, Reg};
use crate::image::MemImage;
use debug::Breakpoints;
use device::{DeviceHandler, ExternalDevice};
use mem::{MachineInitStrategy, MemArray, RegFile};
pub use run::{RunController, RunOutcome, StopReason};

/// Errors that can occur during simulation.
#[derive(Debug, PartialEq, Eq, Hash, Clone, thiserror::Error)]
pub enum SimErr {
    /// A register number outside of 0-7 was provided.
    #[error("invalid register {0} (registers are R0-R7)")]
    InvalidRegister(u8),
    /// The word at the PC does not decode to an instruction.
    #[error("illegal instruction x{word:04X} at x{pc:04X}")]
    IllegalInstruction {
        /// Address of the instruction.
        pc: u16,
        /// The undecodable word.
        word: u16
    },
    /// A privileged instruction was called in user mode.
    #[error("privilege violation at x{pc:04X}")]
    PrivilegeViolation {
        /// Address of the instruction.
        pc: u16
    },
    /// A supervisor region was accessed in user mode.
    #[error("access violation at x{pc:04X} (tried to access x{addr:04X})")]
    AccessViolation {
        /// Address of the instruction.
        pc: u16,
        /// The address which was accessed.
        addr: u16
    },
}
impl SimErr {
    /// The address of the instruction which caused this error (if this error came from execution).
    pub fn pc(&self) -> Option<u16> {
        match *self {
            SimErr::InvalidRegister(_) => None,
            SimErr::IllegalInstruction { pc, .. } => Some(pc),
            SimErr::PrivilegeViolation { pc } => Some(pc),
            SimErr::AccessViolation { pc, .. } => Some(pc),
        }
    }
}

/// The machine state a step can change before it faults.
///
/// An interrupt entry switches stacks and pushes the PSR and PC before the handler's
/// first instruction runs. If that instruction faults, the entry is undone too.
struct Checkpoint {
    reg_file: RegFile,
    psr: PSR,
    saved_sp: u16,
    mcr: bool,
    pc: u16,
    stack: [(u16, u16); 2]
}
impl Checkpoint {
    fn take(sim: &Simulator) -> Self {
        let sp = match sim.psr.privileged() {
            true  => sim.reg_file[R6],
            false => sim.saved_sp,
        };
        let slot = |addr: u16| (addr, sim.mem[addr]);

        Self {
            reg_file: sim.reg_file.clone(),
            psr: sim.psr,
            saved_sp: sim.saved_sp,
            mcr: sim.mcr,
            pc: sim.pc,
            stack: [slot(sp.wrapping_sub(1)), slot(sp.wrapping_sub(2))]
        }
    }

    fn restore(self, sim: &mut Simulator) {
        for (addr, word) in self.stack {
            sim.mem[addr] = word;
        }
        sim.reg_file = self.reg_file;
        sim.psr = self.psr;
        sim.saved_sp = self.saved_sp;
        sim.mcr = self.mcr;
        sim.pc = self.pc;
        sim.fetch_pc = self.pc;
    }
}

/// Anything that can cause a step to abruptly fail to finish.
enum StepBreak {
    /// A halt was executed.
    Halt,
    /// A simulation error occurred.
    Err(SimErr),
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}

/// Configuration flags for [`Simulator`].
///
/// These can be modified after the `Simulator` is created with [`Simulator::new`]
/// and their effects should still apply.
/// They are preserved by [`Simulator::reset`].
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// Whether `HALT` (`TRAP x25`) is dispatched through the trap table.
    ///
    /// - **virtual** (`false`): On `TRAP x25`, the simulator halts directly.
    ///     The `TRAP` instruction itself is counted as executed.
    /// - **real** (`true`): `TRAP x25` jumps to the routine in the trap table like any other trap,
    ///     and the simulator halts once the program clears bit 15 of the MCR (`xFFFE`).
    ///
    /// By default, this flag is `false`.
    pub use_real_halt: bool,

    /// If true, privilege checks are ignored and the simulator runs as though
    /// the executor has supervisor level privilege.
    ///
    /// By default, this flag is `true`.
    pub ignore_privilege: bool,

    /// The creation strategy for the initial contents of memory and registers.
    ///
    /// This only goes into effect after a `Simulator::new` or `Simulator::reset` call.
    ///
    /// By default, this flag is [`MachineInitStrategy::default`] (every word is 0).
    pub machine_init: MachineInitStrategy,

    /// The instruction limit used by [`Simulator::run_to_halt`] and
    /// [`Simulator::run_until_input_requested`] when no explicit limit is given.
    ///
    /// By default, this flag is `None` (unbounded).
    pub run_limit: Option<u64>
}

impl Default for SimFlags {
    fn default() -> Self {
        Self {
            use_real_halt: false,
            ignore_privilege: true,
            machine_init: Default::default(),
            run_limit: None
        }
    }
}

/// The halt trap vector.
pub const HALT_VECT: u16 = 0x25;
/// The start of user space.
pub const USER_START: u16 = 0x3000;
/// The start of memory-mapped IO (the end of user space).
pub const IO_START: u16 = 0xFE00;
/// The memory-mapped address of the PSR.
pub const PSR_ADDR: u16 = 0xFFFC;
/// The memory-mapped address of the machine control register.
pub const MCR_ADDR: u16 = 0xFFFE;
const INT_TABLE: u16 = 0x0100;

/// Context behind a memory access.
///
/// This struct is used by the simulator's memory accesses to perform checks against memory accesses.
/// A default memory access context for the given simulator can be constructed with [`Simulator::default_mem_ctx`].
#[derive(Clone, Copy, Debug)]
pub struct MemAccessCtx {
    /// Whether this access is privileged (false = user, true = supervisor).
    pub privileged: bool,

    /// Whether a read to memory-mapped IO should cause side effects.
    ///
    /// This can be set to false to observe the value of IO.
    pub io_effects: bool
}
impl MemAccessCtx {
    /// Allows any access and allows access to (effectless) IO.
    ///
    /// Useful for reading state.
    pub fn omnipotent() -> Self {
        MemAccessCtx { privileged: true, io_effects: false }
    }
}

/// The execution state of the simulator.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub enum ExecState {
    /// The simulator can execute the instruction at the PC.
    #[default]
    Ready,
    /// The program halted.
    Halted,
    /// The program faulted. The PC points at the faulting instruction.
    Faulted(SimErr)
}

/// Executes LC-3 machine code.
///
/// Every simulator owns its memory, registers, devices and counters.
/// Two simulators never share state, so a reference and a candidate program
/// can be run side by side on two instances.
#[derive(Debug)]
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Simulator::reset`] resets these values.

    /// The simulator's memory.
    ///
    /// Note that this is held in the heap, as it is too large for the stack.
    mem: MemArray,

    /// The simulator's register file.
    reg_file: RegFile,

    /// The program counter.
    pc: u16,

    /// The processor status register. See [`PSR`] for more details.
    psr: PSR,

    /// Saved stack pointer (the one currently not in use)
    saved_sp: u16,

    /// Machine control. If cleared, the program stops.
    mcr: bool,

    /// Whether the simulator can continue executing.
    state: ExecState,

    /// The address of the instruction currently being executed.
    fetch_pc: u16,

    /// The number of instructions successfully run since this `Simulator` was initialized.
    instructions_run: u64,

    /// Why the last run stopped.
    last_stop: Option<StopReason>,

    /// Whether the last run stopped because it hit its instruction limit.
    exceeded_limit: bool,

    /// The address of the breakpoint a run stopped at,
    /// until an instruction retires or the PC is set.
    /// The next run steps off of it instead of stopping again.
    parked_bp: Option<u16>,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// Configuration settings for the simulator.
    ///
    /// These are preserved between resets.
    ///
    /// See [`SimFlags`] for more details on what configuration
    /// settings are available.
    pub flags: SimFlags,

    /// Breakpoints for the simulator.
    pub breakpoints: Breakpoints,

    /// All external devices connected to the system (IO and interrupting devices).
    pub device_handler: DeviceHandler
}

impl Simulator {
    /// Creates a new simulator with the provided flags, without any loaded memory image.
    ///
    /// The PC starts at `x3000` and the PSR at `x8002` (user mode, `z`).
    pub fn new(flags: SimFlags) -> Self {
        let mut filler = flags.machine_init.generator();

        let mut sim = Self {
            mem: MemArray::new(&mut filler),
            reg_file: RegFile::new(&mut filler),
            pc: USER_START,
            psr: PSR::new(),
            saved_sp: USER_START,
            mcr: true,
            state: ExecState::Ready,
            fetch_pc: USER_START,
            instructions_run: 0,
            last_stop: None,
            exceeded_limit: false,
            parked_bp: None,

            flags,
            breakpoints: Default::default(),
            device_handler: Default::default()
        };

        sim.mem.as_slice_mut()[usize::from(IO_START)..].fill(0); // clear IO section
        sim
    }

    /// Resets the simulator.
    ///
    /// This resets the state of the `Simulator` back to before any execution calls,
    /// while preserving configuration and debug state.
    ///
    /// Note that this function preserves:
    /// - Flags
    /// - Breakpoints (new breakpoints still get fresh ids)
    /// - Devices (their state is reset)
    ///
    /// This does not reload memory images.
    pub fn reset(&mut self) {
        let flags = self.flags;
        let breakpoints = std::mem::take(&mut self.breakpoints);
        let dev_handler = std::mem::take(&mut self.device_handler);

        *self = Simulator::new(flags);
        self.breakpoints = breakpoints;
        self.device_handler = dev_handler;
        self.device_handler.io_reset();
        log::debug!("simulator reset");
    }

    /// Loads a memory image into this simulator.
    ///
    /// This copies every block of the image into memory, sets the PC to the image's entry point
    /// and arms the simulator so it can run again.
    pub fn load(&mut self, image: &MemImage) {
        for (start, words) in image.blocks() {
            self.mem.copy_block(start, words);
        }
        self.set_pc(image.entry());

        log::debug!("loaded {} block(s), entry at x{:04X}", image.blocks().count(), self.pc);
    }

    /// Reads a register by number.
    ///
    /// # Errors
    ///
    /// Fails with [`SimErr::InvalidRegister`] if `reg` is not between 0 and 7.
    pub fn read_reg(&self, reg: u8) -> Result<u16, SimErr> {
        Ok(self.reg_file[Reg::try_from(reg)?])
    }
    /// Writes a register by number.
    ///
    /// # Errors
    ///
    /// Fails with [`SimErr::InvalidRegister`] if `reg` is not between 0 and 7.
    pub fn write_reg(&mut self, reg: u8, value: u16) -> Result<(), SimErr> {
        self.reg_file[Reg::try_from(reg)?] = value;
        Ok(())
    }
    /// Gets a reference to the register file.
    pub fn reg_file(&self) -> &RegFile {
        &self.reg_file
    }

    /// The program counter.
    pub fn pc(&self) -> u16 {
        self.pc
    }
    /// Sets the program counter.
    ///
    /// This also arms the simulator, so a halted or faulted program can run again from `addr`.
    pub fn set_pc(&mut self, addr: u16) {
        self.pc = addr;
        self.fetch_pc = addr;
        self.mcr = true;
        self.state = ExecState::Ready;
        self.parked_bp = None;
    }

    /// Gets a reference to the PSR.
    pub fn psr(&self) -> &PSR {
        &self.psr
    }
    /// Reads the PSR as a word.
    pub fn read_psr(&self) -> u16 {
        self.psr.get()
    }
    /// Writes the PSR. All bits are stored verbatim.
    pub fn write_psr(&mut self, value: u16) {
        self.psr.set(value);
    }

    /// Whether the machine control register's clock enable bit is set.
    pub fn mcr(&self) -> bool {
        self.mcr
    }

    /// Gets a reference to the memory.
    ///
    /// Memory-mapped IO locations hold the value of their last access.
    pub fn mem(&self) -> &MemArray {
        &self.mem
    }
    /// Reads the word at the provided address.
    ///
    /// This never changes the state of the machine's devices
    /// (e.g., reading `KBDR` does not consume input),
    /// so it is safe to use to display memory.
    pub fn read_mem(&mut self, addr: u16) -> u16 {
        self.load_word(addr, false)
    }
    /// Writes the word at the provided address.
    ///
    /// Writes to memory-mapped IO go to the device mapped there
    /// (e.g., writing `DDR` displays a character).
    pub fn write_mem(&mut self, addr: u16, value: u16) {
        self.store_word(addr, value);
    }

    /// The execution state of the simulator.
    pub fn state(&self) -> &ExecState {
        &self.state
    }
    /// Whether the program has halted.
    pub fn is_halted(&self) -> bool {
        matches!(self.state, ExecState::Halted)
    }
    /// The error which faulted the program, if it faulted.
    pub fn fault(&self) -> Option<&SimErr> {
        match &self.state {
            ExecState::Faulted(e) => Some(e),
            _ => None
        }
    }

    /// The number of instructions retired since this simulator was created or reset.
    pub fn instructions_run(&self) -> u64 {
        self.instructions_run
    }
    /// Whether the last run stopped because it reached its instruction limit.
    pub fn did_exceed_inst_limit(&self) -> bool {
        self.exceeded_limit
    }
    /// Why the last run stopped (`None` if nothing was run yet).
    pub fn last_stop(&self) -> Option<&StopReason> {
        self.last_stop.as_ref()
    }

    /// Replaces the keyboard's input queue with the given string.
    pub fn set_input_string(&mut self, input: &str) {
        self.device_handler.keyboard.set_input(input.as_bytes());
    }
    /// Appends the given string to the keyboard's input queue.
    pub fn push_input_string(&mut self, input: &str) {
        self.device_handler.keyboard.extend_input(input.as_bytes());
    }
    /// Sets the number of instructions which must retire before each input character becomes ready.
    pub fn set_input_char_delay(&mut self, delay: u64) {
        self.device_handler.keyboard.set_char_delay(delay);
    }
    /// The bytes the program has written to the display.
    pub fn output(&self) -> &[u8] {
        self.device_handler.display.output()
    }
    /// The display output, as a string (invalid UTF-8 is replaced).
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(self.output()).into_owned()
    }
    /// Clears the display output.
    pub fn clear_output(&mut self) {
        self.device_handler.display.clear_output();
    }

    /// Computes the default memory access context,
    /// which are the default flags to use for accesses made by the running program.
    pub fn default_mem_ctx(&self) -> MemAccessCtx {
        MemAccessCtx {
            privileged: self.psr.privileged() || self.flags.ignore_privilege,
            io_effects: true
        }
    }

    /// Reads a word, updating memory-mapped IO locations first.
    fn load_word(&mut self, addr: u16, io_effects: bool) -> u16 {
        match addr {
            PSR_ADDR => self.mem[addr] = self.psr.get(),
            MCR_ADDR => self.mem[addr] = u16::from(self.mcr) << 15,
            IO_START.. => {
                if let Some(data) = self.device_handler.io_read(addr, io_effects) {
                    self.mem[addr] = data;
                }
            },
            _ => {}
        }
        self.mem[addr]
    }
    /// Writes a word, delegating memory-mapped IO locations to their device.
    fn store_word(&mut self, addr: u16, data: u16) {
        let success = match addr {
            PSR_ADDR => {
                self.psr.set(data);
                true
            },
            MCR_ADDR => {
                self.mcr = (data as i16) < 0;
                true
            },
            IO_START.. => self.device_handler.io_write(addr, data),
            _ => true
        };

        // Duplicate write in mem array:
        if success {
            self.mem[addr] = data;
        }
    }

    /// Fallibly reads the word at the provided address, erroring if not possible.
    fn access_read(&mut self, addr: u16, ctx: MemAccessCtx) -> Result<u16, SimErr> {
        if !ctx.privileged && !(USER_START..IO_START).contains(&addr) {
            return Err(SimErr::AccessViolation { pc: self.fetch_pc, addr });
        }
        Ok(self.load_word(addr, ctx.io_effects))
    }
    /// Fallibly writes the word at the provided address, erroring if not possible.
    fn access_write(&mut self, addr: u16, data: u16, ctx: MemAccessCtx) -> Result<(), SimErr> {
        if !ctx.privileged && !(USER_START..IO_START).contains(&addr) {
            return Err(SimErr::AccessViolation { pc: self.fetch_pc, addr });
        }
        self.store_word(addr, data);
        Ok(())
    }

    /// Sets the condition codes using the provided result.
    fn set_cc(&mut self, result: u16) {
        match (result as i16).cmp(&0) {
            std::cmp::Ordering::Less    => self.psr.set_cc(0b100),
            std::cmp::Ordering::Equal   => self.psr.set_cc(0b010),
            std::cmp::Ordering::Greater => self.psr.set_cc(0b001),
        }
    }

    /// Trap and interrupt handler.
    ///
    /// This switches to supervisor mode, pushes the PSR and PC onto the supervisor stack
    /// and jumps to `mem[vect]`.
    /// `0x00-0xFF` represents a trap, `0x100-0x1FF` represents an interrupt
    /// (which also raises the priority to `priority`).
    fn handle_interrupt(&mut self, vect: u16, priority: Option<u8>) -> Result<(), SimErr> {
        if !self.psr.privileged() {
            std::mem::swap(&mut self.saved_sp, &mut self.reg_file[R6]);
        }

        let old_psr = self.psr.get();
        let old_pc = self.pc;

        self.psr.set_privileged(true);
        let mctx = self.default_mem_ctx();

        // push PSR and PC to stack
        let sp = self.reg_file[R6];
        self.reg_file[R6] = sp.wrapping_sub(2);
        self.access_write(sp.wrapping_sub(1), old_psr, mctx)?;
        self.access_write(sp.wrapping_sub(2), old_pc, mctx)?;

        self.psr.set_cc_z();
        if let Some(prio) = priority {
            self.psr.set_priority(prio);
        }

        self.pc = self.access_read(vect, mctx)?;
        Ok(())
    }

    /// Simulate one step, executing one instruction.
    ///
    /// On error, the PC may point anywhere. [`Simulator::step`] handles rollback.
    fn _step_inner(&mut self) -> Result<(), StepBreak> {
        self.fetch_pc = self.pc;

        // If an interrupt is pending with a high enough priority,
        // enter its handler and execute the handler's first instruction in this step.
        if let Some(int) = self.device_handler.poll_interrupt() {
            if int.priority > self.psr.priority() {
                log::debug!("entering interrupt x{:02X} (priority {})", int.vect, int.priority);
                self.handle_interrupt(INT_TABLE + u16::from(int.vect), Some(int.priority))?;
                self.fetch_pc = self.pc;
            }
        }

        let word = self.access_read(self.pc, self.default_mem_ctx())?;
        let instr = SimInstr::decode(word);
        if let SimInstr::Reserved(word) = instr {
            return Err(SimErr::IllegalInstruction { pc: self.fetch_pc, word }.into());
        }
        log::trace!("x{:04X}: {instr}", self.fetch_pc);

        self.pc = self.pc.wrapping_add(1);
        let mut halt = false;

        match instr {
            SimInstr::BR(cc, off) => {
                if cc & self.psr.cc() != 0 {
                    self.pc = self.pc.wrapping_add_signed(off.get());
                }
            },
            SimInstr::ADD(dr, sr1, sr2) => {
                let val1 = self.reg_file[sr1];
                let val2 = match sr2 {
                    ImmOrReg::Imm(i2) => i2.get() as u16,
                    ImmOrReg::Reg(r2) => self.reg_file[r2],
                };

                let result = val1.wrapping_add(val2);
                self.reg_file[dr] = result;
                self.set_cc(result);
            },
            SimInstr::LD(dr, off) => {
                let ea = self.pc.wrapping_add_signed(off.get());
                let val = self.access_read(ea, self.default_mem_ctx())?;
                self.reg_file[dr] = val;
                self.set_cc(val);
            },
            SimInstr::ST(sr, off) => {
                let ea = self.pc.wrapping_add_signed(off.get());
                self.access_write(ea, self.reg_file[sr], self.default_mem_ctx())?;
            },
            SimInstr::JSR(op) => {
                // JSRR R7 jumps to the old R7, so the target is computed before linking.
                let addr = match op {
                    ImmOrReg::Imm(off) => self.pc.wrapping_add_signed(off.get()),
                    ImmOrReg::Reg(br)  => self.reg_file[br],
                };

                self.reg_file[R7] = self.pc;
                self.pc = addr;
            },
            SimInstr::AND(dr, sr1, sr2) => {
                let val1 = self.reg_file[sr1];
                let val2 = match sr2 {
                    ImmOrReg::Imm(i2) => i2.get() as u16,
                    ImmOrReg::Reg(r2) => self.reg_file[r2],
                };

                let result = val1 & val2;
                self.reg_file[dr] = result;
                self.set_cc(result);
            },
            SimInstr::LDR(dr, br, off) => {
                let ea = self.reg_file[br].wrapping_add_signed(off.get());
                let val = self.access_read(ea, self.default_mem_ctx())?;
                self.reg_file[dr] = val;
                self.set_cc(val);
            },
            SimInstr::STR(sr, br, off) => {
                let ea = self.reg_file[br].wrapping_add_signed(off.get());
                self.access_write(ea, self.reg_file[sr], self.default_mem_ctx())?;
            },
            SimInstr::RTI => {
                if !(self.psr.privileged() || self.flags.ignore_privilege) {
                    return Err(SimErr::PrivilegeViolation { pc: self.fetch_pc }.into());
                }
                let mctx = self.default_mem_ctx();

                // Pop PC and PSR from the stack
                let sp = self.reg_file[R6];
                let pc = self.access_read(sp, mctx)?;
                let psr = self.access_read(sp.wrapping_add(1), mctx)?;
                self.reg_file[R6] = sp.wrapping_add(2);

                self.pc = pc;
                self.psr = PSR(psr);

                if !self.psr.privileged() {
                    std::mem::swap(&mut self.saved_sp, &mut self.reg_file[R6]);
                }
            },
            SimInstr::NOT(dr, sr) => {
                let result = !self.reg_file[sr];
                self.reg_file[dr] = result;
                self.set_cc(result);
            },
            SimInstr::LDI(dr, off) => {
                let shifted_pc = self.pc.wrapping_add_signed(off.get());
                let ea = self.access_read(shifted_pc, self.default_mem_ctx())?;
                let val = self.access_read(ea, self.default_mem_ctx())?;
                self.reg_file[dr] = val;
                self.set_cc(val);
            },
            SimInstr::STI(sr, off) => {
                let shifted_pc = self.pc.wrapping_add_signed(off.get());
                let ea = self.access_read(shifted_pc, self.default_mem_ctx())?;
                self.access_write(ea, self.reg_file[sr], self.default_mem_ctx())?;
            },
            SimInstr::JMP(br) => {
                self.pc = self.reg_file[br];
            },
            SimInstr::LEA(dr, off) => {
                let ea = self.pc.wrapping_add_signed(off.get());
                self.reg_file[dr] = ea;
                self.set_cc(ea);
            },
            SimInstr::TRAP(vect) if vect.get() == HALT_VECT && !self.flags.use_real_halt => {
                halt = true;
            },
            SimInstr::TRAP(vect) => {
                self.handle_interrupt(vect.get(), None)?;
            },
            SimInstr::Reserved(_) => unreachable!("reserved words are rejected before execution"),
        }

        self.instructions_run += 1;
        self.device_handler.tick();

        match halt || !self.mcr {
            true  => Err(StepBreak::Halt),
            false => Ok(()),
        }
    }

    /// Simulate one step, executing one instruction,
    /// and update the execution state with the result.
    ///
    /// A faulting step is not counted as executed. It leaves the registers, PSR
    /// and stack as they were before the step, and the PC at the instruction the step started at
    /// (which is in front of any interrupt the step entered).
    fn step(&mut self) -> Result<(), StepBreak> {
        match &self.state {
            ExecState::Ready => {},
            ExecState::Halted => return Err(StepBreak::Halt),
            ExecState::Faulted(e) => return Err(StepBreak::Err(e.clone())),
        }

        let checkpoint = Checkpoint::take(self);
        let result = self._step_inner();
        match &result {
            Ok(()) => self.parked_bp = None,
            Err(StepBreak::Halt) => {
                log::debug!("halted at x{:04X}", self.fetch_pc);
                self.parked_bp = None;
                self.state = ExecState::Halted;
            },
            Err(StepBreak::Err(e)) => {
                log::warn!("{e}");
                checkpoint.restore(self);
                self.state = ExecState::Faulted(e.clone());
            },
        }
        result
    }

    /// Simulate one step, executing one instruction.
    ///
    /// This does nothing if the program has already halted.
    ///
    /// # Errors
    ///
    /// Returns the fault if the instruction faults (or if the program already faulted).
    pub fn step_in(&mut self) -> Result<(), SimErr> {
        match self.step() {
            Ok(()) => Ok(()),
            Err(StepBreak::Halt) => Ok(()),
            Err(StepBreak::Err(e)) => Err(e)
        }
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

/// A wrapper over `u16` in order to faciliate the PSR.
///
/// The word is encoded as the following:
/// - `PSR[15..16]`: Privilege mode (0 = supervisor, 1 = user)
/// - `PSR[8..11]`:  Interrupt priority
/// - `PSR[0..3]`:   Condition codes
///
/// ```text
///         privilege
///         |     interrupt priority
///         |     |         condition codes
///         |     |         |
///         V     V         V
/// 0x8002: 1000 0000 0000 0010
///         ~     ~~~       ~~~
/// ```
///
/// Each of these are exposed as the [`PSR::privileged`], [`PSR::priority`], and [`PSR::cc`] values.
/// The other bits are kept as written.
#[allow(clippy::upper_case_acronyms)]
#[derive(PartialEq, Eq, Hash, Clone, Copy)]
#[repr(transparent)]
pub struct PSR(u16);

impl PSR {
    /// Creates a PSR with a default value (user mode, `z` condition code).
    pub fn new() -> Self {
        PSR(0x8002)
    }

    /// Checks whether the simulator is in privileged mode.
    /// - `true` = supervisor mode
    /// - `false` = user mode
    pub fn privileged(&self) -> bool {
        (self.0 >> 15) == 0
    }
    /// Checks the current interrupt priority of the simulator.
    pub fn priority(&self) -> u8 {
        ((self.0 >> 8) & 0b111) as u8
    }
    /// Checks the condition code of the simulator.
    pub fn cc(&self) -> u8 {
        (self.0 & 0b111) as u8
    }
    /// Checks the condition code of the simulator is `n`.
    pub fn is_n(&self) -> bool {
        self.cc() & 0b100 != 0
    }
    /// Checks the condition code of the simulator is `z`.
    pub fn is_z(&self) -> bool {
        self.cc() & 0b010 != 0
    }
    /// Checks the condition code of the simulator is `p`.
    pub fn is_p(&self) -> bool {
        self.cc() & 0b001 != 0
    }

    /// Gets the bit-representation of the PSR.
    pub fn get(&self) -> u16 {
        self.0
    }
    /// Sets the PSR to the provided data value, verbatim.
    pub fn set(&mut self, data: u16) {
        self.0 = data;
    }
    /// Sets whether the simulator is in privileged mode.
    pub fn set_privileged(&mut self, privl: bool) {
        self.0 &= 0x7FFF;
        self.0 |= u16::from(!privl) << 15;
    }
    /// Sets the current interrupt priority of the simulator.
    pub fn set_priority(&mut self, prio: u8) {
        self.0 &= 0xF8FF;
        self.0 |= u16::from(prio & 0b111) << 8;
    }
    /// Sets the condition code of the simulator.
    pub fn set_cc(&mut self, mut cc: u8) {
        self.0 &= 0xFFF8;

        // Guard from invalid CC.
        cc &= 0b111;
        if cc.count_ones() != 1 { cc = 0b010 };
        self.0 |= u16::from(cc);
    }
    /// Sets the condition code of the simulator to `n`.
    pub fn set_cc_n(&mut self) {
        self.set_cc(0b100)
    }
    /// Sets the condition code of the simulator to `z`.
    pub fn set_cc_z(&mut self) {
        self.set_cc(0b010)
    }
    /// Sets the condition code of the simulator to `p`.
    pub fn set_cc_p(&mut self) {
        self.set_cc(0b001)
    }
}
impl Default for PSR {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for PSR {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;
        struct CC(u8);

        impl std::fmt::Debug for CC {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                if self.0 & 0b100 != 0 { f.write_char('N')?; };
                if self.0 & 0b010 != 0 { f.write_char('Z')?; };
                if self.0 & 0b001 != 0 { f.write_char('P')?; };
                Ok(())
            }
        }

        f.debug_struct("PSR")
            .field("privileged", &self.privileged())
            .field("priority", &self.priority())
            .field("cc", &CC(self.cc()))
            .finish()
    }
}
