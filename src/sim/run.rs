//! Run policies for the simulator.
//!
//! A run repeatedly steps the [`Simulator`] until a stopping condition holds.
//! The conditions are checked before every step, in this order:
//! 1. the program halted or faulted,
//! 2. the run used up its instruction budget,
//! 3. the PC is at a breakpoint (notifying the [`BreakpointHandler`]),
//! 4. (only for [`RunController::run_until_input_requested`]) the next instruction
//!    reads `KBDR` while the input queue is empty.
//!
//! A run which stops never executes the instruction it stopped in front of,
//! so resuming after a breakpoint or after supplying input neither skips nor repeats
//! any instruction.
//!
//! A breakpoint stops a run once. The following runs step off of it,
//! however many times they stop in front of it for other reasons,
//! until an instruction retires or the PC is moved.
//!
//! ```
//! use lc3_sim_core::image::MemImage;
//! use lc3_sim_core::sim::{RunController, Simulator, StopReason};
//! use lc3_sim_core::sim::debug::Breakpoint;
//!
//! let image: MemImage = "
//!     .orig x3000
//!     x1021 ; ADD R0, R0, #1
//!     x1021 ; ADD R0, R0, #1
//!     xF025 ; HALT
//! ".parse().unwrap();
//!
//! let mut sim = Simulator::default();
//! sim.load(&image);
//! let bp = sim.breakpoints.set(0x3001);
//!
//! let mut hits = vec![];
//! let mut on_hit = |sim: &Simulator, bp: &Breakpoint| hits.push((bp.id, sim.read_reg(0)));
//!
//! let outcome = RunController::new(&mut sim, &mut on_hit).run_to_halt(None);
//! assert_eq!(outcome.reason, StopReason::Breakpoint(bp));
//! assert_eq!(outcome.executed, 1);
//!
//! // resuming steps off of the breakpoint
//! let outcome = RunController::new(&mut sim, &mut on_hit).run_to_halt(None);
//! assert_eq!(outcome.reason, StopReason::Halted);
//! assert_eq!(hits, vec![(bp.id, Ok(1))]);
//! ```

use crate::ast::sim::SimInstr;

use super::debug::{Breakpoint, BreakpointHandler, IgnoreHits};
use super::device::KBDR;
use super::{ExecState, MemAccessCtx, SimErr, Simulator};

/// Why a run stopped.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum StopReason {
    /// The program halted.
    Halted,
    /// The program faulted. The PC points at the faulting instruction.
    Faulted(SimErr),
    /// The run executed as many instructions as its limit allows.
    LimitExceeded,
    /// The next instruction reads the keyboard, but no input is ready.
    InputRequested,
    /// The next instruction is at a breakpoint.
    Breakpoint(Breakpoint),
    /// [`RunController::run_for`] executed all of its requested instructions.
    Paused
}
impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::Halted         => f.write_str("halted"),
            StopReason::Faulted(e)     => write!(f, "faulted: {e}"),
            StopReason::LimitExceeded  => f.write_str("exceeded instruction limit"),
            StopReason::InputRequested => f.write_str("waiting for input"),
            StopReason::Breakpoint(bp) => write!(f, "hit breakpoint {bp}"),
            StopReason::Paused         => f.write_str("paused"),
        }
    }
}

/// The result of a run.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RunOutcome {
    /// Why the run stopped.
    pub reason: StopReason,
    /// The number of instructions the run executed.
    pub executed: u64
}
impl RunOutcome {
    /// Whether the run stopped without a fault and without exceeding its limit.
    pub fn success(&self) -> bool {
        !matches!(self.reason, StopReason::Faulted(_) | StopReason::LimitExceeded)
    }
}

/// How many instructions a run may execute, and what to report when they are used up.
#[derive(Clone, Copy)]
enum Budget {
    Unbounded,
    Limit(u64),
    Steps(u64)
}

/// Drives a [`Simulator`] under one of the run policies,
/// notifying a [`BreakpointHandler`] when a run stops at a breakpoint.
///
/// The controller borrows the simulator and the handler for its lifetime.
pub struct RunController<'s, 'h, H: BreakpointHandler + ?Sized> {
    sim: &'s mut Simulator,
    handler: &'h mut H
}
impl<'s, 'h, H: BreakpointHandler + ?Sized> RunController<'s, 'h, H> {
    /// Creates a new controller over the given simulator and handler.
    pub fn new(sim: &'s mut Simulator, handler: &'h mut H) -> Self {
        Self { sim, handler }
    }

    /// Gets a reference to the simulator.
    pub fn sim(&self) -> &Simulator {
        self.sim
    }

    /// Runs until the program halts or faults.
    ///
    /// If `limit` is `None`, the simulator's configured [`run_limit`] applies (if any).
    /// If the run executes `limit` instructions without halting,
    /// it stops with [`StopReason::LimitExceeded`] and [`Simulator::did_exceed_inst_limit`] is set.
    ///
    /// [`run_limit`]: super::SimFlags::run_limit
    pub fn run_to_halt(&mut self, limit: Option<u64>) -> RunOutcome {
        let budget = self.configured_budget(limit);
        self.run(budget, false)
    }

    /// Runs exactly `n` instructions, stopping early only if the program halts, faults or hits a breakpoint.
    ///
    /// The configured [`run_limit`] does not apply.
    ///
    /// [`run_limit`]: super::SimFlags::run_limit
    pub fn run_for(&mut self, n: u64) -> RunOutcome {
        self.run(Budget::Steps(n), false)
    }

    /// Runs until the program is about to read `KBDR` while the input queue is empty
    /// (or until it halts, faults or exceeds `limit`).
    ///
    /// Input which is queued but held back by the keyboard's character delay
    /// does not block: the program keeps running until the character arrives.
    ///
    /// After supplying input (e.g., with [`Simulator::set_input_string`]),
    /// calling this again resumes at the instruction which reads the keyboard.
    ///
    /// A program which polls `KBSR` without ever reading `KBDR` is not considered blocked.
    pub fn run_until_input_requested(&mut self, limit: Option<u64>) -> RunOutcome {
        let budget = self.configured_budget(limit);
        self.run(budget, true)
    }

    fn configured_budget(&self, limit: Option<u64>) -> Budget {
        match limit.or(self.sim.flags.run_limit) {
            Some(n) => Budget::Limit(n),
            None => Budget::Unbounded,
        }
    }

    fn run(&mut self, budget: Budget, stop_on_input: bool) -> RunOutcome {
        let sim = &mut *self.sim;
        let start = sim.instructions_run;
        sim.exceeded_limit = false;

        let reason = loop {
            let executed = sim.instructions_run - start;

            match &sim.state {
                ExecState::Ready => {},
                ExecState::Halted => break StopReason::Halted,
                ExecState::Faulted(e) => break StopReason::Faulted(e.clone()),
            }

            match budget {
                Budget::Limit(n) if executed >= n => break StopReason::LimitExceeded,
                Budget::Steps(n) if executed >= n => break StopReason::Paused,
                _ => {}
            }

            // Step off a breakpoint a previous run stopped at.
            if sim.parked_bp != Some(sim.pc) {
                if let Some(bp) = sim.breakpoints.at(sim.pc) {
                    log::debug!("stopped at breakpoint {bp}");
                    sim.parked_bp = Some(sim.pc);
                    self.handler.on_hit(sim, &bp);
                    break StopReason::Breakpoint(bp);
                }
            }

            if stop_on_input && next_reads_empty_keyboard(sim) {
                break StopReason::InputRequested;
            }

            // Faults and halts are recorded in the execution state and checked next iteration.
            let _ = sim.step();
        };

        let executed = sim.instructions_run - start;
        log::debug!("run stopped after {executed} instruction(s): {reason}");

        sim.exceeded_limit = matches!(reason, StopReason::LimitExceeded);
        sim.last_stop = Some(reason.clone());
        RunOutcome { reason, executed }
    }
}

/// Checks whether the instruction at the PC would read `KBDR` while no input is queued.
///
/// This only peeks at the machine: no IO effects occur.
fn next_reads_empty_keyboard(sim: &mut Simulator) -> bool {
    if sim.device_handler.keyboard.pending() != 0 { return false };

    let next_pc = sim.pc.wrapping_add(1);
    let ea = match SimInstr::decode(sim.read_mem(sim.pc)) {
        SimInstr::LD(_, off) => next_pc.wrapping_add_signed(off.get()),
        SimInstr::LDR(_, br, off) => sim.reg_file[br].wrapping_add_signed(off.get()),
        SimInstr::LDI(_, off) => {
            let ptr = next_pc.wrapping_add_signed(off.get());
            match sim.access_read(ptr, MemAccessCtx::omnipotent()) {
                Ok(ea) => ea,
                Err(_) => return false,
            }
        },
        _ => return false
    };

    ea == KBDR
}

impl Simulator {
    /// Creates a [`RunController`] which notifies `handler` of breakpoint hits.
    pub fn controller<'s, 'h, H: BreakpointHandler + ?Sized>(&'s mut self, handler: &'h mut H) -> RunController<'s, 'h, H> {
        RunController::new(self, handler)
    }

    /// Runs until the program halts or faults. See [`RunController::run_to_halt`].
    pub fn run_to_halt(&mut self, limit: Option<u64>) -> RunOutcome {
        RunController::new(self, &mut IgnoreHits).run_to_halt(limit)
    }
    /// Runs exactly `n` instructions. See [`RunController::run_for`].
    pub fn run_for(&mut self, n: u64) -> RunOutcome {
        RunController::new(self, &mut IgnoreHits).run_for(n)
    }
    /// Runs until the program blocks on keyboard input. See [`RunController::run_until_input_requested`].
    pub fn run_until_input_requested(&mut self, limit: Option<u64>) -> RunOutcome {
        RunController::new(self, &mut IgnoreHits).run_until_input_requested(limit)
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::debug::{Breakpoint, BreakpointHit};
    use crate::sim::{SimErr, SimFlags, Simulator, StopReason};

    fn sim_with(words: &[u16]) -> Simulator {
        let mut sim = Simulator::default();
        sim.mem.copy_block(0x3000, words);
        sim.set_pc(0x3000);
        sim
    }

    #[test]
    fn test_limit_is_exact() {
        for limit in [0, 1, 7, 100, 101] {
            let mut sim = sim_with(&[0x0FFF]); // BRnzp #-1
            let outcome = sim.run_to_halt(Some(limit));
            assert_eq!(outcome.reason, StopReason::LimitExceeded);
            assert_eq!(outcome.executed, limit);
            assert_eq!(sim.instructions_run(), limit);
            assert!(sim.did_exceed_inst_limit());
            assert!(!outcome.success());
        }
    }

    #[test]
    fn test_configured_limit() {
        let mut sim = sim_with(&[0x0FFF]);
        sim.flags.run_limit = Some(10);
        assert_eq!(sim.run_to_halt(None).executed, 10);
        // an explicit limit wins
        assert_eq!(sim.run_to_halt(Some(3)).executed, 3);
        // run_for ignores it
        assert_eq!(sim.run_for(25).reason, StopReason::Paused);
        assert_eq!(sim.instructions_run(), 38);
        assert!(!sim.did_exceed_inst_limit());
    }

    #[test]
    fn test_run_for_stops_at_halt() {
        let mut sim = sim_with(&[0x1021, 0x1021, 0xF025, 0x1021]);
        let outcome = sim.run_for(2);
        assert_eq!(outcome.reason, StopReason::Paused);
        assert!(outcome.success());

        let outcome = sim.run_for(10);
        assert_eq!(outcome.reason, StopReason::Halted);
        assert_eq!(outcome.executed, 1);

        // a halted machine does nothing
        let outcome = sim.run_to_halt(None);
        assert_eq!(outcome, crate::sim::RunOutcome { reason: StopReason::Halted, executed: 0 });
        assert_eq!(sim.read_reg(0), Ok(2));
    }

    #[test]
    fn test_fault_stops_run() {
        let mut sim = sim_with(&[0x1021, 0xD000]);
        let outcome = sim.run_to_halt(Some(50));
        let err = SimErr::IllegalInstruction { pc: 0x3001, word: 0xD000 };
        assert_eq!(outcome.reason, StopReason::Faulted(err));
        assert_eq!(outcome.executed, 1);
        assert!(!outcome.success());
        assert!(!sim.did_exceed_inst_limit());
    }

    #[test]
    fn test_breakpoint_stops_before_executing() {
        let mut sim = sim_with(&[0x1021, 0x1021, 0x1021, 0xF025]);
        let bp = sim.breakpoints.set(0x3002);

        let mut hits = vec![];
        let outcome = sim.controller(&mut |sim: &Simulator, bp: &Breakpoint| hits.push((*bp, sim.pc())))
            .run_to_halt(None);
        assert_eq!(outcome.reason, StopReason::Breakpoint(bp));
        assert_eq!(outcome.executed, 2);
        assert_eq!(hits, vec![(bp, 0x3002)]);
        assert_eq!(sim.last_stop(), Some(&StopReason::Breakpoint(bp)));

        let outcome = sim.run_to_halt(None);
        assert_eq!(outcome.reason, StopReason::Halted);
        assert_eq!(sim.read_reg(0), Ok(3));
    }

    #[test]
    fn test_breakpoint_in_loop_hits_every_iteration() {
        let mut sim = sim_with(&[
            0x1021, // ADD R0, R0, #1
            0x0FFE, // BRnzp #-2
        ]);
        sim.breakpoints.set(0x3001);

        for i in 1..=3 {
            let outcome = sim.run_to_halt(Some(100));
            assert!(matches!(outcome.reason, StopReason::Breakpoint(_)));
            assert_eq!(sim.read_reg(0), Ok(i));
        }
    }

    #[test]
    fn test_breakpoint_at_entry_stops_immediately() {
        let mut sim = sim_with(&[0xF025]);
        sim.breakpoints.set(0x3000);
        let outcome = sim.run_for(5);
        assert!(matches!(outcome.reason, StopReason::Breakpoint(Breakpoint { addr: 0x3000, .. })));
        assert_eq!(outcome.executed, 0);
    }

    #[test]
    fn test_breakpoint_on_keyboard_read_fires_once() {
        let mut sim = sim_with(&[
            0xA001, // LDI R0, #1
            0xF025, // HALT
            0xFE02, // .fill KBDR
        ]);
        let bp = sim.breakpoints.set(0x3000);

        let mut hits = 0;
        let mut count = |_: &Simulator, _: &Breakpoint| hits += 1;

        let outcome = sim.controller(&mut count).run_until_input_requested(Some(100));
        assert_eq!(outcome.reason, StopReason::Breakpoint(bp));

        // stopping for input in front of the breakpoint does not re-arm it
        let outcome = sim.controller(&mut count).run_until_input_requested(Some(100));
        assert_eq!(outcome.reason, StopReason::InputRequested);
        assert_eq!(outcome.executed, 0);

        sim.set_input_string("a");
        let outcome = sim.controller(&mut count).run_until_input_requested(Some(100));
        assert_eq!(outcome.reason, StopReason::Halted);
        assert_eq!(sim.read_reg(0), Ok(u16::from(b'a')));
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_breakpoint_survives_empty_run() {
        let mut sim = sim_with(&[0x1021, 0xF025]);
        let bp = sim.breakpoints.set(0x3000);

        assert_eq!(sim.run_to_halt(None).reason, StopReason::Breakpoint(bp));
        assert_eq!(sim.run_to_halt(Some(0)).reason, StopReason::LimitExceeded);
        assert_eq!(sim.run_to_halt(None).reason, StopReason::Halted);
        assert_eq!(sim.read_reg(0), Ok(1));

        // moving the PC back re-arms it
        sim.set_pc(0x3000);
        assert_eq!(sim.run_to_halt(None).reason, StopReason::Breakpoint(bp));
    }

    #[test]
    fn test_channel_handler() {
        let (mut tx, rx) = crossbeam_channel::unbounded::<BreakpointHit>();

        let mut sim = sim_with(&[0x1021, 0xF025]);
        let bp = sim.breakpoints.set(0x3001);
        sim.controller(&mut tx).run_to_halt(None);

        assert_eq!(rx.try_recv(), Ok(BreakpointHit { breakpoint: bp, pc: 0x3001, instructions_run: 1 }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_input_requested_before_read() {
        let mut sim = sim_with(&[
            0xA002, // LDI R0, #2
            0xF025, // HALT
            0x0000,
            0xFE02, // .fill KBDR
        ]);

        let outcome = sim.run_until_input_requested(Some(100));
        assert_eq!(outcome.reason, StopReason::InputRequested);
        assert_eq!(outcome.executed, 0);
        assert_eq!(sim.pc(), 0x3000);

        sim.set_input_string("ab");
        let outcome = sim.run_until_input_requested(Some(100));
        assert_eq!(outcome.reason, StopReason::Halted);
        assert_eq!(sim.read_reg(0), Ok(u16::from(b'a')));
        assert_eq!(sim.device_handler.keyboard.pending(), 1);
    }

    #[test]
    fn test_polling_status_is_not_blocked() {
        let mut sim = sim_with(&[
            0xA002, // LDI R0, #2   (KBSR)
            0x07FE, // BRzp #-2
            0xF025, // HALT
            0xFE00, // .fill KBSR
        ]);

        let outcome = sim.run_until_input_requested(Some(40));
        assert_eq!(outcome.reason, StopReason::LimitExceeded);
    }

    #[test]
    fn test_delayed_input_is_not_blocked() {
        let mut sim = sim_with(&[
            0xA002, // LDI R0, #2   (KBDR)
            0x05FE, // BRz #-2
            0xF025, // HALT
            0xFE02, // .fill KBDR
        ]);
        sim.set_input_char_delay(3);
        sim.set_input_string("a");

        // reads before the delay passes see nothing, and the program keeps running
        let outcome = sim.run_until_input_requested(Some(100));
        assert_eq!(outcome.reason, StopReason::Halted);
        assert_eq!(outcome.executed, 7);
        assert_eq!(sim.read_reg(0), Ok(u16::from(b'a')));
        assert_eq!(sim.device_handler.keyboard.pending(), 0);
    }

    #[test]
    fn test_isolated_instances() {
        let flags = SimFlags::default();
        let mut a = Simulator::new(flags);
        let mut b = Simulator::new(flags);
        a.write_mem(0x3000, 0x1021);
        a.set_input_string("x");

        a.run_for(1);
        assert_eq!(a.read_reg(0), Ok(1));
        assert_eq!(b.read_reg(0), Ok(0));
        assert_eq!(b.read_mem(0x3000), 0);
        assert_eq!(b.device_handler.keyboard.pending(), 0);
        assert_eq!(b.instructions_run(), 0);
    }
}
