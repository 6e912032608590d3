//! Utilities to debug simulation.
//!
//! The key types here are:
//! - [`Breakpoint`]: a breakpoint at an address, identified by a stable id.
//! - [`Breakpoints`]: the set of breakpoints of a [`Simulator`].
//! - [`BreakpointHandler`]: what a run calls when it stops at a breakpoint.
//!
//! ```
//! use lc3_sim_core::sim::debug::Breakpoints;
//!
//! let mut bps = Breakpoints::new();
//! let a = bps.set(0x3002);
//! let b = bps.set(0x3002);
//! assert_ne!(a.id, b.id);
//!
//! assert!(bps.remove(a.id));
//! assert!(!bps.remove(a.id));
//! assert_eq!(bps.list(), vec![b]);
//! ```

use std::collections::BTreeMap;

use super::Simulator;

/// A breakpoint at a given address.
///
/// Ids are assigned by [`Breakpoints::set`] in increasing order
/// and are never reused by the same [`Breakpoints`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Breakpoint {
    /// The id of this breakpoint.
    pub id: u32,
    /// The address to break at.
    pub addr: u16
}
impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}: x{:04X}", self.id, self.addr)
    }
}

/// The breakpoints of a simulator.
///
/// A run stops before executing an instruction at any address in this set.
/// Multiple breakpoints may share an address.
#[derive(Debug, Default, Clone)]
pub struct Breakpoints {
    next_id: u32,
    by_id: BTreeMap<u32, Breakpoint>
}
impl Breakpoints {
    /// Creates an empty set of breakpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a breakpoint at the given address, returning the created breakpoint.
    pub fn set(&mut self, addr: u16) -> Breakpoint {
        let bp = Breakpoint { id: self.next_id, addr };
        self.next_id += 1;
        self.by_id.insert(bp.id, bp);

        log::debug!("set breakpoint {bp}");
        bp
    }

    /// Removes the breakpoint with the given id.
    ///
    /// This returns false if no breakpoint has that id.
    pub fn remove(&mut self, id: u32) -> bool {
        match self.by_id.remove(&id) {
            Some(bp) => {
                log::debug!("removed breakpoint {bp}");
                true
            },
            None => false
        }
    }

    /// Removes every breakpoint. Ids are still not reused afterwards.
    pub fn clear(&mut self) {
        self.by_id.clear();
    }

    /// Lists all breakpoints, in order of id.
    pub fn list(&self) -> Vec<Breakpoint> {
        self.iter().collect()
    }
    /// Iterates over all breakpoints, in order of id.
    pub fn iter(&self) -> impl Iterator<Item = Breakpoint> + '_ {
        self.by_id.values().copied()
    }

    /// Gets the breakpoint with the given id.
    pub fn get(&self, id: u32) -> Option<Breakpoint> {
        self.by_id.get(&id).copied()
    }
    /// Gets the first breakpoint (by id) at the given address.
    pub fn at(&self, addr: u16) -> Option<Breakpoint> {
        self.iter().find(|bp| bp.addr == addr)
    }

    /// The number of breakpoints.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }
    /// Whether there are no breakpoints.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// The notification sent when a run stops at a breakpoint.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct BreakpointHit {
    /// The breakpoint which was hit.
    pub breakpoint: Breakpoint,
    /// The PC of the machine (the instruction at this address has not executed yet).
    pub pc: u16,
    /// The number of instructions the machine has retired.
    pub instructions_run: u64
}
impl BreakpointHit {
    /// Creates the notification for a breakpoint hit on the given machine.
    pub fn new(sim: &Simulator, breakpoint: &Breakpoint) -> Self {
        Self { breakpoint: *breakpoint, pc: sim.pc(), instructions_run: sim.instructions_run() }
    }
}

/// A handler which is notified whenever a run stops at a breakpoint.
///
/// The handler is called synchronously from within the run, before the run returns.
/// It only gets a shared view of the machine, so it cannot advance execution.
pub trait BreakpointHandler {
    /// Called when the run stops at `bp`.
    fn on_hit(&mut self, sim: &Simulator, bp: &Breakpoint);
}
impl<F: FnMut(&Simulator, &Breakpoint)> BreakpointHandler for F {
    fn on_hit(&mut self, sim: &Simulator, bp: &Breakpoint) {
        self(sim, bp)
    }
}

/// A breakpoint handler which does nothing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IgnoreHits;
impl BreakpointHandler for IgnoreHits {
    fn on_hit(&mut self, _sim: &Simulator, _bp: &Breakpoint) {}
}

/// Sends each hit over the channel, without blocking.
///
/// If the channel is full or disconnected, the hit is dropped.
impl BreakpointHandler for crossbeam_channel::Sender<BreakpointHit> {
    fn on_hit(&mut self, sim: &Simulator, bp: &Breakpoint) {
        if let Err(e) = self.try_send(BreakpointHit::new(sim, bp)) {
            log::debug!("dropped breakpoint hit for {bp}: {e}");
        }
    }
}
