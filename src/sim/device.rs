//! Handlers for external devices connected to the Simulator.
//!
//! This handles IO devices (such as the keyboard and display)
//! and handles interrupts.
//!
//! The core types here are:
//! - [`ExternalDevice`]: A device which can be connected to the Simulator.
//! - [`DeviceHandler`]: The handler for the Simulator's IO ports & interrupts.
//!
//! This module also provides some IO devices:
//! - [`BufferedKeyboard`]: Keyboard device that reads off of an input queue.
//! - [`BufferedDisplay`]: Display device that writes to an output buffer.
//!
//! The keyboard and display are polled devices. The keyboard only interrupts
//! if a program enables interrupts by setting bit 14 of `KBSR`.

mod keyboard;
mod display;

use super::IO_START;
pub use keyboard::BufferedKeyboard;
pub use display::BufferedDisplay;

/// Keyboard status register.
pub const KBSR: u16 = 0xFE00;
/// Keyboard data register.
pub const KBDR: u16 = 0xFE02;
/// Display status register.
pub const DSR:  u16 = 0xFE04;
/// Display data register.
pub const DDR:  u16 = 0xFE06;
/// Interrupt vector of the keyboard (its handler address lives at `x0100 + KB_INTV`).
pub const KB_INTV: u8 = 0x80;
/// Interrupt priority of the keyboard.
pub const KB_INTP: u8 = 0b100;
const DEVICE_SLOTS: usize = IO_START.wrapping_neg() as usize;

/// An external device, which can be accessed via memory-mapped IO or via interrupts.
pub trait ExternalDevice: Send + 'static {
    /// Reads the data at the given memory-mapped address.
    ///
    /// If `effectful` is false, this read must not change the state of the device.
    ///
    /// If successful, this returns the value returned from that address.
    /// If unsuccessful, this returns `None` and the memory location keeps its last value.
    fn io_read(&mut self, addr: u16, effectful: bool) -> Option<u16>;

    /// Writes the data to the given memory-mapped address.
    ///
    /// This returns whether the write was successful or not.
    fn io_write(&mut self, addr: u16, data: u16) -> bool;

    /// Resets device.
    fn io_reset(&mut self);

    /// During each instruction cycle, this function is called once to see whether
    /// to trigger an interrupt.
    fn poll_interrupt(&mut self) -> Option<Interrupt>;

    /// Called once after every instruction the simulator retires.
    fn tick(&mut self) {}
}

fn _get_dev_id(ports: &[u16], port: u16) -> Option<u16> {
    ports.get(port.checked_sub(IO_START)? as usize).copied()
}

/// The central hub for all external devices for the Simulator.
///
/// The keyboard and display are always present at their fixed ports.
/// Other devices can be attached to free ports with [`DeviceHandler::add_device`].
pub struct DeviceHandler {
    /// The keyboard, mapped to `KBSR` and `KBDR`.
    pub keyboard: BufferedKeyboard,
    /// The display, mapped to `DSR` and `DDR`.
    pub display: BufferedDisplay,
    custom: Vec<Option<Box<dyn ExternalDevice>>>,
    io_ports: Box<[u16; DEVICE_SLOTS]>
}

impl DeviceHandler {
    const NULL_DEV: u16 = 0;
    const KB_DEV: u16 = 1;
    const DS_DEV: u16 = 2;
    const FIRST_CUSTOM_DEV: u16 = 3;

    /// Creates a new device handler.
    pub fn new() -> Self {
        let io_ports = match vec![Self::NULL_DEV; DEVICE_SLOTS].into_boxed_slice().try_into() {
            Ok(ports) => ports,
            Err(_) => unreachable!("array should have the correct number of elements"),
        };

        let mut handler = Self {
            keyboard: BufferedKeyboard::new(),
            display: BufferedDisplay::new(),
            custom: vec![],
            io_ports
        };

        handler.set_port(KBSR, Self::KB_DEV);
        handler.set_port(KBDR, Self::KB_DEV);
        handler.set_port(DSR,  Self::DS_DEV);
        handler.set_port(DDR,  Self::DS_DEV);

        handler
    }

    /// Gets the device ID bound to a given address.
    fn get_dev_id(&self, port: u16) -> Option<u16> {
        _get_dev_id(&*self.io_ports, port)
    }
    // Sets port, failing if the port is occupied or not an IO port.
    fn set_port(&mut self, port: u16, dev_id: u16) -> bool {
        let Some(offset) = port.checked_sub(IO_START) else { return false };
        match self.io_ports.get_mut(usize::from(offset)) {
            Some(d) if *d == Self::NULL_DEV => {
                *d = dev_id;
                true
            },
            _ => false
        }
    }

    fn device_mut(&mut self, dev_id: u16) -> Option<&mut dyn ExternalDevice> {
        match dev_id {
            Self::NULL_DEV => None,
            Self::KB_DEV => Some(&mut self.keyboard as &mut dyn ExternalDevice),
            Self::DS_DEV => Some(&mut self.display as &mut dyn ExternalDevice),
            id => self.custom.get_mut(usize::from(id - Self::FIRST_CUSTOM_DEV))?
                .as_mut()
                .map(|d| &mut **d as &mut dyn ExternalDevice),
        }
    }

    fn devices_mut(&mut self) -> impl Iterator<Item = &mut dyn ExternalDevice> {
        [&mut self.keyboard as &mut dyn ExternalDevice, &mut self.display as &mut dyn ExternalDevice]
            .into_iter()
            .chain({
                self.custom.iter_mut()
                    .flatten()
                    .map(|d| &mut **d as &mut dyn ExternalDevice)
            })
    }

    /// Add a new device (which is not a keyboard or a display).
    ///
    /// This accepts an external device and the addresses which the device should act on.
    /// If successful, the ID of the device is returned.
    ///
    /// # Errors
    /// If the device cannot be added, it will be returned back to the user.
    ///
    /// The cases where the device cannot be added include:
    /// - The number of devices ever added exceeds [`u16::MAX`].
    /// - At least one of the addresses provided are already occupied by another device or not an IO port.
    pub fn add_device<D: ExternalDevice>(&mut self, dev: D, addrs: &[u16]) -> Result<u16, D> {
        let Some(dev_id) = u16::try_from(self.custom.len()).ok()
            .and_then(|n| n.checked_add(Self::FIRST_CUSTOM_DEV))
            else { return Err(dev) };

        let all_valid_ports = addrs.iter()
            .all(|&p| self.get_dev_id(p) == Some(Self::NULL_DEV));
        if !all_valid_ports { return Err(dev) };

        let dev: Box<dyn ExternalDevice> = Box::new(dev);
        self.custom.push(Some(dev));
        for &p in addrs {
            self.set_port(p, dev_id);
        }

        log::debug!("attached device {dev_id} to {} port(s)", addrs.len());
        Ok(dev_id)
    }
    /// Removes the device at the given device ID.
    ///
    /// The keyboard and display cannot be removed.
    /// This returns whether a device was removed.
    pub fn remove_device(&mut self, dev_id: u16) -> bool {
        let Some(idx) = dev_id.checked_sub(Self::FIRST_CUSTOM_DEV) else { return false };
        let Some(slot) = self.custom.get_mut(usize::from(idx)) else { return false };
        if slot.take().is_none() { return false };

        self.io_ports.iter_mut()
            .filter(|p| **p == dev_id)
            .for_each(|p| *p = Self::NULL_DEV);
        true
    }
}
impl Default for DeviceHandler {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for DeviceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandler")
            .field("keyboard", &self.keyboard)
            .field("display", &self.display)
            .field("custom", &self.custom.iter().flatten().count())
            .finish_non_exhaustive()
    }
}
impl ExternalDevice for DeviceHandler {
    /// Accesses the IO device mapped to the given address and tries [`ExternalDevice::io_read`] on it.
    fn io_read(&mut self, addr: u16, effectful: bool) -> Option<u16> {
        let dev_id = self.get_dev_id(addr)?;
        self.device_mut(dev_id)?.io_read(addr, effectful)
    }

    /// Accesses the IO device mapped to the given address and tries [`ExternalDevice::io_write`] on it.
    fn io_write(&mut self, addr: u16, data: u16) -> bool {
        let Some(dev_id) = self.get_dev_id(addr) else { return false };
        self.device_mut(dev_id).is_some_and(|d| d.io_write(addr, data))
    }

    /// Resets all the devices connected to this handler.
    fn io_reset(&mut self) {
        self.devices_mut().for_each(|d| d.io_reset());
    }

    /// Checks for interrupts on all devices, picking the one with the highest priority.
    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        self.devices_mut()
            .filter_map(|d| d.poll_interrupt())
            .max_by_key(|i| i.priority())
    }

    /// Ticks all the devices connected to this handler.
    fn tick(&mut self) {
        self.devices_mut().for_each(|d| d.tick());
    }
}

/// An interrupt.
///
/// This is output by an implementation of [`ExternalDevice::poll_interrupt`] if an interrupt should occur.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Interrupt {
    pub(super) vect: u8,
    pub(super) priority: u8
}
impl Interrupt {
    /// Creates a new vectored interrupt.
    ///
    /// Note that the priority is truncated to 3 bits.
    pub fn vectored(vect: u8, priority: u8) -> Self {
        Self { vect, priority: priority & 0b111 }
    }

    /// The interrupt vector (the handler address is stored at `x0100 + vect`).
    pub fn vect(&self) -> u8 {
        self.vect
    }
    /// The priority of this interrupt (0-7).
    pub fn priority(&self) -> u8 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::{DeviceHandler, ExternalDevice, Interrupt, DDR, KBDR, KBSR, KB_INTP, KB_INTV};

    /// A one-word register which counts its reads.
    #[derive(Default)]
    struct Counter {
        reads: u16,
        last_write: u16
    }
    impl ExternalDevice for Counter {
        fn io_read(&mut self, _addr: u16, effectful: bool) -> Option<u16> {
            if effectful { self.reads += 1; }
            Some(self.reads)
        }

        fn io_write(&mut self, _addr: u16, data: u16) -> bool {
            self.last_write = data;
            true
        }

        fn io_reset(&mut self) {
            *self = Self::default();
        }

        fn poll_interrupt(&mut self) -> Option<Interrupt> {
            None
        }
    }

    #[test]
    fn test_fixed_ports() {
        let mut handler = DeviceHandler::new();
        handler.keyboard.set_input(b"a");

        assert_eq!(handler.io_read(KBSR, true), Some(0x8000));
        assert_eq!(handler.io_read(KBDR, true), Some(u16::from(b'a')));
        assert_eq!(handler.io_read(KBSR, true), Some(0x0000));

        assert!(handler.io_write(DDR, 0x1241));
        assert_eq!(handler.display.output(), b"A");

        // unmapped port
        assert_eq!(handler.io_read(0xFE10, true), None);
        assert!(!handler.io_write(0xFE10, 1));
        // not an IO port
        assert_eq!(handler.io_read(0x3000, true), None);
    }

    #[test]
    fn test_custom_devices() {
        let mut handler = DeviceHandler::new();

        // occupied port
        assert!(handler.add_device(Counter::default(), &[KBSR]).is_err());
        // not an IO port
        assert!(handler.add_device(Counter::default(), &[0x4000]).is_err());

        let Ok(id) = handler.add_device(Counter::default(), &[0xFE10, 0xFE12]) else {
            panic!("device should have been added");
        };
        assert_eq!(handler.io_read(0xFE10, true), Some(1));
        assert_eq!(handler.io_read(0xFE12, false), Some(1));
        assert!(handler.io_write(0xFE12, 5));

        assert!(handler.remove_device(id));
        assert!(!handler.remove_device(id));
        assert_eq!(handler.io_read(0xFE10, true), None);

        // freed ports are reusable
        assert!(handler.add_device(Counter::default(), &[0xFE10]).is_ok());
    }

    #[test]
    fn test_keyboard_interrupt_poll() {
        let mut handler = DeviceHandler::new();
        handler.keyboard.set_input(b"z");
        assert_eq!(handler.poll_interrupt(), None);

        assert!(handler.io_write(KBSR, 0x4000));
        assert_eq!(handler.poll_interrupt(), Some(Interrupt::vectored(KB_INTV, KB_INTP)));

        handler.io_reset();
        assert_eq!(handler.poll_interrupt(), None);
    }
}
