use std::collections::VecDeque;

use super::{ExternalDevice, Interrupt, KBDR, KBSR, KB_INTP, KB_INTV};

/// Keyboard that reads its input off of a queue of bytes.
///
/// The keyboard is ready (`KBSR[15]`) whenever the queue is non-empty
/// (and the configured character delay has passed).
/// Reading `KBDR` while the keyboard is ready consumes exactly one byte.
/// Reading `KBDR` while it is not ready consumes nothing.
///
/// ```
/// use lc3_sim_core::sim::device::{BufferedKeyboard, ExternalDevice};
///
/// let mut kb = BufferedKeyboard::new();
/// kb.set_input(b"hi");
/// assert_eq!(kb.io_read(0xFE02, true), Some(u16::from(b'h')));
/// assert_eq!(kb.pending(), 1);
/// ```
#[derive(Debug, Default, Clone)]
pub struct BufferedKeyboard {
    input: VecDeque<u8>,
    interrupts_enabled: bool,
    char_delay: u64,
    cooldown: u64
}
impl BufferedKeyboard {
    /// Creates a new keyboard with an empty input queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the keyboard has input to take.
    pub fn ready(&self) -> bool {
        !self.input.is_empty() && self.cooldown == 0
    }
    /// Whether the program has enabled keyboard interrupts (`KBSR[14]`).
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts_enabled
    }

    /// Replaces the input queue with the given bytes.
    pub fn set_input(&mut self, input: &[u8]) {
        self.input.clear();
        self.input.extend(input);
        self.cooldown = self.char_delay;
    }
    /// Appends the given bytes to the input queue.
    pub fn extend_input(&mut self, input: &[u8]) {
        if self.input.is_empty() {
            self.cooldown = self.char_delay;
        }
        self.input.extend(input);
    }
    /// The number of bytes which have not been consumed yet.
    pub fn pending(&self) -> usize {
        self.input.len()
    }
    /// Clears the input queue.
    pub fn clear_input(&mut self) {
        self.input.clear();
    }

    /// Sets the number of instructions which must retire
    /// before each queued byte becomes ready.
    pub fn set_char_delay(&mut self, delay: u64) {
        self.char_delay = delay;
        self.cooldown = self.cooldown.min(delay);
    }

    fn pop_input(&mut self) -> Option<u8> {
        if !self.ready() { return None };

        let byte = self.input.pop_front()?;
        self.cooldown = self.char_delay;
        log::trace!("keyboard consumed {byte:#04x}, {} pending", self.input.len());
        Some(byte)
    }
}

impl ExternalDevice for BufferedKeyboard {
    fn io_read(&mut self, addr: u16, effectful: bool) -> Option<u16> {
        match addr {
            KBSR => {
                Some(u16::from(self.ready()) << 15 | u16::from(self.interrupts_enabled) << 14)
            },
            KBDR if effectful => self.pop_input().map(u16::from),
            KBDR if self.ready() => self.input.front().copied().map(u16::from),
            _ => None
        }
    }

    fn io_write(&mut self, addr: u16, data: u16) -> bool {
        match addr {
            KBSR => {
                self.interrupts_enabled = (data >> 14) & 1 != 0;
                true
            },
            _ => false
        }
    }

    fn io_reset(&mut self) {
        self.input.clear();
        self.interrupts_enabled = false;
        self.cooldown = 0;
    }

    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        match self.ready() && self.interrupts_enabled {
            true  => Some(Interrupt::vectored(KB_INTV, KB_INTP)),
            false => None,
        }
    }

    fn tick(&mut self) {
        if !self.input.is_empty() {
            self.cooldown = self.cooldown.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BufferedKeyboard;
    use crate::sim::device::{ExternalDevice, KBDR, KBSR};

    #[test]
    fn test_read_only_consumes_when_ready() {
        let mut kb = BufferedKeyboard::new();
        assert_eq!(kb.io_read(KBSR, true), Some(0));
        assert_eq!(kb.io_read(KBDR, true), None);

        kb.set_input(b"84");
        assert_eq!(kb.io_read(KBSR, true), Some(0x8000));
        // effectless reads do not consume
        assert_eq!(kb.io_read(KBDR, false), Some(u16::from(b'8')));
        assert_eq!(kb.pending(), 2);

        assert_eq!(kb.io_read(KBDR, true), Some(u16::from(b'8')));
        assert_eq!(kb.io_read(KBDR, true), Some(u16::from(b'4')));
        assert_eq!(kb.io_read(KBDR, true), None);
        assert_eq!(kb.pending(), 0);
    }

    #[test]
    fn test_char_delay() {
        let mut kb = BufferedKeyboard::new();
        kb.set_char_delay(2);
        kb.set_input(b"ab");

        assert!(!kb.ready());
        kb.tick();
        assert!(!kb.ready());
        kb.tick();
        assert!(kb.ready());
        assert_eq!(kb.io_read(KBDR, true), Some(u16::from(b'a')));

        // delay restarts after each consumed byte
        assert!(!kb.ready());
        assert_eq!(kb.io_read(KBDR, true), None);
        kb.tick();
        kb.tick();
        assert_eq!(kb.io_read(KBDR, true), Some(u16::from(b'b')));
    }

    #[test]
    fn test_interrupt_enable_bit() {
        let mut kb = BufferedKeyboard::new();
        assert!(kb.io_write(KBSR, 0x4000));
        assert!(kb.interrupts_enabled());
        assert_eq!(kb.io_read(KBSR, false), Some(0x4000));
        assert!(!kb.io_write(KBDR, 0x4000));

        kb.io_reset();
        assert!(!kb.interrupts_enabled());
    }
}
