use super::{ExternalDevice, Interrupt, DDR, DSR};

/// A display that appends its output to a buffer.
///
/// The display is always ready (`DSR[15]`).
/// Each write to `DDR` appends the low 8 bits of the written word.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BufferedDisplay {
    output: Vec<u8>
}
impl BufferedDisplay {
    /// Creates a new display with an empty output buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// The bytes written to the display so far.
    pub fn output(&self) -> &[u8] {
        &self.output
    }
    /// Clears all of the current output.
    pub fn clear_output(&mut self) {
        self.output.clear();
    }
    /// Takes all of the current output, leaving the buffer empty.
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.output)
    }
}
impl ExternalDevice for BufferedDisplay {
    fn io_read(&mut self, addr: u16, _effectful: bool) -> Option<u16> {
        match addr {
            DSR => Some(0x8000),
            _   => None
        }
    }

    fn io_write(&mut self, addr: u16, data: u16) -> bool {
        match addr {
            DDR => {
                self.output.push(data as u8);
                true
            },
            _ => false
        }
    }

    fn io_reset(&mut self) {
        self.output.clear();
    }

    fn poll_interrupt(&mut self) -> Option<Interrupt> {
        None
    }
}
