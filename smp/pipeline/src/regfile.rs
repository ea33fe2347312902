use log::trace;

pub const REGISTER_COUNT: usize = 32;

/// Architectural registers. r0 reads as zero and ignores writes.
///
/// Each register also counts the in-flight instructions that will write it, so decode can
/// tell whether the value held here is current or has to come from a later stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegFile {
    regs: [u64; REGISTER_COUNT],
    pending: [u8; REGISTER_COUNT],
}

impl Default for RegFile {
    fn default() -> Self {
        RegFile::new()
    }
}

impl RegFile {
    pub fn new() -> RegFile {
        RegFile {
            regs: [0; REGISTER_COUNT],
            pending: [0; REGISTER_COUNT],
        }
    }

    #[inline(always)]
    pub fn read(&self, reg: u8) -> u64 {
        match reg {
            0 => 0,
            _ => self.regs[reg as usize],
        }
    }

    pub(crate) fn write(&mut self, reg: u8, val: u64) {
        if reg != 0 {
            trace!("writing r{} = {:#x}", reg, val);
            self.regs[reg as usize] = val;
        }
    }

    pub(crate) fn mark_pending(&mut self, reg: u8) {
        if reg != 0 {
            self.pending[reg as usize] += 1;
        }
    }

    pub(crate) fn clear_pending(&mut self, reg: u8) {
        if reg != 0 {
            debug_assert!(self.pending[reg as usize] > 0, "r{} was not pending", reg);
            self.pending[reg as usize] = self.pending[reg as usize].saturating_sub(1);
        }
    }

    pub fn is_pending(&self, reg: u8) -> bool {
        self.pending[reg as usize] != 0
    }

    pub fn values(&self) -> &[u64; REGISTER_COUNT] {
        &self.regs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r0_is_hardwired() {
        let mut regs = RegFile::new();
        regs.write(0, 5);
        regs.mark_pending(0);
        assert_eq!(regs.read(0), 0);
        assert!(!regs.is_pending(0));
    }

    #[test]
    fn pending_writes_nest() {
        let mut regs = RegFile::new();
        regs.mark_pending(3);
        regs.mark_pending(3);
        regs.clear_pending(3);
        assert!(regs.is_pending(3));
        regs.clear_pending(3);
        assert!(!regs.is_pending(3));
    }
}
