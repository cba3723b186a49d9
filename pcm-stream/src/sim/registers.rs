//! In-memory PCM register window.

use core::convert::Infallible;

use crate::pcm::registers::{MAX_REGISTER, REG_STRIDE};
use crate::pcm::RegisterMap;

const REGISTER_COUNT: usize = (MAX_REGISTER / REG_STRIDE + 1) as usize;

/// Register file backing a [`PcmInterface`](crate::pcm::PcmInterface)
/// without hardware. Every write is logged in order.
#[derive(Debug, Default, Clone)]
pub struct RegisterFile {
    regs: [u32; REGISTER_COUNT],
    log: Vec<(u32, u32)>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `register`.
    pub fn value(&self, register: u32) -> u32 {
        self.regs[Self::index(register)]
    }

    /// All writes so far as `(register, value)` pairs.
    pub fn writes(&self) -> &[(u32, u32)] {
        &self.log
    }

    fn index(register: u32) -> usize {
        assert!(
            register <= MAX_REGISTER && register % REG_STRIDE == 0,
            "invalid PCM register {register:#x}"
        );
        (register / REG_STRIDE) as usize
    }
}

impl RegisterMap for RegisterFile {
    type Error = Infallible;

    fn read(&mut self, register: u32) -> Result<u32, Infallible> {
        Ok(self.regs[Self::index(register)])
    }

    fn write(&mut self, register: u32, value: u32) -> Result<(), Infallible> {
        self.regs[Self::index(register)] = value;
        self.log.push((register, value));
        Ok(())
    }
}
