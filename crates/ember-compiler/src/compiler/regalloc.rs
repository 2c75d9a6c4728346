/// Virtual register allocation for one function frame.
///
/// Registers below `active_locals` belong to named locals. Everything from
/// there up to `free_reg` is a temporary, and temporaries are released in
/// strict reverse order of acquisition.
use crate::error::{CompileError, ErrorCode, Result};
use std::ops::{Deref, DerefMut};

#[derive(Clone, Debug)]
pub struct RegisterFrame {
    /// First unused register.
    pub free_reg: u8,
    /// Registers bound to active locals.
    pub active_locals: u8,
    /// High-water mark of `free_reg`.
    pub frame_size: u8,
    max_slots: u32,
    #[cfg(test)]
    pub(crate) trace: Vec<RegEvent>,
}

/// Allocation history, recorded in test builds.
#[cfg(test)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RegEvent {
    Reserve { base: u8, count: u8 },
    Release { reg: u8, free_reg: u8 },
}

impl RegisterFrame {
    pub fn new(max_slots: u32) -> Self {
        RegisterFrame {
            free_reg: 0,
            active_locals: 0,
            // Every frame has room for at least a call base and one argument.
            frame_size: 1,
            max_slots,
            #[cfg(test)]
            trace: Vec::new(),
        }
    }

    /// Grow the frame to hold `n` more registers above `free_reg`,
    /// without reserving them.
    pub fn bump(&mut self, n: u32) -> Result<()> {
        let size = self.free_reg as u32 + n;
        if size > self.frame_size as u32 {
            if size >= self.max_slots {
                return Err(CompileError::new(
                    ErrorCode::TooManySlots,
                    0,
                    "function or expression needs too many registers",
                ));
            }
            self.frame_size = size as u8;
        }
        Ok(())
    }

    /// Reserve `n` consecutive registers and return the first.
    pub fn reserve(&mut self, n: u32) -> Result<u8> {
        let base = self.free_reg;
        self.bump(n)?;
        self.free_reg += n as u8;
        #[cfg(test)]
        self.trace.push(RegEvent::Reserve {
            base,
            count: n as u8,
        });
        Ok(base)
    }

    /// Release a register. Registers of active locals are left alone.
    pub fn release(&mut self, reg: u8) {
        if reg >= self.active_locals {
            debug_assert!(
                self.free_reg > 0 && reg == self.free_reg - 1,
                "out-of-order register release: {reg} with free_reg {}",
                self.free_reg
            );
            #[cfg(test)]
            self.trace.push(RegEvent::Release {
                reg,
                free_reg: self.free_reg,
            });
            self.free_reg -= 1;
        }
    }

    /// Release `count` registers starting at `start`, which must be the top.
    pub fn release_span(&mut self, start: u8, count: u8) {
        debug_assert_eq!(
            start as u32 + count as u32,
            self.free_reg as u32,
            "span is not on top of the register stack"
        );
        for reg in (start..start + count).rev() {
            self.release(reg);
        }
    }

    pub fn is_temporary(&self, reg: u8) -> bool {
        reg >= self.active_locals
    }

    /// True when `reg` is the most recently reserved temporary.
    pub fn is_top(&self, reg: u8) -> bool {
        self.is_temporary(reg) && self.free_reg > 0 && reg == self.free_reg - 1
    }
}

/// Anything that owns a register frame.
pub trait HasRegisters {
    fn registers(&mut self) -> &mut RegisterFrame;
}

impl HasRegisters for RegisterFrame {
    fn registers(&mut self) -> &mut RegisterFrame {
        self
    }
}

/// Restores `free_reg` to its value at creation when dropped.
///
/// Derefs to the owner so code can keep emitting through the guard.
pub struct RegisterGuard<'a, T: HasRegisters> {
    owner: &'a mut T,
    saved: u8,
    armed: bool,
}

impl<'a, T: HasRegisters> RegisterGuard<'a, T> {
    pub fn new(owner: &'a mut T) -> Self {
        let saved = owner.registers().free_reg;
        RegisterGuard {
            owner,
            saved,
            armed: true,
        }
    }

    pub fn saved(&self) -> u8 {
        self.saved
    }

    /// Keep whatever registers are reserved now.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl<T: HasRegisters> Deref for RegisterGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.owner
    }
}

impl<T: HasRegisters> DerefMut for RegisterGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.owner
    }
}

impl<T: HasRegisters> Drop for RegisterGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.owner.registers().free_reg = self.saved;
        }
    }
}

/// A reserved run of registers, released when dropped.
pub struct RegisterSpan<'a, T: HasRegisters> {
    owner: &'a mut T,
    start: u8,
    count: u8,
}

impl<'a, T: HasRegisters> RegisterSpan<'a, T> {
    pub fn reserve(owner: &'a mut T, count: u8) -> Result<Self> {
        let start = owner.registers().reserve(count as u32)?;
        Ok(RegisterSpan {
            owner,
            start,
            count,
        })
    }

    pub fn start(&self) -> u8 {
        self.start
    }

    pub fn count(&self) -> u8 {
        self.count
    }
}

impl<T: HasRegisters> Deref for RegisterSpan<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.owner
    }
}

impl<T: HasRegisters> DerefMut for RegisterSpan<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.owner
    }
}

impl<T: HasRegisters> Drop for RegisterSpan<'_, T> {
    fn drop(&mut self) {
        let regs = self.owner.registers();
        // An error unwinding through the span may leave extra temporaries.
        if regs.free_reg >= self.start + self.count {
            regs.free_reg = self.start + self.count;
            regs.release_span(self.start, self.count);
        }
    }
}
