//! Extended/debug register facade: emulator-internal state no real RP2040
//! register exposes (scratch registers, shift counters, per-SM stall state)
//! plus a single-step trigger, so a bridge client can drive the emulator one
//! tick at a time without a real clock source.
//!
//! Mounted at a separate base from [`super::pio_facade::PioFacade`]; there is
//! no silicon counterpart to be bit-exact against, so the layout here is this
//! emulator's own.

use crate::config::SM_COUNT;
use crate::pio_block::PioHandle;
use crate::shift::ShiftRegister;

use super::{AccessMode, Facade};

const STEP: u32 = 0x00;
const SM0_BASE: u32 = 0x04;
const SM_STRIDE: u32 = 32;
const SM_X: u32 = 0;
const SM_Y: u32 = 4;
const SM_PC: u32 = 8;
const SM_ISR_BITS: u32 = 12;
const SM_ISR_COUNTER: u32 = 16;
const SM_OSR_BITS: u32 = 20;
const SM_OSR_COUNTER: u32 = 24;
const SM_STATUS: u32 = 28;
const SPAN: u32 = SM0_BASE + SM_STRIDE * SM_COUNT as u32;

/// Debug window onto one PIO block's internal execution state.
pub struct ExtFacade {
    base: u32,
    block: PioHandle,
}

impl ExtFacade {
    pub fn new(base: u32, block: PioHandle) -> Self {
        Self { base, block }
    }
}

impl Facade for ExtFacade {
    fn base(&self) -> u32 {
        self.base
    }

    fn span(&self) -> u32 {
        SPAN
    }

    fn read(&self, addr: u32) -> u32 {
        let off = AccessMode::strip(addr) - self.base;
        let block = self.block.lock().unwrap();

        if off == STEP {
            return 0;
        }
        if (SM0_BASE..SPAN).contains(&off) {
            let rel = off - SM0_BASE;
            let sm = block.sm((rel / SM_STRIDE) as usize);
            return match rel % SM_STRIDE {
                SM_X => sm.x,
                SM_Y => sm.y,
                SM_PC => sm.pc as u32,
                SM_ISR_BITS => sm.isr.bits(),
                SM_ISR_COUNTER => sm.isr.counter() as u32,
                SM_OSR_BITS => sm.osr.bits(),
                SM_OSR_COUNTER => sm.osr.counter() as u32,
                SM_STATUS => {
                    (sm.stalled as u32)
                        | ((sm.last_decode_error.is_some() as u32) << 1)
                        | ((sm.delay_remaining as u32) << 8)
                }
                _ => 0,
            };
        }
        0
    }

    fn write(&mut self, addr: u32, value: u32) {
        let mode = AccessMode::from_addr(addr);
        let off = AccessMode::strip(addr) - self.base;
        let mut block = self.block.lock().unwrap();

        if off == STEP {
            block.tick();
            return;
        }
        if (SM0_BASE..SPAN).contains(&off) {
            let rel = off - SM0_BASE;
            let sm_idx = (rel / SM_STRIDE) as usize;
            let reg = rel % SM_STRIDE;
            let sm = block.sm_mut(sm_idx);
            match reg {
                SM_X => sm.x = mode.apply(sm.x, value),
                SM_Y => sm.y = mode.apply(sm.y, value),
                SM_PC => sm.pc = mode.apply(sm.pc as u32, value) as u8,
                SM_ISR_BITS => {
                    let new = mode.apply(sm.isr.bits(), value);
                    sm.isr.set_bits(new);
                }
                SM_ISR_COUNTER => {
                    let new = mode.apply(sm.isr.counter() as u32, value);
                    sm.isr.set_counter(new as u8);
                }
                SM_OSR_BITS => {
                    let new = mode.apply(sm.osr.bits(), value);
                    sm.osr.set_bits(new);
                }
                SM_OSR_COUNTER => {
                    let new = mode.apply(sm.osr.counter() as u32, value);
                    sm.osr.set_counter(new as u8);
                }
                SM_STATUS => {
                    // Only the stalled bit is writable here (forcing a clear
                    // of a fatal decode stall); delay_remaining is read-only.
                    sm.stalled = value & 1 != 0;
                    if value & 1 == 0 {
                        sm.last_decode_error = None;
                    }
                }
                _ => {}
            }
        }
    }

    fn get_label(&self, addr: u32) -> Option<&'static str> {
        let off = AccessMode::strip(addr) - self.base;
        if off == STEP {
            return Some("STEP");
        }
        if (SM0_BASE..SPAN).contains(&off) {
            return Some(match (off - SM0_BASE) % SM_STRIDE {
                SM_X => "SMx_X",
                SM_Y => "SMx_Y",
                SM_PC => "SMx_PC",
                SM_ISR_BITS => "SMx_ISR_BITS",
                SM_ISR_COUNTER => "SMx_ISR_COUNTER",
                SM_OSR_BITS => "SMx_OSR_BITS",
                SM_OSR_COUNTER => "SMx_OSR_COUNTER",
                SM_STATUS => "SMx_STATUS",
                _ => return None,
            });
        }
        None
    }
}
