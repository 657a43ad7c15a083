//! Instruction execution: given a decoded instruction and the owning state
//! machine's working registers, perform the side effects and report
//! whether the SM stalled.
//!
//! This module only touches the values it is handed; it knows nothing of
//! PC wrap, the clock divider or instruction fetch, which belong to
//! [`crate::state_machine`].

use crate::fifo::FifoPair;
use crate::shift::{bit_reverse, ShiftDir, ShiftRegister};

use super::{Instruction, JmpCond, MovDst, MovOp, MovSrc, OutDst, SetDst, WaitSrc};

/// GPIO-facing inputs a single instruction evaluation needs: a synchronized
/// snapshot of all 32 pins (sampled at phase 0) plus this SM's own
/// pin-mapping windows.
#[derive(Debug, Clone, Copy)]
pub struct GpioView {
    /// Phase-0-synchronized level of all 32 pins.
    pub pins: u32,
    pub in_base: u8,
    pub jmp_pin: u8,
}

impl GpioView {
    fn read_window(&self, base: u8, count: u8) -> u32 {
        let mut v = 0u32;
        for bit in 0..count as u32 {
            let pin = (base as u32 + bit) % 32;
            if self.pins & (1 << pin) != 0 {
                v |= 1 << bit;
            }
        }
        v
    }
}

/// How `MOV ... , STATUS` should compare FIFO fill, selected by EXECCTRL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSel {
    TxLessThan(u8),
    RxLessThan(u8),
}

/// The mutable working state an instruction execution may touch. Owned by
/// the state machine, borrowed here for the duration of one step.
pub struct ExecState<'a> {
    pub x: &'a mut u32,
    pub y: &'a mut u32,
    pub isr: &'a mut ShiftRegister,
    pub osr: &'a mut ShiftRegister,
    pub fifos: &'a mut FifoPair,

    pub in_shift_dir: ShiftDir,
    pub out_shift_dir: ShiftDir,
    pub push_threshold: u8,
    pub pull_threshold: u8,
    pub autopush: bool,
    pub autopull: bool,
    pub status_sel: StatusSel,

    pub gpio: GpioView,

    /// Effective (already `rel`-resolved) IRQ index, filled in by the caller
    /// for IRQ/WAIT-on-IRQ instructions.
    pub irq_index: u8,
    /// The block's 8 raw IRQ flags as observed at the start of this step.
    pub irq_flags: u8,
    /// True if the SM was already stalled on this exact instruction last
    /// tick. Lets `IRQ ... wait` and `WAIT irq` assert their SET exactly
    /// once per stall episode instead of re-issuing it every retry, which
    /// would otherwise race an external clearer.
    pub irq_wait_reentry: bool,
}

/// Side effects an instruction asks the state machine / PIO block to apply
/// after `execute` returns; these don't belong to `ExecState` because they
/// reach beyond the executing SM (pin drive, PC override, IRQ, forced next
/// instruction).
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecEffects {
    pub pc_override: Option<u8>,
    pub set_pins: Option<(u8, u8, u32)>,
    pub set_pindirs: Option<(u8, u8, u32)>,
    pub out_pins: Option<(u8, u8, u32)>,
    pub out_pindirs: Option<(u8, u8, u32)>,
    pub side_pins: Option<(u8, u8, u32)>,
    pub side_pindirs: Option<(u8, u8, u32)>,
    pub force_next_instr: Option<u16>,
    pub irq_set: Option<u8>,
    pub irq_clear: Option<u8>,
}

/// Outcome of one instruction execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Instruction completed; PC should advance (unless `effects.pc_override`
    /// is set) and the delay slot armed.
    Completed,
    /// Instruction could not complete this tick; PC/delay stay frozen.
    Stalled,
}

/// A SET/OUT destination that writes pins needs its PINCTRL window; callers
/// supply it because `Instruction::Set`/`Instruction::Out` only carry the
/// pin *data*, not the pin *mapping*.
#[derive(Debug, Clone, Copy)]
pub struct PinWindows {
    pub set_base: u8,
    pub set_count: u8,
    pub out_base: u8,
    pub out_count: u8,
}

/// Execute one already-decoded instruction. `side_set` carries this slot's
/// resolved side-set value (if any) and whether side-set drives PINDIRS
/// (EXECCTRL.side_pindirs) along with its window.
pub fn execute(
    instr: Instruction,
    state: &mut ExecState,
    windows: PinWindows,
    side_set: Option<u8>,
    side_set_pindirs: bool,
    side_set_base: u8,
    side_set_count: u8,
) -> (ExecOutcome, ExecEffects) {
    let mut fx = ExecEffects::default();
    if let Some(v) = side_set {
        let value = v as u32;
        if side_set_pindirs {
            fx.side_pindirs = Some((side_set_base, side_set_count, value));
        } else {
            fx.side_pins = Some((side_set_base, side_set_count, value));
        }
    }

    let outcome = match instr {
        Instruction::Jmp { cond, addr } => {
            let take = eval_jmp_cond(cond, state);
            if take {
                fx.pc_override = Some(addr);
            }
            ExecOutcome::Completed
        }

        Instruction::Wait { polarity, src, index_raw } => {
            let observed = match src {
                WaitSrc::Gpio => (state.gpio.pins >> (index_raw & 0x1f)) & 1 != 0,
                WaitSrc::Pin => {
                    let mapped = (state.gpio.in_base as u32 + (index_raw & 0x1f) as u32) % 32;
                    (state.gpio.pins >> mapped) & 1 != 0
                }
                WaitSrc::Irq => {
                    // Caller resolves `rel` before invoking us; irq_index is
                    // the already-resolved flag number.
                    let flag = (state.irq_flags >> state.irq_index) & 1 != 0;
                    if flag == polarity {
                        if polarity {
                            // Satisfied by the flag being set: release and
                            // clear it atomically with the wait.
                            fx.irq_clear = Some(state.irq_index);
                        }
                        return (ExecOutcome::Completed, fx);
                    }
                    return (ExecOutcome::Stalled, fx);
                }
            };
            if observed == polarity {
                ExecOutcome::Completed
            } else {
                ExecOutcome::Stalled
            }
        }

        Instruction::In { src, count } => {
            let n = if count == 0 { 32 } else { count };
            let data = match src {
                super::InSrc::Pins => state.gpio.read_window(state.gpio.in_base, n),
                super::InSrc::X => *state.x,
                super::InSrc::Y => *state.y,
                super::InSrc::Null => 0,
                super::InSrc::Isr => state.isr.bits(),
                super::InSrc::Osr => state.osr.bits(),
            };
            state.isr.shift_in(state.in_shift_dir, count, data);
            try_autopush(state);
            ExecOutcome::Completed
        }

        Instruction::Out { dst, count } => {
            let value = state.osr.shift_out(state.out_shift_dir, count);
            let n = if count == 0 { 32 } else { count };
            match dst {
                OutDst::Pins => fx.out_pins = Some((windows.out_base, windows.out_count.min(n), value)),
                OutDst::X => *state.x = value,
                OutDst::Y => *state.y = value,
                OutDst::Null => {}
                OutDst::PinDirs => {
                    fx.out_pindirs = Some((windows.out_base, windows.out_count.min(n), value))
                }
                OutDst::Pc => fx.pc_override = Some((value & 0x1f) as u8),
                OutDst::Isr => {
                    state.isr.set_bits(value);
                    state.isr.set_counter(n);
                }
                OutDst::Exec => fx.force_next_instr = Some(value as u16),
            }
            try_autopull(state);
            ExecOutcome::Completed
        }

        Instruction::Push { if_full, block } => {
            let full_enough = state.isr.counter_at_least(state.push_threshold.max(1));
            if if_full && !full_enough {
                ExecOutcome::Completed
            } else {
                let word = state.isr.bits();
                if state.fifos.sm_push_rx(word) {
                    state.isr.reset();
                    ExecOutcome::Completed
                } else if block {
                    state.fifos.set_rx_stall();
                    ExecOutcome::Stalled
                } else {
                    state.fifos.set_rx_under();
                    state.isr.reset();
                    ExecOutcome::Completed
                }
            }
        }

        Instruction::Pull { if_empty, block } => {
            let osr_empty = state.osr.osr_is_empty();
            if if_empty && !osr_empty {
                ExecOutcome::Completed
            } else if let Some(word) = state.fifos.sm_pop_tx() {
                state.osr.set_bits(word);
                state.osr.set_counter(0);
                ExecOutcome::Completed
            } else if block {
                state.fifos.set_tx_stall();
                ExecOutcome::Stalled
            } else {
                state.osr.set_bits(*state.x);
                state.osr.set_counter(0);
                ExecOutcome::Completed
            }
        }

        Instruction::Mov { dst, op, src } => {
            let raw = match src {
                MovSrc::Pins => state.gpio.read_window(state.gpio.in_base, 32),
                MovSrc::X => *state.x,
                MovSrc::Y => *state.y,
                MovSrc::Null => 0,
                MovSrc::Status => eval_status(state),
                MovSrc::Isr => state.isr.bits(),
                MovSrc::Osr => state.osr.bits(),
            };
            let value = match op {
                MovOp::None => raw,
                MovOp::Invert => !raw,
                MovOp::BitReverse => bit_reverse(raw),
            };
            match dst {
                MovDst::Pins => fx.out_pins = Some((windows.out_base, windows.out_count, value)),
                MovDst::X => *state.x = value,
                MovDst::Y => *state.y = value,
                MovDst::Exec => fx.force_next_instr = Some(value as u16),
                MovDst::Pc => fx.pc_override = Some((value & 0x1f) as u8),
                MovDst::Isr => {
                    state.isr.set_bits(value);
                    state.isr.set_counter(0);
                }
                MovDst::Osr => {
                    state.osr.set_bits(value);
                    state.osr.set_counter(0);
                }
            }
            ExecOutcome::Completed
        }

        Instruction::Irq { clear, wait, index_raw: _ } => {
            if clear {
                fx.irq_clear = Some(state.irq_index);
                ExecOutcome::Completed
            } else {
                // Only (re-)assert the flag on first entry; re-issuing it
                // on every stalled retry would race an external clearer
                // that wants to observe it transition to zero.
                if !(wait && state.irq_wait_reentry) {
                    fx.irq_set = Some(state.irq_index);
                }
                if wait {
                    let still_set = (state.irq_flags >> state.irq_index) & 1 != 0;
                    if state.irq_wait_reentry && !still_set {
                        ExecOutcome::Completed
                    } else {
                        ExecOutcome::Stalled
                    }
                } else {
                    ExecOutcome::Completed
                }
            }
        }

        Instruction::Set { dst, data } => {
            let value = data as u32;
            match dst {
                SetDst::Pins => fx.set_pins = Some((windows.set_base, windows.set_count, value)),
                SetDst::X => *state.x = value,
                SetDst::Y => *state.y = value,
                SetDst::PinDirs => fx.set_pindirs = Some((windows.set_base, windows.set_count, value)),
            }
            ExecOutcome::Completed
        }
    };

    (outcome, fx)
}

fn eval_jmp_cond(cond: JmpCond, state: &mut ExecState) -> bool {
    match cond {
        JmpCond::Always => true,
        JmpCond::XIsZero => *state.x == 0,
        JmpCond::XDec => {
            let was_nonzero = *state.x != 0;
            *state.x = state.x.wrapping_sub(1);
            was_nonzero
        }
        JmpCond::YIsZero => *state.y == 0,
        JmpCond::YDec => {
            let was_nonzero = *state.y != 0;
            *state.y = state.y.wrapping_sub(1);
            was_nonzero
        }
        JmpCond::XNeY => *state.x != *state.y,
        JmpCond::Pin => {
            let mapped = state.gpio.jmp_pin as u32 % 32;
            (state.gpio.pins >> mapped) & 1 != 0
        }
        JmpCond::OsrNotEmpty => !state.osr.osr_is_empty(),
    }
}

fn eval_status(state: &ExecState) -> u32 {
    let satisfied = match state.status_sel {
        StatusSel::TxLessThan(n) => state.fifos.tx_level() < n as usize,
        StatusSel::RxLessThan(n) => state.fifos.rx_level() < n as usize,
    };
    if satisfied { 0xFFFF_FFFF } else { 0 }
}

fn try_autopush(state: &mut ExecState) {
    if !state.autopush {
        return;
    }
    if state.isr.counter_at_least(state.push_threshold.max(1)) {
        let word = state.isr.bits();
        if state.fifos.sm_push_rx(word) {
            state.isr.reset();
        } else {
            state.fifos.set_rx_stall();
        }
    }
}

fn try_autopull(state: &mut ExecState) {
    if !state.autopull {
        return;
    }
    if state.osr.osr_is_empty() {
        if let Some(word) = state.fifos.sm_pop_tx() {
            state.osr.set_bits(word);
            state.osr.set_counter(0);
        } else {
            state.fifos.set_tx_stall();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::InSrc;

    fn base_state<'a>(
        x: &'a mut u32,
        y: &'a mut u32,
        isr: &'a mut ShiftRegister,
        osr: &'a mut ShiftRegister,
        fifos: &'a mut FifoPair,
    ) -> ExecState<'a> {
        ExecState {
            x,
            y,
            isr,
            osr,
            fifos,
            in_shift_dir: ShiftDir::Left,
            out_shift_dir: ShiftDir::Right,
            push_threshold: 32,
            pull_threshold: 32,
            autopush: false,
            autopull: false,
            status_sel: StatusSel::TxLessThan(1),
            gpio: GpioView { pins: 0xA5, in_base: 0, jmp_pin: 0 },
            irq_index: 0,
            irq_flags: 0,
            irq_wait_reentry: false,
        }
    }

    #[test]
    fn jmp_x_dec_evaluates_predecrement_then_decrements() {
        let (mut x, mut y) = (1u32, 0u32);
        let (mut isr, mut osr) = (ShiftRegister::new(), ShiftRegister::new());
        let mut fifos = FifoPair::new();
        let mut state = base_state(&mut x, &mut y, &mut isr, &mut osr, &mut fifos);
        let windows = PinWindows { set_base: 0, set_count: 0, out_base: 0, out_count: 0 };
        let (outcome, fx) = execute(
            Instruction::Jmp { cond: JmpCond::XDec, addr: 9 },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(outcome, ExecOutcome::Completed);
        assert_eq!(fx.pc_override, Some(9));
        assert_eq!(x, 0);

        let (outcome, fx) = execute(
            Instruction::Jmp { cond: JmpCond::XDec, addr: 9 },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(outcome, ExecOutcome::Completed);
        assert_eq!(fx.pc_override, None);
        assert_eq!(x, u32::MAX);
    }

    #[test]
    fn jmp_x_ne_y_compares_x_and_y() {
        let (mut x, mut y) = (3u32, 3u32);
        let (mut isr, mut osr) = (ShiftRegister::new(), ShiftRegister::new());
        let mut fifos = FifoPair::new();
        let mut state = base_state(&mut x, &mut y, &mut isr, &mut osr, &mut fifos);
        let windows = PinWindows { set_base: 0, set_count: 0, out_base: 0, out_count: 0 };
        let (_, fx) = execute(
            Instruction::Jmp { cond: JmpCond::XNeY, addr: 1 },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(fx.pc_override, None);
        *state.y = 4;
        let (_, fx) = execute(
            Instruction::Jmp { cond: JmpCond::XNeY, addr: 1 },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(fx.pc_override, Some(1));
    }

    #[test]
    fn pull_block_on_empty_tx_stalls_and_latches() {
        let (mut x, mut y) = (0xDEAD_u32, 0u32);
        let (mut isr, mut osr) = (ShiftRegister::new(), ShiftRegister::new());
        let mut fifos = FifoPair::new();
        let mut state = base_state(&mut x, &mut y, &mut isr, &mut osr, &mut fifos);
        let windows = PinWindows { set_base: 0, set_count: 0, out_base: 0, out_count: 0 };
        let (outcome, _) = execute(
            Instruction::Pull { if_empty: false, block: true },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(outcome, ExecOutcome::Stalled);
        assert!(state.fifos.tx_stall());
    }

    #[test]
    fn pull_noblock_on_empty_tx_copies_x_into_osr() {
        let (mut x, mut y) = (0x1234_u32, 0u32);
        let (mut isr, mut osr) = (ShiftRegister::new(), ShiftRegister::new());
        let mut fifos = FifoPair::new();
        let mut state = base_state(&mut x, &mut y, &mut isr, &mut osr, &mut fifos);
        let windows = PinWindows { set_base: 0, set_count: 0, out_base: 0, out_count: 0 };
        let (outcome, _) = execute(
            Instruction::Pull { if_empty: false, block: false },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(outcome, ExecOutcome::Completed);
        assert_eq!(state.osr.bits(), 0x1234);
    }

    #[test]
    fn in_pins_reads_gpio_view_window() {
        let (mut x, mut y) = (0u32, 0u32);
        let (mut isr, mut osr) = (ShiftRegister::new(), ShiftRegister::new());
        let mut fifos = FifoPair::new();
        let mut state = base_state(&mut x, &mut y, &mut isr, &mut osr, &mut fifos);
        let windows = PinWindows { set_base: 0, set_count: 0, out_base: 0, out_count: 0 };
        let (outcome, _) = execute(
            Instruction::In { src: InSrc::Pins, count: 8 },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(outcome, ExecOutcome::Completed);
        assert_eq!(state.isr.bits() & 0xFF, 0xA5);
    }

    #[test]
    fn set_pins_reports_windowed_effect() {
        let (mut x, mut y) = (0u32, 0u32);
        let (mut isr, mut osr) = (ShiftRegister::new(), ShiftRegister::new());
        let mut fifos = FifoPair::new();
        let mut state = base_state(&mut x, &mut y, &mut isr, &mut osr, &mut fifos);
        let windows = PinWindows { set_base: 4, set_count: 2, out_base: 0, out_count: 0 };
        let (_, fx) = execute(
            Instruction::Set { dst: SetDst::Pins, data: 0b11 },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(fx.set_pins, Some((4, 2, 0b11)));
    }

    #[test]
    fn irq_set_wait_asserts_once_then_completes_once_cleared() {
        let (mut x, mut y) = (0u32, 0u32);
        let (mut isr, mut osr) = (ShiftRegister::new(), ShiftRegister::new());
        let mut fifos = FifoPair::new();
        let mut state = base_state(&mut x, &mut y, &mut isr, &mut osr, &mut fifos);
        let windows = PinWindows { set_base: 0, set_count: 0, out_base: 0, out_count: 0 };

        // First entry: not yet a reentry, asserts the flag, stalls.
        let (outcome, fx) = execute(
            Instruction::Irq { clear: false, wait: true, index_raw: 3 },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(outcome, ExecOutcome::Stalled);
        assert_eq!(fx.irq_set, Some(0));

        // Retry while the flag is still set externally: stays stalled, does
        // not re-issue the set.
        state.irq_wait_reentry = true;
        state.irq_flags = 1;
        let (outcome, fx) = execute(
            Instruction::Irq { clear: false, wait: true, index_raw: 3 },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(outcome, ExecOutcome::Stalled);
        assert_eq!(fx.irq_set, None);

        // Once externally cleared, the reentry completes.
        state.irq_flags = 0;
        let (outcome, _) = execute(
            Instruction::Irq { clear: false, wait: true, index_raw: 3 },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(outcome, ExecOutcome::Completed);
    }

    #[test]
    fn wait_irq_high_completes_and_clears_atomically() {
        let (mut x, mut y) = (0u32, 0u32);
        let (mut isr, mut osr) = (ShiftRegister::new(), ShiftRegister::new());
        let mut fifos = FifoPair::new();
        let mut state = base_state(&mut x, &mut y, &mut isr, &mut osr, &mut fifos);
        state.irq_index = 2;
        state.irq_flags = 1 << 2;
        let windows = PinWindows { set_base: 0, set_count: 0, out_base: 0, out_count: 0 };
        let (outcome, fx) = execute(
            Instruction::Wait { polarity: true, src: WaitSrc::Irq, index_raw: 2 },
            &mut state,
            windows,
            None,
            false,
            0,
            0,
        );
        assert_eq!(outcome, ExecOutcome::Completed);
        assert_eq!(fx.irq_clear, Some(2));
    }
}
