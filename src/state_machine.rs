//! State machine: ties the shift registers, scratch registers, FIFOs and
//! instruction set together into one SM's per-tick execution.
//!
//! The config structs follow the peripheral-config-struct style of
//! `SpiConfig` in `us-irs-vorago-shared-hal/src/spi/mod.rs`, adapted to the
//! three PIO configuration registers (EXECCTRL, SHIFTCTRL, PINCTRL) each SM
//! carries.

use crate::config::MEMORY_SIZE;
use crate::error::DecodeError;
use crate::fifo::FifoPair;
use crate::gpio_fabric::SmPinRequest;
use crate::isa::exec::{execute, ExecOutcome, ExecState, GpioView, PinWindows, StatusSel};
use crate::isa::{self, Decoded};
use crate::shift::{ShiftDir, ShiftRegister};

/// `SMx_EXECCTRL`: instruction-level behaviour not carried in the opcode
/// itself.
#[derive(Debug, Clone, Copy)]
pub struct ExecCtrl {
    pub wrap_bottom: u8,
    pub wrap_top: u8,
    pub side_set_count: u8,
    pub side_set_enable: bool,
    pub side_set_pindirs: bool,
    pub jmp_pin: u8,
    pub status_sel: StatusSel,
}

impl Default for ExecCtrl {
    fn default() -> Self {
        Self {
            wrap_bottom: 0,
            wrap_top: (MEMORY_SIZE - 1) as u8,
            side_set_count: 0,
            side_set_enable: false,
            side_set_pindirs: false,
            jmp_pin: 0,
            status_sel: StatusSel::TxLessThan(1),
        }
    }
}

/// `SMx_SHIFTCTRL`: shift direction, auto-push/pull and thresholds.
#[derive(Debug, Clone, Copy)]
pub struct ShiftCtrl {
    pub in_shift_dir: ShiftDir,
    pub out_shift_dir: ShiftDir,
    pub autopush: bool,
    pub autopull: bool,
    pub push_threshold: u8,
    pub pull_threshold: u8,
}

impl Default for ShiftCtrl {
    fn default() -> Self {
        Self {
            in_shift_dir: ShiftDir::Right,
            out_shift_dir: ShiftDir::Right,
            autopush: false,
            autopull: false,
            push_threshold: 32,
            pull_threshold: 32,
        }
    }
}

/// `SMx_PINCTRL`: the three independent pin-mapping windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinCtrl {
    pub out_base: u8,
    pub out_count: u8,
    pub set_base: u8,
    pub set_count: u8,
    pub side_set_base: u8,
    pub in_base: u8,
}

/// 8.8 fixed-point clock divider accumulator.
#[derive(Debug, Clone, Copy)]
pub struct ClkDiv {
    pub int: u16,
    pub frac: u8,
    accum: u32,
}

impl Default for ClkDiv {
    fn default() -> Self {
        Self { int: 1, frac: 0, accum: 0 }
    }
}

impl ClkDiv {
    /// Advance the accumulator by one master tick; returns true when the SM
    /// should execute a step this tick. A divider of 0 is treated as 1
    /// (datasheet: 0 means divide-by-65536, but the emulator clamps to
    /// avoid a degenerate near-infinite divider by default).
    fn should_step(&mut self) -> bool {
        let divisor = ((self.int as u32) << 8) | self.frac as u32;
        let divisor = if divisor == 0 { 1 << 16 } else { divisor };
        self.accum += 1 << 8;
        if self.accum >= divisor {
            self.accum -= divisor;
            true
        } else {
            false
        }
    }
}

/// One state machine's full execution context: registers, shift state,
/// FIFOs and configuration.
#[derive(Debug, Clone)]
pub struct StateMachine {
    pub pc: u8,
    pub x: u32,
    pub y: u32,
    pub isr: ShiftRegister,
    pub osr: ShiftRegister,
    pub fifos: FifoPair,

    pub exec_ctrl: ExecCtrl,
    pub shift_ctrl: ShiftCtrl,
    pub pin_ctrl: PinCtrl,
    pub clk_div: ClkDiv,

    pub delay_remaining: u8,
    pub forced_instr: Option<u16>,
    pub stalled: bool,
    pub enabled: bool,

    /// Resolved (post-`rel`) IRQ index this SM is blocked on, if any.
    stalled_irq_index: Option<u8>,
    /// Latched held side-set value from the instruction currently mid-delay
    /// or mid-stall, so it keeps driving pins while idle.
    held_side_set: Option<u8>,
    held_side_set_pindirs: bool,

    pub last_decode_error: Option<DecodeError>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            pc: 0,
            x: 0,
            y: 0,
            isr: ShiftRegister::new(),
            osr: ShiftRegister::new(),
            fifos: FifoPair::new(),
            exec_ctrl: ExecCtrl::default(),
            shift_ctrl: ShiftCtrl::default(),
            pin_ctrl: PinCtrl::default(),
            clk_div: ClkDiv::default(),
            delay_remaining: 0,
            forced_instr: None,
            stalled: false,
            enabled: false,
            stalled_irq_index: None,
            held_side_set: None,
            held_side_set_pindirs: false,
            last_decode_error: None,
        }
    }
}

/// What a state machine asks the owning PIO block to apply on its behalf
/// this tick: pin drive requests (resolved into fabric arbitration),
/// PC-restart on IRQ-rel resolution, and IRQ set/clear requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepEffects {
    pub pins: SmPinRequest,
    pub irq_set: Option<u8>,
    pub irq_clear: Option<u8>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrap(&self, pc: u8) -> u8 {
        if pc > self.exec_ctrl.wrap_top {
            self.exec_ctrl.wrap_bottom
        } else {
            pc
        }
    }

    /// Resolve the SM-relative IRQ index (rel bit) for an instruction word's
    /// raw index field, against this SM's own number within the block.
    fn resolve_irq(&self, index_raw: u8, sm_num: u8) -> u8 {
        let idx = isa::IrqIndex::decode(arbitrary_int::u5::new(index_raw & 0x1f))
            .expect("index resolution only ever runs on a decoded, already-validated word");
        idx.resolve(sm_num)
    }

    /// Execute one tick of this SM. `memory` is the block's
    /// shared instruction memory; `gpio_pins` is the phase-0 synchronized
    /// 32-bit pin snapshot; `irq_flags` is the block's raw IRQ vector as
    /// observed at the start of this tick.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        sm_num: u8,
        memory: &[u16; MEMORY_SIZE],
        gpio_pins: u32,
        irq_flags: u8,
    ) -> StepEffects {
        let mut fx = StepEffects::default();
        if !self.enabled {
            return fx;
        }

        if !self.should_tick() {
            return fx;
        }

        if self.delay_remaining > 0 && !self.stalled {
            self.delay_remaining -= 1;
            self.apply_held_side_set(&mut fx);
            return fx;
        }

        let word = match self.forced_instr {
            Some(w) => w,
            None => memory[self.pc as usize],
        };

        let decoded = match isa::decode(word, self.pc) {
            Ok(d) => d,
            Err(e) => {
                self.last_decode_error = Some(e);
                self.stalled = true;
                return fx;
            }
        };

        let was_reentry = self.stalled;
        let resolved_irq = self.resolve_irq_for(&decoded, sm_num);
        if let Some(idx) = resolved_irq {
            self.stalled_irq_index = Some(idx);
        }

        let windows = PinWindows {
            set_base: self.pin_ctrl.set_base,
            set_count: self.pin_ctrl.set_count,
            out_base: self.pin_ctrl.out_base,
            out_count: self.pin_ctrl.out_count,
        };

        let (side_value, delay) = isa::split_delay_sideset(
            decoded.delay_sideset_raw,
            self.exec_ctrl.side_set_count,
            self.exec_ctrl.side_set_enable,
        );

        let mut exec_state = ExecState {
            x: &mut self.x,
            y: &mut self.y,
            isr: &mut self.isr,
            osr: &mut self.osr,
            fifos: &mut self.fifos,
            in_shift_dir: self.shift_ctrl.in_shift_dir,
            out_shift_dir: self.shift_ctrl.out_shift_dir,
            push_threshold: self.shift_ctrl.push_threshold,
            pull_threshold: self.shift_ctrl.pull_threshold,
            autopush: self.shift_ctrl.autopush,
            autopull: self.shift_ctrl.autopull,
            status_sel: self.exec_ctrl.status_sel,
            gpio: GpioView {
                pins: gpio_pins,
                in_base: self.pin_ctrl.in_base,
                jmp_pin: self.exec_ctrl.jmp_pin,
            },
            irq_index: resolved_irq.or(self.stalled_irq_index).unwrap_or(0),
            irq_flags,
            irq_wait_reentry: was_reentry,
        };

        let (outcome, effects) = execute(
            decoded.instr,
            &mut exec_state,
            windows,
            side_value,
            self.exec_ctrl.side_set_pindirs,
            self.pin_ctrl.side_set_base,
            self.exec_ctrl.side_set_count,
        );

        fx.irq_set = effects.irq_set;
        fx.irq_clear = effects.irq_clear;
        apply_pin_effect(&mut fx.pins, effects.set_pins, |r| (&mut r.set_base, &mut r.set_count, &mut r.set_value));
        apply_pin_effect(&mut fx.pins, effects.out_pins, |r| (&mut r.out_base, &mut r.out_count, &mut r.out_value));
        apply_side_effect(&mut fx.pins, effects.side_pins, false);
        apply_pin_effect(&mut fx.pins, effects.set_pindirs, |r| {
            (&mut r.set_base, &mut r.set_count, &mut r.set_dir_value)
        });
        apply_pin_effect(&mut fx.pins, effects.out_pindirs, |r| {
            (&mut r.out_base, &mut r.out_count, &mut r.out_dir_value)
        });
        apply_side_effect(&mut fx.pins, effects.side_pindirs, true);

        match outcome {
            ExecOutcome::Stalled => {
                self.stalled = true;
                self.held_side_set = side_value;
                self.held_side_set_pindirs = self.exec_ctrl.side_set_pindirs;
            }
            ExecOutcome::Completed => {
                self.stalled = false;
                self.stalled_irq_index = None;
                self.forced_instr = effects.force_next_instr;
                if let Some(pc) = effects.pc_override {
                    self.pc = self.wrap(pc);
                } else {
                    self.pc = self.wrap(self.pc.wrapping_add(1));
                }
                self.delay_remaining = delay;
            }
        }

        fx
    }

    fn should_tick(&mut self) -> bool {
        // A stalled SM still samples the clock divider (it must re-evaluate
        // the same condition every tick it is eligible to run) but the
        // divider schedule is unaffected by stalling; hardware runs the
        // divider independently of stall state.
        self.clk_div.should_step()
    }

    fn resolve_irq_for(&self, decoded: &Decoded, sm_num: u8) -> Option<u8> {
        match decoded.instr {
            isa::Instruction::Irq { index_raw, .. } => Some(self.resolve_irq(index_raw, sm_num)),
            isa::Instruction::Wait { src: isa::WaitSrc::Irq, index_raw, .. } => {
                Some(self.resolve_irq(index_raw, sm_num))
            }
            _ => None,
        }
    }

    fn apply_held_side_set(&self, fx: &mut StepEffects) {
        if let Some(value) = self.held_side_set {
            apply_side_effect(
                &mut fx.pins,
                Some((self.pin_ctrl.side_set_base, self.exec_ctrl.side_set_count, value as u32)),
                self.held_side_set_pindirs,
            );
        }
    }

    pub fn restart(&mut self) {
        self.pc = self.exec_ctrl.wrap_bottom;
        self.delay_remaining = 0;
        self.forced_instr = None;
        self.stalled = false;
        self.stalled_irq_index = None;
    }

    pub fn clear_fifos(&mut self) {
        self.fifos.clear_fifos();
    }
}

fn apply_pin_effect(
    req: &mut SmPinRequest,
    value: Option<(u8, u8, u32)>,
    field: impl FnOnce(&mut SmPinRequest) -> (&mut u8, &mut u8, &mut Option<u32>),
) {
    if let Some((base, count, v)) = value {
        let (b, c, slot) = field(req);
        *b = base;
        *c = count;
        *slot = Some(v);
    }
}

fn apply_side_effect(req: &mut SmPinRequest, value: Option<(u8, u8, u32)>, pindirs: bool) {
    if let Some((base, count, v)) = value {
        req.side_base = base;
        req.side_count = count;
        if pindirs {
            req.side_set_dir_value = Some(v);
        } else {
            req.side_set_value = Some(v);
        }
    }
}
