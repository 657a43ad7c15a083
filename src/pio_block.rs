//! PIO block: owns the four state machines, the shared instruction
//! memory, the IRQ unit and the GPIO fabric, and orchestrates the
//! two-phase tick.

use std::sync::{Arc, Mutex};

use crate::config::{MEMORY_SIZE, SM_COUNT};
use crate::gpio_fabric::{GpioFabric, SmPinRequest};
use crate::irq::IrqUnit;
use crate::state_machine::StateMachine;

/// Shared ownership of one PIO block: the master-clock stepper, the two
/// MMR facades, and the TCP bridge's client tasks all serialize on this
/// one lock.
pub type PioHandle = Arc<Mutex<PioBlock>>;

/// One RP2040 PIO block: 4 SMs sharing memory, IRQ flags and a GPIO view.
#[derive(Debug, Clone)]
pub struct PioBlock {
    memory: [u16; MEMORY_SIZE],
    sms: [StateMachine; SM_COUNT],
    irq: IrqUnit,
    gpio: GpioFabric,
}

impl Default for PioBlock {
    fn default() -> Self {
        Self {
            memory: [0u16; MEMORY_SIZE],
            sms: std::array::from_fn(|_| StateMachine::new()),
            irq: IrqUnit::new(),
            gpio: GpioFabric::new(),
        }
    }
}

impl PioBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory(&self) -> &[u16; MEMORY_SIZE] {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut [u16; MEMORY_SIZE] {
        &mut self.memory
    }

    pub fn sm(&self, i: usize) -> &StateMachine {
        &self.sms[i]
    }

    pub fn sm_mut(&mut self, i: usize) -> &mut StateMachine {
        &mut self.sms[i]
    }

    pub fn irq(&self) -> &IrqUnit {
        &self.irq
    }

    pub fn irq_mut(&mut self) -> &mut IrqUnit {
        &mut self.irq
    }

    pub fn gpio(&self) -> &GpioFabric {
        &self.gpio
    }

    pub fn gpio_mut(&mut self) -> &mut GpioFabric {
        &mut self.gpio
    }

    /// Run one full tick: phase 0 sample, each enabled SM steps in index
    /// order against the phase-0 snapshot, GPIO arbitrates, phase 1
    /// commits, derived IRQ state updates.
    pub fn tick(&mut self) {
        self.gpio.sample_inputs();
        let pins = self.sample_pin_word();
        let irq_flags = self.irq.raw();

        let mut requests = [SmPinRequest::default(); SM_COUNT];
        let mut irq_sets = Vec::new();
        let mut irq_clears = Vec::new();

        for (i, sm) in self.sms.iter_mut().enumerate() {
            let fx = sm.step(i as u8, &self.memory, pins, irq_flags);
            requests[i] = fx.pins;
            if let Some(idx) = fx.irq_set {
                irq_sets.push(idx);
            }
            if let Some(idx) = fx.irq_clear {
                irq_clears.push(idx);
            }
        }

        self.gpio.arbitrate(&requests);
        for idx in irq_sets {
            self.irq.set(idx);
        }
        for idx in irq_clears {
            self.irq.clear_masked(1 << (idx & 0x07));
        }
    }

    fn sample_pin_word(&self) -> u32 {
        let mut word = 0u32;
        for i in 0..crate::config::GPIO_COUNT {
            if self.gpio.get_pin(i) {
                word |= 1 << i;
            }
        }
        word
    }

    pub fn tx_not_full(&self) -> [bool; SM_COUNT] {
        std::array::from_fn(|i| !self.sms[i].fifos.tx_is_full())
    }

    pub fn rx_not_empty(&self) -> [bool; SM_COUNT] {
        std::array::from_fn(|i| !self.sms[i].fifos.rx_is_empty())
    }

    /// Restart every SM whose bit is set in `mask` (CTRL.SM_RESTART).
    pub fn restart_sms(&mut self, mask: u8) {
        for i in 0..SM_COUNT {
            if mask & (1 << i) != 0 {
                self.sms[i].restart();
            }
        }
    }

    /// Reset the clock divider fractional accumulator for SMs in `mask`
    /// (CTRL.CLKDIV_RESTART).
    pub fn restart_clkdivs(&mut self, mask: u8) {
        for i in 0..SM_COUNT {
            if mask & (1 << i) != 0 {
                self.sms[i].clk_div = crate::state_machine::ClkDiv::default();
            }
        }
    }
}
