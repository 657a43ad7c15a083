//! Cycle-accurate software emulator core for the RP2040 Programmable I/O
//! (PIO) block: four state machines executing a nine-opcode ISA against a
//! shared GPIO fabric and IRQ set, exposed over a datasheet-accurate
//! register facade and, optionally, a line-oriented TCP bridge for
//! out-of-process SDK bindings.
//!
//! The core is deliberately silent about *how* a program gets loaded or a
//! session gets driven interactively; it only implements the instruction
//! semantics, the shared fabric and the register map.

pub mod bridge;
pub mod bus;
pub mod config;
pub mod error;
pub mod fifo;
pub mod gpio_fabric;
pub mod irq;
pub mod isa;
pub mod mmr;
pub mod pio_block;
pub mod shift;
pub mod state_machine;

pub use config::BridgeConfig;
pub use error::{EmuError, EmuResult};
pub use pio_block::{PioBlock, PioHandle};
