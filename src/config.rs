//! Compile-time configuration constants and bridge configuration.

use std::net::IpAddr;

/// Number of 16-bit instruction slots in the shared instruction memory.
pub const MEMORY_SIZE: usize = 32;
/// Number of state machines per PIO block.
pub const SM_COUNT: usize = 4;
/// Depth of a single-direction FIFO before it merges with its companion.
pub const FIFO_DEPTH: usize = 4;
/// Depth of a FIFO whose companion has been merged in (`fjoin_tx`/`fjoin_rx`).
pub const FIFO_DEPTH_JOINED: usize = FIFO_DEPTH * 2;
/// Number of PIO blocks modelled (two, as on RP2040).
pub const PIO_NUM: usize = 2;
/// Number of block-level IRQ latches.
pub const IRQ_COUNT: usize = 8;
/// Number of GPIO pins arbitrated by the fabric.
pub const GPIO_COUNT: usize = 32;

/// Default TCP port for the register bridge.
pub const DEFAULT_BRIDGE_PORT: u16 = 1088;

/// Runtime configuration for the TCP register bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([0, 0, 0, 0]),
            port: DEFAULT_BRIDGE_PORT,
        }
    }
}
