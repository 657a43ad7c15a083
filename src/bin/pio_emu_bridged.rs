//! Thin wiring binary: builds the two PIO blocks at their real RP2040
//! register bases, mounts the user and extended facades on one address bus,
//! runs a free-running master clock, and serves the TCP register bridge.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rp2040_pio_emu::bus::{AddressBus, BusHandle};
use rp2040_pio_emu::config::{BridgeConfig, PIO_NUM};
use rp2040_pio_emu::mmr::ext_facade::ExtFacade;
use rp2040_pio_emu::mmr::pio_facade::PioFacade;
use rp2040_pio_emu::{bridge, PioBlock, PioHandle};

const PIO0_BASE: u32 = 0x5020_0000;
const PIO_STRIDE: u32 = 0x0010_0000;
const EXT_BASE: u32 = 0xe000_0000;
const EXT_STRIDE: u32 = 0x0001_0000;
const CLOCK_PERIOD: Duration = Duration::from_micros(125); // 8 MHz master tick

#[tokio::main]
async fn main() -> rp2040_pio_emu::EmuResult<()> {
    env_logger::init();

    let mut bus = AddressBus::new();
    let mut blocks: Vec<PioHandle> = Vec::with_capacity(PIO_NUM);

    for i in 0..PIO_NUM {
        let block: PioHandle = Arc::new(Mutex::new(PioBlock::new()));
        bus.register(Box::new(PioFacade::new(PIO0_BASE + i as u32 * PIO_STRIDE, block.clone())));
        bus.register(Box::new(ExtFacade::new(EXT_BASE + i as u32 * EXT_STRIDE, block.clone())));
        blocks.push(block);
    }

    let bus: BusHandle = Arc::new(Mutex::new(bus));
    spawn_clock(blocks);

    bridge::serve(bus, BridgeConfig::default()).await
}

/// Drive every PIO block's shared tick at a fixed master-clock rate. Real
/// silicon timing is out of scope; this just keeps the emulator advancing
/// for clients that don't single-step via the extended facade's STEP
/// register.
fn spawn_clock(blocks: Vec<PioHandle>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CLOCK_PERIOD);
        loop {
            ticker.tick().await;
            for block in &blocks {
                block.lock().unwrap().tick();
            }
        }
    });
}
