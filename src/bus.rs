//! Address bus: routes a 32-bit address to the facade whose base/span
//! window claims it, and implements the blocking register `wait`.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{EmuError, EmuResult};
use crate::mmr::Facade;

/// Ordered, non-overlapping set of register windows.
pub struct AddressBus {
    facades: Vec<Box<dyn Facade + Send>>,
}

impl Default for AddressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressBus {
    pub fn new() -> Self {
        Self { facades: Vec::new() }
    }

    /// Mount a facade. The first-registered facade whose window contains an
    /// address wins ties.
    pub fn register(&mut self, facade: Box<dyn Facade + Send>) {
        self.facades.push(facade);
    }

    fn find(&self, addr: u32) -> Option<&(dyn Facade + Send)> {
        self.facades.iter().find(|f| f.provides(addr)).map(|f| f.as_ref())
    }

    fn find_mut(&mut self, addr: u32) -> Option<&mut (dyn Facade + Send)> {
        self.facades.iter_mut().find(|f| f.provides(addr)).map(|f| f.as_mut())
    }

    pub fn provides(&self, addr: u32) -> bool {
        self.find(addr).is_some()
    }

    /// Unmapped reads return 0.
    pub fn read(&self, addr: u32) -> u32 {
        self.find(addr).map(|f| f.read(addr)).unwrap_or(0)
    }

    /// Unmapped writes are silently discarded.
    pub fn write(&mut self, addr: u32, value: u32) {
        if let Some(f) = self.find_mut(addr) {
            f.write(addr, value);
        }
    }

    pub fn get_label(&self, addr: u32) -> Option<&'static str> {
        self.find(addr).and_then(|f| f.get_label(addr))
    }
}

/// Shared handle to the bus, serializing access from the clock stepper, the
/// in-process facade consumer, and the bridge's per-client tasks.
pub type BusHandle = Arc<StdMutex<AddressBus>>;

/// One polling attempt per wait "cycle", since the bus has no direct view of
/// the master clock's tick rate.
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Suspend until `(read(address) & mask) == (expected & mask)`, bounded by
/// whichever of `cycles_timeout`/`millis_timeout` is non-zero and fires
/// first; `0` in either field means unbounded on that axis. An `address` no
/// facade provides fails immediately with `EmuError::UnmappedAddress`
/// rather than polling a read that can only ever return 0.
///
/// The bus lock is only ever held for the duration of a single `read`,
/// never across the poll's sleep.
pub async fn wait(
    bus: &BusHandle,
    address: u32,
    expected: u32,
    mask: u32,
    cycles_timeout: u32,
    millis_timeout: u32,
) -> EmuResult<u32> {
    if !bus.lock().unwrap().provides(address) {
        return Err(EmuError::UnmappedAddress(address));
    }

    let deadline = if millis_timeout > 0 {
        Some(Instant::now() + Duration::from_millis(millis_timeout as u64))
    } else {
        None
    };

    let mut cycles = 0u32;
    loop {
        let value = bus.lock().unwrap().read(address);
        if value & mask == expected & mask {
            return Ok(value);
        }

        cycles += 1;
        if cycles_timeout > 0 && cycles >= cycles_timeout {
            return Err(EmuError::Timeout);
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(EmuError::Timeout);
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmr::AccessMode;

    struct OneRegister {
        base: u32,
        value: u32,
    }

    impl Facade for OneRegister {
        fn base(&self) -> u32 {
            self.base
        }
        fn span(&self) -> u32 {
            4
        }
        fn read(&self, _addr: u32) -> u32 {
            self.value
        }
        fn write(&mut self, addr: u32, value: u32) {
            self.value = AccessMode::from_addr(addr).apply(self.value, value);
        }
        fn get_label(&self, _addr: u32) -> Option<&'static str> {
            Some("ONE")
        }
    }

    #[test]
    fn unmapped_read_is_zero_and_write_is_ignored() {
        let mut bus = AddressBus::new();
        bus.register(Box::new(OneRegister { base: 0x1000, value: 42 }));
        assert_eq!(bus.read(0x2000), 0);
        bus.write(0x2000, 99);
        assert_eq!(bus.read(0x1000), 42);
    }

    #[test]
    fn mapped_address_routes_to_its_facade() {
        let mut bus = AddressBus::new();
        bus.register(Box::new(OneRegister { base: 0x1000, value: 7 }));
        assert_eq!(bus.read(0x1000), 7);
        bus.write(0x1000, 9);
        assert_eq!(bus.read(0x1000), 9);
        assert_eq!(bus.get_label(0x1000), Some("ONE"));
        assert_eq!(bus.get_label(0x2000), None);
    }

    #[tokio::test]
    async fn wait_resolves_once_background_write_lands() {
        let bus: BusHandle = Arc::new(StdMutex::new(AddressBus::new()));
        bus.lock().unwrap().register(Box::new(OneRegister { base: 0x1000, value: 0 }));

        let bus2 = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            bus2.lock().unwrap().write(0x1000, 5);
        });

        let v = wait(&bus, 0x1000, 5, 0xFFFF_FFFF, 0, 1000).await.unwrap();
        assert_eq!(v, 5);
    }

    #[tokio::test]
    async fn wait_times_out_on_cycles() {
        let bus: BusHandle = Arc::new(StdMutex::new(AddressBus::new()));
        bus.lock().unwrap().register(Box::new(OneRegister { base: 0x1000, value: 0 }));
        let err = wait(&bus, 0x1000, 1, 0xFFFF_FFFF, 2, 0).await.unwrap_err();
        assert!(matches!(err, EmuError::Timeout));
    }
}
