//! Root counters 0-2. Every counter is clocked by the CPU clock; the dot clock,
//! hblank and sync modes aren't modelled.

use modular_bitfield::{bitfield, specifiers::*};

pub const TIMERS_BASE: u32 = 0x1f80_1100;

#[bitfield(bits = 16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CounterMode {
    pub sync_enable: bool,
    pub sync_mode: B2,
    pub reset_at_target: bool,
    pub irq_at_target: bool,
    pub irq_at_max: bool,
    pub irq_repeat: bool,
    pub irq_toggle: bool,
    pub clock_source: B2,
    /// Active low
    pub irq_request: bool,
    pub reached_target: bool,
    pub reached_max: bool,
    #[skip]
    __: B3,
}

impl From<u32> for CounterMode {
    fn from(value: u32) -> Self {
        CounterMode::from_bytes((value as u16).to_le_bytes())
    }
}

impl From<CounterMode> for u32 {
    fn from(value: CounterMode) -> u32 {
        u16::from_le_bytes(value.into_bytes()) as u32
    }
}

#[derive(Debug, Copy, Clone)]
pub struct RootCounter {
    count: u16,
    mode: CounterMode,
    target: u16,
    /// One-shot interrupts already delivered since the last mode write
    fired: bool,
}

impl Default for RootCounter {
    fn default() -> Self {
        RootCounter {
            count: 0,
            mode: CounterMode::new().with_irq_request(true),
            target: 0,
            fired: false,
        }
    }
}

impl RootCounter {
    /// Returns true if the counter wants to interrupt
    pub fn advance(&mut self, cycles: u32) -> bool {
        let target = self.target as u32;
        let before = self.count as u32;
        let after = before + cycles;

        let (reached_target, reached_max) = if self.mode.reset_at_target() {
            let period = target + 1;
            self.count = (after % period) as u16;
            ((before < target || cycles >= period) && after >= target, false)
        } else {
            self.count = after as u16;
            (before < target && after >= target, after > 0xffff)
        };

        if reached_target {
            self.mode.set_reached_target(true);
        }
        if reached_max {
            self.mode.set_reached_max(true);
        }

        let irq = (reached_target && self.mode.irq_at_target()) || (reached_max && self.mode.irq_at_max());
        if !irq || (self.fired && !self.mode.irq_repeat()) {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn count(&self) -> u16 {
        self.count
    }

    pub fn mode(&self) -> CounterMode {
        self.mode
    }

    fn read(&mut self, register: u32) -> u32 {
        match register {
            0 => self.count as u32,
            1 => {
                // Reached flags clear on read
                let mode = self.mode;
                self.mode.set_reached_target(false);
                self.mode.set_reached_max(false);
                mode.into()
            }
            2 => self.target as u32,
            _ => 0,
        }
    }

    fn write(&mut self, register: u32, value: u32) {
        match register {
            0 => self.count = value as u16,
            1 => {
                let flags = (self.mode.reached_target(), self.mode.reached_max());
                self.mode = CounterMode::from(value)
                    .with_irq_request(true)
                    .with_reached_target(flags.0)
                    .with_reached_max(flags.1);
                self.count = 0;
                self.fired = false;
            }
            2 => self.target = value as u16,
            _ => {}
        }
    }
}

#[derive(Debug, Default)]
pub struct Timers {
    counters: [RootCounter; 3],
}

impl Timers {
    pub fn new() -> Timers {
        Timers::default()
    }

    /// Returns the counters that want to interrupt, as a bit per counter
    pub fn advance(&mut self, cycles: u32) -> u8 {
        let mut fired = 0;
        for (n, counter) in self.counters.iter_mut().enumerate() {
            if counter.advance(cycles) {
                fired |= 1 << n;
            }
        }
        fired
    }

    pub fn counter(&self, n: usize) -> &RootCounter {
        &self.counters[n]
    }

    fn locate(address: u32) -> (usize, u32) {
        let offset = address - TIMERS_BASE;
        (((offset >> 4) as usize).min(2), (offset >> 2) & 3)
    }

    pub fn read(&mut self, address: u32) -> u32 {
        let (n, register) = Self::locate(address);
        self.counters[n].read(register)
    }

    pub fn write(&mut self, address: u32, value: u32) {
        let (n, register) = Self::locate(address);
        tracing::debug!("timer {} register {} = {:04x}", n, register, value);
        self.counters[n].write(register, value);
    }

    pub fn reset(&mut self) {
        *self = Timers::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODE0: u32 = TIMERS_BASE + 4;
    const TARGET0: u32 = TIMERS_BASE + 8;

    #[test]
    fn free_running_counter_wraps() {
        let mut timers = Timers::new();
        assert_eq!(timers.advance(0xfff0), 0);
        assert_eq!(timers.read(TIMERS_BASE), 0xfff0);
        timers.advance(0x20);
        assert_eq!(timers.counter(0).count(), 0x10);
        assert!(timers.counter(0).mode().reached_max());
    }

    #[test]
    fn target_interrupts_once_unless_repeating() {
        let mut timers = Timers::new();
        timers.write(TARGET0, 100);
        timers.write(MODE0, u32::from(CounterMode::new().with_reset_at_target(true).with_irq_at_target(true)));

        assert_eq!(timers.advance(99), 0);
        assert_eq!(timers.advance(1), 1);
        assert_eq!(timers.counter(0).count(), 100);
        assert_eq!(timers.advance(1), 0);
        assert_eq!(timers.counter(0).count(), 0);
        assert_eq!(timers.advance(150), 0, "one-shot");

        timers.write(MODE0, u32::from(CounterMode::new()
            .with_reset_at_target(true)
            .with_irq_at_target(true)
            .with_irq_repeat(true)));
        assert_eq!(timers.advance(100), 1);
        assert_eq!(timers.advance(101), 1);
    }

    #[test]
    fn reading_mode_clears_reached_flags() {
        let mut timers = Timers::new();
        timers.write(TARGET0, 10);
        timers.advance(20);
        let mode = CounterMode::from(timers.read(MODE0));
        assert!(mode.reached_target());
        assert!(mode.irq_request());
        assert!(!CounterMode::from(timers.read(MODE0)).reached_target());
    }

    #[test]
    fn mode_write_restarts_the_count() {
        let mut timers = Timers::new();
        timers.advance(500);
        timers.write(TIMERS_BASE + 0x24, 0);
        timers.advance(3);
        assert_eq!(timers.counter(2).count(), 3);
        assert_eq!(timers.counter(0).count(), 503);
    }
}
