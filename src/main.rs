//! # CoopOS Example Firmware
//!
//! Two tasks generate square waves by toggling a pin and delaying:
//!
//! | Task | Pin | High | Low | Duty |
//! |------|-----|------|-----|------|
//! | `pulse_fast` | PB0 | 20 | 10 | 2/3 |
//! | `pulse_slow` | PB1 | 20 | 30 | 2/5 |
//!
//! On an STM32F4 the widths are milliseconds, timed by SysTick. On a host
//! the same pair runs against a simulated 8-bit counter at 128 µs per tick,
//! where 20 ms would exceed half the counter period, so the widths are
//! ticks instead. The simulation runs 300 ticks, crossing one counter wrap,
//! and logs the measured duty cycles. A task wakes on the first tick after
//! its wake time, so each simulated width comes out one tick long.
//!
//! ```text
//! RUST_LOG=debug cargo run
//! ```

#![cfg_attr(target_os = "none", no_std, no_main)]

#[cfg(target_os = "none")]
#[cortex_m_rt::entry]
fn main() -> ! {
    firmware::run()
}

#[cfg(not(target_os = "none"))]
fn main() -> Result<(), coopos::error::KernelError> {
    simulation::run()
}

// ---------------------------------------------------------------------------
// STM32F4 firmware
// ---------------------------------------------------------------------------

#[cfg(target_os = "none")]
mod firmware {
    use core::ptr;

    use panic_halt as _;

    use coopos::arch::{configure_systick, SysTickClock};
    use coopos::config::{CLOCK_HZ, NUM_TASKS, STACK_SIZE, TIMER_BITS, TIMER_PRESCALER};
    use coopos::kernel;
    use coopos::scheduler::Scheduler;
    use coopos::task::{TaskDescriptor, TaskStack};
    use coopos::time::{TickRate, Timebase};

    const RCC_AHB1ENR: *mut u32 = 0x4002_3830 as *mut u32;
    const GPIOB_MODER: *mut u32 = 0x4002_0400 as *mut u32;
    const GPIOB_BSRR: *mut u32 = 0x4002_0418 as *mut u32;
    const GPIOBEN: u32 = 1 << 1;

    static SYSTICK: SysTickClock = SysTickClock;

    /// A GPIOB output pin.
    #[derive(Clone, Copy)]
    struct Pin(u32);

    impl Pin {
        /// Enable the GPIOB clock and make the pin a push-pull output.
        fn configure(self) {
            // Safety: read-modify-write of RCC and GPIOB registers before
            // the scheduler starts; nothing else touches them.
            unsafe {
                let enr = ptr::read_volatile(RCC_AHB1ENR);
                ptr::write_volatile(RCC_AHB1ENR, enr | GPIOBEN);

                let moder = ptr::read_volatile(GPIOB_MODER);
                let shift = self.0 * 2;
                ptr::write_volatile(GPIOB_MODER, (moder & !(0b11 << shift)) | (0b01 << shift));
            }
        }

        fn set_high(self) {
            // Safety: BSRR writes are atomic set/reset operations.
            unsafe { ptr::write_volatile(GPIOB_BSRR, 1 << self.0) }
        }

        fn set_low(self) {
            // Safety: as above.
            unsafe { ptr::write_volatile(GPIOB_BSRR, 1 << (self.0 + 16)) }
        }
    }

    const FAST_PIN: Pin = Pin(0);
    const SLOW_PIN: Pin = Pin(1);

    fn pulse(pin: Pin, high_ms: u32, low_ms: u32) -> ! {
        loop {
            pin.set_high();
            kernel::delay_ms(high_ms);
            pin.set_low();
            kernel::delay_ms(low_ms);
        }
    }

    fn pulse_fast() -> ! {
        pulse(FAST_PIN, 20, 10)
    }

    fn pulse_slow() -> ! {
        pulse(SLOW_PIN, 20, 30)
    }

    /// Initializes the hardware, seeds both tasks and enters the dispatcher
    /// loop. Does not return.
    pub fn run() -> ! {
        let mut cp = cortex_m::Peripherals::take().unwrap();
        configure_systick(&mut cp.SYST);
        FAST_PIN.configure();
        SLOW_PIN.configure();

        let timebase = Timebase::new(
            &SYSTICK,
            TIMER_BITS,
            TickRate::new(CLOCK_HZ, TIMER_PRESCALER),
        )
        .unwrap();

        let fast_stack = cortex_m::singleton!(: TaskStack<STACK_SIZE> = TaskStack::new()).unwrap();
        let slow_stack = cortex_m::singleton!(: TaskStack<STACK_SIZE> = TaskStack::new()).unwrap();
        let tasks: [TaskDescriptor; NUM_TASKS] = [
            TaskDescriptor::new("pulse_fast", pulse_fast, fast_stack),
            TaskDescriptor::new("pulse_slow", pulse_slow, slow_stack),
        ];

        let mut scheduler = Scheduler::new(timebase, tasks).unwrap();
        scheduler.run()
    }
}

// ---------------------------------------------------------------------------
// Hosted simulation
// ---------------------------------------------------------------------------

#[cfg(not(target_os = "none"))]
mod simulation {
    use std::sync::atomic::{AtomicBool, Ordering};

    use coopos::config::{
        NUM_TASKS, SIM_CLOCK_HZ, SIM_PRESCALER, SIM_TIMER_BITS, STACK_SIZE,
    };
    use coopos::error::KernelError;
    use coopos::kernel;
    use coopos::scheduler::Scheduler;
    use coopos::task::{TaskDescriptor, TaskStack};
    use coopos::time::{SimClock, TickRate, Timebase};

    /// Simulated ticks to run. Crosses one wrap of the 8-bit counter.
    const SIM_TICKS: u32 = 300;

    static CLOCK: SimClock = SimClock::new();
    static FAST_PIN: AtomicBool = AtomicBool::new(false);
    static SLOW_PIN: AtomicBool = AtomicBool::new(false);

    fn pulse(name: &str, pin: &AtomicBool, high: u32, low: u32) -> ! {
        loop {
            pin.store(true, Ordering::SeqCst);
            log::debug!("{} high at tick {}", name, kernel::now().raw());
            kernel::delay(high);
            pin.store(false, Ordering::SeqCst);
            log::debug!("{} low at tick {}", name, kernel::now().raw());
            kernel::delay(low);
        }
    }

    fn pulse_fast() -> ! {
        pulse("pulse_fast", &FAST_PIN, 20, 10)
    }

    fn pulse_slow() -> ! {
        pulse("pulse_slow", &SLOW_PIN, 20, 30)
    }

    fn stack() -> &'static mut TaskStack<STACK_SIZE> {
        Box::leak(Box::new(TaskStack::new()))
    }

    pub fn run() -> Result<(), KernelError> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .init();

        let timebase = Timebase::new(
            &CLOCK,
            SIM_TIMER_BITS,
            TickRate::new(SIM_CLOCK_HZ, SIM_PRESCALER),
        )?;
        let tasks: [TaskDescriptor; NUM_TASKS] = [
            TaskDescriptor::new("pulse_fast", pulse_fast, stack()),
            TaskDescriptor::new("pulse_slow", pulse_slow, stack()),
        ];
        let mut scheduler = Scheduler::new(timebase, tasks)?;

        let (mut fast_high, mut slow_high) = (0, 0);
        for tick in 0..SIM_TICKS {
            CLOCK.set(tick);
            scheduler.sweep();
            fast_high += u32::from(FAST_PIN.load(Ordering::SeqCst));
            slow_high += u32::from(SLOW_PIN.load(Ordering::SeqCst));
        }

        log::info!("pulse_fast high for {}/{} ticks", fast_high, SIM_TICKS);
        log::info!("pulse_slow high for {}/{} ticks", slow_high, SIM_TICKS);
        for task in scheduler.tasks() {
            let stats = task.stats();
            log::info!(
                "{}: {} resumes, {} suspends, max lateness {} ticks",
                task.name(),
                stats.resumes,
                stats.suspends,
                stats.max_lateness
            );
        }
        Ok(())
    }
}
