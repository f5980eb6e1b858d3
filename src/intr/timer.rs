use log::trace;

/// Timer ticks ("jiffies") since boot.
pub type Tick = u64;

/// Callback run by the timer when an alarm expires.
pub type AlarmFn = fn(usize);

/// Timer ticks per second.
pub const HZ: Tick = 100;

/// Time between two scheduling decisions. One second, which keeps the
/// task switches easy to follow on the console.
pub const SCHEDULER_QUANTUM: Tick = HZ;

/// The timer/alarm facility of the interrupt layer.
pub trait Timer: Sync {
    fn now(&self) -> Tick;

    /// Runs `callback(arg)` once, from the timer interrupt, as soon as
    /// `deadline` has passed. Returns `false` if the alarm could not be
    /// registered.
    fn arm_one_shot(&self, deadline: Tick, callback: AlarmFn, arg: usize) -> bool;
}

/// Arms `callback` to run `delay` ticks from now.
pub fn arm_after(timer: &dyn Timer, delay: Tick, callback: AlarmFn, arg: usize) -> bool {
    let deadline = timer.now().wrapping_add(delay);
    trace!("timer: alarm at tick {}", deadline);
    timer.arm_one_shot(deadline, callback, arg)
}
