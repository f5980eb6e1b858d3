mod common;

use common::{idle, FailingAllocator, Sim};
use tempos_proc::{proc, SchedConfig};

#[test]
#[should_panic(expected = "cannot create the bootstrap task")]
fn bootstrap_without_memory_is_fatal() {
    let sim = Sim::new();
    let mut platform = sim.platform();
    platform.allocator = FailingAllocator::new(sim.heap, 0);

    proc::install(platform, SchedConfig::new(), idle);
}

#[test]
#[should_panic(expected = "Could not install scheduler alarm.")]
fn bootstrap_without_alarm_is_fatal() {
    let sim = Sim::new();
    sim.timer.reject_alarms();

    proc::install(sim.platform(), SchedConfig::new(), idle);
}
