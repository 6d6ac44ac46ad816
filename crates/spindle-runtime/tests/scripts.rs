use spindle_kernel::{KernelConfig, KernelError};
use spindle_runtime::{run_source, RuntimeError};

fn run(config: KernelConfig, source: &str) -> Result<(), RuntimeError> {
    let _ = env_logger::builder().is_test(true).try_init();
    run_source(config, source).map(|_| ())
}

#[test]
fn equal_priority_round_robin() {
    let source = "
        spawn a normal
        spawn b normal
        expect main running
        tick
        expect a running
        tick
        expect b running
        tick
        expect main running
    ";
    run(KernelConfig::default(), source).unwrap();
}

#[test]
fn quantum_flag_changes_rotation() {
    let config = KernelConfig {
        quantum_ticks: 2,
        ..KernelConfig::default()
    };
    let source = "
        spawn a normal
        tick
        expect main running
        tick
        expect a running
    ";
    run(config, source).unwrap();
}

#[test]
fn sleeping_five_ticks() {
    let source = "
        spawn s low
        sleep 1
        sleep 5          # s sleeps; main wakes on the next tick
        tick 4
        expect s waiting
        tick
        expect s ready
        tick
        expect s ready
        expect main running
    ";
    run(KernelConfig::default(), source).unwrap();
}

#[test]
fn try_lock_on_owned_mutex_times_out() {
    let source = "
        mutex m
        lock m
        spawn a high
        lock m try
    ";
    let err = run(KernelConfig::default(), source).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Kernel {
            line: 5,
            source: KernelError::Timeout
        }
    ));
}

#[test]
fn killing_owner_hands_mutex_on() {
    let source = "
        mutex m
        spawn a high
        lock m
        sleep 3
        spawn b high
        lock m           # b queues
        expect b waiting
        kill a
        expect-owner m b
        expect a dead
        expect b running
        reap a
    ";
    run(KernelConfig::default(), source).unwrap();
}

#[test]
fn chunked_write_round_trip() {
    let config = KernelConfig {
        io_chunk_size: 4,
        ..KernelConfig::default()
    };
    let source = "
        alloc out system 32
        poke out the quick brown fox
        open fd /fox w,create
        io
        write n fd out 19
        io 10
        expect-io n 19
        close fd
        io
        alloc back system 32
        open rd /fox
        io
        seek pos rd 4
        io
        expect-io pos 4
        read got rd back 5
        io 2
        expect-io got 5
        expect-text back quick
        expect-free shared 16384
    ";
    run(config, source).unwrap();
}

#[test]
fn oversized_request_is_rejected() {
    let source = "
        pool p 100
        alloc a p 101
    ";
    let err = run(KernelConfig::default(), source).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Kernel {
            line: 3,
            source: KernelError::ResourceExhausted { .. }
        }
    ));
}
