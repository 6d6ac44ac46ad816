use proptest::prelude::*;
use spindle_kernel::{Kernel, KernelConfig, Priority, ThreadId, ThreadState};
use spindle_machine::SimMachine;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn worker(_: usize) {}

fn kernel() -> Kernel<SimMachine> {
    init_logger();
    Kernel::new(SimMachine::default(), KernelConfig::default()).unwrap()
}

fn assert_one_running(k: &Kernel<SimMachine>) {
    let running: Vec<ThreadId> = k
        .threads()
        .into_iter()
        .filter(|t| t.state == ThreadState::Running)
        .map(|t| t.id)
        .collect();
    assert_eq!(running, [k.current_thread()]);
}

#[test]
fn sleeper_wakes_after_exactly_its_ticks() {
    let mut k = kernel();
    let main = k.current_thread();
    let sleeper = k.create_thread(worker, 0, 128, Priority::Low).unwrap();

    // let the low thread run so it can go to sleep
    k.sleep_current(1).unwrap();
    assert_eq!(k.current_thread(), sleeper);
    k.sleep_current(5).unwrap();
    assert_eq!(k.current_thread(), k.idle_thread());

    // the first tick also wakes main, which then keeps the processor
    for _ in 0..4 {
        k.timer_tick().unwrap();
        assert_eq!(k.thread_state(sleeper).unwrap(), ThreadState::Waiting);
        assert_eq!(k.current_thread(), main);
    }
    k.timer_tick().unwrap();
    assert_eq!(k.thread_state(sleeper).unwrap(), ThreadState::Ready);
    assert!(k.wait_list().is_empty());

    k.timer_tick().unwrap();
    assert_eq!(k.thread_state(sleeper).unwrap(), ThreadState::Ready);
    assert_eq!(k.ready_threads(), [(Priority::Low, sleeper)]);
    assert_eq!(k.current_thread(), main);
    assert_one_running(&k);
}

#[test]
fn equal_priority_threads_share_the_processor() {
    let mut k = kernel();
    let main = k.current_thread();
    let a = k.create_thread(worker, 0, 128, Priority::Normal).unwrap();
    let b = k.create_thread(worker, 0, 128, Priority::Normal).unwrap();
    let low = k.create_thread(worker, 0, 128, Priority::Low).unwrap();

    let mut order = vec![k.current_thread()];
    for _ in 0..6 {
        k.timer_tick().unwrap();
        assert_one_running(&k);
        order.push(k.current_thread());
    }
    assert_eq!(order, [main, a, b, main, a, b, main]);
    assert_eq!(k.thread_state(low).unwrap(), ThreadState::Ready);
}

#[test]
fn longer_quantum_delays_rotation() {
    init_logger();
    let config = KernelConfig {
        quantum_ticks: 3,
        ..KernelConfig::default()
    };
    let mut k = Kernel::new(SimMachine::default(), config).unwrap();
    let main = k.current_thread();
    let peer = k.create_thread(worker, 0, 128, Priority::Normal).unwrap();

    k.timer_tick().unwrap();
    k.timer_tick().unwrap();
    assert_eq!(k.current_thread(), main);
    k.timer_tick().unwrap();
    assert_eq!(k.current_thread(), peer);
}

#[test]
fn woken_high_thread_preempts_on_the_tick() {
    let mut k = kernel();
    let main = k.current_thread();
    let high = k.create_thread(worker, 0, 128, Priority::High).unwrap();
    k.sleep_current(2).unwrap();
    assert_eq!(k.current_thread(), main);

    k.timer_tick().unwrap();
    assert_eq!(k.current_thread(), main);
    k.timer_tick().unwrap();
    assert_eq!(k.current_thread(), high);
    assert_eq!(k.thread_state(main).unwrap(), ThreadState::Ready);
}

#[test]
fn machine_sees_one_switch_per_dispatch() {
    let mut k = kernel();
    let main_ctx = k.thread(k.current_thread()).unwrap().context;
    let high = k.create_thread(worker, 0, 128, Priority::High).unwrap();
    let high_ctx = k.thread(high).unwrap().context;
    k.exit_current().unwrap();

    assert_eq!(k.machine().switch_log(), &[(main_ctx, high_ctx), (high_ctx, main_ctx)]);
    assert_eq!(
        k.machine().context_entry(high_ctx).map(|(_, arg)| arg),
        Some(0)
    );
}

#[derive(Debug, Clone)]
enum Op {
    Spawn(Priority),
    Tick,
    Sleep(u32),
    Yield,
    Exit,
}

fn op() -> impl Strategy<Value = Op> {
    let priority = prop_oneof![
        Just(Priority::Low),
        Just(Priority::Normal),
        Just(Priority::High)
    ];
    prop_oneof![
        priority.prop_map(Op::Spawn),
        Just(Op::Tick),
        (1u32..4).prop_map(Op::Sleep),
        Just(Op::Yield),
        Just(Op::Exit),
    ]
}

proptest! {
    #[test]
    fn highest_ready_never_waits_behind_lower(ops in prop::collection::vec(op(), 1..80)) {
        let mut k = kernel();

        for op in ops {
            let on_idle = k.current_thread() == k.idle_thread();
            match op {
                Op::Spawn(priority) => {
                    k.create_thread(worker, 0, 64, priority).unwrap();
                }
                Op::Tick => k.timer_tick().unwrap(),
                Op::Sleep(n) if !on_idle => k.sleep_current(n).unwrap(),
                Op::Yield => k.sleep_current(0).unwrap(),
                Op::Exit if !on_idle => k.exit_current().unwrap(),
                _ => {}
            }

            let running: Vec<_> = k
                .threads()
                .into_iter()
                .filter(|t| t.state == ThreadState::Running)
                .map(|t| t.id)
                .collect();
            prop_assert_eq!(running, vec![k.current_thread()]);

            let current = k.thread_priority(k.current_thread()).unwrap();
            if let Some(&(ready, _)) = k.ready_threads().first() {
                prop_assert!(ready <= current);
            }
            for (priority, thread) in k.ready_threads() {
                prop_assert_eq!(k.thread_state(thread).unwrap(), ThreadState::Ready);
                prop_assert_eq!(k.thread_priority(thread).unwrap(), priority);
            }
        }
    }
}
