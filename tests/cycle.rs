use cyclenet::Cycle;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[test]
fn foreign_task_runs_exactly_once_on_loop_thread() {
    let cycle = Cycle::new();
    let handle = cycle.handle();
    let loop_thread = thread::current().id();

    let runs = Arc::new(AtomicUsize::new(0));
    let runs_in_task = runs.clone();

    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.queue(move |cycle| {
            assert_eq!(
                thread::current().id(),
                loop_thread,
                "task must execute on the loop thread"
            );
            runs_in_task.fetch_add(1, Ordering::SeqCst);
            cycle.exit();
        });
    });

    cycle.run();
    sender.join().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn foreign_tasks_run_in_fifo_order() {
    let cycle = Cycle::new();
    let handle = cycle.handle();
    let order = Arc::new(Mutex::new(Vec::new()));

    let order_in_thread = order.clone();
    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        for i in 0..3 {
            let order = order_in_thread.clone();
            handle.queue(move |_| order.lock().unwrap().push(i));
        }
        handle.queue(|cycle| cycle.exit());
    });

    cycle.run();
    sender.join().unwrap();
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn queued_task_wakes_a_blocked_wait_promptly() {
    let cycle = Cycle::new();
    let handle = cycle.handle();

    let sender = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        handle.queue(|cycle| cycle.exit());
    });

    // No timers pending: the loop would otherwise block for its full
    // default wait. The wakeup descriptor must cut that short.
    let start = std::time::Instant::now();
    cycle.run();
    sender.join().unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn exit_is_idempotent_from_any_thread() {
    let cycle = Cycle::new();
    let handle = cycle.handle();
    let second = handle.clone();

    let quitter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.exit();
        handle.exit();
        second.exit();
    });

    cycle.run();
    quitter.join().unwrap();
}

#[test]
fn run_in_cycle_executes_immediately_on_owner_thread() {
    let cycle = Cycle::new();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_in_task = ran.clone();
    cycle.run_in_cycle(move |_| {
        ran_in_task.fetch_add(1, Ordering::SeqCst);
    });
    // No loop needed: the calling thread owns the cycle.
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}

#[test]
fn cross_thread_timer_cancel_marshals_through_the_queue() {
    let cycle = Cycle::new();
    let handle = cycle.handle();
    let fired = Arc::new(AtomicUsize::new(0));

    let fired_in_cb = fired.clone();
    let id = cycle.run_after(Duration::from_millis(100), move || {
        fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        handle.cancel_timer(id);
        thread::sleep(Duration::from_millis(150));
        handle.exit();
    });

    cycle.run();
    canceller.join().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
