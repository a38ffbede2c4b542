use cyclenet::CycleThread;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[test]
fn start_publishes_a_working_handle() {
    let cycle_thread = CycleThread::start();
    let handle = cycle_thread.handle();
    let main_thread = thread::current().id();

    let (tx, rx) = mpsc::channel();
    handle.queue(move |_| {
        tx.send(thread::current().id()).unwrap();
    });

    let loop_thread = rx
        .recv_timeout(Duration::from_secs(2))
        .expect("task must run on the spawned loop");
    assert_ne!(loop_thread, main_thread);
}

#[test]
fn timers_scheduled_through_the_handle_fire_on_the_loop() {
    let cycle_thread = CycleThread::start();
    let handle = cycle_thread.handle();

    let (tx, rx) = mpsc::channel();
    handle.queue(move |cycle| {
        let tx = tx.clone();
        cycle.run_after(Duration::from_millis(20), move || {
            tx.send(()).unwrap();
        });
    });

    rx.recv_timeout(Duration::from_secs(2))
        .expect("timer must fire on the loop thread");
}

#[test]
fn cross_thread_cancel_through_the_handle() {
    let cycle_thread = CycleThread::start();
    let handle = cycle_thread.handle();

    let (id_tx, id_rx) = mpsc::channel();
    let (fire_tx, fire_rx) = mpsc::channel();
    handle.queue(move |cycle| {
        let fire_tx = fire_tx.clone();
        let id = cycle.run_after(Duration::from_millis(150), move || {
            fire_tx.send(()).unwrap();
        });
        id_tx.send(id).unwrap();
    });

    let id = id_rx.recv_timeout(Duration::from_secs(2)).expect("id");
    handle.cancel_timer(id);

    assert!(
        fire_rx.recv_timeout(Duration::from_millis(400)).is_err(),
        "cancelled timer must not fire"
    );
}

#[test]
fn drop_exits_the_loop_and_joins() {
    let cycle_thread = CycleThread::start();
    let handle = cycle_thread.handle();
    drop(cycle_thread); // must not hang

    // The loop is gone; queued work is silently dropped, the call must
    // still be safe.
    handle.queue(|_| {});
}
