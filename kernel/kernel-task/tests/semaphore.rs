//! Semaphore ordering and the shared-counter exit scenario.

mod common;

use kernel_task::{
    create, exit, init, set_parent_to_current, start, wait, yield_now, Semaphore, WaitError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

static FIFO_SEM: Semaphore = Semaphore::new(0);
static WAKE_ORDER: Mutex<Vec<usize>> = Mutex::new(Vec::new());

static SHARED: Semaphore = Semaphore::new(0);

static PARK_SEM: Semaphore = Semaphore::new(0);
static PARK_WOKEN: AtomicUsize = AtomicUsize::new(0);

static DONE: AtomicBool = AtomicBool::new(false);

fn fifo_waiter_entry(i: usize) {
    assert!(FIFO_SEM.wait(), "waiter was woken without a post");
    WAKE_ORDER.lock().unwrap().push(i);
    exit(0);
}

fn shared_poster_entry(i: usize) {
    SHARED.post();
    exit(30 + i as i32);
}

fn parked_entry(_i: usize) {
    assert!(PARK_SEM.wait(), "waiter was woken without a post");
    PARK_WOKEN.fetch_add(1, Ordering::SeqCst);
    exit(0);
}

fn spawn_child(entry: fn(usize), arg: usize) {
    let c = create(entry, arg);
    set_parent_to_current(&c);
    start(c);
}

fn root_entry(_arg: usize) {
    // posts in waiter-arrival order wake waiters in that order
    for i in 1..=3i32 {
        spawn_child(fifo_waiter_entry, i as usize);
        // the counter shows the waiter once it is queued
        while FIFO_SEM.value() != -i {
            yield_now();
        }
    }
    for released in 1..=3 {
        FIFO_SEM.post();
        while WAKE_ORDER.lock().unwrap().len() < released {
            yield_now();
        }
    }
    assert_eq!(*WAKE_ORDER.lock().unwrap(), vec![1, 2, 3]);
    for _ in 0..3 {
        wait().unwrap();
    }

    // ten children each post a shared semaphore once and exit 30+i
    for i in 0..10 {
        spawn_child(shared_poster_entry, i);
    }
    let mut codes: Vec<i32> = (0..10).map(|_| wait().unwrap().1).collect();
    codes.sort_unstable();
    assert_eq!(codes, (30..40).collect::<Vec<i32>>());
    assert_eq!(wait(), Err(WaitError::NoChildren));
    assert_eq!(SHARED.value(), 10, "post count must be exactly 10");

    // non-suspending variants
    assert_eq!(SHARED.get_all(), 10);
    assert_eq!(SHARED.value(), 0);
    assert!(!SHARED.get());
    assert_eq!(SHARED.get_all(), 0);
    SHARED.post();
    assert!(SHARED.get());

    // post_all releases every queued waiter at once
    for i in 0..2 {
        spawn_child(parked_entry, i);
    }
    while PARK_SEM.value() != -2 {
        yield_now();
    }
    PARK_SEM.post_all();
    assert_eq!(PARK_SEM.value(), 0);
    for _ in 0..2 {
        wait().unwrap();
    }
    assert_eq!(PARK_WOKEN.load(Ordering::SeqCst), 2);

    DONE.store(true, Ordering::SeqCst);
    common::finish_root();
}

#[test]
fn fifo_wakeups_and_shared_counter_scenario() {
    common::boot(2);
    init(root_entry, 0);
    for h in common::start_cores(2) {
        h.join().unwrap();
    }
    assert!(DONE.load(Ordering::SeqCst), "root test body did not finish");
}
