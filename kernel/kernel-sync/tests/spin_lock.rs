use kernel_sync::{LockHandoff, RawSpin, SpinLock, SyncOnceCell};
use std::{panic, thread};

#[test]
fn basic_lock_and_raii() {
    let l = SpinLock::new(0_u32);

    {
        let mut g = l.lock();
        *g = 41;
    }

    // lock again; previous drop must have unlocked
    {
        let mut g = l.lock();
        *g += 1;
        assert_eq!(*g, 42);
    }
}

#[test]
fn try_lock_semantics() {
    let l = SpinLock::new(1u8);

    let g1 = l.try_lock();
    assert!(g1.is_some());
    assert_eq!(**g1.as_ref().unwrap(), 1);

    // while held, try_lock must fail
    let g2 = l.try_lock();
    assert!(g2.is_none());

    drop(g1);
    let g3 = l.try_lock();
    assert!(g3.is_some());
}

#[test]
fn with_closure_unlocks() {
    let l = SpinLock::new(String::from("a"));
    let len = l.with(|s| {
        s.push('b');
        s.len()
    });
    assert_eq!(len, 2);

    let got = l.with(|s| s.clone());
    assert_eq!(got, "ab");
}

#[test]
fn contended_increments_are_exact_and_exclusive() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    let threads = 8;
    let iters = 5_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let lock = Arc::clone(&lock);
        let in_cs = Arc::clone(&in_cs);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            for _ in 0..iters {
                lock.with(|v| {
                    let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(prev, 0, "mutual exclusion violated");
                    *v += 1;
                    in_cs.fetch_sub(1, Ordering::SeqCst);
                });

                // yield only AFTER releasing the lock to reduce convoy effects
                thread::yield_now();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    let total = lock.with(|v| *v);
    assert_eq!(total, threads * iters);
    assert_eq!(in_cs.load(Ordering::SeqCst), 0);
}

#[test]
fn lock_is_released_on_panic() {
    let l = SpinLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");

    // We should be able to lock again right away.
    let val = l.with(|v| *v);
    assert_eq!(val, 123);
}

#[test]
fn handoff_moves_unlock_duty_across_threads() {
    static LOCK: RawSpin = RawSpin::new();

    LOCK.lock();
    let token = unsafe { LockHandoff::new(&LOCK) };
    assert!(!LOCK.try_lock(), "token creation must not unlock");

    // Another thread consumes the token; afterwards the lock is free.
    thread::spawn(move || token.release()).join().unwrap();
    assert!(LOCK.try_lock());
    unsafe { LOCK.unlock() };
}

#[test]
fn once_cell_set_wins_only_once() {
    let c: SyncOnceCell<u32> = SyncOnceCell::new();
    assert!(c.get().is_none());
    assert_eq!(c.set(7), Ok(()));
    assert_eq!(c.set(8), Err(8));
    assert_eq!(c.get(), Some(&7));
    assert_eq!(*c.get_or_init(|| 9), 7);
}

#[test]
fn once_cell_races_publish_exactly_one_value() {
    use std::sync::Arc;
    let c = Arc::new(SyncOnceCell::<usize>::new());
    let mut handles = Vec::new();
    for i in 0..8 {
        let c = Arc::clone(&c);
        handles.push(thread::spawn(move || *c.get_or_init(|| i)));
    }
    let seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let first = seen[0];
    assert!(seen.iter().all(|&v| v == first));
}
