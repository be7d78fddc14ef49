use std::{
    collections::HashSet,
    sync::Arc,
    thread::sleep,
    time::{Duration, Instant},
};

use fanout_coordinator::{
    await_any,
    channel::{bounded, Capability, Endpoint},
    CancelToken, Coordinator, CoordinatorError, SessionState, SharedCounter, Task, TaskFailure,
    TaskId,
};

fn noop() -> Task<(), String> {
    Task::new(|_| Ok(()))
}

fn after(delay: Duration, label: &'static str) -> Task<&'static str, String> {
    Task::new(move |_| {
        sleep(delay);
        Ok(label)
    })
}

/// runs until cancelled, then says so
fn until_cancelled() -> Task<u32, String> {
    Task::new(|cancel: &CancelToken| {
        while !cancel.is_cancelled() {
            sleep(Duration::from_millis(1));
        }
        Err("cancelled".to_string())
    })
}

#[test]
fn test_every_task_reports_exactly_once() {
    for n in [1, 2, 7, 64] {
        let mut session = Coordinator::default()
            .submit((0..n).map(|_| noop()))
            .unwrap();
        let envelopes = session.await_all().unwrap();
        assert_eq!(n, envelopes.len());
        let ids: HashSet<TaskId> = envelopes.iter().map(|e| e.id).collect();
        assert_eq!(n, ids.len());
        assert_eq!(SessionState::AllCompleted, session.state());
        assert_eq!(n, session.received());
        session.join();
    }
}

#[test]
fn test_counter_loses_nothing_under_the_coordinator() {
    for _ in 0..5 {
        let counter = Arc::new(SharedCounter::new(0));
        let tasks = (0..1000).map(|_| {
            let counter = counter.clone();
            Task::<(), String>::new(move |_| {
                counter.increment();
                Ok(())
            })
        });
        let mut session = Coordinator::default().submit(tasks).unwrap();
        assert_eq!(1000, session.await_all().unwrap().len());
        assert_eq!(1000, counter.get());
    }
}

#[test]
fn test_await_any_takes_the_faster_source() {
    let coordinator = Coordinator::default();
    let mut a = coordinator
        .submit([after(Duration::from_millis(20), "a")])
        .unwrap();
    let mut b = coordinator
        .submit([after(Duration::from_millis(300), "b")])
        .unwrap();

    let (index, first) = await_any(&mut [&mut a, &mut b]).unwrap();
    assert_eq!(0, index);
    assert_eq!(Ok("a"), first.outcome);

    // b's value wasn't lost to the race
    let second = b.await_next().unwrap();
    assert_eq!(Ok("b"), second.outcome);
    assert!(await_any(&mut [&mut a, &mut b]).is_none());
}

#[test]
fn test_await_any_within_one_session() {
    let mut session = Coordinator::default()
        .submit([
            after(Duration::from_millis(300), "slow"),
            after(Duration::from_millis(20), "fast"),
        ])
        .unwrap();
    let (_, first) = await_any(&mut [&mut session]).unwrap();
    assert_eq!(Ok("fast"), first.outcome);
    let later = session.await_all().unwrap();
    assert_eq!(1, later.len());
    assert_eq!(Ok("slow"), later[0].outcome);
}

#[test]
fn test_recv_only_handle_refuses_before_transfer() {
    let chan = bounded::<u32>(4);
    let observer = chan.as_receiver().clone();
    let endpoint = Endpoint::from(chan).narrow(Capability::RecvOnly).unwrap();
    for _ in 0..10 {
        assert!(endpoint.send(1).is_err());
        assert!(observer.is_empty());
    }
}

#[test]
fn test_one_failure_out_of_five() {
    let tasks = (0..5).map(|i| {
        Task::new(move |_| {
            if i == 2 {
                Err(format!("task {i} failed"))
            } else {
                Ok(i)
            }
        })
    });
    let mut session = Coordinator::default().submit(tasks).unwrap();
    let mut envelopes = session.await_all().unwrap();
    assert_eq!(5, envelopes.len());
    envelopes.sort_by_key(|e| e.id);

    let failures: Vec<_> = envelopes.iter().filter(|e| e.is_failure()).collect();
    assert_eq!(1, failures.len());
    assert_eq!(2, failures[0].id.index());
    assert_eq!(
        Err(TaskFailure::Error("task 2 failed".to_string())),
        failures[0].outcome
    );
    assert_eq!(4, envelopes.iter().filter(|e| e.is_success()).count());
    assert_eq!(SessionState::PartiallyFailed, session.state());
}

#[test]
fn test_cancel_after_two_of_ten() {
    let tasks: Vec<_> = (0..10)
        .map(|i| {
            if i < 2 {
                Task::new(move |_| Ok(i))
            } else {
                until_cancelled()
            }
        })
        .collect();
    let mut session = Coordinator::default().submit(tasks).unwrap();
    // the quick two are done once their threads are gone
    let started = Instant::now();
    while session.outstanding() > 8 {
        assert!(started.elapsed() < Duration::from_secs(10));
        sleep(Duration::from_millis(1));
    }

    let mut received = session.cancel();
    received.sort_by_key(|e| e.id);
    assert_eq!(
        vec![Ok(0), Ok(1)],
        received.into_iter().map(|e| e.outcome).collect::<Vec<_>>()
    );
    assert_eq!(SessionState::Cancelled, session.state());
    assert_eq!(8, session.missing().len());
    match session.await_all() {
        Err(CoordinatorError::IncompleteSession {
            expected, received, ..
        }) => assert_eq!((10, 2), (expected, received)),
        other => panic!("unexpected {other:?}"),
    }
    // late results are discarded, not delivered
    session.join();
}

#[test]
fn test_timeout_cancels() {
    let tasks = vec![
        Task::new(|_| Ok(1)),
        until_cancelled(),
        until_cancelled(),
    ];
    let mut session = Coordinator::default().submit(tasks).unwrap();
    let started = Instant::now();
    let result = session.await_all_timeout(Duration::from_millis(100));
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert!(matches!(
        result,
        Err(CoordinatorError::IncompleteSession {
            expected: 3,
            received: 1,
            ..
        })
    ));
    assert_eq!(SessionState::Cancelled, session.state());
    let kept = session.take_received();
    assert_eq!(1, kept.len());
    assert_eq!(Ok(1), kept[0].outcome);
    session.join();
}

#[test]
fn test_timeout_not_reached() {
    let mut session = Coordinator::default()
        .submit([after(Duration::from_millis(10), "quick")])
        .unwrap();
    let envelopes = session.await_all_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(1, envelopes.len());
    assert_eq!(SessionState::AllCompleted, session.state());
}
