//! Small runnable scenes, one per idiom. The output goes to stdout, the coordinator's own story goes to the log.

use std::{
    env,
    error::Error,
    fs::{self, File},
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::PathBuf,
    sync::Arc,
    thread::{self, scope, sleep},
    time::Duration,
};

use fanout_coordinator::{
    channel::{self, bounded, Capability, Endpoint, Receiver, Select, Sender},
    sync::WaitGroup,
    task::Cancelled,
    CancelToken, Coordinator, CoordinatorConfig, SharedCounter, Task,
};

type DemoResult = Result<(), Box<dyn Error>>;

/// Unbuffered channels: the sender waits for the receiver, so a channel doubles as a "done" signal
pub fn rendezvous() -> DemoResult {
    fn add(sum: &Sender<i32>, n1: i32, n2: i32) {
        // nobody's gone anywhere, the main thread is about to receive
        let _ = sum.send(n1 + n2);
    }

    let sum = channel::rendezvous::<i32>();
    scope(|s| {
        s.spawn(|| add(sum.as_sender(), 4, 5));
        println!("4 + 5 = {:?}", sum.recv());
    });

    let done = channel::rendezvous::<bool>();
    let tx = done.as_sender().clone();
    thread::spawn(move || {
        println!("email sent");
        let _ = tx.send(true);
    });
    done.recv();
    println!("the sender is done");
    Ok(())
}

/// Buffered channel + close + drain
pub fn buffered() -> DemoResult {
    let (emails, inbox) = bounded::<String>(10).split();
    let (done_tx, done_rx) = channel::rendezvous::<()>().split();

    let sender = thread::spawn(move || {
        // drains until closed
        for email in &inbox {
            println!("sending email to {email}");
            sleep(Duration::from_millis(50));
        }
        let _ = done_tx.send(());
    });

    for i in 0..10 {
        emails.send(format!("{}@mail.com", i + 1))?;
    }
    println!("done queueing");
    // the important part: without it the drain never ends
    emails.close();
    done_rx.recv();
    sender.join().map_err(|_| "email sender panicked")?;
    Ok(())
}

/// Waiting on two channels of different types at once
pub fn select() -> DemoResult {
    let numbers = channel::rendezvous::<i32>();
    let words = channel::rendezvous::<&str>();
    scope(|s| {
        s.spawn(|| numbers.send(10));
        s.spawn(|| words.send("thee"));

        for _ in 0..2 {
            let ready = Select::new()
                .recv(numbers.as_receiver())
                .recv(words.as_receiver())
                .ready();
            match ready {
                Some(0) => println!("{:?}", numbers.try_recv()),
                Some(1) => println!("{:?}", words.try_recv()),
                _ => println!("nothing left to wait for"),
            }
        }
    });
    Ok(())
}

/// Narrowed channel ends: the wrong direction isn't even a method.
/// The runtime-checked endpoint says no before touching the channel.
pub fn directions() -> DemoResult {
    fn receive_only(rx: Receiver<String>) {
        // rx.send(...) wouldn't compile
        for message in rx.iter() {
            println!("received {message}");
        }
    }

    fn send_only(tx: Sender<String>) -> DemoResult {
        // tx.recv() wouldn't compile
        tx.send("eeee".to_string())?;
        Ok(())
    }

    let (tx, rx) = bounded(1).split();
    let receiver = thread::spawn(move || receive_only(rx));
    send_only(tx)?;
    receiver.join().map_err(|_| "receiver panicked")?;

    let endpoint = Endpoint::from(bounded::<String>(1)).narrow(Capability::RecvOnly)?;
    match endpoint.send("eeee".to_string()) {
        Ok(()) => println!("sent through a {} endpoint?!", endpoint.capability()),
        Err(e) => println!("refused: {e}"),
    }
    Ok(())
}

/// Waiting for a bunch of threads by counting them
pub fn wait_group() -> DemoResult {
    let wg = Arc::new(WaitGroup::new());
    for i in 0..=10 {
        let done = wg.guard();
        thread::spawn(move || {
            let _done = done;
            println!("{i}");
        });
    }
    wg.wait();
    println!("all done");
    Ok(())
}

/// 101 threads bumping one counter
pub fn counter() -> DemoResult {
    let counter = Arc::new(SharedCounter::default());
    let wg = Arc::new(WaitGroup::new());
    for _ in 0..=100 {
        let (counter, done) = (counter.clone(), wg.guard());
        thread::spawn(move || {
            let _done = done;
            counter.increment();
        });
    }
    wg.wait();
    println!("sum is {}", counter.get());
    Ok(())
}

/// A batch with a failure in it, the rest doesn't care
pub fn fan_out() -> DemoResult {
    let tasks = (1..=5).map(|i| {
        Task::new(move |_: &CancelToken| {
            sleep(Duration::from_millis(100 - i * 15));
            if i == 3 {
                Err(format!("task {i} refused to work"))
            } else {
                Ok(i * i)
            }
        })
        .named(format!("square-{i}"))
    });
    let mut session = Coordinator::default().submit(tasks)?;
    for envelope in session.await_all()? {
        println!(
            "{} {:?} after {:?}: {:?}",
            envelope.id,
            envelope.name.as_deref().unwrap_or_default(),
            envelope.elapsed,
            envelope.outcome
        );
    }
    println!("session is {}", session.state());
    Ok(())
}

/// Two quick tasks, eight that only stop when told to
pub fn cancel() -> DemoResult {
    let tasks = (0..10).map(|i| {
        Task::new(move |cancel: &CancelToken| -> Result<i32, Cancelled> {
            if i >= 2 {
                while !cancel.is_cancelled() {
                    sleep(Duration::from_millis(5));
                }
                cancel.check()?;
            }
            Ok(i)
        })
    });
    let mut session = Coordinator::new(CoordinatorConfig::default().with_thread_name_prefix("cancel"))
        .submit(tasks)?;
    while session.outstanding() > 8 {
        sleep(Duration::from_millis(1));
    }
    let received = session.cancel();
    println!(
        "got {} results before cancelling: {:?}",
        received.len(),
        received.iter().map(|e| e.id).collect::<Vec<_>>()
    );
    println!("never reported: {:?}", session.missing());
    if let Err(e) = session.await_all() {
        println!("{e}");
    }
    session.join();
    Ok(())
}

/// Tasks that do file IO, the coordinator neither knows nor cares
pub fn files() -> DemoResult {
    let dir = env::temp_dir().join(format!("fanout-files-{}", std::process::id()));
    fs::create_dir_all(&dir)?;

    let tasks = (0..3).map(|i| {
        let dir = dir.clone();
        Task::new(move |_: &CancelToken| copy_through(dir, i)).named(format!("copy-{i}"))
    });
    let mut session = Coordinator::default().submit(tasks)?;
    for envelope in session.await_all()? {
        match envelope.outcome {
            Ok(bytes) => println!("{} copied {bytes} bytes", envelope.id),
            Err(e) => println!("{} {e}", envelope.id),
        }
    }
    fs::remove_dir_all(&dir)?;
    Ok(())
}

/// Writes a file, copies it byte by byte through buffered IO, reads the copy back and removes both
fn copy_through(dir: PathBuf, i: usize) -> io::Result<usize> {
    let source = dir.join(format!("source-{i}.json"));
    let dest = dir.join(format!("dest-{i}.json"));
    File::create(&source)?.write_all(format!(r#"[{{"name":"fanout","n":{i}}}]"#).as_bytes())?;

    let reader = BufReader::new(File::open(&source)?);
    let mut writer = BufWriter::new(File::create(&dest)?);
    for byte in reader.bytes() {
        writer.write_all(&[byte?])?;
    }
    writer.flush()?;
    drop(writer);

    let mut copied = String::new();
    BufReader::new(File::open(&dest)?).read_line(&mut copied)?;
    fs::remove_file(&source)?;
    fs::remove_file(&dest)?;
    Ok(copied.len())
}
