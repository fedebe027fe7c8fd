//! Drainer crashes, respawns and stalled transports.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use logshunt::{
    factory, Emitter, EmitterConfig, EmitterEvent, FnTransport, MemorySink, ShuntError, Transport,
    TransportFactory,
};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The first `panicking` transports built panic on their first chunk; later
/// ones forward to `sink`.
fn crashing_factory(sink: &MemorySink, panicking: usize) -> TransportFactory {
    let sink = sink.clone();
    let built = Arc::new(AtomicUsize::new(0));
    factory(move |_| {
        if built.fetch_add(1, Ordering::SeqCst) < panicking {
            let transport = FnTransport::new(|_: &[u8], _| -> anyhow::Result<()> {
                panic!("transport crashed")
            });
            Ok(Box::new(transport) as Box<dyn Transport>)
        } else {
            Ok(Box::new(sink.clone()) as Box<dyn Transport>)
        }
    })
}

fn crash_reported(events: &Receiver<EmitterEvent>) -> bool {
    events
        .try_iter()
        .any(|event| matches!(event, EmitterEvent::Error(ShuntError::WorkerCrash(_))))
}

#[test]
fn crashed_drainer_falls_back_to_in_process_transport() {
    init_logger();
    let sink = MemorySink::new();
    let config = EmitterConfig::new("crashy")
        .with_capacity(32)
        .with_respawn(false);
    let mut emitter = Emitter::with_factory(config, crashing_factory(&sink, 1)).expect("emitter");
    let events = emitter.events();

    emitter.write(b"hello world").expect("write");
    emitter.flush_sync().expect("flush_sync through fallback");

    assert_eq!(sink.contents(), b"hello world");
    assert!(sink.deliveries().iter().all(|d| d.sync_flush));
    assert!(emitter.is_degraded());
    assert!(crash_reported(&events));

    // Degraded writes wait for the next flush_sync.
    assert!(!emitter.write(b"; more").expect("degraded write"));
    emitter.end().expect("end");
    assert_eq!(sink.contents(), b"hello world; more");
}

#[test]
fn crash_fallback_matches_live_output() {
    init_logger();
    let payloads: Vec<Vec<u8>> = (0..30u8).map(|n| vec![b'a' + n % 26; n as usize + 1]).collect();

    let live = MemorySink::new();
    let mut emitter = Emitter::with_factory(
        EmitterConfig::new("live").with_capacity(16),
        live.factory(),
    )
    .expect("live emitter");
    for payload in &payloads {
        emitter.write(payload).expect("write");
    }
    emitter.end().expect("end");

    let fallback = MemorySink::new();
    let mut emitter = Emitter::with_factory(
        EmitterConfig::new("crashy")
            .with_capacity(16)
            .with_respawn(false),
        crashing_factory(&fallback, 1),
    )
    .expect("crashing emitter");
    for payload in &payloads {
        emitter.write(payload).expect("write");
    }
    emitter.end().expect("end");

    assert_eq!(fallback.contents(), live.contents());
}

#[test]
fn crashed_drainer_is_respawned() {
    init_logger();
    let sink = MemorySink::new();
    let config = EmitterConfig::new("crashy").with_capacity(32);
    let mut emitter = Emitter::with_factory(config, crashing_factory(&sink, 1)).expect("emitter");
    let events = emitter.events();

    emitter.write(b"first").expect("write");
    emitter.flush_sync().expect("flush_sync");
    assert_eq!(sink.contents(), b"first");
    assert!(!emitter.is_degraded());
    assert!(crash_reported(&events));

    emitter.write(b" second").expect("write");
    emitter.end().expect("end");
    assert_eq!(sink.contents(), b"first second");
}

#[test]
fn stalled_transport_times_out_with_snapshot() {
    init_logger();
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
    let make = factory(move |_| {
        let release = release_rx.clone();
        let transport = FnTransport::new(move |_: &[u8], _| {
            let _ = release.recv();
            Ok(())
        });
        Ok(Box::new(transport) as Box<dyn Transport>)
    });

    let timeout = Duration::from_millis(200);
    let config = EmitterConfig::new("stalled")
        .with_capacity(8)
        .with_timeout(timeout);
    let mut emitter = Emitter::with_factory(config, make).expect("emitter");
    let events = emitter.events();

    emitter.write(b"stuck").expect("write");
    emitter.write(b"+queued").expect("write");

    let started = Instant::now();
    let err = emitter.flush_sync().expect_err("flush_sync must time out");
    let elapsed = started.elapsed();

    match err {
        ShuntError::FlushTimeout { waited, unflushed } => {
            assert!(waited >= timeout);
            assert_eq!(unflushed, b"stuck+queued");
        }
        other => panic!("expected FlushTimeout, got {other:?}"),
    }
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(1), "took {elapsed:?}");
    assert!(emitter.is_destroyed());
    assert!(events.try_iter().any(|e| matches!(e, EmitterEvent::Close)));
    assert!(matches!(
        emitter.flush_sync(),
        Err(ShuntError::AlreadyDestroyed)
    ));

    // Unblock the detached drainer so the thread can finish.
    drop(release_tx);
}

/// Async chunks are delayed so a later write lands behind them; sync-flush
/// chunks go through `on_sync`.
fn split_factory(
    sink: &MemorySink,
    on_sync: impl Fn(&[u8]) -> anyhow::Result<()> + Clone + Send + Sync + 'static,
) -> TransportFactory {
    let sink = sink.clone();
    factory(move |_| {
        let mut inner = sink.clone();
        let on_sync = on_sync.clone();
        let transport = FnTransport::new(move |chunk: &[u8], sync_flush| {
            if sync_flush {
                on_sync(chunk)?;
            } else {
                std::thread::sleep(Duration::from_millis(50));
            }
            inner.write(chunk, sync_flush)
        });
        Ok(Box::new(transport) as Box<dyn Transport>)
    })
}

#[test]
fn drainer_crash_mid_rendezvous_is_recovered() {
    init_logger();
    let sink = MemorySink::new();
    let make = split_factory(&sink, |_| -> anyhow::Result<()> {
        panic!("sync delivery crashed")
    });
    let config = EmitterConfig::new("sync-crash").with_capacity(64);
    let mut emitter = Emitter::with_factory(config, make).expect("emitter");
    let events = emitter.events();

    emitter.write(b"abc").expect("write");
    emitter.write(b"def").expect("write");
    emitter.flush_sync().expect("flush_sync survives the crash");

    assert_eq!(sink.contents(), b"abcdef");
    assert!(!emitter.is_degraded());
    assert!(crash_reported(&events));
    emitter.end().expect("end");
    assert_eq!(sink.contents(), b"abcdef");
}

#[test]
fn stall_inside_rendezvous_times_out_with_snapshot() {
    init_logger();
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
    let sink = MemorySink::new();
    let make = split_factory(&sink, move |_| {
        let _ = release_rx.recv();
        Ok(())
    });
    let timeout = Duration::from_millis(200);
    let config = EmitterConfig::new("sync-stall")
        .with_capacity(8)
        .with_timeout(timeout);
    let mut emitter = Emitter::with_factory(config, make).expect("emitter");

    emitter.write(b"abc").expect("write");
    emitter.write(b"defghijklmnop").expect("write");

    let started = Instant::now();
    let err = emitter.flush_sync().expect_err("flush_sync must time out");
    let elapsed = started.elapsed();

    match err {
        ShuntError::FlushTimeout { waited, unflushed } => {
            assert!(waited >= timeout);
            assert_eq!(unflushed, b"defghijklmnop");
        }
        other => panic!("expected FlushTimeout, got {other:?}"),
    }
    assert!(elapsed < timeout + Duration::from_secs(1), "took {elapsed:?}");
    assert_eq!(sink.contents(), b"abc");
    assert!(emitter.is_destroyed());

    drop(release_tx);
}
