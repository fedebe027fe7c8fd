use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use logshunt::{factory, Emitter, EmitterConfig, FnTransport, Transport, TransportRegistry};
use parking_lot::Mutex;
use shunt_shm::HandoffChannel;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

type Streams = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// Registry entry whose instances append to a stream named by the `label` option.
fn labelled_registry(streams: &Streams) -> TransportRegistry {
    let streams = Arc::clone(streams);
    let mut registry = TransportRegistry::new();
    registry.register(
        "labelled",
        factory(move |options| {
            let label = options
                .get("label")
                .and_then(toml::Value::as_str)
                .context("labelled transport requires `label`")?
                .to_string();
            let streams = Arc::clone(&streams);
            Ok(Box::new(FnTransport::new(move |chunk: &[u8], _sync| {
                streams
                    .lock()
                    .entry(label.clone())
                    .or_default()
                    .extend_from_slice(chunk);
                Ok(())
            })) as Box<dyn Transport>)
        }),
    );
    registry
}

#[test]
fn independent_emitters_on_many_threads() {
    init_logger();
    const EMITTERS: usize = 4;
    const LINES: usize = 2_000;
    let streams: Streams = Arc::default();
    let registry = Arc::new(labelled_registry(&streams));

    let producers: Vec<_> = (0..EMITTERS)
        .map(|id| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let config = EmitterConfig::new("labelled")
                    .with_capacity(128 + id * 64)
                    .with_option("label", format!("emitter-{id}"));
                let mut emitter = Emitter::new(config, &registry).expect("emitter");
                let mut expected = Vec::new();
                for n in 0..LINES {
                    let line = format!("[{id}] event {n}\n");
                    expected.extend_from_slice(line.as_bytes());
                    emitter.write(line.as_bytes()).expect("write");
                }
                emitter.end().expect("end");
                expected
            })
        })
        .collect();

    let expected: Vec<Vec<u8>> = producers
        .into_iter()
        .map(|handle| handle.join().expect("producer thread"))
        .collect();

    let streams = streams.lock();
    for (id, bytes) in expected.iter().enumerate() {
        assert_eq!(
            streams.get(&format!("emitter-{id}")),
            Some(bytes),
            "stream {id} diverged"
        );
    }
}

#[test]
fn missing_factory_option_is_a_configuration_error() {
    init_logger();
    let streams: Streams = Arc::default();
    let registry = labelled_registry(&streams);
    let err = Emitter::new(EmitterConfig::new("labelled"), &registry)
        .err()
        .expect("missing label");
    assert!(err.to_string().contains("label"));
}

#[test]
fn channel_reports_capacity_and_initial_state() {
    let channel = HandoffChannel::new(4096).expect("channel");
    assert_eq!(channel.capacity(), 4096);
    assert_eq!(channel.control().pos(), 0);
    assert!(!channel.control().is_halted());
}
