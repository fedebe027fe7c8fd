use std::fs;
use std::time::Duration;

use logshunt::{Emitter, EmitterConfig, EmitterEvent, TransportRegistry};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn file_config(path: &std::path::Path, capacity: usize) -> EmitterConfig {
    let src = format!(
        "transport = \"file\"\ncapacity = {capacity}\n\n[options]\npath = {path:?}\nappend = false\n",
        path = path.display().to_string()
    );
    EmitterConfig::from_toml_str(&src).expect("file config")
}

#[test]
fn file_sink_receives_every_line_in_order() {
    init_logger();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("app.log");
    let registry = TransportRegistry::with_builtins();
    let mut emitter = Emitter::new(file_config(&path, 256), &registry).expect("emitter");

    let mut expected = String::new();
    for n in 0..5_000 {
        let line = format!("{{\"level\":\"info\",\"seq\":{n},\"msg\":\"request served\"}}\n");
        expected.push_str(&line);
        emitter.write(line.as_bytes()).expect("write");
    }
    emitter.end().expect("end");

    assert_eq!(fs::read_to_string(&path).expect("read log"), expected);
}

#[test]
fn backpressure_cycle_follows_drain_events() {
    init_logger();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("paced.log");
    let mut emitter = Emitter::new(
        file_config(&path, 64),
        &TransportRegistry::with_builtins(),
    )
    .expect("emitter");
    let events = emitter.events();

    let mut written = Vec::new();
    for n in 0..200 {
        let line = format!("paced line {n:04}\n");
        written.extend_from_slice(line.as_bytes());
        if !emitter.write(line.as_bytes()).expect("write") {
            assert!(emitter
                .wait_for_drain(Duration::from_secs(5))
                .expect("wait_for_drain"));
        }
    }
    emitter.end().expect("end");

    assert_eq!(fs::read(&path).expect("read log"), written);
    let drains = events
        .try_iter()
        .filter(|event| matches!(event, EmitterEvent::Drain))
        .count();
    assert!(drains > 0);
}

#[test]
fn appending_sink_keeps_previous_runs() {
    init_logger();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("appended.log");
    let registry = TransportRegistry::with_builtins();

    for run in 0..3 {
        let config = EmitterConfig::new("file")
            .with_capacity(32)
            .with_option("path", path.display().to_string());
        let mut emitter = Emitter::new(config, &registry).expect("emitter");
        emitter.write(format!("run {run}\n").as_bytes()).expect("write");
        emitter.end().expect("end");
    }

    assert_eq!(
        fs::read_to_string(&path).expect("read log"),
        "run 0\nrun 1\nrun 2\n"
    );
}

#[test]
fn null_and_stream_sinks_accept_output() {
    init_logger();
    let registry = TransportRegistry::with_builtins();
    for locator in ["null", "stderr"] {
        let mut emitter = Emitter::new(
            EmitterConfig::new(locator).with_capacity(64),
            &registry,
        )
        .expect("emitter");
        emitter.write(b"e2e sink smoke\n").expect("write");
        emitter.end().expect("end");
    }
}
