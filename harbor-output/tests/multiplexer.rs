//! Column alignment and line-integrity tests for the output multiplexer.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use harbor_output::Output;

#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Buffer {
    fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().expect("buffer lock").clone();
        String::from_utf8(bytes)
            .expect("utf8")
            .lines()
            .map(str::to_string)
            .collect()
    }
}

#[tokio::test]
async fn later_wider_prefix_realigns_earlier_streams() {
    let buffer = Buffer::default();
    let output = Output::with_writer(buffer.clone());

    let web = output.stream("web");
    let _worker = output.stream("worker-long-name");
    web.send("listening on :3000").await;
    output.shutdown().await;

    assert_eq!(
        buffer.lines(),
        vec![format!("{:<16} | listening on :3000", "web")]
    );
    assert_eq!(buffer.lines()[0], "web              | listening on :3000");
}

#[tokio::test]
async fn single_prefix_is_not_padded() {
    let buffer = Buffer::default();
    let output = Output::with_writer(buffer.clone());
    output.stream("db").send("ready").await;
    output.shutdown().await;

    assert_eq!(buffer.lines(), vec!["db | ready"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_streams_never_interleave_within_a_line() {
    let buffer = Buffer::default();
    let output = Output::with_writer(buffer.clone());

    let streams: Vec<_> = ["api", "web", "worker", "scheduler"]
        .into_iter()
        .map(|name| (name, output.stream(name)))
        .collect();

    let mut writers = Vec::new();
    for (name, stream) in streams {
        writers.push(tokio::spawn(async move {
            for i in 0..200 {
                stream.send(format!("{name} line {i:03} {}", "x".repeat(64))).await;
            }
        }));
    }
    for writer in writers {
        writer.await.expect("writer task");
    }
    output.shutdown().await;

    let lines = buffer.lines();
    assert_eq!(lines.len(), 800);
    for name in ["api", "web", "worker", "scheduler"] {
        let own: Vec<&String> = lines
            .iter()
            .filter(|l| l.starts_with(&format!("{name:<9} | ")))
            .collect();
        assert_eq!(own.len(), 200, "every {name} line printed whole");
        for (i, line) in own.iter().enumerate() {
            assert!(
                line.ends_with(&format!("{name} line {i:03} {}", "x".repeat(64))),
                "{name} lines keep arrival order, got: {line}"
            );
        }
    }
}
