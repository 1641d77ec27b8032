//! Demand-gated byte adapters observed through a recording probe: chunked
//! reads, write-through reporting, and resource teardown.

use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;

use backflow_core::io::{read_bytes, read_path, write_through, FixedBufferWriter};
use backflow_core::protocol::source::vec_producer;
use backflow_core::{Completion, Consumer, Demand, FlowError, SharedProducer};
use backflow_testkit::ProbeConsumer;

fn chunks(parts: &[&'static [u8]]) -> SharedProducer<Bytes> {
    vec_producer(parts.iter().map(|p| Bytes::from_static(p)).collect())
}

// --- chunk reads ---

#[test]
fn test_chunked_read_with_incremental_demand() {
    let producer = read_bytes(&b"abcdef"[..], 2);
    // One unit up front, one replenished per chunk.
    let probe = ProbeConsumer::new(Demand::of(1), Demand::of(1));
    let erased: Arc<dyn Consumer<Input = Bytes>> = probe.clone();
    producer.subscribe(erased);

    assert_eq!(
        probe.values(),
        vec![
            Bytes::from_static(b"ab"),
            Bytes::from_static(b"cd"),
            Bytes::from_static(b"ef"),
        ]
    );
    assert!(probe.is_finished());
}

#[test]
fn test_no_read_without_demand() {
    let producer = read_bytes(&b"abcdef"[..], 2);
    let probe = ProbeConsumer::passive();
    let erased: Arc<dyn Consumer<Input = Bytes>> = probe.clone();
    producer.subscribe(erased);

    assert!(probe.values().is_empty());
    probe.request(Demand::of(1));
    assert_eq!(probe.values(), vec![Bytes::from_static(b"ab")]);
    assert!(probe.completions().is_empty());
}

#[test]
fn test_cancel_after_first_chunk_silences_the_flow() {
    let producer = read_bytes(&b"abcdef"[..], 2);
    let probe = ProbeConsumer::new(Demand::of(1), Demand::NONE);
    let erased: Arc<dyn Consumer<Input = Bytes>> = probe.clone();
    producer.subscribe(erased);

    assert_eq!(probe.values(), vec![Bytes::from_static(b"ab")]);
    probe.cancel();
    probe.request(Demand::UNBOUNDED);

    assert_eq!(probe.values().len(), 1);
    assert!(probe.completions().is_empty());
}

#[test]
fn test_open_failure_delivered_on_first_request() {
    let producer = read_path("/definitely/not/here.bin", 16);
    let probe = ProbeConsumer::<Bytes>::passive();
    let erased: Arc<dyn Consumer<Input = Bytes>> = probe.clone();
    producer.subscribe(erased);

    // Handshake succeeded even though the resource is broken.
    assert!(probe.is_subscribed());
    assert!(probe.completions().is_empty());

    probe.request(Demand::of(1));
    assert!(matches!(
        probe.completion(),
        Some(Completion::Failed(FlowError::OpenFailed(_)))
    ));
    assert!(probe.values().is_empty());
}

#[test]
fn test_reads_file_contents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("input.bin");
    std::fs::File::create(&path)
        .and_then(|mut f| f.write_all(b"streamed"))
        .expect("write fixture");

    let producer = read_path(&path, 3);
    let probe = ProbeConsumer::unlimited();
    let erased: Arc<dyn Consumer<Input = Bytes>> = probe.clone();
    producer.subscribe(erased);

    let joined: Vec<u8> = probe.values().iter().flat_map(|b| b.to_vec()).collect();
    assert_eq!(joined, b"streamed");
    assert!(probe.is_finished());
}

#[test]
fn test_second_subscription_fails() {
    let producer = read_bytes(&b"ab"[..], 2);
    let first = ProbeConsumer::unlimited();
    let erased: Arc<dyn Consumer<Input = Bytes>> = first.clone();
    producer.subscribe(erased);
    assert!(first.is_finished());

    let second = ProbeConsumer::<Bytes>::unlimited();
    let erased: Arc<dyn Consumer<Input = Bytes>> = second.clone();
    producer.subscribe(erased);
    assert!(matches!(
        second.completion(),
        Some(Completion::Failed(FlowError::OpenFailed(_)))
    ));
}

// --- write-through ---

#[test]
fn test_reports_bytes_written_per_chunk() {
    let writer = FixedBufferWriter::new(64);
    let storage = writer.storage();
    let producer = write_through(chunks(&[b"abc", b"de"]), writer);

    let probe = ProbeConsumer::unlimited();
    let erased: Arc<dyn Consumer<Input = usize>> = probe.clone();
    producer.subscribe(erased);

    assert_eq!(probe.values(), vec![3, 2]);
    assert!(probe.is_finished());
    assert_eq!(storage.lock().as_slice(), b"abcde");
}

#[test]
fn test_over_capacity_writes_prefix_then_fails() {
    let writer = FixedBufferWriter::new(10);
    let storage = writer.storage();
    let producer = write_through(chunks(&[b"123456", b"789012"]), writer);

    let probe = ProbeConsumer::unlimited();
    let erased: Arc<dyn Consumer<Input = usize>> = probe.clone();
    producer.subscribe(erased);

    // Exactly ten bytes landed, then the capacity failure surfaced.
    assert_eq!(storage.lock().as_slice(), b"1234567890");
    assert_eq!(probe.values(), vec![6]);
    assert!(matches!(
        probe.completion(),
        Some(Completion::Failed(FlowError::NoCapacity))
    ));
}

#[test]
fn test_downstream_demand_gates_upstream_chunks() {
    let writer = FixedBufferWriter::new(64);
    let storage = writer.storage();
    let producer = write_through(chunks(&[b"ab", b"cd", b"ef"]), writer);

    let probe = ProbeConsumer::new(Demand::of(1), Demand::NONE);
    let erased: Arc<dyn Consumer<Input = usize>> = probe.clone();
    producer.subscribe(erased);

    assert_eq!(probe.values(), vec![2]);
    assert_eq!(storage.lock().as_slice(), b"ab");

    probe.request(Demand::of(2));
    assert_eq!(probe.values(), vec![2, 2, 2]);
    assert_eq!(storage.lock().as_slice(), b"abcdef");
}

#[test]
fn test_cancel_closes_resource_and_goes_silent() {
    let writer = FixedBufferWriter::new(64);
    let storage = writer.storage();
    let producer = write_through(chunks(&[b"ab", b"cd"]), writer);

    let probe = ProbeConsumer::new(Demand::of(1), Demand::NONE);
    let erased: Arc<dyn Consumer<Input = usize>> = probe.clone();
    producer.subscribe(erased);
    assert_eq!(probe.values(), vec![2]);

    probe.cancel();
    probe.request(Demand::UNBOUNDED);
    assert_eq!(probe.values(), vec![2]);
    assert!(probe.completions().is_empty());
    assert_eq!(storage.lock().as_slice(), b"ab");
}
