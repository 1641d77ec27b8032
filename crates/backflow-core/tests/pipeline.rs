//! End-to-end flows across operator chains.
//!
//! Exercises the demand contract through multi-stage pipelines rather than
//! single operators: subjects feeding throttles, byte streams bridged from
//! reader to writer, and retries driven by virtual time.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use backflow_core::io::{read_bytes, write_through, FixedBufferWriter, WriteSink};
use backflow_core::operator::{
    combine_latest, distinct, enumerate, retry_when, throttle_while,
};
use backflow_core::protocol::source::vec_producer;
use backflow_core::subject::BufferSubject;
use backflow_core::{Completion, Consumer, Demand, Producer, SharedProducer};
use backflow_testkit::{ProbeConsumer, ScriptedProducer, VirtualScheduler};

#[test]
fn test_subject_through_throttle_to_probe() {
    let primary = BufferSubject::new();
    let regulator = BufferSubject::new();
    let producer = throttle_while(
        Arc::new(primary.clone()) as SharedProducer<i32>,
        Arc::new(regulator.clone()) as SharedProducer<bool>,
        true,
    );

    let probe = ProbeConsumer::unlimited();
    let erased: Arc<dyn Consumer<Input = i32>> = probe.clone();
    producer.subscribe(erased);

    primary.send(1);
    regulator.send(true);
    primary.send(2);
    primary.send(3);
    regulator.send(false);
    primary.send(4);

    assert_eq!(probe.values(), vec![1, 3, 4]);

    regulator.finish();
    assert_eq!(probe.completion(), Some(Completion::Finished));
}

#[test]
fn test_reader_to_writer_bridge() {
    let writer = FixedBufferWriter::new(64);
    let storage = writer.storage();
    let producer = write_through(read_bytes(&b"0123456789"[..], 4), writer);

    let probe = ProbeConsumer::unlimited();
    let erased: Arc<dyn Consumer<Input = usize>> = probe.clone();
    producer.subscribe(erased);

    assert_eq!(probe.values(), vec![4, 4, 2]);
    assert!(probe.is_finished());
    assert_eq!(storage.lock().as_slice(), b"0123456789");
}

#[test]
fn test_reader_into_sink_with_capacity_limit() {
    let writer = FixedBufferWriter::new(6);
    let storage = writer.storage();
    let producer = read_bytes(&b"0123456789"[..], 4);

    let sink = WriteSink::attach(producer.as_ref(), writer);
    assert!(matches!(sink.result(), Some(Err(_))));
    assert_eq!(storage.lock().as_slice(), b"012345");
}

#[test]
fn test_retry_feeding_combine_latest() {
    let scheduler = Arc::new(VirtualScheduler::new());
    let flaky = ScriptedProducer::failing_at(vec![1, 2], [0]);
    let retried = retry_when(
        flaky.clone() as SharedProducer<i32>,
        |_| true,
        |_| Duration::from_secs(1),
        scheduler.clone(),
    );
    let steady = BufferSubject::new();
    let producer = combine_latest(
        retried,
        Arc::new(steady.clone()) as SharedProducer<&'static str>,
        |n, s| (n.copied(), s.copied()),
    );

    let probe = ProbeConsumer::unlimited();
    let erased: Arc<dyn Consumer<Input = (Option<i32>, Option<&'static str>)>> = probe.clone();
    producer.subscribe(erased);

    steady.send("s");
    assert_eq!(probe.values(), vec![(None, None), (None, Some("s"))]);

    // The flaky side recovers behind the combinator's back.
    scheduler.advance(Duration::from_secs(1));
    assert_eq!(
        probe.values(),
        vec![
            (None, None),
            (None, Some("s")),
            (Some(1), Some("s")),
            (Some(2), Some("s")),
        ]
    );
    assert_eq!(flaky.subscription_count(), 2);
}

#[test]
fn test_enumerate_over_distinct_batches() {
    let upstream = vec_producer(vec![vec![1, 2], vec![2, 1], vec![3]]);
    let producer = enumerate(distinct(upstream));

    let probe = ProbeConsumer::unlimited();
    let erased: Arc<dyn Consumer<Input = (usize, Vec<i32>)>> = probe.clone();
    producer.subscribe(erased);

    // The fully-duplicate middle batch vanished before numbering.
    assert_eq!(probe.values(), vec![(0, vec![1, 2]), (1, vec![3])]);
    assert!(probe.is_finished());
}

#[test]
fn test_demand_is_conserved_across_a_chain() {
    let primary = BufferSubject::new();
    let regulator = BufferSubject::new();
    let producer = throttle_while(
        Arc::new(primary.clone()) as SharedProducer<i32>,
        Arc::new(regulator.clone()) as SharedProducer<bool>,
        true,
    );

    let probe = ProbeConsumer::new(Demand::of(2), Demand::NONE);
    let erased: Arc<dyn Consumer<Input = i32>> = probe.clone();
    producer.subscribe(erased);

    for n in 0..10 {
        primary.send(n);
    }
    // Two units granted, two values delivered, the rest collapsed.
    assert_eq!(probe.values(), vec![0, 1]);

    probe.request(Demand::of(1));
    assert_eq!(probe.values(), vec![0, 1, 9]);
}

#[test]
fn test_chunk_stream_writes_to_bytes() {
    let chunks: Vec<Bytes> = vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")];
    let writer = FixedBufferWriter::new(16);
    let storage = writer.storage();
    let sink = WriteSink::attach(vec_producer(chunks).as_ref(), writer);

    assert_eq!(sink.result(), Some(Ok(4)));
    assert_eq!(storage.lock().as_slice(), b"abcd");
}
