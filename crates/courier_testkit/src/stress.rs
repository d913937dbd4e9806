//! Stress tests for the sync engine.
//!
//! These tests verify behavior under heavy load and concurrent access.

use crate::fixtures::{payloads, TestSession};
use courier_engine::{FlushableCollection, SyncPhase, UpdateEventConsumer, UpdateEventsBuffer};
use courier_protocol::{EventSource, UpdateEvent, UpdateEventType};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
        }
    }
}

#[derive(Default)]
struct CountingConsumer(AtomicUsize);

impl UpdateEventConsumer for CountingConsumer {
    fn consume(&self, events: &[UpdateEvent]) {
        self.0.fetch_add(events.len(), Ordering::Relaxed);
    }
}

/// Adds events to one buffer from several threads while another thread
/// keeps flushing it. An event counts as failed if it is never delivered.
pub fn stress_buffer_concurrent_adds(config: &StressConfig) -> StressTestResult {
    let consumer = Arc::new(CountingConsumer::default());
    let buffer = Arc::new(UpdateEventsBuffer::new(consumer.clone()));
    let per_thread = config.operations / config.threads;
    let done = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();

    let producers: Vec<_> = (0..config.threads)
        .map(|_| {
            let buffer = Arc::clone(&buffer);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    buffer.add(UpdateEvent::new(
                        Uuid::new_v4(),
                        UpdateEventType::UserUpdate,
                        json!({ "type": "user.update" }),
                        EventSource::WebSocket,
                    ));
                }
                done.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();

    let flusher = {
        let buffer = Arc::clone(&buffer);
        let done = Arc::clone(&done);
        let threads = config.threads;
        thread::spawn(move || {
            while done.load(Ordering::SeqCst) < threads {
                buffer.process_all_events_in_buffer();
                thread::yield_now();
            }
        })
    };

    for handle in producers {
        handle.join().expect("Thread panicked");
    }
    flusher.join().expect("Thread panicked");
    buffer.process_all_events_in_buffer();

    let delivered = consumer.0.load(Ordering::Relaxed);
    let expected = per_thread * config.threads;
    StressTestResult::new(delivered, expected.saturating_sub(delivered), start.elapsed())
}

/// Pushes message notifications into a synced session one by one. A push
/// counts as failed if it errors or its message does not reach the graph.
pub fn stress_live_messages(fixture: &TestSession, config: &StressConfig) -> StressTestResult {
    let conversation = Uuid::new_v4();
    let sender = Uuid::new_v4();

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let note = payloads::notification(vec![payloads::message_add(
            conversation,
            sender,
            &format!("message {i}"),
        )]);
        let before = fixture.graph().counts().messages;
        match fixture.did_receive_push_channel_data(&note) {
            Ok(()) if fixture.graph().counts().messages == before + 1 => successful += 1,
            _ => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Closes and reopens the push channel repeatedly. Each cycle must run a
/// quick sync back to done.
pub fn stress_push_channel_restarts(
    fixture: &TestSession,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for _ in 0..config.operations {
        fixture.push_channel_did_close();
        fixture.push_channel_did_open();
        match fixture.perform_requests() {
            Ok(_) if fixture.sync_status().current_phase() == SyncPhase::Done => successful += 1,
            _ => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}
