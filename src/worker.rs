//! Background submission worker
//!
//! A single task drains the queue head-first against the remote service.
//! Producers never wait on it: new work arrives via a [`Notify`], the
//! current delivery target via a `watch` channel (`None` while the
//! configuration is invalid), and shutdown via a second `watch` channel that
//! interrupts backoff waits promptly. Delivery order is strictly FIFO; a
//! failed head is retried before any later entry is attempted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::delivery::{Deliver, DeliveryOutcome, DeliveryTarget};
use crate::queue::ScrobbleQueue;

/// Retry pacing after transient delivery failures.
///
/// The delay starts at `floor`, doubles per consecutive failure, is capped
/// at `ceiling`, and resets to `floor` on any success.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub floor: Duration,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            floor: Duration::from_secs(5),
            ceiling: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    fn next(&self, current: Duration) -> Duration {
        (current * 2).min(self.ceiling)
    }
}

pub(crate) struct SubmissionWorker {
    queue: Arc<Mutex<ScrobbleQueue>>,
    transport: Arc<dyn Deliver>,
    target_rx: watch::Receiver<Option<DeliveryTarget>>,
    stop_rx: watch::Receiver<bool>,
    wakeup: Arc<Notify>,
    backoff: BackoffPolicy,
}

impl SubmissionWorker {
    pub(crate) fn new(
        queue: Arc<Mutex<ScrobbleQueue>>,
        transport: Arc<dyn Deliver>,
        target_rx: watch::Receiver<Option<DeliveryTarget>>,
        stop_rx: watch::Receiver<bool>,
        wakeup: Arc<Notify>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            queue,
            transport,
            target_rx,
            stop_rx,
            wakeup,
            backoff,
        }
    }

    /// Worker loop. Runs until the stop signal fires; an in-flight attempt
    /// is abandoned without data loss since in-flight status is never
    /// durable.
    pub(crate) async fn run(mut self) {
        info!("submission worker started");
        let mut delay = self.backoff.floor;

        loop {
            if *self.stop_rx.borrow() {
                break;
            }

            // Without valid credentials and endpoint, stay idle until
            // reconfigured. Entries keep accumulating in the queue.
            let target = self.target_rx.borrow_and_update().clone();
            let Some(target) = target else {
                if self.wait_for_reconfiguration().await {
                    continue;
                }
                break;
            };

            let head = { self.queue.lock().await.peek_head() };
            let Some(entry) = head else {
                if self.wait_for_work().await {
                    continue;
                }
                break;
            };

            let sequence = entry.sequence();
            self.queue.lock().await.mark_in_flight(sequence);
            debug!(sequence, "submitting scrobble");
            let outcome = self.transport.deliver(entry.payload(), &target).await;

            match outcome {
                DeliveryOutcome::Accepted => {
                    let mut queue = self.queue.lock().await;
                    queue.mark_pending_again(sequence);
                    match queue.remove_head(sequence) {
                        Ok(()) => debug!(sequence, "scrobble acknowledged"),
                        // The entry stays queued and will be resubmitted;
                        // the service sees it twice, which at-least-once
                        // delivery permits.
                        Err(e) => warn!(sequence, error = %e, "could not remove acknowledged scrobble"),
                    }
                    delay = self.backoff.floor;
                }
                DeliveryOutcome::Transient(reason) => {
                    self.queue.lock().await.mark_pending_again(sequence);
                    warn!(sequence, %reason, backoff = ?delay, "transient delivery failure");
                    if !self.backoff_wait(delay).await {
                        break;
                    }
                    delay = self.backoff.next(delay);
                }
                DeliveryOutcome::Permanent(reason) => {
                    self.queue.lock().await.mark_pending_again(sequence);
                    warn!(sequence, %reason, "permanent delivery failure, suspending until reconfigured");
                    delay = self.backoff.floor;
                    if !self.wait_for_reconfiguration().await {
                        break;
                    }
                }
            }
        }

        info!("submission worker stopped");
    }

    /// Block until the queue signals new work. Returns `false` on stop.
    async fn wait_for_work(&mut self) -> bool {
        tokio::select! {
            () = self.wakeup.notified() => true,
            _ = self.stop_rx.changed() => false,
        }
    }

    /// Block until a `configure` call lands. Returns `false` on stop.
    async fn wait_for_reconfiguration(&mut self) -> bool {
        tokio::select! {
            changed = self.target_rx.changed() => changed.is_ok(),
            _ = self.stop_rx.changed() => false,
        }
    }

    /// Sleep out a backoff interval. A stop signal interrupts the wait; a
    /// reconfiguration ends it early so the head is retried with fresh
    /// credentials. Returns `false` on stop.
    async fn backoff_wait(&mut self, delay: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            changed = self.target_rx.changed() => changed.is_ok(),
            _ = self.stop_rx.changed() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    /// Transport that replays a script of outcomes and records every
    /// attempted payload.
    struct ScriptedDelivery {
        script: StdMutex<VecDeque<DeliveryOutcome>>,
        attempts: StdMutex<Vec<Vec<u8>>>,
    }

    impl ScriptedDelivery {
        fn new(script: impl IntoIterator<Item = DeliveryOutcome>) -> Arc<Self> {
            Arc::new(Self {
                script: StdMutex::new(script.into_iter().collect()),
                attempts: StdMutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> Vec<Vec<u8>> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Deliver for ScriptedDelivery {
        async fn deliver(&self, payload: &[u8], _target: &DeliveryTarget) -> DeliveryOutcome {
            self.attempts.lock().unwrap().push(payload.to_vec());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(DeliveryOutcome::Accepted)
        }
    }

    struct Harness {
        queue: Arc<Mutex<ScrobbleQueue>>,
        wakeup: Arc<Notify>,
        target_tx: watch::Sender<Option<DeliveryTarget>>,
        stop_tx: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<()>,
        _dir: tempfile::TempDir,
    }

    fn target() -> DeliveryTarget {
        DeliveryTarget {
            endpoint_url: "http://localhost/v1".to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
        }
    }

    fn spawn_worker(transport: Arc<dyn Deliver>, initial_target: Option<DeliveryTarget>) -> Harness {
        let dir = tempdir().unwrap();
        let queue = Arc::new(Mutex::new(
            ScrobbleQueue::open(dir.path().join("queue.jsonl")).unwrap(),
        ));
        let wakeup = Arc::new(Notify::new());
        let (target_tx, target_rx) = watch::channel(initial_target);
        let (stop_tx, stop_rx) = watch::channel(false);

        let worker = SubmissionWorker::new(
            queue.clone(),
            transport,
            target_rx,
            stop_rx,
            wakeup.clone(),
            BackoffPolicy {
                floor: Duration::from_millis(10),
                ceiling: Duration::from_millis(40),
            },
        );
        let handle = tokio::spawn(worker.run());

        Harness {
            queue,
            wakeup,
            target_tx,
            stop_tx,
            handle,
            _dir: dir,
        }
    }

    impl Harness {
        async fn append(&self, payload: &[u8]) {
            self.queue
                .lock()
                .await
                .append(payload, true)
                .unwrap();
            self.wakeup.notify_one();
        }

        async fn queue_len(&self) -> usize {
            self.queue.lock().await.len()
        }

        async fn wait_until_drained(&self) {
            for _ in 0..200 {
                if self.queue_len().await == 0 {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("queue was not drained in time");
        }

        async fn shutdown(self) {
            self.stop_tx.send(true).unwrap();
            tokio::time::timeout(Duration::from_secs(1), self.handle)
                .await
                .expect("worker did not stop in time")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_drains_queue_in_fifo_order() {
        let transport = ScriptedDelivery::new([]);
        let harness = spawn_worker(transport.clone(), Some(target()));

        harness.append(br#"{"n":0}"#).await;
        harness.append(br#"{"n":1}"#).await;
        harness.append(br#"{"n":2}"#).await;

        harness.wait_until_drained().await;
        assert_eq!(
            transport.attempts(),
            [br#"{"n":0}"#.to_vec(), br#"{"n":1}"#.to_vec(), br#"{"n":2}"#.to_vec()]
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_transient_failure_retries_same_head() {
        let transport = ScriptedDelivery::new([
            DeliveryOutcome::Transient("503".to_string()),
            DeliveryOutcome::Transient("timeout".to_string()),
        ]);
        let harness = spawn_worker(transport.clone(), Some(target()));

        harness.append(br#"{"n":0}"#).await;
        harness.append(br#"{"n":1}"#).await;

        harness.wait_until_drained().await;
        // The head is retried until accepted before the next entry is tried
        assert_eq!(
            transport.attempts(),
            [
                br#"{"n":0}"#.to_vec(),
                br#"{"n":0}"#.to_vec(),
                br#"{"n":0}"#.to_vec(),
                br#"{"n":1}"#.to_vec(),
            ]
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_permanent_failure_suspends_until_reconfigured() {
        let transport = ScriptedDelivery::new([DeliveryOutcome::Permanent("401".to_string())]);
        let harness = spawn_worker(transport.clone(), Some(target()));

        harness.append(br#"{"n":0}"#).await;
        harness.append(br#"{"n":1}"#).await;

        // One attempt, then suspension; nothing is dropped
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(transport.attempts().len(), 1);
        assert_eq!(harness.queue_len().await, 2);

        // Reconfiguration resumes submission
        harness.target_tx.send(Some(target())).unwrap();
        harness.wait_until_drained().await;
        assert_eq!(transport.attempts().len(), 3);
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_idles_without_valid_configuration() {
        let transport = ScriptedDelivery::new([]);
        let harness = spawn_worker(transport.clone(), None);

        harness.append(br#"{"n":0}"#).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport.attempts().is_empty());
        assert_eq!(harness.queue_len().await, 1);

        harness.target_tx.send(Some(target())).unwrap();
        harness.wait_until_drained().await;
        assert_eq!(transport.attempts().len(), 1);
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff_promptly() {
        let transport = ScriptedDelivery::new(
            std::iter::repeat(DeliveryOutcome::Transient("down".to_string())).take(100),
        );
        let dir = tempdir().unwrap();
        let queue = Arc::new(Mutex::new(
            ScrobbleQueue::open(dir.path().join("queue.jsonl")).unwrap(),
        ));
        queue
            .lock()
            .await
            .append(br#"{"n":0}"#, true)
            .unwrap();

        let wakeup = Arc::new(Notify::new());
        let (_target_tx, target_rx) = watch::channel(Some(target()));
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = SubmissionWorker::new(
            queue.clone(),
            transport,
            target_rx,
            stop_rx,
            wakeup,
            // A backoff far longer than the test timeout
            BackoffPolicy {
                floor: Duration::from_secs(60),
                ceiling: Duration::from_secs(60),
            },
        );
        let handle = tokio::spawn(worker.run());

        // Let the first attempt fail and the worker enter its backoff wait
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("stop did not interrupt backoff")
            .unwrap();

        // The entry survives the abandoned attempt
        assert_eq!(queue.lock().await.len(), 1);
    }

    #[test]
    fn test_backoff_policy_doubles_to_ceiling() {
        let policy = BackoffPolicy {
            floor: Duration::from_secs(5),
            ceiling: Duration::from_secs(32),
        };
        let mut delay = policy.floor;
        delay = policy.next(delay);
        assert_eq!(delay, Duration::from_secs(10));
        delay = policy.next(delay);
        assert_eq!(delay, Duration::from_secs(20));
        delay = policy.next(delay);
        assert_eq!(delay, Duration::from_secs(32));
        delay = policy.next(delay);
        assert_eq!(delay, Duration::from_secs(32));
    }
}
