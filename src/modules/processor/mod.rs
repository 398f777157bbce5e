// Copyright © 2025 mailsync
// Licensed under the mailsync License Agreement v1.0
// Unauthorized copying, modification, or distribution is prohibited.

use crate::modules::account::entity::Account;
use crate::modules::imap::connection::FetchedMessage;
use crate::modules::message::parser::DesiredPart;
use crate::modules::processor::throttle::{throttle_delay, PowerMonitor, PowerSource};
use crate::modules::settings::cli::SETTINGS;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

pub mod handler;
pub mod throttle;

#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Depth at which [`MessageProcessor::queue_is_full`] turns true
    pub max_queue_length: usize,
    /// Messages processed between two throttling pauses
    pub chunk_size: usize,
    pub max_cpu_on_ac: f64,
    pub max_cpu_on_battery: f64,
}

impl ProcessorConfig {
    pub fn from_settings() -> Self {
        Self {
            max_queue_length: SETTINGS.mailsync_processor_max_queue_length,
            chunk_size: SETTINGS.mailsync_processor_chunk_size,
            max_cpu_on_ac: SETTINGS.mailsync_max_cpu_on_ac,
            max_cpu_on_battery: SETTINGS.mailsync_max_cpu_on_battery,
        }
    }

    fn max_cpu(&self, source: PowerSource) -> f64 {
        match source {
            PowerSource::Ac => self.max_cpu_on_ac,
            PowerSource::Battery => self.max_cpu_on_battery,
        }
    }
}

/// One downloaded message waiting to be parsed and stored.
#[derive(Clone, Debug)]
pub struct ProcessJob {
    pub account: Arc<Account>,
    pub category_id: u64,
    pub message: FetchedMessage,
    pub desired_parts: Vec<DesiredPart>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EnqueueOptions {
    /// Meter CPU use after this message. Off for new mail, on for backfill.
    pub throttle: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed { message_id: String },
    /// Recorded on the category's failed UIDs
    Failed { uid: u32 },
}

impl ProcessOutcome {
    pub fn is_processed(&self) -> bool {
        matches!(self, ProcessOutcome::Processed { .. })
    }
}

/// Does the work for one job. Never fails: failures are recorded and
/// reported as [`ProcessOutcome::Failed`].
pub trait JobHandler: Send + Sync + 'static {
    fn handle(&self, job: ProcessJob) -> impl Future<Output = ProcessOutcome> + Send;
}

struct QueuedJob {
    job: ProcessJob,
    throttle: bool,
    done: oneshot::Sender<ProcessOutcome>,
}

/// Process-wide serialized processing queue shared by all accounts.
///
/// Jobs run one at a time on a single consumer task in the order they were
/// enqueued, so writes to the same thread never race.
#[derive(Clone)]
pub struct MessageProcessor {
    sender: mpsc::UnboundedSender<QueuedJob>,
    depth: Arc<AtomicUsize>,
    max_queue_length: usize,
}

impl MessageProcessor {
    /// Spawns the consumer loop. It ends once every handle is dropped.
    pub fn start<H: JobHandler>(handler: H, config: ProcessorConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        let max_queue_length = config.max_queue_length;
        tokio::spawn(Self::consume(handler, config, receiver, depth.clone()));
        Self {
            sender,
            depth,
            max_queue_length,
        }
    }

    pub fn queue_length(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn queue_is_full(&self) -> bool {
        self.queue_length() >= self.max_queue_length
    }

    /// Queues `job` and returns a future that resolves once it has been
    /// processed or recorded as failed.
    pub fn enqueue(
        &self,
        job: ProcessJob,
        options: EnqueueOptions,
    ) -> impl Future<Output = ProcessOutcome> + Send + 'static {
        let uid = job.message.uid;
        let (done, result) = oneshot::channel();
        self.depth.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedJob {
            job,
            throttle: options.throttle,
            done,
        };
        if self.sender.send(queued).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            error!("Message processor is stopped, dropping UID {}", uid);
        }
        async move { result.await.unwrap_or(ProcessOutcome::Failed { uid }) }
    }

    async fn consume<H: JobHandler>(
        handler: H,
        config: ProcessorConfig,
        mut receiver: mpsc::UnboundedReceiver<QueuedJob>,
        depth: Arc<AtomicUsize>,
    ) {
        let chunk_limit = config.chunk_size.max(1);
        let mut chunk_size = 0;
        let mut chunk_start = Instant::now();
        let mut power = PowerMonitor::default();

        while let Some(queued) = receiver.recv().await {
            if chunk_size == 0 {
                chunk_start = Instant::now();
            }
            chunk_size += 1;

            let outcome = handler.handle(queued.job).await;
            depth.fetch_sub(1, Ordering::SeqCst);

            if chunk_size >= chunk_limit {
                if queued.throttle {
                    let elapsed = chunk_start.elapsed();
                    let max_cpu = config.max_cpu(power.current().await);
                    let delay = throttle_delay(elapsed, max_cpu);
                    if !delay.is_zero() {
                        debug!("Throttling message processing for {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
                chunk_size = 0;
            }
            let _ = queued.done.send(outcome);
        }
        debug!("Message processor stopped");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::modules::account::entity::tests::sample_account;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Sleeps for every job and records the UIDs in processing order.
    #[derive(Clone, Default)]
    pub(crate) struct SlowHandler {
        pub delay: Duration,
        pub seen: Arc<Mutex<Vec<u32>>>,
    }

    impl JobHandler for SlowHandler {
        async fn handle(&self, job: ProcessJob) -> ProcessOutcome {
            tokio::time::sleep(self.delay).await;
            self.seen.lock().unwrap().push(job.message.uid);
            ProcessOutcome::Processed {
                message_id: format!("m{}", job.message.uid),
            }
        }
    }

    pub(crate) fn config(max_queue_length: usize) -> ProcessorConfig {
        ProcessorConfig {
            max_queue_length,
            chunk_size: 1,
            max_cpu_on_ac: 1.0,
            max_cpu_on_battery: 1.0,
        }
    }

    fn job(uid: u32) -> ProcessJob {
        ProcessJob {
            account: Arc::new(sample_account("jane@example.com")),
            category_id: 1,
            message: FetchedMessage {
                uid,
                ..Default::default()
            },
            desired_parts: DesiredPart::ALL.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_queue_fills_and_drains_in_order() {
        let handler = SlowHandler {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let seen = handler.seen.clone();
        let processor = MessageProcessor::start(handler, config(3));

        let mut pending = Vec::new();
        for uid in 1..=3 {
            assert!(!processor.queue_is_full());
            pending.push(processor.enqueue(job(uid), EnqueueOptions::default()));
        }
        assert!(processor.queue_is_full());
        pending.push(processor.enqueue(job(4), EnqueueOptions { throttle: true }));

        let outcomes = futures::future::join_all(pending).await;
        assert!(outcomes.iter().all(ProcessOutcome::is_processed));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(processor.queue_length(), 0);
        assert!(!processor.queue_is_full());
    }

    #[tokio::test]
    async fn test_throttle_pauses_after_chunk() {
        let handler = SlowHandler {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let mut config = config(10);
        config.max_cpu_on_ac = 0.5;
        config.max_cpu_on_battery = 0.5;
        let processor = MessageProcessor::start(handler, config);

        let started = Instant::now();
        processor
            .enqueue(job(1), EnqueueOptions { throttle: true })
            .await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}
