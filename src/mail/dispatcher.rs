//! Background batching of outbound e-mail.
//!
//! Request handlers hand rendered [`Email`]s to a [`Mailer`]; a single
//! dispatcher thread drains the bounded queue in batches and delivers each
//! batch over one session. A batch closes when it reaches
//! [`BatchPolicy::size`] messages or when [`BatchPolicy::window`] has passed
//! since its first message arrived, whichever comes first.
//!
//! Within a batch a rejected message is logged, the transaction is reset and
//! the next message is attempted. A failed reset or a broken connection ends
//! the batch and the rest of it is dropped. Nothing is retried.

use super::{Email, MailError, SendError, Session, Transport};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_secs(5);
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub size: usize,
    pub window: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            size: DEFAULT_BATCH_SIZE,
            window: DEFAULT_BATCH_WINDOW,
        }
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub sent: usize,
    pub failed: usize,
    /// Messages never attempted because the session ended early.
    pub dropped: usize,
}

/// Producer side of the mail queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Mailer {
    sender: SyncSender<Email>,
}

impl Mailer {
    /// Queue an e-mail, blocking while the queue is full.
    pub fn enqueue(&self, email: Email) -> Result<(), MailError> {
        self.sender.send(email).map_err(|_| MailError::Closed)
    }

    /// Queue an e-mail without blocking.
    pub fn try_enqueue(&self, email: Email) -> Result<(), MailError> {
        self.sender.try_send(email).map_err(|e| match e {
            TrySendError::Full(email) => MailError::Full(email),
            TrySendError::Disconnected(_) => MailError::Closed,
        })
    }
}

/// Consumer side of the mail queue.
#[derive(Debug)]
pub struct MailQueue {
    receiver: Receiver<Email>,
}

/// Create a bounded queue holding at most `capacity` pending e-mails.
pub fn queue(capacity: usize) -> (Mailer, MailQueue) {
    let (sender, receiver) = mpsc::sync_channel(capacity);
    (Mailer { sender }, MailQueue { receiver })
}

impl MailQueue {
    /// Wait for the next batch.
    ///
    /// Blocks until a first e-mail arrives, then collects more until the
    /// batch is full or the window closes. Returns `None` once every
    /// [`Mailer`] is gone and the queue is drained.
    pub fn next_batch(&self, policy: &BatchPolicy) -> Option<Vec<Email>> {
        let first = self.receiver.recv().ok()?;
        let deadline = Instant::now() + policy.window;
        let mut batch = Vec::with_capacity(policy.size);
        batch.push(first);

        while batch.len() < policy.size {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(remaining) {
                Ok(email) => batch.push(email),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Some(batch)
    }
}

/// Deliver one batch over a single session.
pub fn deliver_batch<T: Transport>(transport: &T, batch: &[Email]) -> BatchReport {
    let mut report = BatchReport::default();

    let mut session = match transport.connect() {
        Ok(session) => session,
        Err(error) => {
            tracing::error!(%error, dropped = batch.len(), "could not connect to mail server");
            report.dropped = batch.len();
            return report;
        }
    };

    for (index, email) in batch.iter().enumerate() {
        let remaining = batch.len() - index - 1;
        match session.send(email) {
            Ok(()) => {
                report.sent += 1;
                tracing::debug!(to = %email.to, "token e-mail sent");
            }
            Err(SendError::Recoverable(reason)) => {
                report.failed += 1;
                tracing::warn!(to = %email.to, %reason, "token e-mail rejected");
                if let Err(error) = session.reset() {
                    tracing::error!(%error, dropped = remaining, "mail session reset failed");
                    report.dropped = remaining;
                    return report;
                }
            }
            Err(SendError::Connection(reason)) => {
                report.failed += 1;
                report.dropped = remaining;
                tracing::error!(
                    to = %email.to,
                    %reason,
                    dropped = remaining,
                    "mail connection lost"
                );
                return report;
            }
        }
    }

    session.quit();
    report
}

/// Handle on the dispatcher thread.
#[derive(Debug)]
pub struct MailDispatcher {
    mailer: Mailer,
    worker: JoinHandle<()>,
}

impl MailDispatcher {
    pub fn spawn<T: Transport>(
        transport: T,
        policy: BatchPolicy,
        capacity: usize,
    ) -> Result<Self, MailError> {
        let (mailer, queue) = queue(capacity);
        let worker = thread::Builder::new()
            .name("mail-dispatcher".into())
            .spawn(move || run(transport, queue, policy))?;
        Ok(Self { mailer, worker })
    }

    pub fn mailer(&self) -> Mailer {
        self.mailer.clone()
    }

    /// Stop accepting mail, flush what is queued and wait for the thread.
    ///
    /// Returns once every other [`Mailer`] clone has been dropped as well.
    pub fn shutdown(self) -> Result<(), MailError> {
        let MailDispatcher { mailer, worker } = self;
        drop(mailer);
        worker.join().map_err(|_| MailError::WorkerPanicked)
    }
}

fn run<T: Transport>(transport: T, queue: MailQueue, policy: BatchPolicy) {
    while let Some(batch) = queue.next_batch(&policy) {
        let report = deliver_batch(&transport, &batch);
        tracing::info!(
            sent = report.sent,
            failed = report.failed,
            dropped = report.dropped,
            "mail batch processed"
        );
    }
    tracing::debug!("mail dispatcher stopped");
}
