//! Client facade
//!
//! [`ScrobbleClient`] owns the durable queue, the submission worker and the
//! current delivery configuration, and exposes the small lifecycle plus
//! ingestion API the host integrates against. Ingestion never waits on
//! network I/O: `scrobble` returns as soon as the record is queued.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::delivery::{Deliver, DeliveryTarget, HttpDelivery};
use crate::error::{Error, Result};
use crate::queue::ScrobbleQueue;
use crate::record::ScrobbleInfo;
use crate::wire;
use crate::worker::{BackoffPolicy, SubmissionWorker};

/// Producer-facing settings captured by `configure`
#[derive(Debug, Clone, Copy)]
struct IngestionSettings {
    safe_scrobbling: bool,
    threshold: f64,
}

/// State that only exists while the client is started
#[derive(Default)]
struct Lifecycle {
    queue: Option<Arc<Mutex<ScrobbleQueue>>>,
    stop_tx: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

/// Scrobble submission client
pub struct ScrobbleClient {
    queue_path: PathBuf,
    transport: Arc<dyn Deliver>,
    backoff: BackoffPolicy,
    persist_when_suspended: bool,
    /// Current delivery target; `None` while unconfigured or invalid.
    /// The worker subscribes to this channel.
    target_tx: watch::Sender<Option<DeliveryTarget>>,
    wakeup: Arc<Notify>,
    running: AtomicBool,
    settings: std::sync::Mutex<IngestionSettings>,
    lifecycle: Mutex<Lifecycle>,
}

impl ScrobbleClient {
    /// Create a client over an explicit transport.
    ///
    /// The queue at `queue_path` is not opened until [`start`].
    ///
    /// [`start`]: Self::start
    #[must_use]
    pub fn new(
        queue_path: impl Into<PathBuf>,
        transport: Arc<dyn Deliver>,
        backoff: BackoffPolicy,
        persist_when_suspended: bool,
    ) -> Self {
        let (target_tx, _target_rx) = watch::channel(None);
        Self {
            queue_path: queue_path.into(),
            transport,
            backoff,
            persist_when_suspended,
            target_tx,
            wakeup: Arc::new(Notify::new()),
            running: AtomicBool::new(false),
            settings: std::sync::Mutex::new(IngestionSettings {
                safe_scrobbling: false,
                threshold: 0.0,
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    /// Create a client with HTTP delivery from a loaded configuration.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the queue path cannot be resolved or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = Arc::new(HttpDelivery::new(config.submission.request_timeout())?);
        Ok(Self::new(
            config.queue_path()?,
            transport,
            config.submission.backoff(),
            config.scrobbler.persist_when_suspended,
        ))
    }

    /// Apply the scrobbler section of a configuration file.
    ///
    /// A disabled scrobbler suspends submission without error.
    ///
    /// # Errors
    /// Same conditions as [`configure`].
    ///
    /// [`configure`]: Self::configure
    pub fn configure_from(&self, config: &Config) -> Result<()> {
        if !config.scrobbler.enabled {
            self.suspend("scrobbling is disabled");
            return Ok(());
        }
        self.configure(
            &config.scrobbler.endpoint_url,
            &config.scrobbler.username,
            &config.scrobbler.password,
            config.scrobbler.safe_scrobbling,
            config.scrobbler.threshold_fraction(),
        )
    }

    /// Update the delivery configuration.
    ///
    /// `threshold` is the played-fraction a candidate must reach, in
    /// `[0, 1]`; out-of-range values clamp to 0. Validation failures suspend
    /// submission but never stop ingestion: scrobbles are still recorded,
    /// just not submitted until a valid `configure` call lands.
    ///
    /// # Errors
    /// Returns [`Error::Config`] for non-ASCII credentials or an unusable
    /// endpoint URL.
    pub fn configure(
        &self,
        endpoint_url: &str,
        username: &str,
        password: &str,
        safe_scrobbling: bool,
        threshold: f64,
    ) -> Result<()> {
        let threshold = if (0.0..=1.0).contains(&threshold) {
            threshold
        } else {
            warn!(threshold, "scrobble threshold out of range, using 0");
            0.0
        };
        *self.settings.lock().expect("settings lock poisoned") = IngestionSettings {
            safe_scrobbling,
            threshold,
        };

        let url_ok = reqwest::Url::parse(endpoint_url)
            .map(|url| matches!(url.scheme(), "http" | "https"))
            .unwrap_or(false);
        if !url_ok {
            self.suspend("endpoint URL is unusable");
            return Err(Error::config(format!(
                "unusable endpoint URL: {endpoint_url:?}"
            )));
        }
        if !username.is_ascii() {
            self.suspend("non-ASCII characters are present in the username");
            return Err(Error::config("non-ASCII username"));
        }
        if !password.is_ascii() {
            self.suspend("non-ASCII characters are present in the password");
            return Err(Error::config("non-ASCII password"));
        }

        // send_replace stores the target even before the worker subscribes
        self.target_tx.send_replace(Some(DeliveryTarget {
            endpoint_url: endpoint_url.to_string(),
            username: username.to_string(),
            password: password.to_string(),
        }));
        info!(endpoint_url, "scrobble client configured");
        Ok(())
    }

    /// Force the worker into suspension until a valid `configure` call
    /// succeeds. Ingestion continues.
    pub fn invalidate_configuration(&self) {
        self.suspend("configuration invalidated");
    }

    fn suspend(&self, reason: &str) {
        error!(reason, "scrobble submission suspended");
        self.target_tx.send_replace(None);
    }

    /// Whether a valid delivery configuration is in place
    #[must_use]
    pub fn configured(&self) -> bool {
        self.target_tx.borrow().is_some()
    }

    /// Safe-scrobbling flag from the last `configure` call
    #[must_use]
    pub fn safe_scrobbling(&self) -> bool {
        self.settings
            .lock()
            .expect("settings lock poisoned")
            .safe_scrobbling
    }

    /// Scrobble threshold fraction from the last `configure` call
    #[must_use]
    pub fn scrobble_threshold(&self) -> f64 {
        self.settings
            .lock()
            .expect("settings lock poisoned")
            .threshold
    }

    /// Open the durable queue and start the submission worker.
    ///
    /// Previously persisted scrobbles are recovered and submitted once a
    /// valid configuration is in place. Calling `start` on a started client
    /// is a no-op.
    ///
    /// # Errors
    /// Returns [`Error::Io`] if the queue file cannot be opened.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.worker.is_some() {
            return Ok(());
        }

        let queue = Arc::new(Mutex::new(ScrobbleQueue::open(&self.queue_path)?));
        let pending = queue.lock().await.len();

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = SubmissionWorker::new(
            queue.clone(),
            self.transport.clone(),
            self.target_tx.subscribe(),
            stop_rx,
            self.wakeup.clone(),
            self.backoff,
        );

        lifecycle.queue = Some(queue);
        lifecycle.stop_tx = Some(stop_tx);
        lifecycle.worker = Some(tokio::spawn(worker.run()));
        self.running.store(true, Ordering::SeqCst);

        if pending > 0 {
            info!(pending, "recovered pending scrobbles");
            self.wakeup.notify_one();
        }
        info!("scrobble client started");
        Ok(())
    }

    /// Signal the worker to stop and wait for it to yield.
    ///
    /// An in-flight attempt is abandoned without data loss; queued
    /// memory-only entries are persisted so they survive the restart.
    /// Calling `stop` on a stopped client is a no-op.
    ///
    /// # Errors
    /// Currently infallible; persistence problems on shutdown are logged,
    /// not raised.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let Some(worker) = lifecycle.worker.take() else {
            return Ok(());
        };

        if let Some(stop_tx) = lifecycle.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if worker.await.is_err() {
            warn!("submission worker terminated abnormally");
        }

        if let Some(queue) = lifecycle.queue.take() {
            let mut queue = queue.lock().await;
            if let Err(e) = queue.make_all_durable() {
                warn!(error = %e, "could not persist pending scrobbles on shutdown");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("scrobble client stopped");
        Ok(())
    }

    /// Whether the submission worker is currently running
    #[must_use]
    pub fn started(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Record one completed listen.
    ///
    /// The record is encoded and appended to the queue; with
    /// `safe_scrobbling` it is flushed to the durable file first. Returns
    /// the queue sequence number. Never waits on network I/O.
    ///
    /// # Errors
    /// Returns [`Error::NotStarted`] before `start`. A failed durable write
    /// is logged and downgraded to a memory-only enqueue rather than
    /// dropping the record; [`Error::Io`] only surfaces if that fallback
    /// fails as well.
    pub async fn scrobble(&self, info: &ScrobbleInfo, safe_scrobbling: bool) -> Result<u64> {
        let payload = wire::encode(info)?;

        let queue = self
            .lifecycle
            .lock()
            .await
            .queue
            .clone()
            .ok_or(Error::NotStarted)?;

        // While suspended, scrobbles are recorded but not submitted; keeping
        // them durable means a restart cannot silently drop them.
        let durable = safe_scrobbling || (self.persist_when_suspended && !self.configured());

        let mut queue = queue.lock().await;
        let sequence = match queue.append(&payload, durable) {
            Ok(sequence) => sequence,
            Err(Error::Io(e)) if durable => {
                error!(error = %e, "durable enqueue failed, keeping scrobble in memory only");
                queue.append(&payload, false)?
            }
            Err(e) => return Err(e),
        };
        drop(queue);

        self.wakeup.notify_one();
        Ok(sequence)
    }

    /// Number of scrobbles queued and not yet acknowledged
    pub async fn pending(&self) -> usize {
        match &self.lifecycle.lock().await.queue {
            Some(queue) => queue.lock().await.len(),
            None => 0,
        }
    }
}
