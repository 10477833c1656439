//! Service wiring.
//!
//! [`Vigil`] is built once at process start and hands out `Arc` handles to
//! its components. Engine state lives in the instance, not in statics, so
//! embedders that need a second engine simply build a second `Vigil`.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::VigilConfig;
use crate::error::{Result, VigilError};
use crate::events::EventBus;
use crate::notifications::{Alert, AlertLog, DeliverySink, DeviceContext, NotificationCenter};
use crate::quality::QualityFeedback;
use crate::scheduler::{
    ExecutorRegistry, RecoveryReport, RetryPolicy, SchedulerRunner, TaskId, TaskScheduler,
    TokioWakeTimer,
};
use crate::store::{self, TaskStore};

/// The assembled engine.
pub struct Vigil {
    config: VigilConfig,
    store: Arc<dyn TaskStore>,
    events: EventBus,
    quality: Arc<QualityFeedback>,
    device: Arc<DeviceContext>,
    scheduler: Arc<TaskScheduler>,
    notifications: Arc<NotificationCenter>,
    fired: Option<mpsc::UnboundedReceiver<TaskId>>,
    alerts: Option<mpsc::UnboundedReceiver<Alert>>,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Vigil {
    /// Build from configuration: opens the configured store, uses the system
    /// clock and the built-in executors.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, an unusable store, or
    /// when called outside a tokio runtime.
    pub fn new(config: VigilConfig, sink: Arc<dyn DeliverySink>) -> Result<Self> {
        let store = store::open_store(&config.store)?;
        Self::with_parts(
            config,
            store,
            Arc::new(SystemClock),
            sink,
            ExecutorRegistry::with_builtins(),
        )
    }

    /// Build from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration, a store that cannot be
    /// read, or when called outside a tokio runtime.
    pub fn with_parts(
        config: VigilConfig,
        store: Arc<dyn TaskStore>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn DeliverySink>,
        executors: ExecutorRegistry,
    ) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new();
        let quality = Arc::new(QualityFeedback::new(&config.quality));
        let (wake, fired) = TokioWakeTimer::on_current_runtime(Arc::clone(&clock))?;
        let (alert_tx, alerts) = mpsc::unbounded_channel();

        let scheduler = Arc::new(
            TaskScheduler::new(
                config.scheduler.clone(),
                Arc::clone(&store),
                Arc::new(wake),
                Arc::clone(&clock),
            )?
            .with_executors(executors)
            .with_retry_policy(RetryPolicy::new(&config.retry))
            .with_quality(Arc::clone(&quality))
            .with_events(events.clone())
            .with_alert_sender(alert_tx),
        );

        let alert_log = Arc::new(AlertLog::new());
        let device = Arc::new(DeviceContext::new(Arc::clone(&clock), Arc::clone(&alert_log)));
        let notifications = NotificationCenter::new(
            config.notifications.clone(),
            config.escalation.clone(),
            device.clone(),
            alert_log,
            sink,
            clock,
            events.clone(),
        )?;

        Ok(Self {
            config,
            store,
            events,
            quality,
            device,
            scheduler,
            notifications,
            fired: Some(fired),
            alerts: Some(alerts),
            shutdown: CancellationToken::new(),
            workers: Vec::new(),
        })
    }

    /// Recover persisted tasks and start the background loops.
    ///
    /// # Errors
    ///
    /// Returns an error if already started or if recovery cannot read the store.
    pub fn start(&mut self) -> Result<RecoveryReport> {
        let (Some(fired), Some(mut alerts)) = (self.fired.take(), self.alerts.take()) else {
            return Err(VigilError::Channel("engine already started".to_owned()));
        };

        let report = self.scheduler.recover()?;

        let runner = SchedulerRunner::new(Arc::clone(&self.scheduler), fired, &self.config.scheduler)
            .with_shutdown(self.shutdown.child_token());
        self.workers.push(runner.run());

        let center = Arc::clone(&self.notifications);
        let shutdown = self.shutdown.child_token();
        self.workers.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    alert = alerts.recv() => {
                        let Some(alert) = alert else { break };
                        center.submit(alert);
                    }
                }
            }
            debug!("alert forwarder stopped");
        }));

        info!(
            rearmed = report.rearmed,
            overdue = report.overdue,
            reclaimed = report.reclaimed,
            "vigil started"
        );
        Ok(report)
    }

    /// Stop the background loops and wait for in-flight dispatches.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        info!("vigil stopped");
    }

    /// Active configuration.
    pub fn config(&self) -> &VigilConfig {
        &self.config
    }

    /// Task scheduler handle.
    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// Notification center handle.
    pub fn notifications(&self) -> &Arc<NotificationCenter> {
        &self.notifications
    }

    /// Device context fed to the delivery policy.
    pub fn device(&self) -> &Arc<DeviceContext> {
        &self.device
    }

    /// Quality tracker shared with the scheduler.
    pub fn quality(&self) -> &Arc<QualityFeedback> {
        &self.quality
    }

    /// Event bus for subscribers.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Underlying task store.
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }
}
