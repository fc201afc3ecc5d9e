use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::auto_update::check::{PackageUpdate, check_for_updates};
use crate::auto_update::config::{AutoUpdateConfig, AutoUpdateStore};
use crate::cache::{Clock, MetadataCache};
use crate::config::{ManagerOptions, ScopeDirs};
use crate::error::ExtMgrError;
use crate::exec::CommandExecutor;

/// What a check needs from the live session.
#[derive(Clone)]
pub struct UpdateContext {
    pub exec: Arc<dyn CommandExecutor>,
    pub options: ManagerOptions,
    pub dirs: ScopeDirs,
    pub cache: Option<Arc<MetadataCache>>,
}

/// Resolves the current session on every tick; `None` once the session has ended.
pub type ContextAccessor = Arc<dyn Fn() -> Option<UpdateContext> + Send + Sync>;

#[async_trait]
pub trait UpdateChecker: Send + Sync {
    async fn check(&self, ctx: &UpdateContext) -> Vec<PackageUpdate>;
}

/// Checks installed registry packages against the registry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryUpdateChecker;

#[async_trait]
impl UpdateChecker for RegistryUpdateChecker {
    async fn check(&self, ctx: &UpdateContext) -> Vec<PackageUpdate> {
        check_for_updates(
            ctx.exec.as_ref(),
            &ctx.options,
            &ctx.dirs,
            ctx.cache.as_deref(),
        )
        .await
    }
}

struct RunningTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background update checks at a fixed interval.
///
/// At most one timer runs per scheduler; `start` replaces any previous one.
/// Stopping suppresses future ticks but lets an in-flight check finish.
pub struct AutoUpdateScheduler {
    store: Arc<AutoUpdateStore>,
    checker: Arc<dyn UpdateChecker>,
    clock: Arc<dyn Clock>,
    running: Mutex<Option<RunningTask>>,
}

impl AutoUpdateScheduler {
    pub fn new(
        store: Arc<AutoUpdateStore>,
        checker: Arc<dyn UpdateChecker>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            checker,
            clock,
            running: Mutex::new(None),
        }
    }

    /// Check immediately, then every `config.interval_ms`. Returns `false`
    /// (and leaves nothing running) when the config is off.
    pub fn start(&self, config: &AutoUpdateConfig, accessor: ContextAccessor) -> bool {
        self.stop();
        let config = config.clone().sanitize();
        if !config.enabled {
            tracing::debug!("Auto-update is off");
            return false;
        }

        tracing::info!("Auto-update scheduled {}", config.display_text);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let store = self.store.clone();
        let checker = self.checker.clone();
        let clock = self.clock.clone();
        let period = Duration::from_millis(config.interval_ms);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(ctx) = accessor() else {
                    tracing::debug!("Session ended; stopping auto-update");
                    task_cancel.cancel();
                    break;
                };
                if let Err(e) =
                    run_check(store.as_ref(), checker.as_ref(), clock.as_ref(), &ctx, &config)
                        .await
                {
                    tracing::warn!("Failed to save auto-update state: {e}");
                }
            }
        });

        *self.running.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(RunningTask { cancel, handle });
        true
    }

    pub fn stop(&self) {
        let previous = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = previous {
            task.cancel.cancel();
            tracing::debug!("Auto-update stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.cancel.is_cancelled() && !task.handle.is_finished())
    }

    /// One check outside the timer, persisted like a scheduled one.
    pub async fn check_now(
        &self,
        ctx: &UpdateContext,
        config: &AutoUpdateConfig,
    ) -> Result<AutoUpdateConfig, ExtMgrError> {
        run_check(
            self.store.as_ref(),
            self.checker.as_ref(),
            self.clock.as_ref(),
            ctx,
            config,
        )
        .await
    }
}

impl Drop for AutoUpdateScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Results are saved whether or not anything was found.
async fn run_check(
    store: &AutoUpdateStore,
    checker: &dyn UpdateChecker,
    clock: &dyn Clock,
    ctx: &UpdateContext,
    config: &AutoUpdateConfig,
) -> Result<AutoUpdateConfig, ExtMgrError> {
    let updates = checker.check(ctx).await;
    let now = clock.now_ms();

    let mut next = config.clone();
    next.last_check = Some(now);
    next.next_check = next
        .enabled
        .then(|| now.saturating_add(next.interval_ms as i64));
    next.updates_available = Some(updates.into_iter().map(|u| u.name).collect());
    store.save(&next)?;
    Ok(next.sanitize())
}
