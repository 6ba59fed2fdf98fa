//! # Station Host
//!
//! Runs a [`CombinationEngine`] on its own thread.
//!
//! ```text
//! game threads ──> HostCommand (bounded) ──> station-host thread
//!                                              │  handle(event)
//!                                              │  tick() every tick_duration
//!                                              ▼
//!                                          EffectsSink
//! ```
//!
//! Submissions and deadline expiry are serialised on the host thread, so
//! outcomes for a station come out in the order their events went in.

use alembic_shared::Tick;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::catalog::CatalogWarning;
use crate::effects::EffectsSink;
use crate::engine::{CombinationEngine, CombinationOutcome, StationEvent};
use crate::error::{CraftingError, CraftingResult};
use crate::ledger::CostLedger;
use crate::vault::TokenVault;

/// Pending command capacity.
pub const HOST_QUEUE_CAPACITY: usize = 1024;

type Reply<T> = Sender<CraftingResult<T>>;

/// Work for the host thread.
pub enum HostCommand {
    /// Apply an event; reply with the result if asked.
    Event {
        /// The event.
        event: StationEvent,
        /// Where to send the result.
        reply: Option<Reply<Option<CombinationOutcome>>>,
    },
    /// Parse and swap in a catalog source.
    ReloadCatalog {
        /// TOML text.
        source: String,
        /// Where to send the load warnings.
        reply: Reply<Vec<CatalogWarning>>,
    },
    /// Clear degraded mode.
    RestoreService,
    /// Reply once every earlier command has been applied.
    Sync(Sender<()>),
    /// Stop the thread.
    Shutdown,
}

/// Counters readable from any thread.
#[derive(Debug, Default)]
struct HostShared {
    tick: AtomicU64,
    processed: AtomicU64,
}

/// Handle to a running station host.
pub struct StationHost {
    commands: Sender<HostCommand>,
    shared: Arc<HostShared>,
    thread: Option<JoinHandle<()>>,
}

impl StationHost {
    /// Moves `engine` onto a new thread ticking every `tick_duration`.
    ///
    /// # Errors
    ///
    /// `HostStopped` if the thread cannot be spawned.
    pub fn spawn<L, V, E>(
        engine: CombinationEngine<L, V, E>,
        tick_duration: Duration,
    ) -> CraftingResult<Self>
    where
        L: CostLedger + Send + 'static,
        V: TokenVault + Send + 'static,
        E: EffectsSink + Send + 'static,
    {
        let (commands, receiver) = bounded(HOST_QUEUE_CAPACITY);
        let shared = Arc::new(HostShared::default());
        let thread_shared = Arc::clone(&shared);
        let tick_duration = tick_duration.max(Duration::from_millis(1));

        let thread = std::thread::Builder::new()
            .name("station-host".into())
            .spawn(move || run(engine, &receiver, tick_duration, &thread_shared))
            .map_err(|e| {
                tracing::error!(error = %e, "failed to spawn station host");
                CraftingError::HostStopped
            })?;

        Ok(Self {
            commands,
            shared,
            thread: Some(thread),
        })
    }

    /// Queues an event without waiting for it.
    ///
    /// # Errors
    ///
    /// `HostStopped` if the host thread is gone.
    pub fn send(&self, event: StationEvent) -> CraftingResult<()> {
        self.command(HostCommand::Event { event, reply: None })
    }

    /// Applies an event and waits for its result.
    ///
    /// # Errors
    ///
    /// Whatever [`CombinationEngine::handle`] returns, or `HostStopped`.
    pub fn request(&self, event: StationEvent) -> CraftingResult<Option<CombinationOutcome>> {
        let (reply, answer) = bounded(1);
        self.command(HostCommand::Event {
            event,
            reply: Some(reply),
        })?;
        answer.recv().map_err(|_| CraftingError::HostStopped)?
    }

    /// Reloads the catalog on the host thread.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the source cannot be parsed, or `HostStopped`.
    pub fn reload_catalog(&self, source: impl Into<String>) -> CraftingResult<Vec<CatalogWarning>> {
        let (reply, answer) = bounded(1);
        self.command(HostCommand::ReloadCatalog {
            source: source.into(),
            reply,
        })?;
        answer.recv().map_err(|_| CraftingError::HostStopped)?
    }

    /// Clears degraded mode.
    ///
    /// # Errors
    ///
    /// `HostStopped` if the host thread is gone.
    pub fn restore_service(&self) -> CraftingResult<()> {
        self.command(HostCommand::RestoreService)
    }

    /// Blocks until every previously queued command has been applied.
    ///
    /// # Errors
    ///
    /// `HostStopped` if the host thread is gone.
    pub fn sync(&self) -> CraftingResult<()> {
        let (reply, answer) = bounded(1);
        self.command(HostCommand::Sync(reply))?;
        answer.recv().map_err(|_| CraftingError::HostStopped)
    }

    /// Logical tick last reached by the host.
    #[must_use]
    pub fn current_tick(&self) -> Tick {
        self.shared.tick.load(Ordering::Acquire)
    }

    /// Commands applied so far.
    #[must_use]
    pub fn processed(&self) -> u64 {
        self.shared.processed.load(Ordering::Relaxed)
    }

    /// Stops the host and waits for the thread.
    ///
    /// # Errors
    ///
    /// `HostStopped` if the thread panicked.
    pub fn shutdown(mut self) -> CraftingResult<()> {
        self.stop()
    }

    fn command(&self, command: HostCommand) -> CraftingResult<()> {
        self.commands
            .send(command)
            .map_err(|_| CraftingError::HostStopped)
    }

    fn stop(&mut self) -> CraftingResult<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let _ = self.commands.send(HostCommand::Shutdown);
        thread.join().map_err(|_| CraftingError::HostStopped)
    }
}

impl Drop for StationHost {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(error = %e, "station host did not stop cleanly");
        }
    }
}

fn run<L, V, E>(
    mut engine: CombinationEngine<L, V, E>,
    receiver: &Receiver<HostCommand>,
    tick_duration: Duration,
    shared: &HostShared,
) where
    L: CostLedger,
    V: TokenVault,
    E: EffectsSink,
{
    tracing::info!(tick_ms = tick_duration.as_millis() as u64, "station host started");
    let mut next_tick = Instant::now() + tick_duration;

    loop {
        let wait = next_tick.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(wait) {
            Ok(HostCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(command) => {
                apply(&mut engine, command);
                shared.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        while Instant::now() >= next_tick {
            let expired = engine.tick();
            if !expired.is_empty() {
                tracing::debug!(tick = engine.now(), expired = expired.len(), "sessions expired");
            }
            shared.tick.store(engine.now(), Ordering::Release);
            next_tick += tick_duration;
        }
    }

    tracing::info!(
        tick = engine.now(),
        active_sessions = engine.active_sessions(),
        "station host stopped"
    );
}

fn apply<L, V, E>(engine: &mut CombinationEngine<L, V, E>, command: HostCommand)
where
    L: CostLedger,
    V: TokenVault,
    E: EffectsSink,
{
    match command {
        HostCommand::Event { event, reply } => {
            let result = engine.handle(event);
            if let Err(e) = &result {
                tracing::debug!(error = %e, "station event rejected");
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }
        HostCommand::ReloadCatalog { source, reply } => {
            let _ = reply.send(engine.reload_catalog_from_str(&source));
        }
        HostCommand::RestoreService => engine.restore_service(),
        HostCommand::Sync(reply) => {
            let _ = reply.send(());
        }
        HostCommand::Shutdown => {}
    }
}
