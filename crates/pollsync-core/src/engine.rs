//! The sync engine: view registry, signal dispatch and the engine task.
//!
//! One [`SyncEngine`] owns the room membership and every mounted view. It is
//! driven sequentially, either directly through `&mut self` or by
//! [`SyncEngine::run`], which multiplexes channel signals and view commands
//! on a single task. Which poll a detail view is bound to is plain data in the
//! registry; changing it is one call to [`SyncEngine::switch_detail`].

use crate::cache::{CacheKey, CacheStore};
use crate::channel::{validate_poll_id, ChannelSignal, EventSink};
use crate::error::EngineError;
use crate::membership::{RoomMembership, Subscription};
use crate::metrics;
use crate::reconciler::{DetailReconciler, IgnoreReason, ListReconciler, Reconciled};
use pollsync_protocol::{PollId, ServerEvent};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Identifier of a mounted view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ViewId(u64);

impl ViewId {
    /// Get the raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view-{}", self.0)
    }
}

/// Consumer-side navigation, used when the poll being viewed is deleted.
pub trait Navigator: Send + Sync {
    /// Move the consumer to `location`.
    fn navigate(&self, location: &str);
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Where to send the consumer when its poll is deleted.
    pub home_location: String,
    /// Mark the cache keys of mounted views stale after a reconnect.
    pub invalidate_on_reconnect: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            home_location: "/".to_string(),
            invalidate_on_reconnect: false,
        }
    }
}

enum View {
    Detail {
        reconciler: DetailReconciler,
        subscription: Subscription,
    },
    List(ListReconciler),
}

impl View {
    fn key(&self) -> &CacheKey {
        match self {
            View::Detail { reconciler, .. } => reconciler.key(),
            View::List(reconciler) => reconciler.key(),
        }
    }

    fn reconcile(&self, cache: &dyn CacheStore, event: &ServerEvent) -> Reconciled {
        match self {
            View::Detail { reconciler, .. } => reconciler.reconcile(cache, event),
            View::List(reconciler) => reconciler.reconcile(cache, event),
        }
    }

    fn poll_id(&self) -> Option<&str> {
        match self {
            View::Detail { reconciler, .. } => Some(reconciler.poll_id()),
            View::List(_) => None,
        }
    }

    fn summary(&self, id: ViewId) -> ViewSummary {
        ViewSummary {
            id,
            kind: if self.poll_id().is_some() {
                "detail"
            } else {
                "list"
            },
            poll_id: self.poll_id().map(str::to_string),
        }
    }
}

/// A mounted view as reported by [`SyncEngine::stats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViewSummary {
    /// View id.
    pub id: ViewId,
    /// `detail` or `list`.
    pub kind: &'static str,
    /// Bound poll, for detail views.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_id: Option<PollId>,
}

/// Engine statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Whether a session is up.
    pub online: bool,
    /// Sessions established so far.
    pub sessions: u64,
    /// Events dispatched so far.
    pub events: u64,
    /// Rooms currently joined, sorted.
    pub active_rooms: Vec<PollId>,
    /// Mounted views, by id.
    pub views: Vec<ViewSummary>,
}

/// Synchronizes cached poll state with server events for every mounted view.
pub struct SyncEngine {
    membership: RoomMembership,
    cache: Arc<dyn CacheStore>,
    navigator: Arc<dyn Navigator>,
    config: EngineConfig,
    views: BTreeMap<ViewId, View>,
    next_view: u64,
    sessions: u64,
    events: u64,
}

impl SyncEngine {
    /// Create an engine with default configuration.
    #[must_use]
    pub fn new(
        sink: Arc<dyn EventSink>,
        cache: Arc<dyn CacheStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self::with_config(sink, cache, navigator, EngineConfig::default())
    }

    /// Create an engine with custom configuration.
    ///
    /// The engine starts offline: joins for views mounted before the first
    /// [`ChannelSignal::Connected`] are sent when that signal arrives.
    #[must_use]
    pub fn with_config(
        sink: Arc<dyn EventSink>,
        cache: Arc<dyn CacheStore>,
        navigator: Arc<dyn Navigator>,
        config: EngineConfig,
    ) -> Self {
        info!("Creating sync engine with config: {:?}", config);
        let mut membership = RoomMembership::new(sink);
        membership.go_offline();
        Self {
            membership,
            cache,
            navigator,
            config,
            views: BTreeMap::new(),
            next_view: 1,
            sessions: 0,
            events: 0,
        }
    }

    /// Mount a poll detail view and join the poll's room.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll id is invalid.
    pub fn mount_detail(&mut self, poll_id: &str) -> Result<ViewId, EngineError> {
        let subscription = self.membership.subscribe(poll_id)?;
        let id = self.insert(View::Detail {
            reconciler: DetailReconciler::new(poll_id),
            subscription,
        });
        info!(view = %id, poll = %poll_id, "Mounted detail view");
        Ok(id)
    }

    /// Mount the poll list view.
    pub fn mount_list(&mut self) -> ViewId {
        let id = self.insert(View::List(ListReconciler::new()));
        info!(view = %id, "Mounted list view");
        id
    }

    /// Rebind a detail view to another poll.
    ///
    /// Joins the new room before leaving the old one and replaces the view's
    /// reconciler in the same step. Rebinding to the current poll is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the view does not exist, is a list view, or the
    /// poll id is invalid. The view is unchanged on error.
    pub fn switch_detail(&mut self, id: ViewId, poll_id: &str) -> Result<(), EngineError> {
        let current = match self.views.get(&id) {
            Some(View::Detail { reconciler, .. }) => reconciler.poll_id(),
            Some(View::List(_)) => return Err(EngineError::NotADetailView(id)),
            None => return Err(EngineError::ViewNotFound(id)),
        };
        if current == poll_id {
            trace!(view = %id, poll = %poll_id, "Already bound");
            return Ok(());
        }
        validate_poll_id(poll_id).map_err(EngineError::InvalidPollId)?;

        let subscription = self.membership.subscribe(poll_id)?;
        let replaced = self.views.insert(
            id,
            View::Detail {
                reconciler: DetailReconciler::new(poll_id),
                subscription,
            },
        );
        if let Some(View::Detail {
            subscription: old, ..
        }) = replaced
        {
            info!(view = %id, from = %old.poll_id(), to = %poll_id, "Switched detail view");
            self.membership.unsubscribe(old);
        }
        Ok(())
    }

    /// Unmount a view, leaving its room if no other view needs it.
    ///
    /// # Errors
    ///
    /// Returns an error if the view does not exist.
    pub fn unmount(&mut self, id: ViewId) -> Result<(), EngineError> {
        let view = self.views.remove(&id).ok_or(EngineError::ViewNotFound(id))?;
        if let View::Detail { subscription, .. } = view {
            self.membership.unsubscribe(subscription);
        }
        metrics::set_mounted_views(self.views.len());
        info!(view = %id, "Unmounted view");
        Ok(())
    }

    /// Handle a signal from the channel adapter.
    pub fn handle_signal(&mut self, signal: ChannelSignal) {
        match signal {
            ChannelSignal::Connected { session_id } => self.on_connected(&session_id),
            ChannelSignal::Disconnected { reason } => {
                warn!(reason = %reason, "Session lost");
                self.membership.go_offline();
            }
            ChannelSignal::Event(event) => {
                self.handle_event(&event);
            }
        }
    }

    /// Dispatch one server event to every mounted view.
    ///
    /// Views sharing a cache key see the event applied once. When a poll
    /// detail view reports its poll deleted, the consumer is sent home and
    /// every detail view of that poll is unmounted.
    pub fn handle_event(&mut self, event: &ServerEvent) -> Vec<(ViewId, Reconciled)> {
        self.events += 1;
        if let ServerEvent::Error(notice) = event {
            warn!(message = %notice.message, "Server reported an error");
        }

        let mut by_key: HashMap<&CacheKey, Reconciled> = HashMap::new();
        let mut results = Vec::with_capacity(self.views.len());
        for (id, view) in &self.views {
            let outcome = by_key
                .entry(view.key())
                .or_insert_with(|| view.reconcile(self.cache.as_ref(), event))
                .clone();
            results.push((*id, outcome));
        }

        metrics::record_event(event.kind().as_str(), summarize(&results));
        debug!(
            event = %event.kind(),
            poll = ?event.poll_id(),
            views = results.len(),
            "Dispatched event"
        );

        let deleted: BTreeSet<PollId> = results
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                Reconciled::Deleted(poll_id) => Some(poll_id.clone()),
                _ => None,
            })
            .collect();
        if !deleted.is_empty() {
            self.navigator.navigate(&self.config.home_location);
            let doomed: Vec<ViewId> = self
                .views
                .iter()
                .filter(|(_, view)| view.poll_id().is_some_and(|p| deleted.contains(p)))
                .map(|(id, _)| *id)
                .collect();
            for id in doomed {
                // Present: collected from the registry above.
                let _ = self.unmount(id);
            }
        }

        results
    }

    /// Get engine statistics.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            online: self.membership.is_online(),
            sessions: self.sessions,
            events: self.events,
            active_rooms: self.membership.active_rooms(),
            views: self
                .views
                .iter()
                .map(|(id, view)| view.summary(*id))
                .collect(),
        }
    }

    /// Number of mounted views.
    #[must_use]
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Run the engine until either the signal stream or every handle is gone.
    ///
    /// Mounted views are unmounted on exit.
    pub async fn run(
        mut self,
        mut signals: mpsc::UnboundedReceiver<ChannelSignal>,
        mut commands: mpsc::UnboundedReceiver<ViewCommand>,
    ) {
        info!("Sync engine started");
        loop {
            // Signals first, so commands observe every event already delivered.
            tokio::select! {
                biased;

                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal),
                    None => {
                        debug!("Signal stream ended");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        debug!("All engine handles dropped");
                        break;
                    }
                },
            }
        }

        let ids: Vec<ViewId> = self.views.keys().copied().collect();
        for id in ids {
            let _ = self.unmount(id);
        }
        info!(
            sessions = self.sessions,
            events = self.events,
            "Sync engine stopped"
        );
    }

    /// Spawn [`SyncEngine::run`] on the current runtime.
    pub fn spawn(
        self,
        signals: mpsc::UnboundedReceiver<ChannelSignal>,
    ) -> (EngineHandle, JoinHandle<()>) {
        let (handle, commands) = EngineHandle::channel();
        let task = tokio::spawn(self.run(signals, commands));
        (handle, task)
    }

    fn handle_command(&mut self, command: ViewCommand) {
        // A dropped reply receiver means the caller stopped waiting.
        match command {
            ViewCommand::MountDetail { poll_id, reply } => {
                let _ = reply.send(self.mount_detail(&poll_id));
            }
            ViewCommand::MountList { reply } => {
                let _ = reply.send(self.mount_list());
            }
            ViewCommand::SwitchDetail {
                view,
                poll_id,
                reply,
            } => {
                let _ = reply.send(self.switch_detail(view, &poll_id));
            }
            ViewCommand::Unmount { view, reply } => {
                let _ = reply.send(self.unmount(view));
            }
            ViewCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn on_connected(&mut self, session_id: &str) {
        self.sessions += 1;
        let rejoined = self.membership.resubscribe_all();
        info!(
            session = %session_id,
            sessions = self.sessions,
            rooms = rejoined,
            "Session established"
        );

        if self.sessions > 1 {
            metrics::record_reconnect();
            if self.config.invalidate_on_reconnect {
                let keys: BTreeSet<&CacheKey> = self.views.values().map(View::key).collect();
                for key in keys {
                    self.cache.invalidate(key);
                }
                debug!("Invalidated mounted views after reconnect");
            }
        }
    }

    fn insert(&mut self, view: View) -> ViewId {
        let id = ViewId(self.next_view);
        self.next_view += 1;
        self.views.insert(id, view);
        metrics::set_mounted_views(self.views.len());
        id
    }
}

fn summarize(results: &[(ViewId, Reconciled)]) -> &'static str {
    let mut outcome = if results.is_empty() {
        "no_views"
    } else {
        IgnoreReason::NotHandled.as_str()
    };
    for (_, result) in results {
        match result {
            Reconciled::Deleted(_) => return "deleted",
            Reconciled::Applied(_) => outcome = "applied",
            Reconciled::Ignored(reason) if outcome != "applied" => outcome = reason.as_str(),
            Reconciled::Ignored(_) => {}
        }
    }
    outcome
}

/// A request to the engine task.
#[derive(Debug)]
pub enum ViewCommand {
    /// Mount a poll detail view.
    MountDetail {
        poll_id: PollId,
        reply: oneshot::Sender<Result<ViewId, EngineError>>,
    },
    /// Mount the poll list view.
    MountList { reply: oneshot::Sender<ViewId> },
    /// Rebind a detail view.
    SwitchDetail {
        view: ViewId,
        poll_id: PollId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Unmount a view.
    Unmount {
        view: ViewId,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    /// Read statistics.
    Stats { reply: oneshot::Sender<EngineStats> },
}

/// Cloneable handle to a running engine task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<ViewCommand>,
}

impl EngineHandle {
    /// Create a handle and the command receiver to pass to [`SyncEngine::run`].
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ViewCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (Self { commands }, rx)
    }

    /// Mount a poll detail view.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll id is invalid or the engine has stopped.
    pub async fn mount_detail(&self, poll_id: impl Into<PollId>) -> Result<ViewId, EngineError> {
        let poll_id = poll_id.into();
        self.request(|reply| ViewCommand::MountDetail { poll_id, reply })
            .await?
    }

    /// Mount the poll list view.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has stopped.
    pub async fn mount_list(&self) -> Result<ViewId, EngineError> {
        self.request(|reply| ViewCommand::MountList { reply }).await
    }

    /// Rebind a detail view to another poll.
    ///
    /// # Errors
    ///
    /// See [`SyncEngine::switch_detail`]; also fails if the engine has stopped.
    pub async fn switch_detail(
        &self,
        view: ViewId,
        poll_id: impl Into<PollId>,
    ) -> Result<(), EngineError> {
        let poll_id = poll_id.into();
        self.request(|reply| ViewCommand::SwitchDetail {
            view,
            poll_id,
            reply,
        })
        .await?
    }

    /// Unmount a view.
    ///
    /// # Errors
    ///
    /// Returns an error if the view does not exist or the engine has stopped.
    pub async fn unmount(&self, view: ViewId) -> Result<(), EngineError> {
        self.request(|reply| ViewCommand::Unmount { view, reply })
            .await?
    }

    /// Read engine statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine has stopped.
    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        self.request(|reply| ViewCommand::Stats { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ViewCommand,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| EngineError::EngineStopped)?;
        rx.await.map_err(|_| EngineError::EngineStopped)
    }
}
