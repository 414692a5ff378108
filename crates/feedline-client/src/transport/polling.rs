//! Long-poll transport.
//!
//! One cycle issues a single request carrying the current cursor. The server
//! holds it until an event exists or its timeout elapses. On success the next
//! cycle starts immediately; on failure it starts after the current backoff
//! delay.
//!
//! Cancellation is generation based: every cycle, pause, and close bumps
//! `generation`. A completing request whose captured token no longer matches
//! is dropped without touching the cursor or the subscribers. Timers carry
//! the generation they were armed under and do nothing once it has moved on.

use std::sync::Arc;
use std::time::Duration;

use feedline_core::backoff::Backoff;
use feedline_core::{BackoffPolicy, PollEnvelope};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{EventTransport, PollFetcher, PollRequest, ServerSession, TransportMode};
use crate::dispatcher::Dispatcher;
use crate::error::TransportError;

/// Default server hold time for one poll request.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(25_000);

/// Polling parameters.
#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    /// Server hold time sent with each request.
    pub timeout: Duration,
    /// Retry pacing after failures.
    pub backoff: BackoffPolicy,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_POLL_TIMEOUT,
            backoff: BackoffPolicy::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

/// Scheduling state. Pure; the transport wraps it in a mutex.
#[derive(Debug)]
pub(crate) struct PollState {
    running: bool,
    paused: bool,
    closed: bool,
    generation: u64,
    backoff: Backoff,
    in_flight: Option<CancellationToken>,
    session: ServerSession,
}

impl PollState {
    pub(crate) fn new(policy: BackoffPolicy) -> Self {
        Self {
            running: false,
            paused: false,
            closed: false,
            generation: 0,
            backoff: Backoff::new(policy),
            in_flight: None,
            session: ServerSession::default(),
        }
    }

    /// Claim a new cycle.
    ///
    /// `armed_at` is the generation a timer was scheduled under; a timer
    /// from an older generation does not start a cycle.
    pub(crate) fn begin(&mut self, armed_at: Option<u64>) -> Option<(u64, CancellationToken)> {
        if self.closed || self.paused || self.running {
            return None;
        }
        if armed_at.is_some_and(|g| g != self.generation) {
            return None;
        }
        self.running = true;
        self.generation += 1;
        let cancel = CancellationToken::new();
        self.in_flight = Some(cancel.clone());
        Some((self.generation, cancel))
    }

    /// Settle the cycle started under `token`.
    ///
    /// Returns `true` when the result should be applied. A superseded token
    /// leaves `running` alone, since it may belong to a newer cycle. Pause and
    /// close bump the generation before cancelling, so only a fetcher's own
    /// `Aborted` reaches here with a current token.
    pub(crate) fn finish(&mut self, token: u64) -> bool {
        if token != self.generation {
            return false;
        }
        self.running = false;
        self.in_flight = None;
        !(self.closed || self.paused)
    }

    fn supersede(&mut self) {
        self.generation += 1;
        self.running = false;
        if let Some(cancel) = self.in_flight.take() {
            cancel.cancel();
        }
    }

    pub(crate) fn pause(&mut self) {
        self.paused = true;
        self.supersede();
    }

    /// Returns `true` if a cycle should be kicked.
    pub(crate) fn resume(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.paused = false;
        true
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
        self.supersede();
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

struct PollShared {
    dispatcher: Arc<Dispatcher>,
    fetcher: Arc<dyn PollFetcher>,
    timeout: Duration,
    runtime: Handle,
    shutdown: CancellationToken,
    state: Mutex<PollState>,
}

/// Long-poll loop for one identity.
pub struct PollingTransport {
    shared: Arc<PollShared>,
}

impl PollingTransport {
    /// Build an idle transport; nothing happens until [`EventTransport::start`].
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        fetcher: Arc<dyn PollFetcher>,
        config: PollConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            shared: Arc::new(PollShared {
                dispatcher,
                fetcher,
                timeout: config.timeout,
                runtime,
                shutdown: CancellationToken::new(),
                state: Mutex::new(PollState::new(config.backoff)),
            }),
        }
    }

    /// Current generation counter.
    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation()
    }

    /// Whether a request is in flight.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Delay the next failure will wait.
    pub fn backoff_ms(&self) -> u64 {
        self.shared.state.lock().backoff.current_ms()
    }
}

impl EventTransport for PollingTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Polling
    }

    fn start(&self) {
        self.shared.kick(None);
    }

    fn pause(&self) {
        self.shared.state.lock().pause();
        debug!(identity = %self.shared.dispatcher.identity(), "polling paused");
    }

    fn resume(&self) {
        let kick = self.shared.state.lock().resume();
        if kick {
            debug!(identity = %self.shared.dispatcher.identity(), "polling resumed");
            self.shared.kick(None);
        }
    }

    fn is_paused(&self) -> bool {
        self.shared.state.lock().paused
    }

    fn close(&self) {
        self.shared.state.lock().close();
        self.shared.shutdown.cancel();
    }
}

impl PollShared {
    /// Start a cycle if none is running and the transport is live.
    fn kick(self: &Arc<Self>, armed_at: Option<u64>) {
        let Some((token, cancel)) = self.state.lock().begin(armed_at) else {
            return;
        };
        let request = PollRequest {
            identity: self.dispatcher.identity().clone(),
            since: self.dispatcher.cursor(),
            timeout: self.timeout,
        };
        debug!(
            identity = %request.identity,
            generation = token,
            since = request.since,
            "poll cycle start"
        );

        let shared = Arc::clone(self);
        let _ = self.runtime.spawn(async move {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(TransportError::Aborted),
                result = shared.fetcher.poll(&request) => result,
            };
            shared.complete(token, result);
        });
    }

    fn complete(self: &Arc<Self>, token: u64, result: Result<PollEnvelope, TransportError>) {
        if !self.state.lock().finish(token) {
            debug!(
                identity = %self.dispatcher.identity(),
                generation = token,
                "discarding superseded poll result"
            );
            return;
        }

        match result {
            Ok(envelope) => {
                self.apply(&envelope);
                self.state.lock().backoff.reset();
                self.schedule(Duration::ZERO);
            }
            Err(error) => {
                let delay = self.state.lock().backoff.on_failure();
                warn!(
                    identity = %self.dispatcher.identity(),
                    error = %error,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "poll failed, retrying"
                );
                self.dispatcher.report_error(&error);
                self.schedule(delay);
            }
        }
    }

    fn apply(&self, envelope: &PollEnvelope) {
        let identity = self.dispatcher.identity();
        let _ = self
            .state
            .lock()
            .session
            .observe(identity, envelope.server_session_id.as_deref());

        if let Some(last) = envelope.last_event_id {
            let _ = self.dispatcher.advance_cursor(last);
        }

        let mut handshake = envelope.handshake();
        handshake.cursor = Some(self.dispatcher.cursor());
        let _ = self.dispatcher.deliver_handshake(handshake);

        let events = envelope.decode_events();
        if !events.is_empty() {
            debug!(%identity, count = events.len(), "poll delivered events");
        }
        for event in &events {
            self.dispatcher.dispatch_event(event);
        }
    }

    fn schedule(self: &Arc<Self>, delay: Duration) {
        if delay.is_zero() {
            self.kick(None);
            return;
        }
        let armed_at = self.state.lock().generation();
        let shared = Arc::clone(self);
        let _ = self.runtime.spawn(async move {
            tokio::select! {
                () = shared.shutdown.cancelled() => {}
                () = tokio::time::sleep(delay) => shared.kick(Some(armed_at)),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{PollStep, RecordingSubscriber, ScriptedFetcher, envelope};
    use assert_matches::assert_matches;
    use feedline_core::Identity;
    use serde_json::json;

    fn state() -> PollState {
        PollState::new(BackoffPolicy::default())
    }

    // ── PollState ───────────────────────────────────────────────────

    #[test]
    fn begin_is_exclusive() {
        let mut s = state();
        let (token, _) = s.begin(None).unwrap();
        assert_eq!(token, 1);
        assert!(s.begin(None).is_none());
        assert!(s.finish(token));
        assert!(s.begin(None).is_some());
    }

    #[test]
    fn pause_cancels_in_flight_and_blocks_cycles() {
        let mut s = state();
        let (token, cancel) = s.begin(None).unwrap();
        s.pause();
        assert!(cancel.is_cancelled());
        assert!(s.begin(None).is_none());
        // Stale completion is rejected and leaves state untouched
        assert!(!s.finish(token));
        assert!(s.resume());
        assert!(s.begin(None).is_some());
    }

    #[test]
    fn stale_finish_does_not_clear_newer_running_cycle() {
        let mut s = state();
        let (old, _) = s.begin(None).unwrap();
        s.pause();
        let _ = s.resume();
        let (new, _) = s.begin(None).unwrap();
        assert!(!s.finish(old));
        // New cycle still owns the slot
        assert!(s.begin(None).is_none());
        assert!(s.finish(new));
    }

    #[test]
    fn stale_timer_does_not_start_cycle() {
        let mut s = state();
        let armed = s.generation();
        s.pause();
        let _ = s.resume();
        assert!(s.begin(Some(armed)).is_none());
        let current = s.generation();
        assert!(s.begin(Some(current)).is_some());
    }

    #[test]
    fn close_is_final() {
        let mut s = state();
        s.close();
        assert!(!s.resume());
        assert!(s.begin(None).is_none());
    }

    #[test]
    fn current_token_is_applied_even_after_cancel_signal() {
        let mut s = state();
        let (token, cancel) = s.begin(None).unwrap();
        cancel.cancel();
        assert!(s.finish(token));
        // Slot was released
        assert!(s.begin(None).is_some());
    }

    // ── PollingTransport ────────────────────────────────────────────

    fn transport(fetcher: Arc<ScriptedFetcher>) -> (PollingTransport, Arc<Dispatcher>) {
        let dispatcher = Arc::new(Dispatcher::new(Identity::from("P1"), true));
        let transport = PollingTransport::new(
            dispatcher.clone(),
            fetcher,
            PollConfig::default(),
            Handle::current(),
        );
        (transport, dispatcher)
    }

    #[tokio::test(start_paused = true)]
    async fn success_advances_cursor_and_repolls_immediately() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::respond(envelope(
            "P1",
            5,
            vec![json!({"id": 3, "type": "x"}), json!({"id": 5, "type": "x"})],
        ))]);
        let (transport, dispatcher) = transport(fetcher.clone());
        let sub = RecordingSubscriber::new();
        let _ = dispatcher.add(sub.clone());

        transport.start();
        fetcher.wait_for_calls(2).await;

        let calls = fetcher.calls();
        assert_eq!(calls[0].since, 0);
        assert_eq!(calls[1].since, 5);
        assert_eq!(calls[1].at, calls[0].at);
        assert_eq!(dispatcher.cursor(), 5);
        assert_eq!(sub.event_names(), vec!["x", "x"]);
        assert_eq!(sub.handshakes().len(), 1);
        assert_eq!(sub.handshakes()[0].cursor, Some(5));
        transport.close();
    }

    #[tokio::test(start_paused = true)]
    async fn failures_back_off_then_reset() {
        let fetcher = ScriptedFetcher::new(vec![
            PollStep::fail(TransportError::Status { status: 500 }),
            PollStep::fail(TransportError::Status { status: 500 }),
            PollStep::fail(TransportError::Status { status: 500 }),
            PollStep::respond(envelope("P1", 0, vec![])),
            PollStep::fail(TransportError::Status { status: 500 }),
        ]);
        let (transport, dispatcher) = transport(fetcher.clone());
        let sub = RecordingSubscriber::new();
        let _ = dispatcher.add(sub.clone());

        transport.start();
        fetcher.wait_for_calls(6).await;

        assert_eq!(
            fetcher.gaps_ms(),
            vec![1000, 1700, 2890, 0, 1000],
            "retry gaps follow the backoff sequence and reset after success"
        );
        assert_eq!(sub.errors().len(), 4);
        assert_matches!(sub.errors()[0], TransportError::Status { status: 500 });
        assert_eq!(transport.backoff_ms(), 1700);
        transport.close();
    }

    #[tokio::test(start_paused = true)]
    async fn fetcher_abort_is_retried_with_backoff() {
        let fetcher = ScriptedFetcher::new(vec![
            PollStep::fail(TransportError::Aborted),
            PollStep::respond(envelope("P1", 0, vec![])),
        ]);
        let (transport, dispatcher) = transport(fetcher.clone());
        let sub = RecordingSubscriber::new();
        let _ = dispatcher.add(sub.clone());

        transport.start();
        fetcher.wait_for_calls(3).await;

        assert_eq!(fetcher.gaps_ms(), vec![1000, 0]);
        assert_eq!(sub.errors(), vec![TransportError::Aborted]);
        assert!(!transport.is_paused());
        transport.close();
    }

    #[tokio::test(start_paused = true)]
    async fn pause_aborts_in_flight_and_resume_repolls() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::Hang]);
        let (transport, dispatcher) = transport(fetcher.clone());
        let sub = RecordingSubscriber::new();
        let _ = dispatcher.add(sub.clone());

        transport.start();
        fetcher.wait_for_calls(1).await;
        assert!(transport.is_running());

        let before = transport.generation();
        transport.pause();
        assert!(transport.generation() > before);
        assert!(transport.is_paused());
        assert!(!transport.is_running());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fetcher.calls().len(), 1);
        assert_eq!(fetcher.max_in_flight(), 1);
        assert!(sub.errors().is_empty(), "abort is not reported");

        transport.resume();
        fetcher.wait_for_calls(2).await;
        transport.close();
    }

    #[tokio::test(start_paused = true)]
    async fn close_stops_all_activity() {
        let fetcher = ScriptedFetcher::new(vec![PollStep::fail(TransportError::Network {
            message: "down".into(),
        })]);
        let (transport, _dispatcher) = transport(fetcher.clone());

        transport.start();
        fetcher.wait_for_calls(1).await;
        transport.close();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fetcher.calls().len(), 1);
    }
}
