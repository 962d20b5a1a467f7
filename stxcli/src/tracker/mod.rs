//! Status tracking: poll a probe until it reports an expected state.
//!
//! Administrative commands (`system application-apply`, `system
//! load-import`) return at once with an intermediate state. The caller then
//! tracks the resource until it reaches its post-condition state, hits a
//! `*-failed` state, or the deadline passes.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stxcli::tracker::{TrackSpec, track};
//!
//! # async fn app_status() -> Result<String, stxcli::Error> { Ok("applied".into()) }
//! # async fn example() -> Result<(), stxcli::Error> {
//! let spec = TrackSpec::new("stx-openstack applied", Duration::from_secs(3600), Duration::from_secs(30))
//!     .expect("applied".to_string())
//!     .fail_on("apply-failed".to_string());
//! let status = track(&spec, app_status).await?.into_result()?;
//! assert_eq!(status, "applied");
//! # Ok(())
//! # }
//! ```

mod clock;

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use clock::{Clock, TokioClock};

use crate::error::{Result, TrackError};

/// Shortest pause between probes; smaller intervals are raised to it.
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

/// What to wait for and for how long.
#[derive(Debug, Clone)]
pub struct TrackSpec<T> {
    description: String,
    timeout: Duration,
    interval: Duration,
    expected: Vec<T>,
    failure: Vec<T>,
    cancel: Option<CancellationToken>,
}

impl<T: PartialEq> TrackSpec<T> {
    pub fn new(description: impl Into<String>, timeout: Duration, interval: Duration) -> Self {
        let description = description.into();
        if interval < MIN_INTERVAL {
            warn!("{}: poll interval {:?} raised to {:?}", description, interval, MIN_INTERVAL);
        }
        Self {
            description,
            timeout,
            interval: interval.max(MIN_INTERVAL),
            expected: Vec::new(),
            failure: Vec::new(),
            cancel: None,
        }
    }

    /// Add a value that ends tracking successfully.
    pub fn expect(mut self, value: T) -> Self {
        self.expected.push(value);
        self
    }

    pub fn expect_any(mut self, values: impl IntoIterator<Item = T>) -> Self {
        self.expected.extend(values);
        self
    }

    /// Add a value that ends tracking as a terminal failure.
    pub fn fail_on(mut self, value: T) -> Self {
        self.failure.push(value);
        self
    }

    pub fn fail_on_any(mut self, values: impl IntoIterator<Item = T>) -> Self {
        self.failure.extend(values);
        self
    }

    /// Stop at the next poll boundary once `token` is cancelled.
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn classify(&self, value: &T) -> Option<Verdict> {
        if self.expected.contains(value) {
            Some(Verdict::Reached)
        } else if self.failure.contains(value) {
            Some(Verdict::Failed)
        } else {
            None
        }
    }
}

impl TrackSpec<String> {
    /// Spec for string states, the usual shape for `system` status fields.
    pub fn for_states(
        description: impl Into<String>,
        expected: &[&str],
        failure: &[&str],
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self::new(description, timeout, interval)
            .expect_any(expected.iter().map(|s| s.to_string()))
            .fail_on_any(failure.iter().map(|s| s.to_string()))
    }
}

enum Verdict {
    Reached,
    Failed,
}

/// How tracking ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome<T> {
    /// The probe returned an expected value.
    Reached(T),
    /// The probe returned a failure value.
    FailedTerminal(T),
    /// The deadline passed; holds the last observed value.
    TimedOut(Option<T>),
}

/// Outcome plus bookkeeping.
#[derive(Debug, Clone)]
pub struct TrackReport<T> {
    pub outcome: TrackOutcome<T>,
    pub description: String,
    pub elapsed: Duration,
    pub probes: usize,
}

impl<T: Debug> TrackReport<T> {
    pub fn is_reached(&self) -> bool {
        matches!(self.outcome, TrackOutcome::Reached(_))
    }

    /// The reached value, or the failure as an error.
    pub fn into_result(self) -> Result<T> {
        match self.outcome {
            TrackOutcome::Reached(value) => Ok(value),
            TrackOutcome::FailedTerminal(value) => Err(TrackError::FailedTerminal {
                description: self.description,
                observed: render(&value),
            }
            .into()),
            TrackOutcome::TimedOut(last) => Err(TrackError::TimedOut {
                description: self.description,
                elapsed: self.elapsed,
                last: last.as_ref().map(render),
            }
            .into()),
        }
    }
}

fn render<T: Debug>(value: &T) -> String {
    format!("{value:?}").trim_matches('"').to_string()
}

/// Step-wise tracking for callers that drive the probe themselves.
///
/// Useful when the probe needs `&mut` access to something the caller also
/// holds, such as a session:
///
/// ```rust,no_run
/// # use std::time::Duration;
/// # use stxcli::tracker::{Poller, TrackSpec};
/// # async fn probe() -> bool { true }
/// # async fn example() -> Result<(), stxcli::Error> {
/// let spec = TrackSpec::new("file present", Duration::from_secs(60), Duration::from_secs(5)).expect(true);
/// let mut poller = Poller::new(&spec);
/// let report = loop {
///     if let Some(report) = poller.observe(probe().await).await? {
///         break report;
///     }
/// };
/// # Ok(())
/// # }
/// ```
pub struct Poller<'a, T> {
    spec: &'a TrackSpec<T>,
    clock: &'a dyn Clock,
    started: Instant,
    deadline: Instant,
    probes: usize,
    final_probe: bool,
}

impl<'a, T: PartialEq + Debug> Poller<'a, T> {
    /// Start tracking now on the tokio clock.
    pub fn new(spec: &'a TrackSpec<T>) -> Self {
        Self::with_clock(spec, &TokioClock)
    }

    pub fn with_clock(spec: &'a TrackSpec<T>, clock: &'a dyn Clock) -> Self {
        let started = clock.now();
        Self {
            spec,
            clock,
            started,
            deadline: started + spec.timeout,
            probes: 0,
            final_probe: false,
        }
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(self.clock.now())
    }

    /// End tracking as timed out now, keeping `last` as the last observed
    /// value.
    pub fn expire(&self, last: Option<T>) -> TrackReport<T> {
        warn!("{}: timed out after {:?}", self.spec.description, self.spec.timeout);
        self.report(TrackOutcome::TimedOut(last))
    }

    /// Feed one probe result.
    ///
    /// Returns the report once tracking is over; otherwise sleeps until the
    /// next probe is due and returns `None`.
    pub async fn observe(&mut self, value: T) -> Result<Option<TrackReport<T>>> {
        self.probes += 1;

        match self.spec.classify(&value) {
            Some(Verdict::Reached) => {
                info!("{}: reached {:?}", self.spec.description, value);
                return Ok(Some(self.report(TrackOutcome::Reached(value))));
            }
            Some(Verdict::Failed) => {
                warn!("{}: failed with {:?}", self.spec.description, value);
                return Ok(Some(self.report(TrackOutcome::FailedTerminal(value))));
            }
            None => {}
        }

        let now = self.clock.now();
        if self.final_probe || now >= self.deadline {
            warn!(
                "{}: timed out after {:?}, last observed {:?}",
                self.spec.description,
                self.spec.timeout,
                value
            );
            return Ok(Some(self.report(TrackOutcome::TimedOut(Some(value)))));
        }

        let wake = if now + self.spec.interval >= self.deadline {
            self.final_probe = true;
            self.deadline
        } else {
            now + self.spec.interval
        };
        debug!(
            "{}: observed {:?}, next probe in {:?}",
            self.spec.description,
            value,
            wake - now
        );

        match &self.spec.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(self.cancelled()),
                    _ = self.clock.sleep_until(wake) => {}
                }
            }
            None => self.clock.sleep_until(wake).await,
        }
        Ok(None)
    }

    fn cancelled(&self) -> crate::Error {
        info!("{}: cancelled", self.spec.description);
        TrackError::Cancelled {
            description: self.spec.description.clone(),
        }
        .into()
    }

    fn report(&self, outcome: TrackOutcome<T>) -> TrackReport<T> {
        TrackReport {
            outcome,
            description: self.spec.description.clone(),
            elapsed: self.clock.now() - self.started,
            probes: self.probes,
        }
    }
}

/// Polls probes against a [`Clock`].
#[derive(Clone)]
pub struct Tracker {
    clock: Arc<dyn Clock>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TokioClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Probe until `spec` is satisfied, fails or times out.
    ///
    /// The probe runs at least once and never concurrently with itself.
    /// A probe error ends tracking and is returned as is.
    pub async fn run<T, F, Fut>(&self, spec: &TrackSpec<T>, mut probe: F) -> Result<TrackReport<T>>
    where
        T: PartialEq + Debug,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut poller = Poller::with_clock(spec, &*self.clock);
        loop {
            if let Some(token) = &spec.cancel
                && token.is_cancelled()
            {
                return Err(poller.cancelled());
            }
            let value = probe().await?;
            if let Some(report) = poller.observe(value).await? {
                return Ok(report);
            }
        }
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Tracker::run`] on the tokio clock.
pub async fn track<T, F, Fut>(spec: &TrackSpec<T>, probe: F) -> Result<TrackReport<T>>
where
    T: PartialEq + Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Tracker::new().run(spec, probe).await
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::{ErrorKind, SessionError};

    fn states(sequence: &'static [&'static str]) -> impl FnMut() -> std::future::Ready<Result<String>> {
        let mut calls = 0;
        move || {
            let state = sequence[calls.min(sequence.len() - 1)];
            calls += 1;
            std::future::ready(Ok(state.to_string()))
        }
    }

    fn app_spec(timeout: u64, interval: u64) -> TrackSpec<String> {
        TrackSpec::for_states(
            "stx-openstack applied",
            &["applied"],
            &["apply-failed"],
            Duration::from_secs(timeout),
            Duration::from_secs(interval),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_reached_after_polling() {
        let report = track(&app_spec(600, 10), states(&["applying", "applying", "applied"]))
            .await
            .unwrap();
        assert_eq!(report.outcome, TrackOutcome::Reached("applied".to_string()));
        assert_eq!(report.probes, 3);
        assert!(report.elapsed >= Duration::from_secs(20));
        assert!(report.elapsed < Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_immediately() {
        let report = track(&app_spec(600, 10), states(&["applying", "apply-failed", "applied"]))
            .await
            .unwrap();
        assert_eq!(
            report.outcome,
            TrackOutcome::FailedTerminal("apply-failed".to_string())
        );
        assert_eq!(report.probes, 2);

        let err = report.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TrackerFailedTerminal);
        assert!(err.to_string().contains("'apply-failed'"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_probe_at_deadline() {
        let report = track(&app_spec(10, 3), states(&["applying"])).await.unwrap();
        // Probes at 0, 3, 6, 9 and a final one at the 10s deadline.
        assert_eq!(report.probes, 5);
        assert!(report.elapsed >= Duration::from_secs(10));
        assert!(report.elapsed < Duration::from_secs(11));
        assert_eq!(
            report.outcome,
            TrackOutcome::TimedOut(Some("applying".to_string()))
        );
        let err = report.into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_probe_can_still_succeed() {
        let report = track(&app_spec(10, 3), states(&["applying", "applying", "applying", "applying", "applied"]))
            .await
            .unwrap();
        assert!(report.is_reached());
        assert_eq!(report.probes, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_does_not_spin() {
        let spec = TrackSpec::for_states(
            "stx-openstack applied",
            &["applied"],
            &["apply-failed"],
            Duration::from_secs(1),
            Duration::ZERO,
        );
        assert_eq!(spec.interval(), MIN_INTERVAL);

        let report = track(&spec, states(&["applying"])).await.unwrap();
        // Every 100ms from 0 to 900ms, then once more at the 1s deadline.
        assert_eq!(report.probes, 11);
        assert_eq!(
            report.outcome,
            TrackOutcome::TimedOut(Some("applying".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_probes_once() {
        let report = track(&app_spec(0, 5), states(&["applying"])).await.unwrap();
        assert_eq!(report.probes, 1);
        assert!(matches!(report.outcome, TrackOutcome::TimedOut(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_at_poll_boundary() {
        let token = CancellationToken::new();
        let spec = app_spec(600, 10).cancel_on(token.clone());
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            trigger.cancel();
        });

        let probes = Arc::new(AtomicUsize::new(0));
        let counter = probes.clone();
        let err = Tracker::new()
            .run(&spec, || {
                counter.fetch_add(1, Ordering::SeqCst);
                std::future::ready(Ok("applying".to_string()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_probe_error_propagates() {
        let spec = app_spec(60, 1);
        let err = track(&spec, || {
            std::future::ready(Err::<String, _>(SessionError::Closed.into()))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectError);
    }
}
