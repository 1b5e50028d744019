//! Throughput accounting for a single byte stream.
//!
//! A [`StatsTracker`] counts bytes as they pass through a [`TrackedStream`].
//! The first chunk starts a reporter task that publishes a
//! [`StatsSnapshot`] every interval on a `watch` channel. Pausing stops the
//! reporter and the idle time is excluded from speed calculations. Ending
//! publishes one final snapshot and stops the reporter for good.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);
const MIN_INTERVAL: Duration = Duration::from_millis(20);
const MAX_DISPLAY_SECS: u64 = 86_400;
const UNKNOWN_TIME: &str = "--:--:--";

/// Point-in-time view of a transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub name: String,
    /// Whole seconds spent transferring, excluding pauses.
    pub elapsed: u64,
    pub transferred: u64,
    pub total: Option<u64>,
    /// Bytes since the previous snapshot.
    pub chunk: u64,
    /// Bytes per second, computed once more than a second has elapsed.
    pub speed: u64,
    /// Fraction in `0.0..=1.0`, rounded to three decimals.
    pub percentage: Option<f64>,
    /// Seconds remaining.
    pub eta: Option<u64>,
    pub done: bool,
}

impl StatsSnapshot {
    fn new(name: String, total: Option<u64>) -> Self {
        Self {
            name,
            elapsed: 0,
            transferred: 0,
            total,
            chunk: 0,
            speed: 0,
            percentage: None,
            eta: None,
            done: false,
        }
    }

    pub fn elapsed_display(&self) -> String {
        human_time(self.elapsed)
    }

    pub fn remaining_display(&self) -> String {
        self.eta.map_or_else(|| UNKNOWN_TIME.to_string(), human_time)
    }

    pub fn speed_display(&self) -> String {
        if self.elapsed > 1 {
            human_speed(self.speed)
        } else {
            "  -.- bps ".to_string()
        }
    }

    pub fn percentage_display(&self) -> String {
        match self.percentage {
            Some(p) => format!("{:>6}", format!("{:.1}%", (p * 1000.0).round() / 10.0)),
            None => "--.-%".to_string(),
        }
    }
}

/// `HH:MM:SS`, or `--:--:--` past one day.
pub fn human_time(seconds: u64) -> String {
    if seconds > MAX_DISPLAY_SECS {
        return UNKNOWN_TIME.to_string();
    }
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Bits per second with a binary unit, right-aligned to ten columns.
pub fn human_speed(bytes_per_sec: u64) -> String {
    const UNITS: [(&str, u64); 5] = [
        ("Gbps", 1 << 30),
        ("Mbps", 1 << 20),
        ("Kbps", 1 << 10),
        ("Bps ", 8),
        ("bps ", 1),
    ];
    let bits = bytes_per_sec.saturating_mul(8);
    let (unit, divisor) = UNITS
        .iter()
        .copied()
        .find(|(_, divisor)| bits >= *divisor)
        .unwrap_or(UNITS[UNITS.len() - 1]);
    let value = (bits as f64 / divisor as f64 * 100.0).floor() / 100.0;
    format!("{:>10}", format!("{value:.2}{unit}"))
}

struct State {
    started: Option<Instant>,
    paused_at: Option<Instant>,
    paused_for: Duration,
    transferred: u64,
    total: Option<u64>,
    last_reported: u64,
    speed: u64,
    eta: Option<u64>,
    reporter: Option<JoinHandle<()>>,
    ended: bool,
}

impl State {
    fn elapsed(&self, now: Instant) -> u64 {
        let Some(started) = self.started else {
            return 0;
        };
        let idle = self.paused_for + self.paused_at.map_or(Duration::ZERO, |p| now - p);
        (now - started).saturating_sub(idle).as_secs()
    }

    fn snapshot(&mut self, name: &str, now: Instant) -> StatsSnapshot {
        let elapsed = self.elapsed(now);
        if elapsed > 1 {
            self.speed = self.transferred / elapsed;
        }

        let mut percentage = None;
        if let Some(total) = self.total.filter(|t| *t > 0) {
            self.transferred = self.transferred.min(total);
            let ratio = self.transferred as f64 / total as f64;
            percentage = Some((ratio * 1000.0).round() / 1000.0);
            if self.speed > 0 {
                let remaining = total as f64 / self.speed as f64 - elapsed as f64;
                self.eta = Some(remaining.max(0.0).floor() as u64);
            }
        }

        let chunk = self.transferred - self.last_reported.min(self.transferred);
        self.last_reported = self.transferred;

        StatsSnapshot {
            name: name.to_string(),
            elapsed,
            transferred: self.transferred,
            total: self.total,
            chunk,
            speed: self.speed,
            percentage,
            eta: self.eta,
            done: self.ended,
        }
    }
}

struct Shared {
    name: String,
    interval: Duration,
    state: Mutex<State>,
    tx: watch::Sender<StatsSnapshot>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self) {
        let snapshot = self.state().snapshot(&self.name, Instant::now());
        self.tx.send_replace(snapshot);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(reporter) = self.state().reporter.take() {
            reporter.abort();
        }
    }
}

/// Shared handle to the statistics of one stream.
#[derive(Clone)]
pub struct StatsTracker {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for StatsTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatsTracker")
            .field("name", &self.shared.name)
            .field("interval", &self.shared.interval)
            .finish_non_exhaustive()
    }
}

impl StatsTracker {
    pub fn new(name: impl Into<String>, total: Option<u64>) -> Self {
        Self::with_interval(name, total, DEFAULT_INTERVAL)
    }

    /// Intervals below 20ms fall back to the 500ms default.
    pub fn with_interval(name: impl Into<String>, total: Option<u64>, interval: Duration) -> Self {
        let name = name.into();
        let interval = if interval < MIN_INTERVAL {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        let (tx, _) = watch::channel(StatsSnapshot::new(name.clone(), total));
        let state = State {
            started: None,
            paused_at: None,
            paused_for: Duration::ZERO,
            transferred: 0,
            total,
            last_reported: 0,
            speed: 0,
            eta: None,
            reporter: None,
            ended: false,
        };
        Self {
            shared: Arc::new(Shared {
                name,
                interval,
                state: Mutex::new(state),
                tx,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    pub fn total(&self) -> Option<u64> {
        self.shared.state().total
    }

    pub fn subscribe(&self) -> watch::Receiver<StatsSnapshot> {
        self.shared.tx.subscribe()
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> StatsSnapshot {
        self.shared.tx.borrow().clone()
    }

    /// Count `len` more bytes, starting the reporter if it is not running.
    pub fn record(&self, len: u64) {
        let now = Instant::now();
        let mut state = self.shared.state();
        if state.ended {
            return;
        }
        state.started.get_or_insert(now);
        if let Some(paused_at) = state.paused_at.take() {
            state.paused_for += now - paused_at;
        }
        state.transferred += len;
        if state.reporter.is_none() {
            state.reporter = Some(tokio::spawn(report_loop(
                Arc::downgrade(&self.shared),
                self.shared.interval,
            )));
        }
    }

    /// Stop reporting until the next chunk or [`resume`](Self::resume).
    pub fn pause(&self) {
        let mut state = self.shared.state();
        if state.ended || state.paused_at.is_some() || state.started.is_none() {
            return;
        }
        if let Some(reporter) = state.reporter.take() {
            reporter.abort();
        }
        state.paused_at = Some(Instant::now());
    }

    /// Close the current pause window. Reporting restarts with the next chunk.
    pub fn resume(&self) {
        let mut state = self.shared.state();
        if let Some(paused_at) = state.paused_at.take() {
            state.paused_for += Instant::now() - paused_at;
        }
    }

    /// Finish the stream: backfill an unknown total, publish a final
    /// snapshot and stop the reporter. Later calls do nothing.
    pub fn end(&self) {
        let snapshot = {
            let mut state = self.shared.state();
            if state.ended {
                return;
            }
            state.ended = true;
            if let Some(paused_at) = state.paused_at.take() {
                state.paused_for += Instant::now() - paused_at;
            }
            if state.total.is_none() {
                state.total = Some(state.transferred);
            }
            if let Some(reporter) = state.reporter.take() {
                reporter.abort();
            }
            state.snapshot(&self.shared.name, Instant::now())
        };
        self.shared.tx.send_replace(snapshot);
    }

    /// Stop the reporter without publishing, for streams that failed.
    fn halt(&self) {
        let mut state = self.shared.state();
        if let Some(reporter) = state.reporter.take() {
            reporter.abort();
        }
    }
}

async fn report_loop(shared: Weak<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.report();
    }
}

/// Stream adapter feeding a [`StatsTracker`].
///
/// Elapsed time runs from the first chunk to the end of the stream. A
/// consumer that stops polling on purpose brackets the gap with
/// [`StatsTracker::pause`] and [`StatsTracker::resume`] through
/// [`tracker`](Self::tracker) or the tracker handed out in
/// [`TrackedFile::stats`](crate::TrackedFile).
pub struct TrackedStream<S> {
    inner: S,
    tracker: StatsTracker,
    finished: bool,
}

impl<S> TrackedStream<S> {
    pub fn new(inner: S, tracker: StatsTracker) -> Self {
        Self {
            inner,
            tracker,
            finished: false,
        }
    }

    pub fn tracker(&self) -> &StatsTracker {
        &self.tracker
    }
}

impl<S> Stream for TrackedStream<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.tracker.record(chunk.len() as u64);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                if !this.finished {
                    this.finished = true;
                    this.tracker.end();
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

impl<S> Drop for TrackedStream<S> {
    fn drop(&mut self) {
        if !self.finished {
            self.tracker.halt();
        }
    }
}
