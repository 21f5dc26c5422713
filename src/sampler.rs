//! Bounded-retry sampling of eventually-consistent cluster state
//!
//! A [`TimeoutSampler`] repeatedly invokes an async function and hands every
//! successful result to its consumer. The sampler itself never judges a
//! sample: the consumer keeps asking for the next one until it is satisfied,
//! or until the sampler reports [`AppError::Timeout`].
//!
//! ```ignore
//! let mut sampler = TimeoutSampler::new(timeout, interval, || cluster.get(&target))
//!     .describe("namespace to become Active")
//!     .tolerate(ErrorKind::NotFound);
//! loop {
//!     let status = sampler.next_sample().await?;
//!     if phase(&status) == Some("Active") {
//!         break;
//!     }
//! }
//! ```

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use futures::Stream;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{AppError, AppResult, ErrorKind};

/// An error kind the sampler swallows and retries
#[derive(Debug, Clone)]
struct ToleratedError {
    kind: ErrorKind,
    /// When non-empty, only errors whose message contains one of these are tolerated
    messages: Vec<String>,
}

impl ToleratedError {
    fn matches(&self, err: &AppError) -> bool {
        if err.kind() != self.kind {
            return false;
        }
        if self.messages.is_empty() {
            return true;
        }
        let text = err.to_string();
        self.messages.iter().any(|m| text.contains(m.as_str()))
    }
}

/// Lazy, finite sequence of samples bounded by a wall-clock timeout
pub struct TimeoutSampler<F> {
    timeout: Duration,
    interval: Duration,
    func: F,
    tolerated: Vec<ToleratedError>,
    description: String,
    started: Option<Instant>,
    attempts: u32,
    last_observation: Option<String>,
}

impl<F> Debug for TimeoutSampler<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutSampler")
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .field("interval", &self.interval)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl<F, Fut, T> TimeoutSampler<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    pub fn new(timeout: Duration, interval: Duration, func: F) -> Self {
        Self {
            timeout,
            interval,
            func,
            tolerated: Vec::new(),
            description: "sample".to_string(),
            started: None,
            attempts: 0,
            last_observation: None,
        }
    }

    /// Human-readable description used in logs and timeout errors
    pub fn describe(mut self, what: impl Into<String>) -> Self {
        self.description = what.into();
        self
    }

    /// Treat every error of `kind` as "no sample yet"
    pub fn tolerate(mut self, kind: ErrorKind) -> Self {
        self.tolerated.push(ToleratedError {
            kind,
            messages: Vec::new(),
        });
        self
    }

    /// Treat errors of `kind` as "no sample yet" only when their message
    /// contains one of `messages`; other errors of that kind propagate.
    pub fn tolerate_matching<I, S>(mut self, kind: ErrorKind, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tolerated.push(ToleratedError {
            kind,
            messages: messages.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Number of times the wrapped function has been invoked
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn is_tolerated(&self, err: &AppError) -> bool {
        self.tolerated.iter().any(|t| t.matches(err))
    }

    fn expired(&self) -> Option<AppError> {
        let started = self.started?;
        let elapsed = started.elapsed();
        if elapsed < self.timeout {
            return None;
        }
        Some(AppError::Timeout {
            what: self.description.clone(),
            elapsed,
            last_sample: self.last_observation.clone(),
        })
    }

    /// Produce the next sample.
    ///
    /// The first call invokes the function immediately and starts the clock;
    /// later calls sleep for the interval first. Once the time since the first
    /// invocation reaches the timeout, [`AppError::Timeout`] is returned
    /// without invoking the function again.
    pub async fn next_sample(&mut self) -> AppResult<T> {
        loop {
            if self.started.is_none() {
                self.started = Some(Instant::now());
            } else {
                if let Some(err) = self.expired() {
                    return Err(err);
                }
                tokio::time::sleep(self.interval).await;
                if let Some(err) = self.expired() {
                    return Err(err);
                }
            }

            self.attempts += 1;
            match (self.func)().await {
                Ok(sample) => return Ok(sample),
                Err(e) if self.is_tolerated(&e) => {
                    debug!(
                        what = %self.description,
                        attempt = self.attempts,
                        error = %e,
                        "Tolerated error while sampling"
                    );
                    self.last_observation = Some(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Consume samples until `predicate` accepts one.
    ///
    /// On timeout the error carries the `Debug` form of the last rejected sample.
    pub async fn wait_for<P>(mut self, mut predicate: P) -> AppResult<T>
    where
        P: FnMut(&T) -> bool,
        T: Debug,
    {
        loop {
            let sample = self.next_sample().await?;
            if predicate(&sample) {
                return Ok(sample);
            }
            self.last_observation = Some(format!("{:?}", sample));
        }
    }

    /// Consume samples until one equals `expected`
    pub async fn wait_for_value(self, expected: T) -> AppResult<T>
    where
        T: PartialEq + Debug,
    {
        self.wait_for(|sample| *sample == expected).await
    }

    /// Expose the samples as a stream that ends after its first error
    pub fn into_stream(self) -> impl Stream<Item = AppResult<T>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut sampler = state?;
            match sampler.next_sample().await {
                Ok(sample) => Some((Ok(sample), Some(sampler))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn not_found() -> AppError {
        AppError::NotFound("pod/virt-launcher".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_tolerated_error_times_out_within_bounds() {
        let timeout = Duration::from_secs(3);
        let interval = Duration::from_secs(1);
        let start = Instant::now();

        let mut sampler = TimeoutSampler::new(timeout, interval, || async {
            Err::<(), _>(not_found())
        })
        .tolerate(ErrorKind::NotFound);

        let err = sampler.next_sample().await.unwrap_err();
        let elapsed = start.elapsed();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + interval);
        assert!(err.last_sample().unwrap().contains("virt-launcher"));
        assert_eq!(sampler.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_nth_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let mut sampler = TimeoutSampler::new(Duration::from_secs(10), Duration::from_secs(1), || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 4 {
                    Err(not_found())
                } else {
                    Ok("ready")
                }
            }
        })
        .tolerate(ErrorKind::NotFound);

        assert_eq!(sampler.next_sample().await.unwrap(), "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_untolerated_error_propagates_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let mut sampler = TimeoutSampler::new(Duration::from_secs(10), Duration::from_secs(1), || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(AppError::Conflict("stale".to_string())) }
        })
        .tolerate(ErrorKind::NotFound);

        let err = sampler.next_sample().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_attempts_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let mut sampler = TimeoutSampler::new(Duration::ZERO, Duration::from_secs(1), || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Ok(false) }
        });

        assert!(!sampler.next_sample().await.unwrap());
        let err = sampler.next_sample().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_is_not_delayed() {
        let start = Instant::now();
        let mut sampler =
            TimeoutSampler::new(Duration::from_secs(5), Duration::from_secs(2), || async { Ok(1) });

        sampler.next_sample().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        sampler.next_sample().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tolerate_matching_only_swallows_listed_messages() {
        let mut sampler = TimeoutSampler::new(Duration::from_secs(5), Duration::from_secs(1), || async {
            Err::<(), _>(AppError::Command("connection refused".to_string()))
        })
        .tolerate_matching(ErrorKind::Command, ["timed out"]);

        let err = sampler.next_sample().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Command);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_reports_last_rejected_sample() {
        let phases = Arc::new(AtomicU32::new(0));
        let p = phases.clone();

        let err = TimeoutSampler::new(Duration::from_secs(3), Duration::from_secs(1), || {
            let p = p.clone();
            async move { Ok(format!("Terminating-{}", p.fetch_add(1, Ordering::SeqCst))) }
        })
        .describe("namespace to be Active")
        .wait_for(|phase| phase == "Active")
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.last_sample(), Some("\"Terminating-2\""));
        assert!(err.to_string().contains("namespace to be Active"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_value() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let value = TimeoutSampler::new(Duration::from_secs(10), Duration::from_secs(1), || {
            let c = c.clone();
            async move { Ok(c.fetch_add(1, Ordering::SeqCst)) }
        })
        .wait_for_value(3)
        .await
        .unwrap();

        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_after_timeout() {
        let stream =
            TimeoutSampler::new(Duration::from_secs(2), Duration::from_secs(1), || async { Ok(7) })
                .into_stream();
        futures::pin_mut!(stream);

        let items: Vec<_> = stream.collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[..2].iter().all(|i| matches!(i, Ok(7))));
        assert_eq!(items[2].as_ref().unwrap_err().kind(), ErrorKind::Timeout);
    }
}
