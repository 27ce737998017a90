//! Convergence poller
//!
//! One wait primitive for every "mutation issued, now wait for the cluster to
//! catch up" step. A [`Probe`] reads remote state and labels it; the
//! [`ConvergenceTask`] keeps probing while the label is pending (or unknown)
//! and stops on a target label, a probe error, the timeout, or cancellation.
//!
//! ```text
//! Start -> Polling -> { Converged | Errored | TimedOut | Cancelled }
//! ```

use crate::config::ConvergenceConfig;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Label reported while a change is still propagating
pub const STATE_UPDATING: &str = "Updating";

/// Label reported once the expected state is observed
pub const STATE_READY: &str = "Ready";

/// Label reported while a deleted resource is still visible
pub const STATE_DELETING: &str = "Deleting";

/// One labelled read of remote state
#[derive(Debug, Clone, PartialEq)]
pub struct Observation<T> {
    pub state: String,
    pub value: Option<T>,
}

impl<T> Observation<T> {
    /// An observation carrying no value
    pub fn labelled(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            value: None,
        }
    }

    /// An observation carrying the value that was read
    pub fn with_value(state: impl Into<String>, value: T) -> Self {
        Self {
            state: state.into(),
            value: Some(value),
        }
    }
}

/// Reads and labels remote state for a convergence wait
///
/// A returned error ends the wait immediately.
#[async_trait]
pub trait Probe: Send {
    type Output: Send;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn refresh(&mut self) -> Result<Observation<Self::Output>>;
}

/// Outcome of a successful wait
#[derive(Debug, Clone, PartialEq)]
pub struct Converged<T> {
    /// Value of the final (target) observation
    pub value: Option<T>,
    /// Target label that ended the wait
    pub state: String,
    /// Number of probes issued
    pub probes: u32,
    /// Time spent waiting, including the initial delay
    pub elapsed: Duration,
}

/// A pending convergence wait
pub struct ConvergenceTask<P> {
    resource: String,
    pending: Vec<String>,
    target: Vec<String>,
    config: ConvergenceConfig,
    probe: P,
}

impl<P: Probe> ConvergenceTask<P> {
    /// Wait for `resource` with the default `Updating -> Ready` vocabulary
    pub fn new(resource: impl Into<String>, probe: P, config: &ConvergenceConfig) -> Self {
        Self {
            resource: resource.into(),
            pending: vec![STATE_UPDATING.to_string()],
            target: vec![STATE_READY.to_string()],
            config: config.clone(),
            probe,
        }
    }

    pub fn pending(mut self, states: &[&str]) -> Self {
        self.pending = states.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn target(mut self, states: &[&str]) -> Self {
        self.target = states.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Probe until a target label is observed
    ///
    /// # Errors
    ///
    /// - the probe's own error, as soon as it is returned
    /// - [`OperatorError::ConvergenceTimeout`] with the last observed label
    /// - [`OperatorError::Cancelled`] when `cancel` fires
    #[instrument(skip_all, fields(resource = %self.resource, probe = self.probe.name()))]
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<Converged<P::Output>> {
        let start = Instant::now();
        let deadline = start + self.config.timeout;
        let mut interval = self.config.poll_interval;
        let mut probes: u32 = 0;

        if !self.config.delay.is_zero() {
            self.pause(self.config.delay, cancel).await?;
        }

        loop {
            let observation = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                result = self.probe.refresh() => result,
            };
            probes += 1;

            let observation = match observation {
                Ok(observation) => observation,
                Err(e) => {
                    warn!(probes, error = %e, "Convergence probe failed");
                    return Err(e);
                }
            };

            let elapsed = start.elapsed();
            if self.target.contains(&observation.state) {
                if elapsed >= self.config.min_timeout {
                    debug!(probes, state = %observation.state, ?elapsed, "Resource converged");
                    return Ok(Converged {
                        value: observation.value,
                        state: observation.state,
                        probes,
                        elapsed,
                    });
                }
                debug!(
                    probes,
                    state = %observation.state,
                    "Target observed before the minimum wait, confirming"
                );
            } else if self.pending.contains(&observation.state) {
                debug!(probes, state = %observation.state, "Still converging");
            } else {
                warn!(probes, state = %observation.state, "Unexpected convergence state, retrying");
            }
            let last_state = observation.state;

            let now = Instant::now();
            if now >= deadline {
                warn!(probes, last_state = %last_state, "Convergence timed out");
                return Err(OperatorError::ConvergenceTimeout {
                    resource: self.resource.clone(),
                    last_state,
                });
            }

            self.pause(interval.min(deadline - now), cancel).await?;
            interval = self.config.next_interval(interval);
        }
    }

    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(self.cancelled()),
            _ = sleep(duration) => Ok(()),
        }
    }

    fn cancelled(&self) -> OperatorError {
        debug!(resource = %self.resource, "Convergence wait cancelled");
        OperatorError::Cancelled {
            resource: self.resource.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Probe that replays a script of labels, repeating the last one
    struct ScriptedProbe {
        script: Vec<std::result::Result<&'static str, &'static str>>,
        calls: Arc<Mutex<Vec<Instant>>>,
    }

    impl ScriptedProbe {
        fn new(script: Vec<std::result::Result<&'static str, &'static str>>) -> Self {
            Self {
                script,
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn pending_then_ready(pending: usize) -> Self {
            let mut script = vec![Ok(STATE_UPDATING); pending];
            script.push(Ok(STATE_READY));
            Self::new(script)
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        type Output = usize;

        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn refresh(&mut self) -> Result<Observation<usize>> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            let index = (calls.len() - 1).min(self.script.len() - 1);
            match self.script[index] {
                Ok(state) => Ok(Observation::with_value(state, calls.len())),
                Err(msg) => Err(OperatorError::Gateway(msg.to_string())),
            }
        }
    }

    fn fast_config() -> ConvergenceConfig {
        ConvergenceConfig {
            timeout: Duration::from_secs(10),
            delay: Duration::ZERO,
            poll_interval: Duration::from_secs(1),
            min_timeout: Duration::ZERO,
            max_poll_interval: Duration::from_secs(10),
            backoff_multiplier: 1.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_pending_probes() {
        let probe = ScriptedProbe::pending_then_ready(3);
        let calls = probe.calls.clone();

        let converged = ConvergenceTask::new("topic orders", probe, &fast_config())
            .wait(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(converged.probes, 4);
        assert_eq!(converged.state, STATE_READY);
        assert_eq!(converged.value, Some(4));

        let calls = calls.lock().unwrap();
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_pending_times_out() {
        let probe = ScriptedProbe::new(vec![Ok(STATE_UPDATING)]);
        let calls = probe.calls.clone();

        let err = ConvergenceTask::new("topic orders", probe, &fast_config())
            .wait(&CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            OperatorError::ConvergenceTimeout {
                resource,
                last_state,
            } => {
                assert_eq!(resource, "topic orders");
                assert_eq!(last_state, STATE_UPDATING);
            }
            other => panic!("expected timeout, got {other}"),
        }
        // One probe at t=0 plus one per second up to the deadline
        assert_eq!(calls.lock().unwrap().len(), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_stops_polling() {
        let probe =
            ScriptedProbe::new(vec![Ok(STATE_UPDATING), Err("403 forbidden"), Ok(STATE_READY)]);
        let calls = probe.calls.clone();

        let err = ConvergenceTask::new("topic orders", probe, &fast_config())
            .wait(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, OperatorError::Gateway(ref msg) if msg == "403 forbidden"));
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_state_retried_until_timeout() {
        let probe = ScriptedProbe::new(vec![Ok("3 != 6")]);

        let err = ConvergenceTask::new("topic orders", probe, &fast_config())
            .wait(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OperatorError::ConvergenceTimeout { ref last_state, .. } if last_state == "3 != 6"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_state_then_target_converges() {
        let probe = ScriptedProbe::new(vec![Ok("rebalancing"), Ok(STATE_READY)]);

        let converged = ConvergenceTask::new("topic orders", probe, &fast_config())
            .wait(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(converged.probes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_timeout_distrusts_early_target() {
        let probe = ScriptedProbe::new(vec![Ok(STATE_READY)]);
        let config = ConvergenceConfig {
            min_timeout: Duration::from_secs(2),
            ..fast_config()
        };

        let converged = ConvergenceTask::new("topic orders", probe, &config)
            .wait(&CancellationToken::new())
            .await
            .unwrap();

        // Reads at t=0 and t=1 are not trusted, t=2 is
        assert_eq!(converged.probes, 3);
        assert!(converged.elapsed >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_delay() {
        let probe = ScriptedProbe::new(vec![Ok(STATE_READY)]);
        let calls = probe.calls.clone();
        let config = ConvergenceConfig {
            delay: Duration::from_secs(1),
            ..fast_config()
        };
        let start = Instant::now();

        ConvergenceTask::new("topic orders", probe, &config)
            .wait(&CancellationToken::new())
            .await
            .unwrap();

        assert!(calls.lock().unwrap()[0] - start >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_vocabulary() {
        let probe = ScriptedProbe::new(vec![Ok(STATE_DELETING), Ok("Gone")]);

        let converged = ConvergenceTask::new("topic orders", probe, &fast_config())
            .pending(&[STATE_DELETING])
            .target(&["Gone"])
            .wait(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(converged.state, "Gone");
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_interval() {
        let probe = ScriptedProbe::pending_then_ready(3);
        let calls = probe.calls.clone();
        let config = ConvergenceConfig {
            timeout: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_poll_interval: Duration::from_secs(3),
            ..fast_config()
        };

        ConvergenceTask::new("topic orders", probe, &config)
            .wait(&CancellationToken::new())
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(3)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_backoff_saturates_and_times_out() {
        let probe = ScriptedProbe::new(vec![Ok(STATE_UPDATING)]);
        let calls = probe.calls.clone();
        let config = ConvergenceConfig {
            timeout: Duration::from_secs(30),
            backoff_multiplier: 1.0e20,
            ..fast_config()
        };
        config.validate().unwrap();

        let err = ConvergenceTask::new("topic orders", probe, &config)
            .wait(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, OperatorError::ConvergenceTimeout { .. }));
        // Probes at t=0, 1, 11, 21 and the deadline at 30
        let calls = calls.lock().unwrap();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(9),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let probe = ScriptedProbe::new(vec![Ok(STATE_UPDATING)]);
        let calls = probe.calls.clone();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ConvergenceTask::new("topic orders", probe, &fast_config())
            .wait(&cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, OperatorError::Cancelled { .. }));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_polling() {
        let probe = ScriptedProbe::new(vec![Ok(STATE_UPDATING)]);
        let calls = probe.calls.clone();
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            canceller.cancel();
        });

        let err = ConvergenceTask::new("topic orders", probe, &fast_config())
            .wait(&cancel)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            OperatorError::Cancelled { ref resource } if resource == "topic orders"
        ));
        // Probes at t=0, 1 and 2 only
        assert_eq!(calls.lock().unwrap().len(), 3);
    }
}
