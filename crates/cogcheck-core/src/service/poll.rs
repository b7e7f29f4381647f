use super::{ConversionService, JobStatus, ServiceError};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Poll cadence and overall deadline for one job. Serialized in whole
/// seconds as `intervalSeconds` / `timeoutSeconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PollPolicySeconds", into = "PollPolicySeconds")]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
struct PollPolicySeconds {
    interval_seconds: u64,
    timeout_seconds: u64,
}

impl Default for PollPolicySeconds {
    fn default() -> Self {
        PollPolicy::default().into()
    }
}

impl From<PollPolicySeconds> for PollPolicy {
    fn from(seconds: PollPolicySeconds) -> Self {
        Self {
            interval: Duration::from_secs(seconds.interval_seconds),
            timeout: Duration::from_secs(seconds.timeout_seconds),
        }
    }
}

impl From<PollPolicy> for PollPolicySeconds {
    fn from(policy: PollPolicy) -> Self {
        Self {
            interval_seconds: policy.interval.as_secs(),
            timeout_seconds: policy.timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded(JobStatus),
    Failed { message: String, status: JobStatus },
    TimedOut { last: JobStatus, waited: Duration },
}

impl JobOutcome {
    pub fn describe(&self) -> String {
        match self {
            Self::Succeeded(status) => format!("job {} succeeded", status.job_id),
            Self::Failed { message, status } => {
                format!("job {} ended {}: {}", status.job_id, status.state, message)
            }
            Self::TimedOut { last, waited } => format!(
                "job {} still {} after {}s",
                last.job_id,
                last.state,
                waited.as_secs()
            ),
        }
    }
}

/// Polls until the job reaches a terminal state or the policy timeout
/// elapses. Transport errors end the wait immediately.
pub fn wait_for_terminal(
    service: &dyn ConversionService,
    submitted: JobStatus,
    policy: &PollPolicy,
) -> Result<JobOutcome, ServiceError> {
    let started = Instant::now();
    let mut status = submitted;

    loop {
        if status.state.is_terminal() {
            info!(job = %status.job_id, state = %status.state, "job reached terminal state");
            return Ok(if status.state.is_success() {
                JobOutcome::Succeeded(status)
            } else {
                JobOutcome::Failed {
                    message: status.message.clone(),
                    status,
                }
            });
        }

        let waited = started.elapsed();
        if waited >= policy.timeout {
            return Ok(JobOutcome::TimedOut {
                last: status,
                waited,
            });
        }

        thread::sleep(policy.interval.min(policy.timeout - waited));
        status = service.status(&status.job_id)?;
        debug!(
            job = %status.job_id,
            state = %status.state,
            progress = status.progress,
            "polled job status"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{JobOutcome, PollPolicy, wait_for_terminal};
    use crate::service::{
        ConversionRequest, ConversionService, JobId, JobState, JobStatus, ServiceError,
    };
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    struct StateSequence {
        states: RefCell<Vec<JobState>>,
        polls: RefCell<usize>,
    }

    impl StateSequence {
        fn new(states: &[JobState]) -> Self {
            Self {
                states: RefCell::new(states.iter().rev().copied().collect()),
                polls: RefCell::new(0),
            }
        }
    }

    fn status(state: JobState) -> JobStatus {
        JobStatus {
            job_id: JobId("job-1".to_string()),
            state,
            message: format!("job is {}", state),
            progress: 0,
            links: Vec::new(),
        }
    }

    impl ConversionService for StateSequence {
        fn submit(&self, _request: &ConversionRequest) -> Result<JobStatus, ServiceError> {
            Err(ServiceError::Protocol("submit is not used here".to_string()))
        }

        fn status(&self, _job_id: &JobId) -> Result<JobStatus, ServiceError> {
            *self.polls.borrow_mut() += 1;
            let mut states = self.states.borrow_mut();
            let state = if states.len() > 1 {
                states.pop().unwrap_or(JobState::Running)
            } else {
                states.last().copied().unwrap_or(JobState::Running)
            };
            Ok(status(state))
        }

        fn download_results(
            &self,
            _job: &JobStatus,
            _destination: &Path,
        ) -> Result<Vec<PathBuf>, ServiceError> {
            Ok(Vec::new())
        }
    }

    fn fast_policy(timeout: Duration) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(1),
            timeout,
        }
    }

    #[test]
    fn polls_until_success() {
        let service = StateSequence::new(&[JobState::Running, JobState::Successful]);
        let outcome = wait_for_terminal(
            &service,
            status(JobState::Accepted),
            &fast_policy(Duration::from_secs(5)),
        )
        .expect("poll should complete");

        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
        assert_eq!(*service.polls.borrow(), 2);
    }

    #[test]
    fn failed_states_carry_the_job_message() {
        for terminal in [
            JobState::Failed,
            JobState::Canceled,
            JobState::CompleteWithErrors,
        ] {
            let service = StateSequence::new(&[terminal]);
            let outcome = wait_for_terminal(
                &service,
                status(JobState::Running),
                &fast_policy(Duration::from_secs(5)),
            )
            .expect("poll should complete");
            match outcome {
                JobOutcome::Failed { message, .. } => {
                    assert_eq!(message, format!("job is {}", terminal))
                }
                other => panic!("expected failure, got {:?}", other),
            }
        }
    }

    #[test]
    fn terminal_submission_needs_no_polling() {
        let service = StateSequence::new(&[JobState::Running]);
        let outcome = wait_for_terminal(
            &service,
            status(JobState::Successful),
            &fast_policy(Duration::from_secs(5)),
        )
        .expect("poll should complete");
        assert!(matches!(outcome, JobOutcome::Succeeded(_)));
        assert_eq!(*service.polls.borrow(), 0);
    }

    #[test]
    fn never_terminal_job_times_out() {
        let service = StateSequence::new(&[JobState::Running]);
        let outcome = wait_for_terminal(
            &service,
            status(JobState::Accepted),
            &fast_policy(Duration::from_millis(20)),
        )
        .expect("poll should complete");

        match outcome {
            JobOutcome::TimedOut { last, .. } => assert_eq!(last.state, JobState::Running),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(*service.polls.borrow() >= 1);
    }

    #[test]
    fn policy_defaults_match_documented_values() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(10));
        assert_eq!(policy.timeout, Duration::from_secs(1800));

        let parsed: PollPolicy =
            serde_json::from_str(r#"{ "intervalSeconds": 2 }"#).expect("policy should parse");
        assert_eq!(parsed.interval, Duration::from_secs(2));
        assert_eq!(parsed.timeout, Duration::from_secs(1800));

        let error = serde_json::from_str::<PollPolicy>(r#"{ "interval": 2 }"#)
            .expect_err("unknown key should be rejected");
        assert!(error.to_string().contains("interval"));
    }
}
