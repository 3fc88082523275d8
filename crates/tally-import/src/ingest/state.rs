//! Job state machine
//!
//! Every status change is checked against [`allowed_sources`] and persisted
//! as a compare-and-set, so a worker transition that loses a race against a
//! cancellation leaves the job cancelled.

use super::models::JobStatus;

/// Statuses from which `to` may be entered
pub fn allowed_sources(to: JobStatus) -> &'static [JobStatus] {
    use JobStatus::*;
    match to {
        Pending => &[Failed, Cancelled],
        Queued => &[Pending],
        Downloading => &[Queued],
        Extracting => &[Downloading],
        Processing => &[Extracting],
        Completed => &[Processing],
        Failed => &[Pending, Queued, Downloading, Extracting, Processing],
        Cancelled => &[Pending, Queued, Downloading, Extracting, Processing],
    }
}

pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    allowed_sources(to).contains(&from)
}

/// Human-readable stage shown alongside the status
pub fn stage_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "Waiting to be queued",
        JobStatus::Queued => "Waiting for the worker",
        JobStatus::Downloading => "Downloading archive",
        JobStatus::Extracting => "Extracting data file",
        JobStatus::Processing => "Inserting rows",
        JobStatus::Completed => "Completed",
        JobStatus::Failed => "Failed",
        JobStatus::Cancelled => "Cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_edges() {
        let path = [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Downloading,
            JobStatus::Extracting,
            JobStatus::Processing,
            JobStatus::Completed,
        ];
        for pair in path.windows(2) {
            assert!(can_transition(pair[0], pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_terminal_states() {
        for to in JobStatus::ALL {
            assert!(!can_transition(JobStatus::Completed, to), "completed -> {}", to);
        }
        assert!(can_transition(JobStatus::Failed, JobStatus::Pending));
        assert!(can_transition(JobStatus::Cancelled, JobStatus::Pending));
        assert!(!can_transition(JobStatus::Cancelled, JobStatus::Failed));
        assert!(!can_transition(JobStatus::Failed, JobStatus::Cancelled));
    }

    #[test]
    fn test_no_skipping_forward() {
        assert!(!can_transition(JobStatus::Pending, JobStatus::Processing));
        assert!(!can_transition(JobStatus::Downloading, JobStatus::Completed));
        assert!(!can_transition(JobStatus::Queued, JobStatus::Extracting));
    }

    #[test]
    fn test_every_non_terminal_status_can_be_cancelled_or_failed() {
        for from in JobStatus::ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert!(can_transition(from, JobStatus::Cancelled));
            assert!(can_transition(from, JobStatus::Failed));
        }
    }
}
