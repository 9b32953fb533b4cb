// Scheduler metrics
// Counters for dispatched jobs and finished tasks

use adcm_persistence::JobStatus;
use metrics::{counter, describe_counter};

/// Register metric descriptions
/// Call once at startup, before the first task runs
pub fn describe_metrics() {
    describe_counter!(
        "adcm_tasks_finished_total",
        "Total number of tasks that reached a terminal status"
    );
    describe_counter!("adcm_jobs_started_total", "Total number of jobs dispatched");
}

pub fn record_job_started() {
    counter!("adcm_jobs_started_total").increment(1);
}

pub fn record_task_finished(status: JobStatus) {
    counter!("adcm_tasks_finished_total", "status" => status.as_str()).increment(1);
}
