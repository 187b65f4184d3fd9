//! Read model of the remote tier's active job, as reported by
//! `GET .../process-engine/status`. The remote tier owns every status
//! change; nothing here mutates a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job or of one of its tasks on the remote tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessEngineItemStatus {
    Enqueued,
    Processing,
    Requeued,
    Completed,
    Failed,
    Canceled,
}

impl ProcessEngineItemStatus {
    /// Nothing more will happen to an item in this status.
    pub fn is_done(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for ProcessEngineItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Enqueued => "enqueued",
            Self::Processing => "processing",
            Self::Requeued => "requeued",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// One command of the active job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEngineTaskStatus {
    pub command_key: String,
    #[serde(default)]
    pub processing_order: u32,
    pub status: ProcessEngineItemStatus,
    #[serde(default)]
    pub requeue_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_until: Option<DateTime<Utc>>,
}

impl ProcessEngineTaskStatus {
    /// The remote tier may pick this task up at `now`.
    pub fn is_ready_for_execution(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_done() && self.backoff_until.is_none_or(|until| until <= now)
    }
}

/// Body of `GET .../process-engine/status` while a job exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEngineStatusResponse {
    pub overall_status: ProcessEngineItemStatus,
    #[serde(default)]
    pub tasks: Vec<ProcessEngineTaskStatus>,
}

impl ProcessEngineStatusResponse {
    /// Unfinished tasks by processing order.
    pub fn ordered_incomplete_tasks(&self) -> Vec<&ProcessEngineTaskStatus> {
        let mut tasks: Vec<_> = self.tasks.iter().filter(|t| !t.status.is_done()).collect();
        tasks.sort_by_key(|t| t.processing_order);
        tasks
    }

    /// The task the job is working on or waiting for.
    pub fn current_task(&self) -> Option<&ProcessEngineTaskStatus> {
        self.ordered_incomplete_tasks().into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(tasks: serde_json::Value) -> ProcessEngineStatusResponse {
        serde_json::from_value(serde_json::json!({
            "overallStatus": "Processing",
            "tasks": tasks,
        }))
        .unwrap()
    }

    #[test]
    fn incomplete_tasks_skip_done_ones_and_follow_processing_order() {
        let status = response(serde_json::json!([
            { "commandKey": "C", "processingOrder": 2, "status": "Enqueued" },
            { "commandKey": "A", "processingOrder": 0, "status": "Completed" },
            { "commandKey": "B", "processingOrder": 1, "status": "Requeued", "requeueCount": 1 },
        ]));

        let keys: Vec<_> = status
            .ordered_incomplete_tasks()
            .into_iter()
            .map(|t| t.command_key.as_str())
            .collect();
        assert_eq!(keys, vec!["B", "C"]);
        assert_eq!(status.current_task().map(|t| t.requeue_count), Some(1));
    }

    #[test]
    fn finished_job_has_no_current_task() {
        let status = response(serde_json::json!([
            { "commandKey": "A", "processingOrder": 0, "status": "Completed" },
            { "commandKey": "B", "processingOrder": 1, "status": "Failed" },
        ]));
        assert!(status.ordered_incomplete_tasks().is_empty());
        assert!(status.current_task().is_none());
    }

    #[test]
    fn backoff_delays_readiness() {
        let now = Utc::now();
        let task = ProcessEngineTaskStatus {
            command_key: "A".into(),
            processing_order: 0,
            status: ProcessEngineItemStatus::Requeued,
            requeue_count: 1,
            backoff_until: Some(now + chrono::Duration::seconds(5)),
        };
        assert!(!task.is_ready_for_execution(now));
        assert!(task.is_ready_for_execution(now + chrono::Duration::seconds(5)));

        let done = ProcessEngineTaskStatus {
            status: ProcessEngineItemStatus::Completed,
            backoff_until: None,
            ..task
        };
        assert!(!done.is_ready_for_execution(now));
    }

    #[test]
    fn minimal_task_entries_parse() {
        let status = response(serde_json::json!([{ "commandKey": "A", "status": "Processing" }]));
        assert_eq!(status.tasks[0].processing_order, 0);
        assert!(status.tasks[0].backoff_until.is_none());
    }
}
