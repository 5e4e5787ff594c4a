//! Property-based tests for replay invariants.

mod common;

use common::*;
use proptest::prelude::*;
use replayflow::runtime::WorkflowRegistry;
use replayflow::{HistoryEvent, OrchestrationContext, TaskFuture, WorkflowError, Worker, when_all};

/// Fans out `count` activities, then joins their results in call order.
fn fan_out_worker() -> Worker {
    let workflows = WorkflowRegistry::builder()
        .register("FanOut", |ctx: OrchestrationContext, input: String| async move {
            let count: usize = input.parse().unwrap_or(0);
            let calls: Vec<TaskFuture<String>> = (0..count)
                .map(|i| ctx.call_activity(&format!("Step{i}"), &i))
                .collect();
            let results = when_all(calls).await;
            let mut out = Vec::with_capacity(results.len());
            for result in results {
                out.push(result?);
            }
            Ok::<_, WorkflowError>(out.join(","))
        })
        .build();
    workflow_worker(workflows)
}

fn scheduled(count: usize) -> Vec<HistoryEvent> {
    (0..count)
        .map(|i| HistoryEvent::task_scheduled(i as i32, format!("Step{i}"), None))
        .collect()
}

fn completed(id: usize) -> HistoryEvent {
    HistoryEvent::task_completed(-1, Some(id as i32), Some(format!("\"r{id}\"")))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// The same history prefix always yields the same actions.
    #[test]
    fn prop_replay_is_idempotent(count in 1usize..6, done in proptest::collection::vec(any::<bool>(), 6)) {
        let worker = fan_out_worker();
        let input = count.to_string();
        let mut past = vec![started("FanOut", Some(&input))];
        past.extend(scheduled(count));
        for (id, finished) in done.iter().take(count).enumerate() {
            if *finished {
                past.push(completed(id));
            }
        }

        let first = run_pass(&worker, past.clone(), vec![]);
        let second = run_pass(&worker, past, vec![]);
        prop_assert_eq!(&first, &second);
        // Everything was already scheduled, so only a completion can appear.
        prop_assert!(first.actions.len() <= 1);
    }

    /// Completions resolve their own task whatever order they arrive in.
    #[test]
    fn prop_arrival_order_does_not_swap_results(order in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle()) {
        let worker = fan_out_worker();
        let mut past = vec![started("FanOut", Some("4"))];
        past.extend(scheduled(4));
        let new: Vec<HistoryEvent> = order.iter().map(|id| completed(*id)).collect();

        let response = run_pass(&worker, past, new);
        let done = completion(&response).expect("all tasks completed");
        prop_assert_eq!(done.result.as_str(), "r0,r1,r2,r3");
    }

    /// A fresh pass schedules each call exactly once.
    #[test]
    fn prop_first_pass_schedules_every_call_once(count in 0usize..8) {
        let worker = fan_out_worker();
        let input = count.to_string();
        let response = run_pass(&worker, vec![], vec![started("FanOut", Some(&input))]);
        let names = scheduled_names(&response);
        prop_assert_eq!(names.len(), count);
        let ids: Vec<i32> = response.actions.iter().map(|a| a.id).collect();
        let expected: Vec<i32> = (0..count as i32).collect();
        if count > 0 {
            prop_assert_eq!(ids, expected);
        }
    }
}
