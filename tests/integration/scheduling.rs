//! Scheduler behaviour under each strategy with a deterministic executor.

use std::sync::Arc;
use std::time::Duration;

use conclave::core::{detect_cycles, topological_sort};
use conclave::orchestration::{concurrency_budget, ExecutionStrategy, Scheduler, StepState};
use conclave::Error;

use crate::fixtures::{diamond, independent_steps, step, FakeExecutor, Script};

fn scheduler(
    executor: FakeExecutor,
    strategy: ExecutionStrategy,
    max_agents: usize,
) -> Scheduler<FakeExecutor> {
    Scheduler::new(Arc::new(executor), strategy, max_agents)
}

#[tokio::test]
async fn test_sequential_never_overlaps() {
    let s = scheduler(FakeExecutor::new(), ExecutionStrategy::Sequential, 8);
    let report = s.run(&independent_steps(5)).await.unwrap();

    assert_eq!(report.results.len(), 5);
    assert_eq!(s.executor().peak(), 1);
}

#[tokio::test]
async fn test_parallel_reaches_but_never_exceeds_max() {
    let executor = FakeExecutor::new().with_delay(Duration::from_millis(60));
    let s = scheduler(executor, ExecutionStrategy::Parallel, 4);
    let report = s.run(&independent_steps(10)).await.unwrap();

    assert_eq!(report.results.len(), 10);
    assert_eq!(s.executor().peak(), 4);
}

#[tokio::test]
async fn test_hybrid_uses_half_of_max_with_floor_of_two() {
    for (max, expected) in [(1, 2), (3, 2), (6, 3), (9, 4)] {
        assert_eq!(concurrency_budget(ExecutionStrategy::Hybrid, max), expected);

        let executor = FakeExecutor::new().with_delay(Duration::from_millis(40));
        let s = scheduler(executor, ExecutionStrategy::Hybrid, max);
        assert_eq!(s.budget(), expected);
        s.run(&independent_steps(12)).await.unwrap();
        assert!(
            s.executor().peak() <= expected,
            "max {max}: peak {} > budget {expected}",
            s.executor().peak()
        );
    }
}

#[tokio::test]
async fn test_diamond_respects_dependencies() {
    let s = scheduler(FakeExecutor::new(), ExecutionStrategy::Parallel, 4);
    let report = s.run(&diamond()).await.unwrap();
    assert!(report.is_success());

    let started = s.executor().started();
    let pos = |id: &str| started.iter().position(|s| s == id).unwrap();
    assert_eq!(pos("a"), 0);
    assert!(pos("b") < pos("d"));
    assert!(pos("c") < pos("d"));
    assert_eq!(pos("d"), 3);
}

#[tokio::test]
async fn test_failure_blocks_transitive_dependents_only() {
    let executor = FakeExecutor::new().script("a", Script::Fail("lint failed".into()));
    let s = scheduler(executor, ExecutionStrategy::Parallel, 4);
    let mut steps = diamond();
    steps.push(step("side"));

    let report = s.run(&steps).await.unwrap();

    assert_eq!(report.results.len(), 2);
    assert_eq!(report.failed(), vec![("a", "lint failed")]);
    assert_eq!(report.state_of("side"), StepState::Completed);
    for id in ["b", "c", "d"] {
        assert_eq!(report.state_of(id), StepState::Blocked, "{id}");
        assert!(report.result_for(id).is_none());
    }
    assert!(!s.executor().started().iter().any(|id| id == "d"));
}

#[tokio::test]
async fn test_executor_error_is_isolated_to_its_step() {
    let executor = FakeExecutor::new().script("step-1", Script::Error("agent crashed".into()));
    let s = scheduler(executor, ExecutionStrategy::Parallel, 4);
    let report = s.run(&independent_steps(3)).await.unwrap();

    assert_eq!(report.results.len(), 3);
    assert_eq!(report.succeeded().len(), 2);
    let failed = report.result_for("step-1").unwrap();
    assert!(failed.error.as_deref().unwrap().contains("agent crashed"));
}

#[tokio::test]
async fn test_cyclic_set_is_refused_without_running_anything() {
    let steps = vec![
        step("a").depends_on(["c"]),
        step("b").depends_on(["a"]),
        step("c").depends_on(["b"]),
        step("free"),
    ];
    assert!(detect_cycles(&steps).unwrap());
    assert!(matches!(topological_sort(&steps), Err(Error::CycleDetected(_))));

    let s = scheduler(FakeExecutor::new(), ExecutionStrategy::Parallel, 4);
    let err = tokio::time::timeout(Duration::from_secs(5), s.run(&steps))
        .await
        .expect("scheduler must not hang on a cycle")
        .unwrap_err();
    assert!(matches!(err, Error::CycleDetected(_)));
    assert!(s.executor().started().is_empty());
}

#[tokio::test]
async fn test_priority_then_input_order_among_ready() {
    let s = scheduler(FakeExecutor::new(), ExecutionStrategy::Sequential, 1);
    let steps = vec![
        step("p1").with_priority(1),
        step("p5-first").with_priority(5),
        step("p3").with_priority(3),
        step("p5-second").with_priority(5),
    ];
    s.run(&steps).await.unwrap();
    assert_eq!(s.executor().started(), vec!["p5-first", "p5-second", "p3", "p1"]);
}

#[test]
fn test_topological_sort_valid_for_diamond() {
    let steps = diamond();
    let order = topological_sort(&steps).unwrap();
    assert_eq!(order.len(), steps.len());
    for (i, assignment) in order.iter().enumerate() {
        for dep in &assignment.depends_on {
            let dep_pos = order.iter().position(|a| &a.step_id == dep).unwrap();
            assert!(dep_pos < i, "{dep} must precede {}", assignment.step_id);
        }
    }
}
