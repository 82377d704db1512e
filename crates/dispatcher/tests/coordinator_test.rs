#[cfg(test)]
mod coordinator_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use scheduler_core::models::{ExecutionStatus, TriggerKind};
    use scheduler_core::traits::ExecutionHistoryStore;
    use scheduler_core::SchedulerError;
    use scheduler_dispatcher::ExecutionCoordinator;
    use scheduler_infrastructure::MetricsCollector;
    use scheduler_testing_utils::{
        ExecutionBuilder, MockExecutionHistoryStore, MockExecutor, RecordingNotifier,
        ResultBuilder, TaskBuilder,
    };

    fn coordinator(
        executor: Arc<MockExecutor>,
        history: &MockExecutionHistoryStore,
    ) -> Arc<ExecutionCoordinator> {
        Arc::new(ExecutionCoordinator::new(
            executor,
            Arc::new(history.clone()),
            Arc::new(MetricsCollector::new()),
        ))
    }

    fn coordinator_with_notifier(
        executor: Arc<MockExecutor>,
        history: &MockExecutionHistoryStore,
        notifier: Arc<RecordingNotifier>,
    ) -> Arc<ExecutionCoordinator> {
        Arc::new(
            ExecutionCoordinator::new(
                executor,
                Arc::new(history.clone()),
                Arc::new(MetricsCollector::new()),
            )
            .with_notifier(notifier)
            .with_excerpt_chars(16),
        )
    }

    #[tokio::test]
    async fn test_single_slot_per_task() {
        let history = MockExecutionHistoryStore::new();
        let coordinator = coordinator(Arc::new(MockExecutor::hanging()), &history);
        let task = TaskBuilder::new().build();
        let other = TaskBuilder::new().with_name("other").build();

        let first = coordinator
            .try_acquire(&task, TriggerKind::Scheduled)
            .await
            .unwrap();
        assert!(first.is_some());
        let second = coordinator
            .try_acquire(&task, TriggerKind::Scheduled)
            .await
            .unwrap();
        assert!(second.is_none());
        assert!(coordinator
            .try_acquire(&other, TriggerKind::Scheduled)
            .await
            .unwrap()
            .is_some());

        assert_eq!(coordinator.in_flight_count(), 2);
        assert!(coordinator.is_running(task.id));
        // 被拒绝的触发不产生执行记录
        assert_eq!(history.for_task(task.id).len(), 1);
        assert_eq!(history.all()[0].status, ExecutionStatus::Pending);
    }

    #[tokio::test]
    async fn test_dispatch_records_success() {
        let history = MockExecutionHistoryStore::new();
        let executor = Arc::new(MockExecutor::with_result(
            ResultBuilder::success().with_stdout("hello\n").build(),
        ));
        let coordinator = coordinator(executor.clone(), &history);
        let task = TaskBuilder::new().with_command("echo hello").with_timeout(7).build();

        let execution = coordinator
            .try_acquire(&task, TriggerKind::Scheduled)
            .await
            .unwrap()
            .unwrap();
        let execution_id = execution.id;
        coordinator.dispatch(task.clone(), execution).await.unwrap();

        assert_eq!(coordinator.in_flight_count(), 0);
        let stored = history.get(execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert_eq!(stored.exit_code, Some(0));
        assert_eq!(stored.stdout.as_deref(), Some("hello\n"));
        assert!(stored.completed_at.is_some());
        assert!(stored.duration_ms.is_some());

        let requests = executor.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].command, "echo hello");
        assert_eq!(requests[0].timeout, Duration::from_secs(7));
        assert_eq!(requests[0].execution_id, execution_id);
    }

    #[tokio::test]
    async fn test_running_executions_snapshot() {
        let history = MockExecutionHistoryStore::new();
        let coordinator = coordinator(Arc::new(MockExecutor::hanging()), &history);
        let task = TaskBuilder::new().build();

        let execution = coordinator
            .try_acquire(&task, TriggerKind::Manual)
            .await
            .unwrap()
            .unwrap();
        let running = coordinator.running_executions();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, execution.id);
        assert_eq!(running[0].trigger, TriggerKind::Manual);
    }

    #[tokio::test]
    async fn test_run_now_rejects_when_running() {
        let history = MockExecutionHistoryStore::new();
        let coordinator = coordinator(Arc::new(MockExecutor::hanging()), &history);
        let task = TaskBuilder::new().build();

        let execution_id = coordinator.run_now(&task).await.unwrap();
        let err = coordinator.run_now(&task).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning { task_id } if task_id == task.id));

        let stored = history.get(execution_id).await.unwrap().unwrap();
        assert_eq!(stored.trigger, TriggerKind::Manual);
        assert_eq!(history.all().len(), 1);
    }

    #[tokio::test]
    async fn test_coordinators_sharing_history_keep_single_slot() {
        let history = MockExecutionHistoryStore::new();
        let daemon = coordinator(Arc::new(MockExecutor::hanging()), &history);
        let cli = coordinator(Arc::new(MockExecutor::hanging()), &history);
        let task = TaskBuilder::new().build();

        daemon
            .try_acquire(&task, TriggerKind::Scheduled)
            .await
            .unwrap()
            .unwrap();
        let err = cli.run_now(&task).await.unwrap_err();
        assert!(matches!(err, SchedulerError::AlreadyRunning { task_id } if task_id == task.id));
        assert_eq!(cli.in_flight_count(), 0);
        assert_eq!(history.for_task(task.id).len(), 1);
    }

    #[tokio::test]
    async fn test_release_keeps_record_closed_elsewhere() {
        let history = MockExecutionHistoryStore::new();
        let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(100)));
        let cli = coordinator(executor, &history);
        let daemon = coordinator(Arc::new(MockExecutor::new()), &history);
        let task = TaskBuilder::new().build();

        let execution_id = cli.run_now(&task).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(daemon.recover_interrupted().await.unwrap(), 1);
        wait_idle(&cli).await;

        let stored = history.get(execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Error);
        assert!(stored.error_message.unwrap().contains("重启"));
        assert!(stored.exit_code.is_none());
    }

    #[tokio::test]
    async fn test_append_failure_frees_slot() {
        let history = MockExecutionHistoryStore::new();
        history.set_fail_append(true);
        let coordinator = coordinator(Arc::new(MockExecutor::new()), &history);
        let task = TaskBuilder::new().build();

        assert!(coordinator
            .try_acquire(&task, TriggerKind::Scheduled)
            .await
            .is_err());
        assert_eq!(coordinator.in_flight_count(), 0);

        history.set_fail_append(false);
        assert!(coordinator
            .try_acquire(&task, TriggerKind::Scheduled)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_notification_gating() {
        let history = MockExecutionHistoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let executor = Arc::new(MockExecutor::new());
        let coordinator =
            coordinator_with_notifier(executor.clone(), &history, notifier.clone());

        // 默认只在失败时通知
        let task = TaskBuilder::new().build();
        let execution = coordinator.run_now(&task).await;
        assert!(execution.is_ok());
        wait_idle(&coordinator).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(notifier.count(), 0);

        executor.set_result(ResultBuilder::failed(2).with_stderr("boom").build());
        let execution = coordinator
            .try_acquire(&task, TriggerKind::Scheduled)
            .await
            .unwrap()
            .unwrap();
        coordinator.dispatch(task.clone(), execution).await.unwrap();
        assert_eq!(notifier.count(), 1);
        let payload = &notifier.payloads()[0];
        assert_eq!(payload.status, ExecutionStatus::Failed);
        assert_eq!(payload.exit_code, Some(2));
        assert_eq!(payload.task_name, task.name);
        assert_eq!(payload.output_excerpt, "boom");
        assert!(!payload.host.is_empty());

        // 只在成功时通知
        let success_only = TaskBuilder::new().notify_on(true, false).build();
        let execution = coordinator
            .try_acquire(&success_only, TriggerKind::Scheduled)
            .await
            .unwrap()
            .unwrap();
        coordinator
            .dispatch(success_only.clone(), execution)
            .await
            .unwrap();
        assert_eq!(notifier.count(), 1);

        executor.set_result(ResultBuilder::success().with_stdout("done").build());
        let execution = coordinator
            .try_acquire(&success_only, TriggerKind::Scheduled)
            .await
            .unwrap()
            .unwrap();
        coordinator
            .dispatch(success_only.clone(), execution)
            .await
            .unwrap();
        assert_eq!(notifier.count(), 2);
        assert_eq!(notifier.payloads()[1].status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn test_output_excerpt_is_truncated() {
        let history = MockExecutionHistoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let executor = Arc::new(MockExecutor::with_result(
            ResultBuilder::success()
                .with_stdout("0123456789abcdefghijklmnopqrstuvwxyz")
                .build(),
        ));
        let coordinator = coordinator_with_notifier(executor, &history, notifier.clone());
        let task = TaskBuilder::new().notify_on(true, true).build();

        let execution = coordinator
            .try_acquire(&task, TriggerKind::Scheduled)
            .await
            .unwrap()
            .unwrap();
        coordinator.dispatch(task, execution).await.unwrap();

        let excerpt = &notifier.payloads()[0].output_excerpt;
        assert!(excerpt.ends_with("klmnopqrstuvwxyz"));
        assert!(excerpt.starts_with('…'));
    }

    #[tokio::test]
    async fn test_notifier_failure_keeps_execution_status() {
        let history = MockExecutionHistoryStore::new();
        let notifier = Arc::new(RecordingNotifier::failing());
        let coordinator =
            coordinator_with_notifier(Arc::new(MockExecutor::new()), &history, notifier.clone());
        let task = TaskBuilder::new().notify_on(true, true).build();

        let execution = coordinator
            .try_acquire(&task, TriggerKind::Scheduled)
            .await
            .unwrap()
            .unwrap();
        let execution_id = execution.id;
        coordinator.dispatch(task, execution).await.unwrap();

        assert_eq!(notifier.count(), 1);
        let stored = history.get(execution_id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Success);
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn test_drain_waits_for_short_executions() {
        let history = MockExecutionHistoryStore::new();
        let executor = Arc::new(MockExecutor::new().with_delay(Duration::from_millis(100)));
        let coordinator = coordinator(executor, &history);
        let task = TaskBuilder::new().build();

        coordinator.run_now(&task).await.unwrap();
        let abandoned = coordinator.drain(Duration::from_secs(5)).await;

        assert_eq!(abandoned, 0);
        assert_eq!(coordinator.in_flight_count(), 0);
        assert_eq!(history.all()[0].status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn test_drain_abandons_after_timeout() {
        let history = MockExecutionHistoryStore::new();
        let coordinator = coordinator(Arc::new(MockExecutor::hanging()), &history);
        let first = TaskBuilder::new().with_name("first").build();
        let second = TaskBuilder::new().with_name("second").build();

        coordinator.run_now(&first).await.unwrap();
        coordinator.run_now(&second).await.unwrap();
        let abandoned = coordinator.drain(Duration::from_millis(100)).await;

        assert_eq!(abandoned, 2);
        assert_eq!(coordinator.in_flight_count(), 0);
        for execution in history.all() {
            assert_eq!(execution.status, ExecutionStatus::Error);
            assert!(execution.completed_at.is_some());
            assert!(execution.error_message.unwrap().contains("关闭"));
        }
    }

    #[tokio::test]
    async fn test_drain_without_executions() {
        let history = MockExecutionHistoryStore::new();
        let coordinator = coordinator(Arc::new(MockExecutor::new()), &history);
        assert_eq!(coordinator.drain(Duration::from_millis(10)).await, 0);
    }

    #[tokio::test]
    async fn test_recover_interrupted() {
        let history = MockExecutionHistoryStore::new();
        let task = TaskBuilder::new().build();
        let pending = ExecutionBuilder::new(task.id).build();
        let running = ExecutionBuilder::new(TaskBuilder::new().build().id)
            .running()
            .build();
        let finished = ExecutionBuilder::new(task.id)
            .finished(ExecutionStatus::Success, Some(0))
            .build();
        for execution in [&pending, &running, &finished] {
            history.append(execution).await.unwrap();
        }

        let coordinator = coordinator(Arc::new(MockExecutor::new()), &history);
        assert_eq!(coordinator.recover_interrupted().await.unwrap(), 2);

        for id in [pending.id, running.id] {
            let stored = history.get(id).await.unwrap().unwrap();
            assert_eq!(stored.status, ExecutionStatus::Error);
            assert!(stored.error_message.unwrap().contains("重启"));
        }
        let untouched = history.get(finished.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, ExecutionStatus::Success);
        assert!(history.list_unfinished().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recover_interrupted_skips_owned_executions() {
        let history = MockExecutionHistoryStore::new();
        let coordinator = coordinator(Arc::new(MockExecutor::hanging()), &history);
        let task = TaskBuilder::new().build();

        coordinator
            .try_acquire(&task, TriggerKind::Scheduled)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(coordinator.recover_interrupted().await.unwrap(), 0);
        assert_eq!(history.all()[0].status, ExecutionStatus::Pending);
    }

    async fn wait_idle(coordinator: &ExecutionCoordinator) {
        for _ in 0..200 {
            if coordinator.in_flight_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("executions did not finish in time");
    }
}
