#[cfg(test)]
mod tests {
    use crate::task::manager::*;
    use crate::task::queue::DispatchOrder;
    use crate::task::types::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::Notify;

    // Small pool with immediate retries so tests stay fast
    fn test_config() -> TaskManagerConfig {
        TaskManagerConfig {
            max_concurrent: 2,
            queue_size: 16,
            retry_delay_ms: 0,
            ..Default::default()
        }
    }

    async fn wait_terminal(manager: &TaskManager, task_id: &TaskId) -> Task {
        tokio::time::timeout(Duration::from_secs(5), manager.wait_for_task(task_id))
            .await
            .expect("task did not finish in time")
            .unwrap()
    }

    async fn wait_status(manager: &TaskManager, task_id: &TaskId, status: TaskStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.get_task(task_id).unwrap().status != status {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task never reached the expected status");
    }

    fn gate_task(gate: Arc<Notify>) -> TaskSpec {
        TaskSpec::new("gate", move |_ctx| {
            let gate = gate.clone();
            async move {
                gate.notified().await;
                Ok(())
            }
        })
    }

    #[test]
    fn test_task_priority_values() {
        assert_eq!(TaskPriority::Low.value(), 1);
        assert_eq!(TaskPriority::Normal.value(), 5);
        assert_eq!(TaskPriority::High.value(), 10);
        assert_eq!(TaskPriority::Urgent.value(), 20);
        assert!(TaskPriority::Urgent > TaskPriority::Low);
        assert_eq!(TaskPriority::default(), TaskPriority::Normal);
    }

    #[test]
    fn test_task_status_terminal_states() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert_eq!(
            serde_json::to_string(&TaskStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn test_task_spec_builder() {
        let spec = TaskSpec::new("builder", |_ctx| async { Ok(()) })
            .with_description("described")
            .with_priority(TaskPriority::High)
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(7)
            .with_initial_progress(150.0);

        assert_eq!(spec.name, "builder");
        assert_eq!(spec.description, "described");
        assert_eq!(spec.priority, TaskPriority::High);
        assert_eq!(spec.timeout, Some(Duration::from_secs(5)));
        assert_eq!(spec.max_retries, Some(7));
        assert_eq!(spec.initial_progress, 100.0);

        let spec = spec.with_timeout(Duration::ZERO);
        assert_eq!(spec.timeout, None);

        let boxed: TaskFn =
            Arc::new(|_ctx: TaskContext| -> TaskFuture { Box::pin(async { Ok(()) }) });
        let spec = TaskSpec::from_fn("boxed", boxed).with_initial_progress(-5.0);
        assert_eq!(spec.priority, TaskPriority::Normal);
        assert_eq!(spec.initial_progress, 0.0);
    }

    #[tokio::test]
    async fn test_start_task_defaults() {
        let manager = TaskManager::new(test_config());
        let gate = Arc::new(Notify::new());
        let blocker = manager.submit(gate_task(gate.clone())).unwrap();

        let task_id = manager
            .start_task("defaults", "check defaults", |_ctx| async { Ok(()) }, TaskPriority::Low)
            .unwrap();
        let task = manager.get_task(&task_id).unwrap();

        assert!(task_id.as_str().starts_with("defaults_"));
        assert_eq!(task.description, "check defaults");
        assert_eq!(task.priority, TaskPriority::Low);
        assert_eq!(task.max_retries, 3);
        assert_eq!(task.timeout, Duration::from_secs(30 * 60));
        assert_eq!(task.retries, 0);

        gate.notify_one();
        wait_terminal(&manager, &blocker).await;
        wait_terminal(&manager, &task_id).await;
    }

    #[tokio::test]
    async fn test_task_ids_are_unique() {
        let manager = TaskManager::new(test_config());
        let mut ids = std::collections::HashSet::new();
        for _ in 0..10 {
            let id = manager
                .start_task("same-name", "", |_ctx| async { Ok(()) }, TaskPriority::Normal)
                .unwrap();
            assert!(ids.insert(id));
        }
    }

    #[tokio::test]
    async fn test_immediate_tasks_complete() {
        let manager = TaskManager::new(test_config());

        let mut ids = Vec::new();
        for i in 0..3 {
            let id = manager
                .start_task(
                    &format!("quick-{}", i),
                    "returns immediately",
                    |_ctx| async { Ok(()) },
                    TaskPriority::Normal,
                )
                .unwrap();
            ids.push(id);
        }

        for id in &ids {
            let task = wait_terminal(&manager, id).await;
            assert_eq!(task.status, TaskStatus::Completed);
            assert_eq!(task.progress, 100.0);
            assert!(task.started_at.is_some());
            assert!(task.completed_at.is_some());
        }

        let stats = manager.stats();
        assert_eq!(stats.completed_tasks, 3);
        assert_eq!(stats.failed_tasks, 0);
        assert_eq!(stats.total_tasks, 3);
    }

    #[tokio::test]
    async fn test_failing_task_retries_then_completes() {
        let manager = TaskManager::new(test_config());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let spec = TaskSpec::new("flaky", move |ctx| {
            let counter = counter.clone();
            async move {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(ctx.attempt(), call);
                if call < 2 {
                    anyhow::bail!("transient failure {}", call);
                }
                Ok(())
            }
        })
        .with_max_retries(3);

        let task_id = manager.submit(spec).unwrap();
        let task = wait_terminal(&manager, &task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retries, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.stats().retried_attempts, 2);
    }

    #[tokio::test]
    async fn test_retry_budget_is_never_exceeded() {
        let manager = TaskManager::new(test_config());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let spec = TaskSpec::new("doomed", move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("disk on fire"))
            }
        })
        .with_max_retries(2);

        let task_id = manager.submit(spec).unwrap();
        let task = wait_terminal(&manager, &task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retries, 2);
        assert!(task.retries <= task.max_retries);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(task.error.unwrap().contains("disk on fire"));
        assert_eq!(manager.stats().failed_tasks, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let manager = TaskManager::new(test_config());
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let spec = TaskSpec::new("slow-then-fast", move |_ctx| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok(())
            }
        })
        .with_timeout(Duration::from_millis(50))
        .with_max_retries(1);

        let task_id = manager.submit(spec).unwrap();
        let task = wait_terminal(&manager, &task_id).await;

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retries, 1);
        assert!(task.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_without_budget_fails() {
        let manager = TaskManager::new(test_config());
        let spec = TaskSpec::new("stuck", |_ctx| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .with_timeout(Duration::from_millis(30))
        .with_max_retries(0);

        let task_id = manager.submit(spec).unwrap();
        let task = wait_terminal(&manager, &task_id).await;

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_timeout_cancels_attempt_token() {
        let manager = TaskManager::new(test_config());
        let iterations = Arc::new(AtomicU32::new(0));
        let background = Arc::new(Mutex::new(None));

        let (counter, slot) = (iterations.clone(), background.clone());
        let spec = TaskSpec::new("spawns-background-work", move |ctx: TaskContext| {
            let token = ctx.cancellation_token().clone();
            let counter = counter.clone();
            let handle = tokio::spawn(async move {
                while !token.is_cancelled() {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            });
            *slot.lock().unwrap() = Some(handle);
            async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
        })
        .with_timeout(Duration::from_millis(50))
        .with_max_retries(0);

        let task_id = manager.submit(spec).unwrap();
        let task = wait_terminal(&manager, &task_id).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("timed out"));

        let handle = background.lock().unwrap().take().expect("body never ran");
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("background work outlived the timed out attempt")
            .unwrap();

        let stopped_at = iterations.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(iterations.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test]
    async fn test_submit_after_queue_closed_is_rejected() {
        let manager = TaskManager::new(test_config());
        // Shutdown closes the queue after the accepting check already passed.
        assert!(manager.inner.queue.close().is_empty());

        let rejected =
            manager.start_task("late", "", |_ctx| async { Ok(()) }, TaskPriority::Normal);
        assert!(matches!(rejected, Err(TaskManagerError::ShuttingDown)));
        assert!(manager.get_all_tasks().is_empty());
        assert_eq!(manager.stats().pending_tasks, 0);
    }

    #[tokio::test]
    async fn test_cancel_running_task() {
        let manager = TaskManager::new(test_config());
        let spec = TaskSpec::new("long", |ctx| async move {
            ctx.cancellation_token().cancelled().await;
            Ok(())
        });

        let task_id = manager.submit(spec).unwrap();
        wait_status(&manager, &task_id, TaskStatus::Running).await;
        assert_eq!(manager.get_running_tasks().len(), 1);

        manager.cancel_task(&task_id).unwrap();
        let task = manager.get_task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(manager.get_running_tasks().is_empty());

        // Let the worker observe the cancellation; the status must not change.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let task = manager.get_task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.retries, 0);
    }

    #[tokio::test]
    async fn test_cancel_terminal_task_fails() {
        let manager = TaskManager::new(test_config());
        let task_id = manager
            .start_task("done", "", |_ctx| async { Ok(()) }, TaskPriority::Normal)
            .unwrap();
        wait_terminal(&manager, &task_id).await;

        let result = manager.cancel_task(&task_id);
        assert!(matches!(
            result,
            Err(TaskManagerError::NotCancellable {
                status: TaskStatus::Completed,
                ..
            })
        ));
        assert_eq!(
            manager.get_task(&task_id).unwrap().status,
            TaskStatus::Completed
        );

        let missing = manager.cancel_task(&TaskId::from("missing"));
        assert!(matches!(missing, Err(TaskManagerError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_cancelled_pending_task_never_runs() {
        let manager = TaskManager::new(TaskManagerConfig {
            max_concurrent: 1,
            ..test_config()
        });
        let gate = Arc::new(Notify::new());
        let blocker = manager.submit(gate_task(gate.clone())).unwrap();
        wait_status(&manager, &blocker, TaskStatus::Running).await;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let queued = manager
            .start_task(
                "queued",
                "",
                move |_ctx| {
                    let flag = flag.clone();
                    async move {
                        flag.store(true, Ordering::SeqCst);
                        Ok(())
                    }
                },
                TaskPriority::Normal,
            )
            .unwrap();

        assert_eq!(manager.get_pending_tasks().len(), 1);
        manager.cancel_task(&queued).unwrap();
        assert!(manager.get_pending_tasks().is_empty());

        gate.notify_one();
        wait_terminal(&manager, &blocker).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(
            manager.get_task(&queued).unwrap().status,
            TaskStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_queue_full_rejects_and_discards() {
        let manager = TaskManager::new(TaskManagerConfig {
            max_concurrent: 1,
            queue_size: 1,
            ..test_config()
        });
        let gate = Arc::new(Notify::new());
        let blocker = manager.submit(gate_task(gate.clone())).unwrap();
        wait_status(&manager, &blocker, TaskStatus::Running).await;

        let queued = manager
            .start_task("fits", "", |_ctx| async { Ok(()) }, TaskPriority::Normal)
            .unwrap();
        let rejected =
            manager.start_task("overflow", "", |_ctx| async { Ok(()) }, TaskPriority::Normal);

        assert!(matches!(
            rejected,
            Err(TaskManagerError::QueueFull { capacity: 1 })
        ));
        assert_eq!(manager.get_all_tasks().len(), 2);
        assert_eq!(manager.stats().queue_available, 0);

        gate.notify_one();
        assert_eq!(
            wait_terminal(&manager, &queued).await.status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_progress_fans_out_global_then_task() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));

        let global_log = log.clone();
        let config = test_config().with_progress_callback(Arc::new(move |update: &ProgressUpdate| {
            global_log
                .lock()
                .unwrap()
                .push(format!("global:{}:{}", update.progress, update.message));
        }));
        let manager = TaskManager::new(config);

        let task_log = log.clone();
        let spec = TaskSpec::new("reporting", |ctx| async move {
            ctx.report(0.5, "halfway");
            ctx.report(1.5, "overshoot");
            Ok(())
        })
        .with_progress_callback(Arc::new(move |update: &ProgressUpdate| {
            task_log
                .lock()
                .unwrap()
                .push(format!("task:{}:{}", update.progress, update.message));
        }));

        let task_id = manager.submit(spec).unwrap();
        wait_terminal(&manager, &task_id).await;

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "global:50:halfway",
                "task:50:halfway",
                "global:100:overshoot",
                "task:100:overshoot",
            ]
        );
    }

    #[tokio::test]
    async fn test_progress_is_stored_while_running() {
        let manager = TaskManager::new(test_config());
        let gate = Arc::new(Notify::new());

        let release = gate.clone();
        let spec = TaskSpec::new("partial", move |ctx| {
            let release = release.clone();
            async move {
                ctx.report(0.25, "quarter");
                release.notified().await;
                Ok(())
            }
        });

        let task_id = manager.submit(spec).unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager.get_task(&task_id).unwrap().progress < 25.0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let task = manager.get_task(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.progress, 25.0);

        gate.notify_one();
        assert_eq!(wait_terminal(&manager, &task_id).await.progress, 100.0);
    }

    #[tokio::test]
    async fn test_panicking_task_is_isolated() {
        let manager = TaskManager::new(TaskManagerConfig {
            max_concurrent: 1,
            ..test_config()
        });

        let spec = TaskSpec::new("explodes", |_ctx| async {
            let explode = true;
            if explode {
                panic!("kaboom");
            }
            Ok(())
        })
        .with_max_retries(0);
        let panicked = manager.submit(spec).unwrap();
        let task = wait_terminal(&manager, &panicked).await;
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("kaboom"));

        // The single worker is still alive.
        let next = manager
            .start_task("after", "", |_ctx| async { Ok(()) }, TaskPriority::Normal)
            .unwrap();
        assert_eq!(
            wait_terminal(&manager, &next).await.status,
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_priority_dispatch_order() {
        let manager = TaskManager::new(TaskManagerConfig {
            max_concurrent: 1,
            dispatch_order: DispatchOrder::Priority,
            ..test_config()
        });
        let gate = Arc::new(Notify::new());
        let blocker = manager.submit(gate_task(gate.clone())).unwrap();
        wait_status(&manager, &blocker, TaskStatus::Running).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut ids = Vec::new();
        for (name, priority) in [
            ("low", TaskPriority::Low),
            ("urgent", TaskPriority::Urgent),
            ("normal", TaskPriority::Normal),
        ] {
            let order = order.clone();
            let spec = TaskSpec::new(name, move |_ctx| {
                let order = order.clone();
                async move {
                    order.lock().unwrap().push(name);
                    Ok(())
                }
            })
            .with_priority(priority);
            ids.push(manager.submit(spec).unwrap());
        }

        gate.notify_one();
        for id in &ids {
            wait_terminal(&manager, id).await;
        }
        assert_eq!(*order.lock().unwrap(), vec!["urgent", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_terminal_tasks() {
        let manager = TaskManager::new(test_config());
        let gate = Arc::new(Notify::new());

        let done = manager
            .start_task("done", "", |_ctx| async { Ok(()) }, TaskPriority::Normal)
            .unwrap();
        wait_terminal(&manager, &done).await;
        let busy = manager.submit(gate_task(gate.clone())).unwrap();
        wait_status(&manager, &busy, TaskStatus::Running).await;

        assert_eq!(manager.cleanup_old_tasks(Duration::from_secs(3600)), 0);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.cleanup_old_tasks(Duration::from_millis(1)), 1);
        assert!(matches!(
            manager.get_task(&done),
            Err(TaskManagerError::TaskNotFound(_))
        ));
        assert!(manager.get_task(&busy).is_ok());

        gate.notify_one();
        wait_terminal(&manager, &busy).await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_and_rejects_new_work() {
        let manager = TaskManager::new(TaskManagerConfig {
            max_concurrent: 1,
            ..test_config()
        });

        let sleeper = manager
            .start_task(
                "sleeper",
                "",
                |_ctx| async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                },
                TaskPriority::Normal,
            )
            .unwrap();
        wait_status(&manager, &sleeper, TaskStatus::Running).await;
        let queued = manager
            .start_task("queued", "", |_ctx| async { Ok(()) }, TaskPriority::Normal)
            .unwrap();

        manager.shutdown(Duration::from_secs(2)).await.unwrap();

        assert_eq!(
            manager.get_task(&sleeper).unwrap().status,
            TaskStatus::Cancelled
        );
        assert_eq!(
            manager.get_task(&queued).unwrap().status,
            TaskStatus::Cancelled
        );

        let rejected =
            manager.start_task("late", "", |_ctx| async { Ok(()) }, TaskPriority::Normal);
        assert!(matches!(rejected, Err(TaskManagerError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_stats_snapshot() {
        let manager = TaskManager::new(TaskManagerConfig {
            max_concurrent: 3,
            queue_size: 8,
            ..test_config()
        });

        let stats = manager.stats();
        assert_eq!(stats.max_workers, 3);
        assert_eq!(stats.queue_size, 8);
        assert_eq!(stats.queue_available, 8);
        assert_eq!(stats.total_tasks, 0);
        assert_eq!(stats.running_tasks, 0);
    }

    #[test]
    fn test_partial_toml_config_uses_defaults() {
        let config: TaskManagerConfig = toml::from_str("max_concurrent = 4").unwrap();
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.queue_size, 1000);
        assert_eq!(config.default_timeout(), Duration::from_secs(1800));
        assert_eq!(config.dispatch_order, DispatchOrder::Fifo);
        assert!(config.progress_callback.is_none());
    }
}
