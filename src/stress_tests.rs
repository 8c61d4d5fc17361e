//! Stress tests designed to break the dispatch engine.
//!
//! These tests exercise edge cases, race conditions, and potential failure modes.

#[cfg(test)]
mod stress_tests {
    use crate::dispatcher::{BusHandle, Dispatcher};
    use crate::handler::Handler;
    use crate::outcome::DispatchStatus;
    use crate::predicate::Predicate;
    use crate::registry::{ListenerSpec, OwnerId};
    use crate::testing::{state_event, DispatchLatch, RecordingSink};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
        Handler::non_blocking(move |_args| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    // ==========================================================================
    // Fan-out volume
    // ==========================================================================

    #[tokio::test]
    async fn hundred_listeners_all_fire_in_order() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::builder().sink(sink.clone()).build();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..100usize {
            let order = order.clone();
            dispatcher
                .registry()
                .register(
                    ListenerSpec::builder(format!("automation.{i}"), "state_changed").handler(
                        Handler::non_blocking(move |_args| {
                            let order = order.clone();
                            async move {
                                order.lock().unwrap().push(i);
                                Ok(())
                            }
                        }),
                    ),
                )
                .await
                .unwrap();
        }

        dispatcher.dispatch(state_event("light.kitchen", "off", "on")).await;

        let order = order.lock().unwrap();
        assert_eq!(order.len(), 100);
        assert!(order.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sink.successes(), 100);
    }

    #[tokio::test]
    async fn burst_of_events_through_the_run_loop() {
        let dispatcher = Dispatcher::new();
        let latch = DispatchLatch::new(500);

        let handler_latch = latch.clone();
        dispatcher
            .registry()
            .register(
                ListenerSpec::builder("automation.burst", "state_changed").handler(
                    Handler::non_blocking(move |_args| {
                        let latch = handler_latch.clone();
                        async move {
                            latch.dec();
                            Ok(())
                        }
                    }),
                ),
            )
            .await
            .unwrap();

        let (bus, events) = BusHandle::channel();
        let loop_handle = tokio::spawn(dispatcher.clone().run(events));

        for i in 0..500 {
            bus.ingest(state_event("sensor.counter", &i.to_string(), &(i + 1).to_string()));
        }
        latch.await_zero().await;

        dispatcher.shutdown();
        loop_handle.await.unwrap();
    }

    // ==========================================================================
    // Failure storms
    // ==========================================================================

    #[tokio::test]
    async fn failing_listeners_never_starve_healthy_ones() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::builder().sink(sink.clone()).build();
        let healthy = Arc::new(AtomicUsize::new(0));

        for i in 0..20usize {
            let handler = if i % 2 == 0 {
                Handler::non_blocking(|_args| async { anyhow::bail!("deliberate failure") })
            } else {
                counting_handler(healthy.clone())
            };
            dispatcher
                .registry()
                .register(
                    ListenerSpec::builder(format!("automation.{i}"), "state_changed")
                        .handler(handler),
                )
                .await
                .unwrap();
        }

        for _ in 0..10 {
            dispatcher.dispatch(state_event("light.kitchen", "off", "on")).await;
        }

        assert_eq!(healthy.load(Ordering::SeqCst), 100);
        assert_eq!(sink.successes(), 100);
        assert_eq!(sink.failures(), 100);
    }

    #[tokio::test]
    async fn panic_storm_leaves_the_dispatcher_usable() {
        let dispatcher = Dispatcher::new();
        let survivors = Arc::new(AtomicUsize::new(0));

        dispatcher
            .registry()
            .register(
                ListenerSpec::builder("automation.panics", "state_changed")
                    .handler(Handler::non_blocking(|_args| async { panic!("storm") })),
            )
            .await
            .unwrap();
        dispatcher
            .registry()
            .register(
                ListenerSpec::builder("automation.survivor", "state_changed")
                    .handler(counting_handler(survivors.clone())),
            )
            .await
            .unwrap();

        for _ in 0..50 {
            dispatcher.dispatch(state_event("light.kitchen", "off", "on")).await;
        }
        assert_eq!(survivors.load(Ordering::SeqCst), 50);
    }

    // ==========================================================================
    // Concurrent registry churn
    // ==========================================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_unregister_and_dispatch() {
        let dispatcher = Dispatcher::new();
        let invoked = Arc::new(AtomicUsize::new(0));

        // A stable listener that must fire for every event.
        dispatcher
            .registry()
            .register(
                ListenerSpec::builder("automation.stable", "state_changed")
                    .handler(counting_handler(invoked.clone())),
            )
            .await
            .unwrap();

        let mut tasks = Vec::new();

        // Churn tasks: register and immediately cancel, randomized lifetimes.
        for i in 0..8 {
            let registry = dispatcher.registry().clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let sub = registry
                        .register(
                            ListenerSpec::builder(format!("automation.churn.{i}"), "state_changed")
                                .handler(Handler::non_blocking(|_args| async { Ok(()) })),
                        )
                        .await
                        .unwrap();
                    if fastrand::bool() {
                        tokio::task::yield_now().await;
                    }
                    sub.cancel().await;
                }
            }));
        }

        // Dispatch task running against the churn.
        let events = 100usize;
        let dispatch_task = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                for _ in 0..events {
                    dispatcher.dispatch(state_event("light.kitchen", "off", "on")).await;
                    if fastrand::u8(..) < 32 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };

        for task in tasks {
            task.await.unwrap();
        }
        dispatch_task.await.unwrap();

        // Churned listeners may or may not have been seen; the stable
        // listener saw everything.
        assert_eq!(invoked.load(Ordering::SeqCst), events);
        assert_eq!(dispatcher.registry().len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn owner_teardown_races_with_dispatch() {
        let dispatcher = Dispatcher::new();

        for _ in 0..50 {
            dispatcher
                .registry()
                .register(
                    ListenerSpec::builder("automation.doomed", "state_changed")
                        .predicate(Predicate::changed())
                        .handler(Handler::non_blocking(|_args| async { Ok(()) })),
                )
                .await
                .unwrap();
        }

        let teardown = {
            let registry = dispatcher.registry().clone();
            tokio::spawn(async move { registry.remove_all(&OwnerId::from("automation.doomed")).await })
        };
        let dispatch = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    dispatcher.dispatch(state_event("light.kitchen", "off", "on")).await;
                }
            })
        };

        assert_eq!(teardown.await.unwrap(), 50);
        dispatch.await.unwrap();
        assert!(dispatcher.registry().is_empty().await);
    }

    // ==========================================================================
    // Rate control under load
    // ==========================================================================

    #[tokio::test(start_paused = true)]
    async fn debounce_storm_collapses_to_one_invocation() {
        let dispatcher = Dispatcher::new();
        let fired = Arc::new(AtomicUsize::new(0));

        dispatcher
            .registry()
            .register(
                ListenerSpec::builder("automation.debounced", "state_changed")
                    .debounce(Duration::from_millis(100))
                    .handler(counting_handler(fired.clone())),
            )
            .await
            .unwrap();

        // 200 events, random sub-interval gaps: a single burst.
        for i in 0..200u32 {
            dispatcher
                .dispatch(state_event("sensor.noisy", &i.to_string(), &(i + 1).to_string()))
                .await;
            tokio::time::sleep(Duration::from_millis(u64::from(fastrand::u8(..50)))).await;
        }

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_storm_admits_one_per_interval() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::builder().sink(sink.clone()).build();
        let fired = Arc::new(AtomicUsize::new(0));

        dispatcher
            .registry()
            .register(
                ListenerSpec::builder("automation.throttled", "state_changed")
                    .throttle(Duration::from_secs(1))
                    .handler(counting_handler(fired.clone())),
            )
            .await
            .unwrap();

        // 10 windows of 1s, 10 events per window.
        for _ in 0..10 {
            for _ in 0..10 {
                dispatcher.dispatch(state_event("sensor.noisy", "a", "b")).await;
                tokio::time::advance(Duration::from_millis(100)).await;
            }
        }

        let fired = fired.load(Ordering::SeqCst);
        assert_eq!(fired, 10);
        // Drops produced no outcome records.
        assert_eq!(sink.len(), fired);
    }

    // ==========================================================================
    // Shutdown under load
    // ==========================================================================

    #[tokio::test]
    async fn shutdown_mid_storm_stops_cleanly() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::builder().sink(sink.clone()).build();
        let fired = Arc::new(AtomicUsize::new(0));

        dispatcher
            .registry()
            .register(
                ListenerSpec::builder("automation.a", "state_changed")
                    .handler(counting_handler(fired.clone())),
            )
            .await
            .unwrap();

        let (bus, events) = BusHandle::channel();
        let loop_handle = tokio::spawn(dispatcher.clone().run(events));

        for _ in 0..100 {
            bus.ingest(state_event("light.kitchen", "off", "on"));
        }
        dispatcher.shutdown();
        loop_handle.await.unwrap();

        // Every outcome that was recorded is either a completed success or
        // an explicit cancellation, never a half-finished attempt.
        for outcome in sink.outcomes() {
            assert!(matches!(
                outcome.status,
                DispatchStatus::Success | DispatchStatus::Cancelled
            ));
        }
        assert!(fired.load(Ordering::SeqCst) <= 100);
    }
}
