use im_batcher::{Batch, Batcher, Config, Error, WorkerId};
use im_utils::hash_sharding;

use std::{
	collections::HashMap,
	convert::Infallible,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	time::Duration,
};

use tokio::{spawn, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Msg {
	key: String,
	val: u32,
}

fn msg(key: &str, val: u32) -> Msg {
	Msg {
		key: key.to_string(),
		val,
	}
}

type Calls = Arc<Mutex<Vec<(WorkerId, Batch<Msg>)>>>;

fn recording(config: Config) -> (Batcher<Msg>, Calls) {
	let calls = Calls::default();

	let batcher = Batcher::new(config)
		.with_key(|msg: &Msg| msg.key.clone())
		.with_sharding(hash_sharding(config.worker))
		.with_do({
			let calls = Arc::clone(&calls);
			move |worker_id, batch: Batch<Msg>| {
				calls.lock().unwrap().push((worker_id, batch));
				async { Ok::<_, Infallible>(()) }
			}
		});

	(batcher, calls)
}

fn values_by_key(calls: &Calls) -> HashMap<String, Vec<u32>> {
	let mut values = HashMap::<_, Vec<_>>::new();

	for (_, batch) in calls.lock().unwrap().iter() {
		values
			.entry(batch.key.clone())
			.or_default()
			.extend(batch.items.iter().map(|msg| msg.val));
	}

	values
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn groups_items_per_key_on_interval() {
	let (batcher, calls) = recording(
		Config::default()
			.with_size(10)
			.with_worker(2)
			.with_interval(Duration::from_millis(50)),
	);

	batcher.start().unwrap();

	for (key, val) in [("a", 1), ("b", 2), ("a", 3)] {
		batcher.put(msg(key, val)).await.unwrap();
	}

	sleep(Duration::from_millis(60)).await;

	{
		let calls = calls.lock().unwrap();
		assert_eq!(calls.len(), 2);
		assert_eq!(calls[0].1.trigger_id, calls[1].1.trigger_id);

		let sharding = hash_sharding(2);
		for (worker_id, batch) in calls.iter() {
			assert_eq!(*worker_id, sharding(&batch.key));
		}
	}

	assert_eq!(
		values_by_key(&calls),
		HashMap::from([("a".to_string(), vec![1, 3]), ("b".to_string(), vec![2])])
	);

	batcher.close().await;
	assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn full_round_flushes_before_interval() {
	let (batcher, calls) = recording(
		Config::default()
			.with_size(2)
			.with_interval(Duration::from_secs(3600)),
	);

	batcher.start().unwrap();

	batcher.put(msg("a", 1)).await.unwrap();
	batcher.put(msg("b", 2)).await.unwrap();
	batcher.put(msg("c", 3)).await.unwrap();

	sleep(Duration::from_millis(1)).await;
	assert_eq!(calls.lock().unwrap().len(), 2);

	// Closing flushes the partial round
	batcher.close().await;
	assert_eq!(calls.lock().unwrap().len(), 3);
	assert_eq!(values_by_key(&calls)["c"], vec![3]);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn idle_ticks_do_nothing() {
	let (batcher, calls) = recording(Config::default().with_interval(Duration::from_millis(10)));

	batcher.start().unwrap();
	sleep(Duration::from_millis(100)).await;
	batcher.close().await;

	assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn key_order_is_kept_across_rounds() {
	let (batcher, calls) = recording(Config::default().with_size(1).with_worker(4));

	batcher.start().unwrap();

	for val in 0..50 {
		batcher.put(msg("a", val)).await.unwrap();
		batcher.put(msg(&format!("k{}", val % 7), val)).await.unwrap();
	}

	batcher.close().await;

	let values = values_by_key(&calls);
	assert_eq!(values["a"], (0..50).collect::<Vec<_>>());

	for (key, values) in values {
		assert!(
			values.windows(2).all(|pair| pair[0] < pair[1]),
			"out of order values for key {key}: {values:?}"
		);
	}
}

#[tokio::test]
#[traced_test]
async fn start_checks_callbacks_and_config() {
	let res = Batcher::<Msg>::new(Config::default()).start();
	assert!(matches!(res, Err(Error::MissingCallback("key"))));

	let res = Batcher::<Msg>::new(Config::default())
		.with_key(|msg: &Msg| msg.key.clone())
		.with_do(|_, _| async { Ok::<_, Infallible>(()) })
		.start();
	assert!(matches!(res, Err(Error::MissingCallback("sharding"))));

	let (batcher, _) = recording(Config::default().with_worker(0));
	assert!(matches!(batcher.start(), Err(Error::InvalidConfig(_))));

	let (batcher, _) = recording(Config::default());
	batcher.start().unwrap();
	assert!(matches!(batcher.start(), Err(Error::AlreadyStarted)));
	batcher.close().await;
}

#[tokio::test]
#[traced_test]
async fn closed_batcher_rejects_items() {
	let (batcher, calls) = recording(Config::default());

	batcher.start().unwrap();
	batcher.close().await;

	assert!(matches!(batcher.put(msg("a", 1)).await, Err(Error::Closed)));
	assert!(matches!(batcher.start(), Err(Error::AlreadyStarted)));

	batcher.close().await;
	assert!(logs_contain("already closed"));
	assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test]
#[traced_test]
async fn items_are_only_taken_once_started() {
	let (batcher, calls) = recording(Config::default());

	assert!(matches!(batcher.put(msg("a", 1)).await, Err(Error::NotStarted)));

	batcher.close().await;

	assert!(matches!(batcher.put(msg("a", 2)).await, Err(Error::Closed)));
	assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn canceled_put_gives_up() {
	let config = Config::default()
		.with_size(1)
		.with_worker(1)
		.with_data_buffer(1)
		.with_sync_wait(true);

	let handled = Arc::new(Mutex::new(vec![]));

	let batcher = Batcher::new(config)
		.with_key(|msg: &Msg| msg.key.clone())
		.with_sharding(hash_sharding(config.worker))
		.with_do({
			let handled = Arc::clone(&handled);
			move |_, batch: Batch<Msg>| {
				let handled = Arc::clone(&handled);
				async move {
					// Keeps the scheduler waiting on this round
					sleep(Duration::from_millis(100)).await;
					handled
						.lock()
						.unwrap()
						.extend(batch.items.iter().map(|msg| msg.val));
					Ok::<_, Infallible>(())
				}
			}
		});

	batcher.start().unwrap();

	let cancel = CancellationToken::new();

	// The first item is being handled, the second one fills the intake
	batcher.put_until(msg("a", 1), &cancel).await.unwrap();
	batcher.put_until(msg("a", 2), &cancel).await.unwrap();

	spawn({
		let cancel = cancel.clone();
		async move {
			sleep(Duration::from_millis(10)).await;
			cancel.cancel();
		}
	});

	assert!(matches!(
		batcher.put_until(msg("a", 3), &cancel).await,
		Err(Error::Canceled)
	));
	assert!(matches!(
		batcher.put_until(msg("a", 4), &cancel).await,
		Err(Error::Canceled)
	));

	batcher.close().await;

	assert_eq!(*handled.lock().unwrap(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn panicking_key_only_drops_its_item() {
	let config = Config::default()
		.with_size(10)
		.with_interval(Duration::from_secs(3600))
		.with_sync_wait(true);

	let completed = Arc::new(Mutex::new(vec![]));
	let calls = Calls::default();

	let batcher = Batcher::new(config)
		.with_key(|msg: &Msg| {
			assert!(msg.val != 0, "item without key");
			msg.key.clone()
		})
		.with_sharding(hash_sharding(config.worker))
		.with_do({
			let calls = Arc::clone(&calls);
			move |worker_id, batch: Batch<Msg>| {
				calls.lock().unwrap().push((worker_id, batch));
				async { Ok::<_, Infallible>(()) }
			}
		})
		.with_on_complete({
			let completed = Arc::clone(&completed);
			move |last: &Msg, count| completed.lock().unwrap().push((last.val, count))
		});

	batcher.start().unwrap();

	for val in [1, 2, 0, 3] {
		batcher.put(msg("a", val)).await.unwrap();
	}

	batcher.close().await;

	assert_eq!(values_by_key(&calls)["a"], vec![1, 2, 3]);
	assert_eq!(*completed.lock().unwrap(), vec![(3, 3)]);
	assert!(logs_contain("Batcher callback panicked"));
	assert!(!logs_contain("critically failed"));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn sync_wait_completes_rounds_after_every_batch() {
	let handled = Arc::new(AtomicUsize::new(0));
	let hooked = Arc::new(Mutex::new(vec![]));
	let completed = Arc::new(Mutex::new(vec![]));

	let config = Config::default()
		.with_size(3)
		.with_worker(2)
		.with_interval(Duration::from_secs(3600))
		.with_sync_wait(true);

	let batcher = Batcher::new(config)
		.with_key(|msg: &Msg| msg.key.clone())
		.with_sharding(hash_sharding(config.worker))
		.with_do({
			let handled = Arc::clone(&handled);
			move |_, batch: Batch<Msg>| {
				let handled = Arc::clone(&handled);
				async move {
					sleep(Duration::from_millis(10)).await;
					handled.fetch_add(batch.items.len(), Ordering::Relaxed);
					Ok::<_, Infallible>(())
				}
			}
		})
		.with_hook({
			let hooked = Arc::clone(&hooked);
			move |trigger_id, groups: &HashMap<String, Vec<Msg>>, count, last: &Msg| {
				hooked
					.lock()
					.unwrap()
					.push((*trigger_id, groups.len(), count, last.clone()));
			}
		})
		.with_on_complete({
			let handled = Arc::clone(&handled);
			let completed = Arc::clone(&completed);
			move |last: &Msg, count| {
				completed.lock().unwrap().push((
					last.clone(),
					count,
					handled.load(Ordering::Relaxed),
				));
			}
		});

	batcher.start().unwrap();

	for (key, val) in [("a", 1), ("b", 2), ("a", 3)] {
		batcher.put(msg(key, val)).await.unwrap();
	}

	batcher.close().await;

	let hooked = hooked.lock().unwrap();
	assert_eq!(hooked.len(), 1);
	assert_eq!(hooked[0].1, 2);
	assert_eq!(hooked[0].2, 3);
	assert_eq!(hooked[0].3, msg("a", 3));

	// Every batch of the round was handled before completion
	assert_eq!(*completed.lock().unwrap(), vec![(msg("a", 3), 3, 3)]);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn failing_handlers_do_not_stop_lanes() {
	let handled = Arc::new(AtomicUsize::new(0));

	let config = Config::default().with_size(1).with_worker(1).with_sync_wait(true);

	let batcher = Batcher::new(config)
		.with_key(|msg: &Msg| msg.key.clone())
		// Out of range on purpose, wrapped around to the single lane
		.with_sharding(|_| 7)
		.with_do({
			let handled = Arc::clone(&handled);
			move |_, batch: Batch<Msg>| {
				let handled = Arc::clone(&handled);
				async move {
					match batch.items[0].val {
						0 => panic!("handler blew up"),
						1 => Err(std::io::Error::other("store down")),
						_ => {
							handled.fetch_add(1, Ordering::Relaxed);
							Ok(())
						}
					}
				}
			}
		});

	batcher.start().unwrap();

	for val in [0, 1, 2, 3] {
		batcher.put(msg("a", val)).await.unwrap();
	}

	batcher.close().await;

	assert_eq!(handled.load(Ordering::Relaxed), 2);
	assert!(logs_contain("Batch handler panicked"));
	assert!(logs_contain("batch handler failed"));
	assert!(logs_contain("store down"));
	assert!(logs_contain("out of range lane"));
}
