use std::{
	collections::HashMap,
	future, mem,
	panic::{catch_unwind, AssertUnwindSafe},
	pin::pin,
	sync::Arc,
};

use async_channel as chan;
use futures::{stream, StreamExt};
use futures_concurrency::{future::Join, stream::Merge};
use tokio::{
	sync::oneshot,
	time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{error, trace, warn};
use uuid::Uuid;

use super::{
	batcher::{Callbacks, ShardingFn},
	config::Config,
	message::{Batch, LaneMessage, SchedulerMessage, WorkerId},
};

/// Items gathered since the last flush, grouped by key.
struct Round<T> {
	groups: HashMap<String, Vec<T>>,
	count: usize,
	last_key: Option<String>,
}

impl<T> Default for Round<T> {
	fn default() -> Self {
		Self {
			groups: HashMap::new(),
			count: 0,
			last_key: None,
		}
	}
}

impl<T> Round<T> {
	fn add(&mut self, key: String, item: T) {
		self.groups.entry(key.clone()).or_default().push(item);
		self.last_key = Some(key);
		self.count += 1;
	}
}

/// Runs an user callback, a panic is logged and reported as `None` so the round survives it.
fn guarded<R>(callback: &'static str, f: impl FnOnce() -> R) -> Option<R> {
	catch_unwind(AssertUnwindSafe(f))
		.map_err(|_| error!(callback, "Batcher callback panicked;"))
		.ok()
}

pub(crate) async fn run<T: Clone + Send + 'static>(
	callbacks: Arc<Callbacks<T>>,
	config: Config,
	intake_rx: chan::Receiver<T>,
	lanes: Arc<Vec<chan::Sender<LaneMessage<T>>>>,
) {
	let mut round = Round::default();

	let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

	// The intake only ends once it is closed and every queued item was received
	let mut msg_stream = pin!((
		intake_rx
			.map(SchedulerMessage::Item)
			.chain(stream::once(future::ready(SchedulerMessage::Drain))),
		IntervalStream::new(ticker).map(|_| SchedulerMessage::Tick),
	)
		.merge());

	while let Some(msg) = msg_stream.next().await {
		match msg {
			SchedulerMessage::Item(item) => {
				let Some(key) = guarded("key", || (callbacks.key)(&item)) else {
					warn!("Dropping an item without a key;");
					continue;
				};

				round.add(key, item);

				if round.count >= config.size {
					flush(&callbacks, config.sync_wait, &lanes, mem::take(&mut round)).await;
				}
			}

			SchedulerMessage::Tick => {
				if round.count > 0 {
					flush(&callbacks, config.sync_wait, &lanes, mem::take(&mut round)).await;
				}
			}

			SchedulerMessage::Drain => {
				if round.count > 0 {
					flush(&callbacks, config.sync_wait, &lanes, mem::take(&mut round)).await;
				}

				trace!("Intake closed and drained;");
				break;
			}
		}
	}
}

fn lane_for(sharding: &ShardingFn, key: &str, lanes_count: usize) -> WorkerId {
	let Some(lane) = guarded("sharding", || sharding(key)) else {
		warn!(%key, "Routing the batch to the first lane;");
		return 0;
	};

	if lane < lanes_count {
		lane
	} else {
		warn!(%key, lane, lanes_count, "Sharding picked an out of range lane, wrapping it around;");
		lane % lanes_count
	}
}

async fn flush<T: Clone + Send + 'static>(
	callbacks: &Callbacks<T>,
	sync_wait: bool,
	lanes: &[chan::Sender<LaneMessage<T>>],
	round: Round<T>,
) {
	let Round {
		groups,
		count,
		last_key,
	} = round;

	let trigger_id = Uuid::new_v4();

	trace!(%trigger_id, keys_count = groups.len(), count, "Flushing round;");

	let completed = {
		let last = last_key
			.as_ref()
			.and_then(|key| groups.get(key))
			.and_then(|items| items.last());

		if let (Some(hook), Some(last)) = (&callbacks.hook, last) {
			guarded("hook", || hook(&trigger_id, &groups, count, last));
		}

		if sync_wait {
			callbacks.on_complete.as_ref().zip(last.cloned())
		} else {
			None
		}
	};

	let mut acks = Vec::with_capacity(if sync_wait { groups.len() } else { 0 });

	for (key, items) in groups {
		let lane = lane_for(&callbacks.sharding, &key, lanes.len());

		let ack = sync_wait.then(|| {
			let (tx, rx) = oneshot::channel();
			acks.push(rx);
			tx
		});

		if lanes[lane]
			.send(LaneMessage {
				batch: Batch {
					key,
					trigger_id,
					items,
				},
				ack,
			})
			.await
			.is_err()
		{
			error!(%trigger_id, lane, "Lane closed before the round was routed;");
		}
	}

	if sync_wait {
		let acks_count = acks.len();
		let acked = acks
			.join()
			.await
			.into_iter()
			.filter(Result::is_ok)
			.count();

		if acked != acks_count {
			warn!(%trigger_id, acked, acks_count, "Some batches of the round were never acknowledged;");
		}

		if let Some((on_complete, last)) = completed {
			guarded("on_complete", || on_complete(&last, count));
		}

		trace!(%trigger_id, "Round completed;");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use tracing_test::traced_test;

	#[test]
	fn rounds_track_count_and_last_key() {
		let mut round = Round::default();

		round.add("a".to_string(), 1);
		round.add("b".to_string(), 2);
		round.add("a".to_string(), 3);

		assert_eq!(round.count, 3);
		assert_eq!(round.last_key.as_deref(), Some("a"));
		assert_eq!(round.groups["a"], vec![1, 3]);
		assert_eq!(round.groups["b"], vec![2]);
	}

	#[test]
	#[traced_test]
	fn panicking_sharding_falls_back_to_first_lane() {
		let sharding: ShardingFn = Arc::new(|key: &str| {
			assert!(!key.is_empty(), "empty key");
			3
		});

		assert_eq!(lane_for(&sharding, "", 5), 0);
		assert!(logs_contain("Batcher callback panicked"));
		assert_eq!(lane_for(&sharding, "a", 5), 3);
	}

	#[test]
	#[traced_test]
	fn out_of_range_lanes_wrap_around() {
		let sharding: ShardingFn = Arc::new(|key: &str| key.len());

		assert_eq!(lane_for(&sharding, "ab", 3), 2);
		assert!(!logs_contain("out of range"));

		assert_eq!(lane_for(&sharding, "abcd", 3), 1);
		assert!(logs_contain("out of range"));
	}
}
