use std::{
	collections::HashMap,
	future::Future,
	mem,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_channel as chan;
use futures::{future::BoxFuture, FutureExt, TryFutureExt};
use futures_concurrency::future::{Join, Race};
use tokio::{spawn, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use super::{
	config::Config,
	error::Error,
	message::{Batch, LaneMessage, TriggerId, WorkerId},
	scheduler,
	worker::spawn_lane,
	BoxError,
};

pub(crate) type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;
pub(crate) type ShardingFn = Arc<dyn Fn(&str) -> usize + Send + Sync>;
pub(crate) type HandlerFn<T> =
	Arc<dyn Fn(WorkerId, Batch<T>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
pub(crate) type OnCompleteFn<T> = Arc<dyn Fn(&T, usize) + Send + Sync>;
pub(crate) type HookFn<T> =
	Arc<dyn Fn(&TriggerId, &HashMap<String, Vec<T>>, usize, &T) + Send + Sync>;

/// Callbacks of a started batcher, shared by its scheduler and lanes.
pub(crate) struct Callbacks<T> {
	pub key: KeyFn<T>,
	pub sharding: ShardingFn,
	pub handler: HandlerFn<T>,
	pub on_complete: Option<OnCompleteFn<T>>,
	pub hook: Option<HookFn<T>>,
}

enum State {
	Idle,
	Running {
		scheduler: JoinHandle<()>,
		lanes: Vec<JoinHandle<()>>,
	},
	Closed,
}

/// Groups items by key and hands each group to a lane as a [`Batch`].
///
/// A round is flushed when it reaches [`Config::size`] items, when the interval ticks with
/// pending items, and when the batcher closes. Every key always lands on the same lane and lanes
/// handle their batches one at a time, so items of a key are handled in the order they were put.
pub struct Batcher<T> {
	config: Config,
	key: Option<KeyFn<T>>,
	sharding: Option<ShardingFn>,
	handler: Option<HandlerFn<T>>,
	on_complete: Option<OnCompleteFn<T>>,
	hook: Option<HookFn<T>>,
	intake_tx: chan::Sender<T>,
	intake_rx: chan::Receiver<T>,
	state: Mutex<State>,
}

impl<T: Clone + Send + 'static> Batcher<T> {
	#[must_use]
	pub fn new(config: Config) -> Self {
		let (intake_tx, intake_rx) = chan::bounded(config.data_buffer.max(1));

		Self {
			config,
			key: None,
			sharding: None,
			handler: None,
			on_complete: None,
			hook: None,
			intake_tx,
			intake_rx,
			state: Mutex::new(State::Idle),
		}
	}

	/// Grouping key of an item.
	#[must_use]
	pub fn with_key(mut self, key: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
		self.key = Some(Arc::new(key));
		self
	}

	/// Lane of a key, expected to be below [`Batcher::worker`].
	#[must_use]
	pub fn with_sharding(mut self, sharding: impl Fn(&str) -> usize + Send + Sync + 'static) -> Self {
		self.sharding = Some(Arc::new(sharding));
		self
	}

	#[must_use]
	pub fn with_do<F, Fut, E>(mut self, handler: F) -> Self
	where
		F: Fn(WorkerId, Batch<T>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<(), E>> + Send + 'static,
		E: Into<BoxError> + 'static,
	{
		self.handler = Some(Arc::new(move |id, batch| {
			handler(id, batch).err_into::<BoxError>().boxed()
		}));
		self
	}

	/// Called with the last item and the item count of a round once all its batches were handled.
	/// Only used with [`Config::sync_wait`].
	#[must_use]
	pub fn with_on_complete(mut self, on_complete: impl Fn(&T, usize) + Send + Sync + 'static) -> Self {
		self.on_complete = Some(Arc::new(on_complete));
		self
	}

	/// Sees every round right before it is routed to the lanes.
	#[must_use]
	pub fn with_hook(
		mut self,
		hook: impl Fn(&TriggerId, &HashMap<String, Vec<T>>, usize, &T) + Send + Sync + 'static,
	) -> Self {
		self.hook = Some(Arc::new(hook));
		self
	}

	#[must_use]
	pub const fn worker(&self) -> usize {
		self.config.worker
	}

	fn lock_state(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn callbacks(&self) -> Result<Callbacks<T>, Error> {
		Ok(Callbacks {
			key: self.key.clone().ok_or(Error::MissingCallback("key"))?,
			sharding: self
				.sharding
				.clone()
				.ok_or(Error::MissingCallback("sharding"))?,
			handler: self.handler.clone().ok_or(Error::MissingCallback("do"))?,
			on_complete: self.on_complete.clone(),
			hook: self.hook.clone(),
		})
	}

	/// Spawns the scheduler and one task per lane.
	pub fn start(&self) -> Result<(), Error> {
		let callbacks = Arc::new(self.callbacks()?);
		self.config.validate()?;

		let mut state = self.lock_state();
		if !matches!(*state, State::Idle) {
			return Err(Error::AlreadyStarted);
		}

		let (lanes_txs, lanes) = (0..self.config.worker)
			.map(|id| {
				let (lane_tx, lane_rx) = chan::bounded(self.config.buffer);
				(lane_tx, spawn_lane(id, Arc::clone(&callbacks), lane_rx))
			})
			.unzip::<_, _, Vec<_>, Vec<_>>();

		let scheduler = spawn_scheduler(
			callbacks,
			self.config,
			self.intake_rx.clone(),
			Arc::new(lanes_txs),
		);

		*state = State::Running { scheduler, lanes };

		debug!(worker = self.config.worker, "Batcher started;");

		Ok(())
	}

	fn is_idle(&self) -> bool {
		matches!(*self.lock_state(), State::Idle)
	}

	/// Queues an item, waiting while the intake is full.
	///
	/// Only a started batcher takes items, so every accepted item is handled before
	/// [`Batcher::close`] returns.
	pub async fn put(&self, item: T) -> Result<(), Error> {
		if self.is_idle() {
			return Err(Error::NotStarted);
		}

		self.intake_tx.send(item).await.map_err(|_| Error::Closed)
	}

	/// Same as [`Batcher::put`], giving up with [`Error::Canceled`] once `cancel` fires.
	pub async fn put_until(&self, item: T, cancel: &CancellationToken) -> Result<(), Error> {
		if cancel.is_cancelled() {
			return Err(Error::Canceled);
		}

		(self.put(item), async {
			cancel.cancelled().await;
			Err::<(), _>(Error::Canceled)
		})
			.race()
			.await
	}

	/// Stops accepting items, flushes what was already put and waits for every lane to finish.
	pub async fn close(&self) {
		let state = mem::replace(&mut *self.lock_state(), State::Closed);

		match state {
			State::Closed => warn!("Trying to close a batcher that was already closed"),

			State::Idle => {
				self.intake_tx.close();
				debug!("Batcher closed before being started;");
			}

			State::Running { scheduler, lanes } => {
				self.intake_tx.close();

				if let Err(e) = scheduler.await {
					error!(?e, "Batch scheduler failed to shutdown;");
				}

				lanes
					.into_iter()
					.map(|lane| async move {
						if let Err(e) = lane.await {
							error!(?e, "Lane failed to shutdown;");
						}
					})
					.collect::<Vec<_>>()
					.join()
					.await;

				info!("Batcher gracefully shutdown");
			}
		}
	}
}

fn spawn_scheduler<T: Clone + Send + 'static>(
	callbacks: Arc<Callbacks<T>>,
	config: Config,
	intake_rx: chan::Receiver<T>,
	lanes: Arc<Vec<chan::Sender<LaneMessage<T>>>>,
) -> JoinHandle<()> {
	spawn(
		async move {
			trace!("Scheduler starting...");

			while let Err(e) = spawn(scheduler::run(
				Arc::clone(&callbacks),
				config,
				intake_rx.clone(),
				Arc::clone(&lanes),
			))
			.await
			{
				if e.is_panic() {
					error!(?e, "Scheduler critically failed and will restart;");
				} else {
					trace!("Scheduler was canceled and will exit...");
					break;
				}
			}

			// Lanes finish the batches they already hold before exiting
			for lane in lanes.iter() {
				lane.close();
			}

			info!("Scheduler gracefully shutdown");
		}
		.instrument(info_span!("batch_scheduler")),
	)
}
