use std::{panic::AssertUnwindSafe, sync::Arc};

use async_channel as chan;
use futures::FutureExt;
use im_utils::report_error;
use tokio::{spawn, task::JoinHandle};
use tracing::{error, info, info_span, trace, warn, Instrument};

use super::{
	batcher::Callbacks,
	error::Error,
	message::{Batch, LaneMessage, WorkerId},
};

pub(crate) fn spawn_lane<T: Send + 'static>(
	id: WorkerId,
	callbacks: Arc<Callbacks<T>>,
	lane_rx: chan::Receiver<LaneMessage<T>>,
) -> JoinHandle<()> {
	spawn(
		async move {
			trace!("Lane starting...");

			// Batches of a lane are handled one at a time, in the order they were routed
			while let Ok(LaneMessage { batch, ack }) = lane_rx.recv().await {
				handle(id, &callbacks, batch).await;

				if let Some(ack) = ack {
					if ack.send(()).is_err() {
						warn!("Scheduler stopped waiting for the round acknowledgment;");
					}
				}
			}

			info!("Lane gracefully shutdown");
		}
		.instrument(info_span!("batch_lane", worker_id = id)),
	)
}

async fn handle<T: Send + 'static>(id: WorkerId, callbacks: &Callbacks<T>, batch: Batch<T>) {
	let key = batch.key.clone();
	let trigger_id = batch.trigger_id;

	trace!(%batch, "Handling batch;");

	let handler = &callbacks.handler;

	match AssertUnwindSafe(async move { handler(id, batch).await })
		.catch_unwind()
		.await
	{
		Ok(res) => report_error(&res.map_err(|source| Error::Handler {
			key,
			trigger_id,
			source,
		})),
		Err(_) => error!(%key, %trigger_id, "Batch handler panicked;"),
	}
}
