use std::fmt;

use tokio::sync::oneshot;
use uuid::Uuid;

/// Identifies one flush round, shared by every [`Batch`] the round produced.
pub type TriggerId = Uuid;

/// Index of the lane a batch was routed to.
pub type WorkerId = usize;

/// Items of one key gathered during a flush round, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch<T> {
	pub key: String,
	pub trigger_id: TriggerId,
	pub items: Vec<T>,
}

impl<T> fmt::Display for Batch<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"<key='{}', trigger_id='{}', items_count={}>",
			self.key,
			self.trigger_id,
			self.items.len()
		)
	}
}

#[derive(Debug)]
pub(crate) enum SchedulerMessage<T> {
	Item(T),
	Tick,
	Drain,
}

#[derive(Debug)]
pub(crate) struct LaneMessage<T> {
	pub batch: Batch<T>,
	pub ack: Option<oneshot::Sender<()>>,
}
