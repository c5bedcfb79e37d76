use thiserror::Error;

use super::{message::TriggerId, BoxError};

#[derive(Debug, Error)]
pub enum Error {
	#[error("batcher callback is not set: {0}")]
	MissingCallback(&'static str),
	#[error("batcher was already started")]
	AlreadyStarted,
	#[error("batcher was not started yet")]
	NotStarted,
	#[error("invalid batcher config: {0}")]
	InvalidConfig(&'static str),
	#[error("batcher is closed")]
	Closed,
	#[error("put was canceled before the item was queued")]
	Canceled,

	#[error("batch handler failed <key='{key}', trigger_id='{trigger_id}'>: {source}")]
	Handler {
		key: String,
		trigger_id: TriggerId,
		#[source]
		source: BoxError,
	},
}
