use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::Error;

pub const DEFAULT_SIZE: usize = 100;
pub const DEFAULT_BUFFER: usize = 100;
pub const DEFAULT_DATA_BUFFER: usize = 1000;
pub const DEFAULT_WORKER: usize = 5;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning of a [`Batcher`](crate::Batcher).
///
/// Every field has a default, so services can embed it in their config files and only override
/// what they need. The interval is (de)serialized as `interval_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Items gathered before a round is flushed without waiting for the interval
	pub size: usize,
	/// Capacity of each lane queue
	pub buffer: usize,
	/// Capacity of the intake queue, `put` waits when it is full
	pub data_buffer: usize,
	/// Lane count
	pub worker: usize,
	#[serde(rename = "interval_ms", with = "millis")]
	pub interval: Duration,
	/// Wait for every batch of a round to be handled before starting the next one
	pub sync_wait: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			size: DEFAULT_SIZE,
			buffer: DEFAULT_BUFFER,
			data_buffer: DEFAULT_DATA_BUFFER,
			worker: DEFAULT_WORKER,
			interval: DEFAULT_INTERVAL,
			sync_wait: false,
		}
	}
}

impl Config {
	#[must_use]
	pub const fn with_size(mut self, size: usize) -> Self {
		self.size = size;
		self
	}

	#[must_use]
	pub const fn with_buffer(mut self, buffer: usize) -> Self {
		self.buffer = buffer;
		self
	}

	#[must_use]
	pub const fn with_data_buffer(mut self, data_buffer: usize) -> Self {
		self.data_buffer = data_buffer;
		self
	}

	#[must_use]
	pub const fn with_worker(mut self, worker: usize) -> Self {
		self.worker = worker;
		self
	}

	#[must_use]
	pub const fn with_interval(mut self, interval: Duration) -> Self {
		self.interval = interval;
		self
	}

	#[must_use]
	pub const fn with_sync_wait(mut self, sync_wait: bool) -> Self {
		self.sync_wait = sync_wait;
		self
	}

	pub fn validate(&self) -> Result<(), Error> {
		if self.size == 0 {
			return Err(Error::InvalidConfig("size must be greater than zero"));
		}
		if self.buffer == 0 {
			return Err(Error::InvalidConfig("buffer must be greater than zero"));
		}
		if self.data_buffer == 0 {
			return Err(Error::InvalidConfig("data buffer must be greater than zero"));
		}
		if self.worker == 0 {
			return Err(Error::InvalidConfig("worker must be greater than zero"));
		}
		if self.interval.is_zero() {
			return Err(Error::InvalidConfig("interval must be greater than zero"));
		}

		Ok(())
	}
}

mod millis {
	use std::time::Duration;

	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(interval: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u64(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
		u64::deserialize(deserializer).map(Duration::from_millis)
	}
}
