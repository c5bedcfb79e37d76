//!
//! # Batcher
//!
//! Key sharded batch aggregator.
//!
//! Producers [`Batcher::put`] items, a single scheduler task groups them by key into rounds and
//! routes each group to one of [`Config::worker`] lanes, where a user handler processes it.
//!
//! ```no_run
//! use im_batcher::{Batch, Batcher, Config};
//! use im_utils::hash_sharding;
//!
//! use std::convert::Infallible;
//!
//! # async fn example() -> Result<(), im_batcher::Error> {
//! let config = Config::default();
//!
//! let batcher = Batcher::new(config)
//!     .with_key(|msg: &(String, String)| msg.0.clone())
//!     .with_sharding(hash_sharding(config.worker))
//!     .with_do(|_worker_id, batch: Batch<(String, String)>| async move {
//!         println!("{batch}");
//!         Ok::<_, Infallible>(())
//!     });
//!
//! batcher.start()?;
//! batcher.put(("si_1_2".to_string(), "hello".to_string())).await?;
//! batcher.close().await;
//! # Ok(())
//! # }
//! ```
//!

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod batcher;
mod config;
mod error;
mod message;
mod scheduler;
mod worker;

pub use batcher::Batcher;
pub use config::{
	Config, DEFAULT_BUFFER, DEFAULT_DATA_BUFFER, DEFAULT_INTERVAL, DEFAULT_SIZE, DEFAULT_WORKER,
};
pub use error::Error;
pub use message::{Batch, TriggerId, WorkerId};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
