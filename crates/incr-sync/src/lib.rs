//!
//! # Incremental Sync
//!
//! Version log based incremental synchronization. Every owner key (an user's conversations, a
//! user's friends, a group's members...) has a version log recording which elements were
//! inserted, updated or deleted at which version. Clients hold the `(version_id, version)` pair
//! of their last sync and ask only for what changed since then.
//!
//! [`IncrSync`] answers that for a single key and [`BatchIncrSync`] for many keys in a single
//! round trip, optionally short circuiting unchanged keys through a cached max version lookup.
//! Both are stateless: storage is reached through the async callbacks given to the builders.
//!
//! When the client handle doesn't match the current log anymore, or the log window lost some
//! history, the response is flagged as `full` and the caller must resend the whole collection.
//!
//! ## Basic example
//!
//! ```
//! use im_incr_sync::{IncrSync, MemoryVersionLog, VersionState};
//! use std::{convert::Infallible, sync::Arc};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = Arc::new(MemoryVersionLog::new());
//!     store.incr_version("u1", &["c1".to_string()], VersionState::Insert).await.unwrap();
//!
//!     let response = IncrSync::<String>::new("u1", "", 0)
//!         .version({
//!             let store = Arc::clone(&store);
//!             move |key, after, limit| {
//!                 let store = Arc::clone(&store);
//!                 async move { store.find_change_log(&key, after, limit).await }
//!             }
//!         })
//!         .all_ids(|_key| async { Ok::<_, Infallible>(vec!["c1".to_string()]) })
//!         .find(|_key, ids| async move { Ok::<_, Infallible>(ids) })
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     assert!(response.full);
//!     assert_eq!(response.insert, vec!["c1".to_string()]);
//! }
//! ```

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

use std::fmt;

mod batch;
mod callback;
mod ids;
mod model;
mod resolve;
mod single;
mod store;

pub use batch::{BatchIncrSync, BatchSyncResponse};
pub use callback::BoxError;
pub use ids::{sync_ids, IdsSyncResponse};
pub use model::{
	DeltaIds, UnknownVersionState, VersionId, VersionLog, VersionLogElem, VersionState,
	DEFAULT_DELETE_VERSION, FIRST_VERSION, SYNC_LIMIT, VERSION_SORT_CHANGE_ID,
};
pub use single::{IncrSync, SyncResponse};
pub use store::MemoryVersionLog;

/// Which collaborator call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
	CacheMaxVersion,
	VersionLog,
	AllIds,
	Find,
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::CacheMaxVersion => "read cached max version",
			Self::VersionLog => "read version log",
			Self::AllIds => "list all ids",
			Self::Find => "find entities",
		})
	}
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("invalid sync options: {0}")]
	Config(&'static str),
	#[error("failed to {stage} <key='{key}'>: {source}")]
	Fetch {
		key: String,
		stage: Stage,
		#[source]
		source: BoxError,
	},
	#[error("failed to {stage} for a batch of {keys} keys: {source}")]
	BatchFetch {
		keys: usize,
		stage: Stage,
		#[source]
		source: BoxError,
	},
	#[error("version log missing from store response <key='{key}'>")]
	MissingVersionLog { key: String },
	#[error("tried to log an empty elements list <did='{did}'>")]
	EmptyElements { did: String },
}
