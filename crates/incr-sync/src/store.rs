use std::collections::{hash_map::Entry, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, instrument, trace};

use super::{
	model::{
		VersionId, VersionLog, VersionLogElem, VersionState, DEFAULT_DELETE_VERSION, FIRST_VERSION,
	},
	Error,
};

/// Version logs kept in memory, with the same read and write semantics as the document store
/// backed ones.
///
/// Every element id appears at most once in a log: logging an element again moves it to the
/// newest version, so a log never grows beyond the size of its collection.
#[derive(Debug, Default)]
pub struct MemoryVersionLog {
	logs: RwLock<HashMap<String, VersionLog>>,
}

fn new_log(did: &str) -> VersionLog {
	VersionLog {
		id: VersionId::generate(),
		did: did.to_string(),
		version: FIRST_VERSION,
		deleted: DEFAULT_DELETE_VERSION,
		last_update: Utc::now(),
		logs: vec![],
		log_len: 0,
	}
}

fn change_log(log: &VersionLog, after: u64, limit: usize) -> VersionLog {
	if after == 0 && limit == 0 {
		return log.head();
	}

	let mut logs = if log.version < after || log.deleted >= after {
		vec![]
	} else {
		log.logs
			.iter()
			.filter(|elem| elem.version > after)
			.cloned()
			.collect::<Vec<_>>()
	};

	let log_len = logs.len();

	// Too many changes for a delta, the reader will see `log_len != logs.len()`
	if limit > 0 && log_len > limit {
		logs.clear();
	}

	VersionLog {
		logs,
		log_len,
		..log.head()
	}
}

impl MemoryVersionLog {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Records that `eids` changed to `state`, bumping the log version once for all of them.
	#[instrument(skip(self, eids), fields(eids_count = eids.len()), err)]
	pub async fn incr_version(
		&self,
		did: &str,
		eids: &[String],
		state: VersionState,
	) -> Result<VersionLog, Error> {
		if eids.is_empty() {
			return Err(Error::EmptyElements {
				did: did.to_string(),
			});
		}

		let now = Utc::now();
		let mut logs = self.logs.write().await;

		let log = match logs.entry(did.to_string()) {
			Entry::Occupied(entry) => {
				let log = entry.into_mut();
				log.version += 1;
				log.logs.retain(|elem| !eids.contains(&elem.eid));
				log
			}
			Entry::Vacant(entry) => {
				debug!("Creating version log;");
				entry.insert(new_log(did))
			}
		};

		let version = log.version;
		log.last_update = now;
		log.logs.extend(eids.iter().map(|eid| VersionLogElem {
			eid: eid.clone(),
			state,
			version,
			last_update: now,
		}));
		log.log_len = log.logs.len();

		trace!(version, "Logged elements;");

		Ok(log.head())
	}

	/// Reads the elements of `did` changed after version `after`.
	///
	/// `after == 0 && limit == 0` reads only the head. When more than `limit` elements changed
	/// none are returned, but `log_len` still counts them. Missing logs are created empty.
	pub async fn find_change_log(
		&self,
		did: &str,
		after: u64,
		limit: usize,
	) -> Result<VersionLog, Error> {
		let mut logs = self.logs.write().await;

		let log = logs
			.entry(did.to_string())
			.or_insert_with(|| new_log(did));

		Ok(change_log(log, after, limit))
	}

	/// Batch form of [`MemoryVersionLog::find_change_log`], `dids`, `afters` and `limits` are
	/// parallel lists.
	pub async fn find_change_logs(
		&self,
		dids: &[String],
		afters: &[u64],
		limits: &[usize],
	) -> Result<HashMap<String, VersionLog>, Error> {
		let mut logs = self.logs.write().await;

		Ok(dids
			.iter()
			.zip(afters)
			.zip(limits)
			.map(|((did, &after), &limit)| {
				let log = logs
					.entry(did.clone())
					.or_insert_with(|| new_log(did));

				(did.clone(), change_log(log, after, limit))
			})
			.collect())
	}

	/// Current head of `did`, what a max version cache would hold.
	pub async fn max_version(&self, did: &str) -> Result<VersionLog, Error> {
		self.find_change_log(did, 0, 0).await
	}

	pub async fn max_versions(&self, dids: &[String]) -> Result<HashMap<String, VersionLog>, Error> {
		let mut logs = self.logs.write().await;

		Ok(dids
			.iter()
			.map(|did| {
				let log = logs
					.entry(did.clone())
					.or_insert_with(|| new_log(did));

				(did.clone(), log.head())
			})
			.collect())
	}

	/// Drops the log of `did`, its next access starts a new log with a new [`VersionId`].
	pub async fn delete(&self, did: &str) -> bool {
		self.logs.write().await.remove(did).is_some()
	}

	/// Drops every log untouched since `deadline`, returning how many were dropped.
	pub async fn delete_unchanged_before(&self, deadline: DateTime<Utc>) -> usize {
		let mut logs = self.logs.write().await;
		let before = logs.len();
		logs.retain(|_, log| log.last_update >= deadline);

		before - logs.len()
	}
}
