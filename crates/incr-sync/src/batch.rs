use std::{
	collections::{HashMap, HashSet},
	future::Future,
};

use futures_concurrency::future::TryJoin;
use tracing::{debug, instrument, trace};

use super::{
	callback::{erase, BoxError, CacheMaxVersionsFn, FindFn, IdFn, VersionsFn},
	model::{VersionId, VersionLog, SYNC_LIMIT},
	resolve::{resolve_delta, ResolvedDelta},
	single::{is_valid_stamp, SyncResponse, Tag},
	Error, Stage,
};

/// Answers of a batch incremental sync, one per requested key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSyncResponse<A> {
	pub results: HashMap<String, SyncResponse<A>>,
}

/// Log reads gathered while classifying the keys, sent to the store in a single call.
#[derive(Debug, Default)]
struct LogReads {
	keys: Vec<String>,
	afters: Vec<u64>,
	limits: Vec<usize>,
}

impl LogReads {
	fn push(&mut self, key: &str, after: u64, limit: usize) {
		self.keys.push(key.to_string());
		self.afters.push(after);
		self.limits.push(limit);
	}

	fn is_empty(&self) -> bool {
		self.keys.is_empty()
	}
}

/// Incremental sync of many owner keys in a single round trip.
///
/// `keys`, `version_ids` and `versions` are parallel lists with the client's stamp of each key.
/// Keys are classified as up to date, needing a bounded log read, or needing a full resync. With
/// a [`BatchIncrSync::cache_max_versions`] lookup, up to date keys never reach the log store.
/// Full keys get no entities: callers resolve their complete lists on their own.
pub struct BatchIncrSync<A> {
	keys: Vec<String>,
	version_ids: Vec<VersionId>,
	version_numbers: Vec<u64>,
	limit: usize,
	versions: Option<VersionsFn>,
	cache_max_versions: Option<CacheMaxVersionsFn>,
	find: Option<FindFn<A>>,
	id: Option<IdFn<A>>,
}

impl<A: Send + 'static> BatchIncrSync<A> {
	pub fn new(
		keys: impl IntoIterator<Item = impl Into<String>>,
		version_ids: impl IntoIterator<Item = impl Into<VersionId>>,
		versions: impl IntoIterator<Item = u64>,
	) -> Self {
		Self {
			keys: keys.into_iter().map(Into::into).collect(),
			version_ids: version_ids.into_iter().map(Into::into).collect(),
			version_numbers: versions.into_iter().collect(),
			limit: SYNC_LIMIT,
			versions: None,
			cache_max_versions: None,
			find: None,
			id: None,
		}
	}

	/// Reads the logs of many keys at once, each one after its own version and with its own limit.
	#[must_use]
	pub fn versions<F, Fut, E>(mut self, versions: F) -> Self
	where
		F: Fn(Vec<String>, Vec<u64>, Vec<usize>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<HashMap<String, VersionLog>, E>> + Send + 'static,
		E: Into<BoxError> + 'static,
	{
		self.versions = Some(Box::new(move |keys, afters, limits| {
			erase(versions(keys, afters, limits))
		}));
		self
	}

	#[must_use]
	pub fn cache_max_versions<F, Fut, E>(mut self, cache_max_versions: F) -> Self
	where
		F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<HashMap<String, VersionLog>, E>> + Send + 'static,
		E: Into<BoxError> + 'static,
	{
		self.cache_max_versions = Some(Box::new(move |keys| erase(cache_max_versions(keys))));
		self
	}

	/// Fetches the entities of one key, called once per key with changes.
	#[must_use]
	pub fn find<F, Fut, E>(mut self, find: F) -> Self
	where
		F: Fn(String, Vec<String>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Vec<A>, E>> + Send + 'static,
		E: Into<BoxError> + 'static,
	{
		self.find = Some(Box::new(move |key, ids| erase(find(key, ids))));
		self
	}

	#[must_use]
	pub fn id(mut self, id: impl Fn(&A) -> String + Send + Sync + 'static) -> Self {
		self.id = Some(Box::new(id));
		self
	}

	#[must_use]
	pub fn limit(mut self, limit: usize) -> Self {
		self.limit = limit;
		self
	}

	fn check(&self) -> Result<(&VersionsFn, &FindFn<A>), Error> {
		if self.keys.is_empty() {
			return Err(Error::Config("version keys are empty"));
		}
		if self.keys.len() != self.version_ids.len() || self.keys.len() != self.version_numbers.len()
		{
			return Err(Error::Config(
				"version keys, ids and numbers must have the same length",
			));
		}
		let mut seen = HashSet::with_capacity(self.keys.len());
		if !self.keys.iter().all(|key| seen.insert(key)) {
			return Err(Error::Config("version keys must be unique"));
		}
		let Some(versions) = &self.versions else {
			return Err(Error::Config("versions function is not set"));
		};
		let Some(find) = &self.find else {
			return Err(Error::Config("find function is not set"));
		};

		Ok((versions, find))
	}

	fn stamps(&self) -> impl Iterator<Item = (&String, &VersionId, u64)> {
		self.keys
			.iter()
			.zip(&self.version_ids)
			.zip(&self.version_numbers)
			.map(|((key, version_id), &version)| (key, version_id, version))
	}

	async fn read_versions(
		versions: &VersionsFn,
		reads: LogReads,
	) -> Result<HashMap<String, VersionLog>, Error> {
		let LogReads {
			keys,
			afters,
			limits,
		} = reads;
		let keys_count = keys.len();

		versions(keys, afters, limits)
			.await
			.map_err(|source| Error::BatchFetch {
				keys: keys_count,
				stage: Stage::VersionLog,
				source,
			})
	}

	async fn current_versions(
		&self,
		versions: &VersionsFn,
	) -> Result<(Vec<Tag>, HashMap<String, VersionLog>), Error> {
		let mut tags = Vec::with_capacity(self.keys.len());
		let mut reads = LogReads::default();

		let Some(cache_max_versions) = &self.cache_max_versions else {
			for (key, version_id, version) in self.stamps() {
				if is_valid_stamp(version_id, version) {
					tags.push(Tag::Query);
					reads.push(key, version, self.limit);
				} else {
					tags.push(Tag::Full);
					reads.push(key, 0, 0);
				}
			}

			return Ok((tags, Self::read_versions(versions, reads).await?));
		};

		let mut logs = cache_max_versions(self.keys.clone())
			.await
			.map_err(|source| Error::BatchFetch {
				keys: self.keys.len(),
				stage: Stage::CacheMaxVersion,
				source,
			})?;

		for (key, version_id, version) in self.stamps() {
			let tag = match logs.get(key) {
				None => Tag::Full,
				Some(_) if !is_valid_stamp(version_id, version) => Tag::Full,
				Some(head) if &head.id != version_id => Tag::Full,
				Some(head) if head.version == version => Tag::Equal,
				Some(_) => Tag::Query,
			};

			match tag {
				Tag::Query => {
					logs.remove(key);
					reads.push(key, version, self.limit);
				}
				// Not cached yet, the head has to come from the log store
				Tag::Full if !logs.contains_key(key) => reads.push(key, 0, 0),
				_ => {}
			}

			tags.push(tag);
		}

		trace!(
			equal_count = tags.iter().filter(|tag| **tag == Tag::Equal).count(),
			reads_count = reads.keys.len(),
			"Classified keys through the cache;"
		);

		if !reads.is_empty() {
			logs.extend(Self::read_versions(versions, reads).await?);
		}

		Ok((tags, logs))
	}

	#[instrument(name = "batch_incr_sync", skip(self), fields(keys_count = self.keys.len()), err)]
	pub async fn build(self) -> Result<BatchSyncResponse<A>, Error> {
		let (versions, find) = self.check()?;

		let (tags, logs) = self.current_versions(versions).await?;

		let entries = self
			.stamps()
			.zip(tags)
			.map(|((key, version_id, version), tag)| {
				let log = logs.get(key).ok_or_else(|| Error::MissingVersionLog {
					key: key.clone(),
				})?;

				let full = match tag {
					Tag::Query => log.is_stale_for(version_id, version),
					Tag::Full => true,
					Tag::Equal => false,
				};

				Ok((key, log, version, tag, full))
			})
			.collect::<Result<Vec<_>, Error>>()?;

		debug!(
			full_count = entries.iter().filter(|(.., full)| *full).count(),
			"Classified client versions;"
		);

		let id = self.id.as_ref();

		let deltas = entries
			.iter()
			.map(|&(key, log, version, tag, full)| async move {
				if full || tag == Tag::Equal {
					return Ok(ResolvedDelta::default());
				}

				resolve_delta(key, log.partition(version), find, id).await
			})
			.collect::<Vec<_>>()
			.try_join()
			.await?;

		let results = entries
			.into_iter()
			.zip(deltas)
			.map(|((key, log, _, _, full), delta)| {
				(key.clone(), SyncResponse::new(log, full, delta))
			})
			.collect();

		Ok(BatchSyncResponse { results })
	}
}
