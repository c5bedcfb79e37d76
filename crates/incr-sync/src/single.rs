use std::future::Future;

use tracing::{debug, instrument, trace};

use super::{
	callback::{erase, AllIdsFn, BoxError, CacheMaxVersionFn, FindFn, IdFn, VersionFn},
	model::{VersionId, VersionLog, SYNC_LIMIT},
	resolve::{resolve_delta, ResolvedDelta},
	Error, Stage,
};

/// Answer to an incremental sync of one key.
///
/// When `full` is set the client must drop its local state: `delete` is always empty and
/// `insert` holds the whole collection if the sync was configured with
/// [`IncrSync::all_ids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResponse<A> {
	pub version_id: VersionId,
	pub version: u64,
	pub full: bool,
	pub delete: Vec<String>,
	pub insert: Vec<A>,
	pub update: Vec<A>,
	pub sort_changed: bool,
}

impl<A> SyncResponse<A> {
	pub(crate) fn new(head: &VersionLog, full: bool, delta: ResolvedDelta<A>) -> Self {
		let ResolvedDelta {
			delete,
			insert,
			update,
			sort_changed,
		} = delta;

		Self {
			version_id: head.id.clone(),
			version: head.version,
			full,
			delete,
			insert,
			update,
			sort_changed,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tag {
	/// Read the log after the client's version
	Query,
	/// The client must resync everything
	Full,
	/// The client is up to date
	Equal,
}

/// Whether a client stamp can even be looked up in a log.
pub(crate) fn is_valid_stamp(version_id: &VersionId, version: u64) -> bool {
	version_id.is_valid() && version > 0
}

/// Incremental sync of a single owner key.
///
/// Built with the client's last `(version_id, version)` pair and the storage callbacks, `version`
/// and `find` are required.
pub struct IncrSync<A> {
	key: String,
	version_id: VersionId,
	version_number: u64,
	limit: usize,
	version: Option<VersionFn>,
	cache_max_version: Option<CacheMaxVersionFn>,
	all_ids: Option<AllIdsFn>,
	find: Option<FindFn<A>>,
	id: Option<IdFn<A>>,
}

impl<A: Send + 'static> IncrSync<A> {
	pub fn new(key: impl Into<String>, version_id: impl Into<VersionId>, version: u64) -> Self {
		Self {
			key: key.into(),
			version_id: version_id.into(),
			version_number: version,
			limit: SYNC_LIMIT,
			version: None,
			cache_max_version: None,
			all_ids: None,
			find: None,
			id: None,
		}
	}

	/// Reads the log of `key` with the elements after a version, at most `limit` of them.
	#[must_use]
	pub fn version<F, Fut, E>(mut self, version: F) -> Self
	where
		F: Fn(String, u64, usize) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<VersionLog, E>> + Send + 'static,
		E: Into<BoxError> + 'static,
	{
		self.version = Some(Box::new(move |key, after, limit| {
			erase(version(key, after, limit))
		}));
		self
	}

	/// Cheap lookup of the current log head, lets unchanged clients skip the log read.
	#[must_use]
	pub fn cache_max_version<F, Fut, E>(mut self, cache_max_version: F) -> Self
	where
		F: Fn(String) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<VersionLog, E>> + Send + 'static,
		E: Into<BoxError> + 'static,
	{
		self.cache_max_version = Some(Box::new(move |key| erase(cache_max_version(key))));
		self
	}

	/// Every current element id of `key`, used to fill full resyncs.
	#[must_use]
	pub fn all_ids<F, Fut, E>(mut self, all_ids: F) -> Self
	where
		F: Fn(String) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Vec<String>, E>> + Send + 'static,
		E: Into<BoxError> + 'static,
	{
		self.all_ids = Some(Box::new(move |key| erase(all_ids(key))));
		self
	}

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

	/// Extracts the element id of an entity, enables reporting vanished entities as deleted.
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

	async fn read_version(
		&self,
		version: &VersionFn,
		after: u64,
		limit: usize,
	) -> Result<VersionLog, Error> {
		version(self.key.clone(), after, limit)
			.await
			.map_err(|source| Error::Fetch {
				key: self.key.clone(),
				stage: Stage::VersionLog,
				source,
			})
	}

	async fn current_version(&self, version: &VersionFn) -> Result<(Tag, VersionLog), Error> {
		let valid = is_valid_stamp(&self.version_id, self.version_number);

		let Some(cache_max_version) = &self.cache_max_version else {
			return if valid {
				let log = self
					.read_version(version, self.version_number, self.limit)
					.await?;
				Ok((Tag::Query, log))
			} else {
				Ok((Tag::Full, self.read_version(version, 0, 0).await?))
			};
		};

		let head = cache_max_version(self.key.clone())
			.await
			.map_err(|source| Error::Fetch {
				key: self.key.clone(),
				stage: Stage::CacheMaxVersion,
				source,
			})?;

		if !valid || head.id != self.version_id {
			return Ok((Tag::Full, head));
		}

		if head.version == self.version_number {
			return Ok((Tag::Equal, head));
		}

		let log = self
			.read_version(version, self.version_number, self.limit)
			.await?;

		Ok((Tag::Query, log))
	}

	#[instrument(
		name = "incr_sync",
		skip(self),
		fields(key = %self.key, version_id = %self.version_id, version = self.version_number),
		err
	)]
	pub async fn build(self) -> Result<SyncResponse<A>, Error> {
		if self.key.is_empty() {
			return Err(Error::Config("version key is empty"));
		}
		let Some(version) = &self.version else {
			return Err(Error::Config("version function is not set"));
		};
		let Some(find) = &self.find else {
			return Err(Error::Config("find function is not set"));
		};

		let (tag, log) = self.current_version(version).await?;

		let full = match tag {
			Tag::Query => log.is_stale_for(&self.version_id, self.version_number),
			Tag::Full => true,
			Tag::Equal => false,
		};

		debug!(?tag, full, current_version = log.version, "Classified client version;");

		let delta = if full {
			let insert = if let Some(all_ids) = &self.all_ids {
				let ids = all_ids(self.key.clone())
					.await
					.map_err(|source| Error::Fetch {
						key: self.key.clone(),
						stage: Stage::AllIds,
						source,
					})?;

				trace!(ids_count = ids.len(), "Resolving full resync;");

				if ids.is_empty() {
					vec![]
				} else {
					find(self.key.clone(), ids)
						.await
						.map_err(|source| Error::Fetch {
							key: self.key.clone(),
							stage: Stage::Find,
							source,
						})?
				}
			} else {
				vec![]
			};

			ResolvedDelta {
				insert,
				..Default::default()
			}
		} else if tag == Tag::Equal {
			ResolvedDelta::default()
		} else {
			resolve_delta(
				&self.key,
				log.partition(self.version_number),
				find,
				self.id.as_ref(),
			)
			.await?
		};

		Ok(SyncResponse::new(&log, full, delta))
	}
}
