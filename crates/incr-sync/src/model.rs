use std::{
	fmt,
	time::{SystemTime, UNIX_EPOCH},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version number given to a version log when it's created.
pub const FIRST_VERSION: u64 = 1;

/// Value of [`VersionLog::deleted`] for logs that were never reset.
pub const DEFAULT_DELETE_VERSION: u64 = 0;

/// Max amount of changed elements a single incremental read may return, above that
/// the client has to do a full resync.
pub const SYNC_LIMIT: usize = 200;

/// Reserved element id recording that the sort order of the collection changed, it doesn't point
/// to any entity.
pub const VERSION_SORT_CHANGE_ID: &str = "____S_O_R_T_I_D____";

const VERSION_ID_LEN: usize = 24;

/// Opaque handle of one instance of a version log.
///
/// A new handle is minted every time a log is created or rotated, so a client holding an old
/// handle knows that its history is gone. Only equality is meaningful, never ordering.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
	/// Mints a new handle: 4 bytes of big endian unix seconds followed by 8 random bytes, hex
	/// encoded, the same shape as a document store object id.
	#[must_use]
	pub fn generate() -> Self {
		let secs = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.map_or(0, |elapsed| u32::try_from(elapsed.as_secs()).unwrap_or(u32::MAX));

		let random = Uuid::new_v4();

		let mut bytes = [0; VERSION_ID_LEN / 2];
		bytes[..4].copy_from_slice(&secs.to_be_bytes());
		bytes[4..].copy_from_slice(&random.as_bytes()[..8]);

		Self(hex::encode(bytes))
	}

	/// A handle is valid when it is exactly 24 hex digits and not all zeros.
	#[must_use]
	pub fn is_valid(&self) -> bool {
		self.0.len() == VERSION_ID_LEN
			&& self.0.bytes().all(|b| b.is_ascii_hexdigit())
			&& self.0.bytes().any(|b| b != b'0')
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for VersionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for VersionId {
	fn from(id: String) -> Self {
		Self(id)
	}
}

impl From<&str> for VersionId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

impl PartialEq<str> for VersionId {
	fn eq(&self, other: &str) -> bool {
		self.0 == other
	}
}

/// What happened to an element at a given version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
#[repr(i32)]
pub enum VersionState {
	Insert = 1,
	Delete = 2,
	Update = 3,
}

impl From<VersionState> for i32 {
	fn from(state: VersionState) -> Self {
		state as Self
	}
}

#[derive(Debug, thiserror::Error)]
#[error("unknown version state code: {0}")]
pub struct UnknownVersionState(pub i32);

impl TryFrom<i32> for VersionState {
	type Error = UnknownVersionState;

	fn try_from(code: i32) -> Result<Self, Self::Error> {
		match code {
			1 => Ok(Self::Insert),
			2 => Ok(Self::Delete),
			3 => Ok(Self::Update),
			_ => Err(UnknownVersionState(code)),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLogElem {
	pub eid: String,
	pub state: VersionState,
	pub version: u64,
	pub last_update: DateTime<Utc>,
}

/// Change history of one owner key (an user, a conversation, a group...).
///
/// `logs` is sorted by version and only holds a window of the history; `log_len` counts every
/// change folded in the window, so when both disagree some history was evicted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionLog {
	pub id: VersionId,
	pub did: String,
	pub version: u64,
	pub deleted: u64,
	pub last_update: DateTime<Utc>,
	pub logs: Vec<VersionLogElem>,
	pub log_len: usize,
}

/// Element ids changed after some version, split by kind of change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaIds {
	pub insert: Vec<String>,
	pub update: Vec<String>,
	pub delete: Vec<String>,
	pub sort_changed: bool,
}

impl DeltaIds {
	/// Inserted and updated ids, in this order.
	#[must_use]
	pub fn changed(&self) -> Vec<String> {
		self.insert.iter().chain(&self.update).cloned().collect()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.insert.is_empty() && self.update.is_empty() && self.delete.is_empty() && !self.sort_changed
	}
}

impl VersionLog {
	/// Splits the elements recorded after `after` into inserted, updated and deleted ids.
	///
	/// Elements at or before `after` are skipped. The sort sentinel only sets
	/// [`DeltaIds::sort_changed`].
	#[must_use]
	pub fn partition(&self, after: u64) -> DeltaIds {
		let mut delta = DeltaIds::default();

		for elem in self.logs.iter().filter(|elem| elem.version > after) {
			if elem.eid == VERSION_SORT_CHANGE_ID {
				delta.sort_changed = true;
				continue;
			}

			match elem.state {
				VersionState::Insert => delta.insert.push(elem.eid.clone()),
				VersionState::Update => delta.update.push(elem.eid.clone()),
				VersionState::Delete => delta.delete.push(elem.eid.clone()),
			}
		}

		delta
	}

	/// Whether a client holding `(version_id, version)` can't be served a delta from this log.
	#[must_use]
	pub fn is_stale_for(&self, version_id: &VersionId, version: u64) -> bool {
		&self.id != version_id || self.version < version || self.logs.len() != self.log_len
	}

	/// Same log without its elements, like a cached head.
	#[must_use]
	pub fn head(&self) -> Self {
		Self {
			id: self.id.clone(),
			did: self.did.clone(),
			version: self.version,
			deleted: self.deleted,
			last_update: self.last_update,
			logs: vec![],
			log_len: 0,
		}
	}
}
