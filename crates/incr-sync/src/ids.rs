use im_utils::id_hash;

use super::model::{VersionId, VersionLog};

/// Answer to an "are my ids still the same" check of a whole id list.
///
/// `version` is the hash of the current list, clients send it back on their next check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdsSyncResponse {
	pub version: u64,
	pub version_id: VersionId,
	pub equal: bool,
	pub ids: Vec<String>,
}

/// Compares the hash a client holds against the current `ids` of a key, sending the ids back only
/// when they changed.
#[must_use]
pub fn sync_ids(client_hash: u64, head: &VersionLog, mut ids: Vec<String>) -> IdsSyncResponse {
	let version = id_hash(&ids);
	let equal = client_hash == version;

	if equal {
		ids.clear();
	}

	IdsSyncResponse {
		version,
		version_id: head.id.clone(),
		equal,
		ids,
	}
}
