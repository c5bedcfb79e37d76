use std::collections::HashSet;

use futures_concurrency::future::TryJoin;
use tracing::debug;

use super::{
	callback::{FindFn, IdFn},
	model::DeltaIds,
	Error, Stage,
};

/// Entities behind a [`DeltaIds`].
#[derive(Debug)]
pub(crate) struct ResolvedDelta<A> {
	pub delete: Vec<String>,
	pub insert: Vec<A>,
	pub update: Vec<A>,
	pub sort_changed: bool,
}

impl<A> Default for ResolvedDelta<A> {
	fn default() -> Self {
		Self {
			delete: vec![],
			insert: vec![],
			update: vec![],
			sort_changed: false,
		}
	}
}

async fn find<A>(find: &FindFn<A>, key: &str, ids: &[String]) -> Result<Vec<A>, Error> {
	if ids.is_empty() {
		return Ok(vec![]);
	}

	find(key.to_string(), ids.to_vec())
		.await
		.map_err(|source| Error::Fetch {
			key: key.to_string(),
			stage: Stage::Find,
			source,
		})
}

/// Fetches the inserted and updated entities of `delta`.
///
/// With an id extractor, changed ids that didn't resolve to any entity are reported as deleted:
/// the entity went away through a path that didn't log its deletion.
pub(crate) async fn resolve_delta<A>(
	key: &str,
	delta: DeltaIds,
	find_fn: &FindFn<A>,
	id_fn: Option<&IdFn<A>>,
) -> Result<ResolvedDelta<A>, Error> {
	let DeltaIds {
		insert: insert_ids,
		update: update_ids,
		mut delete,
		sort_changed,
	} = delta;

	let (insert, update) = (
		find(find_fn, key, &insert_ids),
		find(find_fn, key, &update_ids),
	)
		.try_join()
		.await?;

	if let Some(id_fn) = id_fn {
		let changed_count = insert_ids.len() + update_ids.len();

		if insert.len() + update.len() != changed_count {
			let found = insert
				.iter()
				.chain(&update)
				.map(|entity| id_fn(entity))
				.collect::<HashSet<_>>();

			let missing = insert_ids
				.into_iter()
				.chain(update_ids)
				.filter(|id| !found.contains(id))
				.collect::<Vec<_>>();

			if !missing.is_empty() {
				debug!(
					%key,
					missing_count = missing.len(),
					"Changed ids no longer resolve to entities, reporting them as deleted;"
				);
				delete.extend(missing);
			}
		}
	}

	Ok(ResolvedDelta {
		delete,
		insert,
		update,
		sort_changed,
	})
}
