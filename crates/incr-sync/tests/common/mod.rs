#![allow(dead_code)]

use im_incr_sync::{BatchIncrSync, IncrSync, MemoryVersionLog, VersionState};

use std::{
	collections::{BTreeMap, HashMap},
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
	pub id: String,
	pub title: String,
}

/// Conversations of each user plus their version logs, with counters on the store reads.
#[derive(Clone, Default)]
pub struct Fixture {
	pub logs: Arc<MemoryVersionLog>,
	conversations: Arc<RwLock<HashMap<String, BTreeMap<String, Conversation>>>>,
	pub log_reads: Arc<AtomicUsize>,
	pub logged_keys: Arc<RwLock<Vec<String>>>,
	pub finds: Arc<AtomicUsize>,
}

impl Fixture {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn upsert(&self, user: &str, id: &str, title: &str) {
		let state = {
			let mut conversations = self.conversations.write().await;
			let previous = conversations.entry(user.to_string()).or_default().insert(
				id.to_string(),
				Conversation {
					id: id.to_string(),
					title: title.to_string(),
				},
			);

			if previous.is_some() {
				VersionState::Update
			} else {
				VersionState::Insert
			}
		};

		self.logs
			.incr_version(user, &[id.to_string()], state)
			.await
			.expect("log conversation change");
	}

	pub async fn remove(&self, user: &str, id: &str) {
		self.conversations
			.write()
			.await
			.entry(user.to_string())
			.or_default()
			.remove(id);

		self.logs
			.incr_version(user, &[id.to_string()], VersionState::Delete)
			.await
			.expect("log conversation delete");
	}

	/// Removes a conversation without logging it, like a buggy write path would.
	pub async fn remove_unlogged(&self, user: &str, id: &str) {
		self.conversations
			.write()
			.await
			.entry(user.to_string())
			.or_default()
			.remove(id);
	}

	pub async fn head(&self, user: &str) -> (String, u64) {
		let head = self.logs.max_version(user).await.expect("max version");
		(head.id.to_string(), head.version)
	}

	pub fn log_reads(&self) -> usize {
		self.log_reads.load(Ordering::Relaxed)
	}

	pub fn finds(&self) -> usize {
		self.finds.load(Ordering::Relaxed)
	}

	pub fn single(&self, user: &str, version_id: &str, version: u64) -> IncrSync<Conversation> {
		IncrSync::new(user, version_id, version)
			.version({
				let this = self.clone();
				move |key, after, limit| {
					let this = this.clone();
					async move {
						this.log_reads.fetch_add(1, Ordering::Relaxed);
						this.logs.find_change_log(&key, after, limit).await
					}
				}
			})
			.all_ids({
				let this = self.clone();
				move |key| {
					let this = this.clone();
					async move { Ok::<_, im_incr_sync::Error>(this.all_ids(&key).await) }
				}
			})
			.find({
				let this = self.clone();
				move |key, ids| {
					let this = this.clone();
					async move { Ok::<_, im_incr_sync::Error>(this.find(&key, &ids).await) }
				}
			})
			.id(|conversation: &Conversation| conversation.id.clone())
	}

	pub fn batch(
		&self,
		users: &[&str],
		version_ids: &[&str],
		versions: &[u64],
	) -> BatchIncrSync<Conversation> {
		BatchIncrSync::new(
			users.iter().copied(),
			version_ids.iter().copied(),
			versions.iter().copied(),
		)
		.versions({
			let this = self.clone();
			move |keys, afters, limits| {
				let this = this.clone();
				async move {
					this.log_reads.fetch_add(1, Ordering::Relaxed);
					this.logged_keys.write().await.extend(keys.iter().cloned());
					this.logs.find_change_logs(&keys, &afters, &limits).await
				}
			}
		})
		.find({
			let this = self.clone();
			move |key, ids| {
				let this = this.clone();
				async move { Ok::<_, im_incr_sync::Error>(this.find(&key, &ids).await) }
			}
		})
		.id(|conversation: &Conversation| conversation.id.clone())
	}

	async fn all_ids(&self, user: &str) -> Vec<String> {
		self.conversations
			.read()
			.await
			.get(user)
			.map(|conversations| conversations.keys().cloned().collect())
			.unwrap_or_default()
	}

	async fn find(&self, user: &str, ids: &[String]) -> Vec<Conversation> {
		self.finds.fetch_add(1, Ordering::Relaxed);

		let conversations = self.conversations.read().await;
		let Some(conversations) = conversations.get(user) else {
			return vec![];
		};

		ids.iter()
			.filter_map(|id| conversations.get(id).cloned())
			.collect()
	}
}
