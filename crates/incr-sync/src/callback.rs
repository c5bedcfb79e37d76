use std::{collections::HashMap, future::Future};

use futures::{future::BoxFuture, FutureExt, TryFutureExt};

use super::model::VersionLog;

/// Type erased error returned by storage callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub(crate) type Fetched<T> = BoxFuture<'static, Result<T, BoxError>>;

pub(crate) type VersionFn = Box<dyn Fn(String, u64, usize) -> Fetched<VersionLog> + Send + Sync>;

pub(crate) type VersionsFn = Box<
	dyn Fn(Vec<String>, Vec<u64>, Vec<usize>) -> Fetched<HashMap<String, VersionLog>>
		+ Send
		+ Sync,
>;

pub(crate) type CacheMaxVersionFn = Box<dyn Fn(String) -> Fetched<VersionLog> + Send + Sync>;

pub(crate) type CacheMaxVersionsFn =
	Box<dyn Fn(Vec<String>) -> Fetched<HashMap<String, VersionLog>> + Send + Sync>;

pub(crate) type AllIdsFn = Box<dyn Fn(String) -> Fetched<Vec<String>> + Send + Sync>;

pub(crate) type FindFn<A> = Box<dyn Fn(String, Vec<String>) -> Fetched<Vec<A>> + Send + Sync>;

pub(crate) type IdFn<A> = Box<dyn Fn(&A) -> String + Send + Sync>;

/// Erases the concrete future and error types of an user supplied callback result.
pub(crate) fn erase<T, E, Fut>(fut: Fut) -> Fetched<T>
where
	Fut: Future<Output = Result<T, E>> + Send + 'static,
	E: Into<BoxError> + 'static,
{
	fut.err_into::<BoxError>().boxed()
}
