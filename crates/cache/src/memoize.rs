//! Memoizing wrapper around an async fallible function.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::Cache;

/// A function whose successful results are served from a [`Cache`].
///
/// Built with [`memoize`].
pub struct Memoized<A, V, F, K> {
    func: F,
    cache: Arc<Cache<V>>,
    key_fn: K,
    ttl: Option<Duration>,
    _args: PhantomData<fn(A)>,
}

/// Wrap `func` so calls with the same `key_fn(args)` hit `cache`.
pub fn memoize<A, V, F, K>(func: F, cache: Arc<Cache<V>>, key_fn: K) -> Memoized<A, V, F, K>
where
    V: Clone,
    K: Fn(&A) -> String,
{
    Memoized {
        func,
        cache,
        key_fn,
        ttl: None,
        _args: PhantomData,
    }
}

impl<A, V, F, K> Memoized<A, V, F, K>
where
    V: Clone,
    K: Fn(&A) -> String,
{
    /// Store results with `ttl` instead of the cache default.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn cache(&self) -> &Arc<Cache<V>> {
        &self.cache
    }

    pub async fn call<Fut, E>(&self, args: A) -> Result<V, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = (self.key_fn)(&args);
        self.cache
            .get_or_try_insert_with(&key, self.ttl, || (self.func)(args))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn repeated_calls_hit_the_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cache = Arc::new(Cache::new(CacheConfig::default()));

        let square = memoize(
            move |n: u64| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<u64, String>(n * n) }
            },
            cache.clone(),
            |n: &u64| n.to_string(),
        );

        assert_eq!(square.call(4).await, Ok(16));
        assert_eq!(square.call(4).await, Ok(16));
        assert_eq!(square.call(5).await, Ok(25));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn errors_pass_through_uncached() {
        let cache: Arc<Cache<u64>> = Arc::new(Cache::default());
        let failing = memoize(
            |_: u64| async { Err::<u64, &str>("unavailable") },
            cache.clone(),
            |n: &u64| n.to_string(),
        );

        assert_eq!(failing.call(1).await, Err("unavailable"));
        assert!(cache.is_empty());
    }
}
