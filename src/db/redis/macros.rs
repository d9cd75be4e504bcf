/// Read-through caching around an async lookup.
///
/// Returns the cached value for `$key` when present. On a miss it awaits
/// `$lookup`, queues the result for a background write with `$ttl` seconds to
/// live, and returns it. Errors from either side propagate with `?`, so the
/// enclosing function must return an `AppResult`. Use it as the tail
/// expression of that function so the value type is inferred.
///
/// # Example
/// ```rust,ignore
/// async fn similar_jokes(&self, id: JokeId) -> AppResult<Vec<SimilarJoke>> {
///     let key = CacheKey::SimilarJokes { joke_id: id, limit: self.limit };
///     cached!(self.cache, key, self.ttl, self.query_similar_jokes(id))
/// }
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $lookup:expr) => {{
        match $cache.get_from_cache(&$key).await? {
            Some(hit) => Ok(hit),
            None => {
                let fresh = $lookup.await?;
                $cache.set_in_background(&$key, &fresh, $ttl);
                Ok(fresh)
            }
        }
    }};
}
