//! Scene-cache coordinator: tracks which endpoints are believed to hold the
//! job's scene so requests can omit the (potentially large) scene blob.

use std::collections::HashMap;
use std::sync::Mutex;

/// Per-job scene cache state shared between shard executor threads.
///
/// The scene identifier is chosen once at construction and stays constant for
/// the job's lifetime; workers use it to decide whether their cached scene
/// still matches. Every query and update takes the lock, so the pre-request
/// read and the post-response write are totally ordered per endpoint.
#[derive(Debug)]
pub struct SceneCache {
    scene_id: u64,
    warm: Mutex<HashMap<String, bool>>,
}

impl SceneCache {
    /// Create a cache with a random scene identifier.
    pub fn new() -> Self {
        Self::with_scene_id(rand::random::<u64>())
    }

    /// Create a cache with a fixed scene identifier (tests).
    pub fn with_scene_id(scene_id: u64) -> Self {
        Self {
            scene_id,
            warm: Mutex::new(HashMap::new()),
        }
    }

    /// The job-constant scene identifier.
    pub fn scene_id(&self) -> u64 {
        self.scene_id
    }

    /// Whether `endpoint_id` is believed to hold the scene.
    pub fn is_warm(&self, endpoint_id: &str) -> bool {
        let warm = self.warm.lock().expect("scene cache lock poisoned");
        warm.get(endpoint_id).copied().unwrap_or(false)
    }

    /// Record the latest belief for `endpoint_id`.
    pub fn set_warm(&self, endpoint_id: &str, value: bool) {
        let mut warm = self.warm.lock().expect("scene cache lock poisoned");
        warm.insert(endpoint_id.to_owned(), value);
    }
}

impl Default for SceneCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_start_cold() {
        let cache = SceneCache::with_scene_id(1);
        assert!(!cache.is_warm("http://a"));
    }

    #[test]
    fn belief_follows_most_recent_update() {
        let cache = SceneCache::with_scene_id(1);
        cache.set_warm("http://a", true);
        assert!(cache.is_warm("http://a"));
        cache.set_warm("http://a", false);
        assert!(!cache.is_warm("http://a"));
        // Other endpoints are unaffected.
        assert!(!cache.is_warm("http://b"));
    }
}
