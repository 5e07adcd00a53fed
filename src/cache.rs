// src/cache.rs - Per-camera LRU frame cache and neighbour preloading
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::video::{Frame, FrameSource, SeekMode, VideoLibrary};

struct Node<K, V> {
    key: K,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Least-recently-used map: a hash map into a slab-backed doubly linked list.
/// `head` is the most recently used entry, `tail` the next to be evicted.
pub struct Lru<K, V> {
    capacity: usize,
    map: HashMap<K, usize>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K: Hash + Eq + Clone, V> Lru<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Looks up `key` and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.map.get(key)?;
        self.detach(idx);
        self.push_front(idx);
        self.nodes[idx].as_ref().map(|n| &n.value)
    }

    /// Inserts `value` unless `key` is already present, in which case only
    /// its recency is refreshed. Returns the evicted key, if any.
    pub fn put(&mut self, key: K, value: V) -> Option<K> {
        if let Some(&idx) = self.map.get(&key) {
            self.detach(idx);
            self.push_front(idx);
            return None;
        }

        let node = Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        };
        let idx = match self.free.pop() {
            Some(idx) => {
                self.nodes[idx] = Some(node);
                idx
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.map.insert(key, idx);
        self.push_front(idx);

        if self.map.len() > self.capacity {
            self.pop_back()
        } else {
            None
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.nodes.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
    }

    /// Keys from most to least recently used.
    pub fn keys(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.map.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let Some(node) = self.nodes[idx].as_ref() else {
                break;
            };
            keys.push(node.key.clone());
            cursor = node.next;
        }
        keys
    }

    fn pop_back(&mut self) -> Option<K> {
        let idx = self.tail?;
        self.detach(idx);
        let node = self.nodes[idx].take()?;
        self.free.push(idx);
        self.map.remove(&node.key);
        Some(node.key)
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match self.nodes[idx].as_ref() {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.nodes[p].as_mut() {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.nodes[nx].as_mut() {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(n) = self.nodes[idx].as_mut() {
            n.prev = None;
            n.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(n) = self.nodes[idx].as_mut() {
            n.prev = None;
            n.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(n) = self.nodes[h].as_mut() {
                n.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }
}

/// Decoded frames keyed by camera, each camera bounded by the same capacity.
pub struct FrameCache {
    capacity: usize,
    cameras: HashMap<String, Lru<usize, Frame>>,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cameras: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&mut self, camera: &str, frame: usize) -> Option<Frame> {
        self.cameras.get_mut(camera)?.get(&frame).cloned()
    }

    pub fn contains(&self, camera: &str, frame: usize) -> bool {
        self.cameras.get(camera).is_some_and(|c| c.contains(&frame))
    }

    pub fn put(&mut self, camera: &str, frame: usize, data: Frame) {
        let capacity = self.capacity;
        let lru = self
            .cameras
            .entry(camera.to_string())
            .or_insert_with(|| Lru::new(capacity));
        if let Some(evicted) = lru.put(frame, data) {
            debug!("Evicted frame {} of camera {}", evicted, camera);
        }
    }

    pub fn len(&self, camera: &str) -> usize {
        self.cameras.get(camera).map_or(0, Lru::len)
    }

    /// Drops one camera's frames, or every camera's when `camera` is `None`.
    pub fn invalidate(&mut self, camera: Option<&str>) {
        match camera {
            Some(cam) => {
                self.cameras.remove(cam);
            }
            None => self.cameras.clear(),
        }
    }

    /// Changing the capacity drops everything.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.invalidate(None);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PreloadRequest {
    camera: String,
    center: usize,
    due: Instant,
}

/// Deferred decoding of frames around the one on screen. At most one request
/// is pending; scheduling a new one cancels the previous. Decoding goes
/// through handles separate from the display path.
pub struct Preloader {
    library: Arc<dyn VideoLibrary>,
    sources: HashMap<String, Box<dyn FrameSource>>,
    pending: Option<PreloadRequest>,
    radius: usize,
    per_cycle: usize,
    delay: Duration,
}

impl Preloader {
    pub fn new(library: Arc<dyn VideoLibrary>, radius: usize, per_cycle: usize, delay: Duration) -> Self {
        Self {
            library,
            sources: HashMap::new(),
            pending: None,
            radius,
            per_cycle,
            delay,
        }
    }

    pub fn schedule(&mut self, camera: &str, center: usize, now: Instant) {
        self.pending = Some(PreloadRequest {
            camera: camera.to_string(),
            center,
            due: now + self.delay,
        });
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }

    /// When the pending request becomes due.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|r| r.due)
    }

    /// Offsets tried around the centre, nearest-behind first: -r..-1, 1..r.
    fn candidates(center: usize, radius: usize, frame_count: usize) -> Vec<usize> {
        let behind = (1..=radius).rev().filter_map(|o| center.checked_sub(o));
        let ahead = (1..=radius).map(|o| center + o);
        behind.chain(ahead).filter(|f| *f < frame_count).collect()
    }

    /// Runs the pending request if it is due. Returns the frames decoded.
    pub fn run_due(&mut self, cache: &mut FrameCache, now: Instant) -> Vec<usize> {
        match &self.pending {
            Some(request) if request.due <= now => {}
            _ => return Vec::new(),
        }
        let Some(request) = self.pending.take() else {
            return Vec::new();
        };

        if !self.sources.contains_key(&request.camera) {
            match self.library.open(&request.camera) {
                Ok(source) => {
                    self.sources.insert(request.camera.clone(), source);
                }
                Err(e) => {
                    debug!("Preload source for camera {} unavailable: {}", request.camera, e);
                    return Vec::new();
                }
            }
        }
        let (radius, per_cycle) = (self.radius, self.per_cycle);
        let Some(source) = self.sources.get_mut(&request.camera) else {
            return Vec::new();
        };

        let missing: Vec<usize> = Self::candidates(request.center, radius, source.frame_count())
            .into_iter()
            .filter(|f| !cache.contains(&request.camera, *f))
            .take(per_cycle)
            .collect();

        let mut loaded = Vec::new();
        for frame in missing {
            match source.decode(frame, SeekMode::Random) {
                Ok(Some(data)) => {
                    cache.put(&request.camera, frame, data);
                    loaded.push(frame);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("Preload of frame {} failed: {}", frame, e);
                    break;
                }
            }
        }
        if !loaded.is_empty() {
            debug!("Preloaded frames {:?} for camera {}", loaded, request.camera);
        }
        loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VideoError;
    use image::RgbImage;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn frame() -> Frame {
        Arc::new(RgbImage::new(1, 1))
    }

    #[test]
    fn test_capacity_plus_one_evicts_oldest() {
        let mut lru = Lru::new(3);
        for i in 0..3 {
            assert_eq!(lru.put(i, i * 10), None);
        }
        assert_eq!(lru.put(3, 30), Some(0));
        assert_eq!(lru.len(), 3);
        assert!(!lru.contains(&0));
        assert_eq!(lru.keys(), vec![3, 2, 1]);
    }

    #[test]
    fn test_get_refreshes_recency() {
        let mut lru = Lru::new(3);
        lru.put(1, "a");
        lru.put(2, "b");
        lru.put(3, "c");
        assert_eq!(lru.get(&1), Some(&"a"));
        assert_eq!(lru.put(4, "d"), Some(2));
        assert!(lru.contains(&1));
    }

    #[test]
    fn test_put_existing_only_refreshes() {
        let mut lru = Lru::new(2);
        lru.put(1, "first");
        lru.put(2, "b");
        assert_eq!(lru.put(1, "second"), None);
        assert_eq!(lru.get(&1), Some(&"first"));
        assert_eq!(lru.put(3, "c"), Some(2));
    }

    #[test]
    fn test_slots_are_reused() {
        let mut lru = Lru::new(1);
        for i in 0..10 {
            lru.put(i, i);
        }
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.nodes.len(), 2);
        assert_eq!(lru.keys(), vec![9]);
    }

    #[test]
    fn test_capacity_is_per_camera() {
        let mut cache = FrameCache::new(2);
        for f in 0..3 {
            cache.put("A", f, frame());
            cache.put("B", f, frame());
        }
        assert_eq!(cache.len("A"), 2);
        assert_eq!(cache.len("B"), 2);
        assert!(cache.get("A", 0).is_none());
        assert!(cache.get("B", 2).is_some());
    }

    #[test]
    fn test_invalidate_one_or_all() {
        let mut cache = FrameCache::new(5);
        cache.put("A", 1, frame());
        cache.put("B", 1, frame());
        cache.invalidate(Some("A"));
        assert_eq!(cache.len("A"), 0);
        assert_eq!(cache.len("B"), 1);
        cache.invalidate(None);
        assert_eq!(cache.len("B"), 0);

        cache.put("A", 1, frame());
        cache.set_capacity(1);
        assert_eq!(cache.capacity(), 1);
        assert_eq!(cache.len("A"), 0);
    }

    struct CountingSource {
        frames: usize,
        decoded: Rc<RefCell<Vec<(usize, SeekMode)>>>,
    }

    impl FrameSource for CountingSource {
        fn frame_count(&self) -> usize {
            self.frames
        }

        fn decode(&mut self, frame: usize, mode: SeekMode) -> Result<Option<Frame>, VideoError> {
            self.decoded.borrow_mut().push((frame, mode));
            Ok(Some(Arc::new(RgbImage::new(1, 1))))
        }
    }

    struct CountingLibrary {
        decoded: Rc<RefCell<Vec<(usize, SeekMode)>>>,
    }

    impl VideoLibrary for CountingLibrary {
        fn cameras(&self) -> Vec<String> {
            vec!["A".to_string()]
        }

        fn open(&self, _camera: &str) -> Result<Box<dyn FrameSource>, VideoError> {
            Ok(Box::new(CountingSource {
                frames: 100,
                decoded: self.decoded.clone(),
            }))
        }
    }

    fn preloader() -> (Preloader, Rc<RefCell<Vec<(usize, SeekMode)>>>) {
        let decoded = Rc::new(RefCell::new(Vec::new()));
        let library: Arc<dyn VideoLibrary> = Arc::new(CountingLibrary {
            decoded: decoded.clone(),
        });
        (Preloader::new(library, 3, 3, Duration::from_millis(100)), decoded)
    }

    #[test]
    fn test_preload_waits_for_deadline_and_skips_cached() {
        let (mut preloader, decoded) = preloader();
        let mut cache = FrameCache::new(10);
        cache.put("A", 49, frame());
        let now = Instant::now();
        preloader.schedule("A", 50, now);

        assert!(preloader.run_due(&mut cache, now).is_empty());
        assert_eq!(preloader.deadline(), Some(now + Duration::from_millis(100)));

        let loaded = preloader.run_due(&mut cache, now + Duration::from_millis(100));
        assert_eq!(loaded, vec![47, 48, 51]);
        assert!(decoded.borrow().iter().all(|(_, m)| *m == SeekMode::Random));
        assert!(preloader.deadline().is_none());
    }

    #[test]
    fn test_preload_candidates_stay_inside_video() {
        assert_eq!(Preloader::candidates(1, 3, 100), vec![0, 2, 3, 4]);
        assert_eq!(Preloader::candidates(98, 3, 100), vec![95, 96, 97, 99]);

        let (mut preloader, decoded) = preloader();
        let mut cache = FrameCache::new(10);
        let now = Instant::now();
        preloader.schedule("A", 99, now);
        let loaded = preloader.run_due(&mut cache, now + Duration::from_millis(100));
        assert_eq!(loaded, vec![96, 97, 98]);
        assert_eq!(decoded.borrow().len(), 3);
        assert!(cache.contains("A", 98));
    }

    #[test]
    fn test_new_schedule_replaces_pending() {
        let (mut preloader, _) = preloader();
        let mut cache = FrameCache::new(10);
        let now = Instant::now();
        preloader.schedule("A", 10, now);
        preloader.schedule("A", 0, now + Duration::from_millis(50));
        let later = now + Duration::from_millis(150);
        assert_eq!(preloader.run_due(&mut cache, later), vec![1, 2, 3]);
        assert!(preloader.run_due(&mut cache, later).is_empty());

        preloader.schedule("A", 20, later);
        preloader.cancel();
        assert!(preloader.deadline().is_none());
    }
}
