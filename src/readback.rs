//! CPU readback of simulation textures, and spawn-point selection.
//!
//! Copying a texture to host memory stalls the GPU pipeline, so nothing here
//! runs implicitly. Callers either read once with [`readback`] or go through
//! a [`ReadbackQueue`], which bounds how many requests can be outstanding and
//! how many are serviced per frame:
//!
//! ```ignore
//! let ticket = spawner.request()?;          // on user input
//! // once per frame, after the trail update:
//! spawner.service(&mut backend, &trails);
//! if let Some(points) = spawner.spawn_points(8, &mut rng) { ... }
//! ```

use std::collections::{BTreeMap, VecDeque};

use glam::Vec4;
use rand::Rng;
use tracing::{debug, warn};

use crate::config::SimConfig;
use crate::error::ReadbackError;
use crate::gpu::Backend;
use crate::ring::TrailSnapshot;
use crate::trail::TrailSystem;

/// Requests serviced per frame unless configured otherwise.
pub const DEFAULT_READBACK_BUDGET: usize = 1;

/// Outstanding requests before new ones are refused.
pub const DEFAULT_MAX_PENDING: usize = 8;

/// Host copy of one texture.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureSnapshot {
    width: u32,
    height: u32,
    texels: Vec<Vec4>,
}

impl TextureSnapshot {
    /// Wrap row-major texels. Short inputs are padded with zeros.
    pub fn new(width: u32, height: u32, mut texels: Vec<Vec4>) -> Self {
        texels.resize(width as usize * height as usize, Vec4::ZERO);
        Self { width, height, texels }
    }

    /// Texel at `(x, y)`, or `None` outside the texture.
    pub fn get(&self, x: u32, y: u32) -> Option<Vec4> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.texels.get((y * self.width + x) as usize).copied()
    }

    /// Texel of a linear entry index.
    pub fn index(&self, index: u32) -> Option<Vec4> {
        if self.width == 0 {
            return None;
        }
        self.get(index % self.width, index / self.width)
    }

    /// `(width, height)` in texels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// All texels, row-major.
    pub fn texels(&self) -> &[Vec4] {
        &self.texels
    }
}

/// Synchronously copy `texture` to the host.
///
/// Failures (incomplete target, lost context, mapping errors) are logged and
/// reported as `None`.
pub fn readback<B: Backend>(backend: &mut B, texture: &B::Texture) -> Option<TextureSnapshot> {
    let (width, height) = backend.texture_size(texture);
    match backend.read_texture(texture) {
        Ok(texels) => Some(TextureSnapshot::new(width, height, texels)),
        Err(e) => {
            warn!(error = %e, width, height, "texture readback failed");
            None
        }
    }
}

/// Handle to a queued readback request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

/// State of a request, as seen by [`ReadbackQueue::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReadbackStatus<R> {
    /// Waiting for a frame with budget left.
    Pending,
    /// Serviced; the result is handed out once.
    Ready(R),
    /// Serviced, but the read failed. Not retried.
    Failed,
    /// Never issued, or its result was already taken.
    Unknown,
}

/// Bounded queue of readback requests keyed by what they read.
///
/// A request for a key that is already pending returns the pending ticket
/// instead of queueing a second read.
#[derive(Debug)]
pub struct ReadbackQueue<K, R = TextureSnapshot> {
    pending: VecDeque<(Ticket, K)>,
    finished: BTreeMap<Ticket, Option<R>>,
    next_ticket: u64,
    max_pending: usize,
    budget: usize,
}

impl<K: PartialEq, R> ReadbackQueue<K, R> {
    /// Queue holding at most `max_pending` requests, servicing `budget` of
    /// them per [`service`](Self::service) call. A zero budget services
    /// nothing until raised.
    pub fn new(max_pending: usize, budget: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            finished: BTreeMap::new(),
            next_ticket: 1,
            max_pending: max_pending.max(1),
            budget,
        }
    }

    /// Queue with limits from `config`.
    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(config.max_pending_readbacks, config.readback_budget)
    }

    /// Ask for `key` to be read. Coalesces with a pending request for the
    /// same key.
    pub fn request(&mut self, key: K) -> Result<Ticket, ReadbackError> {
        if let Some((ticket, _)) = self.pending.iter().find(|(_, k)| *k == key) {
            return Ok(*ticket);
        }
        if self.pending.len() >= self.max_pending {
            return Err(ReadbackError::QueueFull {
                capacity: self.max_pending,
            });
        }
        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.pending.push_back((ticket, key));
        Ok(ticket)
    }

    /// Service up to the per-frame budget, oldest first. `read` performs the
    /// actual readback. Returns the number of requests serviced.
    pub fn service<F>(&mut self, mut read: F) -> usize
    where
        F: FnMut(&K) -> Option<R>,
    {
        let mut serviced = 0;
        while serviced < self.budget {
            let Some((ticket, key)) = self.pending.pop_front() else {
                break;
            };
            let result = read(&key);
            self.finished.insert(ticket, result);
            serviced += 1;
        }
        // Results nobody polls must not pile up
        while self.finished.len() > self.max_pending {
            self.finished.pop_first();
        }
        if serviced > 0 {
            debug!(serviced, pending = self.pending.len(), "readback queue serviced");
        }
        serviced
    }

    /// Status of `ticket`. A finished result is removed by this call.
    pub fn poll(&mut self, ticket: Ticket) -> ReadbackStatus<R> {
        if let Some(result) = self.finished.remove(&ticket) {
            return match result {
                Some(r) => ReadbackStatus::Ready(r),
                None => ReadbackStatus::Failed,
            };
        }
        if self.pending.iter().any(|(t, _)| *t == ticket) {
            ReadbackStatus::Pending
        } else {
            ReadbackStatus::Unknown
        }
    }

    /// Requests waiting for service.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Requests serviced per frame.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Change the per-frame budget.
    pub fn set_budget(&mut self, budget: usize) {
        self.budget = budget;
    }

    /// Maximum outstanding requests.
    pub fn capacity(&self) -> usize {
        self.max_pending
    }
}

/// Picks spawn points from a trail system's recorded nodes.
///
/// The spawner only reads the GPU when asked: [`request`](Self::request)
/// queues one snapshot of the node and state textures, and
/// [`service`](Self::service) performs it within the queue's budget. Queries
/// work on the latest successful snapshot.
#[derive(Debug)]
pub struct Spawner {
    queue: ReadbackQueue<(), TrailSnapshot>,
    ticket: Option<Ticket>,
    snapshot: Option<TrailSnapshot>,
}

impl Spawner {
    /// Spawner with explicit queue limits.
    pub fn new(max_pending: usize, budget: usize) -> Self {
        Self {
            queue: ReadbackQueue::new(max_pending, budget),
            ticket: None,
            snapshot: None,
        }
    }

    /// Spawner with queue limits from `config`.
    pub fn from_config(config: &SimConfig) -> Self {
        Self::new(config.max_pending_readbacks, config.readback_budget)
    }

    /// Ask for a fresh snapshot on the next serviced frame.
    pub fn request(&mut self) -> Result<Ticket, ReadbackError> {
        let ticket = self.queue.request(())?;
        self.ticket = Some(ticket);
        Ok(ticket)
    }

    /// Whether a requested snapshot has not arrived yet.
    pub fn is_pending(&self) -> bool {
        self.ticket.is_some()
    }

    /// Perform a pending readback if the budget allows. Returns `true` when
    /// a new snapshot was stored.
    ///
    /// A failed read is logged once and dropped; the previous snapshot stays
    /// usable and nothing is retried until the next [`request`](Self::request).
    pub fn service<B: Backend>(&mut self, backend: &mut B, trails: &TrailSystem<B>) -> bool {
        let Some(ticket) = self.ticket else {
            return false;
        };
        self.queue.service(|_| match trails.snapshot(backend) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "trail readback failed; waiting for the next request");
                None
            }
        });
        match self.queue.poll(ticket) {
            ReadbackStatus::Pending => false,
            ReadbackStatus::Ready(snapshot) => {
                self.ticket = None;
                self.snapshot = Some(snapshot);
                true
            }
            ReadbackStatus::Failed | ReadbackStatus::Unknown => {
                self.ticket = None;
                false
            }
        }
    }

    /// Latest snapshot, if any read succeeded.
    pub fn snapshot(&self) -> Option<&TrailSnapshot> {
        self.snapshot.as_ref()
    }

    /// Node at physical slot `node` of `trail`, or `None` when either index
    /// is outside the snapshot or no snapshot exists.
    pub fn node_position(&self, trail: u32, node: u32) -> Option<Vec4> {
        self.snapshot.as_ref()?.node(trail, node)
    }

    /// Up to `count` random recorded nodes, `(x, y, z, time)`. Unrecorded
    /// slots are never returned. `None` without a snapshot.
    pub fn spawn_points<R: Rng>(&self, count: usize, rng: &mut R) -> Option<Vec<Vec4>> {
        let snapshot = self.snapshot.as_ref()?;
        let candidates: Vec<(u32, u32)> = (0..snapshot.trail_count())
            .filter_map(|trail| snapshot.cursor(trail).map(|c| (trail, c)))
            .flat_map(|(trail, cursor)| cursor.iter().map(move |slot| (trail, slot)).collect::<Vec<_>>())
            .collect();
        if candidates.is_empty() {
            return Some(Vec::new());
        }
        let points = (0..count)
            .filter_map(|_| {
                let (trail, slot) = candidates[rng.gen_range(0..candidates.len())];
                snapshot.node(trail, slot)
            })
            .collect();
        Some(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{CpuBackend, TextureDescriptor};
    use rand::SeedableRng;

    #[test]
    fn test_readback_failure_is_none() {
        let mut backend = CpuBackend::new();
        let texture = backend.create_texture(&TextureDescriptor::new("t", 2, 1)).unwrap();
        backend.write_texture(&texture, &[Vec4::ONE, Vec4::ZERO]).unwrap();

        let snapshot = readback(&mut backend, &texture).unwrap();
        assert_eq!(snapshot.get(0, 0), Some(Vec4::ONE));
        assert_eq!(snapshot.get(2, 0), None);
        assert_eq!(snapshot.index(5), None);

        backend.set_readback_failure(true);
        assert!(readback(&mut backend, &texture).is_none());
    }

    #[test]
    fn test_queue_coalesces_pending_keys() {
        let mut queue: ReadbackQueue<&str, u32> = ReadbackQueue::new(4, 1);
        let a = queue.request("nodes").unwrap();
        let b = queue.request("nodes").unwrap();
        let c = queue.request("state").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(queue.pending(), 2);
    }

    #[test]
    fn test_queue_backpressure_and_budget() {
        let mut queue: ReadbackQueue<u32, u32> = ReadbackQueue::new(2, 1);
        let first = queue.request(1).unwrap();
        let second = queue.request(2).unwrap();
        assert_eq!(queue.request(3), Err(ReadbackError::QueueFull { capacity: 2 }));

        assert_eq!(queue.service(|k| Some(k * 10)), 1);
        assert_eq!(queue.poll(first), ReadbackStatus::Ready(10));
        assert_eq!(queue.poll(first), ReadbackStatus::Unknown);
        assert_eq!(queue.poll(second), ReadbackStatus::Pending);

        assert_eq!(queue.service(|_| None), 1);
        assert_eq!(queue.poll(second), ReadbackStatus::Failed);
        assert_eq!(queue.service(|k| Some(*k)), 0);
    }

    #[test]
    fn test_zero_budget_services_nothing() {
        let mut queue: ReadbackQueue<(), ()> = ReadbackQueue::new(1, 0);
        let ticket = queue.request(()).unwrap();
        assert_eq!(queue.service(|_| Some(())), 0);
        assert_eq!(queue.poll(ticket), ReadbackStatus::Pending);
    }

    #[test]
    fn test_spawner_without_snapshot() {
        let spawner = Spawner::new(1, 1);
        assert_eq!(spawner.node_position(0, 0), None);
        assert_eq!(spawner.node_position(u32::MAX, u32::MAX), None);
        let mut rng = rand::rngs::SmallRng::seed_from_u64(1);
        assert!(spawner.spawn_points(3, &mut rng).is_none());
    }
}
