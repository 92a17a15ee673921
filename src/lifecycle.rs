//! Spawn lifecycle of entities placed at trail nodes.
//!
//! An entity spawned by the host (a sprite, a mesh, a light) grows in, holds,
//! shrinks out and is removed. [`SpawnLifecycle`] is that sequence as an
//! explicit state machine driven by frame deltas:
//!
//! | State | Duration | `scale()` |
//! |-------|----------|-----------|
//! | `Spawning` | `spawn` | eases 0 → 1 |
//! | `Holding` | `hold` | 1 |
//! | `Despawning` | `despawn` | eases 1 → 0 |
//! | `Done` | - | 0 |
//!
//! Time left over when a state ends is carried into the next one, so a large
//! delta can cross several states in one [`advance`](SpawnLifecycle::advance).
//!
//! # Presets
//!
//! ```ignore
//! let pool = EntityPool::new(64);
//! pool.spawn(marker, SpawnLifecycle::pop())?;
//! pool.spawn(ember, SpawnLifecycle::linger().with_spin(1.5))?;
//! ```

use tracing::debug;

/// Phase of a [`SpawnLifecycle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Growing in.
    Spawning,
    /// Fully visible.
    Holding,
    /// Shrinking out.
    Despawning,
    /// Finished; the entity can be dropped.
    Done,
}

impl LifecycleState {
    /// Lowercase name, for logs.
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Spawning => "spawning",
            LifecycleState::Holding => "holding",
            LifecycleState::Despawning => "despawning",
            LifecycleState::Done => "done",
        }
    }
}

/// Timed spawn → hold → despawn sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnLifecycle {
    spawn: f32,
    hold: f32,
    despawn: f32,
    /// Radians per second.
    spin: f32,
    state: LifecycleState,
    /// Time spent in the current state.
    in_state: f32,
    /// Time since spawn, across all states.
    age: f32,
}

impl SpawnLifecycle {
    /// Sequence with the given durations in seconds. Negative or non-finite
    /// durations are treated as zero; a `hold` of `f32::INFINITY` holds until
    /// [`despawn`](Self::despawn) is called.
    pub fn new(spawn: f32, hold: f32, despawn: f32) -> Self {
        let duration = |d: f32| if d.is_nan() || d < 0.0 { 0.0 } else { d };
        let finite = |d: f32| if d.is_finite() { duration(d) } else { 0.0 };
        Self {
            spawn: finite(spawn),
            hold: duration(hold),
            despawn: finite(despawn),
            spin: 0.0,
            state: LifecycleState::Spawning,
            in_state: 0.0,
            age: 0.0,
        }
    }

    /// Quick grow-in, short hold, quick shrink-out.
    pub fn pop() -> Self {
        Self::new(0.15, 0.5, 0.25)
    }

    /// Slow fade in and out around a long hold.
    pub fn linger() -> Self {
        Self::new(0.6, 4.0, 1.2)
    }

    /// Stays until told to despawn.
    pub fn persistent() -> Self {
        Self::new(0.3, f32::INFINITY, 0.3)
    }

    /// Spin at `radians_per_second` for the entity's whole life.
    pub fn with_spin(mut self, radians_per_second: f32) -> Self {
        self.spin = if radians_per_second.is_finite() { radians_per_second } else { 0.0 };
        self
    }

    fn duration(&self, state: LifecycleState) -> f32 {
        match state {
            LifecycleState::Spawning => self.spawn,
            LifecycleState::Holding => self.hold,
            LifecycleState::Despawning => self.despawn,
            LifecycleState::Done => f32::INFINITY,
        }
    }

    fn next(state: LifecycleState) -> LifecycleState {
        match state {
            LifecycleState::Spawning => LifecycleState::Holding,
            LifecycleState::Holding => LifecycleState::Despawning,
            LifecycleState::Despawning | LifecycleState::Done => LifecycleState::Done,
        }
    }

    /// Move forward by `delta` seconds, crossing as many states as the time
    /// covers. Returns the state afterwards.
    pub fn advance(&mut self, delta: f32) -> LifecycleState {
        if self.state == LifecycleState::Done || !delta.is_finite() || delta <= 0.0 {
            return self.state;
        }
        self.age += delta;
        let mut remaining = delta;
        loop {
            let left = self.duration(self.state) - self.in_state;
            if remaining < left {
                self.in_state += remaining;
                break;
            }
            remaining -= left.max(0.0);
            self.state = Self::next(self.state);
            self.in_state = 0.0;
            if self.state == LifecycleState::Done {
                break;
            }
        }
        self.state
    }

    /// Start shrinking out now. Keeps the current scale continuous when
    /// called while still spawning.
    pub fn despawn(&mut self) {
        match self.state {
            LifecycleState::Spawning => {
                // smoothstep(1 - p) == 1 - smoothstep(p)
                let progress = self.progress();
                self.state = LifecycleState::Despawning;
                self.in_state = self.despawn * (1.0 - progress);
            }
            LifecycleState::Holding => {
                self.state = LifecycleState::Despawning;
                self.in_state = 0.0;
            }
            LifecycleState::Despawning | LifecycleState::Done => {}
        }
        if self.despawn == 0.0 && self.state == LifecycleState::Despawning {
            self.state = LifecycleState::Done;
        }
    }

    /// Current phase.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Progress through the current phase, 0..=1.
    pub fn progress(&self) -> f32 {
        let d = self.duration(self.state);
        if self.state == LifecycleState::Done {
            1.0
        } else if d <= 0.0 || !d.is_finite() {
            0.0
        } else {
            (self.in_state / d).clamp(0.0, 1.0)
        }
    }

    /// Display scale: eased in, 1 while holding, eased out, 0 when done.
    pub fn scale(&self) -> f32 {
        match self.state {
            LifecycleState::Spawning => smoothstep(self.progress()),
            LifecycleState::Holding => 1.0,
            LifecycleState::Despawning => 1.0 - smoothstep(self.progress()),
            LifecycleState::Done => 0.0,
        }
    }

    /// Accumulated rotation in radians.
    pub fn rotation(&self) -> f32 {
        self.spin * self.age
    }

    /// Seconds since spawn.
    pub fn age(&self) -> f32 {
        self.age
    }

    /// Whether the sequence has finished.
    pub fn is_done(&self) -> bool {
        self.state == LifecycleState::Done
    }
}

fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Capacity-bounded set of entities with running lifecycles.
#[derive(Debug, Clone)]
pub struct EntityPool<T> {
    entries: Vec<(T, SpawnLifecycle)>,
    capacity: usize,
}

impl<T> EntityPool<T> {
    /// Empty pool holding at most `capacity` entities.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Add an entity. A full pool hands it back.
    pub fn spawn(&mut self, entity: T, lifecycle: SpawnLifecycle) -> Result<(), T> {
        if self.entries.len() >= self.capacity {
            return Err(entity);
        }
        self.entries.push((entity, lifecycle));
        Ok(())
    }

    /// Advance every lifecycle and drop finished entities. Returns how many
    /// were dropped.
    pub fn advance(&mut self, delta: f32) -> usize {
        let before = self.entries.len();
        self.entries
            .retain_mut(|(_, lifecycle)| lifecycle.advance(delta) != LifecycleState::Done);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, live = self.entries.len(), "entities finished");
        }
        removed
    }

    /// Start despawning every entity.
    pub fn despawn_all(&mut self) {
        for (_, lifecycle) in &mut self.entries {
            lifecycle.despawn();
        }
        self.entries.retain(|(_, l)| !l.is_done());
    }

    /// Live entities with their lifecycles.
    pub fn iter(&self) -> impl Iterator<Item = (&T, &SpawnLifecycle)> {
        self.entries.iter().map(|(e, l)| (e, l))
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entity is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum live entities.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_sequence() {
        let mut l = SpawnLifecycle::new(1.0, 2.0, 1.0);
        assert_eq!(l.state(), LifecycleState::Spawning);
        assert_eq!(l.scale(), 0.0);

        assert_eq!(l.advance(0.5), LifecycleState::Spawning);
        assert!((l.scale() - 0.5).abs() < 1e-6);
        assert_eq!(l.advance(0.5), LifecycleState::Holding);
        assert_eq!(l.scale(), 1.0);
        assert_eq!(l.advance(2.0), LifecycleState::Despawning);
        assert_eq!(l.advance(1.0), LifecycleState::Done);
        assert_eq!(l.scale(), 0.0);
        assert!(l.is_done());
    }

    #[test]
    fn test_leftover_time_carries_over() {
        let mut l = SpawnLifecycle::new(1.0, 1.0, 4.0);
        // 1 s spawning + 1 s holding + 1 s into despawning
        assert_eq!(l.advance(3.0), LifecycleState::Despawning);
        assert!((l.progress() - 0.25).abs() < 1e-6);
        assert_eq!(l.age(), 3.0);
    }

    #[test]
    fn test_zero_durations_and_bad_deltas() {
        let mut l = SpawnLifecycle::new(0.0, 0.0, 0.0);
        assert_eq!(l.advance(f32::NAN), LifecycleState::Spawning);
        assert_eq!(l.advance(-1.0), LifecycleState::Spawning);
        assert_eq!(l.advance(0.01), LifecycleState::Done);
    }

    #[test]
    fn test_persistent_until_despawn() {
        let mut l = SpawnLifecycle::persistent().with_spin(2.0);
        l.advance(100.0);
        assert_eq!(l.state(), LifecycleState::Holding);
        assert!((l.rotation() - 200.0).abs() < 1e-3);

        l.despawn();
        assert_eq!(l.state(), LifecycleState::Despawning);
        assert_eq!(l.scale(), 1.0);
        l.advance(0.3);
        assert!(l.is_done());
    }

    #[test]
    fn test_despawn_while_spawning_keeps_scale() {
        for (spawn, despawn) in [(1.0, 1.0), (0.5, 2.0)] {
            for t in [0.1, 0.25, 0.5, 0.75, 0.9] {
                let mut l = SpawnLifecycle::new(spawn, 1.0, despawn);
                l.advance(t * spawn);
                let before = l.scale();
                l.despawn();
                assert_eq!(l.state(), LifecycleState::Despawning);
                assert!(
                    (l.scale() - before).abs() < 1e-5,
                    "t={} before={} after={}",
                    t,
                    before,
                    l.scale()
                );
            }
        }
    }

    #[test]
    fn test_pool_capacity_and_cleanup() {
        let mut pool = EntityPool::new(2);
        assert!(pool.spawn("a", SpawnLifecycle::new(0.1, 0.1, 0.1)).is_ok());
        assert!(pool.spawn("b", SpawnLifecycle::persistent()).is_ok());
        assert_eq!(pool.spawn("c", SpawnLifecycle::pop()), Err("c"));

        assert_eq!(pool.advance(1.0), 1);
        assert_eq!(pool.iter().map(|(e, _)| *e).collect::<Vec<_>>(), vec!["b"]);

        pool.despawn_all();
        assert_eq!(pool.advance(1.0), 1);
        assert!(pool.is_empty());
    }
}
