//! Play queue management.
//!
//! The queue owns its tracks and the current position. `position` is `None`
//! exactly when the queue is empty. While shuffle is on, `shuffle_order` is
//! a permutation of item indices and `shuffle_order[shuffle_position]` is
//! always the current item.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::track::{Track, TrackId};

/// Repeat mode for the queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RepeatMode {
    #[default]
    Off,
    /// Repeat entire queue
    All,
    /// Repeat current track
    One,
}

impl RepeatMode {
    /// Off → All → One → Off
    pub fn cycle(self) -> Self {
        match self {
            Self::Off => Self::All,
            Self::All => Self::One,
            Self::One => Self::Off,
        }
    }
}

impl fmt::Display for RepeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Off => "off",
            Self::All => "all",
            Self::One => "one",
        })
    }
}

/// The play queue with current position tracking.
#[derive(Debug, Clone)]
pub struct PlayQueue {
    /// All items in the queue
    items: Vec<Track>,
    /// Current item; `None` iff the queue is empty
    position: Option<usize>,
    /// Shuffle mode enabled
    shuffle: bool,
    /// Shuffled indices (maps shuffle position → item index)
    shuffle_order: Vec<usize>,
    /// Current position in shuffle_order when shuffling
    shuffle_position: usize,
    /// Repeat mode
    repeat: RepeatMode,
    rng: StdRng,
}

impl Default for PlayQueue {
    fn default() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }
}

impl PlayQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue with a reproducible shuffle.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            items: Vec::new(),
            position: None,
            shuffle: false,
            shuffle_order: Vec::new(),
            shuffle_position: 0,
            repeat: RepeatMode::Off,
            rng,
        }
    }

    /// Check if queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get queue length.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Get all items in the queue.
    pub fn items(&self) -> &[Track] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.items.get(index)
    }

    /// Get current position (index into items).
    pub fn current_index(&self) -> Option<usize> {
        self.position
    }

    /// Get current item.
    pub fn current(&self) -> Option<&Track> {
        self.position.and_then(|i| self.items.get(i))
    }

    /// Whether any entry still refers to this track.
    pub fn contains_id(&self, id: TrackId) -> bool {
        self.items.iter().any(|t| t.id == id)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Replace the whole queue and select `start` (clamped). Returns the old
    /// items so the caller can release the ones that left.
    pub fn replace(&mut self, tracks: Vec<Track>, start: usize) -> Vec<Track> {
        let old = std::mem::replace(&mut self.items, tracks);
        self.position = if self.items.is_empty() {
            None
        } else {
            Some(start.min(self.items.len() - 1))
        };
        if self.shuffle {
            self.generate_shuffle_order();
        }
        old
    }

    /// Insert tracks at `at` (or append). Returns the index of the first
    /// inserted track. An empty queue selects the first inserted track.
    pub fn insert(&mut self, at: Option<usize>, tracks: Vec<Track>) -> usize {
        let len = self.items.len();
        let at = at.unwrap_or(len).min(len);
        let count = tracks.len();
        if count == 0 {
            return at;
        }

        self.items.splice(at..at, tracks);

        self.position = match self.position {
            Some(pos) if pos >= at => Some(pos + count),
            Some(pos) => Some(pos),
            None => Some(at),
        };

        if self.shuffle {
            for idx in &mut self.shuffle_order {
                if *idx >= at {
                    *idx += count;
                }
            }
            // New entries play after everything already ordered
            self.shuffle_order.extend(at..at + count);
            self.sync_shuffle_position();
        }
        at
    }

    /// Remove an item at index.
    ///
    /// Removing the current item selects the item that slides into its slot,
    /// or the new last item.
    pub fn remove(&mut self, index: usize) -> Option<Track> {
        if index >= self.items.len() {
            return None;
        }
        let item = self.items.remove(index);

        if self.items.is_empty() {
            self.position = None;
            self.shuffle_order.clear();
            self.shuffle_position = 0;
            return Some(item);
        }

        self.position = self.position.map(|pos| {
            if index < pos {
                pos - 1
            } else if index == pos {
                index.min(self.items.len() - 1)
            } else {
                pos
            }
        });

        if self.shuffle {
            // Drop this index and shift all indices > removed
            self.shuffle_order.retain(|&i| i != index);
            for idx in &mut self.shuffle_order {
                if *idx > index {
                    *idx -= 1;
                }
            }
            self.sync_shuffle_position();
        }
        Some(item)
    }

    /// Move an item from one position to another. The current item stays
    /// current, wherever it lands.
    pub fn move_item(&mut self, from: usize, to: usize) -> bool {
        let len = self.items.len();
        if from >= len || to >= len || from == to {
            return false;
        }
        let item = self.items.remove(from);
        self.items.insert(to, item);

        // new_index[old] for every old index
        let mut old_at: Vec<usize> = (0..len).collect();
        let moved = old_at.remove(from);
        old_at.insert(to, moved);
        let mut new_index = vec![0; len];
        for (new, old) in old_at.into_iter().enumerate() {
            new_index[old] = new;
        }

        self.position = self.position.map(|pos| new_index[pos]);
        for idx in &mut self.shuffle_order {
            *idx = new_index[*idx];
        }
        true
    }

    /// Clear the queue, returning its items.
    pub fn clear(&mut self) -> Vec<Track> {
        self.position = None;
        self.shuffle_order.clear();
        self.shuffle_position = 0;
        std::mem::take(&mut self.items)
    }

    /// Jump to a specific position.
    pub fn jump_to(&mut self, index: usize) -> bool {
        if index >= self.items.len() {
            return false;
        }
        self.position = Some(index);
        self.sync_shuffle_position();
        true
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Advance according to shuffle/repeat. Returns the new index, or `None`
    /// at the end of the queue with repeat off (position unchanged).
    pub fn next(&mut self) -> Option<usize> {
        let current = self.position?;
        let len = self.items.len();

        if self.repeat == RepeatMode::One {
            return Some(current);
        }

        if self.shuffle {
            if self.shuffle_position + 1 < self.shuffle_order.len() {
                self.shuffle_position += 1;
            } else if self.repeat == RepeatMode::All {
                self.regenerate_for_new_cycle(current);
            } else {
                return None; // End of shuffle
            }
            self.position = Some(self.shuffle_order[self.shuffle_position]);
        } else if current + 1 < len {
            self.position = Some(current + 1);
        } else if self.repeat == RepeatMode::All {
            self.position = Some(0);
        } else {
            return None; // End of queue
        }
        self.position
    }

    /// Step back according to shuffle/repeat. Returns the new index, or
    /// `None` at the start with repeat off.
    pub fn previous(&mut self) -> Option<usize> {
        let current = self.position?;
        let len = self.items.len();

        if self.repeat == RepeatMode::One {
            return Some(current);
        }

        if self.shuffle {
            if self.shuffle_position > 0 {
                self.shuffle_position -= 1;
            } else if self.repeat == RepeatMode::All {
                self.shuffle_position = self.shuffle_order.len() - 1;
            } else {
                return None; // Start of shuffle
            }
            self.position = Some(self.shuffle_order[self.shuffle_position]);
        } else if current > 0 {
            self.position = Some(current - 1);
        } else if self.repeat == RepeatMode::All {
            self.position = Some(len - 1);
        } else {
            return None; // Start of queue
        }
        self.position
    }

    // ========================================================================
    // Shuffle / repeat
    // ========================================================================

    /// Set shuffle mode. Turning it on generates a fresh order starting at
    /// the current track.
    pub fn set_shuffle(&mut self, enabled: bool) {
        if enabled && !self.shuffle {
            self.shuffle = true;
            self.generate_shuffle_order();
        } else if !enabled {
            self.shuffle = false;
            self.shuffle_order.clear();
            self.shuffle_position = 0;
        }
    }

    /// Get shuffle mode.
    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    /// Play order while shuffling; empty otherwise.
    pub fn play_order(&self) -> &[usize] {
        &self.shuffle_order
    }

    pub fn order_position(&self) -> Option<usize> {
        (self.shuffle && !self.shuffle_order.is_empty()).then_some(self.shuffle_position)
    }

    /// Generate a new shuffle order, keeping the current track first.
    fn generate_shuffle_order(&mut self) {
        let len = self.items.len();
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut self.rng);

        if let Some(current) = self.position
            && let Some(pos) = indices.iter().position(|&i| i == current)
        {
            indices.remove(pos);
            indices.insert(0, current);
        }

        self.shuffle_order = indices;
        self.shuffle_position = 0;
    }

    /// Reshuffle after the order ran out under repeat-all. The new cycle
    /// never opens with the track that closed the previous one.
    fn regenerate_for_new_cycle(&mut self, last: usize) {
        let len = self.items.len();
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut self.rng);
        if len > 1 && indices[0] == last {
            let swap_with = self.rng.random_range(1..len);
            indices.swap(0, swap_with);
        }
        self.shuffle_order = indices;
        self.shuffle_position = 0;
    }

    fn sync_shuffle_position(&mut self) {
        if let Some(current) = self.position
            && let Some(pos) = self.shuffle_order.iter().position(|&i| i == current)
        {
            self.shuffle_position = pos;
        }
    }

    /// Cycle repeat mode.
    pub fn cycle_repeat(&mut self) -> RepeatMode {
        self.repeat = self.repeat.cycle();
        self.repeat
    }

    /// Set repeat mode.
    pub fn set_repeat(&mut self, mode: RepeatMode) {
        self.repeat = mode;
    }

    /// Get repeat mode.
    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Count a play of the item at `index`.
    pub fn mark_played(&mut self, index: usize) {
        if let Some(track) = self.items.get_mut(index) {
            track.play_count = track.play_count.saturating_add(1);
        }
    }

    /// Newest additions first.
    pub fn recently_added(&self, limit: usize) -> Vec<&Track> {
        let mut tracks: Vec<&Track> = self.items.iter().collect();
        tracks.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        tracks.truncate(limit);
        tracks
    }

    /// Most played first; never-played tracks are excluded.
    pub fn most_played(&self, limit: usize) -> Vec<&Track> {
        let mut tracks: Vec<&Track> = self.items.iter().filter(|t| t.play_count > 0).collect();
        tracks.sort_by(|a, b| b.play_count.cmp(&a.play_count));
        tracks.truncate(limit);
        tracks
    }

    pub fn unplayed(&self) -> Vec<&Track> {
        self.items.iter().filter(|t| t.play_count == 0).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn make_item(name: &str) -> Track {
        Track::remote(format!("https://example.com/{name}"), name)
    }

    fn queue_of(names: &[&str]) -> PlayQueue {
        let mut queue = PlayQueue::with_seed(7);
        queue.replace(names.iter().map(|n| make_item(n)).collect(), 0);
        queue
    }

    fn titles(queue: &PlayQueue) -> Vec<&str> {
        queue.items().iter().map(|t| t.title.as_str()).collect()
    }

    fn assert_invariants(queue: &PlayQueue) {
        match queue.current_index() {
            None => assert!(queue.is_empty()),
            Some(i) => assert!(i < queue.len()),
        }
        if queue.shuffle() && !queue.is_empty() {
            let mut sorted = queue.play_order().to_vec();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..queue.len()).collect::<Vec<_>>());
            let pos = queue.order_position().unwrap();
            assert_eq!(Some(queue.play_order()[pos]), queue.current_index());
        }
    }

    #[test]
    fn test_queue_basic() {
        let mut queue = PlayQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.current_index(), None);

        queue.insert(None, vec![make_item("a"), make_item("b"), make_item("c")]);
        assert_eq!(queue.len(), 3);
        // Inserting into an empty queue selects the first track
        assert_eq!(queue.current_index(), Some(0));

        assert_eq!(queue.next(), Some(1));
        assert_eq!(queue.current().unwrap().title, "b");
    }

    #[test]
    fn test_next_stops_at_end_with_repeat_off() {
        let mut queue = queue_of(&["a", "b", "c"]);
        assert_eq!(queue.next(), Some(1));
        assert_eq!(queue.next(), Some(2));
        assert_eq!(queue.next(), None);
        assert_eq!(queue.current_index(), Some(2));
    }

    #[test]
    fn test_queue_repeat_all() {
        let mut queue = queue_of(&["a", "b"]);
        queue.set_repeat(RepeatMode::All);
        queue.next();
        assert_eq!(queue.next(), Some(0)); // wraps
        assert_eq!(queue.previous(), Some(1)); // wraps back
    }

    #[test]
    fn test_queue_repeat_one() {
        let mut queue = queue_of(&["a", "b"]);
        queue.set_repeat(RepeatMode::One);
        for _ in 0..5 {
            assert_eq!(queue.next(), Some(0));
            assert_eq!(queue.previous(), Some(0));
        }
    }

    #[test]
    fn test_previous_at_start_with_repeat_off() {
        let mut queue = queue_of(&["a", "b"]);
        assert_eq!(queue.previous(), None);
        assert_eq!(queue.current_index(), Some(0));
    }

    #[test]
    fn test_insert_before_current_keeps_identity() {
        let mut queue = queue_of(&["a", "c"]);
        queue.jump_to(1);
        queue.insert(Some(0), vec![make_item("z")]);
        queue.insert(Some(2), vec![make_item("b")]);

        assert_eq!(titles(&queue), vec!["z", "a", "b", "c"]);
        assert_eq!(queue.current().unwrap().title, "c");
    }

    #[test]
    fn test_remove_predecessor_keeps_current() {
        let mut queue = queue_of(&["a", "b"]);
        queue.jump_to(1);
        queue.remove(0);
        assert_eq!(titles(&queue), vec!["b"]);
        assert_eq!(queue.current_index(), Some(0));
    }

    #[test]
    fn test_remove_current_selects_successor() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.jump_to(1);
        queue.remove(1);
        assert_eq!(queue.current().unwrap().title, "c");

        queue.remove(1);
        assert_eq!(queue.current().unwrap().title, "a");

        queue.remove(0);
        assert!(queue.is_empty());
        assert_eq!(queue.current_index(), None);
    }

    #[test]
    fn test_move_preserves_current_playing() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.jump_to(1);

        assert!(queue.move_item(1, 0));
        assert_eq!(titles(&queue), vec!["b", "a", "c"]);
        assert_eq!(queue.current_index(), Some(0));

        assert!(queue.move_item(2, 0));
        assert_eq!(titles(&queue), vec!["c", "b", "a"]);
        assert_eq!(queue.current().unwrap().title, "b");

        assert!(!queue.move_item(0, 0));
        assert!(!queue.move_item(5, 0));
    }

    #[test]
    fn test_shuffle_visits_all_tracks() {
        let names: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut queue = queue_of(&refs);
        queue.set_shuffle(true);

        let mut visited = std::collections::HashSet::new();
        visited.insert(queue.current_index().unwrap());
        while let Some(i) = queue.next() {
            visited.insert(i);
        }
        assert_eq!(visited.len(), 10);
    }

    #[test]
    fn test_shuffle_keeps_current_first() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.jump_to(1);

        queue.set_shuffle(true);
        assert_eq!(queue.current_index(), Some(1));
        assert_eq!(queue.play_order()[0], 1);
        assert_eq!(queue.order_position(), Some(0));
    }

    #[test]
    fn test_shuffle_previous_works() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.set_shuffle(true);

        let first = queue.current_index();
        let second = queue.next();
        assert_eq!(queue.previous(), first);
        assert_eq!(queue.next(), second);
    }

    #[test]
    fn test_shuffle_disable_clears_order() {
        let mut queue = queue_of(&["a", "b"]);
        queue.set_shuffle(true);
        assert!(!queue.play_order().is_empty());

        queue.set_shuffle(false);
        assert!(queue.play_order().is_empty());
        assert_eq!(queue.order_position(), None);
    }

    #[test]
    fn test_shuffle_enable_twice_keeps_order() {
        let mut queue = queue_of(&["a", "b", "c", "d"]);
        queue.set_shuffle(true);
        let order = queue.play_order().to_vec();
        queue.set_shuffle(true);
        assert_eq!(queue.play_order(), order.as_slice());
    }

    #[test]
    fn test_shuffle_repeat_all_never_repeats_across_cycles() {
        for seed in 0..50 {
            let mut queue = PlayQueue::with_seed(seed);
            queue.replace(vec![make_item("a"), make_item("b"), make_item("c")], 0);
            queue.set_shuffle(true);
            queue.set_repeat(RepeatMode::All);

            let mut last = queue.current_index();
            for _ in 0..12 {
                let next = queue.next();
                assert!(next.is_some());
                assert_ne!(next, last, "seed {seed}");
                last = next;
            }
        }
    }

    #[test]
    fn test_shuffle_repeat_off_stops_when_exhausted() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.set_shuffle(true);
        assert!(queue.next().is_some());
        assert!(queue.next().is_some());
        let last = queue.current_index();
        assert_eq!(queue.next(), None);
        assert_eq!(queue.current_index(), last);
    }

    #[test]
    fn test_jump_to_updates_shuffle_position() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.set_shuffle(true);

        assert!(queue.jump_to(2));
        assert_eq!(queue.current_index(), Some(2));
        let pos = queue.order_position().unwrap();
        assert_eq!(queue.play_order()[pos], 2);
        assert!(!queue.jump_to(3));
    }

    #[test]
    fn test_replace_returns_old_items() {
        let mut queue = queue_of(&["a", "b"]);
        let old = queue.replace(vec![make_item("x")], 5);
        assert_eq!(old.len(), 2);
        assert_eq!(queue.current_index(), Some(0));

        let old = queue.replace(Vec::new(), 0);
        assert_eq!(old.len(), 1);
        assert_eq!(queue.current_index(), None);
    }

    #[test]
    fn test_cycle_repeat() {
        let mut queue = PlayQueue::new();
        assert_eq!(queue.cycle_repeat(), RepeatMode::All);
        assert_eq!(queue.cycle_repeat(), RepeatMode::One);
        assert_eq!(queue.cycle_repeat(), RepeatMode::Off);
    }

    #[test]
    fn test_discovery_helpers() {
        let mut queue = queue_of(&["a", "b", "c"]);
        queue.mark_played(1);
        queue.mark_played(1);
        queue.mark_played(2);

        let most: Vec<&str> = queue.most_played(5).iter().map(|t| t.title.as_str()).collect();
        assert_eq!(most, vec!["b", "c"]);
        let unplayed: Vec<&str> = queue.unplayed().iter().map(|t| t.title.as_str()).collect();
        assert_eq!(unplayed, vec!["a"]);
        assert_eq!(queue.recently_added(2).len(), 2);
    }

    #[test]
    fn test_repeat_mode_serde() {
        assert_eq!(serde_json::to_string(&RepeatMode::All).unwrap(), "\"all\"");
        let mode: RepeatMode = serde_json::from_str("\"one\"").unwrap();
        assert_eq!(mode, RepeatMode::One);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(Option<usize>, usize),
        Remove(usize),
        Move(usize, usize),
        Replace(usize, usize),
        Jump(usize),
        Next,
        Previous,
        Shuffle(bool),
        Repeat(u8),
        Clear,
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (proptest::option::of(0usize..12), 1usize..4).prop_map(|(at, n)| Op::Insert(at, n)),
            (0usize..12).prop_map(Op::Remove),
            (0usize..12, 0usize..12).prop_map(|(a, b)| Op::Move(a, b)),
            (0usize..6, 0usize..8).prop_map(|(n, s)| Op::Replace(n, s)),
            (0usize..12).prop_map(Op::Jump),
            Just(Op::Next),
            Just(Op::Previous),
            any::<bool>().prop_map(Op::Shuffle),
            (0u8..3).prop_map(Op::Repeat),
            Just(Op::Clear),
        ]
    }

    proptest! {
        #[test]
        fn prop_index_and_permutation_invariants(
            seed in any::<u64>(),
            ops in proptest::collection::vec(op_strategy(), 1..60),
        ) {
            let mut queue = PlayQueue::with_seed(seed);
            for op in ops {
                match op {
                    Op::Insert(at, n) => {
                        queue.insert(at, (0..n).map(|i| make_item(&i.to_string())).collect());
                    }
                    Op::Remove(i) => { queue.remove(i); }
                    Op::Move(a, b) => { queue.move_item(a, b); }
                    Op::Replace(n, s) => {
                        queue.replace((0..n).map(|i| make_item(&i.to_string())).collect(), s);
                    }
                    Op::Jump(i) => { queue.jump_to(i); }
                    Op::Next => { queue.next(); }
                    Op::Previous => { queue.previous(); }
                    Op::Shuffle(on) => queue.set_shuffle(on),
                    Op::Repeat(r) => queue.set_repeat(match r {
                        0 => RepeatMode::Off,
                        1 => RepeatMode::All,
                        _ => RepeatMode::One,
                    }),
                    Op::Clear => { queue.clear(); }
                }
                assert_invariants(&queue);
            }
        }

        #[test]
        fn prop_repeat_one_never_moves(
            start in 0usize..5,
            shuffle in any::<bool>(),
            steps in proptest::collection::vec(any::<bool>(), 1..30),
        ) {
            let mut queue = PlayQueue::with_seed(1);
            queue.replace((0..5).map(|i| make_item(&i.to_string())).collect(), start);
            queue.set_shuffle(shuffle);
            queue.set_repeat(RepeatMode::One);
            for forward in steps {
                let result = if forward { queue.next() } else { queue.previous() };
                prop_assert_eq!(result, Some(start));
                prop_assert_eq!(queue.current_index(), Some(start));
            }
        }
    }
}
