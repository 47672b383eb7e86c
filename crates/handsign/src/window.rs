//! Rolling frame buffers for live sessions.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::keypoints::FrameVector;
use crate::sequence::{self, Sequence, SequenceFit};
use crate::{SEQ_LEN, WARMUP_FRAMES};

/// The most recent (up to [`SEQ_LEN`]) frames of a live session.
#[derive(Debug, Clone)]
pub struct Window {
    frames: VecDeque<FrameVector>,
    warmup: usize,
}

impl Window {
    /// Creates an empty window that becomes ready after `warmup` frames.
    ///
    /// `warmup` is clamped to `1..=SEQ_LEN`.
    pub fn new(warmup: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(SEQ_LEN),
            warmup: warmup.clamp(1, SEQ_LEN),
        }
    }

    /// Appends a frame, discarding the oldest one if the window is full.
    pub fn push(&mut self, frame: FrameVector) {
        if self.frames.len() == SEQ_LEN {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn warmup(&self) -> usize {
        self.warmup
    }

    /// Returns whether enough frames have been buffered to classify the window.
    pub fn is_ready(&self) -> bool {
        self.frames.len() >= self.warmup
    }

    pub fn reset(&mut self) {
        self.frames.clear();
    }

    /// Returns the buffered frames in arrival order, oldest first.
    pub fn frames(&self) -> impl Iterator<Item = &FrameVector> {
        self.frames.iter()
    }

    /// Returns the buffered frames as a classifier-ready sequence.
    ///
    /// This runs [`sequence::prepare`] with [`SequenceFit::LIVE`]: a partial window is padded with
    /// trailing empty frames, and every hand is normalized.
    pub fn prepare(&self) -> Sequence {
        let frames = self.frames.iter().copied().collect::<Vec<_>>();
        sequence::prepare(&frames, SequenceFit::LIVE)
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::new(WARMUP_FRAMES)
    }
}

/// Session id used when a client does not name one.
pub const DEFAULT_SESSION: &str = "default";

/// Independent [`Window`]s keyed by session id.
///
/// At most `capacity` sessions are kept. Adding a session beyond that evicts the one that was
/// used least recently.
pub struct SessionStore {
    capacity: usize,
    warmup: usize,
    state: Mutex<Sessions>,
}

#[derive(Default)]
struct Sessions {
    windows: HashMap<String, Session>,
    clock: u64,
}

struct Session {
    window: Window,
    last_used: u64,
}

impl SessionStore {
    /// Creates an empty store. `capacity` is raised to at least 1.
    pub fn new(capacity: usize, warmup: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            warmup,
            state: Mutex::new(Sessions::default()),
        }
    }

    /// Runs `f` on the window of session `id`, creating the session if needed.
    ///
    /// The store is locked while `f` runs, so `f` should only do cheap work.
    pub fn with_window<R>(&self, id: &str, f: impl FnOnce(&mut Window) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.clock += 1;
        let now = state.clock;

        if !state.windows.contains_key(id) && state.windows.len() >= self.capacity {
            state.evict_lru();
        }
        let warmup = self.warmup;
        let session = state.windows.entry(id.to_string()).or_insert_with(|| {
            log::debug!("new session `{id}`");
            Session {
                window: Window::new(warmup),
                last_used: now,
            }
        });
        session.last_used = now;
        f(&mut session.window)
    }

    /// Clears the window of session `id`. Returns `false` if there is no such session.
    pub fn reset(&self, id: &str) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.windows.get_mut(id) {
            Some(session) => {
                session.window.reset();
                true
            }
            None => false,
        }
    }

    /// Returns the number of buffered frames of session `id`, or 0 if there is no such session.
    pub fn buffered(&self, id: &str) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.windows.get(id).map_or(0, |s| s.window.len())
    }

    /// Returns the number of live sessions.
    pub fn len(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Sessions {
    fn evict_lru(&mut self) {
        let oldest = self
            .windows
            .iter()
            .min_by_key(|(_, session)| session.last_used)
            .map(|(id, _)| id.clone());
        if let Some(id) = oldest {
            log::debug!("evicting least recently used session `{id}`");
            self.windows.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FRAME_LEN;

    fn numbered(i: usize) -> FrameVector {
        let mut values = [0.0; FRAME_LEN];
        values[0] = i as f32;
        FrameVector::from_slice(&values).unwrap()
    }

    #[test]
    fn keeps_last_frames_in_order() {
        let mut window = Window::default();
        for i in 1..=SEQ_LEN + 15 {
            window.push(numbered(i));
        }
        assert_eq!(window.len(), SEQ_LEN);

        let firsts = window.frames().map(|f| f.as_slice()[0]).collect::<Vec<_>>();
        let expected = (16..=SEQ_LEN + 15).map(|i| i as f32).collect::<Vec<_>>();
        assert_eq!(firsts, expected);
        assert!(window.prepare().frames().iter().all(|f| f.has_hands()));
    }

    #[test]
    fn warmup_gate() {
        let mut window = Window::default();
        for i in 1..WARMUP_FRAMES {
            window.push(numbered(i));
            assert!(!window.is_ready());
        }
        window.push(numbered(WARMUP_FRAMES));
        assert!(window.is_ready());

        window.reset();
        assert_eq!(window.len(), 0);
        assert!(!window.is_ready());
    }

    #[test]
    fn warmup_is_clamped() {
        assert_eq!(Window::new(0).warmup(), 1);
        assert_eq!(Window::new(1000).warmup(), SEQ_LEN);
    }

    #[test]
    fn partial_window_is_padded_and_normalized() {
        let mut window = Window::default();
        for i in 1..=5 {
            window.push(numbered(i));
        }
        let sequence = window.prepare();
        // Only the wrist x is non-zero, so it becomes the right edge of the bounding box.
        assert_eq!(sequence.frames()[4].as_slice()[0], 1.0);
        assert!(sequence.frames()[5..].iter().all(|f| *f == FrameVector::EMPTY));
    }

    #[test]
    fn sessions_are_independent() {
        let store = SessionStore::new(4, WARMUP_FRAMES);
        for i in 0..3 {
            store.with_window("a", |w| w.push(numbered(i)));
        }
        store.with_window("b", |w| w.push(numbered(1)));

        assert_eq!(store.buffered("a"), 3);
        assert_eq!(store.buffered("b"), 1);
        assert_eq!(store.len(), 2);

        assert!(store.reset("a"));
        assert_eq!(store.buffered("a"), 0);
        assert_eq!(store.buffered("b"), 1);
        assert!(!store.reset("missing"));
    }

    #[test]
    fn least_recently_used_session_is_evicted() {
        let store = SessionStore::new(2, WARMUP_FRAMES);
        store.with_window("a", |w| w.push(numbered(1)));
        store.with_window("b", |w| w.push(numbered(1)));
        store.with_window("a", |w| w.push(numbered(2)));
        store.with_window("c", |w| w.push(numbered(1)));

        assert_eq!(store.len(), 2);
        assert_eq!(store.buffered("a"), 2);
        assert_eq!(store.buffered("b"), 0);
        assert_eq!(store.buffered("c"), 1);
    }
}
