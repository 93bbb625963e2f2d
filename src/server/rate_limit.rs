//! Per-conversation turn limiting.
//!
//! Each conversation id gets an independent sliding one-minute window of
//! turn timestamps. The limiter is owned by the server state and shared by
//! handlers, so tests can build fresh instances. Conversations whose window
//! has emptied are swept out at most once per window.

use crate::error::{Result, SpeechError};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window turn counter keyed by conversation id.
#[derive(Debug)]
pub struct ConversationRateLimiter {
    max_per_minute: u32,
    windows: Mutex<Windows>,
}

#[derive(Debug, Default)]
struct Windows {
    turns: HashMap<String, VecDeque<Instant>>,
    swept_at: Option<Instant>,
}

impl Windows {
    /// Drop idle conversations if a full window passed since the last sweep.
    fn sweep(&mut self, now: Instant) {
        if self
            .swept_at
            .is_some_and(|at| now.saturating_duration_since(at) < WINDOW)
        {
            return;
        }
        let before = self.turns.len();
        self.turns.retain(|_, window| {
            prune(window, now);
            !window.is_empty()
        });
        self.swept_at = Some(now);
        if self.turns.len() < before {
            debug!(
                evicted = before - self.turns.len(),
                tracked = self.turns.len(),
                "swept idle conversations"
            );
        }
    }
}

impl ConversationRateLimiter {
    /// Create a limiter allowing `max_per_minute` turns per conversation
    /// (0 disables limiting).
    #[must_use]
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute,
            windows: Mutex::new(Windows::default()),
        }
    }

    /// Turns recorded for `conversation_id` within the last minute.
    pub fn get(&self, conversation_id: &str) -> u32 {
        self.get_at(conversation_id, Instant::now())
    }

    /// Record a turn, or fail with [`SpeechError::RateLimited`] when the
    /// conversation is at its limit.
    ///
    /// # Errors
    ///
    /// Returns `RateLimited` with the seconds until the oldest turn expires.
    pub fn increment(&self, conversation_id: &str) -> Result<()> {
        self.increment_at(conversation_id, Instant::now())
    }

    /// Forget all turns of `conversation_id`.
    pub fn reset(&self, conversation_id: &str) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.turns.remove(conversation_id);
        }
    }

    fn get_at(&self, conversation_id: &str, now: Instant) -> u32 {
        let Ok(mut windows) = self.windows.lock() else {
            return 0;
        };
        let Some(window) = windows.turns.get_mut(conversation_id) else {
            return 0;
        };
        prune(window, now);
        let count = window.len() as u32;
        if count == 0 {
            windows.turns.remove(conversation_id);
        }
        count
    }

    fn increment_at(&self, conversation_id: &str, now: Instant) -> Result<()> {
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| SpeechError::Channel("rate limiter lock poisoned".into()))?;
        windows.sweep(now);
        let window = windows.turns.entry(conversation_id.to_owned()).or_default();
        prune(window, now);

        if self.max_per_minute > 0 && window.len() >= self.max_per_minute as usize {
            let retry_after_secs = window
                .front()
                .map(|&oldest| {
                    WINDOW
                        .saturating_sub(now.duration_since(oldest))
                        .as_secs()
                        .saturating_add(1)
                })
                .unwrap_or(1);
            return Err(SpeechError::RateLimited { retry_after_secs });
        }
        window.push_back(now);
        Ok(())
    }
}

fn prune(window: &mut VecDeque<Instant>, now: Instant) {
    while let Some(&first) = window.front() {
        if now.saturating_duration_since(first) >= WINDOW {
            window.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn limit_is_per_conversation() {
        let limiter = ConversationRateLimiter::new(2);
        limiter.increment("a").unwrap();
        limiter.increment("a").unwrap();
        assert!(matches!(
            limiter.increment("a"),
            Err(SpeechError::RateLimited { .. })
        ));
        limiter.increment("b").unwrap();
        assert_eq!(limiter.get("a"), 2);
        assert_eq!(limiter.get("b"), 1);
        assert_eq!(limiter.get("unknown"), 0);
    }

    #[test]
    fn window_slides() {
        let limiter = ConversationRateLimiter::new(1);
        let t0 = Instant::now();
        limiter.increment_at("c", t0).unwrap();
        let err = limiter.increment_at("c", t0 + Duration::from_secs(20)).unwrap_err();
        match err {
            SpeechError::RateLimited { retry_after_secs } => assert_eq!(retry_after_secs, 41),
            other => panic!("unexpected {other:?}"),
        }
        limiter.increment_at("c", t0 + Duration::from_secs(61)).unwrap();
        assert_eq!(limiter.get_at("c", t0 + Duration::from_secs(62)), 1);
    }

    #[test]
    fn reset_clears_conversation() {
        let limiter = ConversationRateLimiter::new(1);
        limiter.increment("d").unwrap();
        limiter.reset("d");
        assert_eq!(limiter.get("d"), 0);
        limiter.increment("d").unwrap();
    }

    #[test]
    fn idle_conversations_are_evicted() {
        let limiter = ConversationRateLimiter::new(5);
        let t0 = Instant::now();
        for i in 0..10_000 {
            limiter.increment_at(&format!("conv-{i}"), t0).unwrap();
        }
        assert_eq!(limiter.windows.lock().unwrap().turns.len(), 10_000);

        limiter
            .increment_at("fresh", t0 + Duration::from_secs(3600))
            .unwrap();
        let windows = limiter.windows.lock().unwrap();
        assert_eq!(windows.turns.len(), 1);
        assert!(windows.turns.contains_key("fresh"));
    }

    #[test]
    fn active_conversations_survive_a_sweep() {
        let limiter = ConversationRateLimiter::new(1);
        let t0 = Instant::now();
        limiter.increment_at("old", t0).unwrap();
        limiter
            .increment_at("recent", t0 + Duration::from_secs(50))
            .unwrap();
        limiter
            .increment_at("new", t0 + Duration::from_secs(70))
            .unwrap();
        // "recent" is still inside its window and stays limited.
        assert!(matches!(
            limiter.increment_at("recent", t0 + Duration::from_secs(71)),
            Err(SpeechError::RateLimited { .. })
        ));
        assert!(!limiter.windows.lock().unwrap().turns.contains_key("old"));
    }

    #[test]
    fn reading_an_expired_window_forgets_it() {
        let limiter = ConversationRateLimiter::new(3);
        let t0 = Instant::now();
        limiter.increment_at("f", t0).unwrap();
        assert_eq!(limiter.get_at("f", t0 + Duration::from_secs(90)), 0);
        assert!(limiter.windows.lock().unwrap().turns.is_empty());
    }

    #[test]
    fn zero_means_unlimited() {
        let limiter = ConversationRateLimiter::new(0);
        for _ in 0..100 {
            limiter.increment("e").unwrap();
        }
        assert_eq!(limiter.get("e"), 100);
    }
}
