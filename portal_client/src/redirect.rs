//! Redirect Loop Guard.
//!
//! Keeps the most recent redirects in a bounded, time-boxed window and vetoes
//! a navigation that would ping-pong between two views or keep hammering the
//! same target. A vetoed navigation goes to the terminal view instead, which
//! never redirects on its own.

use crate::config::GuardConfig;
use chrono::{DateTime, Utc};
use portal_auth::clock::Clock;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectEvent {
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub reason: String,
}

/// Outcome of [`RedirectLoopGuard::navigate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Navigation {
    Proceed,
    /// Show this view with a manual "return to login" action
    Terminal { view: String },
}

pub struct RedirectLoopGuard {
    config: GuardConfig,
    terminal_view: String,
    events: VecDeque<RedirectEvent>,
    clock: Arc<dyn Clock>,
}

impl RedirectLoopGuard {
    pub fn new(config: GuardConfig, terminal_view: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            config,
            terminal_view: terminal_view.into(),
            events: VecDeque::with_capacity(capacity),
            clock,
        }
    }

    pub fn terminal_view(&self) -> &str {
        &self.terminal_view
    }

    /// Events still inside the window, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &RedirectEvent> {
        self.events.iter()
    }

    fn evict_stale(&mut self) {
        let now = self.clock.now();
        let window_ms = self.config.window.as_millis();
        while let Some(oldest) = self.events.front() {
            let age_ms = (now - oldest.timestamp).num_milliseconds().max(0) as u128;
            if age_ms <= window_ms {
                break;
            }
            self.events.pop_front();
        }
    }

    pub fn record_redirect(&mut self, from: &str, to: &str, reason: &str) {
        self.evict_stale();
        while self.events.len() >= self.config.capacity.max(1) {
            self.events.pop_front();
        }
        self.events.push_back(RedirectEvent {
            timestamp: self.clock.now(),
            from: from.to_string(),
            to: to.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Would redirecting `from -> to` now be part of a loop?
    ///
    /// True when the two latest redirects were `from -> to` then `to -> from`,
    /// or when `to` has already been targeted `threshold` times inside the
    /// window.
    pub fn detect_loop(&mut self, from: &str, to: &str) -> bool {
        self.evict_stale();

        let mut recent = self.events.iter().rev();
        if let (Some(last), Some(before)) = (recent.next(), recent.next())
            && last.from == to
            && last.to == from
            && before.from == from
            && before.to == to
        {
            return true;
        }

        let hits = self.events.iter().filter(|e| e.to == to).count();
        hits >= self.config.threshold.max(1)
    }

    /// Check, then record. The terminal view itself is never vetoed.
    pub fn navigate(&mut self, from: &str, to: &str, reason: &str) -> Navigation {
        if to != self.terminal_view && self.detect_loop(from, to) {
            log::warn!("Redirect loop detected ({from} -> {to}, {reason}); stopping at {}", self.terminal_view);
            return Navigation::Terminal {
                view: self.terminal_view.clone(),
            };
        }
        self.record_redirect(from, to, reason);
        Navigation::Proceed
    }

    /// Forget all history, e.g. after a successful login.
    pub fn reset(&mut self) {
        self.events.clear();
    }
}

impl std::fmt::Debug for RedirectLoopGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedirectLoopGuard")
            .field("config", &self.config)
            .field("terminal_view", &self.terminal_view)
            .field("events", &self.events)
            .finish()
    }
}
