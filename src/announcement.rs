//! Announcement pre-roll: a short lead-in spoken before the main content.
//!
//! The main utterance follows after a fixed delay. This is best-effort
//! timing, not synchronization: the delay only has to be long enough for
//! the engine to queue the announcement first. Every armed pre-roll is
//! tagged with the request's ticket; once a newer request takes over,
//! the old main utterance is never released.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::engine::EngineUtterance;
use crate::utterance::Ticket;

pub const DEFAULT_DELAY: Duration = Duration::from_millis(300);

/// Medicine-label sections that get a canned announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Section {
    Dosage,
    SideEffects,
    Warnings,
    Uses,
    Details,
    Food,
    #[serde(other)]
    General,
}

impl Section {
    pub fn announcement(self) -> &'static str {
        match self {
            Self::Dosage => "Now reading dosage instructions",
            Self::SideEffects => "Now reading side effects information",
            Self::Warnings => "Now reading important warnings",
            Self::Uses => "Now reading medicine uses",
            Self::Details => "Now reading medicine details",
            Self::Food => "Now reading food instructions",
            Self::General => "Now reading information",
        }
    }
}

struct PendingMain {
    ticket: Ticket,
    utterance: EngineUtterance,
    elapsed: bool,
}

pub struct AnnouncementSequencer {
    delay: Duration,
    pending: Option<PendingMain>,
}

impl AnnouncementSequencer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Queue `main` to follow the announcement of request `ticket`.
    /// Any earlier pending main utterance is discarded. Returns the delay
    /// the caller should wait before calling [`Self::release`].
    pub fn arm(&mut self, ticket: Ticket, main: EngineUtterance) -> Duration {
        if let Some(old) = self.pending.take() {
            debug!("Pre-roll {} superseded by {ticket}", old.ticket);
        }
        self.pending = Some(PendingMain {
            ticket,
            utterance: main,
            elapsed: false,
        });
        self.delay
    }

    /// Delay for `ticket` is over: hand out its main utterance.
    /// Returns `None` for a superseded or already released ticket.
    pub fn release(&mut self, ticket: Ticket) -> Option<EngineUtterance> {
        match &self.pending {
            Some(p) if p.ticket == ticket => self.pending.take().map(|p| p.utterance),
            _ => None,
        }
    }

    /// Delay for `ticket` is over but playback is paused: keep the main
    /// utterance until [`Self::release_held`].
    pub fn hold(&mut self, ticket: Ticket) -> bool {
        match &mut self.pending {
            Some(p) if p.ticket == ticket => {
                p.elapsed = true;
                true
            }
            _ => false,
        }
    }

    /// Release a main utterance whose delay already ran out while paused.
    pub fn release_held(&mut self, ticket: Ticket) -> Option<EngineUtterance> {
        match &self.pending {
            Some(p) if p.ticket == ticket && p.elapsed => self.pending.take().map(|p| p.utterance),
            _ => None,
        }
    }

    pub fn is_armed(&self, ticket: Ticket) -> bool {
        self.pending.as_ref().is_some_and(|p| p.ticket == ticket)
    }

    /// Drop whatever is pending.
    pub fn disarm(&mut self) {
        self.pending = None;
    }
}

impl Default for AnnouncementSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Segment;
    use crate::utterance::TicketCounter;

    fn main_for(ticket: Ticket) -> EngineUtterance {
        EngineUtterance {
            ticket,
            segment: Segment::Main,
            text: "Take one tablet daily".into(),
            locale_code: "en-US".into(),
            voice: None,
            rate: 1.0,
            pitch: 1.0,
            volume: 1.0,
        }
    }

    #[test]
    fn test_release_matching_ticket_once() {
        let mut tickets = TicketCounter::default();
        let t = tickets.issue();
        let mut seq = AnnouncementSequencer::default();

        assert_eq!(seq.arm(t, main_for(t)), DEFAULT_DELAY);
        assert!(seq.release(t).is_some());
        assert!(seq.release(t).is_none());
    }

    #[test]
    fn test_superseded_ticket_never_releases() {
        let mut tickets = TicketCounter::default();
        let first = tickets.issue();
        let second = tickets.issue();
        let mut seq = AnnouncementSequencer::default();

        seq.arm(first, main_for(first));
        seq.arm(second, main_for(second));

        assert!(seq.release(first).is_none());
        assert_eq!(seq.release(second).map(|u| u.ticket), Some(second));
    }

    #[test]
    fn test_hold_then_release_held() {
        let mut tickets = TicketCounter::default();
        let t = tickets.issue();
        let mut seq = AnnouncementSequencer::default();

        seq.arm(t, main_for(t));
        assert!(seq.release_held(t).is_none());
        assert!(seq.hold(t));
        assert!(seq.release_held(t).is_some());
        assert!(!seq.is_armed(t));
    }

    #[test]
    fn test_disarm() {
        let mut tickets = TicketCounter::default();
        let t = tickets.issue();
        let mut seq = AnnouncementSequencer::default();
        seq.arm(t, main_for(t));
        seq.disarm();
        assert!(seq.release(t).is_none());
    }

    #[test]
    fn test_section_announcements() {
        assert_eq!(Section::Warnings.announcement(), "Now reading important warnings");
        let parsed: Section = serde_json::from_str("\"sideEffects\"").unwrap();
        assert_eq!(parsed, Section::SideEffects);
        let unknown: Section = serde_json::from_str("\"storage\"").unwrap();
        assert_eq!(unknown.announcement(), "Now reading information");
    }
}
