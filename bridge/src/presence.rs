//! Card presence tracking.
//!
//! The poller repeatedly selects and turns the results into
//! presented/removed transitions. Two drivers share the same logic:
//! - timed: select, sleep, repeat
//! - edge-triggered: wait for a falling edge on DETECT, then select

use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::bus::Bus;
use crate::error::{ReaderError, Result};
use crate::session::{CardInfo, ReaderSession};

/// Presence transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Presented(CardInfo),
    Removed,
}

/// Receiver of presence transitions. An error stops the presence loop.
pub trait EventSink {
    fn card_presented(&mut self, card: &CardInfo) -> Result<()>;
    fn card_removed(&mut self) -> Result<()>;
}

impl EventSink for Vec<PresenceEvent> {
    fn card_presented(&mut self, card: &CardInfo) -> Result<()> {
        self.push(PresenceEvent::Presented(card.clone()));
        Ok(())
    }

    fn card_removed(&mut self) -> Result<()> {
        self.push(PresenceEvent::Removed);
        Ok(())
    }
}

/// Forwards events to an async consumer. Must be called off the runtime.
impl EventSink for mpsc::Sender<PresenceEvent> {
    fn card_presented(&mut self, card: &CardInfo) -> Result<()> {
        self.blocking_send(PresenceEvent::Presented(card.clone()))
            .map_err(|_| ReaderError::SinkClosed)
    }

    fn card_removed(&mut self) -> Result<()> {
        self.blocking_send(PresenceEvent::Removed)
            .map_err(|_| ReaderError::SinkClosed)
    }
}

/// Last-known card and the transition rules
#[derive(Debug, Default)]
pub struct PresenceTracker {
    last: Option<CardInfo>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&CardInfo> {
        self.last.as_ref()
    }

    /// Fold one select result into the state, returning the transition.
    pub fn update(&mut self, selected: Option<CardInfo>) -> Option<PresenceEvent> {
        match selected {
            Some(card) if self.last.as_ref() != Some(&card) => {
                self.last = Some(card.clone());
                Some(PresenceEvent::Presented(card))
            }
            Some(_) => None,
            None => self.last.take().map(|_| PresenceEvent::Removed),
        }
    }
}

pub struct Poller<B, S> {
    session: ReaderSession<B>,
    sink: S,
    tracker: PresenceTracker,
}

impl<B: Bus, S: EventSink> Poller<B, S> {
    pub fn new(session: ReaderSession<B>, sink: S) -> Self {
        Self {
            session,
            sink,
            tracker: PresenceTracker::new(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn apply(&mut self, selected: Option<CardInfo>) -> Result<()> {
        match self.tracker.update(selected) {
            Some(PresenceEvent::Presented(card)) => {
                info!(uid = %card.uid_hex(), card_type = card.card_type, "card presented");
                self.sink.card_presented(&card)
            }
            Some(PresenceEvent::Removed) => {
                info!("card removed");
                self.sink.card_removed()
            }
            None => Ok(()),
        }
    }

    /// One timed iteration: select and apply, without sleeping.
    pub fn step(&mut self) -> Result<()> {
        let selected = self.session.select()?;
        self.apply(selected)
    }

    /// One edge-triggered iteration: block on DETECT, select and apply.
    pub fn step_on_edge(&mut self) -> Result<()> {
        let selected = self.session.poll()?;
        self.apply(selected)
    }

    /// Select every poll interval. Returns only on error.
    pub fn run_timed(&mut self) -> Result<()> {
        debug!("presence loop: timed");
        loop {
            self.step()?;
            thread::sleep(self.session.timing().poll_interval);
        }
    }

    /// Select after every falling edge on DETECT. Returns only on error.
    pub fn run_edge_triggered(&mut self) -> Result<()> {
        debug!("presence loop: edge-triggered");
        loop {
            self.step_on_edge()?;
            thread::sleep(self.session.timing().poll_interval);
        }
    }

    /// Edge-triggered when a detect line is configured, timed otherwise.
    pub fn run(&mut self) -> Result<()> {
        if self.session.has_detect_line() {
            self.run_edge_triggered()
        } else {
            self.run_timed()
        }
    }
}
