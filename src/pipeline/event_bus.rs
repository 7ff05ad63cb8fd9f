// src/pipeline/event_bus.rs
//
// Decoupled event system. The session publishes alert events here instead
// of reaching into the actuation layer directly; the driver drains them
// at the output boundary.

use crate::types::{AutopilotTrigger, StageTransitionEvent};
use std::collections::VecDeque;
use tracing::warn;

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// The alert stage changed; carries the full transition record.
    StageChanged(StageTransitionEvent),

    /// One-shot handoff signal. Emitted at most once per session.
    AutopilotEngaged(AutopilotTrigger),
}

pub struct EventBus {
    events: VecDeque<PipelineEvent>,
    max_pending: usize,
}

impl EventBus {
    pub fn new(max_pending: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_pending),
            max_pending,
        }
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        if self.events.len() >= self.max_pending {
            warn!(
                "Event bus full ({} events), dropping oldest",
                self.max_pending
            );
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriggerCause;

    fn trigger(ts: f64) -> PipelineEvent {
        PipelineEvent::AutopilotEngaged(AutopilotTrigger {
            timestamp_ms: ts,
            cause: TriggerCause::Fatigue,
            severity: 0.9,
        })
    }

    #[test]
    fn test_drain_returns_events_in_publish_order() {
        let mut bus = EventBus::new(8);
        bus.publish(trigger(1.0));
        bus.publish(trigger(2.0));

        let drained = bus.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(bus.pending_count(), 0);
        match (&drained[0], &drained[1]) {
            (PipelineEvent::AutopilotEngaged(a), PipelineEvent::AutopilotEngaged(b)) => {
                assert!(a.timestamp_ms < b.timestamp_ms);
            }
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn test_full_bus_drops_oldest() {
        let mut bus = EventBus::new(2);
        bus.publish(trigger(1.0));
        bus.publish(trigger(2.0));
        bus.publish(trigger(3.0));
        assert_eq!(bus.pending_count(), 2);
    }
}
