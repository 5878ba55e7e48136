//! Ordered payload transformation pipeline.
//!
//! Two independent stage sequences mediate every payload: outgoing stages
//! run before the codec encodes a write, incoming stages run after the codec
//! decodes a packet. Registration order is execution order. There is no
//! removal API; a registered stage lives as long as the client.

use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

/// Which stage sequence a transformer joins.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransformKind {
    /// Applied to payloads after decode, before the public `data` event.
    Incoming,
    /// Applied to payloads before encode.
    Outgoing,
}

/// Mutable container handed to every stage.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformPacket {
    /// The payload; a stage may replace it wholesale.
    pub data: Value,
}

/// Outcome of a single stage.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformFlow {
    /// Hand the (possibly mutated) packet to the next stage.
    Continue,
    /// Suppress the whole operation for this payload; later stages do not
    /// run and nothing is emitted.
    Stop,
}

/// A registered stage.
pub type Stage = Arc<dyn Fn(&mut TransformPacket) -> TransformFlow + Send + Sync + 'static>;

#[derive(Default)]
pub(crate) struct TransformPipeline {
    incoming: Mutex<Vec<Stage>>,
    outgoing: Mutex<Vec<Stage>>,
}

impl TransformPipeline {
    fn stages(&self, kind: TransformKind) -> &Mutex<Vec<Stage>> {
        match kind {
            TransformKind::Incoming => &self.incoming,
            TransformKind::Outgoing => &self.outgoing,
        }
    }

    pub(crate) fn register(&self, kind: TransformKind, stage: Stage) {
        self.stages(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stage);
    }

    /// Run `data` through the stage sequence for `kind`.
    ///
    /// Returns `None` when a stage stopped propagation. The stage list is
    /// snapshotted before the run, so a stage may register further stages
    /// without deadlocking; those join only subsequent runs.
    pub(crate) fn run(&self, kind: TransformKind, data: Value) -> Option<Value> {
        let stages: Vec<Stage> = self
            .stages(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Arc::clone)
            .collect();

        let mut packet = TransformPacket { data };
        for stage in stages {
            if stage(&mut packet) == TransformFlow::Stop {
                return None;
            }
        }
        Some(packet.data)
    }

    #[cfg(test)]
    fn len(&self, kind: TransformKind) -> usize {
        self.stages(kind)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stages_run_in_registration_order() {
        let pipeline = TransformPipeline::default();
        pipeline.register(
            TransformKind::Outgoing,
            Arc::new(|packet| {
                packet.data = json!(format!("{}-a", packet.data.as_str().unwrap_or_default()));
                TransformFlow::Continue
            }),
        );
        pipeline.register(
            TransformKind::Outgoing,
            Arc::new(|packet| {
                packet.data = json!(format!("{}-b", packet.data.as_str().unwrap_or_default()));
                TransformFlow::Continue
            }),
        );

        let out = pipeline.run(TransformKind::Outgoing, json!("x"));
        assert_eq!(out, Some(json!("x-a-b")));
    }

    #[test]
    fn stop_suppresses_and_skips_later_stages() {
        let pipeline = TransformPipeline::default();
        pipeline.register(TransformKind::Incoming, Arc::new(|_| TransformFlow::Stop));
        pipeline.register(
            TransformKind::Incoming,
            Arc::new(|_| panic!("stage after Stop must not run")),
        );

        assert_eq!(pipeline.run(TransformKind::Incoming, json!(1)), None);
    }

    #[test]
    fn sequences_are_independent() {
        let pipeline = TransformPipeline::default();
        pipeline.register(TransformKind::Incoming, Arc::new(|_| TransformFlow::Stop));

        // The outgoing sequence is untouched by the incoming stage
        assert_eq!(
            pipeline.run(TransformKind::Outgoing, json!("pass")),
            Some(json!("pass"))
        );
    }

    #[test]
    fn stage_may_register_stages_without_deadlock() {
        let pipeline = Arc::new(TransformPipeline::default());
        let reentrant = Arc::clone(&pipeline);
        pipeline.register(
            TransformKind::Outgoing,
            Arc::new(move |_| {
                reentrant.register(TransformKind::Outgoing, Arc::new(|_| TransformFlow::Continue));
                TransformFlow::Continue
            }),
        );

        assert!(pipeline.run(TransformKind::Outgoing, json!(null)).is_some());
        assert_eq!(pipeline.len(TransformKind::Outgoing), 2);
    }

    #[test]
    fn kind_displays_lowercase() {
        assert_eq!(TransformKind::Incoming.to_string(), "incoming");
        assert_eq!(TransformKind::Outgoing.to_string(), "outgoing");
    }
}
