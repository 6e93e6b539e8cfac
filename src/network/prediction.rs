//! Client Prediction Buffer
//!
//! Client half of the movement contract. The client applies its own moves
//! immediately and keeps them until the server acknowledges their sequence
//! id. A `positionCorrection` resets the prediction to the authoritative
//! position and replays whatever the server has not processed yet.

use std::collections::VecDeque;

use glam::{Quat, Vec3};
use tracing::debug;

use crate::game::input::{InputFlags, MoveCommand};

/// A move applied locally but not yet acknowledged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PredictedMove {
    /// Sequence id sent with the move
    pub sequence: u32,
    /// Displacement the client applied
    pub delta: Vec3,
    /// Facing after the move
    pub rotation: Quat,
    /// Held keys
    pub input_flags: InputFlags,
}

/// Unacknowledged moves plus the predicted position they lead to.
#[derive(Clone, Debug)]
pub struct PredictionBuffer {
    pending: VecDeque<PredictedMove>,
    capacity: usize,
    next_sequence: u32,
    position: Vec3,
    rotation: Quat,
}

impl PredictionBuffer {
    /// Default number of moves kept before the oldest is dropped.
    pub const DEFAULT_CAPACITY: usize = 256;

    /// Start predicting from a spawn position.
    pub fn new(position: Vec3) -> Self {
        Self::with_capacity(position, Self::DEFAULT_CAPACITY)
    }

    /// Start predicting with a custom history length.
    pub fn with_capacity(position: Vec3, capacity: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_sequence: 1,
            position,
            rotation: Quat::IDENTITY,
        }
    }

    /// Predicted position.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Number of unacknowledged moves.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Apply a move locally and build the command to send.
    pub fn record(&mut self, delta: Vec3, rotation: Quat, input_flags: InputFlags) -> MoveCommand {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);

        if self.pending.len() == self.capacity {
            self.pending.pop_front();
        }
        self.pending.push_back(PredictedMove {
            sequence,
            delta,
            rotation,
            input_flags,
        });

        self.position += delta;
        self.rotation = rotation;

        MoveCommand {
            position: self.position,
            rotation,
            input_sequence_id: sequence,
            input_flags,
        }
    }

    /// Drop every move the server has processed.
    pub fn acknowledge(&mut self, last_processed: u32) {
        self.pending.retain(|m| m.sequence > last_processed);
    }

    /// Adopt an authoritative position and replay the moves after it.
    ///
    /// Returns the new predicted position.
    pub fn reconcile(&mut self, position: Vec3, rotation: Quat, input_sequence_id: u32) -> Vec3 {
        self.acknowledge(input_sequence_id);

        let before = self.position;
        self.position = position;
        self.rotation = rotation;
        for m in &self.pending {
            self.position += m.delta;
            self.rotation = m.rotation;
        }

        debug!(
            replayed = self.pending.len(),
            error = before.distance(self.position),
            "Prediction reconciled"
        );
        self.position
    }
}
