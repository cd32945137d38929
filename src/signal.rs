use crate::{SegmentId, VehicleId};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A fixed position on a segment that records the vehicles crossing it each tick.
///
/// A crossing is recorded exactly once, in the tick where the vehicle's rear
/// position transitions from before the point to at-or-after it. The records
/// survive until the next tick's integration phase clears them, so controllers
/// consume them after the full network step.
pub struct SignalPoint {
    /// The position of the point along its segment, in m.
    pos: f64,
    /// The segment the point lies on.
    segment: SegmentId,
    /// The vehicles that crossed the point during the current tick.
    crossings: Vec<CrossedVehicle>,
}

/// A vehicle that crossed a [SignalPoint], captured at the moment of crossing.
///
/// The capture survives the vehicle leaving the network in the same tick.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CrossedVehicle {
    /// The vehicle's ID.
    pub vehicle: VehicleId,
    /// The lane the vehicle crossed in.
    pub lane: usize,
    /// The vehicle's velocity at the end of the tick, in m/s.
    pub vel: f64,
    /// The vehicle's length in m.
    pub length: f64,
    /// The time gap to the following vehicle in s, if there is a moving one.
    pub time_gap: Option<f64>,
}

impl SignalPoint {
    pub(crate) fn new(segment: SegmentId, pos: f64) -> Self {
        Self {
            pos,
            segment,
            crossings: Vec::new(),
        }
    }

    /// The position of the point along its segment, in m.
    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// The segment the point lies on.
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// The vehicles that crossed the point during the current tick.
    pub fn crossings(&self) -> &[CrossedVehicle] {
        &self.crossings
    }

    /// Returns true if a move from `pos_old` to `pos` crosses the point.
    pub(crate) fn crossed_by(&self, pos_old: f64, pos: f64) -> bool {
        pos_old < self.pos && pos >= self.pos
    }

    pub(crate) fn record(&mut self, crossing: CrossedVehicle) {
        self.crossings.push(crossing);
    }

    pub(crate) fn clear(&mut self) {
        self.crossings.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn crossing_requires_a_transition() {
        let point = SignalPoint::new(SegmentId::default(), 100.0);
        assert!(point.crossed_by(95.0, 100.0));
        assert!(point.crossed_by(95.0, 120.0));
        assert!(!point.crossed_by(100.0, 120.0));
        assert!(!point.crossed_by(80.0, 95.0));
        assert!(!point.crossed_by(120.0, 140.0));
    }
}
