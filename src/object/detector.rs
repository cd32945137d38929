use super::{RoadObjectController, SignalContext};
use crate::{SegmentId, SignalPointId, SignalPointSet, VehicleSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A cross-section loop detector.
///
/// Vehicles crossing the detector are accumulated per lane; every sampling
/// interval the accumulators are reduced into a [DetectorRecord] and reset.
/// Cumulative counts are never reset.
pub struct LoopDetector {
    segment: SegmentId,
    pos: f64,
    dt_sample: f64,
    point: SignalPointId,
    elapsed: f64,
    lanes: Vec<LaneAccumulator>,
    records: Vec<DetectorRecord>,
}

/// The raw per-lane sums gathered between two samples.
#[derive(Clone, Default)]
struct LaneAccumulator {
    count: u32,
    vel_sum: f64,
    inv_vel_sum: f64,
    inv_gap_sum: f64,
    occupancy_time: f64,
    total_count: u64,
}

/// One detector sample, covering a single sampling interval.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorRecord {
    /// The simulation time at the end of the interval, in s.
    pub time: f64,
    /// The per-lane aggregates, innermost lane first.
    pub lanes: Vec<LaneRecord>,
    /// The all-lane aggregates.
    pub aggregate: LaneRecord,
    /// The number of vehicles counted since the detector was created.
    pub total_count: u64,
}

/// Aggregated traffic measures over one sampling interval.
#[derive(Copy, Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneRecord {
    /// The number of vehicles that passed.
    pub count: u32,
    /// The flow in vehicles/s.
    pub flow: f64,
    /// The arithmetic mean speed in m/s.
    pub mean_speed: f64,
    /// The harmonic mean speed in m/s.
    pub harmonic_speed: f64,
    /// The harmonic mean time gap in s.
    pub harmonic_time_gap: f64,
    /// The fraction of the interval the detector was covered by a vehicle.
    pub occupancy: f64,
    /// The density estimate flow / mean speed, in vehicles/m.
    pub density: f64,
}

impl LaneAccumulator {
    fn reduce(&self, dt_sample: f64) -> LaneRecord {
        let count = self.count;
        let flow = f64::from(count) / dt_sample;
        let mean_speed = if count > 0 { self.vel_sum / f64::from(count) } else { 0.0 };
        let harmonic_speed = if self.inv_vel_sum > 0.0 {
            f64::from(count) / self.inv_vel_sum
        } else {
            0.0
        };
        let harmonic_time_gap = if self.inv_gap_sum > 0.0 {
            f64::from(count) / self.inv_gap_sum
        } else {
            0.0
        };
        let occupancy = self.occupancy_time / dt_sample;
        let density = if mean_speed > 0.0 { flow / mean_speed } else { 0.0 };
        LaneRecord {
            count,
            flow,
            mean_speed,
            harmonic_speed,
            harmonic_time_gap,
            occupancy,
            density,
        }
    }
}

impl LoopDetector {
    pub(crate) fn new(segment: SegmentId, pos: f64, dt_sample: f64, lane_count: usize) -> Self {
        assert!(dt_sample > 0.0, "detector sampling interval must be positive");
        Self {
            segment,
            pos,
            dt_sample,
            point: SignalPointId::default(),
            elapsed: 0.0,
            lanes: vec![LaneAccumulator::default(); lane_count],
            records: vec![],
        }
    }

    /// The position of the detector along its segment, in m.
    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// The sampling interval in s.
    pub fn dt_sample(&self) -> f64 {
        self.dt_sample
    }

    /// The samples recorded so far, oldest first.
    pub fn records(&self) -> &[DetectorRecord] {
        &self.records
    }

    /// The number of vehicles counted since the detector was created.
    pub fn total_count(&self) -> u64 {
        self.lanes.iter().map(|acc| acc.total_count).sum()
    }

    /// Reduces the accumulators into a record and resets them for the next interval.
    fn sample(&mut self, time: f64) {
        let lanes: Vec<LaneRecord> = self.lanes.iter().map(|acc| acc.reduce(self.dt_sample)).collect();
        let mut total = LaneAccumulator::default();
        for acc in &self.lanes {
            total.count += acc.count;
            total.vel_sum += acc.vel_sum;
            total.inv_vel_sum += acc.inv_vel_sum;
            total.inv_gap_sum += acc.inv_gap_sum;
            total.occupancy_time += acc.occupancy_time;
            total.total_count += acc.total_count;
        }
        let mut aggregate = total.reduce(self.dt_sample);
        // Occupancy combines as a plain lane average, not count-weighted.
        aggregate.occupancy = lanes.iter().map(|lane| lane.occupancy).sum::<f64>() / lanes.len() as f64;
        self.records.push(DetectorRecord {
            time,
            lanes,
            aggregate,
            total_count: total.total_count,
        });
        for acc in &mut self.lanes {
            *acc = LaneAccumulator {
                total_count: acc.total_count,
                ..Default::default()
            };
        }
    }
}

impl RoadObjectController for LoopDetector {
    fn create_signal_positions(&mut self, ctx: &mut SignalContext) {
        self.point = ctx.place_point(self.segment, self.pos);
    }

    fn time_step(
        &mut self,
        dt: f64,
        sim_time: f64,
        _iteration_count: usize,
        _vehicles: &mut VehicleSet,
        points: &SignalPointSet,
    ) {
        for crossing in points[self.point].crossings() {
            let acc = &mut self.lanes[crossing.lane - 1];
            acc.count += 1;
            acc.total_count += 1;
            acc.vel_sum += crossing.vel;
            if crossing.vel > 0.0 {
                acc.inv_vel_sum += crossing.vel.recip();
                acc.occupancy_time += crossing.length / crossing.vel;
            }
            if let Some(time_gap) = crossing.time_gap {
                if time_gap > 0.0 {
                    acc.inv_gap_sum += time_gap.recip();
                }
            }
        }
        self.elapsed += dt;
        if self.elapsed >= self.dt_sample {
            self.sample(sim_time);
            self.elapsed -= self.dt_sample;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signal::{CrossedVehicle, SignalPoint};
    use crate::{VehicleId, VehicleSet};
    use assert_approx_eq::assert_approx_eq;

    fn crossing(lane: usize, vel: f64, time_gap: Option<f64>) -> CrossedVehicle {
        CrossedVehicle {
            vehicle: VehicleId::default(),
            lane,
            vel,
            length: 5.0,
            time_gap,
        }
    }

    #[test]
    fn aggregates_one_sample_interval() {
        let mut points = SignalPointSet::default();
        let point = points.insert(SignalPoint::new(SegmentId::default(), 100.0));
        let mut vehicles = VehicleSet::default();
        let mut detector = LoopDetector::new(SegmentId::default(), 100.0, 60.0, 2);
        detector.point = point;

        for i in 0..59 {
            detector.time_step(1.0, i as f64, i, &mut vehicles, &points);
        }
        assert!(detector.records().is_empty());

        points[point].record(crossing(1, 30.0, None));
        points[point].record(crossing(1, 20.0, Some(0.5)));
        points[point].record(crossing(2, 10.0, Some(2.0)));
        detector.time_step(1.0, 59.0, 59, &mut vehicles, &points);

        assert_eq!(detector.records().len(), 1);
        let record = &detector.records()[0];
        assert_eq!(record.total_count, 3);

        let lane1 = &record.lanes[0];
        assert_eq!(lane1.count, 2);
        assert_approx_eq!(lane1.flow, 2.0 / 60.0);
        assert_approx_eq!(lane1.mean_speed, 25.0);
        assert_approx_eq!(lane1.harmonic_speed, 24.0);
        assert_approx_eq!(lane1.harmonic_time_gap, 1.0);
        assert_approx_eq!(lane1.occupancy, (5.0 / 30.0 + 5.0 / 20.0) / 60.0);

        let all = &record.aggregate;
        assert_eq!(all.count, 3);
        assert_approx_eq!(all.flow, 0.05);
        assert_approx_eq!(all.mean_speed, 20.0);
        assert_approx_eq!(all.harmonic_speed, 180.0 / 11.0);
        assert_approx_eq!(all.harmonic_time_gap, 1.2);
        assert_approx_eq!(all.occupancy, 11.0 / 1440.0);
        assert_approx_eq!(all.density, 0.0025);
    }

    #[test]
    fn totals_survive_the_interval_reset() {
        let mut points = SignalPointSet::default();
        let point = points.insert(SignalPoint::new(SegmentId::default(), 50.0));
        let mut vehicles = VehicleSet::default();
        let mut detector = LoopDetector::new(SegmentId::default(), 50.0, 2.0, 1);
        detector.point = point;

        points[point].record(crossing(1, 10.0, None));
        detector.time_step(1.0, 0.0, 0, &mut vehicles, &points);
        points[point].clear();
        detector.time_step(1.0, 1.0, 1, &mut vehicles, &points);
        detector.time_step(1.0, 2.0, 2, &mut vehicles, &points);
        detector.time_step(1.0, 3.0, 3, &mut vehicles, &points);

        let records = detector.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].aggregate.count, 1);
        assert_eq!(records[1].aggregate.count, 0);
        assert_approx_eq!(records[1].aggregate.flow, 0.0);
        assert_eq!(records[0].total_count, 1);
        assert_eq!(records[1].total_count, 1);
        assert_eq!(detector.total_count(), 1);
    }
}
