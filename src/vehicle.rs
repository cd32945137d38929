use crate::light::LightStatus;
use crate::model::{CarFollowingModel, LaneChangeDecision, LaneChangeModel};
use crate::network::NetworkView;
use crate::segment::RoadSegment;
use crate::{SegmentId, VehicleId};
use std::cell::Cell;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A simulated vehicle.
pub struct Vehicle {
    /// The vehicle's ID.
    pub(crate) id: VehicleId,
    /// The vehicle's length in m.
    length: f64,
    /// The rear bumper position along the current segment, in m.
    pos: f64,
    /// The rear bumper position at the start of the tick, for crossing detection.
    pos_old: f64,
    /// The velocity in m/s.
    vel: f64,
    /// The 1-based index of the lane the vehicle occupies.
    lane: usize,
    /// The lane occupied before the most recent lane change.
    lane_old: usize,
    /// The segment the vehicle is currently on.
    segment: SegmentId,
    /// The acceleration requested by the car-following model, applied at integration.
    acc: Cell<f64>,
    /// Driving parameters written by road objects.
    params: DrivingParams,
    /// The segment this vehicle should leave the road at, set by an active diversion.
    exit_segment: Option<SegmentId>,
    /// The car-following model.
    following: Box<dyn CarFollowingModel>,
    /// The lane-change model.
    lane_change: Box<dyn LaneChangeModel>,
}

/// The attributes of a vehicle entering the simulation.
pub struct VehicleAttributes {
    /// The vehicle length in m.
    pub length: f64,
    /// The initial rear bumper position in m.
    pub pos: f64,
    /// The initial velocity in m/s.
    pub vel: f64,
    /// The car-following model.
    pub following: Box<dyn CarFollowingModel>,
    /// The lane-change model.
    pub lane_change: Box<dyn LaneChangeModel>,
}

/// Per-vehicle driving parameters, written by road objects and read by driving models.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DrivingParams {
    /// The effective speed limit in m/s; infinite when unrestricted.
    pub speed_limit: f64,
    /// The road gradient at the vehicle's position, as a fraction (uphill positive).
    pub slope: f64,
    /// Multiplier applied to the model's desired time headway.
    pub headway_factor: f64,
    /// Multiplier applied to the model's desired speed.
    pub speed_factor: f64,
    /// The traffic light ahead, while the vehicle is within its approach.
    pub light: Option<ApproachingLight>,
}

impl Default for DrivingParams {
    fn default() -> Self {
        Self {
            speed_limit: f64::INFINITY,
            slope: 0.0,
            headway_factor: 1.0,
            speed_factor: 1.0,
            light: None,
        }
    }
}

/// A traffic light a vehicle is approaching.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ApproachingLight {
    /// The light's current status.
    pub status: LightStatus,
    /// The distance from the vehicle's front bumper to the stop line, in m.
    pub distance: f64,
}

/// A read-only snapshot of a vehicle, as returned by spatial queries.
///
/// Cross-segment queries return copies with the position shifted into the
/// querying segment's coordinates, never live references.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VehicleView {
    /// The vehicle's ID.
    pub id: VehicleId,
    /// The 1-based lane index.
    pub lane: usize,
    /// The rear bumper position in m.
    pub pos: f64,
    /// The velocity in m/s.
    pub vel: f64,
    /// The vehicle length in m.
    pub length: f64,
    /// The diversion exit marking, if any.
    pub exit_segment: Option<SegmentId>,
}

impl VehicleView {
    /// The front bumper position in m.
    pub fn pos_front(&self) -> f64 {
        self.pos + self.length
    }

    /// Returns a copy with the position shifted by `delta` metres.
    pub(crate) fn shifted(self, delta: f64) -> Self {
        Self {
            pos: self.pos + delta,
            ..self
        }
    }
}

impl Vehicle {
    /// Creates a new vehicle.
    pub(crate) fn new(
        id: VehicleId,
        segment: SegmentId,
        lane: usize,
        attributes: VehicleAttributes,
    ) -> Self {
        Self {
            id,
            length: attributes.length,
            pos: attributes.pos,
            pos_old: attributes.pos,
            vel: attributes.vel,
            lane,
            lane_old: lane,
            segment,
            acc: Cell::new(0.0),
            params: DrivingParams::default(),
            exit_segment: None,
            following: attributes.following,
            lane_change: attributes.lane_change,
        }
    }

    /// Gets the vehicle's ID.
    pub fn id(&self) -> VehicleId {
        self.id
    }

    /// The vehicle's length in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The segment the vehicle is currently on.
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// The 1-based index of the lane the vehicle occupies.
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// The lane occupied before the most recent lane change.
    pub fn lane_old(&self) -> usize {
        self.lane_old
    }

    /// The rear bumper position along the current segment, in m.
    pub fn pos_rear(&self) -> f64 {
        self.pos
    }

    /// The front bumper position along the current segment, in m.
    pub fn pos_front(&self) -> f64 {
        self.pos + self.length
    }

    /// The rear bumper position at the start of the current tick, in m.
    pub fn pos_old(&self) -> f64 {
        self.pos_old
    }

    /// The vehicle's velocity in m/s.
    pub fn vel(&self) -> f64 {
        self.vel
    }

    /// Whether the vehicle is stopped.
    pub fn has_stopped(&self) -> bool {
        self.vel < 0.1
    }

    /// The vehicle's current driving parameters.
    pub fn params(&self) -> &DrivingParams {
        &self.params
    }

    pub(crate) fn params_mut(&mut self) -> &mut DrivingParams {
        &mut self.params
    }

    /// The segment this vehicle should leave the road at, if a diversion marked it.
    pub fn exit_segment(&self) -> Option<SegmentId> {
        self.exit_segment
    }

    pub(crate) fn set_exit_segment(&mut self, segment: Option<SegmentId>) {
        self.exit_segment = segment;
    }

    /// Gets a read-only snapshot of the vehicle.
    pub fn view(&self) -> VehicleView {
        VehicleView {
            id: self.id,
            lane: self.lane,
            pos: self.pos,
            vel: self.vel,
            length: self.length,
            exit_segment: self.exit_segment,
        }
    }

    /// Asks the car-following model for an acceleration and stores the request.
    pub(crate) fn apply_following(&self, leader: Option<&VehicleView>) {
        let acc = self.following.acceleration(&self.view(), leader, &self.params);
        self.acc.set(acc);
    }

    /// Asks the lane-change model for a decision.
    pub(crate) fn decide_lane_change(
        &self,
        segment: &RoadSegment,
        network: &NetworkView,
    ) -> LaneChangeDecision {
        self.lane_change.decide(&self.view(), segment, network)
    }

    /// Moves the vehicle to another lane at its current longitudinal position.
    pub(crate) fn set_lane(&mut self, lane: usize) {
        self.lane_old = self.lane;
        self.lane = lane;
    }

    /// Relocates the vehicle onto a linked segment, rebasing both position fields.
    pub(crate) fn transfer(&mut self, segment: SegmentId, lane: usize, rebase: f64) {
        self.segment = segment;
        self.lane = lane;
        self.lane_old = lane;
        self.pos -= rebase;
        self.pos_old -= rebase;
    }

    /// Integrates the vehicle's velocity and position from the requested acceleration.
    ///
    /// A vehicle never reverses: if the acceleration would take the velocity
    /// below zero within the tick, the vehicle advances exactly its remaining
    /// stopping distance and comes to rest.
    ///
    /// # Parameters
    /// * `dt` - The time step in seconds
    pub(crate) fn integrate(&mut self, dt: f64) {
        self.pos_old = self.pos;
        let acc = self.acc.get();
        let vel = self.vel + dt * acc;
        if vel < 0.0 {
            self.pos += -0.5 * self.vel * self.vel / acc;
            self.vel = 0.0;
        } else {
            self.pos += dt * (self.vel + 0.5 * acc * dt);
            self.vel = vel;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{FixedAcceleration, NoLaneChange};
    use assert_approx_eq::assert_approx_eq;

    fn vehicle(pos: f64, vel: f64, acc: f64) -> Vehicle {
        let veh = Vehicle::new(
            VehicleId::default(),
            SegmentId::default(),
            1,
            VehicleAttributes {
                length: 4.0,
                pos,
                vel,
                following: Box::new(FixedAcceleration(acc)),
                lane_change: Box::new(NoLaneChange),
            },
        );
        veh.apply_following(None);
        veh
    }

    #[test]
    fn integrates_kinematically() {
        let mut veh = vehicle(999.0, 40.0, 0.0);
        veh.integrate(0.25);
        assert_approx_eq!(veh.pos_rear(), 1009.0);
        assert_approx_eq!(veh.pos_old(), 999.0);
        assert_approx_eq!(veh.vel(), 40.0);

        let mut veh = vehicle(0.0, 10.0, -5.0);
        veh.integrate(1.0);
        assert_approx_eq!(veh.pos_rear(), 7.5);
        assert_approx_eq!(veh.vel(), 5.0);
    }

    #[test]
    fn stops_exactly_instead_of_reversing() {
        let mut veh = vehicle(0.0, 10.0, -5.0);
        veh.integrate(4.0);
        assert_approx_eq!(veh.pos_rear(), 10.0);
        assert_approx_eq!(veh.vel(), 0.0);
    }

    #[test]
    fn stays_at_rest_under_braking() {
        let mut veh = vehicle(5.0, 0.0, -2.0);
        veh.integrate(1.0);
        assert_approx_eq!(veh.pos_rear(), 5.0);
        assert_approx_eq!(veh.vel(), 0.0);
    }
}
