//! Pluggable driving-behaviour models and traffic sources.

use crate::light::LightStatus;
use crate::network::{NetworkView, SegmentEntry};
use crate::segment::RoadSegment;
use crate::vehicle::{ApproachingLight, DrivingParams, VehicleView};

/// Standard gravity in m/s^2, for the gradient resistance term.
const GRAVITY: f64 = 9.81;

/// Computes a vehicle's longitudinal acceleration each tick.
pub trait CarFollowingModel {
    /// Returns the requested acceleration in m/s^2.
    ///
    /// # Parameters
    /// * `subject` - The vehicle being driven
    /// * `leader` - The nearest vehicle ahead in the same lane, if any within range
    /// * `params` - The subject's current driving parameters
    fn acceleration(
        &self,
        subject: &VehicleView,
        leader: Option<&VehicleView>,
        params: &DrivingParams,
    ) -> f64;
}

/// Chooses lane changes for a vehicle each tick.
pub trait LaneChangeModel {
    /// Decides whether the vehicle should change lane this tick.
    fn decide(
        &self,
        subject: &VehicleView,
        segment: &RoadSegment,
        network: &NetworkView,
    ) -> LaneChangeDecision;
}

/// A lane-change decision.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LaneChangeDecision {
    /// Move towards the innermost lane (decreasing lane index).
    Left,
    /// Move away from the innermost lane (increasing lane index).
    Right,
    /// Stay in the current lane.
    Stay,
}

/// Supplies vehicles to a segment's upstream end during the inflow phase.
pub trait TrafficSource {
    /// Called once per tick; may admit any number of vehicles through `entry`.
    fn time_step(&mut self, dt: f64, sim_time: f64, iteration_count: usize, entry: &mut SegmentEntry);
}

/// A model that always requests the same acceleration.
///
/// Useful for probe vehicles and roadwork obstacles.
#[derive(Copy, Clone, Debug)]
pub struct FixedAcceleration(pub f64);

impl CarFollowingModel for FixedAcceleration {
    fn acceleration(&self, _: &VehicleView, _: Option<&VehicleView>, _: &DrivingParams) -> f64 {
        self.0
    }
}

/// A model that never changes lane.
#[derive(Copy, Clone, Debug)]
pub struct NoLaneChange;

impl LaneChangeModel for NoLaneChange {
    fn decide(&self, _: &VehicleView, _: &RoadSegment, _: &NetworkView) -> LaneChangeDecision {
        LaneChangeDecision::Stay
    }
}

/// The intelligent driver model.
///
/// Honours the engine-written driving parameters: the effective speed limit
/// and speed factor cap the desired speed, the headway factor scales the
/// desired time headway, the slope adds a gravity term, and a red or amber
/// light ahead is braked for like a standing obstacle.
#[derive(Clone, Debug)]
pub struct Idm {
    /// The desired speed in m/s.
    pub desired_speed: f64,
    /// The desired time headway in s.
    pub headway: f64,
    /// The minimum gap to the vehicle ahead in m.
    pub min_gap: f64,
    /// The maximum acceleration in m/s^2.
    pub max_acc: f64,
    /// The comfortable deceleration in m/s^2, a positive number.
    pub comf_dec: f64,
}

impl Default for Idm {
    fn default() -> Self {
        Self {
            desired_speed: 33.3,
            headway: 1.5,
            min_gap: 2.0,
            max_acc: 1.4,
            comf_dec: 2.0,
        }
    }
}

impl Idm {
    /// Computes the model acceleration towards an obstacle `net_dist` ahead
    /// moving at `their_vel`.
    fn idm(&self, net_dist: f64, vel: f64, their_vel: f64, v0: f64, headway: f64) -> f64 {
        if net_dist <= 0.0 {
            return -10.0 * self.max_acc;
        }
        let appr = vel - their_vel;
        let factor = 1.0 / (2.0 * (self.max_acc * self.comf_dec).sqrt());
        let ss = self.min_gap + (vel * headway) + (vel * appr * factor);
        let free = if v0 > 0.0 { (vel / v0).powi(4) } else { 1.0 };
        let term = ss / net_dist;
        self.max_acc * (1.0 - free - (term * term))
    }

    /// Computes the free-road acceleration towards the desired speed.
    fn idm_free(&self, vel: f64, v0: f64) -> f64 {
        if v0 > 0.0 {
            self.max_acc * (1.0 - (vel / v0).powi(4))
        } else {
            -self.comf_dec
        }
    }

    /// Whether the vehicle should brake for the light ahead.
    ///
    /// A red light is always stopped for; an amber light only when the
    /// vehicle can still comfortably stop before the line.
    fn must_stop(&self, light: &ApproachingLight, vel: f64) -> bool {
        match light.status {
            LightStatus::Red => light.distance > 0.0,
            LightStatus::Amber => light.distance >= vel * vel / (2.0 * self.comf_dec),
            LightStatus::Green => false,
        }
    }
}

impl CarFollowingModel for Idm {
    fn acceleration(
        &self,
        subject: &VehicleView,
        leader: Option<&VehicleView>,
        params: &DrivingParams,
    ) -> f64 {
        let vel = subject.vel;
        let v0 = f64::min(self.desired_speed, params.speed_limit) * params.speed_factor;
        let headway = self.headway * params.headway_factor;

        let mut acc = match leader {
            Some(leader) => self.idm(leader.pos - subject.pos_front(), vel, leader.vel, v0, headway),
            None => self.idm_free(vel, v0),
        };

        if let Some(light) = params.light {
            if self.must_stop(&light, vel) {
                acc = f64::min(acc, self.idm(light.distance, vel, 0.0, v0, headway));
            }
        }

        acc - GRAVITY * params.slope
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::VehicleId;
    use assert_approx_eq::assert_approx_eq;

    fn idm() -> Idm {
        Idm {
            desired_speed: 30.0,
            headway: 1.5,
            min_gap: 2.0,
            max_acc: 1.4,
            comf_dec: 2.0,
        }
    }

    fn subject(pos: f64, vel: f64) -> VehicleView {
        VehicleView {
            id: VehicleId::default(),
            lane: 1,
            pos,
            vel,
            length: 4.0,
            exit_segment: None,
        }
    }

    #[test]
    fn free_road_acceleration() {
        let acc = idm().acceleration(&subject(0.0, 20.0), None, &DrivingParams::default());
        assert_approx_eq!(acc, 1.4 * (1.0 - (20.0f64 / 30.0).powi(4)));
    }

    #[test]
    fn following_at_matched_speed() {
        // ss = 2 + 20 * 1.5 = 32, gap = 64, so the interaction term is 0.25.
        let leader = subject(98.0, 20.0);
        let acc = idm().acceleration(&subject(30.0, 20.0), Some(&leader), &DrivingParams::default());
        assert_approx_eq!(acc, 1.4 * (1.0 - (20.0f64 / 30.0).powi(4) - 0.25));
    }

    #[test]
    fn speed_limit_caps_desired_speed() {
        let params = DrivingParams {
            speed_limit: 20.0,
            ..Default::default()
        };
        let acc = idm().acceleration(&subject(0.0, 20.0), None, &params);
        assert_approx_eq!(acc, 0.0);
    }

    #[test]
    fn slope_adds_gravity_term() {
        let params = DrivingParams {
            slope: 0.05,
            ..Default::default()
        };
        let flat = idm().acceleration(&subject(0.0, 20.0), None, &DrivingParams::default());
        let uphill = idm().acceleration(&subject(0.0, 20.0), None, &params);
        assert_approx_eq!(flat - uphill, 9.81 * 0.05);
    }

    #[test]
    fn brakes_for_red_light() {
        let params = DrivingParams {
            light: Some(ApproachingLight {
                status: LightStatus::Red,
                distance: 50.0,
            }),
            ..Default::default()
        };
        let acc = idm().acceleration(&subject(0.0, 20.0), None, &params);
        assert!(acc < -2.0);
    }

    #[test]
    fn amber_is_ignored_when_stopping_is_uncomfortable() {
        // Stopping from 20 m/s at 2 m/s^2 needs 100 m.
        let near = DrivingParams {
            light: Some(ApproachingLight {
                status: LightStatus::Amber,
                distance: 9.0,
            }),
            ..Default::default()
        };
        let far = DrivingParams {
            light: Some(ApproachingLight {
                status: LightStatus::Amber,
                distance: 150.0,
            }),
            ..Default::default()
        };
        let free = idm().acceleration(&subject(0.0, 20.0), None, &DrivingParams::default());
        assert_approx_eq!(idm().acceleration(&subject(0.0, 20.0), None, &near), free);
        assert!(idm().acceleration(&subject(0.0, 20.0), None, &far) < free);
    }

    #[test]
    fn hard_brake_when_overlapping() {
        let leader = subject(2.0, 0.0);
        let acc = idm().acceleration(&subject(0.0, 10.0), Some(&leader), &DrivingParams::default());
        assert_approx_eq!(acc, -14.0);
    }
}
