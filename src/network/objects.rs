//! Attaching road objects and traffic lights to an assembled network.

use super::RoadNetwork;
use crate::light::{ControllerAttributes, TrafficLight, TrafficLightController};
use crate::object::{
    BottleneckAttributes, FlowConservingBottleneck, GradientProfile, LoopDetector,
    RoadObjectController, SignalContext, SpeedLimit, VmsDiversion,
};
use crate::util::LaneMask;
use crate::SegmentId;

impl RoadNetwork {
    /// Places a posted speed limit sign on a segment.
    ///
    /// # Parameters
    /// * `segment` - The segment carrying the sign
    /// * `pos` - The sign position along the segment, in m
    /// * `limit` - The limit in m/s
    /// * `lanes` - The lanes the sign applies to
    pub fn add_speed_limit(&mut self, segment: SegmentId, pos: f64, limit: f64, lanes: LaneMask) {
        let mut object = SpeedLimit::new(segment, pos, limit, lanes);
        object.create_signal_positions(&mut self.signal_context());
        self.segments[segment].objects_mut().add_speed_limit(object);
    }

    /// Places a loop detector on a segment.
    ///
    /// # Parameters
    /// * `segment` - The segment carrying the detector
    /// * `pos` - The detector position along the segment, in m
    /// * `dt_sample` - The aggregation interval in s
    pub fn add_loop_detector(&mut self, segment: SegmentId, pos: f64, dt_sample: f64) {
        let lane_count = self.segments[segment].lane_count();
        let mut object = LoopDetector::new(segment, pos, dt_sample, lane_count);
        object.create_signal_positions(&mut self.signal_context());
        self.segments[segment].objects_mut().add_detector(object);
    }

    /// Derives a gradient profile from a piecewise-linear elevation profile.
    ///
    /// # Parameters
    /// * `segment` - The segment the profile covers
    /// * `elevation` - Pairs of position along the segment and elevation, both
    ///   in m, with strictly increasing positions
    pub fn add_gradient_profile(&mut self, segment: SegmentId, elevation: &[(f64, f64)]) {
        let mut object = GradientProfile::new(segment, elevation);
        object.create_signal_positions(&mut self.signal_context());
        self.segments[segment].objects_mut().add_gradient(object);
    }

    /// Places a flow-conserving bottleneck zone on a segment.
    pub fn add_bottleneck(&mut self, segment: SegmentId, attributes: &BottleneckAttributes) {
        let mut object = FlowConservingBottleneck::new(segment, attributes);
        object.create_signal_positions(&mut self.signal_context());
        self.segments[segment].objects_mut().add_bottleneck(object);
    }

    /// Places a variable message sign diverting traffic to a downstream exit.
    ///
    /// The exit is resolved by walking the sink links downstream until a
    /// segment with an exit lane is found, so those links must already exist.
    /// The sign starts switched off.
    ///
    /// # Parameters
    /// * `segment` - The segment carrying the sign
    /// * `pos` - The zone start position along the segment, in m
    /// * `length` - The zone length in m
    pub fn add_diversion(&mut self, segment: SegmentId, pos: f64, length: f64) {
        let mut object = VmsDiversion::new(segment, pos, length);
        object.create_signal_positions(&mut self.signal_context());
        self.segments[segment].objects_mut().add_diversion(object);
    }

    /// Adds a controller and the traffic lights it governs.
    ///
    /// Each light's look-ahead walks upstream through the already linked
    /// lanes, so the approach path of every stop line must be wired first.
    pub fn add_traffic_lights(&mut self, attributes: ControllerAttributes) {
        assert!(
            self.controllers.iter().all(|c| c.id() != attributes.id),
            "two traffic light controllers named {}",
            attributes.id
        );
        let mut lights = vec![];
        for light in &attributes.lights {
            let mut head =
                TrafficLight::new(&light.signal_type, light.segment, light.pos, light.lanes);
            head.place_points(&mut self.signal_context());
            let id = self.lights.insert(head);
            self.segments[light.segment].objects_mut().add_light(light.pos, id);
            lights.push((light.signal_type.clone(), id));
        }
        let controller = TrafficLightController::new(attributes.id, attributes.phases, lights);
        controller.push_states(&mut self.lights);
        self.controllers.push(controller);
    }

    fn signal_context(&mut self) -> SignalContext {
        SignalContext {
            segments: &mut self.segments,
            points: &mut self.signal_points,
        }
    }
}
