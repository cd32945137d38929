//! The road network and its global step driver.

mod objects;
mod topology;

use crate::lane::LaneKind;
use crate::light::{TrafficLight, TrafficLightController};
use crate::model::{LaneChangeDecision, TrafficSource};
use crate::segment::RoadSegment;
use crate::signal::SignalPoint;
use crate::vehicle::{Vehicle, VehicleAttributes, VehicleView};
use crate::{
    LightSet, SegmentId, SegmentSet, SignalPointId, SignalPointSet, TrafficLightId, VehicleId,
    VehicleSet,
};

/// A simulation of vehicles on a network of linked road segments.
///
/// A tick advances in five strictly ordered phases, each completing for every
/// segment before the next begins: lane changes, acceleration requests,
/// integration, outflow over downstream boundaries, and inflow from traffic
/// sources. Road objects and traffic lights then consume the tick's signal
/// point crossings.
#[derive(Default)]
pub struct RoadNetwork {
    /// The road segments.
    segments: SegmentSet,
    /// The vehicles on the network.
    vehicles: VehicleSet,
    /// The signal points placed by road objects.
    signal_points: SignalPointSet,
    /// The traffic lights.
    lights: LightSet,
    /// The traffic light controllers.
    controllers: Vec<TrafficLightController>,
    /// The traffic sources, each feeding one segment.
    sources: Vec<(SegmentId, Box<dyn TrafficSource>)>,
    /// The number of vehicles ever admitted.
    entered: u64,
    /// The number of vehicles ever removed.
    exited: u64,
}

/// A read-only view of the network, handed to lane-change models and observers.
pub struct NetworkView<'a> {
    segments: &'a SegmentSet,
    vehicles: &'a VehicleSet,
}

impl NetworkView<'_> {
    /// Gets the segment with the given ID.
    pub fn segment(&self, id: SegmentId) -> &RoadSegment {
        &self.segments[id]
    }

    /// Finds the first vehicle strictly ahead of `pos` on the given lane,
    /// searching downstream across linked segments.
    pub fn front_vehicle(&self, segment: SegmentId, lane: usize, pos: f64) -> Option<VehicleView> {
        self.segments[segment].front_vehicle(self.segments, self.vehicles, lane, pos)
    }

    /// Finds the vehicle at or behind `pos` on the given lane, searching
    /// upstream across linked segments.
    pub fn rear_vehicle(&self, segment: SegmentId, lane: usize, pos: f64) -> Option<VehicleView> {
        self.segments[segment].rear_vehicle(self.segments, self.vehicles, lane, pos)
    }
}

/// Write access to one segment's upstream end, handed to traffic sources.
pub struct SegmentEntry<'a> {
    net: &'a mut RoadNetwork,
    segment: SegmentId,
}

impl SegmentEntry<'_> {
    /// The segment vehicles are admitted onto.
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// The length of the segment in m.
    pub fn length(&self) -> f64 {
        self.net.segments[self.segment].length()
    }

    /// The number of lanes.
    pub fn lane_count(&self) -> usize {
        self.net.segments[self.segment].lane_count()
    }

    /// The kind of the given lane.
    pub fn lane_kind(&self, lane: usize) -> LaneKind {
        self.net.segments[self.segment].lane(lane).kind()
    }

    /// The rear-most vehicle on the given lane, if any.
    ///
    /// Sources use this to respect the gap at the entry point.
    pub fn rear_vehicle(&self, lane: usize) -> Option<VehicleView> {
        let segment = &self.net.segments[self.segment];
        segment.lane(lane).rear().map(|id| self.net.vehicles[id].view())
    }

    /// Admits a vehicle at the upstream end of the given lane.
    pub fn spawn(&mut self, lane: usize, attributes: VehicleAttributes) -> VehicleId {
        self.net.add_vehicle(self.segment, lane, attributes)
    }
}

impl RoadNetwork {
    /// Creates an empty road network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the simulation by one tick.
    ///
    /// # Parameters
    /// * `dt` - The time step in seconds
    /// * `sim_time` - The simulation time at the start of the tick, in seconds
    /// * `iteration_count` - The number of completed ticks
    pub fn time_step(&mut self, dt: f64, sim_time: f64, iteration_count: usize) {
        assert!(dt > 0.0, "time step must be positive");
        self.do_lane_changes();
        self.do_accelerations();
        self.do_integration(dt);
        self.do_outflow();
        self.do_inflow(dt, sim_time, iteration_count);
        self.update_road_objects(dt, sim_time, iteration_count);
        self.update_traffic_lights(dt);
        debug_assert!(self.each_lane_is_sorted(), "lane order broken during a tick");
    }

    /// Applies each vehicle's lane-change decision as a pure lateral move.
    fn do_lane_changes(&mut self) {
        let mut moves: Vec<(VehicleId, SegmentId, usize, usize)> = vec![];
        let view = NetworkView {
            segments: &self.segments,
            vehicles: &self.vehicles,
        };
        for (seg_id, segment) in &self.segments {
            for (idx, lane) in segment.lanes().enumerate() {
                let lane_no = idx + 1;
                for vehicle_id in lane.vehicles() {
                    let vehicle = &self.vehicles[vehicle_id];
                    let target = match vehicle.decide_lane_change(segment, &view) {
                        LaneChangeDecision::Left => lane_no - 1,
                        LaneChangeDecision::Right => lane_no + 1,
                        LaneChangeDecision::Stay => continue,
                    };
                    if target < 1 || target > segment.lane_count() {
                        log::debug!("lane change off the road ignored on lane {lane_no}");
                        continue;
                    }
                    moves.push((vehicle_id, seg_id, lane_no, target));
                }
            }
        }
        for (vehicle_id, seg_id, from, to) in moves {
            self.vehicles[vehicle_id].set_lane(to);
            self.segments[seg_id].change_lane(&self.vehicles, vehicle_id, from, to);
        }
    }

    /// Asks the car-following model of every vehicle for an acceleration.
    fn do_accelerations(&mut self) {
        for (_, segment) in &self.segments {
            segment.apply_accelerations(&self.segments, &self.vehicles);
        }
    }

    /// Integrates every vehicle and records signal point crossings.
    fn do_integration(&mut self, dt: f64) {
        let Self {
            segments,
            vehicles,
            signal_points,
            ..
        } = self;
        for (_, segment) in &*segments {
            segment.integrate(dt, vehicles, signal_points);
        }
    }

    /// Carries vehicles past each segment's downstream end onto its sink.
    ///
    /// A transfer removes the vehicle from the source lane and appends it to
    /// the sink lane in one step, rebasing its position by the source length;
    /// with no sink the vehicle leaves the network.
    fn do_outflow(&mut self) {
        let Self {
            segments,
            vehicles,
            signal_points,
            exited,
            ..
        } = self;
        let ids: Vec<SegmentId> = segments.keys().collect();
        for src_id in ids {
            for lane_no in 1..=segments[src_id].lane_count() {
                loop {
                    let src = &segments[src_id];
                    let front = match src.lane(lane_no).front() {
                        Some(front) => front,
                        None => break,
                    };
                    if vehicles[front].pos_rear() <= src.length() {
                        break;
                    }
                    let length = src.length();
                    match src.lane(lane_no).sink() {
                        None => {
                            segments[src_id].lane_mut(lane_no).pop_front_vehicle();
                            vehicles.remove(front);
                            *exited += 1;
                        }
                        Some(link) if link.segment == src_id => {
                            segments[src_id].lane_mut(lane_no).pop_front_vehicle();
                            vehicles[front].transfer(link.segment, link.lane, length);
                            let segment = &mut segments[src_id];
                            if segment.lane(link.lane).kind() == LaneKind::Entrance {
                                log::warn!("vehicle carried onto an entrance lane at a segment boundary");
                            }
                            segment.append_vehicle(vehicles, link.lane, front);
                            segment.check_entry_crossings(vehicles, signal_points, front);
                        }
                        Some(link) => {
                            segments[src_id].lane_mut(lane_no).pop_front_vehicle();
                            vehicles[front].transfer(link.segment, link.lane, length);
                            match segments.get_disjoint_mut([src_id, link.segment]) {
                                Some([_, sink]) => {
                                    if sink.lane(link.lane).kind() == LaneKind::Entrance {
                                        log::warn!(
                                            "vehicle carried onto an entrance lane at a segment boundary"
                                        );
                                    }
                                    sink.append_vehicle(vehicles, link.lane, front);
                                    sink.check_entry_crossings(vehicles, signal_points, front);
                                }
                                None => panic!("outflow into a missing segment"),
                            }
                        }
                    }
                }
            }
        }
    }

    /// Lets each traffic source admit vehicles at its segment's upstream end.
    fn do_inflow(&mut self, dt: f64, sim_time: f64, iteration_count: usize) {
        let mut sources = std::mem::take(&mut self.sources);
        for (segment, source) in &mut sources {
            let mut entry = SegmentEntry {
                net: self,
                segment: *segment,
            };
            source.time_step(dt, sim_time, iteration_count, &mut entry);
        }
        self.sources = sources;
    }

    /// Steps every road object controller, consuming the tick's crossings.
    fn update_road_objects(&mut self, dt: f64, sim_time: f64, iteration_count: usize) {
        let Self {
            segments,
            vehicles,
            signal_points,
            ..
        } = self;
        for (_, segment) in &mut *segments {
            segment
                .objects_mut()
                .time_step(dt, sim_time, iteration_count, vehicles, signal_points);
        }
    }

    /// Refreshes the lights' approach caches, steps their controllers, and
    /// rebuilds every vehicle's approaching-light mark from the resulting
    /// statuses.
    fn update_traffic_lights(&mut self, dt: f64) {
        let Self {
            vehicles,
            signal_points,
            lights,
            controllers,
            ..
        } = self;
        for (_, light) in &mut *lights {
            light.time_step(vehicles, signal_points);
        }
        for controller in controllers.iter_mut() {
            controller.time_step(dt, lights);
        }
        for (_, vehicle) in &mut *vehicles {
            vehicle.params_mut().light = None;
        }
        for (_, light) in &*lights {
            light.apply_marks(vehicles);
        }
    }

    /// Adds a vehicle to the network.
    ///
    /// # Parameters
    /// * `segment` - The segment the vehicle starts on
    /// * `lane` - The 1-based lane index
    /// * `attributes` - The vehicle's attributes
    pub fn add_vehicle(
        &mut self,
        segment: SegmentId,
        lane: usize,
        attributes: VehicleAttributes,
    ) -> VehicleId {
        {
            let seg = &self.segments[segment];
            assert!(
                (1..=seg.lane_count()).contains(&lane),
                "lane index {} out of range 1..={}",
                lane,
                seg.lane_count()
            );
            assert!(
                (0.0..=seg.length()).contains(&attributes.pos),
                "vehicle position {} outside segment of length {}",
                attributes.pos,
                seg.length()
            );
            assert!(attributes.length > 0.0, "vehicle length must be positive");
            assert!(attributes.vel >= 0.0, "vehicle velocity must not be negative");
        }
        let Self {
            segments, vehicles, ..
        } = self;
        let id = vehicles.insert_with_key(|id| Vehicle::new(id, segment, lane, attributes));
        segments[segment].add_vehicle(vehicles, lane, id);
        self.entered += 1;
        id
    }

    /// Removes a vehicle from the network.
    pub fn remove_vehicle(&mut self, id: VehicleId) {
        let vehicle = match self.vehicles.remove(id) {
            Some(vehicle) => vehicle,
            None => panic!("removed a vehicle that is not on the network"),
        };
        let removed = self.segments[vehicle.segment()]
            .lane_mut(vehicle.lane())
            .remove_vehicle(id);
        debug_assert!(removed, "vehicle missing from its lane");
        if !removed {
            log::error!(
                "removed vehicle was missing from lane {} of its segment",
                vehicle.lane()
            );
        }
        self.exited += 1;
    }

    /// Adds a traffic source feeding the given segment.
    pub fn add_traffic_source(&mut self, segment: SegmentId, source: Box<dyn TrafficSource>) {
        assert!(
            self.segments.contains_key(segment),
            "traffic source on a missing segment"
        );
        self.sources.push((segment, source));
    }

    /// Advances the named controller to its next phase.
    pub fn force_phase_change(&mut self, controller_id: &str) {
        let Self {
            lights, controllers, ..
        } = self;
        match controllers.iter_mut().find(|c| c.id() == controller_id) {
            Some(controller) => controller.advance(lights),
            None => panic!("no traffic light controller named {controller_id}"),
        }
    }

    /// Switches the diversion whose zone starts at `pos` on the given segment.
    pub fn set_diversion_active(&mut self, segment: SegmentId, pos: f64, active: bool) {
        let found = self.segments[segment]
            .objects_mut()
            .set_diversion_active(pos, active);
        assert!(found, "no diversion starting at position {pos} on the segment");
    }

    /// Gets the segment with the given ID.
    pub fn segment(&self, id: SegmentId) -> &RoadSegment {
        &self.segments[id]
    }

    /// Returns an iterator over the IDs of all segments.
    pub fn segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.segments.keys()
    }

    /// Finds a segment by its external identifier.
    pub fn find_segment(&self, user_id: &str) -> Option<SegmentId> {
        self.segments
            .iter()
            .find(|(_, segment)| segment.user_id() == Some(user_id))
            .map(|(id, _)| id)
    }

    /// Gets a vehicle by ID, if it is still on the network.
    pub fn vehicle(&self, id: VehicleId) -> Option<&Vehicle> {
        self.vehicles.get(id)
    }

    /// Returns an iterator over all vehicles on the network.
    pub fn vehicles(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.values()
    }

    /// The number of vehicles currently on the network.
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// The number of vehicles ever admitted.
    pub fn entered_count(&self) -> u64 {
        self.entered
    }

    /// The number of vehicles ever removed.
    pub fn exited_count(&self) -> u64 {
        self.exited
    }

    /// Gets a signal point by ID.
    pub fn signal_point(&self, id: SignalPointId) -> &SignalPoint {
        &self.signal_points[id]
    }

    /// Gets a traffic light by ID.
    pub fn traffic_light(&self, id: TrafficLightId) -> &TrafficLight {
        &self.lights[id]
    }

    /// The traffic light controllers.
    pub fn controllers(&self) -> &[TrafficLightController] {
        &self.controllers
    }

    /// Finds the first vehicle strictly ahead of `pos` on the given lane,
    /// searching downstream across linked segments.
    pub fn front_vehicle(&self, segment: SegmentId, lane: usize, pos: f64) -> Option<VehicleView> {
        self.segments[segment].front_vehicle(&self.segments, &self.vehicles, lane, pos)
    }

    /// Finds the vehicle at or behind `pos` on the given lane, searching
    /// upstream across linked segments.
    pub fn rear_vehicle(&self, segment: SegmentId, lane: usize, pos: f64) -> Option<VehicleView> {
        self.segments[segment].rear_vehicle(&self.segments, &self.vehicles, lane, pos)
    }

    /// Gets a read-only view of the network.
    pub fn view(&self) -> NetworkView {
        NetworkView {
            segments: &self.segments,
            vehicles: &self.vehicles,
        }
    }

    /// Returns true if every lane of every segment is correctly ordered.
    pub fn each_lane_is_sorted(&self) -> bool {
        self.segments
            .iter()
            .all(|(_, segment)| segment.each_lane_is_sorted(&self.vehicles))
    }
}
