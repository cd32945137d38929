use crate::lane::{LaneKind, LaneSegment};
use crate::object::RoadObjects;
use crate::signal::CrossedVehicle;
use crate::util::MAX_LANES;
use crate::vehicle::VehicleView;
use crate::{SegmentId, SegmentSet, SignalPointId, SignalPointSet, VehicleId, VehicleSet};

/// The maximum distance spatial queries search across segment boundaries, in m.
const MAX_QUERY_DISTANCE: f64 = 1000.0;

/// A unidirectional stretch of road with a fixed length and lane count.
pub struct RoadSegment {
    /// The segment's ID.
    id: SegmentId,
    /// An external identifier from the scenario description.
    user_id: Option<String>,
    /// The length of the segment in m.
    length: f64,
    /// The lanes of the segment, innermost lane first.
    lanes: Vec<LaneSegment>,
    /// The road objects attached to the segment.
    objects: RoadObjects,
    /// The signal points on the segment.
    signal_points: Vec<SignalPointId>,
}

/// The attributes of a road segment.
pub struct SegmentAttributes<'a> {
    /// The length of the segment in m.
    pub length: f64,
    /// The kind of each lane, innermost lane first.
    pub lanes: &'a [LaneKind],
    /// An optional external identifier.
    pub user_id: Option<&'a str>,
}

impl RoadSegment {
    /// Creates a new road segment.
    pub(crate) fn new(id: SegmentId, attributes: &SegmentAttributes) -> Self {
        assert!(attributes.length > 0.0, "segment length must be positive");
        let lane_count = attributes.lanes.len();
        assert!(
            (1..=MAX_LANES).contains(&lane_count),
            "segment must have 1..={} lanes",
            MAX_LANES
        );
        Self {
            id,
            user_id: attributes.user_id.map(str::to_owned),
            length: attributes.length,
            lanes: attributes.lanes.iter().map(|kind| LaneSegment::new(*kind)).collect(),
            objects: RoadObjects::default(),
            signal_points: vec![],
        }
    }

    /// Gets the segment's ID.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Gets the segment's external identifier, if it has one.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Gets the length of the segment in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// Gets the number of lanes.
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Gets the lane with the given 1-based index.
    pub fn lane(&self, lane: usize) -> &LaneSegment {
        &self.lanes[self.index(lane)]
    }

    pub(crate) fn lane_mut(&mut self, lane: usize) -> &mut LaneSegment {
        let idx = self.index(lane);
        &mut self.lanes[idx]
    }

    fn index(&self, lane: usize) -> usize {
        assert!(
            (1..=self.lanes.len()).contains(&lane),
            "lane index {} out of range 1..={}",
            lane,
            self.lanes.len()
        );
        lane - 1
    }

    /// Returns an iterator over the segment's lanes, innermost first.
    pub fn lanes(&self) -> impl Iterator<Item = &LaneSegment> {
        self.lanes.iter()
    }

    /// The road objects attached to the segment.
    pub fn objects(&self) -> &RoadObjects {
        &self.objects
    }

    pub(crate) fn objects_mut(&mut self) -> &mut RoadObjects {
        &mut self.objects
    }

    /// The signal points on the segment.
    pub fn signal_points(&self) -> &[SignalPointId] {
        &self.signal_points
    }

    pub(crate) fn register_signal_point(&mut self, id: SignalPointId) {
        self.signal_points.push(id);
    }

    /// Finds the first vehicle strictly ahead of `pos` on the given lane.
    ///
    /// When the lane holds no vehicle ahead, the query follows the sink chain
    /// and returns the first vehicle found as a position-shifted snapshot,
    /// searching up to a fixed distance downstream.
    pub(crate) fn front_vehicle(
        &self,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
        lane: usize,
        pos: f64,
    ) -> Option<VehicleView> {
        let lane_seg = self.lane(lane);
        let ahead = lane_seg.count_ahead_of(vehicles, pos);
        if ahead > 0 {
            let id = lane_seg.get(ahead - 1)?;
            return Some(vehicles[id].view());
        }
        let link = lane_seg.sink()?;
        let budget = MAX_QUERY_DISTANCE - (self.length - pos);
        if budget <= 0.0 {
            return None;
        }
        segments[link.segment]
            .rearmost_within(segments, vehicles, link.lane, budget)
            .map(|view| view.shifted(self.length))
    }

    /// Finds the rear-most vehicle on the lane, following empty sinks downstream.
    fn rearmost_within(
        &self,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
        lane: usize,
        budget: f64,
    ) -> Option<VehicleView> {
        if let Some(id) = self.lane(lane).rear() {
            return Some(vehicles[id].view());
        }
        let link = self.lane(lane).sink()?;
        let budget = budget - self.length;
        if budget <= 0.0 {
            return None;
        }
        segments[link.segment]
            .rearmost_within(segments, vehicles, link.lane, budget)
            .map(|view| view.shifted(self.length))
    }

    /// Finds the vehicle at or behind `pos` on the given lane.
    ///
    /// When the lane holds no such vehicle, the query follows the source chain
    /// upstream, returning a position-shifted snapshot.
    pub(crate) fn rear_vehicle(
        &self,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
        lane: usize,
        pos: f64,
    ) -> Option<VehicleView> {
        let lane_seg = self.lane(lane);
        let ahead = lane_seg.count_ahead_of(vehicles, pos);
        if let Some(id) = lane_seg.get(ahead) {
            return Some(vehicles[id].view());
        }
        let link = lane_seg.source()?;
        let budget = MAX_QUERY_DISTANCE - pos;
        if budget <= 0.0 {
            return None;
        }
        let source = &segments[link.segment];
        let source_length = source.length;
        source
            .frontmost_within(segments, vehicles, link.lane, budget)
            .map(|view| view.shifted(-source_length))
    }

    /// Finds the front-most vehicle on the lane, following empty sources upstream.
    fn frontmost_within(
        &self,
        segments: &SegmentSet,
        vehicles: &VehicleSet,
        lane: usize,
        budget: f64,
    ) -> Option<VehicleView> {
        if let Some(id) = self.lane(lane).front() {
            return Some(vehicles[id].view());
        }
        let link = self.lane(lane).source()?;
        let budget = budget - self.length;
        if budget <= 0.0 {
            return None;
        }
        let source = &segments[link.segment];
        let source_length = source.length;
        source
            .frontmost_within(segments, vehicles, link.lane, budget)
            .map(|view| view.shifted(-source_length))
    }

    /// Inserts a vehicle preserving the lane's sort order.
    pub(crate) fn add_vehicle(&mut self, vehicles: &VehicleSet, lane: usize, id: VehicleId) {
        self.lane_mut(lane).add_vehicle(vehicles, id);
    }

    /// Appends a vehicle known to be the lane's new rear-most.
    pub(crate) fn append_vehicle(&mut self, vehicles: &VehicleSet, lane: usize, id: VehicleId) {
        self.lane_mut(lane).append_vehicle(vehicles, id);
    }

    /// Moves a vehicle between two lanes at its current longitudinal position.
    pub(crate) fn change_lane(&mut self, vehicles: &VehicleSet, id: VehicleId, from: usize, to: usize) {
        let removed = self.lane_mut(from).remove_vehicle(id);
        if !removed {
            debug_assert!(false, "lane change for a vehicle missing from lane {from}");
            log::error!("lane change for a vehicle missing from lane {from}; skipped");
            return;
        }
        self.lane_mut(to).add_vehicle(vehicles, id);
    }

    /// Requests an acceleration for every vehicle on the segment.
    ///
    /// Within a lane the leader is simply the previous vehicle in the
    /// container; only the front-of-lane vehicle pays a cross-segment query.
    pub(crate) fn apply_accelerations(&self, segments: &SegmentSet, vehicles: &VehicleSet) {
        for (idx, lane) in self.lanes.iter().enumerate() {
            let mut leader: Option<VehicleId> = None;
            for id in lane.vehicles() {
                let vehicle = &vehicles[id];
                let view = match leader {
                    Some(ahead) => Some(vehicles[ahead].view()),
                    None => self.front_vehicle(segments, vehicles, idx + 1, vehicle.pos_rear()),
                };
                vehicle.apply_following(view.as_ref());
                leader = Some(id);
            }
        }
    }

    /// Integrates every vehicle on the segment, then records signal point crossings.
    pub(crate) fn integrate(&self, dt: f64, vehicles: &mut VehicleSet, points: &mut SignalPointSet) {
        for id in &self.signal_points {
            points[*id].clear();
        }
        for lane in &self.lanes {
            for id in lane.vehicles() {
                vehicles[id].integrate(dt);
            }
            debug_assert!(lane.is_sorted(vehicles), "lane order broken during integration");
        }
        if !self.signal_points.is_empty() {
            self.scan_crossings(vehicles, points);
        }
    }

    /// Records every vehicle whose position moved over a signal point this tick.
    fn scan_crossings(&self, vehicles: &VehicleSet, points: &mut SignalPointSet) {
        for pid in &self.signal_points {
            let point = &mut points[*pid];
            for (idx, lane) in self.lanes.iter().enumerate() {
                for (i, id) in lane.vehicles().enumerate() {
                    let vehicle = &vehicles[id];
                    if point.crossed_by(vehicle.pos_old(), vehicle.pos_rear()) {
                        let time_gap = lane.get(i + 1).and_then(|follower| {
                            let follower = &vehicles[follower];
                            let gap = vehicle.pos_rear() - follower.pos_front();
                            (follower.vel() > 0.0).then(|| gap / follower.vel())
                        });
                        point.record(CrossedVehicle {
                            vehicle: id,
                            lane: idx + 1,
                            vel: vehicle.vel(),
                            length: vehicle.length(),
                            time_gap,
                        });
                    }
                }
            }
        }
    }

    /// Records crossings for a vehicle that entered this segment mid-tick.
    ///
    /// A transfer rebases both position fields, so a signal point near the
    /// upstream end still sees the transition it would otherwise miss.
    pub(crate) fn check_entry_crossings(
        &self,
        vehicles: &VehicleSet,
        points: &mut SignalPointSet,
        id: VehicleId,
    ) {
        let vehicle = &vehicles[id];
        for pid in &self.signal_points {
            let point = &mut points[*pid];
            if point.crossed_by(vehicle.pos_old(), vehicle.pos_rear()) {
                point.record(CrossedVehicle {
                    vehicle: id,
                    lane: vehicle.lane(),
                    vel: vehicle.vel(),
                    length: vehicle.length(),
                    time_gap: None,
                });
            }
        }
    }

    /// Returns true if every lane's vehicles are in strictly decreasing position order.
    pub(crate) fn each_lane_is_sorted(&self, vehicles: &VehicleSet) -> bool {
        self.lanes.iter().all(|lane| lane.is_sorted(vehicles))
    }

    /// Gets the kind of every lane, for join compatibility checks.
    pub(crate) fn lane_kinds(&self) -> Vec<LaneKind> {
        self.lanes.iter().map(|lane| lane.kind()).collect()
    }
}
