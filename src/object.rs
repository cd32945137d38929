//! Road objects: reactive point and zone effects attached to segments.

mod detector;

pub use detector::{DetectorRecord, LaneRecord, LoopDetector};

use crate::lane::LaneKind;
use crate::signal::SignalPoint;
use crate::util::{Interval, LaneMask};
use crate::{
    SegmentId, SegmentSet, SignalPointId, SignalPointSet, TrafficLightId, VehicleId, VehicleSet,
};
use itertools::Itertools;
use smallvec::SmallVec;

/// Tracked-vehicle sets are bounded in practice; growth past this signals a leak.
const TRACKED_SOFT_CAP: usize = 128;

fn warn_tracked_growth(kind: &str, len: usize) {
    if len == TRACKED_SOFT_CAP {
        log::warn!("a {kind} is tracking {len} vehicles; probable bookkeeping leak");
    }
}

/// The per-tick contract shared by the road object controllers.
pub(crate) trait RoadObjectController {
    /// Places the controller's signal points, once the network is assembled.
    fn create_signal_positions(&mut self, ctx: &mut SignalContext);

    /// Consumes the tick's crossings and updates affected vehicles.
    fn time_step(
        &mut self,
        dt: f64,
        sim_time: f64,
        iteration_count: usize,
        vehicles: &mut VehicleSet,
        points: &SignalPointSet,
    );
}

/// Lets controllers place signal points anywhere on the network.
pub(crate) struct SignalContext<'a> {
    pub segments: &'a mut SegmentSet,
    pub points: &'a mut SignalPointSet,
}

impl SignalContext<'_> {
    /// Places a signal point and registers it with its owning segment.
    pub fn place_point(&mut self, segment: SegmentId, pos: f64) -> SignalPointId {
        let length = self.segments[segment].length();
        assert!(
            (0.0..=length).contains(&pos),
            "signal point position {pos} outside segment of length {length}"
        );
        let id = self.points.insert(SignalPoint::new(segment, pos));
        self.segments[segment].register_signal_point(id);
        id
    }
}

/// The road objects attached to one segment, one position-ordered list per kind.
#[derive(Default)]
pub struct RoadObjects {
    speed_limits: Vec<SpeedLimit>,
    detectors: Vec<LoopDetector>,
    gradients: Vec<GradientProfile>,
    bottlenecks: Vec<FlowConservingBottleneck>,
    diversions: Vec<VmsDiversion>,
    lights: Vec<(f64, TrafficLightId)>,
}

/// Inserts an object into a position-ordered list.
///
/// Two objects of the same kind sharing a position on one segment is a
/// malformed scenario.
fn insert_by_pos<T>(objects: &mut Vec<T>, object: T, pos: impl Fn(&T) -> f64, kind: &str) {
    let p = pos(&object);
    let idx = objects.partition_point(|o| pos(o) < p);
    if objects.get(idx).map_or(false, |o| pos(o) == p) {
        panic!("two {kind} objects share position {p}");
    }
    objects.insert(idx, object);
}

impl RoadObjects {
    pub(crate) fn add_speed_limit(&mut self, object: SpeedLimit) {
        insert_by_pos(&mut self.speed_limits, object, |o| o.pos, "speed limit");
    }

    pub(crate) fn add_detector(&mut self, object: LoopDetector) {
        insert_by_pos(&mut self.detectors, object, |o| o.pos(), "loop detector");
    }

    pub(crate) fn add_gradient(&mut self, object: GradientProfile) {
        insert_by_pos(&mut self.gradients, object, |o| o.zone.min, "gradient profile");
    }

    pub(crate) fn add_bottleneck(&mut self, object: FlowConservingBottleneck) {
        insert_by_pos(&mut self.bottlenecks, object, |o| o.zone.min, "bottleneck");
    }

    pub(crate) fn add_diversion(&mut self, object: VmsDiversion) {
        insert_by_pos(&mut self.diversions, object, |o| o.zone.min, "diversion");
    }

    pub(crate) fn add_light(&mut self, pos: f64, id: TrafficLightId) {
        insert_by_pos(&mut self.lights, (pos, id), |o| o.0, "traffic light");
    }

    /// The loop detectors on the segment, in position order.
    pub fn detectors(&self) -> &[LoopDetector] {
        &self.detectors
    }

    /// The posted speed limits on the segment, in position order.
    pub fn speed_limits(&self) -> &[SpeedLimit] {
        &self.speed_limits
    }

    /// The diversion signs on the segment, in position order.
    pub fn diversions(&self) -> &[VmsDiversion] {
        &self.diversions
    }

    /// The gradient profiles on the segment, in position order.
    pub fn gradients(&self) -> &[GradientProfile] {
        &self.gradients
    }

    /// The bottlenecks on the segment, in position order.
    pub fn bottlenecks(&self) -> &[FlowConservingBottleneck] {
        &self.bottlenecks
    }

    /// The traffic lights on the segment, in position order.
    pub fn traffic_lights(&self) -> impl Iterator<Item = TrafficLightId> + '_ {
        self.lights.iter().map(|(_, id)| *id)
    }

    /// Steps every controller on the segment, consuming the tick's crossings.
    pub(crate) fn time_step(
        &mut self,
        dt: f64,
        sim_time: f64,
        iteration_count: usize,
        vehicles: &mut VehicleSet,
        points: &SignalPointSet,
    ) {
        for object in &mut self.speed_limits {
            object.time_step(dt, sim_time, iteration_count, vehicles, points);
        }
        for object in &mut self.detectors {
            object.time_step(dt, sim_time, iteration_count, vehicles, points);
        }
        for object in &mut self.gradients {
            object.time_step(dt, sim_time, iteration_count, vehicles, points);
        }
        for object in &mut self.bottlenecks {
            object.time_step(dt, sim_time, iteration_count, vehicles, points);
        }
        for object in &mut self.diversions {
            object.time_step(dt, sim_time, iteration_count, vehicles, points);
        }
    }

    /// Switches the diversion whose zone starts at `pos`.
    /// Returns `true` iff such a diversion exists.
    pub(crate) fn set_diversion_active(&mut self, pos: f64, active: bool) -> bool {
        for diversion in &mut self.diversions {
            if diversion.zone.min == pos {
                diversion.set_active(active);
                return true;
            }
        }
        false
    }
}

/// A posted speed limit, applied to vehicles as they pass the sign.
///
/// An infinite limit lifts any earlier restriction.
pub struct SpeedLimit {
    segment: SegmentId,
    pos: f64,
    limit: f64,
    lanes: LaneMask,
    point: SignalPointId,
}

impl SpeedLimit {
    pub(crate) fn new(segment: SegmentId, pos: f64, limit: f64, lanes: LaneMask) -> Self {
        assert!(limit > 0.0, "speed limit must be positive");
        Self {
            segment,
            pos,
            limit,
            lanes,
            point: SignalPointId::default(),
        }
    }

    /// The position of the sign along its segment, in m.
    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// The limit in m/s.
    pub fn limit(&self) -> f64 {
        self.limit
    }
}

impl RoadObjectController for SpeedLimit {
    fn create_signal_positions(&mut self, ctx: &mut SignalContext) {
        self.point = ctx.place_point(self.segment, self.pos);
    }

    fn time_step(
        &mut self,
        _dt: f64,
        _sim_time: f64,
        _iteration_count: usize,
        vehicles: &mut VehicleSet,
        points: &SignalPointSet,
    ) {
        for crossing in points[self.point].crossings() {
            if !self.lanes.contains(crossing.lane) {
                continue;
            }
            if let Some(vehicle) = vehicles.get_mut(crossing.vehicle) {
                vehicle.params_mut().speed_limit = self.limit;
            }
        }
    }
}

/// A gradient profile derived from a piecewise-linear elevation profile.
///
/// Vehicles between the first and last break points have their slope parameter
/// refreshed every tick from a step function of their position; it resets to
/// zero when they leave.
pub struct GradientProfile {
    segment: SegmentId,
    zone: Interval<f64>,
    /// Each entry maps positions from its break point up to the next onto a slope.
    gradients: Vec<(f64, f64)>,
    start_point: SignalPointId,
    end_point: SignalPointId,
    tracked: Vec<VehicleId>,
}

impl GradientProfile {
    pub(crate) fn new(segment: SegmentId, elevation: &[(f64, f64)]) -> Self {
        assert!(elevation.len() >= 2, "an elevation profile needs at least two points");
        assert!(
            elevation.iter().tuple_windows().all(|(a, b)| a.0 < b.0),
            "elevation profile positions must be strictly increasing"
        );
        let gradients = elevation
            .iter()
            .tuple_windows()
            .map(|((x0, z0), (x1, z1))| (*x0, (z1 - z0) / (x1 - x0)))
            .collect();
        let zone = Interval::new(elevation[0].0, elevation[elevation.len() - 1].0);
        Self {
            segment,
            zone,
            gradients,
            start_point: SignalPointId::default(),
            end_point: SignalPointId::default(),
            tracked: vec![],
        }
    }

    /// The position of the first break point along the segment, in m.
    pub fn pos(&self) -> f64 {
        self.zone.min
    }

    /// The slope at the given position, zero outside the profile.
    pub fn slope_at(&self, pos: f64) -> f64 {
        if !self.zone.contains(pos) {
            return 0.0;
        }
        match self.gradients.partition_point(|(x, _)| *x <= pos) {
            0 => 0.0,
            idx => self.gradients[idx - 1].1,
        }
    }
}

impl RoadObjectController for GradientProfile {
    fn create_signal_positions(&mut self, ctx: &mut SignalContext) {
        self.start_point = ctx.place_point(self.segment, self.zone.min);
        self.end_point = ctx.place_point(self.segment, self.zone.max);
    }

    fn time_step(
        &mut self,
        _dt: f64,
        _sim_time: f64,
        _iteration_count: usize,
        vehicles: &mut VehicleSet,
        points: &SignalPointSet,
    ) {
        for crossing in points[self.start_point].crossings() {
            if vehicles.contains_key(crossing.vehicle) {
                self.tracked.push(crossing.vehicle);
                warn_tracked_growth("gradient profile", self.tracked.len());
            }
        }
        for crossing in points[self.end_point].crossings() {
            self.tracked.retain(|id| *id != crossing.vehicle);
            if let Some(vehicle) = vehicles.get_mut(crossing.vehicle) {
                vehicle.params_mut().slope = 0.0;
            }
        }
        self.tracked.retain(|id| vehicles.contains_key(*id));
        for id in &self.tracked {
            let vehicle = &mut vehicles[*id];
            let slope = self.slope_at(vehicle.pos_rear());
            vehicle.params_mut().slope = slope;
        }
    }
}

/// The attributes of a flow-conserving bottleneck.
#[derive(Copy, Clone, Debug)]
pub struct BottleneckAttributes {
    /// The zone start position along the segment, in m.
    pub pos: f64,
    /// The zone length in m.
    pub length: f64,
    /// The distance over which parameters ramp to their target values, in m.
    pub adaptation_length: f64,
    /// The target headway multiplier.
    pub headway_factor: f64,
    /// The target desired-speed multiplier.
    pub speed_factor: f64,
}

/// A roadwork-style capacity restriction without an explicit obstacle.
///
/// Vehicles inside the zone have their headway and desired-speed multipliers
/// ramped linearly from neutral at the zone start to the target values one
/// adaptation length in; both reset to neutral on leaving.
pub struct FlowConservingBottleneck {
    segment: SegmentId,
    zone: Interval<f64>,
    adaptation_length: f64,
    headway: Interval<f64>,
    speed: Interval<f64>,
    start_point: SignalPointId,
    end_point: SignalPointId,
    tracked: Vec<VehicleId>,
}

impl FlowConservingBottleneck {
    pub(crate) fn new(segment: SegmentId, attributes: &BottleneckAttributes) -> Self {
        assert!(attributes.length > 0.0, "bottleneck zone length must be positive");
        assert!(attributes.adaptation_length > 0.0, "adaptation length must be positive");
        Self {
            segment,
            zone: Interval::new(attributes.pos, attributes.pos + attributes.length),
            adaptation_length: attributes.adaptation_length,
            headway: Interval::new(1.0, attributes.headway_factor),
            speed: Interval::new(1.0, attributes.speed_factor),
            start_point: SignalPointId::default(),
            end_point: SignalPointId::default(),
            tracked: vec![],
        }
    }

    /// The position of the zone start along the segment, in m.
    pub fn pos(&self) -> f64 {
        self.zone.min
    }
}

impl RoadObjectController for FlowConservingBottleneck {
    fn create_signal_positions(&mut self, ctx: &mut SignalContext) {
        self.start_point = ctx.place_point(self.segment, self.zone.min);
        self.end_point = ctx.place_point(self.segment, self.zone.max);
    }

    fn time_step(
        &mut self,
        _dt: f64,
        _sim_time: f64,
        _iteration_count: usize,
        vehicles: &mut VehicleSet,
        points: &SignalPointSet,
    ) {
        for crossing in points[self.start_point].crossings() {
            if vehicles.contains_key(crossing.vehicle) {
                self.tracked.push(crossing.vehicle);
                warn_tracked_growth("bottleneck", self.tracked.len());
            }
        }
        for crossing in points[self.end_point].crossings() {
            self.tracked.retain(|id| *id != crossing.vehicle);
            if let Some(vehicle) = vehicles.get_mut(crossing.vehicle) {
                let params = vehicle.params_mut();
                params.headway_factor = 1.0;
                params.speed_factor = 1.0;
            }
        }
        self.tracked.retain(|id| vehicles.contains_key(*id));
        for id in &self.tracked {
            let vehicle = &mut vehicles[*id];
            let t = ((vehicle.pos_rear() - self.zone.min) / self.adaptation_length).clamp(0.0, 1.0);
            let headway = self.headway.lerp(t);
            let speed = self.speed.lerp(t);
            let params = vehicle.params_mut();
            params.headway_factor = headway;
            params.speed_factor = speed;
        }
    }
}

/// A variable message sign diverting traffic towards a downstream exit.
///
/// While the sign is lit, vehicles outside the innermost lane are marked with
/// the exit segment as they enter the zone; the marking clears on leaving the
/// zone or when the sign is switched off.
pub struct VmsDiversion {
    segment: SegmentId,
    zone: Interval<f64>,
    exit_segment: SegmentId,
    active: bool,
    start_point: SignalPointId,
    end_point: SignalPointId,
    marked: Vec<VehicleId>,
}

impl VmsDiversion {
    pub(crate) fn new(segment: SegmentId, pos: f64, length: f64) -> Self {
        assert!(length > 0.0, "diversion zone length must be positive");
        Self {
            segment,
            zone: Interval::new(pos, pos + length),
            exit_segment: SegmentId::default(),
            active: false,
            start_point: SignalPointId::default(),
            end_point: SignalPointId::default(),
            marked: vec![],
        }
    }

    /// The position of the zone start along the segment, in m.
    pub fn pos(&self) -> f64 {
        self.zone.min
    }

    /// The segment carrying the exit the sign diverts onto.
    pub fn exit_segment(&self) -> SegmentId {
        self.exit_segment
    }

    /// Whether the sign is lit.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Finds the first segment at or downstream of the sign with an exit lane.
    ///
    /// The walk panics on networks where the downstream path is ambiguous or
    /// never reaches an exit lane.
    fn resolve_exit(&self, segments: &SegmentSet) -> SegmentId {
        let mut visited: SmallVec<[SegmentId; 8]> = SmallVec::new();
        let mut current = self.segment;
        loop {
            if segments[current].lanes().any(|lane| lane.kind() == LaneKind::Exit) {
                return current;
            }
            visited.push(current);
            let mut next = None;
            for lane in segments[current].lanes() {
                if let Some(link) = lane.sink() {
                    match next {
                        None => next = Some(link.segment),
                        Some(seg) if seg == link.segment => {}
                        Some(_) => panic!("ambiguous downstream path for a diversion"),
                    }
                }
            }
            let next = match next {
                Some(next) => next,
                None => panic!("no exit lane downstream of a diversion"),
            };
            if visited.contains(&next) {
                panic!("no exit lane downstream of a diversion");
            }
            current = next;
        }
    }
}

impl RoadObjectController for VmsDiversion {
    fn create_signal_positions(&mut self, ctx: &mut SignalContext) {
        self.exit_segment = self.resolve_exit(ctx.segments);
        self.start_point = ctx.place_point(self.segment, self.zone.min);
        self.end_point = ctx.place_point(self.segment, self.zone.max);
    }

    fn time_step(
        &mut self,
        _dt: f64,
        _sim_time: f64,
        _iteration_count: usize,
        vehicles: &mut VehicleSet,
        points: &SignalPointSet,
    ) {
        if self.active {
            for crossing in points[self.start_point].crossings() {
                // The innermost lane passes the exit anyway.
                if crossing.lane == 1 {
                    continue;
                }
                if let Some(vehicle) = vehicles.get_mut(crossing.vehicle) {
                    vehicle.set_exit_segment(Some(self.exit_segment));
                    self.marked.push(crossing.vehicle);
                    warn_tracked_growth("diversion", self.marked.len());
                }
            }
        } else {
            for id in self.marked.drain(..) {
                if let Some(vehicle) = vehicles.get_mut(id) {
                    vehicle.set_exit_segment(None);
                }
            }
        }
        for crossing in points[self.end_point].crossings() {
            if let Some(idx) = self.marked.iter().position(|id| *id == crossing.vehicle) {
                self.marked.swap_remove(idx);
                if let Some(vehicle) = vehicles.get_mut(crossing.vehicle) {
                    vehicle.set_exit_segment(None);
                }
            }
        }
        self.marked.retain(|id| vehicles.contains_key(*id));
    }
}
