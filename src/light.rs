//! Traffic lights and their phase controllers.

use crate::lane::LaneKind;
use crate::object::SignalContext;
use crate::util::LaneMask;
use crate::vehicle::ApproachingLight;
use crate::{
    LightSet, SegmentId, SegmentSet, SignalPointId, SignalPointSet, TrafficLightId, VehicleId,
    VehicleSet,
};
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The maximum distance upstream of the stop line that a light watches, in m.
const MAX_LOOK_DISTANCE: f64 = 1000.0;

/// Vehicles slower than this are considered stopped, in m/s.
const STOPPED_SPEED: f64 = 0.1;

/// The displayed status of a traffic light.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LightStatus {
    Red,
    Amber,
    Green,
}

/// A single traffic light head governing some lanes at one stop line.
///
/// The light watches the road from a look point up to [MAX_LOOK_DISTANCE]
/// upstream of the stop line, possibly on earlier segments, and keeps a cache
/// of the vehicles between the two points for its controller's conditions.
pub struct TrafficLight {
    /// The name of the light within its controller.
    signal_type: String,
    /// The segment carrying the stop line.
    segment: SegmentId,
    /// The stop line position along the segment, in m.
    pos: f64,
    /// The lanes the light governs.
    lanes: LaneMask,
    /// The displayed status.
    status: LightStatus,
    /// The signal point where approaching vehicles are first noticed.
    look_point: SignalPointId,
    /// The signal point on the stop line.
    light_point: SignalPointId,
    /// The segments between the look point and the stop line, each with the
    /// distance from its own start to the stop line.
    chain: SmallVec<[(SegmentId, f64); 4]>,
    /// The vehicles currently approaching the light.
    approach: Vec<Approach>,
}

/// A vehicle known to be approaching a light.
#[derive(Copy, Clone, Debug)]
struct Approach {
    vehicle: VehicleId,
    /// The distance from the vehicle's front bumper to the stop line, in m.
    distance: f64,
    vel: f64,
}

/// Finds the segment feeding the given one, through its first linked traffic lane.
fn upstream_of(segments: &SegmentSet, segment: SegmentId) -> Option<SegmentId> {
    segments[segment]
        .lanes()
        .filter(|lane| lane.kind() == LaneKind::Traffic)
        .find_map(|lane| lane.source())
        .map(|link| link.segment)
}

impl TrafficLight {
    pub(crate) fn new(signal_type: &str, segment: SegmentId, pos: f64, lanes: LaneMask) -> Self {
        Self {
            signal_type: signal_type.to_owned(),
            segment,
            pos,
            lanes,
            status: LightStatus::Red,
            look_point: SignalPointId::default(),
            light_point: SignalPointId::default(),
            chain: SmallVec::new(),
            approach: vec![],
        }
    }

    /// The name of the light within its controller.
    pub fn signal_type(&self) -> &str {
        &self.signal_type
    }

    /// The segment carrying the stop line.
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    /// The stop line position along the segment, in m.
    pub fn pos(&self) -> f64 {
        self.pos
    }

    /// The displayed status.
    pub fn status(&self) -> LightStatus {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: LightStatus) {
        self.status = status;
    }

    /// Places the stop line and look-ahead signal points.
    ///
    /// The look point is found by walking upstream through linked traffic
    /// lanes; when the road ends or loops back before the full look-ahead
    /// distance, the look point is clamped to the start of the last segment.
    pub(crate) fn place_points(&mut self, ctx: &mut SignalContext) {
        self.light_point = ctx.place_point(self.segment, self.pos);
        let mut current = self.segment;
        let mut start_to_light = self.pos;
        self.chain.push((current, start_to_light));
        loop {
            if start_to_light >= MAX_LOOK_DISTANCE {
                self.look_point = ctx.place_point(current, start_to_light - MAX_LOOK_DISTANCE);
                return;
            }
            let next = match upstream_of(ctx.segments, current) {
                Some(next) if !self.chain.iter().any(|(seg, _)| *seg == next) => next,
                _ => break,
            };
            start_to_light += ctx.segments[next].length();
            current = next;
            self.chain.push((current, start_to_light));
        }
        log::warn!(
            "traffic light look-ahead truncated at {start_to_light:.0} m; no further upstream segment"
        );
        self.look_point = ctx.place_point(current, 0.0);
    }

    /// The distance from the start of the given segment to the stop line,
    /// if the segment lies on the approach path.
    fn start_to_light(&self, segment: SegmentId) -> Option<f64> {
        self.chain.iter().find(|(seg, _)| *seg == segment).map(|(_, dist)| *dist)
    }

    /// Ingests the tick's crossings and refreshes the approach cache.
    pub(crate) fn time_step(&mut self, vehicles: &VehicleSet, points: &SignalPointSet) {
        for crossing in points[self.look_point].crossings() {
            if vehicles.contains_key(crossing.vehicle)
                && !self.approach.iter().any(|a| a.vehicle == crossing.vehicle)
            {
                self.approach.push(Approach {
                    vehicle: crossing.vehicle,
                    distance: MAX_LOOK_DISTANCE,
                    vel: crossing.vel,
                });
                if self.approach.len() == 128 {
                    log::warn!(
                        "traffic light {} is tracking {} vehicles; probable bookkeeping leak",
                        self.signal_type,
                        self.approach.len()
                    );
                }
            }
        }
        for crossing in points[self.light_point].crossings() {
            if let Some(idx) = self.approach.iter().position(|a| a.vehicle == crossing.vehicle) {
                self.approach.swap_remove(idx);
            }
        }
        let mut i = 0;
        while i < self.approach.len() {
            let id = self.approach[i].vehicle;
            let refreshed = match vehicles.get(id) {
                Some(vehicle) => self
                    .start_to_light(vehicle.segment())
                    .map(|start| (start - vehicle.pos_front(), vehicle.vel())),
                None => None,
            };
            match refreshed {
                Some((distance, vel)) => {
                    self.approach[i].distance = distance;
                    self.approach[i].vel = vel;
                    i += 1;
                }
                None => {
                    // Exited the network or turned off the approach path.
                    self.approach.swap_remove(i);
                }
            }
        }
    }

    /// Writes the light into the driving parameters of each approaching
    /// vehicle the light governs.
    ///
    /// Runs after the controllers so vehicles see the tick's final status.
    /// All marks are cleared beforehand; a light never writes a vehicle on
    /// its own segment outside its lane mask, so lights sharing a segment
    /// leave each other's marks alone.
    pub(crate) fn apply_marks(&self, vehicles: &mut VehicleSet) {
        for approach in &self.approach {
            if let Some(vehicle) = vehicles.get_mut(approach.vehicle) {
                let governed =
                    vehicle.segment() != self.segment || self.lanes.contains(vehicle.lane());
                if governed {
                    vehicle.params_mut().light = Some(ApproachingLight {
                        status: self.status,
                        distance: approach.distance,
                    });
                }
            }
        }
    }

    /// Whether any approaching vehicle is within `range` metres of the stop line.
    pub(crate) fn has_vehicle_within(&self, range: f64) -> bool {
        self.approach
            .iter()
            .any(|a| a.distance > 0.0 && a.distance <= range)
    }

    /// Whether any moving vehicle is within `range` metres of the stop line.
    pub(crate) fn has_moving_vehicle_within(&self, range: f64) -> bool {
        self.approach
            .iter()
            .any(|a| a.distance > 0.0 && a.distance <= range && a.vel > STOPPED_SPEED)
    }
}

/// The target for one signal type within a phase.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhaseState {
    /// The signal type the target applies to.
    pub signal_type: String,
    /// The status displayed while the phase holds.
    pub status: LightStatus,
    /// The condition attached to the signal type, if any.
    pub condition: Option<PhaseCondition>,
}

/// A condition evaluated against the current phase each tick.
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PhaseCondition {
    /// Hold the phase while a moving vehicle is within range of the light.
    Clear {
        /// The watched distance upstream of the stop line, in m.
        range: f64,
    },
    /// Cut the phase short once any vehicle is within range of the light.
    Request {
        /// The watched distance upstream of the stop line, in m.
        range: f64,
    },
}

/// One step of a controller's cyclic program.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Phase {
    /// How long the phase lasts in s, absent conditions.
    pub duration: f64,
    /// The per-signal-type targets.
    pub states: Vec<PhaseState>,
}

/// The attributes of one traffic light head.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrafficLightAttributes {
    /// The signal type naming the light within its controller.
    pub signal_type: String,
    /// The segment carrying the stop line.
    pub segment: SegmentId,
    /// The stop line position along the segment, in m.
    pub pos: f64,
    /// The lanes the light governs.
    pub lanes: LaneMask,
}

/// The attributes of a traffic light controller and the lights it governs.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ControllerAttributes {
    /// An external identifier for the controller.
    pub id: String,
    /// The cyclic phase program.
    pub phases: Vec<Phase>,
    /// The governed lights.
    pub lights: Vec<TrafficLightAttributes>,
}

/// A cyclic phase machine driving a group of traffic lights.
///
/// Each tick the controller accumulates time in its current phase, holds the
/// phase while any `Clear` condition sees a moving vehicle, and otherwise
/// advances once the duration expires or a `Request` condition fires.
pub struct TrafficLightController {
    /// The controller's external identifier.
    id: String,
    /// The cyclic phase program.
    phases: Vec<Phase>,
    /// The index of the current phase.
    phase: usize,
    /// The time spent in the current phase, in s.
    elapsed: f64,
    /// The governed lights by signal type.
    lights: Vec<(String, TrafficLightId)>,
}

impl TrafficLightController {
    pub(crate) fn new(id: String, phases: Vec<Phase>, lights: Vec<(String, TrafficLightId)>) -> Self {
        assert!(!phases.is_empty(), "controller {id} has no phases");
        assert!(!lights.is_empty(), "controller {id} governs no lights");
        for (idx, (signal_type, _)) in lights.iter().enumerate() {
            assert!(
                !lights[..idx].iter().any(|(name, _)| name == signal_type),
                "controller {id} has two lights typed {signal_type}"
            );
        }
        for phase in &phases {
            assert!(phase.duration > 0.0, "controller {id} has a non-positive phase duration");
            for state in &phase.states {
                assert!(
                    lights.iter().any(|(signal_type, _)| *signal_type == state.signal_type),
                    "controller {} references unknown signal type {}",
                    id,
                    state.signal_type
                );
            }
        }
        Self {
            id,
            phases,
            phase: 0,
            elapsed: 0.0,
            lights,
        }
    }

    /// The controller's external identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The index of the current phase.
    pub fn phase(&self) -> usize {
        self.phase
    }

    /// The time spent in the current phase, in s.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    fn light_id(&self, signal_type: &str) -> TrafficLightId {
        match self.lights.iter().find(|(name, _)| name == signal_type) {
            Some((_, id)) => *id,
            None => panic!("controller {} has no signal type {signal_type}", self.id),
        }
    }

    /// Accumulates time and evaluates the current phase's conditions.
    pub(crate) fn time_step(&mut self, dt: f64, lights: &mut LightSet) {
        self.elapsed += dt;
        let phase = &self.phases[self.phase];
        for state in &phase.states {
            if let Some(PhaseCondition::Clear { range }) = state.condition {
                if lights[self.light_id(&state.signal_type)].has_moving_vehicle_within(range) {
                    return;
                }
            }
        }
        let expired = self.elapsed >= phase.duration;
        let requested = phase.states.iter().any(|state| match state.condition {
            Some(PhaseCondition::Request { range }) => {
                lights[self.light_id(&state.signal_type)].has_vehicle_within(range)
            }
            _ => false,
        });
        if expired || requested {
            self.advance(lights);
        }
    }

    /// Advances to the next phase, wrapping, and pushes the new statuses.
    pub(crate) fn advance(&mut self, lights: &mut LightSet) {
        self.phase = (self.phase + 1) % self.phases.len();
        self.elapsed = 0.0;
        self.push_states(lights);
    }

    /// Pushes the current phase's statuses to the governed lights.
    pub(crate) fn push_states(&self, lights: &mut LightSet) {
        for state in &self.phases[self.phase].states {
            lights[self.light_id(&state.signal_type)].set_status(state.status);
        }
    }
}
