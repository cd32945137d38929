pub use lane::{LaneKind, LaneLink, LaneSegment};
pub use light::{
    ControllerAttributes, LightStatus, Phase, PhaseCondition, PhaseState, TrafficLight,
    TrafficLightAttributes, TrafficLightController,
};
pub use model::{
    CarFollowingModel, FixedAcceleration, Idm, LaneChangeDecision, LaneChangeModel, NoLaneChange,
    TrafficSource,
};
pub use network::{NetworkView, RoadNetwork, SegmentEntry};
pub use object::{
    BottleneckAttributes, DetectorRecord, FlowConservingBottleneck, GradientProfile, LaneRecord,
    LoopDetector, RoadObjects, SpeedLimit, VmsDiversion,
};
pub use segment::{RoadSegment, SegmentAttributes};
pub use signal::{CrossedVehicle, SignalPoint};
use slotmap::{new_key_type, SlotMap};
pub use slotmap::{Key, KeyData};
pub use util::{Interval, LaneMask, MAX_LANES};
pub use vehicle::{ApproachingLight, DrivingParams, Vehicle, VehicleAttributes, VehicleView};

mod lane;
mod light;
mod model;
mod network;
mod object;
mod segment;
mod signal;
mod util;
mod vehicle;

new_key_type! {
    /// Unique ID of a [RoadSegment].
    pub struct SegmentId;
    /// Unique ID of a [Vehicle].
    pub struct VehicleId;
    /// Unique ID of a [SignalPoint].
    pub struct SignalPointId;
    /// Unique ID of a [TrafficLight].
    pub struct TrafficLightId;
}

type SegmentSet = SlotMap<SegmentId, RoadSegment>;
type VehicleSet = SlotMap<VehicleId, Vehicle>;
type SignalPointSet = SlotMap<SignalPointId, SignalPoint>;
type LightSet = SlotMap<TrafficLightId, TrafficLight>;
