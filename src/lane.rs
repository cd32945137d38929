use crate::{SegmentId, VehicleId, VehicleSet};
use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The type of a lane.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LaneKind {
    /// An ordinary through lane.
    Traffic,
    /// An acceleration lane joining the road.
    Entrance,
    /// A deceleration lane leaving the road.
    Exit,
}

/// A directed connection to a lane on a neighbouring segment.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LaneLink {
    /// The neighbouring segment.
    pub segment: SegmentId,
    /// The 1-based lane index on that segment.
    pub lane: usize,
}

/// Per-lane vehicle storage for one road segment.
///
/// Vehicles are kept sorted by strictly decreasing rear position:
/// index 0 is the front of the lane, nearest the downstream end.
pub struct LaneSegment {
    /// The type of the lane.
    kind: LaneKind,
    /// The vehicles on the lane, front of lane first.
    vehicles: VecDeque<VehicleId>,
    /// The upstream lane feeding this one.
    source: Option<LaneLink>,
    /// The downstream lane this one drains into.
    sink: Option<LaneLink>,
}

impl LaneSegment {
    pub(crate) fn new(kind: LaneKind) -> Self {
        Self {
            kind,
            vehicles: VecDeque::new(),
            source: None,
            sink: None,
        }
    }

    /// Gets the type of the lane.
    pub fn kind(&self) -> LaneKind {
        self.kind
    }

    /// Gets the upstream lane feeding this one, if any.
    pub fn source(&self) -> Option<LaneLink> {
        self.source
    }

    /// Gets the downstream lane this one drains into, if any.
    pub fn sink(&self) -> Option<LaneLink> {
        self.sink
    }

    /// Replaces the source link, returning the previous one.
    pub(crate) fn set_source(&mut self, link: Option<LaneLink>) -> Option<LaneLink> {
        std::mem::replace(&mut self.source, link)
    }

    /// Replaces the sink link, returning the previous one.
    pub(crate) fn set_sink(&mut self, link: Option<LaneLink>) -> Option<LaneLink> {
        std::mem::replace(&mut self.sink, link)
    }

    /// Gets the number of vehicles on the lane.
    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Returns an iterator over the vehicles on the lane, front of lane first.
    pub fn vehicles(&self) -> impl Iterator<Item = VehicleId> + '_ {
        self.vehicles.iter().copied()
    }

    /// Gets the vehicle nearest the downstream end, if any.
    pub fn front(&self) -> Option<VehicleId> {
        self.vehicles.front().copied()
    }

    /// Gets the vehicle nearest the upstream end, if any.
    pub fn rear(&self) -> Option<VehicleId> {
        self.vehicles.back().copied()
    }

    /// Gets the vehicle at the given index, front of lane first.
    pub(crate) fn get(&self, idx: usize) -> Option<VehicleId> {
        self.vehicles.get(idx).copied()
    }

    /// Counts the vehicles strictly ahead of the given position.
    pub(crate) fn count_ahead_of(&self, vehicles: &VehicleSet, pos: f64) -> usize {
        self.vehicles
            .partition_point(|id| vehicles[*id].pos_rear() > pos)
    }

    /// Inserts the vehicle with the given ID, preserving the sort order.
    ///
    /// Panics if another vehicle already occupies the exact same position,
    /// which indicates a malformed scenario or a broken lane-change.
    pub(crate) fn add_vehicle(&mut self, vehicles: &VehicleSet, id: VehicleId) {
        debug_assert!(!self.vehicles.contains(&id), "vehicle inserted twice");
        let pos = vehicles[id].pos_rear();
        let idx = self.count_ahead_of(vehicles, pos);
        if let Some(other) = self.get(idx) {
            if vehicles[other].pos_rear() == pos {
                panic!("two vehicles at identical position {pos}");
            }
        }
        self.vehicles.insert(idx, id);
    }

    /// Appends the vehicle with the given ID as the new rear-most vehicle.
    ///
    /// This is the O(1) fast path used during inter-segment transfer; the
    /// caller must know the vehicle belongs at the rear of the lane.
    pub(crate) fn append_vehicle(&mut self, vehicles: &VehicleSet, id: VehicleId) {
        if let Some(last) = self.rear() {
            let last_pos = vehicles[last].pos_rear();
            let pos = vehicles[id].pos_rear();
            if pos == last_pos {
                panic!("two vehicles at identical position {pos}");
            }
            if pos > last_pos {
                debug_assert!(false, "appended vehicle {pos} ahead of rear-most {last_pos}");
                log::error!(
                    "appended vehicle at {} ahead of rear-most at {}; re-sorting",
                    pos,
                    last_pos
                );
                self.add_vehicle(vehicles, id);
                return;
            }
        }
        self.vehicles.push_back(id);
    }

    /// Removes and returns the vehicle nearest the downstream end.
    pub(crate) fn pop_front_vehicle(&mut self) -> Option<VehicleId> {
        self.vehicles.pop_front()
    }

    /// Removes the vehicle with the given ID from the lane.
    /// Returns `true` iff the vehicle was present.
    pub(crate) fn remove_vehicle(&mut self, id: VehicleId) -> bool {
        if let Some(idx) = self.vehicles.iter().position(|v| *v == id) {
            self.vehicles.remove(idx);
            true
        } else {
            false
        }
    }

    /// Returns true if the lane's vehicles are in strictly decreasing position order.
    pub fn is_sorted(&self, vehicles: &VehicleSet) -> bool {
        use itertools::Itertools;
        self.vehicles
            .iter()
            .tuple_windows()
            .all(|(a, b)| vehicles[*a].pos_rear() > vehicles[*b].pos_rear())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{FixedAcceleration, NoLaneChange};
    use crate::vehicle::{Vehicle, VehicleAttributes};

    fn attributes(pos: f64) -> VehicleAttributes {
        VehicleAttributes {
            length: 5.0,
            pos,
            vel: 0.0,
            following: Box::new(FixedAcceleration(0.0)),
            lane_change: Box::new(NoLaneChange),
        }
    }

    fn lane_with_vehicles(positions: &[f64]) -> (LaneSegment, VehicleSet, Vec<VehicleId>) {
        let mut vehicles = VehicleSet::default();
        let mut lane = LaneSegment::new(LaneKind::Traffic);
        let mut ids = vec![];
        for pos in positions {
            let id =
                vehicles.insert_with_key(|id| Vehicle::new(id, SegmentId::default(), 1, attributes(*pos)));
            lane.add_vehicle(&vehicles, id);
            ids.push(id);
        }
        (lane, vehicles, ids)
    }

    #[test]
    fn insertion_keeps_decreasing_order() {
        let (lane, vehicles, ids) = lane_with_vehicles(&[50.0, 80.0, 20.0, 65.0]);
        let order: Vec<_> = lane.vehicles().collect();
        assert_eq!(order, vec![ids[1], ids[3], ids[0], ids[2]]);
        assert!(lane.is_sorted(&vehicles));
        assert_eq!(lane.front(), Some(ids[1]));
        assert_eq!(lane.rear(), Some(ids[2]));
    }

    #[test]
    #[should_panic(expected = "identical position")]
    fn insertion_rejects_ties() {
        lane_with_vehicles(&[50.0, 50.0]);
    }

    #[test]
    fn append_is_rear_most() {
        let (mut lane, mut vehicles, _) = lane_with_vehicles(&[50.0, 80.0]);
        let id =
            vehicles.insert_with_key(|id| Vehicle::new(id, SegmentId::default(), 1, attributes(10.0)));
        lane.append_vehicle(&vehicles, id);
        assert_eq!(lane.rear(), Some(id));
        assert!(lane.is_sorted(&vehicles));
    }

    #[test]
    fn remove_vehicle_by_id() {
        let (mut lane, vehicles, ids) = lane_with_vehicles(&[50.0, 80.0, 20.0]);
        assert!(lane.remove_vehicle(ids[0]));
        assert!(!lane.remove_vehicle(ids[0]));
        assert_eq!(lane.vehicle_count(), 2);
        assert!(lane.is_sorted(&vehicles));
    }
}
