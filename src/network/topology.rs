//! Construction primitives for wiring segments together.

use super::RoadNetwork;
use crate::lane::{LaneKind, LaneLink};
use crate::segment::{RoadSegment, SegmentAttributes};
use crate::SegmentId;

impl RoadNetwork {
    /// Adds a road segment to the network.
    pub fn add_segment(&mut self, attributes: &SegmentAttributes) -> SegmentId {
        self.segments
            .insert_with_key(|id| RoadSegment::new(id, attributes))
    }

    /// Links one lane to another, forming a sink/source pair.
    ///
    /// Relinking an already linked lane replaces the old connection; the
    /// orphaned back-pointer is logged but left untouched.
    pub fn add_lane_pair(&mut self, from: LaneLink, to: LaneLink) {
        self.assert_lane(from);
        self.assert_lane(to);
        let previous = self.segments[from.segment].lane_mut(from.lane).set_sink(Some(to));
        if previous.is_some_and(|p| p != to) {
            log::debug!("lane sink replaced on lane {} of a segment", from.lane);
        }
        let previous = self.segments[to.segment].lane_mut(to.lane).set_source(Some(from));
        if previous.is_some_and(|p| p != from) {
            log::debug!("lane source replaced on lane {} of a segment", to.lane);
        }
    }

    /// Joins two segments lane-for-lane.
    ///
    /// Both segments must have the same number of lanes with matching kinds.
    /// Joining a segment to itself forms a ring road.
    pub fn join(&mut self, from: SegmentId, to: SegmentId) {
        let from_kinds = self.segments[from].lane_kinds();
        let to_kinds = self.segments[to].lane_kinds();
        assert!(
            from_kinds.len() == to_kinds.len(),
            "joined segments with {} and {} lanes",
            from_kinds.len(),
            to_kinds.len()
        );
        assert!(
            from_kinds == to_kinds,
            "joined segments with mismatched lane kinds"
        );
        for lane in 1..=from_kinds.len() {
            self.add_lane_pair(
                LaneLink { segment: from, lane },
                LaneLink { segment: to, lane },
            );
        }
    }

    /// Joins two segments with a lane-index offset.
    ///
    /// Lane `l` of `from` feeds lane `l + offset` of `to`. Only pairs where
    /// both ends are ordinary traffic lanes are linked; entrance and exit
    /// lanes begin or end at the boundary and stay unlinked.
    pub fn offset_join(&mut self, from: SegmentId, to: SegmentId, offset: isize) {
        let from_kinds = self.segments[from].lane_kinds();
        let to_kinds = self.segments[to].lane_kinds();
        let mut linked = 0;
        for (idx, from_kind) in from_kinds.iter().enumerate() {
            let from_lane = idx + 1;
            let to_lane = from_lane as isize + offset;
            if to_lane < 1 || to_lane > to_kinds.len() as isize {
                continue;
            }
            let to_lane = to_lane as usize;
            if *from_kind != LaneKind::Traffic || to_kinds[to_lane - 1] != LaneKind::Traffic {
                continue;
            }
            self.add_lane_pair(
                LaneLink { segment: from, lane: from_lane },
                LaneLink { segment: to, lane: to_lane },
            );
            linked += 1;
        }
        assert!(linked > 0, "offset join linked no lanes");
    }

    /// Merges two lanes into a single downstream lane.
    ///
    /// All three lanes must be ordinary traffic lanes. Both feeders gain a
    /// sink link to `to`; the sink lane's single source back-pointer follows
    /// the most recently linked feeder.
    pub fn merge(&mut self, a: LaneLink, b: LaneLink, to: LaneLink) {
        for link in [a, b, to] {
            self.assert_lane(link);
            assert!(
                self.segments[link.segment].lane(link.lane).kind() == LaneKind::Traffic,
                "merged a non-traffic lane"
            );
        }
        self.add_lane_pair(a, to);
        self.add_lane_pair(b, to);
    }

    /// Forks one segment into two downstream segments.
    ///
    /// The lowest lane indices feed `a` and the remaining lanes feed `b`,
    /// so `a`'s and `b`'s combined lane kinds must match `from` exactly.
    pub fn fork(&mut self, from: SegmentId, a: SegmentId, b: SegmentId) {
        let from_kinds = self.segments[from].lane_kinds();
        let a_kinds = self.segments[a].lane_kinds();
        let b_kinds = self.segments[b].lane_kinds();
        assert!(
            a_kinds.len() + b_kinds.len() == from_kinds.len(),
            "forked a segment with {} lanes into {} + {}",
            from_kinds.len(),
            a_kinds.len(),
            b_kinds.len()
        );
        assert!(
            a_kinds.iter().chain(b_kinds.iter()).eq(from_kinds.iter()),
            "forked segments with mismatched lane kinds"
        );
        for lane in 1..=a_kinds.len() {
            self.add_lane_pair(
                LaneLink { segment: from, lane },
                LaneLink { segment: a, lane },
            );
        }
        for lane in 1..=b_kinds.len() {
            self.add_lane_pair(
                LaneLink { segment: from, lane: a_kinds.len() + lane },
                LaneLink { segment: b, lane },
            );
        }
    }

    fn assert_lane(&self, link: LaneLink) {
        let segment = match self.segments.get(link.segment) {
            Some(segment) => segment,
            None => panic!("linked a lane on a missing segment"),
        };
        assert!(
            (1..=segment.lane_count()).contains(&link.lane),
            "lane index {} out of range 1..={}",
            link.lane,
            segment.lane_count()
        );
    }
}
