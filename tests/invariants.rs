//! Tests for the engine's bookkeeping invariants under sustained traffic.

use roadnet::{
    FixedAcceleration, Idm, LaneChangeDecision, LaneChangeModel, LaneKind, NetworkView,
    NoLaneChange, RoadNetwork, RoadSegment, SegmentAttributes, SegmentEntry, SegmentId,
    TrafficSource, VehicleAttributes, VehicleView,
};

fn segment(net: &mut RoadNetwork, length: f64, lanes: &[LaneKind]) -> SegmentId {
    net.add_segment(&SegmentAttributes {
        length,
        lanes,
        user_id: None,
    })
}

fn cruising(pos: f64, vel: f64) -> VehicleAttributes {
    VehicleAttributes {
        length: 5.0,
        pos,
        vel,
        following: Box::new(FixedAcceleration(0.0)),
        lane_change: Box::new(NoLaneChange),
    }
}

/// Spawns a constant-velocity vehicle at a fixed interval, holding back
/// while the entry point is blocked.
struct PulseSource {
    interval: f64,
    next: f64,
}

impl TrafficSource for PulseSource {
    fn time_step(
        &mut self,
        _dt: f64,
        sim_time: f64,
        _iteration_count: usize,
        entry: &mut SegmentEntry,
    ) {
        if sim_time < self.next {
            return;
        }
        let clear = entry.rear_vehicle(1).map_or(true, |view| view.pos > 20.0);
        if clear {
            entry.spawn(1, cruising(0.0, 20.0));
            self.next = sim_time + self.interval;
        }
    }
}

/// Test that every admitted vehicle is either on the network or counted as
/// exited, under a steady inflow.
#[test]
fn a_source_feeds_the_network() {
    let mut net = RoadNetwork::new();
    let seg = segment(&mut net, 1000.0, &[LaneKind::Traffic]);
    net.add_traffic_source(
        seg,
        Box::new(PulseSource {
            interval: 10.0,
            next: 0.0,
        }),
    );

    let mut time = 0.0;
    for i in 0..200 {
        net.time_step(0.5, time, i);
        time += 0.5;
        assert_eq!(
            net.entered_count(),
            net.exited_count() + net.vehicle_count() as u64
        );
    }
    assert_eq!(net.entered_count(), 10);
    assert_eq!(net.exited_count(), 5);
    assert_eq!(net.vehicle_count(), 5);
}

/// A lane-change model that drifts outward through one window of the ring
/// and back inward through another, once per lap.
struct Weave;

impl LaneChangeModel for Weave {
    fn decide(
        &self,
        subject: &VehicleView,
        _segment: &RoadSegment,
        _network: &NetworkView,
    ) -> LaneChangeDecision {
        match (subject.lane, subject.pos) {
            (1, pos) if (100.0..150.0).contains(&pos) => LaneChangeDecision::Right,
            (2, pos) if (300.0..350.0).contains(&pos) => LaneChangeDecision::Left,
            _ => LaneChangeDecision::Stay,
        }
    }
}

/// Test that lane ordering survives heavy weaving on a two-lane ring.
#[test]
fn lanes_stay_sorted_under_load() {
    let mut net = RoadNetwork::new();
    let ring = segment(&mut net, 500.0, &[LaneKind::Traffic, LaneKind::Traffic]);
    net.join(ring, ring);
    for i in 0..8 {
        net.add_vehicle(
            ring,
            1 + i % 2,
            VehicleAttributes {
                length: 5.0,
                pos: i as f64 * 60.0,
                vel: 12.0,
                following: Box::new(Idm {
                    desired_speed: 12.0 + i as f64,
                    ..Idm::default()
                }),
                lane_change: Box::new(Weave),
            },
        );
    }

    for i in 0..1500 {
        net.time_step(0.1, i as f64 * 0.1, i);
        if i % 100 == 0 {
            assert!(net.each_lane_is_sorted());
        }
    }
    assert!(net.each_lane_is_sorted());
    assert_eq!(net.vehicle_count(), 8);
    assert_eq!(net.exited_count(), 0);
}

/// Test that a detector counts each vehicle exactly once, including vehicles
/// that jump the boundary onto the detector's segment in a single tick.
#[test]
fn crossings_fire_exactly_once() {
    let mut net = RoadNetwork::new();
    let a = segment(&mut net, 500.0, &[LaneKind::Traffic]);
    let b = segment(&mut net, 500.0, &[LaneKind::Traffic]);
    net.join(a, b);
    net.add_loop_detector(b, 5.0, 10.0);
    for pos in [480.0, 450.0, 420.0, 390.0, 360.0] {
        net.add_vehicle(a, 1, cruising(pos, 25.0));
    }

    for i in 0..40 {
        net.time_step(1.0, i as f64, i);
    }
    assert_eq!(net.segment(b).objects().detectors()[0].total_count(), 5);

    // A vehicle created exactly on the detector never crosses it.
    net.add_vehicle(b, 1, cruising(5.0, 25.0));
    for i in 40..43 {
        net.time_step(1.0, i as f64, i);
    }
    assert_eq!(net.segment(b).objects().detectors()[0].total_count(), 5);
}

/// Test that a randomised initial state settles without losing a vehicle or
/// breaking the lane order.
#[test]
fn random_initial_traffic_stays_consistent() {
    use rand::{Rng, SeedableRng};

    let mut rng = rand::rngs::StdRng::from_seed(*b"ten cars circle the ring road...");
    let mut net = RoadNetwork::new();
    let ring = segment(&mut net, 1000.0, &[LaneKind::Traffic]);
    net.join(ring, ring);
    for i in 0..10 {
        net.add_vehicle(
            ring,
            1,
            VehicleAttributes {
                length: 5.0,
                pos: i as f64 * 100.0 + rng.gen_range(0.0..60.0),
                vel: rng.gen_range(5.0..15.0),
                following: Box::new(Idm {
                    desired_speed: rng.gen_range(15.0..25.0),
                    ..Idm::default()
                }),
                lane_change: Box::new(NoLaneChange),
            },
        );
    }

    for i in 0..1000 {
        net.time_step(0.1, i as f64 * 0.1, i);
        if i % 100 == 0 {
            assert!(net.each_lane_is_sorted());
            assert!(net.vehicles().all(|v| (0.0..=1000.0).contains(&v.pos_rear())));
        }
    }
    assert_eq!(net.vehicle_count(), 10);
    assert_eq!(net.exited_count(), 0);
}

/// Test that explicit removal keeps the counters and lanes consistent.
#[test]
fn removal_updates_the_bookkeeping() {
    let mut net = RoadNetwork::new();
    let seg = segment(&mut net, 1000.0, &[LaneKind::Traffic]);
    let ids: Vec<_> = (1..4)
        .map(|i| net.add_vehicle(seg, 1, cruising(i as f64 * 100.0, 10.0)))
        .collect();

    net.remove_vehicle(ids[1]);
    assert!(net.vehicle(ids[1]).is_none());
    assert_eq!(net.entered_count(), 3);
    assert_eq!(net.exited_count(), 1);
    assert_eq!(net.vehicle_count(), 2);

    net.time_step(1.0, 0.0, 0);
    assert!(net.each_lane_is_sorted());
    assert_eq!(net.vehicle_count(), 2);
}

/// Test that removing an unknown vehicle is rejected loudly.
#[test]
#[should_panic(expected = "not on the network")]
fn removing_a_vehicle_twice_panics() {
    let mut net = RoadNetwork::new();
    let seg = segment(&mut net, 1000.0, &[LaneKind::Traffic]);
    let veh = net.add_vehicle(seg, 1, cruising(100.0, 10.0));
    net.remove_vehicle(veh);
    net.remove_vehicle(veh);
}

/// Test that admission validates the vehicle's position against the segment.
#[test]
#[should_panic(expected = "outside segment")]
fn admission_rejects_positions_off_the_segment() {
    let mut net = RoadNetwork::new();
    let seg = segment(&mut net, 1000.0, &[LaneKind::Traffic]);
    net.add_vehicle(seg, 1, cruising(2000.0, 10.0));
}
