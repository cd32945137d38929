//! Tests that involve traffic on a single road segment.

use roadnet::{
    FixedAcceleration, Idm, LaneKind, LaneMask, NoLaneChange, RoadNetwork, SegmentAttributes,
    SegmentId, VehicleAttributes,
};

fn one_lane(net: &mut RoadNetwork, length: f64) -> SegmentId {
    net.add_segment(&SegmentAttributes {
        length,
        lanes: &[LaneKind::Traffic],
        user_id: None,
    })
}

/// A vehicle that holds its initial velocity.
fn cruising(pos: f64, vel: f64) -> VehicleAttributes {
    VehicleAttributes {
        length: 5.0,
        pos,
        vel,
        following: Box::new(FixedAcceleration(0.0)),
        lane_change: Box::new(NoLaneChange),
    }
}

/// A vehicle driven by the intelligent driver model.
fn driven(pos: f64, vel: f64) -> VehicleAttributes {
    VehicleAttributes {
        length: 5.0,
        pos,
        vel,
        following: Box::new(Idm::default()),
        lane_change: Box::new(NoLaneChange),
    }
}

/// Test that a vehicle's position increases monotonically.
#[test]
fn vehicle_drives_forward() {
    let mut net = RoadNetwork::new();
    let seg = one_lane(&mut net, 10_000.0);
    let veh = net.add_vehicle(seg, 1, driven(0.0, 0.0));

    let mut pos = net.vehicle(veh).unwrap().pos_rear();
    for i in 0..100 {
        net.time_step(0.1, i as f64 * 0.1, i);
        let next_pos = net.vehicle(veh).unwrap().pos_rear();
        assert!(next_pos > pos);
        pos = next_pos;
    }
}

/// Test that integration is exact for a constant-velocity vehicle.
#[test]
fn kinematics_are_exact() {
    let mut net = RoadNetwork::new();
    let seg = one_lane(&mut net, 2000.0);
    let veh = net.add_vehicle(seg, 1, cruising(999.0, 40.0));

    net.time_step(0.25, 0.0, 0);
    assert_eq!(net.vehicle(veh).unwrap().pos_rear(), 1009.0);
}

/// Test that a vehicle passing the downstream end lands on the sink segment
/// with its position rebased by the source length.
#[test]
fn outflow_rebases_position() {
    let mut net = RoadNetwork::new();
    let a = one_lane(&mut net, 1000.0);
    let b = one_lane(&mut net, 1000.0);
    net.join(a, b);
    let veh = net.add_vehicle(a, 1, cruising(999.0, 40.0));

    net.time_step(0.25, 0.0, 0);
    let vehicle = net.vehicle(veh).unwrap();
    assert_eq!(vehicle.segment(), b);
    assert_eq!(vehicle.pos_rear(), 9.0);
}

/// Test that a vehicle leaving an unlinked segment end exits the network.
#[test]
fn the_network_edge_removes_vehicles() {
    let mut net = RoadNetwork::new();
    let seg = one_lane(&mut net, 100.0);
    let veh = net.add_vehicle(seg, 1, cruising(95.0, 10.0));

    net.time_step(1.0, 0.0, 0);
    assert!(net.vehicle(veh).is_none());
    assert_eq!(net.vehicle_count(), 0);
    assert_eq!(net.entered_count(), 1);
    assert_eq!(net.exited_count(), 1);
}

/// Test that a driven vehicle brakes behind a standing obstacle and settles
/// at a small standstill gap.
#[test]
fn follower_never_hits_the_leader() {
    let mut net = RoadNetwork::new();
    let seg = one_lane(&mut net, 10_000.0);
    net.add_vehicle(seg, 1, cruising(250.0, 0.0));
    let follower = net.add_vehicle(seg, 1, driven(0.0, 25.0));

    for i in 0..600 {
        net.time_step(0.1, i as f64 * 0.1, i);
        assert!(net.vehicle(follower).unwrap().pos_front() < 250.0);
    }
    let vehicle = net.vehicle(follower).unwrap();
    assert!(vehicle.has_stopped(), "the follower should stop behind the obstacle");
    let gap = 250.0 - vehicle.pos_front();
    assert!(gap > 0.5 && gap < 10.0, "unexpected standstill gap {gap}");
}

/// Test that a posted limit takes effect when crossed and caps the speed.
#[test]
fn a_posted_limit_caps_speed() {
    let mut net = RoadNetwork::new();
    let seg = one_lane(&mut net, 5000.0);
    net.add_speed_limit(seg, 500.0, 10.0, LaneMask::ALL);
    let veh = net.add_vehicle(seg, 1, driven(0.0, 20.0));

    for i in 0..10 {
        net.time_step(0.1, i as f64 * 0.1, i);
    }
    assert!(net.vehicle(veh).unwrap().params().speed_limit.is_infinite());

    for i in 10..400 {
        net.time_step(0.1, i as f64 * 0.1, i);
    }
    let vehicle = net.vehicle(veh).unwrap();
    assert_eq!(vehicle.params().speed_limit, 10.0);
    assert!(
        (vehicle.vel() - 10.0).abs() < 0.5,
        "speed {} should settle at the limit",
        vehicle.vel()
    );
}
