//! End-to-end foraging runs against small seeded arenas.

use cachebots_control::ForageState;
use cachebots_core::Vec2;
use cachebots_sim::{SimConfig, Simulation, TaskMix};
use std::f64::consts::PI;

fn seeded(seed: u64, mix: TaskMix) -> SimConfig {
    let mut config = SimConfig::default();
    config.task_mix = mix;
    config.set_master_seed(seed);
    config
}

/// Finds a placed free block and parks the given robot within reach of it.
fn park_at_a_block(sim: &mut Simulation, index: usize) -> Vec2 {
    let block_position = sim
        .arena()
        .blocks()
        .find_map(|(_, block)| block.position())
        .expect("seeded arena has free blocks");
    let offset = if block_position.x > 0.5 {
        Vec2::new(-0.3, 0.0)
    } else {
        Vec2::new(0.3, 0.0)
    };
    sim.place_robot(index, block_position + offset, 0.0);
    block_position
}

#[test]
fn an_empty_arena_keeps_the_swarm_exploring() {
    let mut config = seeded(
        11,
        TaskMix {
            generalists: 2,
            harvesters: 1,
            collectors: 1,
        },
    );
    config.arena.block_count = 0;
    config.arena.static_cache_blocks = 0;

    let mut sim = Simulation::new(config).expect("config is valid");
    for _ in 0..200 {
        sim.step().expect("step");
    }

    for robot in sim.robots() {
        let state = robot.controller().state();
        assert!(
            matches!(state, ForageState::AcquireBlock | ForageState::AcquireCache),
            "robot {:?} left the acquire phase in an empty arena: {state}",
            robot.id()
        );
        assert_eq!(robot.controller().carried(), None);
    }
    assert_eq!(sim.arena().collected_blocks(), 0);
    let travelled: f64 = sim
        .robots()
        .iter()
        .map(|robot| robot.controller().distance())
        .sum();
    assert!(travelled > 0.0, "an exploring swarm covers ground");
}

#[test]
fn tiny_arenas_are_rejected_before_spawn() {
    let mut config = seeded(
        7,
        TaskMix {
            generalists: 1,
            harvesters: 0,
            collectors: 0,
        },
    );
    config.arena.width = 0.4;
    config.arena.height = 0.4;
    config.arena.nest_center = Vec2::new(0.2, 0.2);
    config.arena.nest_half_extent = Vec2::new(0.1, 0.1);
    config.arena.block_count = 0;
    config.arena.static_cache_blocks = 0;

    // a two-cell span leaves no interior once the one-cell spawn margin
    // comes off each side
    assert!(Simulation::new(config).is_err());
}

#[test]
fn a_detected_block_is_picked_up_on_the_spot() {
    let config = seeded(
        23,
        TaskMix {
            generalists: 1,
            harvesters: 0,
            collectors: 0,
        },
    );
    let mut sim = Simulation::new(config).expect("config is valid");
    park_at_a_block(&mut sim, 0);

    // first tick leaves the start state, second detects and is serviced
    sim.step().expect("step");
    sim.step().expect("step");

    let controller = sim.robots()[0].controller();
    assert_eq!(controller.state(), ForageState::TransportToNest);
    assert!(controller.carried().is_some());
    assert!(controller.actuators().payload().is_some());
}

#[test]
fn cache_service_waits_out_the_usage_penalty() {
    let mut config = seeded(
        31,
        TaskMix {
            generalists: 0,
            harvesters: 0,
            collectors: 1,
        },
    );
    config.cache_penalty = 5;

    let mut sim = Simulation::new(config).expect("config is valid");
    let cache_position = sim.config().arena.static_cache_position;
    sim.place_robot(0, cache_position + Vec2::new(0.3, 0.0), PI);

    // tick 0 leaves start, tick 1 parks at the cache and starts the penalty
    for _ in 0..6 {
        sim.step().expect("step");
    }
    let controller = sim.robots()[0].controller();
    assert_eq!(controller.state(), ForageState::WaitForCachePickup);
    assert_eq!(controller.carried(), None);

    // penalty started at tick 1, so tick 6 is the first serviced tick
    sim.step().expect("step");
    let controller = sim.robots()[0].controller();
    assert_eq!(controller.state(), ForageState::TransportToNest);
    assert!(controller.carried().is_some());
}

#[test]
fn draining_a_cache_reroutes_the_other_waiter() {
    let mut config = seeded(
        47,
        TaskMix {
            generalists: 0,
            harvesters: 0,
            collectors: 2,
        },
    );
    config.cache_penalty = 5;

    let mut sim = Simulation::new(config).expect("config is valid");
    let cache_position = sim.config().arena.static_cache_position;
    sim.place_robot(0, cache_position + Vec2::new(0.3, 0.0), PI);
    sim.place_robot(1, cache_position + Vec2::new(-0.3, 0.0), 0.0);

    // both penalties start at tick 1; robot 0 is serviced first at tick 6,
    // taking the cache down to one block and dissolving it
    for _ in 0..7 {
        sim.step().expect("step");
    }

    let first = sim.robots()[0].controller();
    assert_eq!(first.state(), ForageState::TransportToNest);
    assert!(first.carried().is_some());

    let second = sim.robots()[1].controller();
    assert_eq!(second.state(), ForageState::AcquireCache);
    assert_eq!(second.carried(), None);
    assert_eq!(second.pending_cache(), None);

    assert_eq!(sim.arena().cache_count(), 0);
    let orphan_cell = sim.arena().coord_of(cache_position);
    let orphaned = sim
        .arena()
        .cell(orphan_cell)
        .and_then(|cell| cell.block_id());
    assert!(orphaned.is_some(), "the last block stays behind as a free block");
}

#[test]
fn a_generalist_completes_the_full_cycle() {
    let config = seeded(
        59,
        TaskMix {
            generalists: 1,
            harvesters: 0,
            collectors: 0,
        },
    );
    let mut sim = Simulation::new(config).expect("config is valid");
    park_at_a_block(&mut sim, 0);

    let mut delivered_at = None;
    for _ in 0..3000 {
        sim.step().expect("step");
        if sim.arena().collected_blocks() >= 1 {
            delivered_at = Some(sim.clock());
            break;
        }
    }
    assert!(delivered_at.is_some(), "one robot, one block, no delivery");
    let controller = sim.robots()[0].controller();
    assert_eq!(controller.state(), ForageState::LeavingNest);
    assert_eq!(controller.carried(), None);

    let mut resumed = false;
    for _ in 0..400 {
        sim.step().expect("step");
        if sim.robots()[0].controller().state() == ForageState::AcquireBlock {
            resumed = true;
            break;
        }
    }
    assert!(resumed, "the robot never left the nest to forage again");
}

#[test]
fn seeded_runs_are_deterministic() {
    fn run(seed: u64) -> (Vec<(Vec2, Vec2)>, Vec<cachebots_sim::DistanceRow>) {
        let mut config = seeded(
            seed,
            TaskMix {
                generalists: 3,
                harvesters: 2,
                collectors: 2,
            },
        );
        config.metrics_interval = 50;
        let mut sim = Simulation::new(config).expect("config is valid");
        for _ in 0..300 {
            sim.step().expect("step");
        }
        let poses = sim
            .robots()
            .iter()
            .map(|robot| (robot.position(), robot.heading()))
            .collect();
        (poses, sim.metrics().distance().to_vec())
    }

    let (a_poses, a_rows) = run(99);
    let (b_poses, b_rows) = run(99);
    let (c_poses, c_rows) = run(100);

    assert_eq!(a_poses, b_poses);
    assert_eq!(a_rows, b_rows);
    assert_eq!(a_rows.len(), 6);
    assert!(a_poses != c_poses || a_rows != c_rows);
}

#[test]
fn metric_files_land_under_the_configured_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = seeded(
        71,
        TaskMix {
            generalists: 2,
            harvesters: 0,
            collectors: 0,
        },
    );
    config.metrics_interval = 20;
    config.metrics_path = Some(dir.path().to_path_buf());
    config.ticks = 60;

    let mut sim = Simulation::new(config).expect("config is valid");
    sim.run().expect("run");
    sim.write_metrics().expect("write");

    let raw = std::fs::read_to_string(dir.path().join("distance.csv")).expect("distance.csv");
    let mut lines = raw.lines();
    assert_eq!(
        lines.next(),
        Some("interval,tick,interval_distance,total_distance")
    );
    assert_eq!(lines.count(), 3);
}
