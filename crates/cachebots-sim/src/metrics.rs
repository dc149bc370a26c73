//! Interval metrics: per-tick counts accumulated by the driver, flushed as
//! one CSV row per interval.
//!
//! Collectors only pull from controller accessors; nothing here feeds back
//! into the simulation.

use cachebots_control::{ForageState, RobotController, TaskKind};
use cachebots_core::Tick;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Swarm odometry over one interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistanceRow {
    pub interval: u64,
    pub tick: u64,
    /// Meters traveled by the whole swarm during this interval.
    pub interval_distance: f64,
    /// Meters traveled since boot.
    pub total_distance: f64,
}

/// Robot-ticks spent in each acquisition phase over one interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AcquisitionRow {
    pub interval: u64,
    pub tick: u64,
    pub exploring: u64,
    pub vectoring: u64,
    pub waiting: u64,
    pub avoiding: u64,
}

/// Robot-ticks spent in each transport phase over one interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TransportRow {
    pub interval: u64,
    pub tick: u64,
    pub to_nest: u64,
    pub to_cache: u64,
    pub waiting: u64,
    pub avoiding: u64,
}

/// Task distribution and cumulative outcomes over one interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskRow {
    pub interval: u64,
    pub tick: u64,
    /// Robot-ticks run by each task shape during the interval.
    pub generalists: u64,
    pub harvesters: u64,
    pub collectors: u64,
    /// Task cycles abandoned since boot.
    pub aborts: u64,
    /// Blocks delivered to the nest since boot.
    pub collected: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct AcquisitionAccum {
    exploring: u64,
    vectoring: u64,
    waiting: u64,
    avoiding: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct TransportAccum {
    to_nest: u64,
    to_cache: u64,
    waiting: u64,
    avoiding: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct TaskAccum {
    generalists: u64,
    harvesters: u64,
    collectors: u64,
}

/// All collectors for one run.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    interval: u64,
    completed: u64,
    acquisition: AcquisitionAccum,
    transport: TransportAccum,
    tasks: TaskAccum,
    tick_distance: f64,
    total_distance: f64,
    flushed_distance: f64,
    aborts: u64,
    collected: u64,
    distance_rows: Vec<DistanceRow>,
    acquisition_rows: Vec<AcquisitionRow>,
    transport_rows: Vec<TransportRow>,
    task_rows: Vec<TaskRow>,
}

impl MetricsRegistry {
    #[must_use]
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            completed: 0,
            acquisition: AcquisitionAccum::default(),
            transport: TransportAccum::default(),
            tasks: TaskAccum::default(),
            tick_distance: 0.0,
            total_distance: 0.0,
            flushed_distance: 0.0,
            aborts: 0,
            collected: 0,
            distance_rows: Vec::new(),
            acquisition_rows: Vec::new(),
            transport_rows: Vec::new(),
            task_rows: Vec::new(),
        }
    }

    /// Samples one robot's phase for the current tick.
    pub fn observe_robot(&mut self, controller: &RobotController) {
        let task = controller.task();
        if task.is_exploring() {
            self.acquisition.exploring += 1;
        }
        if task.is_vectoring() {
            self.acquisition.vectoring += 1;
        }
        match controller.state() {
            ForageState::WaitForBlockPickup | ForageState::WaitForCachePickup => {
                self.acquisition.waiting += 1;
            }
            ForageState::TransportToNest => self.transport.to_nest += 1,
            ForageState::TransportToCache => self.transport.to_cache += 1,
            ForageState::WaitForBlockDrop => self.transport.waiting += 1,
            _ => {}
        }
        if task.is_avoiding_collision() {
            if task.is_acquiring() {
                self.acquisition.avoiding += 1;
            } else if task.is_transporting() {
                self.transport.avoiding += 1;
            }
        }
        match controller.kind() {
            TaskKind::Generalist => self.tasks.generalists += 1,
            TaskKind::Harvester => self.tasks.harvesters += 1,
            TaskKind::Collector => self.tasks.collectors += 1,
        }
        self.tick_distance += controller.distance();
    }

    /// Closes the tick; at interval boundaries, emits one row per collector.
    pub fn finish_tick(&mut self, tick: Tick, aborts: u64, collected: u64) {
        self.total_distance = self.tick_distance;
        self.tick_distance = 0.0;
        self.aborts = aborts;
        self.collected = collected;
        if (tick.0 + 1).is_multiple_of(self.interval) {
            self.flush(tick);
        }
    }

    fn flush(&mut self, tick: Tick) {
        let interval = self.completed;
        self.distance_rows.push(DistanceRow {
            interval,
            tick: tick.0,
            interval_distance: self.total_distance - self.flushed_distance,
            total_distance: self.total_distance,
        });
        self.flushed_distance = self.total_distance;

        self.acquisition_rows.push(AcquisitionRow {
            interval,
            tick: tick.0,
            exploring: self.acquisition.exploring,
            vectoring: self.acquisition.vectoring,
            waiting: self.acquisition.waiting,
            avoiding: self.acquisition.avoiding,
        });
        self.acquisition = AcquisitionAccum::default();

        self.transport_rows.push(TransportRow {
            interval,
            tick: tick.0,
            to_nest: self.transport.to_nest,
            to_cache: self.transport.to_cache,
            waiting: self.transport.waiting,
            avoiding: self.transport.avoiding,
        });
        self.transport = TransportAccum::default();

        self.task_rows.push(TaskRow {
            interval,
            tick: tick.0,
            generalists: self.tasks.generalists,
            harvesters: self.tasks.harvesters,
            collectors: self.tasks.collectors,
            aborts: self.aborts,
            collected: self.collected,
        });
        self.tasks = TaskAccum::default();

        self.completed += 1;
    }

    #[must_use]
    pub fn distance(&self) -> &[DistanceRow] {
        &self.distance_rows
    }

    #[must_use]
    pub fn acquisition(&self) -> &[AcquisitionRow] {
        &self.acquisition_rows
    }

    #[must_use]
    pub fn transport(&self) -> &[TransportRow] {
        &self.transport_rows
    }

    #[must_use]
    pub fn tasks(&self) -> &[TaskRow] {
        &self.task_rows
    }

    /// Writes the four collector files under `dir`, creating it if needed.
    pub fn write_csv(&self, dir: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dir)?;

        let mut f = File::create(dir.join("distance.csv"))?;
        writeln!(f, "interval,tick,interval_distance,total_distance")?;
        for r in &self.distance_rows {
            writeln!(
                f,
                "{},{},{},{}",
                r.interval, r.tick, r.interval_distance, r.total_distance
            )?;
        }

        let mut f = File::create(dir.join("block_acquisition.csv"))?;
        writeln!(f, "interval,tick,exploring,vectoring,waiting,avoiding")?;
        for r in &self.acquisition_rows {
            writeln!(
                f,
                "{},{},{},{},{},{}",
                r.interval, r.tick, r.exploring, r.vectoring, r.waiting, r.avoiding
            )?;
        }

        let mut f = File::create(dir.join("block_transport.csv"))?;
        writeln!(f, "interval,tick,to_nest,to_cache,waiting,avoiding")?;
        for r in &self.transport_rows {
            writeln!(
                f,
                "{},{},{},{},{},{}",
                r.interval, r.tick, r.to_nest, r.to_cache, r.waiting, r.avoiding
            )?;
        }

        let mut f = File::create(dir.join("task_distribution.csv"))?;
        writeln!(
            f,
            "interval,tick,generalists,harvesters,collectors,aborts,collected"
        )?;
        for r in &self.task_rows {
            writeln!(
                f,
                "{},{},{},{},{},{},{}",
                r.interval, r.tick, r.generalists, r.harvesters, r.collectors, r.aborts,
                r.collected
            )?;
        }

        Ok(())
    }
}
