//! Particle-based hydraulic erosion.
//!
//! Each particle is a small parcel of water that rolls downhill, picking up
//! material where it is fast and under capacity and dropping it where it slows
//! down. All elevation writes go through a [`HeightSurface`] so the same
//! particle loop runs in place (sequential mode, with a rollback journal) or
//! against a read-only snapshot plus a private overlay (parallel batches).

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{ErosionConfig, ErosionMode, TerrainConfig, TerrainScale};
use crate::error::TerrainError;
use crate::grid::{ElevationGrid, PotentialField};
use crate::metrics::{StageDetail, StageStats};
use crate::pipeline::{Stage, StageContext};
use crate::progress::ProgressEvent;

const EROSION_SEED_SALT: u64 = 0xE205_1011_D0C5_0004;
const MIN_DIRECTION: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Evaporated,
    LeftGrid,
    FlatGradient,
    StepLimit,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErosionStats {
    pub mode: ErosionMode,
    pub particles: u64,
    pub batches: u32,
    pub total_eroded: f64,
    pub total_deposited: f64,
    pub sediment_lost: f64,
    /// `Σ after − Σ before` over the whole grid.
    pub net_change: f64,
    pub discarded_particles: u64,
    pub total_steps: u64,
    pub evaporated: u64,
    pub left_grid: u64,
    pub flat_gradient: u64,
    pub step_limit: u64,
}

impl ErosionStats {
    fn new(mode: ErosionMode) -> Self {
        Self {
            mode,
            particles: 0,
            batches: 0,
            total_eroded: 0.0,
            total_deposited: 0.0,
            sediment_lost: 0.0,
            net_change: 0.0,
            discarded_particles: 0,
            total_steps: 0,
            evaporated: 0,
            left_grid: 0,
            flat_gradient: 0,
            step_limit: 0,
        }
    }

    /// Distance between the measured grid change and the recorded exchange.
    pub fn mass_balance_error(&self) -> f64 {
        (self.net_change - (self.total_deposited - self.total_eroded)).abs()
    }

    fn record_run(&mut self, run: &ParticleRun) {
        self.particles += 1;
        self.total_steps += run.steps as u64;
        self.sediment_lost += run.lost;
        match run.end {
            Termination::Evaporated => self.evaporated += 1,
            Termination::LeftGrid => self.left_grid += 1,
            Termination::FlatGradient => self.flat_gradient += 1,
            Termination::StepLimit => self.step_limit += 1,
        }
    }

    fn record_discard(&mut self, index: u32, err: &TerrainError) {
        self.particles += 1;
        self.discarded_particles += 1;
        tracing::debug!(
            target: "terrain::erosion",
            particle = index,
            error = %err,
            "erosion.particle_discarded"
        );
    }
}

/// Cell storage seen by a particle.
trait HeightSurface {
    fn size(&self) -> u32;
    fn get(&self, idx: usize) -> f32;
    fn set(&mut self, idx: usize, value: f32);
}

/// In-place surface that remembers prior values until the particle commits.
struct JournaledSurface<'a> {
    size: u32,
    values: &'a mut [f32],
    journal: Vec<(usize, f32)>,
}

impl<'a> JournaledSurface<'a> {
    fn new(size: u32, values: &'a mut [f32]) -> Self {
        Self {
            size,
            values,
            journal: Vec::new(),
        }
    }

    fn commit(&mut self) {
        self.journal.clear();
    }

    fn rollback(&mut self) {
        while let Some((idx, previous)) = self.journal.pop() {
            self.values[idx] = previous;
        }
    }
}

impl HeightSurface for JournaledSurface<'_> {
    fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    fn get(&self, idx: usize) -> f32 {
        self.values[idx]
    }

    fn set(&mut self, idx: usize, value: f32) {
        self.journal.push((idx, self.values[idx]));
        self.values[idx] = value;
    }
}

/// Read-only snapshot plus the particle's own writes.
struct OverlaySurface<'a> {
    size: u32,
    base: &'a [f32],
    writes: BTreeMap<usize, f32>,
}

impl<'a> OverlaySurface<'a> {
    fn new(size: u32, base: &'a [f32]) -> Self {
        Self {
            size,
            base,
            writes: BTreeMap::new(),
        }
    }

    /// Per-cell change relative to the snapshot, in index order.
    fn into_deltas(self) -> Vec<(usize, f32)> {
        let base = self.base;
        self.writes
            .into_iter()
            .map(|(idx, value)| (idx, value - base[idx]))
            .filter(|&(_, delta)| delta != 0.0)
            .collect()
    }
}

impl HeightSurface for OverlaySurface<'_> {
    fn size(&self) -> u32 {
        self.size
    }

    #[inline]
    fn get(&self, idx: usize) -> f32 {
        match self.writes.get(&idx) {
            Some(&value) => value,
            None => self.base[idx],
        }
    }

    fn set(&mut self, idx: usize, value: f32) {
        self.writes.insert(idx, value);
    }
}

/// Bilinear height and gradient. `x`, `y` must lie in `[0, size - 1)`.
fn height_and_gradient<S: HeightSurface>(surface: &S, x: f32, y: f32) -> (f32, f32, f32) {
    let n = surface.size() as usize;
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;
    let i = y0 * n + x0;
    let h00 = surface.get(i);
    let h10 = surface.get(i + 1);
    let h01 = surface.get(i + n);
    let h11 = surface.get(i + n + 1);

    let height = h00 * (1.0 - fx) * (1.0 - fy)
        + h10 * fx * (1.0 - fy)
        + h01 * (1.0 - fx) * fy
        + h11 * fx * fy;
    let gx = (h10 - h00) * (1.0 - fy) + (h11 - h01) * fy;
    let gy = (h01 - h00) * (1.0 - fx) + (h11 - h10) * fx;
    (height, gx, gy)
}

/// Smooth `(1 - d²/r²)²` brush over the disc of radius `r`.
#[derive(Debug, Clone)]
struct Kernel {
    offsets: Vec<(i32, i32, f32)>,
}

impl Kernel {
    fn new(radius: u32) -> Self {
        let r = radius as i32;
        let r2 = (radius * radius) as f32;
        let mut offsets = Vec::new();
        for dy in -r..=r {
            for dx in -r..=r {
                let d2 = (dx * dx + dy * dy) as f32;
                if d2 < r2 {
                    let t = 1.0 - d2 / r2;
                    offsets.push((dx, dy, t * t));
                }
            }
        }
        Self { offsets }
    }

    /// In-bounds cells around `(cx, cy)` with weights renormalised to 1.
    fn footprint(&self, size: u32, cx: u32, cy: u32, out: &mut Vec<(usize, f32)>) {
        out.clear();
        let n = size as i32;
        let mut total = 0.0f32;
        for &(dx, dy, w) in &self.offsets {
            let x = cx as i32 + dx;
            let y = cy as i32 + dy;
            if x < 0 || y < 0 || x >= n || y >= n {
                continue;
            }
            out.push(((y * n + x) as usize, w));
            total += w;
        }
        if total > 0.0 {
            for entry in out.iter_mut() {
                entry.1 /= total;
            }
        }
    }
}

/// Spawn distribution with probability proportional to elevation squared.
struct SpawnTable {
    size: u32,
    cumulative: Vec<f64>,
}

impl SpawnTable {
    fn build(size: u32, values: &[f32]) -> Self {
        let mut running = 0.0f64;
        let cumulative = values
            .iter()
            .map(|&h| {
                if h.is_finite() && h > 0.0 {
                    running += (h as f64) * (h as f64);
                }
                running
            })
            .collect();
        Self { size, cumulative }
    }

    fn sample(&self, rng: &mut ChaCha8Rng) -> (f32, f32) {
        let cells = self.cumulative.len();
        let total = self.cumulative.last().copied().unwrap_or(0.0);
        let idx = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            self.cumulative
                .partition_point(|&c| c <= target)
                .min(cells - 1)
        } else {
            rng.gen_range(0..cells)
        };
        let n = self.size as usize;
        let max_coord = (self.size - 1) as f32 - 1e-3;
        let x = ((idx % n) as f32 + rng.gen::<f32>()).min(max_coord);
        let y = ((idx / n) as f32 + rng.gen::<f32>()).min(max_coord);
        (x, y)
    }
}

#[derive(Debug, Clone, Copy)]
struct ParticleRun {
    eroded: f64,
    deposited: f64,
    lost: f64,
    steps: u32,
    end: Termination,
}

/// Hydraulic erosion stage.
#[derive(Debug, Clone)]
pub struct HydraulicErosion {
    seed: u64,
    config: ErosionConfig,
    kernel: Kernel,
}

impl HydraulicErosion {
    pub const NAME: &'static str = "erosion";

    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            seed: config.seed,
            config: config.erosion.clone(),
            kernel: Kernel::new(config.erosion.radius),
        }
    }

    /// Independent stream per particle so trajectories do not depend on
    /// evaluation order.
    fn particle_rng(&self, index: u32) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ EROSION_SEED_SALT);
        rng.set_stream(index as u64);
        rng
    }

    fn erode<S: HeightSurface>(
        &self,
        surface: &mut S,
        cx: u32,
        cy: u32,
        amount: f32,
        scratch: &mut Vec<(usize, f32)>,
    ) -> f64 {
        self.kernel.footprint(surface.size(), cx, cy, scratch);
        let mut removed = 0.0f64;
        for &(idx, w) in scratch.iter() {
            let h = surface.get(idx);
            let take = (amount * w).min(h.max(0.0));
            if take <= 0.0 {
                continue;
            }
            let next = (h - take).max(0.0);
            surface.set(idx, next);
            removed += h as f64 - next as f64;
        }
        removed
    }

    fn deposit<S: HeightSurface>(
        &self,
        surface: &mut S,
        cx: u32,
        cy: u32,
        amount: f32,
        scratch: &mut Vec<(usize, f32)>,
    ) -> f64 {
        self.kernel.footprint(surface.size(), cx, cy, scratch);
        let mut placed = 0.0f64;
        for &(idx, w) in scratch.iter() {
            placed += self.add_clamped(surface, idx, amount * w);
        }
        placed
    }

    /// Raise one cell by up to `amount` without crossing the ceiling.
    fn add_clamped<S: HeightSurface>(&self, surface: &mut S, idx: usize, amount: f32) -> f64 {
        let h = surface.get(idx);
        let room = (self.config.ceiling - h).max(0.0);
        let put = amount.min(room);
        if put <= 0.0 {
            return 0.0;
        }
        let next = (h + put).min(self.config.ceiling.max(h));
        surface.set(idx, next);
        next as f64 - h as f64
    }

    fn simulate_particle<S: HeightSurface>(
        &self,
        surface: &mut S,
        potential: &PotentialField,
        scale: TerrainScale,
        start: (f32, f32),
        index: u32,
        scratch: &mut Vec<(usize, f32)>,
    ) -> Result<ParticleRun, TerrainError> {
        let cfg = &self.config;
        let n = surface.size();
        let limit = (n - 1) as f32;
        let step_m = cfg.step_length * scale.cell_size_m;
        let diverged = |detail: String| TerrainError::NumericDivergence {
            particle: index as u64,
            detail,
        };

        let (mut x, mut y) = start;
        let (mut dir_x, mut dir_y) = (0.0f32, 0.0f32);
        let mut velocity = 0.0f32;
        let mut water = cfg.initial_water;
        let mut sediment = 0.0f64;
        let mut run = ParticleRun {
            eroded: 0.0,
            deposited: 0.0,
            lost: 0.0,
            steps: 0,
            end: Termination::StepLimit,
        };

        let end = loop {
            if run.steps >= cfg.max_steps {
                break Termination::StepLimit;
            }
            let cx = x as u32;
            let cy = y as u32;
            let (h_old, gx, gy) = height_and_gradient(surface, x, y);
            dir_x = dir_x * cfg.inertia - gx * (1.0 - cfg.inertia);
            dir_y = dir_y * cfg.inertia - gy * (1.0 - cfg.inertia);
            let len = (dir_x * dir_x + dir_y * dir_y).sqrt();
            if !len.is_finite() || !h_old.is_finite() {
                return Err(diverged(format!(
                    "non-finite gradient at ({x:.2}, {y:.2}) after {} steps",
                    run.steps
                )));
            }
            if len < MIN_DIRECTION {
                break Termination::FlatGradient;
            }
            dir_x /= len;
            dir_y /= len;

            let nx = x + dir_x * cfg.step_length;
            let ny = y + dir_y * cfg.step_length;
            run.steps += 1;
            if !(nx >= 0.0 && nx < limit && ny >= 0.0 && ny < limit) {
                break Termination::LeftGrid;
            }

            let (h_new, _, _) = height_and_gradient(surface, nx, ny);
            if !h_new.is_finite() {
                return Err(diverged(format!("non-finite height at ({nx:.2}, {ny:.2})")));
            }
            let drop = h_old - h_new;
            velocity = (velocity * velocity + drop * cfg.gravity).max(0.0).sqrt();
            let sin_angle = if drop > 0.0 {
                (drop * scale.vertical_scale_m / step_m).atan().sin()
            } else {
                0.0
            };
            let capacity =
                (velocity * water * cfg.capacity_factor * sin_angle).max(cfg.min_capacity) as f64;

            if sediment < capacity {
                let cell = (cy * n + cx) as usize;
                let rate = cfg.erosion_rate * (0.5 + (1.0 - potential.at(cell)));
                let amount = (rate as f64 * (capacity - sediment)).min(drop.max(0.0) as f64);
                if amount > 0.0 {
                    let removed = self.erode(surface, cx, cy, amount as f32, scratch);
                    sediment += removed;
                    run.eroded += removed;
                }
            } else {
                let amount = cfg.deposition_rate as f64 * (sediment - capacity);
                if amount > 0.0 {
                    let placed = self.deposit(surface, cx, cy, amount as f32, scratch);
                    sediment -= placed;
                    run.deposited += placed;
                }
            }
            if !velocity.is_finite() || !sediment.is_finite() {
                return Err(diverged(format!(
                    "velocity {velocity} sediment {sediment} at step {}",
                    run.steps
                )));
            }

            water *= 1.0 - cfg.evaporation_rate;
            x = nx;
            y = ny;
            if water < cfg.min_water {
                break Termination::Evaporated;
            }
        };

        // Leftover sediment settles through the deposit kernel.
        let placed = if end != Termination::LeftGrid && sediment > 0.0 {
            self.deposit(surface, x as u32, y as u32, sediment as f32, scratch)
        } else {
            0.0
        };
        if !placed.is_finite() {
            return Err(diverged("non-finite final deposit".to_string()));
        }
        run.deposited += placed;
        run.lost += sediment - placed;
        run.end = end;
        Ok(run)
    }

    fn run_sequential(
        &self,
        values: &mut [f32],
        size: u32,
        ctx: &StageContext<'_>,
        stats: &mut ErosionStats,
    ) -> Result<(), TerrainError> {
        let total = self.config.particles;
        let mut scratch = Vec::new();
        for (batch, start) in (0..total).step_by(self.config.batch_size as usize).enumerate() {
            ctx.cancel.check(Self::NAME)?;
            let end = start.saturating_add(self.config.batch_size).min(total);
            let spawn = SpawnTable::build(size, values);
            let mut surface = JournaledSurface::new(size, values);
            for index in start..end {
                let mut rng = self.particle_rng(index);
                let origin = spawn.sample(&mut rng);
                match self.simulate_particle(
                    &mut surface,
                    ctx.potential,
                    ctx.scale,
                    origin,
                    index,
                    &mut scratch,
                ) {
                    Ok(run) => {
                        surface.commit();
                        stats.total_eroded += run.eroded;
                        stats.total_deposited += run.deposited;
                        stats.record_run(&run);
                    }
                    Err(err) => {
                        surface.rollback();
                        stats.record_discard(index, &err);
                    }
                }
            }
            self.finish_batch(batch as u32, end, ctx, stats);
        }
        Ok(())
    }

    fn run_parallel(
        &self,
        values: &mut [f32],
        size: u32,
        ctx: &StageContext<'_>,
        stats: &mut ErosionStats,
    ) -> Result<(), TerrainError> {
        let total = self.config.particles;
        let ceiling = self.config.ceiling;
        for (batch, start) in (0..total).step_by(self.config.batch_size as usize).enumerate() {
            ctx.cancel.check(Self::NAME)?;
            let end = start.saturating_add(self.config.batch_size).min(total);
            let snapshot: &[f32] = &*values;
            let spawn = SpawnTable::build(size, snapshot);
            let results: Vec<Result<(ParticleRun, Vec<(usize, f32)>), TerrainError>> = (start
                ..end)
                .into_par_iter()
                .map(|index| {
                    let mut rng = self.particle_rng(index);
                    let origin = spawn.sample(&mut rng);
                    let mut overlay = OverlaySurface::new(size, snapshot);
                    let mut scratch = Vec::new();
                    let run = self.simulate_particle(
                        &mut overlay,
                        ctx.potential,
                        ctx.scale,
                        origin,
                        index,
                        &mut scratch,
                    )?;
                    Ok((run, overlay.into_deltas()))
                })
                .collect();

            // Fork-join barrier: merge in particle order, clamping again since
            // overlays were computed against the same snapshot.
            for (offset, result) in results.into_iter().enumerate() {
                match result {
                    Ok((run, deltas)) => {
                        for (idx, delta) in deltas {
                            let h = values[idx];
                            let mut next = (h + delta).max(0.0);
                            if delta > 0.0 {
                                next = next.min(ceiling.max(h));
                            }
                            values[idx] = next;
                            let applied = next as f64 - h as f64;
                            if applied < 0.0 {
                                stats.total_eroded -= applied;
                            } else {
                                stats.total_deposited += applied;
                            }
                        }
                        stats.record_run(&run);
                    }
                    Err(err) => stats.record_discard(start + offset as u32, &err),
                }
            }
            self.finish_batch(batch as u32, end, ctx, stats);
        }
        Ok(())
    }

    fn finish_batch(&self, batch: u32, done: u32, ctx: &StageContext<'_>, stats: &mut ErosionStats) {
        stats.batches = batch + 1;
        tracing::debug!(
            target: "terrain::erosion",
            batch,
            particles_done = done,
            eroded = stats.total_eroded,
            deposited = stats.total_deposited,
            "erosion.batch"
        );
        ctx.progress.emit(ProgressEvent::ErosionBatch {
            batch,
            particles_done: done as u64,
            particles_total: self.config.particles as u64,
        });
    }
}

impl Stage for HydraulicErosion {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn run(
        &self,
        mut grid: ElevationGrid,
        ctx: &StageContext<'_>,
    ) -> Result<(ElevationGrid, StageStats), TerrainError> {
        let size = grid.size();
        if ctx.potential.size() != size {
            return Err(TerrainError::InvariantViolation {
                stage: Self::NAME,
                detail: format!(
                    "potential field is {} cells wide, grid is {}",
                    ctx.potential.size(),
                    size
                ),
            });
        }

        let mut stats = ErosionStats::new(self.config.mode);
        let before = grid.total();
        if size >= 2 && self.config.particles > 0 {
            match self.config.mode {
                ErosionMode::Sequential => {
                    self.run_sequential(grid.values_mut(), size, ctx, &mut stats)?
                }
                ErosionMode::ParallelBatches => {
                    self.run_parallel(grid.values_mut(), size, ctx, &mut stats)?
                }
            }
        }
        stats.net_change = grid.total() - before;

        tracing::info!(
            target: "terrain::erosion",
            mode = ?stats.mode,
            particles = stats.particles,
            eroded = stats.total_eroded,
            deposited = stats.total_deposited,
            lost = stats.sediment_lost,
            discarded = stats.discarded_particles,
            balance_error = stats.mass_balance_error(),
            "erosion.completed"
        );
        Ok((grid, StageStats::new(Self::NAME, StageDetail::Erosion(stats))))
    }
}
