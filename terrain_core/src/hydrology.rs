use std::f32::consts::SQRT_2;

use bevy::prelude::UVec2;
use rayon::prelude::*;
use serde::{Serialize, Serializer};

use crate::config::{HydrologyConfig, TerrainConfig, TerrainScale};
use crate::grid::{neighbor_dirs, quantile, ElevationGrid};

/// Flow code for cells without a strictly lower neighbour.
pub const SINK: u8 = 255;

const ARROWS: [char; 8] = ['→', '↗', '↑', '↖', '←', '↙', '↓', '↘'];

/// D8 steepest-descent direction per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDirectionGrid {
    size: u32,
    codes: Vec<u8>,
}

impl FlowDirectionGrid {
    /// Rows are independent, so they are computed in parallel.
    pub fn from_elevation(grid: &ElevationGrid) -> Self {
        let n = grid.size() as usize;
        let mut codes = vec![SINK; n * n];
        if n > 0 {
            codes.par_chunks_mut(n).enumerate().for_each(|(y, row)| {
                for (x, code) in row.iter_mut().enumerate() {
                    *code = steepest_descent(grid, x as u32, y as u32);
                }
            });
        }
        Self {
            size: grid.size(),
            codes,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn codes(&self) -> &[u8] {
        &self.codes
    }

    pub fn code(&self, x: u32, y: u32) -> u8 {
        self.codes[(y * self.size + x) as usize]
    }

    pub fn downstream(&self, idx: usize) -> Option<usize> {
        let code = self.codes[idx];
        if code == SINK {
            return None;
        }
        let (dx, dy) = neighbor_dirs()[code as usize];
        let n = self.size as i32;
        let x = (idx as i32 % n) + dx;
        let y = (idx as i32 / n) + dy;
        Some((y * n + x) as usize)
    }

    pub fn sink_count(&self) -> usize {
        self.codes.iter().filter(|&&c| c == SINK).count()
    }

    /// One arrow per cell, `·` for sinks.
    pub fn render(&self) -> String {
        self.codes
            .chunks(self.size.max(1) as usize)
            .map(|row| {
                row.iter()
                    .map(|&c| if c == SINK { '·' } else { ARROWS[c as usize] })
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// First strictly steeper neighbour in E, NE, N, NW, W, SW, S, SE order.
fn steepest_descent(grid: &ElevationGrid, x: u32, y: u32) -> u8 {
    let n = grid.size() as i32;
    let here = grid.sample(x, y);
    let mut best = SINK;
    let mut best_slope = 0.0f32;
    for (d, &(dx, dy)) in neighbor_dirs().iter().enumerate() {
        let nx = x as i32 + dx;
        let ny = y as i32 + dy;
        if nx < 0 || ny < 0 || nx >= n || ny >= n {
            continue;
        }
        let drop = here - grid.sample(nx as u32, ny as u32);
        if drop <= 0.0 {
            continue;
        }
        let distance = if dx == 0 || dy == 0 { 1.0 } else { SQRT_2 };
        let slope = drop / distance;
        if slope > best_slope {
            best_slope = slope;
            best = d as u8;
        }
    }
    best
}

/// Upstream cell count (including the cell itself) per cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowAccumulationGrid {
    size: u32,
    values: Vec<u32>,
}

impl FlowAccumulationGrid {
    /// Visits cells from highest to lowest, which is a topological order of
    /// the flow graph because every edge points strictly downhill.
    pub fn from_directions(grid: &ElevationGrid, directions: &FlowDirectionGrid) -> Self {
        let heights = grid.values();
        let mut order: Vec<usize> = (0..heights.len()).collect();
        order.sort_by(|&a, &b| heights[b].total_cmp(&heights[a]).then(a.cmp(&b)));

        let mut values = vec![1u32; heights.len()];
        for idx in order {
            if let Some(down) = directions.downstream(idx) {
                values[down] = values[down].saturating_add(values[idx]);
            }
        }
        Self {
            size: grid.size(),
            values,
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn values(&self) -> &[u32] {
        &self.values
    }

    #[inline]
    pub fn at(&self, idx: usize) -> u32 {
        self.values[idx]
    }

    pub fn max(&self) -> u32 {
        self.values.iter().copied().max().unwrap_or(0)
    }

    /// Flow delivered to terminal cells; always `size²`.
    pub fn sink_total(&self, directions: &FlowDirectionGrid) -> u64 {
        self.values
            .iter()
            .zip(directions.codes())
            .filter(|(_, &code)| code == SINK)
            .map(|(&acc, _)| acc as u64)
            .sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiverTermination {
    Sink,
    Confluence,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiverPath {
    pub id: u32,
    #[serde(serialize_with = "serialize_points")]
    pub points: Vec<UVec2>,
    pub drainage_cells: u32,
    pub drainage_km2: f64,
    pub length_m: f32,
    pub width_m: f32,
    pub strahler_order: u8,
    pub termination: RiverTermination,
    /// River this one flows into at its last point.
    pub joins: Option<u32>,
}

impl RiverPath {
    pub fn source(&self) -> Option<UVec2> {
        self.points.first().copied()
    }

    pub fn outlet(&self) -> Option<UVec2> {
        self.points.last().copied()
    }
}

fn serialize_points<S: Serializer>(points: &[UVec2], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(points.iter().map(|p| [p.x, p.y]))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DamSiteCandidate {
    #[serde(serialize_with = "serialize_point")]
    pub position: UVec2,
    pub river_id: u32,
    pub cross_valley_rise_m: f32,
    pub valley_width_m: f32,
    pub drainage_cells: u32,
    pub score: f32,
}

fn serialize_point<S: Serializer>(point: &UVec2, serializer: S) -> Result<S::Ok, S::Error> {
    [point.x, point.y].serialize(serializer)
}

#[derive(Debug, Clone, Serialize)]
pub struct HydrologySummary {
    pub sinks: usize,
    pub sink_total: u64,
    pub max_accumulation: u32,
    pub river_threshold: u32,
    pub rivers: usize,
    pub dam_sites: usize,
    pub longest_river_m: f32,
    pub max_strahler_order: u8,
}

/// Derived drainage artifacts for a finished terrain.
#[derive(Debug, Clone)]
pub struct Hydrology {
    pub directions: FlowDirectionGrid,
    pub accumulation: FlowAccumulationGrid,
    pub river_threshold: u32,
    pub rivers: Vec<RiverPath>,
    pub dam_sites: Vec<DamSiteCandidate>,
}

impl Hydrology {
    pub fn summary(&self) -> HydrologySummary {
        HydrologySummary {
            sinks: self.directions.sink_count(),
            sink_total: self.accumulation.sink_total(&self.directions),
            max_accumulation: self.accumulation.max(),
            river_threshold: self.river_threshold,
            rivers: self.rivers.len(),
            dam_sites: self.dam_sites.len(),
            longest_river_m: self.rivers.iter().map(|r| r.length_m).fold(0.0, f32::max),
            max_strahler_order: self
                .rivers
                .iter()
                .map(|r| r.strahler_order)
                .max()
                .unwrap_or(0),
        }
    }
}

/// A river cell's owner and its position along that river.
#[derive(Debug, Clone, Copy)]
struct Claim {
    river: u32,
    position: u32,
}

/// Flow directions, accumulation, river network and dam-site candidates.
#[derive(Debug, Clone)]
pub struct FlowExtractor {
    scale: TerrainScale,
    config: HydrologyConfig,
}

impl FlowExtractor {
    pub const NAME: &'static str = "hydrology";

    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            scale: config.scale(),
            config: config.hydrology.clone(),
        }
    }

    pub fn extract(&self, grid: &ElevationGrid) -> Hydrology {
        let directions = FlowDirectionGrid::from_elevation(grid);
        let accumulation = FlowAccumulationGrid::from_directions(grid, &directions);
        let river_threshold = self.river_threshold(&accumulation);
        let rivers = self.trace_rivers(grid, &directions, &accumulation, river_threshold);
        let dam_sites = self.find_dam_sites(grid, &accumulation, &rivers);

        let hydrology = Hydrology {
            directions,
            accumulation,
            river_threshold,
            rivers,
            dam_sites,
        };
        let summary = hydrology.summary();
        tracing::info!(
            target: "terrain::hydrology",
            sinks = summary.sinks,
            max_accumulation = summary.max_accumulation,
            river_threshold,
            rivers = summary.rivers,
            dam_sites = summary.dam_sites,
            max_order = summary.max_strahler_order,
            "hydrology.generated"
        );
        hydrology
    }

    fn river_threshold(&self, accumulation: &FlowAccumulationGrid) -> u32 {
        let mut sorted = accumulation.values().to_vec();
        sorted.sort_unstable();
        let percentile = quantile(&sorted, self.config.river_percentile).unwrap_or(0);
        percentile.max(self.config.min_accumulation)
    }

    fn trace_rivers(
        &self,
        grid: &ElevationGrid,
        directions: &FlowDirectionGrid,
        accumulation: &FlowAccumulationGrid,
        threshold: u32,
    ) -> Vec<RiverPath> {
        let n = grid.size();
        let cells = accumulation.values().len();
        let qualifying: Vec<bool> = accumulation.values().iter().map(|&a| a >= threshold).collect();
        let mut fed_by_river = vec![false; cells];
        for idx in 0..cells {
            if qualifying[idx] {
                if let Some(down) = directions.downstream(idx) {
                    fed_by_river[down] = true;
                }
            }
        }

        let heights = grid.values();
        let mut seeds: Vec<usize> = (0..cells)
            .filter(|&idx| qualifying[idx] && !fed_by_river[idx])
            .collect();
        seeds.sort_by(|&a, &b| heights[b].total_cmp(&heights[a]).then(a.cmp(&b)));

        let mut claims: Vec<Option<Claim>> = vec![None; cells];
        let mut rivers: Vec<RiverPath> = Vec::new();
        let mut join_positions: Vec<Option<u32>> = Vec::new();
        let mut discarded = 0usize;

        for seed in seeds {
            let mut path = vec![seed];
            let mut joined: Option<Claim> = None;
            let mut current = seed;
            while let Some(next) = directions.downstream(current) {
                path.push(next);
                if let Some(claim) = claims[next] {
                    joined = Some(claim);
                    break;
                }
                current = next;
            }
            if path.len() < self.config.min_length {
                discarded += 1;
                continue;
            }

            let id = rivers.len() as u32;
            let owned = if joined.is_some() {
                &path[..path.len() - 1]
            } else {
                &path[..]
            };
            for (position, &idx) in owned.iter().enumerate() {
                claims[idx] = Some(Claim {
                    river: id,
                    position: position as u32,
                });
            }

            let last = path[path.len() - 1];
            let drainage_cells = accumulation.at(last);
            let points: Vec<UVec2> = path
                .iter()
                .map(|&idx| UVec2::new(idx as u32 % n, idx as u32 / n))
                .collect();
            rivers.push(RiverPath {
                id,
                length_m: path_length_cells(&points) * self.scale.cell_size_m,
                points,
                drainage_cells,
                drainage_km2: drainage_cells as f64 * self.scale.cell_area_km2(),
                width_m: (self.config.base_width_m
                    * (drainage_cells as f32 / threshold.max(1) as f32).sqrt())
                .min(self.config.max_width_m),
                strahler_order: 1,
                termination: if joined.is_some() {
                    RiverTermination::Confluence
                } else {
                    RiverTermination::Sink
                },
                joins: joined.map(|c| c.river),
            });
            join_positions.push(joined.map(|c| c.position));
        }

        assign_strahler_orders(&mut rivers, &join_positions);
        tracing::debug!(
            target: "terrain::hydrology",
            accepted = rivers.len(),
            discarded,
            threshold,
            "hydrology.rivers_traced"
        );
        rivers
    }

    fn find_dam_sites(
        &self,
        grid: &ElevationGrid,
        accumulation: &FlowAccumulationGrid,
        rivers: &[RiverPath],
    ) -> Vec<DamSiteCandidate> {
        let cfg = &self.config.dams;
        let mut candidates = Vec::new();
        for river in rivers {
            let profiles: Vec<Option<CrossSection>> = (0..river.points.len())
                .map(|i| self.cross_section(grid, &river.points, i))
                .collect();
            for (i, profile) in profiles.iter().enumerate() {
                let Some(section) = profile else { continue };
                let point = river.points[i];
                let drainage = accumulation.at(grid.index(point.x, point.y));
                if drainage < cfg.min_accumulation || section.rise_m < cfg.min_rise_m {
                    continue;
                }
                let lo = i.saturating_sub(cfg.local_window);
                let hi = (i + cfg.local_window).min(profiles.len() - 1);
                let constriction = profiles[lo..=hi]
                    .iter()
                    .flatten()
                    .all(|other| other.rise_m <= section.rise_m);
                if !constriction {
                    continue;
                }
                candidates.push(DamSiteCandidate {
                    position: point,
                    river_id: river.id,
                    cross_valley_rise_m: section.rise_m,
                    valley_width_m: section.width_m,
                    drainage_cells: drainage,
                    score: section.rise_m * (drainage as f32).sqrt() / section.width_m,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.river_id.cmp(&b.river_id))
                .then(a.position.y.cmp(&b.position.y))
                .then(a.position.x.cmp(&b.position.x))
        });
        let spacing = cfg.min_spacing as i64;
        let mut accepted: Vec<DamSiteCandidate> = Vec::new();
        for candidate in candidates {
            if accepted.len() >= cfg.max_candidates {
                break;
            }
            let crowded = accepted.iter().any(|other| {
                let dx = other.position.x as i64 - candidate.position.x as i64;
                let dy = other.position.y as i64 - candidate.position.y as i64;
                dx * dx + dy * dy < spacing * spacing
            });
            if !crowded {
                accepted.push(candidate);
            }
        }
        accepted
    }

    /// Probe both banks perpendicular to the local flow at interior point `i`.
    fn cross_section(&self, grid: &ElevationGrid, points: &[UVec2], i: usize) -> Option<CrossSection> {
        if i == 0 || i + 1 >= points.len() {
            return None;
        }
        let prev = points[i - 1];
        let next = points[i + 1];
        let flow_x = next.x as i32 - prev.x as i32;
        let flow_y = next.y as i32 - prev.y as i32;
        let (step_x, step_y) = ((-flow_y).signum(), flow_x.signum());
        if step_x == 0 && step_y == 0 {
            return None;
        }

        let n = grid.size() as i32;
        let here = points[i];
        let bed = grid.sample(here.x, here.y);
        let vertical = self.scale.vertical_scale_m;
        let band = self.config.dams.rise_band_m / vertical;
        let probe = |sign: i32| -> (Option<f32>, u32) {
            let mut max_rise: Option<f32> = None;
            let mut in_band = 0u32;
            let mut contiguous = true;
            for k in 1..=self.config.dams.probe_radius as i32 {
                let x = here.x as i32 + sign * k * step_x;
                let y = here.y as i32 + sign * k * step_y;
                if x < 0 || y < 0 || x >= n || y >= n {
                    break;
                }
                let rise = grid.sample(x as u32, y as u32) - bed;
                max_rise = Some(max_rise.map_or(rise, |m: f32| m.max(rise)));
                if contiguous && rise <= band {
                    in_band += 1;
                } else {
                    contiguous = false;
                }
            }
            (max_rise, in_band)
        };

        let (left, left_band) = probe(1);
        let (right, right_band) = probe(-1);
        let rise = left?.min(right?) * vertical;
        let spacing = if step_x != 0 && step_y != 0 { SQRT_2 } else { 1.0 };
        let width_cells = 1 + left_band + right_band;
        Some(CrossSection {
            rise_m: rise,
            width_m: width_cells as f32 * spacing * self.scale.cell_size_m,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct CrossSection {
    rise_m: f32,
    width_m: f32,
}

fn path_length_cells(points: &[UVec2]) -> f32 {
    points
        .windows(2)
        .map(|w| {
            if w[0].x != w[1].x && w[0].y != w[1].y {
                SQRT_2
            } else {
                1.0
            }
        })
        .sum()
}

/// Strahler order at each river's outlet. Tributaries are always traced after
/// the river they join, so walking ids backwards sees children first.
fn assign_strahler_orders(rivers: &mut [RiverPath], join_positions: &[Option<u32>]) {
    let mut children: Vec<Vec<(u32, usize)>> = vec![Vec::new(); rivers.len()];
    for (child, river) in rivers.iter().enumerate() {
        if let (Some(parent), Some(position)) = (river.joins, join_positions[child]) {
            children[parent as usize].push((position, child));
        }
    }
    for id in (0..rivers.len()).rev() {
        let mut joins = std::mem::take(&mut children[id]);
        joins.sort_unstable();
        let mut order = 1u8;
        for (_, child) in joins {
            let incoming = rivers[child].strahler_order;
            order = if incoming == order {
                order.saturating_add(1)
            } else {
                order.max(incoming)
            };
        }
        rivers[id].strahler_order = order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cone(size: u32) -> ElevationGrid {
        let c = (size / 2) as f32;
        ElevationGrid::from_fn(size, |x, y| {
            let dx = x as f32 - c;
            let dy = y as f32 - c;
            (dx * dx + dy * dy).sqrt() / size as f32
        })
    }

    fn extractor(size: u32) -> FlowExtractor {
        let mut config = TerrainConfig::default().with_size(size);
        config.hydrology.min_accumulation = 2;
        config.hydrology.river_percentile = 0.5;
        config.hydrology.min_length = 2;
        FlowExtractor::new(&config)
    }

    #[test]
    fn cone_directions_point_inward() {
        let directions = FlowDirectionGrid::from_elevation(&cone(5));
        insta::assert_snapshot!(directions.render(), @r###"
        ↘↘↓↙↙
        ↘↘↓↙↙
        →→·←←
        ↗↗↑↖↖
        ↗↗↑↖↖
        "###);
    }

    #[test]
    fn ties_resolve_in_compass_order() {
        let mut grid = ElevationGrid::filled(3, 1.0);
        grid.set(2, 1, 0.0);
        grid.set(1, 0, 0.0);
        let directions = FlowDirectionGrid::from_elevation(&grid);
        assert_eq!(directions.code(1, 1), 0);
    }

    #[test]
    fn flat_grid_is_all_sinks() {
        let grid = ElevationGrid::filled(7, 0.4);
        let directions = FlowDirectionGrid::from_elevation(&grid);
        let accumulation = FlowAccumulationGrid::from_directions(&grid, &directions);
        assert_eq!(directions.sink_count(), 49);
        assert!(accumulation.values().iter().all(|&a| a == 1));
        assert_eq!(accumulation.sink_total(&directions), 49);
    }

    #[test]
    fn flow_is_conserved_and_downhill() {
        let grid = ElevationGrid::from_fn(33, |x, y| {
            let fx = x as f32 * 0.37;
            let fy = y as f32 * 0.23;
            0.5 + 0.25 * (fx.sin() * fy.cos()) + 0.001 * x as f32
        });
        let directions = FlowDirectionGrid::from_elevation(&grid);
        let accumulation = FlowAccumulationGrid::from_directions(&grid, &directions);
        assert_eq!(accumulation.sink_total(&directions), 33 * 33);
        for idx in 0..grid.len() {
            if let Some(down) = directions.downstream(idx) {
                assert!(grid.values()[idx] > grid.values()[down]);
                assert!(accumulation.at(down) > accumulation.at(idx));
            }
        }
    }

    #[test]
    fn cone_rivers_end_at_the_centre() {
        let size = 33;
        let hydrology = extractor(size).extract(&cone(size));
        let centre = UVec2::new(size / 2, size / 2);
        assert_eq!(hydrology.directions.sink_count(), 1);
        assert_eq!(hydrology.directions.code(centre.x, centre.y), SINK);
        assert_eq!(
            hydrology.accumulation.sink_total(&hydrology.directions),
            (size * size) as u64
        );
        assert!(!hydrology.rivers.is_empty());
        for river in &hydrology.rivers {
            match river.termination {
                RiverTermination::Sink => assert_eq!(river.outlet(), Some(centre)),
                RiverTermination::Confluence => {
                    let parent = &hydrology.rivers[river.joins.expect("joined") as usize];
                    assert!(parent.points.contains(&river.outlet().expect("outlet")));
                }
            }
        }
    }

    #[test]
    fn strahler_increments_only_on_equal_orders() {
        let river = |id: u32, joins: Option<u32>| RiverPath {
            id,
            points: vec![UVec2::ZERO, UVec2::X],
            drainage_cells: 2,
            drainage_km2: 0.0,
            length_m: 1.0,
            width_m: 1.0,
            strahler_order: 1,
            termination: RiverTermination::Sink,
            joins,
        };
        // 0 <- 1 <- 2, 0 <- 3 upstream of 1's junction.
        let mut rivers = vec![river(0, None), river(1, Some(0)), river(2, Some(1)), river(3, Some(0))];
        let positions = vec![None, Some(10), Some(4), Some(3)];
        assign_strahler_orders(&mut rivers, &positions);
        let orders: Vec<u8> = rivers.iter().map(|r| r.strahler_order).collect();
        assert_eq!(orders, vec![3, 2, 1, 1]);
    }

    #[test]
    fn dam_sites_prefer_narrow_gorges() {
        // A straight channel running south through a valley that pinches
        // between two spurs halfway down.
        let size = 48;
        let grid = ElevationGrid::from_fn(size, |x, y| {
            let across = (x as f32 - 24.0).abs();
            let pinch = if (22..=26).contains(&y) { 0.06 } else { 0.02 };
            0.9 - y as f32 * 0.01 + across * pinch
        });
        let mut config = TerrainConfig::default().with_size(size);
        config.hydrology.min_accumulation = 2;
        config.hydrology.river_percentile = 0.9;
        config.hydrology.dams.min_accumulation = 2;
        config.hydrology.dams.min_rise_m = 5.0;
        let hydrology = FlowExtractor::new(&config).extract(&grid);
        assert!(!hydrology.dam_sites.is_empty());
        let best = &hydrology.dam_sites[0];
        assert!((22..=26).contains(&best.position.y), "{best:?}");
        assert!(best.cross_valley_rise_m >= 5.0);
        assert!(hydrology.dam_sites.len() <= config.hydrology.dams.max_candidates);
    }
}
