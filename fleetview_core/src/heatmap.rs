//! Occupancy heatmap with geometric decay.
//!
//! Each tick every cell decays by a constant factor, then every robot
//! position adds a fixed increment to its cell, capped at `max_density`.
//! Cells are created on first visit and never deleted.

use crate::config::HeatmapConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Grid cell addressed by row (y) and column (x).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HeatCell {
    pub row: i64,
    pub col: i64,
}

/// What the accumulator does while the heatmap layer is hidden.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeatmapMode {
    /// Keep accumulating so re-enabling shows recent history
    #[default]
    Background,
    /// Freeze accumulation and decay until shown again
    PauseWhenHidden,
}

pub struct HeatmapAccumulator {
    config: HeatmapConfig,
    cells: HashMap<HeatCell, f64>,
    ticks: u64,
}

impl HeatmapAccumulator {
    pub fn new(config: HeatmapConfig) -> Self {
        Self {
            config,
            cells: HashMap::new(),
            ticks: 0,
        }
    }

    /// Whether a tick should run given the layer's visibility.
    pub fn is_active(&self, visible: bool) -> bool {
        visible || self.config.mode == HeatmapMode::Background
    }

    /// Maps a world position to its grid cell.
    pub fn cell_for(&self, x: f64, y: f64) -> HeatCell {
        HeatCell {
            row: (y / self.config.cell_size).floor() as i64,
            col: (x / self.config.cell_size).floor() as i64,
        }
    }

    /// World-space origin (minimum corner) of a cell.
    pub fn cell_origin(&self, cell: HeatCell) -> (f64, f64) {
        (
            cell.col as f64 * self.config.cell_size,
            cell.row as f64 * self.config.cell_size,
        )
    }

    pub fn cell_size(&self) -> f64 {
        self.config.cell_size
    }

    /// Decays all cells, then deposits heat at each position.
    pub fn tick<I>(&mut self, positions: I)
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let decay = self.config.decay;
        for density in self.cells.values_mut() {
            *density *= decay;
            if *density < f64::MIN_POSITIVE {
                *density = 0.0;
            }
        }

        let increment = self.config.increment;
        let cap = self.config.max_density;
        for (x, y) in positions {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            let cell = self.cell_for(x, y);
            let density = self.cells.entry(cell).or_insert(0.0);
            *density = (*density + increment).min(cap);
        }
        self.ticks += 1;
    }

    pub fn density(&self, cell: HeatCell) -> f64 {
        self.cells.get(&cell).copied().unwrap_or(0.0)
    }

    /// Every cell ever visited with its current density.
    pub fn snapshot(&self) -> HashMap<HeatCell, f64> {
        self.cells.clone()
    }

    /// Cells worth drawing, with density normalized to [0, 1] by the cap.
    pub fn visible_cells(&self) -> Vec<(HeatCell, f64)> {
        let threshold = self.config.render_threshold;
        let cap = self.config.max_density;
        let mut cells: Vec<(HeatCell, f64)> = self
            .cells
            .iter()
            .filter(|(_, density)| **density > threshold)
            .map(|(cell, density)| (*cell, (density / cap).clamp(0.0, 1.0)))
            .collect();
        cells.sort_by_key(|(cell, _)| *cell);
        cells
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
