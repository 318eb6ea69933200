use serde::{Deserialize, Serialize};

/// Identity of a demand line. Two lines can share a length yet differ in
/// downstream processing (holes, bends, originating piece), so the key never
/// degrades to the raw length.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piece_code: Option<String>,
}

impl SegmentKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            piece_code: None,
        }
    }

    pub fn with_piece_code(mut self, piece_code: impl Into<String>) -> Self {
        self.piece_code = Some(piece_code.into());
        self
    }
}

impl std::fmt::Display for SegmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.piece_code {
            Some(piece) => write!(f, "{}/{}", piece, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Machine {
    /// Cuts one bar at a time.
    #[default]
    Laser,
    /// Cuts a stack of bars at once, one bundle factor per cut.
    Bundler,
}

impl std::fmt::Display for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Machine::Laser => write!(f, "laser"),
            Machine::Bundler => write!(f, "bundler"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemandLine {
    pub key: SegmentKey,
    pub length: f64,
    pub quantity: u32,
    #[serde(default)]
    pub machine: Machine,
}

impl DemandLine {
    pub fn new(key: SegmentKey, length: f64, quantity: u32) -> Self {
        Self {
            key,
            length,
            quantity,
            machine: Machine::Laser,
        }
    }

    pub fn on(mut self, machine: Machine) -> Self {
        self.machine = machine;
        self
    }
}

/// One way to cut a single bar. `counts[i]` belongs to the i-th demand line
/// of the partition the pattern was enumerated for; lengths are in scaled
/// units.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pattern {
    pub counts: Vec<u32>,
    pub material_used: i64,
}

impl Pattern {
    pub fn material_for(counts: &[u32], lengths: &[i64], kerf: i64, trim: i64) -> i64 {
        let pieces: i64 = counts.iter().map(|&c| c as i64).sum();
        let cut: i64 = counts
            .iter()
            .zip(lengths)
            .map(|(&c, &len)| c as i64 * len)
            .sum();
        cut + pieces * kerf + trim
    }

    pub fn waste(&self, stock: i64) -> i64 {
        stock - self.material_used
    }

    pub fn distinct_segments(&self) -> usize {
        self.counts.iter().filter(|&&c| c > 0).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentCount {
    pub key: SegmentKey,
    pub length: f64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanRow {
    pub machine: Machine,
    pub segments: Vec<SegmentCount>,
    /// Bars cut with this pattern.
    pub bars: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_factor: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundles: Option<u32>,
    /// Length consumed by pieces and kerf, trim excluded.
    pub used_length: f64,
    /// Unusable rest of the bar, trim included.
    pub waste: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentTally {
    pub key: SegmentKey,
    pub length: f64,
    pub machine: Machine,
    pub required: u32,
    pub produced: u64,
    pub surplus: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub stock_length: f64,
    pub rows: Vec<PlanRow>,
    pub tallies: Vec<SegmentTally>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub total_bars: u64,
    pub total_waste: f64,
    pub waste_percent: f64,
    pub bundled_bars: u64,
    pub manual_bars: u64,
    pub pattern_count: usize,
}

impl Plan {
    pub fn total_bars(&self) -> u64 {
        self.rows.iter().map(|r| r.bars as u64).sum()
    }

    pub fn total_waste(&self) -> f64 {
        self.rows.iter().map(|r| r.waste * r.bars as f64).sum()
    }

    pub fn waste_percent(&self) -> f64 {
        let total_stock = self.stock_length * self.total_bars() as f64;
        if total_stock == 0.0 {
            return 0.0;
        }
        self.total_waste() / total_stock * 100.0
    }

    pub fn summary(&self) -> PlanSummary {
        let bundled_bars = self
            .rows
            .iter()
            .filter(|r| r.bundle_factor.is_some_and(|f| f > 1))
            .map(|r| r.bars as u64)
            .sum();
        let manual_bars = self
            .rows
            .iter()
            .filter(|r| r.bundle_factor == Some(1))
            .map(|r| r.bars as u64)
            .sum();
        PlanSummary {
            total_bars: self.total_bars(),
            total_waste: self.total_waste(),
            waste_percent: self.waste_percent(),
            bundled_bars,
            manual_bars,
            pattern_count: self.rows.len(),
        }
    }
}
