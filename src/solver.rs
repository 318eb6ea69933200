use crate::allocate::{self, Allocation, CoveragePolicy};
use crate::bundle::{self, BundlePolicy};
use crate::cache::{DirStore, MemoryStore, PatternCache, PatternStore, Signature};
use crate::config::EngineConfig;
use crate::error::{OptimizeError, Result};
use crate::request::OptimizeRequest;
use crate::scale::Scaler;
use crate::types::{DemandLine, Machine, Plan, PlanRow, SegmentCount, SegmentTally};

/// Machine-specific cutting parameters of one partition, in scaled units.
struct StockProfile {
    stock: i64,
    kerf: i64,
    trim: i64,
}

pub struct Solver {
    config: EngineConfig,
    cache: PatternCache,
}

impl Solver {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let store: Box<dyn PatternStore> = match &config.cache_dir {
            Some(dir) => Box::new(DirStore::new(dir).map_err(|e| {
                OptimizeError::InvalidInput(format!("cannot open cache dir {}: {e}", dir.display()))
            })?),
            None => Box::new(MemoryStore::with_max_bytes(config.memory_cache_bytes)),
        };
        let cache = PatternCache::new(store, config.solution_limit);
        Ok(Self { config, cache })
    }

    pub fn solve(&self, request: &OptimizeRequest) -> Result<Plan> {
        let config = request.effective_config(&self.config);
        self.plan(request.stock_length, &request.demand_lines(), &config)
    }

    /// Plans `lines` on bars of `stock_length`. Laser rows come first, then
    /// bundler rows; tallies follow the merged line order.
    pub fn plan(
        &self,
        stock_length: f64,
        lines: &[DemandLine],
        config: &EngineConfig,
    ) -> Result<Plan> {
        if !stock_length.is_finite() || stock_length <= 0.0 {
            return Err(OptimizeError::InvalidInput(format!(
                "stock length must be positive, got {stock_length}"
            )));
        }
        if lines.is_empty() {
            return Err(OptimizeError::InvalidInput("no demand lines".to_string()));
        }
        for line in lines {
            if !line.length.is_finite() || line.length <= 0.0 {
                return Err(OptimizeError::InvalidInput(format!(
                    "segment '{}' has non-positive length {}",
                    line.key, line.length
                )));
            }
            if line.quantity == 0 {
                return Err(OptimizeError::InvalidInput(format!(
                    "segment '{}' has zero quantity",
                    line.key
                )));
            }
        }

        let merged = merge_lines(lines);
        tracing::info!(
            stock_length,
            lines = lines.len(),
            merged = merged.len(),
            "planning cut request"
        );

        // Every partition is checked before any of them is solved.
        let mut partitions = Vec::new();
        for machine in [Machine::Laser, Machine::Bundler] {
            let lines: Vec<DemandLine> = merged
                .iter()
                .filter(|l| l.machine == machine)
                .cloned()
                .collect();
            if !lines.is_empty() {
                partitions.push(Partition::prepare(machine, stock_length, lines, config)?);
            }
        }

        let mut rows = Vec::new();
        let mut tallies = Vec::new();
        for partition in &partitions {
            let allocation = self.allocate_partition(partition, config)?;
            rows.extend(partition.rows(&allocation));
            tallies.extend(partition.tallies(&allocation));
        }

        let plan = Plan {
            stock_length,
            rows,
            tallies,
        };
        tracing::info!(
            bars = plan.total_bars(),
            patterns = plan.rows.len(),
            waste_percent = plan.waste_percent(),
            "cut plan ready"
        );
        Ok(plan)
    }

    fn allocate_partition(
        &self,
        partition: &Partition,
        config: &EngineConfig,
    ) -> Result<Allocation> {
        let signature = partition.signature();
        let patterns = self.cache.get_or_compute(&signature);
        if patterns.is_empty() {
            return Err(OptimizeError::NoFeasiblePattern {
                stock_length: partition.stock_length,
                lengths: partition.lines.iter().map(|l| l.length).collect(),
                kerf: partition.kerf,
                trim: partition.trim,
                tolerance: partition.tolerance,
            });
        }

        let demand: Vec<u32> = partition.lines.iter().map(|l| l.quantity).collect();
        if let Some(i) = allocate::uncovered_segment(&patterns, &demand) {
            return Err(OptimizeError::UncoverableSegment {
                key: partition.lines[i].key.clone(),
            });
        }

        tracing::debug!(
            machine = %partition.machine,
            patterns = patterns.len(),
            tolerance = partition.tolerance,
            "allocating partition"
        );

        let budget = config.time_budget();
        let stock = partition.profile.stock;
        match partition.machine {
            Machine::Laser => {
                let cap = config.laser.max_patterns;
                let policy = CoveragePolicy {
                    max_surplus: config.laser.max_surplus,
                    max_patterns: (cap > 0).then_some(cap),
                };
                allocate::allocate(&patterns, &demand, stock, policy, budget)
            }
            Machine::Bundler => {
                let policy = BundlePolicy {
                    factors: config.bundler.bundle_factors.clone(),
                    manual_cut_limit: config.bundler.manual_cut_limit,
                    max_over_production: config.bundler.max_over_production,
                    max_segments_per_pattern: config.bundler.max_segments_per_pattern,
                };
                bundle::allocate_bundled(&patterns, &demand, stock, &policy, budget)
            }
        }
    }
}

/// The lines of one machine with that machine's cutting parameters.
struct Partition {
    machine: Machine,
    stock_length: f64,
    kerf: f64,
    trim: f64,
    tolerance: f64,
    profile: StockProfile,
    lines: Vec<DemandLine>,
    lengths: Vec<i64>,
}

impl Partition {
    fn prepare(
        machine: Machine,
        stock_length: f64,
        lines: Vec<DemandLine>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let (kerf, trim) = match machine {
            Machine::Laser => (config.laser.kerf, config.laser.trim),
            Machine::Bundler => (config.bundler.kerf, config.bundler.trim),
        };
        let profile = StockProfile {
            stock: Scaler::to_units(stock_length)?,
            kerf: Scaler::to_units(kerf)?,
            trim: Scaler::to_units(trim)?,
        };
        let usable = profile.stock - profile.trim;
        if usable <= 0 {
            return Err(OptimizeError::InvalidInput(format!(
                "trim {trim} leaves nothing of a {stock_length} bar on the {machine}"
            )));
        }

        let mut lengths = Vec::with_capacity(lines.len());
        for line in &lines {
            let units = Scaler::to_units(line.length)?;
            if units > usable {
                return Err(OptimizeError::SegmentTooLong {
                    key: line.key.clone(),
                    length: line.length,
                    usable: Scaler::to_length(usable),
                });
            }
            lengths.push(units);
        }

        Ok(Self {
            machine,
            stock_length,
            kerf,
            trim,
            tolerance: config.tolerance.resolve(&lines),
            profile,
            lines,
            lengths,
        })
    }

    fn signature(&self) -> Signature {
        Signature {
            stock: self.profile.stock,
            lengths: self.lengths.clone(),
            kerf: self.profile.kerf,
            tolerance: self.tolerance,
            trim: self.profile.trim,
        }
    }

    fn rows(&self, allocation: &Allocation) -> Vec<PlanRow> {
        allocation
            .entries
            .iter()
            .map(|entry| {
                let used = entry.pattern.material_used - self.profile.trim;
                PlanRow {
                    machine: self.machine,
                    segments: entry
                        .pattern
                        .counts
                        .iter()
                        .zip(&self.lines)
                        .filter(|&(&count, _)| count > 0)
                        .map(|(&count, line)| SegmentCount {
                            key: line.key.clone(),
                            length: line.length,
                            count,
                        })
                        .collect(),
                    bars: entry.multiplicity,
                    bundle_factor: entry.bundle_factor,
                    bundles: entry.bundles,
                    used_length: Scaler::to_length(used),
                    waste: Scaler::to_length(self.profile.stock - used),
                }
            })
            .collect()
    }

    fn tallies(&self, allocation: &Allocation) -> Vec<SegmentTally> {
        allocation
            .production(self.lines.len())
            .into_iter()
            .zip(&self.lines)
            .map(|(produced, line)| SegmentTally {
                key: line.key.clone(),
                length: line.length,
                machine: self.machine,
                required: line.quantity,
                produced,
                surplus: produced.saturating_sub(line.quantity as u64),
            })
            .collect()
    }
}

/// Sums quantities of lines sharing key, length and machine. The merged line
/// sits where its first occurrence was.
pub fn merge_lines(lines: &[DemandLine]) -> Vec<DemandLine> {
    let mut merged: Vec<DemandLine> = Vec::with_capacity(lines.len());
    for line in lines {
        match merged
            .iter_mut()
            .find(|m| m.key == line.key && m.length == line.length && m.machine == line.machine)
        {
            Some(existing) => existing.quantity = existing.quantity.saturating_add(line.quantity),
            None => merged.push(line.clone()),
        }
    }
    merged
}
