use std::path::PathBuf;

use clap::Parser;
use cut_planner::request::{FactorList, LineRequest, OptimizeRequest, OptimizeResponse};
use cut_planner::types::{Machine, Plan};
use cut_planner::{EngineConfig, Solver};
use tracing::Level;

#[derive(Parser)]
#[command(name = "cut_planner", about = "1D cutting stock planner for steel bars")]
struct Cli {
    /// Stock bar length in mm (e.g. 6000)
    #[arg(long, required_unless_present = "request")]
    stock: Option<f64>,

    /// Laser cuts as NAME=LENGTH:QTY (e.g. A=2375.8:4 B=1162.2:8)
    #[arg(long = "cuts", num_args = 1..)]
    cuts: Vec<String>,

    /// Bundle saw cuts as NAME=LENGTH:QTY
    #[arg(long = "bundle-cuts", num_args = 1..)]
    bundle_cuts: Vec<String>,

    /// Trim in mm, applied to both machines
    #[arg(long)]
    trim: Option<f64>,

    /// Surplus allowed per segment on the laser
    #[arg(long)]
    max_surplus: Option<u32>,

    /// Distinct laser patterns allowed (0 = no limit)
    #[arg(long)]
    max_patterns: Option<u32>,

    /// Manual cuts (bundle factor 1) allowed on the bundle saw
    #[arg(long)]
    manual_cut_limit: Option<u32>,

    /// Bundle factors, e.g. "14 16 18 20"
    #[arg(long)]
    bundle_factors: Option<String>,

    /// Distinct segments allowed per bundled pattern (0 = no limit)
    #[arg(long = "max-segments")]
    max_segments: Option<usize>,

    /// Read the whole request from a JSON file instead
    #[arg(long, value_name = "FILE")]
    request: Option<PathBuf>,

    /// Engine configuration as JSON
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory for cached patterns
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Print the plan as JSON
    #[arg(long)]
    json: bool,
}

fn parse_cut(s: &str, machine: Machine) -> Result<LineRequest, String> {
    let (name, rest) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid cut '{}', expected NAME=LENGTH:QTY", s))?;
    let (length, qty) = rest
        .split_once(':')
        .ok_or_else(|| format!("invalid cut '{}', expected NAME=LENGTH:QTY", s))?;
    if name.is_empty() {
        return Err(format!("missing name in '{}'", s));
    }
    let length = length
        .parse::<f64>()
        .map_err(|_| format!("invalid length in '{}'", s))?;
    let quantity = qty
        .parse::<u32>()
        .map_err(|_| format!("invalid quantity in '{}'", s))?;
    if quantity == 0 {
        return Err(format!("quantity must be non-zero in '{}'", s));
    }
    Ok(LineRequest {
        name: name.to_string(),
        piece_code: None,
        length,
        quantity,
        machine,
    })
}

fn build_request(cli: &Cli) -> Result<OptimizeRequest, String> {
    let mut request = match &cli.request {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            serde_json::from_str(&raw)
                .map_err(|e| format!("invalid request {}: {}", path.display(), e))?
        }
        None => OptimizeRequest::default(),
    };

    if let Some(stock) = cli.stock {
        request.stock_length = stock;
    }
    for cut in &cli.cuts {
        request.lines.push(parse_cut(cut, Machine::Laser)?);
    }
    for cut in &cli.bundle_cuts {
        request.lines.push(parse_cut(cut, Machine::Bundler)?);
    }
    if request.lines.is_empty() {
        return Err("no cuts given, use --cuts, --bundle-cuts or --request".to_string());
    }

    request.trim = cli.trim.or(request.trim);
    request.max_surplus = cli.max_surplus.or(request.max_surplus);
    request.max_patterns = cli.max_patterns.or(request.max_patterns);
    request.manual_cut_limit = cli.manual_cut_limit.or(request.manual_cut_limit);
    request.max_segments_per_pattern = cli.max_segments.or(request.max_segments_per_pattern);
    if let Some(factors) = &cli.bundle_factors {
        request.bundle_factors = Some(FactorList::Text(factors.clone()));
    }
    Ok(request)
}

fn print_plan(plan: &Plan) {
    for (i, row) in plan.rows.iter().enumerate() {
        let segments: Vec<String> = row
            .segments
            .iter()
            .map(|s| format!("{}x {} ({})", s.count, s.key, s.length))
            .collect();
        let bundling = match (row.bundle_factor, row.bundles) {
            (Some(f), Some(b)) => {
                let plural = if b == 1 { "" } else { "s" };
                format!(" in {} bundle{} of {}", b, plural, f)
            }
            _ => String::new(),
        };
        println!(
            "Pattern {} [{}]: {} bar{}{}",
            i + 1,
            row.machine,
            row.bars,
            if row.bars == 1 { "" } else { "s" },
            bundling,
        );
        println!("  {}", segments.join(" + "));
        println!(
            "  used {:.1} mm, waste {:.1} mm per bar",
            row.used_length, row.waste
        );
    }
    println!();

    for tally in &plan.tallies {
        println!(
            "  {} ({}, {}): required {}, produced {}, surplus {}",
            tally.key, tally.length, tally.machine, tally.required, tally.produced, tally.surplus
        );
    }
    println!();

    let summary = plan.summary();
    println!(
        "Summary: {} bar{} used, {} pattern{}, {:.1} mm waste ({:.2}%)",
        summary.total_bars,
        if summary.total_bars == 1 { "" } else { "s" },
        summary.pattern_count,
        if summary.pattern_count == 1 { "" } else { "s" },
        summary.total_waste,
        summary.waste_percent,
    );
    if summary.bundled_bars > 0 || summary.manual_bars > 0 {
        println!(
            "  bundled bars: {}, manual cuts: {}",
            summary.bundled_bars, summary.manual_bars
        );
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = &cli.cache_dir {
        config = config.with_cache_dir(dir);
    }

    let request = build_request(cli)?;
    let solver = Solver::new(config).map_err(|e| e.to_string())?;
    let plan = solver.solve(&request).map_err(|e| e.to_string())?;

    if cli.json {
        let response = OptimizeResponse::from(plan);
        let out = serde_json::to_string_pretty(&response).map_err(|e| e.to_string())?;
        println!("{}", out);
    } else {
        print_plan(&plan);
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_max_level(Level::WARN)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
