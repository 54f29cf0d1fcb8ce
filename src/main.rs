use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::path::{Path, PathBuf};

use lactrs::logging::init_logging;
use lactrs::{
    calculate_theoretical_load, input, report, AppConfig, Database, IncomingStage, LactrsError, LoadUnit,
    MethodSelection, StageIngestor, StageSeries, StageStore, TestEvaluator, TestProtocol, TheoreticalLoadInput, ThresholdMethod,
    ThresholdPoint, Thresholds, TrendAggregator, ZoneCalculator, ZoneModel,
};

/// lactrs - Lactate Threshold Analysis CLI
///
/// Detects LT1/LT2 from incremental step tests, corrects cut-short stages,
/// derives training zones and tracks threshold progression across tests.
#[derive(Parser)]
#[command(name = "lactrs")]
#[command(version)]
#[command(about = "Lactate threshold and training zone analysis", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect LT1/LT2 from a stage file (CSV or JSON)
    Thresholds {
        /// Stage file path
        #[arg(short, long)]
        file: PathBuf,

        /// Method tag (dickhuth, mader, dmax, modified-dmax) or "all"
        #[arg(short, long)]
        method: Option<String>,

        /// Load unit of the file (watt, kmh)
        #[arg(short, long, default_value = "watt")]
        unit: String,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Derive training zones from thresholds or a stage file
    Zones {
        /// Stage file to detect thresholds from
        #[arg(short, long, conflicts_with_all = ["lt1", "lt2"])]
        file: Option<PathBuf>,

        /// LT1 load
        #[arg(long)]
        lt1: Option<f64>,

        /// LT2 load
        #[arg(long)]
        lt2: Option<f64>,

        /// Maximum load reached in the test (defaults to the file's highest load)
        #[arg(long)]
        max_load: Option<f64>,

        /// Threshold method used with --file
        #[arg(short, long)]
        method: Option<String>,

        /// Zone model (5-zones, 3-zones-a, 3-zones-b)
        #[arg(short = 'z', long)]
        model: Option<String>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Extrapolate the full-stage load of a cut-short stage
    TheoreticalLoad {
        /// Load of the last completed stage
        #[arg(long)]
        previous: f64,

        /// Load of the cut-short stage
        #[arg(long)]
        current: f64,

        /// Load of the stage before the previous one
        #[arg(long)]
        pre_previous: Option<f64>,

        /// Minutes held
        #[arg(long)]
        actual: f64,

        /// Protocol stage duration in minutes
        #[arg(long)]
        target: f64,
    },

    /// Create or close stored tests
    Test {
        #[command(subcommand)]
        action: TestAction,
    },

    /// Store a stage of an open test, correcting it when cut short
    Ingest {
        /// Test id
        #[arg(short, long)]
        test: String,

        #[arg(short, long)]
        stage: u32,

        #[arg(short, long)]
        load: f64,

        #[arg(long)]
        lactate: Option<f64>,

        #[arg(long)]
        heart_rate: Option<u16>,

        /// Minutes held
        #[arg(short, long)]
        duration: Option<f64>,
    },

    /// Compute thresholds and zones for a stored test
    Evaluate {
        #[arg(long)]
        customer: String,

        #[arg(short, long)]
        test: String,

        /// Method tag, or "adjusted" for reviewer thresholds
        #[arg(short, long)]
        method: Option<String>,

        #[arg(short = 'z', long)]
        model: Option<String>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Store reviewer-adjusted thresholds for a test
    Adjust {
        #[arg(short, long)]
        test: String,

        #[arg(long, requires = "lt1_lactate")]
        lt1_load: Option<f64>,

        #[arg(long)]
        lt1_lactate: Option<f64>,

        #[arg(long, requires = "lt2_lactate")]
        lt2_load: Option<f64>,

        #[arg(long)]
        lt2_lactate: Option<f64>,
    },

    /// Threshold progression across a customer's tests
    Trend {
        #[arg(long)]
        customer: String,

        #[arg(short, long)]
        method: Option<String>,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Configure application settings
    Config {
        /// List all configuration options
        #[arg(short, long)]
        list: bool,

        /// Set a configuration value (key=value)
        #[arg(short, long)]
        set: Option<String>,

        /// Get a configuration value
        #[arg(short, long)]
        get: Option<String>,
    },
}

#[derive(Subcommand)]
enum TestAction {
    /// Register a new open test and print its id
    Create {
        #[arg(long)]
        customer: String,

        /// Protocol stage duration in minutes
        #[arg(long, default_value = "3")]
        stage_duration: f64,

        #[arg(short, long, default_value = "watt")]
        unit: String,
    },

    /// Close a test; its stages can no longer change
    Close {
        test: String,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        match err.downcast_ref::<LactrsError>() {
            Some(lactrs_err) => {
                tracing::error!(error = %lactrs_err, severity = ?lactrs_err.severity(), "Command failed");
                eprintln!("{} {}", "Error:".red().bold(), lactrs_err.user_message());
            }
            None => eprintln!("{} {:#}", "Error:".red().bold(), err),
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_config_path);
    let mut config = AppConfig::load_or_default(Some(&config_path))?;

    init_logging(&config.logging.clone().with_verbosity(cli.verbose)).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Thresholds {
            file,
            method,
            unit,
            format,
        } => {
            let unit: LoadUnit = unit.parse()?;
            let series = read_series(&file)?;
            let detector = config.detector();
            let methods = resolve_methods(method.as_deref(), &config)?;

            let results: Vec<(ThresholdMethod, Thresholds)> = methods
                .into_iter()
                .map(|m| (m, detector.detect(&series.samples(), m)))
                .collect();

            match format {
                OutputFormat::Json => {
                    let mut json = serde_json::Map::new();
                    for (m, thresholds) in &results {
                        json.insert(m.tag().to_string(), serde_json::to_value(thresholds)?);
                    }
                    println!("{}", serde_json::to_string_pretty(&json)?);
                }
                OutputFormat::Table => {
                    for (m, thresholds) in &results {
                        println!("{}", report::heading(&format!("Thresholds ({})", m)));
                        println!("{}", report::thresholds_table(thresholds, unit));
                    }
                }
            }
        }

        Commands::Zones {
            file,
            lt1,
            lt2,
            max_load,
            method,
            model,
            format,
        } => {
            let model = resolve_model(model.as_deref(), &config)?;
            let (thresholds, max_load) = match file {
                Some(file) => {
                    let series = read_series(&file)?;
                    let method = match method.as_deref() {
                        Some(tag) => tag.parse()?,
                        None => config.settings.default_method,
                    };
                    let thresholds = config.detector().detect(&series.samples(), method);
                    let max_load = max_load
                        .or_else(|| series.max_load())
                        .context("Stage file has no stage with both load and lactate")?;
                    (thresholds, max_load)
                }
                None => {
                    let max_load = max_load.context("--max-load is required without --file")?;
                    let thresholds = Thresholds {
                        lt1: lt1.map(|load| ThresholdPoint::new(load, 0.0)),
                        lt2: lt2.map(|load| ThresholdPoint::new(load, 0.0)),
                    };
                    (thresholds, max_load)
                }
            };

            let zones = ZoneCalculator::calculate_training_zones(thresholds.lt1, thresholds.lt2, max_load, model)?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&zones)?),
                OutputFormat::Table => {
                    println!("{}", report::heading(&format!("Training zones ({})", model)));
                    println!("{}", report::zones_table(&zones));
                }
            }
        }

        Commands::TheoreticalLoad {
            previous,
            current,
            pre_previous,
            actual,
            target,
        } => {
            let interpolator = config.interpolator();
            if !interpolator.is_incomplete(actual, target) {
                println!(
                    "{}",
                    format!("Stage is complete ({} of {} min), load stays {}", actual, target, current).green()
                );
                return Ok(());
            }

            let result = calculate_theoretical_load(&TheoreticalLoadInput {
                pre_previous,
                previous,
                current,
                actual_duration_min: actual,
                target_duration_min: target,
            })?;
            println!(
                "{} {:.1}",
                "Theoretical load:".bold(),
                result.theoretical_load
            );
        }

        Commands::Test { action } => {
            let mut db = open_database(&config)?;
            match action {
                TestAction::Create {
                    customer,
                    stage_duration,
                    unit,
                } => {
                    let protocol = TestProtocol {
                        stage_duration_min: stage_duration,
                        unit: unit.parse()?,
                        closed: false,
                    };
                    let id = db.create_test(&customer, &protocol, Utc::now())?;
                    println!("{}", id);
                }
                TestAction::Close { test } => {
                    db.close_test(&test)?;
                    println!("{}", format!("✓ Test {} closed", test).green());
                }
            }
        }

        Commands::Ingest {
            test,
            stage,
            load,
            lactate,
            heart_rate,
            duration,
        } => {
            let mut db = open_database(&config)?;
            let incoming = IncomingStage {
                stage,
                load,
                lactate,
                heart_rate,
                duration_min: duration,
            };
            let outcome = StageIngestor::with_interpolator(config.interpolator()).ingest(&mut db, &test, incoming)?;

            println!("{}", format!("✓ Stage {} {:?}", outcome.stage, outcome.action).green());
            if let Some(correction) = outcome.correction {
                println!(
                    "  {} {:.1}",
                    "Theoretical load:".yellow(),
                    correction.theoretical_load
                );
            }
        }

        Commands::Evaluate {
            customer,
            test,
            method,
            model,
            format,
        } => {
            let mut db = open_database(&config)?;
            let selection = match method.as_deref() {
                Some(tag) => tag.parse()?,
                None => MethodSelection::Computed(config.settings.default_method),
            };
            let model = resolve_model(model.as_deref(), &config)?;
            let unit = db.protocol(&test)?.unit;

            let evaluation =
                TestEvaluator::with_detector(config.detector()).evaluate(&mut db, &customer, &test, selection, model)?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&evaluation)?),
                OutputFormat::Table => {
                    println!("{}", report::heading(&format!("Thresholds ({})", evaluation.method)));
                    println!("{}", report::thresholds_table(&evaluation.thresholds, unit));
                    println!("{}", report::heading(&format!("Training zones ({})", evaluation.model)));
                    println!("{}", report::zones_table(&evaluation.zones));
                }
            }
        }

        Commands::Adjust {
            test,
            lt1_load,
            lt1_lactate,
            lt2_load,
            lt2_lactate,
        } => {
            let mut db = open_database(&config)?;
            let point = |load: Option<f64>, lactate: Option<f64>| Some(ThresholdPoint::new(load?, lactate?));
            let thresholds = Thresholds {
                lt1: point(lt1_load, lt1_lactate),
                lt2: point(lt2_load, lt2_lactate),
            };
            if thresholds.is_empty() {
                bail!("Give at least one of --lt1-load/--lt1-lactate or --lt2-load/--lt2-lactate");
            }
            TestEvaluator::new().adjust(&mut db, &test, thresholds)?;
            println!("{}", format!("✓ Adjusted thresholds stored for {}", test).green());
        }

        Commands::Trend {
            customer,
            method,
            format,
        } => {
            let db = open_database(&config)?;
            let method = match method.as_deref() {
                Some(tag) => tag.parse()?,
                None => config.settings.default_method,
            };
            let trend = TrendAggregator::new(&db, method)
                .with_detector(config.detector())
                .build_trend(&customer)?;

            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&trend)?),
                OutputFormat::Table => {
                    for (label, points) in [("watt", &trend.watt), ("km/h", &trend.kmh)] {
                        if points.is_empty() {
                            continue;
                        }
                        println!("{}", report::heading(&format!("Threshold trend ({}, {})", label, method)));
                        println!("{}", report::trend_table(points));
                    }
                    if trend.watt.is_empty() && trend.kmh.is_empty() {
                        println!("{}", format!("No usable tests for {}", customer).yellow());
                    }
                }
            }
        }

        Commands::Config { list, set, get } => {
            if list {
                println!("{}", toml::to_string_pretty(&config)?);
            } else if let Some(key_value) = set {
                let (key, value) = key_value
                    .split_once('=')
                    .context("Expected key=value, e.g. thresholds.dickhuth_lt2_lactate=4.0")?;
                config.set(key.trim(), value.trim())?;
                config.save_to_file(&config_path)?;
                println!("{}", format!("✓ {} = {}", key.trim(), config.get(key.trim())?).green());
            } else if let Some(key) = get {
                println!("{}", config.get(&key)?);
            } else {
                println!("Config file: {}", config_path.display());
            }
        }
    }

    Ok(())
}

fn read_series(path: &Path) -> Result<StageSeries> {
    let rows = input::read_stage_file(path)?;
    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("stages");
    Ok(StageSeries::new(name, rows))
}

fn resolve_methods(tag: Option<&str>, config: &AppConfig) -> Result<Vec<ThresholdMethod>> {
    Ok(match tag {
        Some(tag) if tag.eq_ignore_ascii_case("all") => ThresholdMethod::ALL.to_vec(),
        Some(tag) => vec![tag.parse()?],
        None => vec![config.settings.default_method],
    })
}

fn resolve_model(tag: Option<&str>, config: &AppConfig) -> Result<ZoneModel> {
    Ok(match tag {
        Some(tag) => tag.parse()?,
        None => config.zones.default_model,
    })
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let path = &config.settings.database_path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory: {}", parent.display()))?;
    }
    Database::new(path).with_context(|| format!("Failed to open database: {}", path.display()))
}
