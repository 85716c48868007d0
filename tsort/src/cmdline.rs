use std::path::PathBuf;

use clap::{Arg, ArgMatches, Command, value_parser};
use tracing::info;
use tsort_core::config::EarlyPolicySpec;
use tsort_core::{ClassifierConfig, ClassifierSpec, OutputMode, PreviousTimeTracking, Smoothing};

use crate::error::{Error, Result};
use crate::output::Destination;

const DEFAULT_ALPHA: f64 = 0.2;
const DEFAULT_CAPACITY: usize = 500;

pub(crate) fn root_cli() -> Command {
    Command::new("tsort")
        .about(
            "Classifies newline-delimited JSON records read from stdin as EARLY, LATE or ON_TIME \
             against a running high watermark",
        )
        .next_help_heading("Classifier")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("JSON classifier config, takes precedence over TSORT_CLASSIFIER_OBJECT and the flags below"),
        )
        .arg(
            Arg::new("lateness-ms")
                .long("lateness-ms")
                .value_parser(value_parser!(i64))
                .allow_negative_numbers(true)
                .default_value("300000")
                .help("Maximum gap behind the high watermark before a record is LATE"),
        )
        .arg(
            Arg::new("policy")
                .long("policy")
                .value_parser(["wall_clock", "step_delta", "watermark_bound", "rolling_average"])
                .default_value("watermark_bound")
                .help("Early detection policy"),
        )
        .arg(
            Arg::new("tolerance-ms")
                .long("tolerance-ms")
                .value_parser(value_parser!(i64))
                .allow_negative_numbers(true)
                .default_value("300000")
                .help("Tolerance of the early policy (the maximum step for step_delta)"),
        )
        .arg(
            Arg::new("alpha")
                .long("alpha")
                .value_parser(value_parser!(f64))
                .conflicts_with("window")
                .help("Exponential smoothing factor of rolling_average, in (0, 1]"),
        )
        .arg(
            Arg::new("window")
                .long("window")
                .value_parser(value_parser!(usize))
                .help("Use a sliding window of this many records for rolling_average"),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .value_parser(["three_way_route", "annotated_stream"])
                .default_value("three_way_route"),
        )
        .arg(
            Arg::new("tracking")
                .long("tracking")
                .value_parser(["except_late", "every_record", "on_time_only"])
                .default_value("except_late")
                .help("Which records update the previous event time"),
        )
        .next_help_heading("Input/Output")
        .arg(
            Arg::new("event-time-field")
                .long("event-time-field")
                .default_value("event_time")
                .help("Top-level JSON field holding an RFC 3339 time or epoch millis"),
        )
        .arg(
            Arg::new("checkpoint")
                .long("checkpoint")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf))
                .help("Restore the watermark state from FILE if it exists, write it back on exit"),
        )
        .arg(path_arg("on-time-out", "ON_TIME records, stdout by default"))
        .arg(path_arg("early-out", "EARLY records, stdout by default"))
        .arg(path_arg("late-out", "LATE records, stdout by default"))
        .arg(path_arg("annotated-out", "annotated records, stdout by default"))
        .arg(path_arg("error-out", "records without a valid event time, stderr by default"))
        .arg(path_arg("metrics-out", "write prometheus metrics here on exit"))
        .arg(
            Arg::new("channel-capacity")
                .long("channel-capacity")
                .value_parser(value_parser!(usize))
                .default_value("500"),
        )
}

fn path_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("FILE")
        .value_parser(value_parser!(PathBuf))
        .help(help)
}

/// Everything the binary needs to run, resolved from the command line.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) config: ClassifierConfig,
    pub(crate) event_time_field: String,
    pub(crate) checkpoint: Option<PathBuf>,
    pub(crate) on_time_out: Destination,
    pub(crate) early_out: Destination,
    pub(crate) late_out: Destination,
    pub(crate) annotated_out: Destination,
    pub(crate) error_out: Destination,
    pub(crate) metrics_out: Option<PathBuf>,
    pub(crate) capacity: usize,
}

impl TryFrom<&ArgMatches> for Settings {
    type Error = Error;

    fn try_from(matches: &ArgMatches) -> Result<Self> {
        let config = if let Some(path) = matches.get_one::<PathBuf>("config") {
            info!(path = %path.display(), "Loading classifier config from file");
            ClassifierConfig::load_from_file(path)?
        } else if let Some(config) = ClassifierConfig::load_from_env()? {
            info!("Loaded classifier config from environment");
            config
        } else {
            ClassifierConfig::try_from(spec_from_flags(matches)?)?
        };

        let destination = |name: &str, default: Destination| {
            matches
                .get_one::<PathBuf>(name)
                .map_or(default, |path| Destination::File(path.clone()))
        };

        Ok(Self {
            config,
            event_time_field: string_arg(matches, "event-time-field")?,
            checkpoint: matches.get_one::<PathBuf>("checkpoint").cloned(),
            on_time_out: destination("on-time-out", Destination::Stdout),
            early_out: destination("early-out", Destination::Stdout),
            late_out: destination("late-out", Destination::Stdout),
            annotated_out: destination("annotated-out", Destination::Stdout),
            error_out: destination("error-out", Destination::Stderr),
            metrics_out: matches.get_one::<PathBuf>("metrics-out").cloned(),
            capacity: matches
                .get_one::<usize>("channel-capacity")
                .copied()
                .unwrap_or(DEFAULT_CAPACITY),
        })
    }
}

fn string_arg(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| Error::Cli(format!("--{name} is required")))
}

fn i64_arg(matches: &ArgMatches, name: &str) -> Result<i64> {
    matches
        .get_one::<i64>(name)
        .copied()
        .ok_or_else(|| Error::Cli(format!("--{name} is required")))
}

fn spec_from_flags(matches: &ArgMatches) -> Result<ClassifierSpec> {
    let tolerance_ms = i64_arg(matches, "tolerance-ms")?;
    let early_policy = match string_arg(matches, "policy")?.as_str() {
        "wall_clock" => EarlyPolicySpec::WallClock { tolerance_ms },
        "step_delta" => EarlyPolicySpec::StepDelta {
            max_step_ms: tolerance_ms,
        },
        "watermark_bound" => EarlyPolicySpec::WatermarkBound { tolerance_ms },
        "rolling_average" => {
            let smoothing = match matches.get_one::<usize>("window") {
                Some(size) => Smoothing::Window { size: *size },
                None => Smoothing::Exponential {
                    alpha: matches
                        .get_one::<f64>("alpha")
                        .copied()
                        .unwrap_or(DEFAULT_ALPHA),
                },
            };
            EarlyPolicySpec::RollingAverage {
                tolerance_ms,
                smoothing,
            }
        }
        other => return Err(Error::Cli(format!("unknown policy {other}"))),
    };

    let mode = match string_arg(matches, "mode")?.as_str() {
        "annotated_stream" => OutputMode::AnnotatedStream,
        _ => OutputMode::ThreeWayRoute,
    };
    let previous_time_tracking = match string_arg(matches, "tracking")?.as_str() {
        "every_record" => PreviousTimeTracking::EveryRecord,
        "on_time_only" => PreviousTimeTracking::OnTimeOnly,
        _ => PreviousTimeTracking::ExceptLate,
    };

    Ok(ClassifierSpec {
        lateness_ms: i64_arg(matches, "lateness-ms")?,
        early_policy,
        mode,
        previous_time_tracking,
    })
}
