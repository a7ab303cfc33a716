#![forbid(unsafe_code)]

use std::path::PathBuf;

use serde_json::json;
use tc_conformance::{
    Harness, HarnessConfig, MatrixSummary, ScenarioSpec, Tolerance, default_scenarios,
    emit_conformance_matrix, load_scenario_catalog, parse_devices, parse_rtol, parse_seed,
};
use tc_kernel_host::HostBackend;

const USAGE: &str = "usage: run_conformance_matrix [--devices a,b] [--seed N] [--rtol X] [--fixture path] [--scenario id] [--output path] [--emulate-accelerators] [--print-full-log]";

#[derive(Debug)]
struct RunOptions {
    config: HarnessConfig,
    output: Option<PathBuf>,
    scenario_filter: Option<String>,
    print_full_log: bool,
}

fn main() -> Result<(), String> {
    let config = HarnessConfig::from_env().map_err(|error| error.to_string())?;
    let options = parse_args(std::env::args().skip(1), config)?;
    let specs = scenario_specs(&options)?;

    let repo_root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..");
    let output_path = options
        .output
        .clone()
        .unwrap_or_else(|| repo_root.join("artifacts/conformance/conformance_matrix.jsonl"));

    let config = &options.config;
    let backend = backend_for(config);
    let harness = Harness::with_backend(&backend, config.clone());
    let summary = emit_conformance_matrix(&harness, &specs, output_path.as_path())?;

    if options.print_full_log {
        let raw = std::fs::read_to_string(summary.output_path.as_path()).map_err(|error| {
            format!(
                "failed to read generated conformance log {}: {error}",
                summary.output_path.display()
            )
        })?;
        print!("{raw}");
    } else {
        let devices: Vec<&str> = config.devices.iter().map(|device| device.as_str()).collect();
        let status = if summary.failed_entries == 0 {
            "ok"
        } else {
            "failed"
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "status": status,
                "output_path": summary.output_path.display().to_string(),
                "scenarios_total": summary.scenarios_total,
                "scenarios_passed": summary.scenarios_passed,
                "log_entries": summary.log_entries,
                "failed_entries": summary.failed_entries,
                "skipped_entries": summary.skipped_entries,
                "devices": devices,
                "seed": config.seed,
                "rtol": config.tolerance.rtol,
                "catalog": config.catalog.as_ref().map(|path| path.display().to_string()),
                "accelerator_emulation": config.emulate_accelerators,
            }))
            .map_err(|error| format!("failed to serialize summary: {error}"))?
        );
    }

    ensure_no_failures(&summary)
}

fn parse_args<I>(args: I, mut config: HarnessConfig) -> Result<RunOptions, String>
where
    I: IntoIterator<Item = String>,
{
    let mut output = None;
    let mut scenario_filter = None;
    let mut print_full_log = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--devices" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--devices requires a comma-separated list".to_string())?;
                config.devices =
                    parse_devices("--devices", &value).map_err(|error| error.to_string())?;
            }
            "--seed" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--seed requires an integer".to_string())?;
                config.seed = parse_seed("--seed", &value).map_err(|error| error.to_string())?;
            }
            "--rtol" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--rtol requires a number".to_string())?;
                let rtol = parse_rtol("--rtol", &value).map_err(|error| error.to_string())?;
                config = config.with_tolerance(Tolerance::with_rtol(rtol));
            }
            "--fixture" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--fixture requires a file path".to_string())?;
                config = config.with_catalog(value);
            }
            "--scenario" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--scenario requires a scenario id".to_string())?;
                scenario_filter = Some(value);
            }
            "--output" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--output requires a file path".to_string())?;
                output = Some(PathBuf::from(value));
            }
            "--emulate-accelerators" => {
                config = config.with_accelerator_emulation(true);
            }
            "--print-full-log" => {
                print_full_log = true;
            }
            other => {
                return Err(format!("unknown arg '{other}'. {USAGE}"));
            }
        }
    }

    Ok(RunOptions {
        config,
        output,
        scenario_filter,
        print_full_log,
    })
}

/// The configured catalog, or the defaults, narrowed to `--scenario`.
fn scenario_specs(options: &RunOptions) -> Result<Vec<ScenarioSpec>, String> {
    let specs = match options.config.catalog.as_deref() {
        Some(path) => load_scenario_catalog(path)?,
        None => default_scenarios(),
    };
    match options.scenario_filter.as_deref() {
        Some(filter) => select_scenario(&options.config, specs, filter),
        None => Ok(specs),
    }
}

fn select_scenario(
    config: &HarnessConfig,
    specs: Vec<ScenarioSpec>,
    filter: &str,
) -> Result<Vec<ScenarioSpec>, String> {
    let mut selected = Vec::new();
    for spec in specs {
        let scenario = spec.build(config).map_err(|error| error.to_string())?;
        if scenario.name() == filter {
            selected.push(spec);
        }
    }
    if selected.is_empty() {
        return Err(format!("no scenario named '{filter}'"));
    }
    Ok(selected)
}

/// Without emulation only the host target is attached; the rest are skipped.
fn backend_for(config: &HarnessConfig) -> HostBackend {
    if config.emulate_accelerators {
        HostBackend::with_devices(config.devices.iter().cloned()).with_accelerator_emulation(true)
    } else {
        HostBackend::new()
    }
}

fn ensure_no_failures(summary: &MatrixSummary) -> Result<(), String> {
    if summary.failed_entries > 0 {
        return Err(format!(
            "{} device run(s) failed; see {}",
            summary.failed_entries,
            summary.output_path.display()
        ));
    }
    Ok(())
}
