//! Simulator entry point: CLI wiring and config-driven engine construction.

use std::collections::BTreeMap;
use std::process;

use clap::Parser;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use area_market_sim::aggregator::LogSink;
use area_market_sim::cli::Cli;
use area_market_sim::config::ScenarioConfig;
use area_market_sim::error::SimError;
use area_market_sim::io::export::{export_csv, export_json, export_stats_csv};
use area_market_sim::sim::Engine;

fn load_scenario(cli: &Cli) -> Result<ScenarioConfig, SimError> {
    // --scenario takes priority, then --preset, then the default preset
    let mut scenario = if let Some(path) = &cli.scenario {
        ScenarioConfig::from_toml_file(path)?
    } else if let Some(name) = &cli.preset {
        ScenarioConfig::from_preset(name)?
    } else {
        ScenarioConfig::default_preset()
    };

    if let Some(seed) = cli.seed {
        scenario.simulation.seed = seed;
    }
    if let Some(keep) = cli.keep_past_markets {
        scenario.simulation.keep_past_markets = keep;
    }
    Ok(scenario)
}

fn run(cli: &Cli) -> Result<(), SimError> {
    let scenario = load_scenario(cli)?;
    let (config, tree) = scenario.build()?;
    let mapping: BTreeMap<String, Vec<String>> = scenario.aggregator_mapping(&tree);

    let mut engine = Engine::new(config, tree, LogSink);
    if !mapping.is_empty() {
        engine.aggregator().set_aggregator_device_mapping(mapping);
    }
    let summaries = engine.run()?;

    for s in &summaries {
        println!("{s}");
    }

    let root = engine.tree().area(engine.tree().root()).name().to_string();
    if let Some(kpi) = engine.kpi().performance_indices().get(&root) {
        let kpi = kpi.to_percentages();
        println!(
            "\n{root}: self-sufficiency {:.1}%, self-consumption {:.1}%, demanded {:.1} Wh, produced {:.1} Wh",
            kpi.self_sufficiency,
            kpi.self_consumption,
            kpi.total_energy_demanded_wh,
            kpi.total_energy_produced_wh,
        );
    }

    if let Some(path) = &cli.telemetry_out {
        export_csv(&summaries, path)?;
        info!(path = %path.display(), "slot summaries written");
    }
    if let Some(path) = &cli.stats_out {
        export_stats_csv(engine.device_statistics().device_stats(), path)?;
        info!(path = %path.display(), "device statistics written");
    }
    if let Some(path) = &cli.kpi_out {
        let view = json!({
            "kpi": engine.kpi().performance_indices_by_uuid(),
            "unmatched_loads": engine.unmatched_loads().unmatched_loads(),
        });
        export_json(&view, path)?;
        info!(path = %path.display(), "KPI views written");
    }

    #[cfg(feature = "api")]
    if cli.serve {
        use std::net::SocketAddr;
        use std::sync::Arc;

        let state = Arc::new(area_market_sim::api::AppState::from_engine(&engine));
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(area_market_sim::api::serve(state, addr))?;
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        error!("{e}");
        eprintln!("{e}");
        process::exit(1);
    }
}
