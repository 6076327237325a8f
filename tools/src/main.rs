//! risk-runner: batch pipeline and scoring loop for the credit-risk model.
//!
//! Usage:
//!   risk-runner prepare --config pipeline.json
//!   risk-runner train   --config pipeline.json
//!   risk-runner run     --config pipeline.json
//!   risk-runner serve   --config pipeline.json

use anyhow::Result;
use credit_risk_core::{
    config::PipelineConfig,
    error::RiskError,
    pipeline::{self, Pipeline, PreparedData},
    registry::ModelRegistry,
    scorer::ScoringService,
    trainer::TrainingOutcome,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::Path;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Predict {
        #[serde(flatten)]
        fields: serde_json::Map<String, serde_json::Value>,
    },
    Health,
    Reload,
    Quit,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("");
    let config_path = args
        .windows(2)
        .find(|w| w[0] == "--config")
        .map(|w| w[1].as_str())
        .ok_or_else(|| anyhow::anyhow!("missing --config <file>"))?;
    let config = PipelineConfig::load(config_path)?;

    match command {
        "prepare" => {
            let pipeline = Pipeline::new(config)?;
            let prepared = pipeline.prepare()?;
            pipeline::write_artifacts(Path::new(&pipeline.config.output_dir), &prepared)?;
            print_prepared(&prepared);
        }
        "train" => {
            let pipeline = Pipeline::new(config)?;
            let prepared = pipeline.prepare()?;
            let registry = ModelRegistry::open(&pipeline.config.registry_path)?;
            let (outcome, version) = pipeline.train(&prepared, &registry)?;
            print_training(&outcome, &pipeline.config.model_name, version);
        }
        "run" => {
            let pipeline = Pipeline::new(config)?;
            let report = pipeline.run()?;
            print_prepared(&report.prepared);
            print_training(&report.training, &pipeline.config.model_name, report.version);
            for path in &report.artifacts {
                println!("  wrote {}", path.display());
            }
        }
        "serve" => run_scoring_loop(&config)?,
        other => anyhow::bail!("unknown command '{other}' (expected prepare|train|run|serve)"),
    }

    Ok(())
}

fn open_service(config: &PipelineConfig) -> (Option<ModelRegistry>, ScoringService) {
    match ModelRegistry::open(&config.registry_path) {
        Ok(registry) => {
            let service = ScoringService::start(&registry, &config.model_name);
            (Some(registry), service)
        }
        Err(e) => {
            log::error!("cannot open registry {}: {e}", config.registry_path);
            (None, ScoringService::unavailable(&config.model_name, e.to_string()))
        }
    }
}

fn run_scoring_loop(config: &PipelineConfig) -> Result<()> {
    let (mut registry, mut service) = open_service(config);
    if !service.is_healthy() {
        log::warn!("scoring loop started without a model; requests will fail until reload");
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string(), "status": 400 });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };

        let reply = match cmd {
            IpcCommand::Quit => break,
            IpcCommand::Health => service.health(),
            IpcCommand::Reload => {
                if registry.is_none() {
                    registry = ModelRegistry::open(&config.registry_path)
                        .map_err(|e| log::error!("cannot open registry: {e}"))
                        .ok();
                }
                if let Some(reg) = &registry {
                    service.reload(reg);
                }
                service.health()
            }
            IpcCommand::Predict { fields } => {
                match service.predict_json(&serde_json::Value::Object(fields)) {
                    Ok(response) => serde_json::to_value(response)?,
                    Err(e) => error_reply(&e),
                }
            }
        };
        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }
    Ok(())
}

fn error_reply(e: &RiskError) -> serde_json::Value {
    let message = match e {
        RiskError::ModelUnavailable(_) => "Model not loaded".to_string(),
        other => other.to_string(),
    };
    serde_json::json!({ "error": message, "status": e.status_code() })
}

fn print_prepared(prepared: &PreparedData) {
    println!("=== PREPARE SUMMARY ===");
    println!("  transactions:   {}", prepared.transaction_count);
    println!("  customers:      {}", prepared.aggregates.len());
    println!("  labeled:        {}", prepared.labeled.labels.len());
    println!("  excluded:       {}", prepared.labeled.excluded.len());
    println!(
        "  high risk:      {} (cluster {})",
        prepared.labeled.labels.iter().filter(|&&l| l == 1).count(),
        prepared.labeling.high_risk_cluster
    );
    println!();
    println!("=== INFORMATION VALUE ===");
    for row in &prepared.woe.iv_table {
        println!("  {:<18} {:.4}  {}", row.feature, row.iv, row.strength);
    }
    println!();
}

fn print_training(outcome: &TrainingOutcome, model_name: &str, version: u32) {
    println!("=== TRAINING SUMMARY ===");
    println!("  run_id:         {}", outcome.run_id);
    for eval in &outcome.evaluations {
        println!("  {:<20} cv_roc_auc={:.4}  {}", eval.family.to_string(), eval.cv_roc_auc, eval.best_params);
        println!("  {:<20} {}", "", eval.metrics);
    }
    println!("  champion:       {}", outcome.champion);
    println!("  registered:     {model_name} v{version}");
    println!();
}
