use anyhow::Context;
use clap::Parser;
use colored::*;
use navarasa::{EmotionAnalyzer, PredictorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "navarasa",
    about = "Classify music clips into the nine Navarasa emotions"
)]
struct Args {
    /// Files or directories
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Output JSON (array) to stdout only
    #[arg(long = "json", default_value_t = false)]
    json: bool,

    /// Show pretty table (stderr); disable with --show-table false
    #[arg(long = "show-table", default_value_t = true, action = clap::ArgAction::Set)]
    show_table: bool,

    /// Print extracted descriptor features instead of predictions
    #[arg(long = "features", default_value_t = false)]
    features: bool,

    /// JSON predictor config (defaults and NAVARASA_* env vars otherwise)
    #[arg(long = "config")]
    config: Option<PathBuf>,

    /// Directory holding the model artifacts
    #[arg(long = "model-dir")]
    model_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(long = "verbose", short = 'v', default_value_t = false)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = match &args.config {
        Some(path) => PredictorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PredictorConfig::from_env(),
    };
    if let Some(dir) = &args.model_dir {
        config.model_dir = dir.clone();
    }
    let analyzer = EmotionAnalyzer::new(config);
    let show_table = args.show_table && !args.json;

    if args.features {
        let results = analyzer
            .extract_paths(args.paths.clone())
            .context("feature extraction failed")?;
        if show_table {
            let mut table = comfy_table::Table::new();
            table.set_header(vec![
                "File".bold(),
                "Tempo (BPM)".bold(),
                "Energy".bold(),
                "Brightness (Hz)".bold(),
                "ZCR".bold(),
            ]);
            for r in &results {
                let fname = r.file.file_name().and_then(|s| s.to_str()).unwrap_or("?");
                table.add_row(vec![
                    fname.to_string(),
                    format!("{:.1}", r.features.tempo),
                    format!("{:.4}", r.features.rms_mean),
                    format!("{:.1}", r.features.spectral_centroid_mean),
                    format!("{:.4}", r.features.zcr_mean),
                ]);
            }
            eprintln!("{}", "Features".green().bold());
            eprintln!("{}", table);
        }
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let results = analyzer
        .predict_paths(args.paths.clone())
        .context("prediction failed")?;

    if show_table {
        let mut table = comfy_table::Table::new();
        table.set_header(vec![
            "File".bold(),
            "Emotion".bold(),
            "Confidence".bold(),
            "Runner-up".bold(),
            "Tempo (BPM)".bold(),
        ]);
        for r in &results {
            let fname = r.file.file_name().and_then(|s| s.to_str()).unwrap_or("?");
            let primary = r.result.primary_emotion;
            let runner_up = r
                .result
                .emotions
                .top(2)
                .into_iter()
                .find(|(label, _)| *label != primary)
                .map(|(label, score)| format!("{label} {:.1}%", score * 100.0))
                .unwrap_or_default();
            table.add_row(vec![
                fname.to_string(),
                format!("{} ({})", primary, primary.gloss()),
                format!("{:.1}%", r.result.confidence * 100.0),
                runner_up,
                format!("{:.1}", r.result.features.tempo),
            ]);
        }
        eprintln!(
            "{} {}",
            "Emotions".green().bold(),
            format!("[{} predictor]", analyzer.predictor_kind()).dimmed()
        );
        eprintln!("{}", table);
    }
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
