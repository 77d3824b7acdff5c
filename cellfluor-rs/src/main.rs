use cellfluor::artifacts::DEFAULT_OUTPUT_DIR;
use cellfluor::fluorescence::CancelToken;
use cellfluor::params::{ConfigParameters, Interaction, PromptParameters};
use cellfluor::segment::CellposeSegmenter;
use cellfluor::{pipeline, plot, source};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cellfluor",
    about = "Segment cells on the brightest frame and export per-cell fluorescence over time"
)]
struct Cli {
    /// Path to Cellpose model directory containing model.onnx
    #[arg(long)]
    model: PathBuf,
    /// JSON run config (video_path, diameter, csv_name, channel, plot); prompts when absent
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory for mask_XXXX.png / frame_XXXX.png
    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,
    /// Directory for per-cell trace charts (default: output dir)
    #[arg(long)]
    plot_dir: Option<PathBuf>,
    /// Batch size for ONNX inference (number of 256×256 tiles per forward pass)
    #[arg(long, default_value_t = 1)]
    batch_size: usize,
    /// Force CPU (skip CUDA)
    #[arg(long)]
    cpu: bool,
    /// ffmpeg binary used for non-ND2 videos
    #[arg(long)]
    ffmpeg: Option<PathBuf>,
    /// Stop before the next frame once this file exists
    #[arg(long)]
    stop_file: Option<PathBuf>,
    /// Report progress as JSON lines on stderr instead of a progress bar
    #[arg(long)]
    json_progress: bool,
}

fn json_progress(prog: f64, msg: &str) {
    let _ = writeln!(
        io::stderr(),
        "{}",
        serde_json::json!({"progress": prog, "message": msg})
    );
    let _ = io::stderr().flush();
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(1000);
    if let Ok(style) = ProgressStyle::with_template("{bar:40.cyan/blue} {percent:>3}% {msg}") {
        bar.set_style(style);
    }
    bar
}

/// Drive the bar when there is one, JSON lines otherwise.
fn report(bar: Option<&ProgressBar>, prog: f64, msg: &str) {
    match bar {
        Some(bar) => {
            bar.set_position((prog.clamp(0.0, 1.0) * 1000.0) as u64);
            bar.set_message(msg.to_string());
        }
        None => json_progress(prog, msg),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Providers are picked once; the pipeline never asks how input was gathered.
    let mut interaction: Box<dyn Interaction> = match &cli.config {
        Some(path) => Box::new(ConfigParameters::from_file(path)?),
        None => Box::new(PromptParameters::stdio()?),
    };

    let params = interaction.collect()?;
    let source = source::open_source(&params.video_path, cli.ffmpeg.as_deref())?;

    let model_dir = cli.model.clone();
    eprintln!("Loading Cellpose model from {}", model_dir.display());
    let mut segmenter = CellposeSegmenter::new(&model_dir, cli.cpu, cli.batch_size)?;

    let cancel = match &cli.stop_file {
        Some(path) => CancelToken::with_stop_file(path.clone()),
        None => CancelToken::new(),
    };

    let bar = (!cli.json_progress).then(progress_bar);

    let summary = pipeline::run(
        &params,
        source.as_ref(),
        &mut segmenter,
        &cli.output_dir,
        &cancel,
        &|prog, msg| report(bar.as_ref(), prog, msg),
    )?;
    if let Some(bar) = &bar {
        bar.finish();
    }
    if summary.stopped {
        eprintln!("Stopped after {} frame(s); partial results kept.", summary.frames);
    }

    if !summary.table.is_empty() && interaction.confirm_plot()? {
        let dir = cli.plot_dir.as_ref().unwrap_or(&cli.output_dir);
        let plot_bar = (!cli.json_progress).then(progress_bar);
        let written = plot::plot_traces(dir, &summary.table, &|done, total| {
            report(
                plot_bar.as_ref(),
                done as f64 / total as f64,
                &format!("Plotted cell {}/{}", done, total),
            );
        })?;
        if let Some(bar) = &plot_bar {
            bar.finish();
        }
        eprintln!("Wrote {} trace chart(s) to {}", written.len(), dir.display());
    }
    Ok(())
}
