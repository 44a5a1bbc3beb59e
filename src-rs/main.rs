use anyhow::{bail, Context, Result};
use chrono::{SecondsFormat, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use image::DynamicImage;
use log::{info, warn};
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dermascan::inference::{
    self, response_schema, ANALYSIS_PROMPT, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECS,
};
use dermascan::presentation::{finding_rows, lesion_count_label, render_text_report};
use dermascan::{
    render_overlay, run_session_analysis, AnalysisResult, CommandClient, GeminiClient,
    InferenceClient, Phase, ReplayClient, SelectedImage, Selection, Session, SeverityBand,
};

#[derive(Parser, Debug)]
#[command(
    name = "dermascan",
    version,
    about = "Send a face photo to a multimodal model for acne analysis and render the findings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
#[allow(clippy::enum_variant_names)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Print the analysis prompt and response schema
    Schema,
    /// Analyze one image and write the annotated overlay, sidecar and report
    Analyze(AnalyzeArgs),
    /// Draw a saved analysis result over an image
    Render(RenderArgs),
    /// Print the findings list for a saved analysis result
    Report(ReportArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Gemini generateContent over HTTPS (via curl)
    Gemini,
    /// Any program: request JSON on stdin, analysis JSON on stdout
    Command,
    /// Saved response body
    Replay,
}

#[derive(Args, Debug)]
struct AnalyzeArgs {
    /// Input image path
    image: PathBuf,
    /// Treat the image as drag-and-dropped: non-images are ignored
    #[arg(long, action = ArgAction::SetTrue)]
    drop: bool,
    /// Inference backend
    #[arg(long, value_enum, default_value_t = Backend::Gemini)]
    backend: Backend,
    /// Command line for --backend command, split on whitespace (no shell
    /// quoting; wrap arguments with spaces in a script)
    #[arg(long)]
    command: Option<String>,
    /// Saved response body for --backend replay
    #[arg(long)]
    response: Option<PathBuf>,
    /// Model name (default: DERMASCAN_MODEL or gemini-2.5-flash)
    #[arg(long)]
    model: Option<String>,
    /// Seconds to wait for the backend
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,
    /// Annotated PNG output path
    #[arg(long)]
    out: Option<PathBuf>,
    /// Sidecar JSON path (default: <out>.json)
    #[arg(long)]
    meta_out: Option<PathBuf>,
    /// Disable sidecar output
    #[arg(long, action = ArgAction::SetTrue)]
    no_meta: bool,
    /// Highlight one finding (id or 1-based position)
    #[arg(long)]
    active: Option<String>,
    /// Print the sidecar JSON instead of the text report
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Input image path
    image: PathBuf,
    /// Saved result JSON (raw model output or a sidecar)
    result: PathBuf,
    /// Output PNG path
    output: PathBuf,
    /// Highlight one finding (id or 1-based position)
    #[arg(long)]
    active: Option<String>,
    /// Sidecar JSON path (default: <output>.json)
    #[arg(long)]
    meta_out: Option<PathBuf>,
    /// Disable sidecar output
    #[arg(long, action = ArgAction::SetTrue)]
    no_meta: bool,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// Saved result JSON (raw model output or a sidecar)
    result: PathBuf,
    /// Highlight one finding (id or 1-based position)
    #[arg(long)]
    active: Option<String>,
    /// Emit rows as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Commands => print_commands(),
        Commands::Schema => print_schema(),
        Commands::Analyze(args) => command_analyze(args),
        Commands::Render(args) => command_render(args),
        Commands::Report(args) => command_report(args),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "schema",
            "description": "Print the analysis prompt and structured-output schema.",
        }),
        json!({
            "name": "analyze",
            "description": "Run one analysis session and write overlay PNG, sidecar JSON and report.",
        }),
        json!({
            "name": "render",
            "description": "Draw a saved result over an image, optionally highlighting one finding.",
        }),
        json!({
            "name": "report",
            "description": "Print the banded score and findings list of a saved result.",
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn print_schema() -> Result<()> {
    let payload = json!({
        "model": DEFAULT_MODEL,
        "temperature": inference::TEMPERATURE,
        "prompt": ANALYSIS_PROMPT,
        "response_schema": response_schema(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn build_client(args: &AnalyzeArgs) -> Result<Box<dyn InferenceClient>> {
    match args.backend {
        Backend::Gemini => {
            let model = args
                .model
                .clone()
                .or_else(|| env::var("DERMASCAN_MODEL").ok());
            let client = GeminiClient::from_env(model, args.timeout)
                .context("gemini backend is not configured")?;
            Ok(Box::new(client))
        }
        Backend::Command => {
            let Some(line) = args.command.as_deref() else {
                bail!("--backend command requires --command");
            };
            let Some(client) = CommandClient::from_command_line(line, args.timeout) else {
                bail!("--command is empty");
            };
            Ok(Box::new(client))
        }
        Backend::Replay => {
            let Some(path) = args.response.clone() else {
                bail!("--backend replay requires --response");
            };
            if !path.exists() {
                bail!("response not found: {}", path.display());
            }
            Ok(Box::new(ReplayClient { path }))
        }
    }
}

fn command_analyze(args: AnalyzeArgs) -> Result<()> {
    if !args.image.exists() {
        bail!("image not found: {}", args.image.display());
    }

    let image = if args.drop {
        match SelectedImage::from_drop(&args.image)? {
            Some(image) => image,
            None => {
                info!("dropped file is not an image: {}", args.image.display());
                println!("ignored: {} is not an image", args.image.display());
                return Ok(());
            }
        }
    } else {
        SelectedImage::from_selection(&args.image)?
    };

    let client = build_client(&args)?;
    let mut session = Session::new();
    session.select_image(image);
    run_session_analysis(&mut session, client.as_ref());

    let active_id = match (args.active.as_deref(), session.result()) {
        (Some(reference), Some(result)) => {
            let found = result.resolve_reference(reference).map(|f| f.id.clone());
            if found.is_none() {
                warn!("no finding matches --active {reference}");
            }
            found
        }
        _ => None,
    };
    if let Some(id) = active_id {
        session.selection_mut().click(&id);
    }

    let output_path = args
        .out
        .clone()
        .unwrap_or_else(|| analysis_output_path(&args.image));

    let mut overlay = Vec::new();
    let mut size = Value::Null;
    let mut written_output: Option<PathBuf> = None;
    if let (Some(result), Some(image)) = (session.result(), session.image()) {
        match image::load_from_memory(&image.bytes) {
            Ok(decoded) => {
                let mut canvas = decoded.to_rgba8();
                let (w, h) = canvas.dimensions();
                size = json!({"width": w, "height": h, "units": "px"});
                overlay = render_overlay(&mut canvas, &result.findings, session.selection());
                save_png(canvas, &output_path)?;
                written_output = Some(output_path.clone());
            }
            Err(err) => warn!("overlay skipped, image could not be decoded: {err}"),
        }
    }

    let payload = json!({
        "report_meta_version": 1,
        "generated_at": generated_at(),
        "input_path": display_abs(&args.image),
        "output_path": written_output.as_deref().map(display_abs),
        "backend": client.name(),
        "phase": session.phase(),
        "status": session.phase().status_label(),
        "error": session.error(),
        "size": size,
        "score": session.result().map(score_value),
        "active": session.active_finding(),
        "result": session.result(),
        "overlay": overlay,
        "findings": session
            .result()
            .map(|r| finding_rows(&r.findings, session.selection()))
            .unwrap_or_default(),
    });

    if !args.no_meta {
        let meta_path = sidecar_path(&output_path, args.meta_out.as_deref());
        write_sidecar(&meta_path, &payload)?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print!(
            "{}",
            render_text_report(
                session.phase(),
                session.result(),
                session.error(),
                session.selection()
            )
        );
        if let Some(path) = written_output.as_deref() {
            println!("{}", display_abs(path));
        }
    }

    if session.phase() == Phase::Error {
        bail!(
            "{}",
            session.error().unwrap_or(dermascan::GENERIC_ANALYSIS_ERROR)
        );
    }
    Ok(())
}

fn command_render(args: RenderArgs) -> Result<()> {
    if !args.image.exists() {
        bail!("image not found: {}", args.image.display());
    }
    let result = load_result(&args.result)?;
    let selection = selection_for(&result, args.active.as_deref());

    let input_image = image::open(&args.image)
        .with_context(|| format!("failed to open input image: {}", args.image.display()))?;
    let mut canvas = input_image.to_rgba8();
    let (img_w, img_h) = canvas.dimensions();
    let overlay = render_overlay(&mut canvas, &result.findings, &selection);
    save_png(canvas, &args.output)?;

    if !args.no_meta {
        let meta_path = sidecar_path(&args.output, args.meta_out.as_deref());
        let payload = json!({
            "report_meta_version": 1,
            "generated_at": generated_at(),
            "input_path": display_abs(&args.image),
            "output_path": display_abs(&args.output),
            "size": {"width": img_w, "height": img_h, "units": "px"},
            "score": score_value(&result),
            "active": selection.active(),
            "result": result,
            "overlay": overlay,
        });
        write_sidecar(&meta_path, &payload)?;
    }

    println!("{}", display_abs(&args.output));
    Ok(())
}

fn command_report(args: ReportArgs) -> Result<()> {
    let result = load_result(&args.result)?;
    let selection = selection_for(&result, args.active.as_deref());

    if args.json {
        let payload = json!({
            "score": score_value(&result),
            "summary": result.summary,
            "lesion_count": lesion_count_label(result.findings.len()),
            "findings": finding_rows(&result.findings, &selection),
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        print!(
            "{}",
            render_text_report(Phase::Success, Some(&result), None, &selection)
        );
    }
    Ok(())
}

fn load_result(path: &Path) -> Result<AnalysisResult> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read result file: {}", path.display()))?;
    let text = inference::extract_response_text(&raw)
        .with_context(|| format!("no analysis in result file: {}", path.display()))?;
    AnalysisResult::from_saved_text(&text, Utc::now().timestamp_millis())
        .with_context(|| format!("invalid result JSON: {}", path.display()))
}

fn selection_for(result: &AnalysisResult, reference: Option<&str>) -> Selection {
    let mut selection = Selection::default();
    if let Some(reference) = reference {
        match result.resolve_reference(reference) {
            Some(finding) => selection.click(&finding.id),
            None => warn!("no finding matches --active {reference}"),
        }
    }
    selection
}

fn score_value(result: &AnalysisResult) -> Value {
    let band = SeverityBand::from_score(result.overall_score);
    json!({
        "value": result.overall_score,
        "band": band.label(),
        "color": band.color(),
    })
}

fn save_png(canvas: image::RgbaImage, path: &Path) -> Result<()> {
    create_parent(path)?;
    DynamicImage::ImageRgba8(canvas)
        .save(path)
        .with_context(|| format!("failed to save output image: {}", path.display()))
}

/// Writes an analysis sidecar as pretty JSON with a trailing newline.
fn write_sidecar<T: Serialize>(path: &Path, payload: &T) -> Result<()> {
    create_parent(path)?;
    let mut raw = serde_json::to_string_pretty(payload)?;
    raw.push('\n');
    fs::write(path, raw).with_context(|| format!("failed to write sidecar: {}", path.display()))
}

fn create_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display())),
        _ => Ok(()),
    }
}

/// `--meta-out` when given, otherwise the overlay path with a `.json` extension.
fn sidecar_path(overlay: &Path, explicit: Option<&Path>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| overlay.with_extension("json"))
}

/// Default overlay location for `analyze`:
/// `$DERMASCAN_OUT_DIR/analyze/<photo>-<utc stamp>-<nonce>.png`.
fn analysis_output_path(photo: &Path) -> PathBuf {
    let root = env::var_os("DERMASCAN_OUT_DIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".dermascan"));
    let stem = photo.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let nonce: u16 = rand::thread_rng().gen_range(1000..10000);
    root.join("analyze").join(format!(
        "{}-{}-{nonce}.png",
        photo_slug(stem),
        Utc::now().format("%Y%m%dT%H%M%SZ")
    ))
}

/// Lowercase ASCII slug of a photo name; runs of other characters become one
/// dash. Falls back to `face`.
fn photo_slug(stem: &str) -> String {
    let mut slug = String::with_capacity(stem.len());
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "face".to_string()
    } else {
        slug.to_string()
    }
}

fn display_abs(path: &Path) -> String {
    let full = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    };
    full.display().to_string()
}

fn generated_at() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    const RESULT: &str = r#"{"overallScore": 65, "summary": "Inflamed chin.", "lesions": [{"location": "chin", "type": "Pustule", "severity": 80, "suggestion": "Spot treat", "box_2d": [100, 200, 300, 400]}, {"location": "nose", "type": "Blackhead", "severity": 10, "suggestion": "BHA"}]}"#;

    #[test]
    fn sidecar_is_written_under_missing_directories() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("runs").join("face.json");
        let result = AnalysisResult::from_response_text(RESULT, 1).unwrap();
        write_sidecar(&target, &json!({"report_meta_version": 1, "result": result})).unwrap();
        let raw = fs::read_to_string(&target).unwrap();
        assert!(raw.ends_with('\n'));
        let back: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(back["result"]["overallScore"], json!(65.0));
        assert_eq!(back["result"]["lesions"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn sidecar_defaults_next_to_overlay() {
        assert_eq!(
            sidecar_path(Path::new("out/face.png"), None),
            PathBuf::from("out/face.json")
        );
        assert_eq!(
            sidecar_path(Path::new("out/face.png"), Some(Path::new("meta.json"))),
            PathBuf::from("meta.json")
        );
    }

    #[test]
    fn photo_slug_collapses_separators() {
        assert_eq!(photo_slug("My Face  Photo (2)"), "my-face-photo-2");
        assert_eq!(photo_slug("___"), "face");
    }

    #[test]
    fn analysis_output_lands_in_analyze_dir() {
        let path = analysis_output_path(Path::new("/tmp/Selfie 01.jpg"));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(
            path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()),
            Some("analyze")
        );
        let name = path.file_name().and_then(|n| n.to_str()).unwrap();
        assert!(name.starts_with("selfie-01-"), "{name}");
    }

    #[test]
    fn score_value_carries_band_and_color() {
        let result = AnalysisResult::from_response_text(RESULT, 1).unwrap();
        let score = score_value(&result);
        assert_eq!(score["band"], json!("Moderate"));
        assert_eq!(score["color"], json!("#f97316"));
    }

    #[test]
    fn selection_accepts_positions() {
        let result = AnalysisResult::from_response_text(RESULT, 1).unwrap();
        assert_eq!(selection_for(&result, Some("2")).active(), Some("lesion-1-1"));
        assert_eq!(selection_for(&result, Some("9")).active(), None);
        assert_eq!(selection_for(&result, None).active(), None);
    }

    #[test]
    fn replay_analysis_writes_overlay_and_sidecar() {
        let dir = tempdir().unwrap();
        let image_path = dir.path().join("face.png");
        RgbaImage::from_pixel(200, 100, Rgba([210, 170, 150, 255]))
            .save(&image_path)
            .unwrap();
        let response = dir.path().join("response.json");
        fs::write(&response, RESULT).unwrap();
        let out = dir.path().join("out").join("annotated.png");

        command_analyze(AnalyzeArgs {
            image: image_path,
            drop: false,
            backend: Backend::Replay,
            command: None,
            response: Some(response),
            model: None,
            timeout: 5,
            out: Some(out.clone()),
            meta_out: None,
            no_meta: false,
            active: Some("1".to_string()),
            json: false,
        })
        .unwrap();

        assert!(out.exists());
        let meta: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("out/annotated.json")).unwrap())
                .unwrap();
        assert_eq!(meta["phase"], json!("success"));
        assert_eq!(meta["score"]["band"], json!("Moderate"));
        assert_eq!(meta["overlay"].as_array().unwrap().len(), 1);
        assert_eq!(meta["overlay"][0]["active"], json!(true));
        assert_eq!(meta["findings"].as_array().unwrap().len(), 2);
        assert_eq!(meta["findings"][0]["level"], json!("high"));

        let reloaded = load_result(&dir.path().join("out/annotated.json")).unwrap();
        assert_eq!(reloaded.findings.len(), 2);
        assert_eq!(reloaded.findings[0].id, meta["active"].as_str().unwrap());
    }

    #[test]
    fn failed_analysis_still_writes_sidecar() {
        let dir = tempdir().unwrap();
        let image_path = dir.path().join("face.png");
        RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]))
            .save(&image_path)
            .unwrap();
        let response = dir.path().join("response.json");
        fs::write(&response, "not json at all").unwrap();
        let out = dir.path().join("annotated.png");

        let err = command_analyze(AnalyzeArgs {
            image: image_path,
            drop: false,
            backend: Backend::Replay,
            command: None,
            response: Some(response),
            model: None,
            timeout: 5,
            out: Some(out.clone()),
            meta_out: None,
            no_meta: false,
            active: None,
            json: true,
        })
        .unwrap_err();

        assert_eq!(err.to_string(), dermascan::GENERIC_ANALYSIS_ERROR);
        assert!(!out.exists());
        let meta: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("annotated.json")).unwrap())
                .unwrap();
        assert_eq!(meta["phase"], json!("error"));
        assert_eq!(meta["status"], json!("Analysis failed"));
    }

    #[test]
    fn dropped_non_image_is_ignored() {
        let dir = tempdir().unwrap();
        let notes = dir.path().join("notes.txt");
        fs::write(&notes, "hello").unwrap();
        command_analyze(AnalyzeArgs {
            image: notes,
            drop: true,
            backend: Backend::Replay,
            command: None,
            response: None,
            model: None,
            timeout: 5,
            out: None,
            meta_out: None,
            no_meta: true,
            active: None,
            json: false,
        })
        .unwrap();
    }
}
