//! Boundary to the multimodal model that finds the lesions.
//!
//! The model itself is opaque. This module builds the request, runs a client,
//! unwraps the response text and hands it to the model parser. Every failure
//! is logged in detail and then reduced to one user-facing message.

use std::env;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info};
use serde_json::{json, Value};
use wait_timeout::ChildExt;

use crate::error::InferenceError;
use crate::input::SelectedImage;
use crate::model::AnalysisResult;
use crate::session::Session;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const TEMPERATURE: f64 = 0.4;
pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub const ANALYSIS_PROMPT: &str = "Analyze this facial image for acne.
1. Detect all visible acne lesions.
2. For each lesion, identify its type, severity (0-100), treatment suggestion, and location.
3. Provide a bounding box [ymin, xmin, ymax, xmax] (0-1000 scale) for each lesion if possible.
4. Provide an overall severity score (0-100) and a summary.
Return the result in JSON format matching the schema.";

/// Structured-output schema sent with every request.
pub fn response_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "overallScore": {
                "type": "NUMBER",
                "description": "Overall facial skin condition severity rating from 0 (clear skin) to 100 (severe acne)."
            },
            "summary": {
                "type": "STRING",
                "description": "A concise review summarizing the face's overall acne condition."
            },
            "lesions": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "location": {"type": "STRING", "description": "Approximate location (e.g., Forehead, center)"},
                        "type": {"type": "STRING", "description": "Type of acne (e.g., Pustule, Blackhead, Cyst)"},
                        "severity": {"type": "NUMBER", "description": "Severity rating 0-100 for this specific lesion"},
                        "suggestion": {"type": "STRING", "description": "Treatment suggestion"},
                        "box_2d": {
                            "type": "ARRAY",
                            "items": {"type": "NUMBER"},
                            "description": "Bounding box [ymin, xmin, ymax, xmax] on a 0-1000 scale."
                        }
                    },
                    "required": ["location", "type", "severity", "suggestion"]
                }
            }
        },
        "required": ["overallScore", "summary", "lesions"]
    })
}

/// `generateContent` request body for one image.
pub fn build_request_body(image: &SelectedImage) -> Value {
    json!({
        "contents": [{
            "parts": [
                {"inlineData": {"mimeType": image.mime_type, "data": image.base64_data()}},
                {"text": ANALYSIS_PROMPT}
            ]
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": response_schema(),
            "temperature": TEMPERATURE
        }
    })
}

/// Pulls the model text out of a `generateContent` envelope. Anything that is
/// not an envelope is returned as-is so plain analysis JSON passes through.
pub fn extract_response_text(raw: &str) -> Result<String, InferenceError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InferenceError::EmptyResponse);
    }
    let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
        return Ok(trimmed.to_string());
    };

    if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .unwrap_or_else(|| err.to_string());
        return Err(InferenceError::Remote(message));
    }

    let Some(candidates) = value.get("candidates").and_then(Value::as_array) else {
        return Ok(trimmed.to_string());
    };
    let text: String = candidates
        .first()
        .and_then(|c| c.pointer("/content/parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(InferenceError::EmptyResponse);
    }
    Ok(text)
}

pub trait InferenceClient {
    fn name(&self) -> &str;

    /// Sends the request body and returns the raw response body.
    fn generate(&self, body: &Value) -> Result<String, InferenceError>;
}

/// Runs one request through `client` and parses the answer.
pub fn analyze_image(
    client: &dyn InferenceClient,
    image: &SelectedImage,
) -> Result<AnalysisResult, InferenceError> {
    let body = build_request_body(image);
    let raw = client.generate(&body)?;
    let text = extract_response_text(&raw)?;
    let result = AnalysisResult::from_response_text(&text, Utc::now().timestamp_millis())?;
    info!(
        "{} returned score {} with {} lesions",
        client.name(),
        result.overall_score,
        result.findings.len()
    );
    Ok(result)
}

/// Starts the session's analysis, waits for the client and applies the
/// outcome. Returns `false` when nothing was started (no image, or the action
/// is unavailable in the current phase).
pub fn run_session_analysis(
    session: &mut Session<SelectedImage>,
    client: &dyn InferenceClient,
) -> bool {
    let Some(ticket) = session.start() else {
        return false;
    };
    let Some(image) = session.image() else {
        return false;
    };
    let outcome = analyze_image(client, image).map_err(|err| {
        error!("analysis via {} failed: {err}", client.name());
        err.user_message().to_string()
    });
    session.complete(ticket, outcome);
    true
}

struct ProcessOutput {
    stdout: String,
    stderr: String,
    code: i32,
}

/// Spawns `program`, feeds `stdin_bytes`, and waits up to `timeout`.
fn run_process(
    program: &str,
    args: &[String],
    stdin_bytes: Vec<u8>,
    timeout: Duration,
) -> Result<ProcessOutput, InferenceError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|source| InferenceError::Spawn {
        program: program.to_string(),
        source,
    })?;

    // Pipes are drained on their own threads so a large body cannot block the child.
    let writer = child.stdin.take().map(|mut stdin| {
        thread::spawn(move || {
            let _ = stdin.write_all(&stdin_bytes);
        })
    });
    let stdout_reader = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            buf
        })
    });
    let stderr_reader = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf);
            buf
        })
    });

    let waited = match child.wait_timeout(timeout) {
        Ok(waited) => waited,
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(err.into());
        }
    };
    let status = match waited {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(InferenceError::Timeout {
                program: program.to_string(),
                seconds: timeout.as_secs(),
            });
        }
    };

    if let Some(handle) = writer {
        let _ = handle.join();
    }
    let stdout = stdout_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
        code: status.code().unwrap_or(1),
    })
}

fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    text.chars().take(limit).collect::<String>() + "...<truncated>"
}

/// Resolves the API key from `GEMINI_API_KEY`, then `API_KEY`.
pub fn api_key_from_env() -> Option<String> {
    ["GEMINI_API_KEY", "API_KEY"]
        .iter()
        .filter_map(|name| env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Calls the Gemini REST API through `curl`.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub curl_bin: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: Option<String>, timeout_secs: u64) -> Self {
        Self {
            api_key,
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(timeout_secs.max(1)),
            curl_bin: "curl".to_string(),
        }
    }

    pub fn from_env(model: Option<String>, timeout_secs: u64) -> Result<Self, InferenceError> {
        let key = api_key_from_env().ok_or(InferenceError::MissingApiKey)?;
        Ok(Self::new(key, model, timeout_secs))
    }

    pub fn endpoint(&self) -> String {
        format!("{GEMINI_ENDPOINT}/{}:generateContent", self.model)
    }

    /// curl config read from stdin, so the key never appears in argv.
    fn curl_config(&self, body_path: &Path) -> String {
        let quote = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");
        format!(
            "url = \"{}\"\nrequest = \"POST\"\nheader = \"Content-Type: application/json\"\nheader = \"x-goog-api-key: {}\"\ndata-binary = \"@{}\"\nsilent\nshow-error\n",
            quote(&self.endpoint()),
            quote(&self.api_key),
            quote(&body_path.display().to_string()),
        )
    }
}

impl InferenceClient for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate(&self, body: &Value) -> Result<String, InferenceError> {
        // Removed when `body_file` drops.
        let mut body_file = tempfile::Builder::new()
            .prefix("dermascan-request-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer(&mut body_file, body)?;
        body_file.flush()?;
        debug!("POST {} (body {})", self.endpoint(), body_file.path().display());

        let output = run_process(
            &self.curl_bin,
            &["--config".to_string(), "-".to_string()],
            self.curl_config(body_file.path()).into_bytes(),
            self.timeout,
        )?;

        if output.code != 0 {
            return Err(InferenceError::Exit {
                program: self.curl_bin.clone(),
                code: output.code,
                stderr: truncate_text(output.stderr.trim(), 600),
            });
        }
        Ok(output.stdout)
    }
}

/// Runs an arbitrary program: request JSON on stdin, analysis JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandClient {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CommandClient {
    /// Splits a command line on whitespace. Quoting is not interpreted, so an
    /// argument containing spaces needs a wrapper script.
    pub fn from_command_line(command: &str, timeout_secs: u64) -> Option<Self> {
        let mut parts = command.split_whitespace().map(ToString::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }
}

impl InferenceClient for CommandClient {
    fn name(&self) -> &str {
        &self.program
    }

    fn generate(&self, body: &Value) -> Result<String, InferenceError> {
        let output = run_process(
            &self.program,
            &self.args,
            serde_json::to_vec(body)?,
            self.timeout,
        )?;
        if output.code != 0 {
            return Err(InferenceError::Exit {
                program: self.program.clone(),
                code: output.code,
                stderr: truncate_text(output.stderr.trim(), 600),
            });
        }
        Ok(output.stdout)
    }
}

/// Replays a saved response body.
#[derive(Debug, Clone)]
pub struct ReplayClient {
    pub path: PathBuf,
}

impl InferenceClient for ReplayClient {
    fn name(&self) -> &str {
        "replay"
    }

    fn generate(&self, _body: &Value) -> Result<String, InferenceError> {
        Ok(fs::read_to_string(&self.path)?)
    }
}
