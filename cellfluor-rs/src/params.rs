//! Run parameters and where they come from.
//!
//! Parameters are collected once, before the pipeline starts, from either an
//! interactive prompt ([`PromptParameters`]) or a JSON file ([`ConfigParameters`]).

use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::source::check_readable;

pub const DEFAULT_DIAMETER: f32 = 15.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    pub video_path: PathBuf,
    /// Expected cell diameter in pixels.
    #[serde(default = "default_diameter")]
    pub diameter: f32,
    /// Output CSV base name, without extension.
    pub csv_name: String,
    /// Channel that drives brightness, segmentation and intensity.
    #[serde(default)]
    pub channel: usize,
}

fn default_diameter() -> f32 {
    DEFAULT_DIAMETER
}

impl RunParams {
    pub fn validate(&self) -> Result<()> {
        check_readable(&self.video_path)?;
        validate_diameter(self.diameter)?;
        validate_name(&self.csv_name)?;
        Ok(())
    }
}

pub trait ParameterProvider {
    fn collect(&mut self) -> Result<RunParams>;
}

pub trait ConfirmationProvider {
    /// Whether to plot the per-cell traces. Dismissal counts as no.
    fn confirm_plot(&mut self) -> Result<bool>;
}

/// Both halves of the user-facing surface, chosen once at startup.
pub trait Interaction: ParameterProvider + ConfirmationProvider {}

impl<T: ParameterProvider + ConfirmationProvider> Interaction for T {}

pub fn parse_diameter(s: &str) -> Result<f32> {
    let d: f32 = s
        .trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("diameter must be a number, got {:?}", s.trim())))?;
    validate_diameter(d)?;
    Ok(d)
}

fn validate_diameter(d: f32) -> Result<()> {
    if d.is_finite() && d > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("diameter must be positive, got {}", d)))
    }
}

pub fn parse_channel(s: &str) -> Result<usize> {
    s.trim().parse().map_err(|_| {
        Error::InvalidInput(format!(
            "channel index must be a non-negative integer, got {:?}",
            s.trim()
        ))
    })
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        Err(Error::InvalidInput("output CSV name must not be empty".into()))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Non-interactive: JSON config file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(flatten)]
    pub params: RunParams,
    #[serde(default)]
    pub plot: bool,
}

/// Reads everything from a config; invalid values are fatal.
pub struct ConfigParameters {
    config: RunConfig,
}

impl ConfigParameters {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::new(serde_json::from_str(&s)?))
    }
}

impl ParameterProvider for ConfigParameters {
    fn collect(&mut self) -> Result<RunParams> {
        self.config.params.validate()?;
        Ok(self.config.params.clone())
    }
}

impl ConfirmationProvider for ConfigParameters {
    fn confirm_plot(&mut self) -> Result<bool> {
        Ok(self.config.plot)
    }
}

// ---------------------------------------------------------------------------
// Interactive: blocking prompts
// ---------------------------------------------------------------------------

/// Asks for each field in turn and re-asks until the answer is valid.
/// With `dialog`, file browsing and the plot question use native dialogs.
pub struct PromptParameters<R, W> {
    input: R,
    output: W,
    dialog: bool,
}

impl PromptParameters<io::StdinLock<'static>, io::Stderr> {
    /// Prompt on the terminal. Fails when stdin is not interactive, or, with
    /// native dialogs enabled, when there is no display to show them on.
    pub fn stdio() -> Result<Self> {
        Self::stdio_with(io::stdin().is_terminal(), display_available())
    }

    pub fn stdio_with(has_terminal: bool, has_display: bool) -> Result<Self> {
        require_interactive(has_terminal, cfg!(feature = "dialog"), has_display)?;
        Ok(Self {
            input: io::stdin().lock(),
            output: io::stderr(),
            dialog: cfg!(feature = "dialog"),
        })
    }
}

impl<R: BufRead, W: Write> PromptParameters<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            dialog: false,
        }
    }

    fn ask(&mut self, prompt: &str) -> Result<String> {
        write!(self.output, "{}: ", prompt)?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(Error::InteractiveUnavailable(
                "input closed before all parameters were entered".into(),
            ));
        }
        Ok(line.trim().to_string())
    }

    fn ask_until<T>(&mut self, prompt: &str, parse: impl Fn(&str) -> Result<T>) -> Result<T> {
        loop {
            let answer = self.ask(prompt)?;
            match parse(&answer) {
                Ok(v) => return Ok(v),
                Err(Error::InteractiveUnavailable(msg)) => {
                    return Err(Error::InteractiveUnavailable(msg))
                }
                Err(e) => {
                    writeln!(self.output, "Invalid input: {}", e)?;
                    if self.dialog {
                        show_error_dialog(&e.to_string());
                    }
                }
            }
        }
    }

    fn ask_video_path(&mut self) -> Result<PathBuf> {
        let browse = self.dialog;
        let prompt = if browse {
            "Video path (empty to browse)"
        } else {
            "Video path"
        };
        self.ask_until(prompt, |answer| {
            let path = if answer.is_empty() && browse {
                browse_video().ok_or_else(|| Error::InvalidInput("no file selected".into()))?
            } else {
                PathBuf::from(answer)
            };
            if path.as_os_str().is_empty() {
                return Err(Error::InvalidInput("video path must not be empty".into()));
            }
            check_readable(&path)?;
            Ok(path)
        })
    }
}

impl<R: BufRead, W: Write> ParameterProvider for PromptParameters<R, W> {
    fn collect(&mut self) -> Result<RunParams> {
        let video_path = self.ask_video_path()?;
        let diameter = self.ask_until("Cell diameter (e.g., 15)", |s| {
            if s.is_empty() {
                Ok(DEFAULT_DIAMETER)
            } else {
                parse_diameter(s)
            }
        })?;
        let csv_name = self.ask_until("Output CSV filename (no extension)", |s| {
            validate_name(s)?;
            Ok(s.to_string())
        })?;
        let channel = self.ask_until("Channel index (e.g., 0)", |s| {
            if s.is_empty() {
                Ok(0)
            } else {
                parse_channel(s)
            }
        })?;
        Ok(RunParams {
            video_path,
            diameter,
            csv_name,
            channel,
        })
    }
}

/// Interactive input needs a terminal, and a display when dialogs are shown.
pub fn require_interactive(
    has_terminal: bool,
    needs_display: bool,
    has_display: bool,
) -> Result<()> {
    if !has_terminal {
        return Err(Error::InteractiveUnavailable(
            "stdin is not a terminal; pass --config to run non-interactively".into(),
        ));
    }
    if needs_display && !has_display {
        return Err(Error::InteractiveUnavailable(
            "no display available for dialogs; pass --config to run non-interactively".into(),
        ));
    }
    Ok(())
}

/// X11 or Wayland session present. Always true where the OS owns the desktop.
#[cfg(all(unix, not(target_os = "macos")))]
pub fn display_available() -> bool {
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()))
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
pub fn display_available() -> bool {
    true
}

#[cfg(feature = "dialog")]
fn show_error_dialog(message: &str) {
    use rfd::{MessageButtons, MessageDialog, MessageLevel};
    MessageDialog::new()
        .set_level(MessageLevel::Error)
        .set_title("Invalid Input")
        .set_description(message)
        .set_buttons(MessageButtons::Ok)
        .show();
}

#[cfg(not(feature = "dialog"))]
fn show_error_dialog(_message: &str) {}

#[cfg(feature = "dialog")]
fn browse_video() -> Option<PathBuf> {
    rfd::FileDialog::new()
        .add_filter("ND2 files", &["nd2"])
        .add_filter("All files", &["*"])
        .pick_file()
}

#[cfg(not(feature = "dialog"))]
fn browse_video() -> Option<PathBuf> {
    None
}

impl<R: BufRead, W: Write> ConfirmationProvider for PromptParameters<R, W> {
    fn confirm_plot(&mut self) -> Result<bool> {
        if self.dialog {
            return Ok(ask_plot_dialog());
        }
        write!(self.output, "Plot mean fluorescence of each cell? [y/N]: ")?;
        self.output.flush()?;
        let mut line = String::new();
        self.input.read_line(&mut line)?;
        let answer = line.trim();
        Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
    }
}

#[cfg(feature = "dialog")]
fn ask_plot_dialog() -> bool {
    use rfd::{MessageButtons, MessageDialog, MessageDialogResult};
    let result = MessageDialog::new()
        .set_title("Plot Fluorescence Traces?")
        .set_description("Do you want to plot mean fluorescence of each cell?")
        .set_buttons(MessageButtons::YesNo)
        .show();
    matches!(result, MessageDialogResult::Yes)
}

#[cfg(not(feature = "dialog"))]
fn ask_plot_dialog() -> bool {
    false
}
