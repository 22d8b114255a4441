//! Local Action Executor
//!
//! Maps the symbolic action names the realtime model may call (`openApp`,
//! `openUrl`, `searchGoogle`) onto OS-level "open" invocations. Execution is
//! fire-and-forget: `ActionExecutor::execute` returns an [`ActionReceipt`] as
//! soon as the OS request has been issued and never waits for the launched
//! program. Completion is only observable through the logs or through the
//! optional outcome channel of [`SystemLauncher`].

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::{fmt, io, path::PathBuf, process::Stdio, sync::Arc};
use tokio::{process::Command, sync::mpsc};
use tracing::{error, info};

/// Browser used for every URL the executor opens, regardless of the system default.
pub const DEFAULT_BROWSER: &str = "Google Chrome";

const SEARCH_URL_PREFIX: &str = "https://www.google.com/search?q=";

/// Nicknames (lowercase, whitespace stripped) mapped to canonical application names.
const APP_NICKNAMES: &[(&str, &str)] = &[
    // Browsers
    ("browser", "Safari"),
    ("safari", "Safari"),
    ("chrome", "Google Chrome"),
    ("googlechrome", "Google Chrome"),
    ("firefox", "Firefox"),
    ("edge", "Microsoft Edge"),
    // Code editors
    ("vscode", "Visual Studio Code"),
    ("visualstudiocode", "Visual Studio Code"),
    ("code", "Visual Studio Code"),
    ("sublime", "Sublime Text"),
    ("sublimetext", "Sublime Text"),
    ("atom", "Atom"),
    // System apps
    ("terminal", "Terminal"),
    ("iterm", "iTerm"),
    ("finder", "Finder"),
    ("notes", "Notes"),
    ("mail", "Mail"),
    ("calendar", "Calendar"),
    ("messages", "Messages"),
    // Other common apps
    ("slack", "Slack"),
    ("spotify", "Spotify"),
    ("discord", "Discord"),
    ("zoom", "zoom.us"),
    ("teams", "Microsoft Teams"),
];

/// Errors that can escape [`ActionExecutor::execute`].
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Invalid arguments for {action}: {reason}")]
    InvalidArguments { action: &'static str, reason: String },
    #[error("Failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },
}

/// The closed set of actions the model is allowed to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    OpenApp,
    OpenUrl,
    SearchGoogle,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [Self::OpenApp, Self::OpenUrl, Self::SearchGoogle];

    /// Resolves a function name sent by the model. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// The function name as advertised in the tool schema.
    pub fn name(self) -> &'static str {
        match self {
            Self::OpenApp => "openApp",
            Self::OpenUrl => "openUrl",
            Self::SearchGoogle => "searchGoogle",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Deserialize, JsonSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct OpenAppArgs {
    /// The name of the application to open (e.g., 'vscode', 'chrome', 'terminal')
    pub app_name: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct OpenUrlArgs {
    /// The URL to open (e.g., 'google.com', 'https://youtube.com', 'github.com')
    pub url: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct SearchGoogleArgs {
    /// The search query (e.g., 'best pizza near me', 'how to code in python', 'weather today')
    pub query: String,
}

/// The immediate "request accepted" value of an action.
///
/// It says nothing about whether the launched program actually started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionReceipt {
    pub kind: ActionKind,
    /// The argument the action was invoked with, as supplied by the model.
    pub subject: String,
    /// Human-readable description, e.g. `Opening Visual Studio Code`.
    pub summary: String,
}

impl ActionReceipt {
    /// Message reported back to the model alongside the summary.
    pub fn message(&self) -> String {
        match self.kind {
            ActionKind::OpenApp | ActionKind::OpenUrl => {
                format!("Successfully opened {}", self.subject)
            }
            ActionKind::SearchGoogle => format!("Successfully searched for {}", self.subject),
        }
    }
}

/// An OS-level "open" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchRequest {
    /// Launch an application by its canonical name.
    Application(String),
    /// Reveal a directory in the file manager.
    Directory(PathBuf),
    /// Open a URL in one specific browser.
    UrlInBrowser { browser: String, url: String },
}

impl LaunchRequest {
    fn args(&self) -> Vec<String> {
        match self {
            Self::Application(app) => vec!["-a".into(), app.clone()],
            Self::Directory(path) => vec![path.display().to_string()],
            Self::UrlInBrowser { browser, url } => {
                vec!["-a".into(), browser.clone(), url.clone()]
            }
        }
    }

    /// Renders the request as a shell-like command line for logs and errors.
    pub fn command_line(&self, program: &str) -> String {
        self.args()
            .iter()
            .fold(program.to_string(), |mut line, arg| {
                if arg.contains(' ') {
                    line.push_str(&format!(" \"{arg}\""));
                } else {
                    line.push(' ');
                    line.push_str(arg);
                }
                line
            })
    }
}

/// Final status of a detached launch, published after the process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    pub request: LaunchRequest,
    pub success: bool,
    pub detail: String,
}

/// Issues OS-level open requests.
///
/// Implementations must return as soon as the request has been handed to the
/// OS; an `Err` means the invocation could not even be constructed.
#[cfg_attr(test, mockall::automock)]
pub trait Launcher: Send + Sync {
    fn launch(&self, request: &LaunchRequest) -> io::Result<()>;

    /// The command line `launch` runs for `request`, as shown in errors.
    fn command_line(&self, request: &LaunchRequest) -> String;
}

/// Launches requests through the platform `open` program.
pub struct SystemLauncher {
    program: String,
    completions: Option<mpsc::UnboundedSender<LaunchOutcome>>,
}

impl SystemLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            completions: None,
        }
    }

    /// Publishes every launch outcome on `tx` once the child process exits.
    pub fn with_completions(mut self, tx: mpsc::UnboundedSender<LaunchOutcome>) -> Self {
        self.completions = Some(tx);
        self
    }
}

impl Launcher for SystemLauncher {
    fn command_line(&self, request: &LaunchRequest) -> String {
        request.command_line(&self.program)
    }

    fn launch(&self, request: &LaunchRequest) -> io::Result<()> {
        let command_line = self.command_line(request);
        info!(command = %command_line, "Executing command");

        let mut child = Command::new(&self.program)
            .args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let request = request.clone();
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) if status.success() => {
                    info!(command = %command_line, "Launch succeeded");
                    LaunchOutcome {
                        request,
                        success: true,
                        detail: status.to_string(),
                    }
                }
                Ok(status) => {
                    error!(command = %command_line, %status, "Launch failed");
                    LaunchOutcome {
                        request,
                        success: false,
                        detail: status.to_string(),
                    }
                }
                Err(e) => {
                    error!(command = %command_line, error = %e, "Failed to wait for launched process");
                    LaunchOutcome {
                        request,
                        success: false,
                        detail: e.to_string(),
                    }
                }
            };
            if let Some(tx) = completions {
                let _ = tx.send(outcome);
            }
        });
        Ok(())
    }
}

/// Resolves a spoken application name to a canonical one.
///
/// Unknown names are passed through unchanged.
pub fn resolve_app_name(app_name: &str) -> String {
    let normalized = normalize(app_name);
    APP_NICKNAMES
        .iter()
        .find(|(nickname, _)| *nickname == normalized)
        .map(|(_, canonical)| canonical.to_string())
        .unwrap_or_else(|| app_name.to_string())
}

/// Prefixes `https://` unless the URL already carries an http(s) scheme.
pub fn normalize_url(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

pub fn search_url(query: &str) -> String {
    format!("{SEARCH_URL_PREFIX}{}", urlencoding::encode(query))
}

fn normalize(app_name: &str) -> String {
    app_name
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Executes actions against a [`Launcher`]. Holds no per-call state.
pub struct ActionExecutor {
    launcher: Arc<dyn Launcher>,
    browser: String,
}

impl ActionExecutor {
    pub fn new(launcher: Arc<dyn Launcher>, browser: impl Into<String>) -> Self {
        Self {
            launcher,
            browser: browser.into(),
        }
    }

    /// Runs `kind` with the model-supplied JSON arguments.
    pub fn execute(&self, kind: ActionKind, args: &Value) -> Result<ActionReceipt, ActionError> {
        match kind {
            ActionKind::OpenApp => {
                let OpenAppArgs { app_name } = parse_args(kind, args)?;
                let summary = self.open_app(&app_name)?;
                Ok(ActionReceipt {
                    kind,
                    subject: app_name,
                    summary,
                })
            }
            ActionKind::OpenUrl => {
                let OpenUrlArgs { url } = parse_args(kind, args)?;
                let summary = self.open_url(&url)?;
                Ok(ActionReceipt {
                    kind,
                    subject: url,
                    summary,
                })
            }
            ActionKind::SearchGoogle => {
                let SearchGoogleArgs { query } = parse_args(kind, args)?;
                let summary = self.search_google(&query)?;
                Ok(ActionReceipt {
                    kind,
                    subject: query,
                    summary,
                })
            }
        }
    }

    pub fn open_app(&self, app_name: &str) -> Result<String, ActionError> {
        if normalize(app_name) == "finder" {
            self.launch(LaunchRequest::Directory(PathBuf::from(".")))?;
            return Ok("Opening Finder".to_string());
        }
        let resolved = resolve_app_name(app_name);
        self.launch(LaunchRequest::Application(resolved.clone()))?;
        Ok(format!("Opening {resolved}"))
    }

    pub fn open_url(&self, url: &str) -> Result<String, ActionError> {
        let full_url = normalize_url(url);
        info!(url = %full_url, browser = %self.browser, "Opening URL");
        self.launch(LaunchRequest::UrlInBrowser {
            browser: self.browser.clone(),
            url: full_url.clone(),
        })?;
        Ok(format!("Opening {full_url} in {}", self.browser))
    }

    pub fn search_google(&self, query: &str) -> Result<String, ActionError> {
        let url = search_url(query);
        info!(%query, %url, "Searching Google");
        self.launch(LaunchRequest::UrlInBrowser {
            browser: self.browser.clone(),
            url,
        })?;
        Ok(format!("Searching Google for \"{query}\""))
    }

    fn launch(&self, request: LaunchRequest) -> Result<(), ActionError> {
        self.launcher
            .launch(&request)
            .map_err(|source| ActionError::Launch {
                command: self.launcher.command_line(&request),
                source,
            })
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    kind: ActionKind,
    args: &Value,
) -> Result<T, ActionError> {
    T::deserialize(args).map_err(|e| ActionError::InvalidArguments {
        action: kind.name(),
        reason: e.to_string(),
    })
}
