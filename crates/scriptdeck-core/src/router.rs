use scriptdeck_client::JobId;
use tracing::warn;
use url::form_urlencoded;

/// Which pane is primary. The script form is modal: it renders over the
/// pane remembered in `previous_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    ScriptList,
    ScriptForm,
    RunningList,
}

/// Parsed URL fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Empty or unrecognized fragment.
    None,
    ScriptsIndex,
    ScriptForm {
        script: String,
        /// Pre-fill values from a `?args=` query, used by "run again".
        args: Option<Vec<String>>,
    },
    RunningJob {
        job: JobId,
    },
}

impl Route {
    /// Parse a fragment like `#/scripts/foo?args=%5B%221%22%5D`. The
    /// leading `#` is optional. A malformed `args` query is logged and
    /// treated as absent; the form still opens with defaults.
    #[must_use]
    pub fn parse(fragment: &str) -> Self {
        let path = fragment.strip_prefix('#').unwrap_or(fragment);
        if path.is_empty() || path == "/" {
            return Self::None;
        }
        if let Some(rest) = path.strip_prefix("/scripts/") {
            if rest.is_empty() {
                return Self::ScriptsIndex;
            }
            let (script, query) = match rest.split_once('?') {
                Some((script, query)) => (script, Some(query)),
                None => (rest, None),
            };
            if script.is_empty() || script.contains('/') {
                return Self::None;
            }
            return Self::ScriptForm {
                script: script.to_string(),
                args: query.and_then(|query| parse_args_query(script, query)),
            };
        }
        if let Some(id) = path.strip_prefix("/running/") {
            if id.is_empty() || id.contains('/') {
                return Self::None;
            }
            return Self::RunningJob {
                job: JobId::new(id),
            };
        }
        Self::None
    }
}

fn parse_args_query(script: &str, query: &str) -> Option<Vec<String>> {
    let raw = form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "args")
        .map(|(_, value)| value.into_owned())?;
    match serde_json::from_str::<Vec<String>>(&raw) {
        Ok(args) => Some(args),
        Err(error) => {
            warn!(%script, %error, "ignoring malformed args in fragment");
            None
        }
    }
}

/// Fragment encoders, the inverse of [`Route::parse`].
pub mod routes {
    use scriptdeck_client::JobId;
    use url::form_urlencoded;

    #[must_use]
    pub fn scripts_index() -> String {
        "#/scripts/".to_string()
    }

    #[must_use]
    pub fn script_form(script: &str, args: Option<&[String]>) -> String {
        if let Some(args) = args {
            if let Ok(encoded) = serde_json::to_string(args) {
                let query = form_urlencoded::Serializer::new(String::new())
                    .append_pair("args", &encoded)
                    .finish();
                return format!("#/scripts/{script}?{query}");
            }
        }
        format!("#/scripts/{script}")
    }

    #[must_use]
    pub fn running(job: &JobId) -> String {
        format!("#/running/{job}")
    }
}

/// Mode machine over fragment-change events.
///
/// `mode` is sticky: a running-job fragment highlights the job but leaves
/// the primary pane alone; only the scripts index or a form fragment
/// switches it. Opening the form remembers the pane underneath in
/// `previous_mode`, and any navigation away from the form (history back
/// lands on whatever fragment preceded it) falls back to that pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterState {
    pub mode: Mode,
    pub previous_mode: Mode,
    pub active_script: Option<String>,
    pub prefill_args: Option<Vec<String>>,
    pub focused_job: Option<JobId>,
    /// True until the first fragment is applied. A deep link to a running
    /// job on a fresh router starts in the running pane.
    fresh: bool,
}

impl Default for RouterState {
    fn default() -> Self {
        Self {
            mode: Mode::ScriptList,
            previous_mode: Mode::ScriptList,
            active_script: None,
            prefill_args: None,
            focused_job: None,
            fresh: true,
        }
    }
}

impl RouterState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_fragment(&mut self, fragment: &str) {
        self.apply(Route::parse(fragment));
    }

    pub fn apply(&mut self, route: Route) {
        let fresh = std::mem::take(&mut self.fresh);
        match route {
            Route::None => {
                if self.mode == Mode::ScriptForm {
                    self.mode = self.previous_mode;
                }
                self.active_script = None;
                self.prefill_args = None;
                self.focused_job = None;
            }
            Route::ScriptsIndex => {
                self.mode = Mode::ScriptList;
                self.active_script = None;
                self.prefill_args = None;
                self.focused_job = None;
            }
            Route::ScriptForm { script, args } => {
                if self.mode != Mode::ScriptForm {
                    self.previous_mode = self.mode;
                    self.mode = Mode::ScriptForm;
                }
                self.active_script = Some(script);
                self.prefill_args = args;
                self.focused_job = None;
            }
            Route::RunningJob { job } => {
                if self.mode == Mode::ScriptForm {
                    self.mode = self.previous_mode;
                    self.active_script = None;
                    self.prefill_args = None;
                } else if fresh {
                    self.mode = Mode::RunningList;
                }
                self.focused_job = Some(job);
            }
        }
    }

    /// The open form, while one is open: script id plus any prefill.
    #[must_use]
    pub fn form(&self) -> Option<(&str, Option<&[String]>)> {
        if self.mode != Mode::ScriptForm {
            return None;
        }
        self.active_script
            .as_deref()
            .map(|script| (script, self.prefill_args.as_deref()))
    }
}
