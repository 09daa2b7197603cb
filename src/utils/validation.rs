use anyhow::{Result, anyhow};

/// Maximum length of a full project path
pub const MAX_PATH_LENGTH: usize = 1024;

/// Maximum length of a single file or folder name
pub const MAX_FILENAME_LENGTH: usize = 150;

/// Names that collide with object properties in the editor's file tree
const BLOCKED_FILENAMES: &[&str] = &[
    "prototype",
    "constructor",
    "toString",
    "toLocaleString",
    "valueOf",
    "hasOwnProperty",
    "isPrototypeOf",
    "propertyIsEnumerable",
    "__proto__",
    "__defineGetter__",
    "__defineSetter__",
    "__lookupGetter__",
    "__lookupSetter__",
];

/// Compilers a project can be created with
pub const ALLOWED_COMPILERS: &[&str] = &["pdflatex", "latex", "xelatex", "lualatex"];

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error for a request field that is absent or empty
    pub fn missing(field: &str) -> Self {
        Self::new("MISSING_FIELD", format!("missing {}", field))
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validates a single file or folder name
pub fn validate_filename(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(anyhow!(ValidationError::new(
            "INVALID_FILENAME",
            "Filename cannot be empty",
        )));
    }

    if name.chars().count() > MAX_FILENAME_LENGTH {
        return Err(anyhow!(ValidationError::new(
            "INVALID_FILENAME",
            format!("Filename is longer than {} characters", MAX_FILENAME_LENGTH),
        )));
    }

    if name == "." || name == ".." {
        return Err(anyhow!(ValidationError::new(
            "INVALID_FILENAME",
            format!("'{}' is not a valid filename", name),
        )));
    }

    if name.starts_with(' ') || name.ends_with(' ') {
        return Err(anyhow!(ValidationError::new(
            "INVALID_FILENAME",
            "Filename cannot start or end with a space",
        )));
    }

    // Path separators, wildcards, control characters and lone surrogates
    let bad_char = name
        .chars()
        .find(|&c| c == '/' || c == '\\' || c == '*' || c.is_control());
    if let Some(c) = bad_char {
        return Err(anyhow!(ValidationError::new(
            "INVALID_FILENAME",
            format!("Filename contains invalid character {:?}", c),
        )));
    }

    if BLOCKED_FILENAMES.contains(&name) {
        return Err(anyhow!(ValidationError::new(
            "BLOCKED_FILENAME",
            format!("'{}' is a reserved filename", name),
        )));
    }

    Ok(())
}

/// Validates a relative project path such as `figures/plot.png`
pub fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(anyhow!(ValidationError::new(
            "INVALID_PATH",
            "Path cannot be empty",
        )));
    }

    if path.len() > MAX_PATH_LENGTH {
        return Err(anyhow!(ValidationError::new(
            "INVALID_PATH",
            format!("Path is longer than {} bytes", MAX_PATH_LENGTH),
        )));
    }

    if path.starts_with('/') || path.ends_with('/') {
        return Err(anyhow!(ValidationError::new(
            "INVALID_PATH",
            format!("'{}' must be relative and name a file", path),
        )));
    }

    for component in path.split('/') {
        validate_filename(component)
            .map_err(|e| anyhow!(ValidationError::new("INVALID_PATH", e.to_string())))?;
    }

    Ok(())
}

/// Maps an engine alias to a supported compiler, defaulting to pdflatex
pub fn normalize_compiler(engine: Option<&str>) -> Result<String> {
    let engine = match engine.map(str::trim) {
        None | Some("") => return Ok("pdflatex".to_string()),
        Some(e) => e.to_lowercase(),
    };

    let compiler = match engine.as_str() {
        "latex_dvipdf" => "latex",
        other => other,
    };

    if ALLOWED_COMPILERS.contains(&compiler) {
        Ok(compiler.to_string())
    } else {
        Err(anyhow!(ValidationError::new(
            "INVALID_ENGINE",
            format!("unsupported engine '{}'", engine),
        )))
    }
}

/// Accepts only absolute http(s) URLs
pub fn validate_http_url(raw: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(raw).map_err(|e| {
        anyhow!(ValidationError::new(
            "INVALID_URL",
            format!("'{}' is not a valid url: {}", raw, e),
        ))
    })?;

    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(anyhow!(ValidationError::new(
            "INVALID_URL",
            format!("'{}' must be an http or https url", raw),
        ))),
    }
}
