use std::path::PathBuf;

/// Invalid or conflicting run configuration. Always fatal before any check runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("group option and check option can't be used together")]
    GroupAndCheckList,

    #[error("at least one of scored or unscored must be selected")]
    NoScoringSelected,

    #[error("no '{0}' section in configuration")]
    MissingNodeSection(String),

    #[error("component '{0}' is listed but has no configuration section")]
    MissingComponent(String),

    #[error("couldn't read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("can't find benchmark directory for version {version} in {dir}")]
    BenchmarkNotFound { dir: PathBuf, version: String },

    #[error("invalid benchmark version '{0}' (expected MAJOR.MINOR)")]
    InvalidVersion(String),

    #[error("unable to determine Kubernetes version; pass --version explicitly")]
    VersionUndetected,
}

/// The rule document could not be read or does not describe a valid benchmark.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("error opening controls file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("controls document is not valid{}: {message}", location_suffix(.line, .column))]
    Syntax {
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    #[error("{context}: missing required field '{field}'")]
    MissingField { context: String, field: &'static str },

    #[error("duplicate group id '{0}'")]
    DuplicateGroup(String),

    #[error("duplicate check id '{check}' in group '{group}'")]
    DuplicateCheck { group: String, check: String },

    #[error("check {check}: {reason}")]
    InvalidTest { check: String, reason: String },

    #[error("controls document is for {found} nodes, expected {expected}")]
    NodeTypeMismatch { expected: String, found: String },
}

fn location_suffix(line: &Option<usize>, column: &Option<usize>) -> String {
    match (line, column) {
        (Some(l), Some(c)) => format!(" at line {} column {}", l, c),
        (Some(l), None) => format!(" at line {}", l),
        _ => String::new(),
    }
}

impl From<serde_yaml::Error> for LoadError {
    fn from(err: serde_yaml::Error) -> Self {
        let location = err.location();
        LoadError::Syntax {
            message: err.to_string(),
            line: location.as_ref().map(|l| l.line()),
            column: location.as_ref().map(|l| l.column()),
        }
    }
}

/// Structural failure of a run: nothing was executed.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

pub type EngineResult<T> = Result<T, EngineError>;
