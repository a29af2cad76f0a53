use std::fmt;

#[derive(Debug)]
pub enum EntireError {
    IoError(std::io::Error),
    /// Errors from invoking the git CLI that exited with a non-zero status
    GitCliError {
        code: Option<i32>,
        stderr: String,
        args: Vec<String>,
    },
    JsonError(serde_json::Error),
    Utf8Error(std::str::Utf8Error),
    FromUtf8Error(std::string::FromUtf8Error),
    /// Deleting or reading a branch that does not exist. Callers that want
    /// idempotent deletes can treat this as success.
    BranchNotFound(String),
    /// A compare-and-swap ref update lost the race. Callers re-read the tip
    /// and retry.
    RefUpdateConflict(String),
    Generic(String),
}

impl fmt::Display for EntireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntireError::IoError(e) => write!(f, "IO error: {}", e),
            EntireError::GitCliError { code, stderr, args } => match code {
                Some(c) => write!(
                    f,
                    "Git CLI ({}) failed with exit code {}: {}",
                    args.join(" "),
                    c,
                    stderr
                ),
                None => write!(f, "Git CLI ({}) failed: {}", args.join(" "), stderr),
            },
            EntireError::JsonError(e) => write!(f, "JSON error: {}", e),
            EntireError::Utf8Error(e) => write!(f, "UTF-8 error: {}", e),
            EntireError::FromUtf8Error(e) => write!(f, "From UTF-8 error: {}", e),
            EntireError::BranchNotFound(name) => write!(f, "Branch not found: {}", name),
            EntireError::RefUpdateConflict(r) => write!(f, "Ref update conflict on {}", r),
            EntireError::Generic(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EntireError {}

impl From<std::io::Error> for EntireError {
    fn from(err: std::io::Error) -> Self {
        EntireError::IoError(err)
    }
}

impl From<serde_json::Error> for EntireError {
    fn from(err: serde_json::Error) -> Self {
        EntireError::JsonError(err)
    }
}

impl From<std::str::Utf8Error> for EntireError {
    fn from(err: std::str::Utf8Error) -> Self {
        EntireError::Utf8Error(err)
    }
}

impl From<std::string::FromUtf8Error> for EntireError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        EntireError::FromUtf8Error(err)
    }
}

impl Clone for EntireError {
    fn clone(&self) -> Self {
        match self {
            EntireError::IoError(e) => {
                EntireError::IoError(std::io::Error::new(e.kind(), e.to_string()))
            }
            EntireError::GitCliError { code, stderr, args } => EntireError::GitCliError {
                code: *code,
                stderr: stderr.clone(),
                args: args.clone(),
            },
            EntireError::JsonError(e) => EntireError::Generic(format!("JSON error: {}", e)),
            EntireError::Utf8Error(e) => EntireError::Utf8Error(*e),
            EntireError::FromUtf8Error(e) => EntireError::FromUtf8Error(e.clone()),
            EntireError::BranchNotFound(name) => EntireError::BranchNotFound(name.clone()),
            EntireError::RefUpdateConflict(r) => EntireError::RefUpdateConflict(r.clone()),
            EntireError::Generic(s) => EntireError::Generic(s.clone()),
        }
    }
}
