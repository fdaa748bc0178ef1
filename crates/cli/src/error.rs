use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("{0}")]
	Uia(#[from] uia::Error),

	#[error("cannot read {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("cannot write {path}: {source}")]
	Write {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("{0}")]
	InvalidInput(String),

	/// The device answered but the action did not happen, e.g. nothing matched.
	#[error("{0}")]
	NotPerformed(String),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

impl CliError {
	/// One line for stderr, with a retry hint for transient failures.
	pub fn message(&self) -> String {
		match self {
			CliError::Uia(e) if e.is_retryable() => format!("{e} (retrying may help)"),
			other => other.to_string().replace('\n', " "),
		}
	}
}
