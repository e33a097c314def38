//! Output formatting.

use crate::cli::OutputFormat;
use serde::Serialize;

/// What happened to one component file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// The file uses PaperScript and was rewritten.
    Transformed,
    /// The file failed to read, compile or write.
    Error,
}

/// A per-file line in the report. Plain components are not reported.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    /// Path relative to the workspace.
    pub filename: String,
    pub status: FileStatus,
    /// Where the transformed file was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileReport {
    pub fn transformed(filename: impl Into<String>, output: Option<String>) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Transformed,
            output,
            message: None,
        }
    }

    pub fn error(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: FileStatus::Error,
            output: None,
            message: Some(message.into()),
        }
    }
}

/// Summary of a preprocessing run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    /// Number of component files scanned.
    pub file_count: usize,
    /// Number of files rewritten.
    pub transformed_count: usize,
    /// Number of files that failed.
    pub error_count: usize,
    /// Per-file results, sorted by file name.
    pub files: Vec<FileReport>,
}

impl RunSummary {
    /// Builds a summary from per-file reports.
    pub fn new(file_count: usize, mut files: Vec<FileReport>) -> Self {
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        let error_count = files
            .iter()
            .filter(|file| file.status == FileStatus::Error)
            .count();
        Self {
            file_count,
            transformed_count: files.len() - error_count,
            error_count,
            files,
        }
    }

    /// Formats the report in the requested format.
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Human => self.format_human(),
            OutputFormat::Json => {
                serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
            }
        }
    }

    fn format_human(&self) -> String {
        let mut output = String::new();
        for file in &self.files {
            if let Some(message) = &file.message {
                output.push_str(&format!("{}\nError: {}\n\n", file.filename, message));
            }
        }
        output.push_str(&self.format());
        output
    }

    /// Formats the summary line.
    pub fn format(&self) -> String {
        let error_word = if self.error_count == 1 {
            "error"
        } else {
            "errors"
        };
        let file_word = if self.file_count == 1 {
            "file"
        } else {
            "files"
        };

        format!(
            "====================================\nsvelte-paperscript transformed {} of {} {} with {} {}",
            self.transformed_count, self.file_count, file_word, self.error_count, error_word
        )
    }
}
