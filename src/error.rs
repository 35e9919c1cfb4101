use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/**
 * 应用错误类型 - 使用 miette 提供用户友好的错误诊断
 *
 * Every variant that concerns a file carries the offending path so callers
 * can tell which file broke a store or a sweep.
 */
#[derive(Error, Debug, Diagnostic)]
pub enum AppError {
    #[error("IO error: {message} ({})", .path.display())]
    #[diagnostic(
        code(app::io_error_detailed),
        help("Check that the path exists and is readable/writable")
    )]
    IoDetailed { message: String, path: PathBuf },

    #[error("Hash error: {message} ({})", .path.display())]
    #[diagnostic(
        code(app::hash_error),
        help("The file could not be read to the end; it may be locked or truncated")
    )]
    Hash { message: String, path: PathBuf },

    #[error("Persistence error: {0}")]
    #[diagnostic(
        code(app::persistence_error),
        help("Check database connection and schema integrity")
    )]
    Persistence(String),

    #[error("Sweep aborted at {}: {message}", .path.display())]
    #[diagnostic(
        code(app::walk_abort),
        help("Duplicates removed before the failure stay removed; rerun the sweep after fixing the cause")
    )]
    WalkAbort {
        message: String,
        path: PathBuf,
        #[source]
        source: Option<Box<AppError>>,
    },

    #[error("Archive error: {message}")]
    #[diagnostic(
        code(app::archive_error),
        help("Ensure the archive file is not corrupted and is a supported format")
    )]
    Archive {
        message: String,
        path: Option<PathBuf>,
    },

    #[error("Configuration error: {0}")]
    #[diagnostic(code(app::config_error))]
    Config(String),

    #[error("Validation error: {0}")]
    #[diagnostic(
        code(app::validation_error),
        help("Check that your input meets the required format and constraints")
    )]
    Validation(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(app::not_found))]
    NotFound(String),
}

impl AppError {
    /**
     * 创建详细的IO错误
     */
    pub fn io_error(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        AppError::IoDetailed {
            message: message.into(),
            path: path.into(),
        }
    }

    /**
     * 创建哈希错误
     */
    pub fn hash_error(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        AppError::Hash {
            message: message.into(),
            path: path.into(),
        }
    }

    /**
     * 创建持久化错误
     */
    pub fn persistence_error(message: impl Into<String>) -> Self {
        AppError::Persistence(message.into())
    }

    /**
     * 包装一次扫描中断
     */
    pub fn walk_abort(path: impl Into<PathBuf>, cause: AppError) -> Self {
        AppError::WalkAbort {
            message: cause.to_string(),
            path: path.into(),
            source: Some(Box::new(cause)),
        }
    }

    /**
     * 创建归档错误
     */
    pub fn archive_error(message: impl Into<String>, path: Option<PathBuf>) -> Self {
        AppError::Archive {
            message: message.into(),
            path,
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        AppError::Config(message.into())
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    /// Path the error refers to, when it carries one.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            AppError::IoDetailed { path, .. }
            | AppError::Hash { path, .. }
            | AppError::WalkAbort { path, .. } => Some(path),
            AppError::Archive { path, .. } => path.as_deref(),
            _ => None,
        }
    }
}

/**
 * 统一结果类型
 */
pub type Result<T> = std::result::Result<T, AppError>;
