// Allow unused_assignments lint for error struct fields that are used in thiserror Display macros
// but appear as "never read" to the compiler.
#![allow(unused_assignments)]

//! Error types for reconstruction with rich diagnostics.
//!
//! Only construction-phase failures (point-cloud assembly, tetrahedralization)
//! and I/O are errors. Voting anomalies are counted and reported instead, and
//! the min-cut and filtering stages cannot fail.
//!
//! # Error Codes
//!
//! - `FUSECUT-1xxx`: I/O errors
//! - `FUSECUT-2xxx`: Geometry errors (too few points, degenerate configurations)
//! - `FUSECUT-3xxx`: Configuration errors
//! - `FUSECUT-4xxx`: Diagnostic dump format errors

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for reconstruction operations.
pub type FuseCutResult<T> = Result<T, FuseCutError>;

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuseCutErrorCode {
    /// FUSECUT-1001: Failed to read file
    IoRead = 1001,
    /// FUSECUT-1002: Failed to write file
    IoWrite = 1002,
    /// FUSECUT-1003: Mesh container failure
    Mesh = 1003,

    /// FUSECUT-2001: Fewer than 4 usable points
    InsufficientGeometry = 2001,
    /// FUSECUT-2002: Points are coplanar or otherwise degenerate
    DegenerateGeometry = 2002,
    /// FUSECUT-2003: Camera id outside the camera set
    UnknownCamera = 2003,

    /// FUSECUT-3001: Parameter out of range
    InvalidParameter = 3001,
    /// FUSECUT-3002: Configuration file could not be parsed
    ConfigParse = 3002,

    /// FUSECUT-4001: Dump file is malformed
    MalformedDump = 4001,
}

impl FuseCutErrorCode {
    /// Returns the error code as a string in the format `FUSECUT-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            FuseCutErrorCode::IoRead => "FUSECUT-1001",
            FuseCutErrorCode::IoWrite => "FUSECUT-1002",
            FuseCutErrorCode::Mesh => "FUSECUT-1003",
            FuseCutErrorCode::InsufficientGeometry => "FUSECUT-2001",
            FuseCutErrorCode::DegenerateGeometry => "FUSECUT-2002",
            FuseCutErrorCode::UnknownCamera => "FUSECUT-2003",
            FuseCutErrorCode::InvalidParameter => "FUSECUT-3001",
            FuseCutErrorCode::ConfigParse => "FUSECUT-3002",
            FuseCutErrorCode::MalformedDump => "FUSECUT-4001",
        }
    }
}

impl std::fmt::Display for FuseCutErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recovery suggestions for reconstruction errors.
#[derive(Debug, Clone, PartialEq)]
pub enum FuseCutRecoverySuggestion {
    /// Provide more input data (cameras, depth maps, landmarks).
    ProvideMoreInput,
    /// Enlarge the bounding region or add helper points.
    EnlargeRegion,
    /// Fix a configuration value.
    AdjustParameter { name: String, hint: String },
    /// Check the file system.
    CheckPath { path: PathBuf },
    /// No specific suggestion.
    None,
}

impl std::fmt::Display for FuseCutRecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FuseCutRecoverySuggestion::ProvideMoreInput => write!(
                f,
                "Provide more cameras or depth maps, or lower minVis/minStep"
            ),
            FuseCutRecoverySuggestion::EnlargeRegion => write!(
                f,
                "Check the bounding hexahedron and enable helper points"
            ),
            FuseCutRecoverySuggestion::AdjustParameter { name, hint } => {
                write!(f, "Adjust `{}`: {}", name, hint)
            }
            FuseCutRecoverySuggestion::CheckPath { path } => {
                write!(f, "Check that {} exists and is accessible", path.display())
            }
            FuseCutRecoverySuggestion::None => write!(f, "No specific suggestion available"),
        }
    }
}

/// Errors that can occur during reconstruction.
#[derive(Debug, Error, Diagnostic)]
pub enum FuseCutError {
    /// Not enough points for a 3D triangulation.
    #[error("insufficient geometry: {points} usable point(s), {details}")]
    #[diagnostic(
        code(fuse_cut::geometry::insufficient),
        help("A tetrahedralization needs at least 4 non-coplanar points inside the bounding region.")
    )]
    InsufficientGeometry { points: usize, details: String },

    /// All points lie on a plane (or line).
    #[error("degenerate geometry: {details}")]
    #[diagnostic(
        code(fuse_cut::geometry::degenerate),
        help("Add helper points or camera centers so the point set spans a volume.")
    )]
    DegenerateGeometry { details: String },

    /// Camera id not present in the camera set.
    #[error("unknown camera {camera}: only {camera_count} cameras are defined")]
    #[diagnostic(code(fuse_cut::input::camera))]
    UnknownCamera { camera: u32, camera_count: usize },

    /// Parameter out of its valid range.
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    #[diagnostic(code(fuse_cut::config::invalid))]
    InvalidParameter {
        name: &'static str,
        value: String,
        reason: String,
    },

    /// Configuration could not be parsed.
    #[error("failed to parse configuration: {details}")]
    #[diagnostic(
        code(fuse_cut::config::parse),
        help("Configuration files use TOML or JSON with snake_case keys.")
    )]
    ConfigParse { details: String },

    /// Error reading from a file.
    #[error("failed to read {path}")]
    #[diagnostic(code(fuse_cut::io::read))]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(fuse_cut::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Triangulation dump is truncated or from another version.
    #[error("malformed triangulation dump {path}: {details}")]
    #[diagnostic(code(fuse_cut::dump::malformed))]
    MalformedDump { path: PathBuf, details: String },

    /// Underlying mesh container error.
    #[error("mesh operation failed: {0}")]
    #[diagnostic(code(fuse_cut::mesh::error))]
    Mesh(#[from] mvs_mesh::MeshError),
}

impl FuseCutError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> FuseCutErrorCode {
        match self {
            FuseCutError::InsufficientGeometry { .. } => FuseCutErrorCode::InsufficientGeometry,
            FuseCutError::DegenerateGeometry { .. } => FuseCutErrorCode::DegenerateGeometry,
            FuseCutError::UnknownCamera { .. } => FuseCutErrorCode::UnknownCamera,
            FuseCutError::InvalidParameter { .. } => FuseCutErrorCode::InvalidParameter,
            FuseCutError::ConfigParse { .. } => FuseCutErrorCode::ConfigParse,
            FuseCutError::IoRead { .. } => FuseCutErrorCode::IoRead,
            FuseCutError::IoWrite { .. } => FuseCutErrorCode::IoWrite,
            FuseCutError::MalformedDump { .. } => FuseCutErrorCode::MalformedDump,
            FuseCutError::Mesh(_) => FuseCutErrorCode::Mesh,
        }
    }

    /// Returns a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> FuseCutRecoverySuggestion {
        match self {
            FuseCutError::InsufficientGeometry { .. } => FuseCutRecoverySuggestion::ProvideMoreInput,
            FuseCutError::DegenerateGeometry { .. } => FuseCutRecoverySuggestion::EnlargeRegion,
            FuseCutError::UnknownCamera { .. } => FuseCutRecoverySuggestion::AdjustParameter {
                name: "cams".into(),
                hint: "select only ids of calibrated cameras".into(),
            },
            FuseCutError::InvalidParameter { name, reason, .. } => {
                FuseCutRecoverySuggestion::AdjustParameter {
                    name: (*name).into(),
                    hint: reason.clone(),
                }
            }
            FuseCutError::IoRead { path, .. }
            | FuseCutError::IoWrite { path, .. }
            | FuseCutError::MalformedDump { path, .. } => {
                FuseCutRecoverySuggestion::CheckPath { path: path.clone() }
            }
            FuseCutError::ConfigParse { .. } | FuseCutError::Mesh(_) => FuseCutRecoverySuggestion::None,
        }
    }

    // Constructor helpers

    pub fn insufficient_geometry(points: usize, details: impl Into<String>) -> Self {
        FuseCutError::InsufficientGeometry {
            points,
            details: details.into(),
        }
    }

    pub fn degenerate_geometry(details: impl Into<String>) -> Self {
        FuseCutError::DegenerateGeometry {
            details: details.into(),
        }
    }

    pub fn invalid_parameter(
        name: &'static str,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        FuseCutError::InvalidParameter {
            name,
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    pub fn config_parse(details: impl Into<String>) -> Self {
        FuseCutError::ConfigParse {
            details: details.into(),
        }
    }

    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FuseCutError::IoRead {
            path: path.into(),
            source,
        }
    }

    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FuseCutError::IoWrite {
            path: path.into(),
            source,
        }
    }

    pub fn malformed_dump(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        FuseCutError::MalformedDump {
            path: path.into(),
            details: details.into(),
        }
    }
}
