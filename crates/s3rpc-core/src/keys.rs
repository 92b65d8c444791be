//! Object key scheme.
//!
//! Every payload is stored under `<direction>/<operation>/<basename>`:
//!
//! ```text
//! to_server/<operation>/<correlation-id>_<filename>   request
//! to_client/<operation>/<correlation-id>_<filename>   response
//! ```
//!
//! The response reuses the request's basename byte for byte, so the
//! correlation id can be found with a substring match on the consuming side.
//!
//! # Examples
//!
//! ```
//! use s3rpc_core::{CorrelationId, Direction, ObjectKey};
//!
//! let id = CorrelationId::new();
//! let request = ObjectKey::request("resize", &id, "/tmp/photo.jpg").unwrap();
//! assert_eq!(request.to_string(), format!("to_server/resize/{id}_photo.jpg"));
//!
//! let response = request.response();
//! assert_eq!(response.direction, Direction::ToClient);
//! assert_eq!(response.basename, request.basename);
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::KeyError;
use crate::types::CorrelationId;

/// Separator between key segments.
pub const SEPARATOR: char = '/';

/// Which side an object is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// A request, consumed by the server.
    ToServer,
    /// A response, consumed by the client.
    ToClient,
}

impl Direction {
    /// Key prefix segment for this direction.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToServer => "to_server",
            Self::ToClient => "to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "to_server" => Ok(Self::ToServer),
            "to_client" => Ok(Self::ToClient),
            _ => Err(()),
        }
    }
}

/// A parsed object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    /// Direction segment.
    pub direction: Direction,
    /// Operation name segment.
    pub operation: String,
    /// Last segment; `<correlation-id>_<filename>`.
    pub basename: String,
}

impl ObjectKey {
    /// Build the request key for a call of `operation` with payload `filename`.
    ///
    /// Only the file's base name ends up in the key.
    pub fn request(
        operation: &str,
        id: &CorrelationId,
        filename: impl AsRef<Path>,
    ) -> Result<Self, KeyError> {
        validate_operation(operation)?;
        let filename = filename.as_ref();
        let base = filename
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| KeyError::MissingBaseName(filename.display().to_string()))?;
        if base.contains(SEPARATOR) {
            return Err(KeyError::BaseNameContainsSeparator(base.to_owned()));
        }

        Ok(Self {
            direction: Direction::ToServer,
            operation: operation.to_owned(),
            basename: format!("{id}_{base}"),
        })
    }

    /// Build the response key for `operation`, reusing the request basename.
    pub fn response_for(operation: &str, basename: &str) -> Result<Self, KeyError> {
        validate_operation(operation)?;
        if basename.is_empty() {
            return Err(KeyError::MissingBaseName(basename.to_owned()));
        }
        if basename.contains(SEPARATOR) {
            return Err(KeyError::BaseNameContainsSeparator(basename.to_owned()));
        }

        Ok(Self {
            direction: Direction::ToClient,
            operation: operation.to_owned(),
            basename: basename.to_owned(),
        })
    }

    /// The response key answering this request key.
    #[must_use]
    pub fn response(&self) -> Self {
        Self {
            direction: Direction::ToClient,
            operation: self.operation.clone(),
            basename: self.basename.clone(),
        }
    }

    /// Parse `<direction>/<operation>/<basename>`.
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let mut segments = key.split(SEPARATOR);
        let (Some(direction), Some(operation), Some(basename), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(KeyError::Malformed(key.to_owned()));
        };

        if operation.is_empty() || basename.is_empty() {
            return Err(KeyError::Malformed(key.to_owned()));
        }

        let direction = direction
            .parse::<Direction>()
            .map_err(|()| KeyError::UnknownDirection {
                key: key.to_owned(),
                direction: direction.to_owned(),
            })?;

        Ok(Self {
            direction,
            operation: operation.to_owned(),
            basename: basename.to_owned(),
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.direction, self.operation, self.basename)
    }
}

impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Check that `operation` can be used as a key segment.
pub fn validate_operation(operation: &str) -> Result<(), KeyError> {
    if operation.is_empty() {
        return Err(KeyError::EmptyOperation);
    }
    if operation.contains(SEPARATOR) {
        return Err(KeyError::OperationContainsSeparator(operation.to_owned()));
    }
    Ok(())
}
