//! Batch pipeline: parse, validate and convert a set of sources into one
//! [`PackageList`], then check that names and identifiers are unique across
//! the whole batch.

use crate::convert::{convert, ConvertError};
use crate::engine::ParseError;
use crate::model::{Package, PackageList};
use crate::parser::Parser;
use crate::validate::{validate, ValidationError};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// One input unit, read fully into memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Shown in diagnostics; usually the file path.
    pub name: String,
    pub text: Vec<u8>,
}

impl Source {
    pub fn new(name: impl Into<String>, text: impl Into<Vec<u8>>) -> Self {
        Source {
            name: name.into(),
            text: text.into(),
        }
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        Ok(Source {
            name: path.display().to_string(),
            text: std::fs::read(path)?,
        })
    }
}

/// Failure local to one file; other files are still processed.
#[derive(Debug, thiserror::Error)]
pub enum FileError {
    #[error("{file}: {error}")]
    Io {
        file: String,
        #[source]
        error: std::io::Error,
    },
    #[error("{file}: {error}")]
    Parse { file: String, error: ParseError },
    #[error("{file}: package `{package}' is invalid ({} problem(s))", .errors.len())]
    Invalid {
        file: String,
        package: String,
        errors: Vec<ValidationError>,
    },
}

impl FileError {
    pub fn file(&self) -> &str {
        match self {
            FileError::Io { file, .. }
            | FileError::Parse { file, .. }
            | FileError::Invalid { file, .. } => file,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    #[error("duplicated package definition `{name}' ({first} and {second})")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },
    #[error("duplicated identifier {identifier} for packages `{first}' and `{second}'")]
    DuplicateIdentifier {
        identifier: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("{} file(s) failed to compile", .0.len())]
    Files(Vec<FileError>),
    #[error("{} conflict(s) between packages", .0.len())]
    Batch(Vec<BatchError>),
    #[error("{file}: unexpected error analysing package `{package}': {error}")]
    Internal {
        file: String,
        package: String,
        error: ConvertError,
    },
}

fn find_conflicts(compiled: &[(String, Package)]) -> Vec<BatchError> {
    let mut errors = Vec::new();
    let mut names: HashMap<&str, &str> = HashMap::new();
    let mut identifiers: HashMap<u8, &str> = HashMap::new();
    for (file, package) in compiled {
        if let Some(first) = names.insert(&package.name, file) {
            errors.push(BatchError::DuplicateName {
                name: package.name.clone(),
                first: first.to_string(),
                second: file.clone(),
            });
        }
        if let Some(first) = identifiers.insert(package.identifier, &package.name) {
            errors.push(BatchError::DuplicateIdentifier {
                identifier: package.identifier_hex(),
                first: first.to_string(),
                second: package.name.clone(),
            });
        }
    }
    errors
}

/// Compile every source. Nothing is returned unless the whole batch is clean.
pub fn compile(parser: &Parser, sources: &[Source]) -> Result<PackageList, CompileError> {
    let mut failures = Vec::new();
    let mut compiled: Vec<(String, Package)> = Vec::new();

    for source in sources {
        let packages = match parser.parse_bytes(&source.text) {
            Ok(packages) => packages,
            Err(error) => {
                warn!(file = %source.name, %error, "parse failed");
                failures.push(FileError::Parse {
                    file: source.name.clone(),
                    error,
                });
                continue;
            }
        };
        debug!(file = %source.name, packages = packages.len(), "parsed");
        for package in &packages {
            let errors = validate(package);
            if !errors.is_empty() {
                warn!(
                    file = %source.name,
                    package = %package.name,
                    problems = errors.len(),
                    "package rejected"
                );
                failures.push(FileError::Invalid {
                    file: source.name.clone(),
                    package: package.name.clone(),
                    errors,
                });
                continue;
            }
            let converted = convert(package).map_err(|error| CompileError::Internal {
                file: source.name.clone(),
                package: package.name.clone(),
                error,
            })?;
            compiled.push((source.name.clone(), converted));
        }
    }

    if !failures.is_empty() {
        return Err(CompileError::Files(failures));
    }
    let conflicts = find_conflicts(&compiled);
    if !conflicts.is_empty() {
        return Err(CompileError::Batch(conflicts));
    }

    let mut list: PackageList = compiled.into_iter().map(|(_, p)| p).collect();
    list.sort_by_identifier();
    info!(files = sources.len(), packages = list.len(), "compiled");
    Ok(list)
}

/// Read then [`compile`]. Unreadable files are reported like any other file error.
pub fn compile_paths<P: AsRef<Path>>(
    parser: &Parser,
    paths: &[P],
) -> Result<PackageList, CompileError> {
    let mut sources = Vec::with_capacity(paths.len());
    let mut failures = Vec::new();
    for path in paths {
        let path = path.as_ref();
        match Source::read(path) {
            Ok(source) => sources.push(source),
            Err(error) => failures.push(FileError::Io {
                file: path.display().to_string(),
                error,
            }),
        }
    }
    match compile(parser, &sources) {
        Err(CompileError::Files(mut rest)) if !failures.is_empty() => {
            failures.append(&mut rest);
            Err(CompileError::Files(failures))
        }
        _ if !failures.is_empty() => Err(CompileError::Files(failures)),
        result => result,
    }
}
