//! Semantic checks over a raw package.
//!
//! All problems are collected; validation never stops at the first one.
//! A duplicated struct's body is not inspected.

use crate::ast::{
    walk_package, ArrayDecl, FieldDecl, IdentifierDecl, Package, Scope, StructDecl, TypeSource,
    Visitor,
};
use crate::model::{parse_identifier, MAX_ARRAY_SIZE};
use std::collections::HashSet;
use std::convert::Infallible;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("duplicated identifier declaration")]
    DuplicatedIdentifier,
    #[error("package `{0}' has no identifier declaration")]
    MissingIdentifier(String),
    #[error("invalid identifier `{value}' for package `{package}' (must fit in one byte)")]
    InvalidIdentifier { package: String, value: String },
    #[error("duplicated field definition `{0}'")]
    DuplicatedField(String),
    #[error("duplicated struct definition `{0}'")]
    DuplicatedStruct(String),
    #[error("field `{field}' references unknown type `{kind}'")]
    UnknownType { field: String, kind: String },
    #[error("struct `{0}' has prohibited identifier declaration")]
    ProhibitedIdentifier(String),
    #[error("struct `{container}' has duplicated field definition `{field}'")]
    DuplicatedStructField { container: String, field: String },
    #[error("struct `{container}' has field with prohibited custom type `{field}'")]
    ProhibitedCustomType { container: String, field: String },
    #[error("invalid size for array field `{0}'")]
    InvalidArraySize(String),
    #[error("invalid size for array field `{0}' (minimum allowed is 1)")]
    ArrayTooSmall(String),
    #[error("invalid size for array field `{field}' (maximum allowed is {max})")]
    ArrayTooLarge { field: String, max: u64 },
}

/// Check an array size as written: `*` or a decimal in `1..=MAX_ARRAY_SIZE`.
pub fn check_array_size(field: &str, size: &str) -> Option<ValidationError> {
    if size == "*" {
        return None;
    }
    if size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
        return Some(ValidationError::InvalidArraySize(field.to_string()));
    }
    // all digits: only overflow can make this fail, and that is too large anyway
    match size.parse::<u64>() {
        Ok(0) => Some(ValidationError::ArrayTooSmall(field.to_string())),
        Ok(n) if n <= MAX_ARRAY_SIZE => None,
        _ => Some(ValidationError::ArrayTooLarge {
            field: field.to_string(),
            max: MAX_ARRAY_SIZE,
        }),
    }
}

#[derive(Default)]
struct Names<'ast> {
    fields: HashSet<&'ast str>,
    structs: HashSet<&'ast str>,
}

struct Validator<'ast> {
    package: &'ast Package,
    errors: Vec<ValidationError>,
    root: Names<'ast>,
    nested: Vec<Names<'ast>>,
    identifiers: usize,
    /// Top-level fields with user types, resolved once the walk is done.
    user_refs: Vec<(&'ast str, &'ast str)>,
}

impl<'ast> Validator<'ast> {
    fn new(package: &'ast Package) -> Self {
        Validator {
            package,
            errors: Vec::new(),
            root: Names::default(),
            nested: Vec::new(),
            identifiers: 0,
            user_refs: Vec::new(),
        }
    }

    fn names(&mut self) -> &mut Names<'ast> {
        self.nested.last_mut().unwrap_or(&mut self.root)
    }

    /// Record a member name in the current scope; false if it was taken.
    fn claim_field(&mut self, name: &'ast str) -> bool {
        self.names().fields.insert(name)
    }

    fn member(&mut self, scope: Scope<'ast>, name: &'ast str, source: TypeSource, kind: &'ast str) {
        let fresh = self.claim_field(name);
        match scope {
            Scope::Package(_) => {
                if !fresh {
                    self.errors.push(ValidationError::DuplicatedField(name.to_string()));
                } else if source == TypeSource::User {
                    self.user_refs.push((name, kind));
                }
            }
            Scope::Struct(s) => {
                if !fresh {
                    self.errors.push(ValidationError::DuplicatedStructField {
                        container: s.name.clone(),
                        field: name.to_string(),
                    });
                }
            }
        }
    }

    fn finish(mut self) -> Vec<ValidationError> {
        if self.identifiers == 0 {
            self.errors
                .push(ValidationError::MissingIdentifier(self.package.name.clone()));
        }
        for (field, kind) in std::mem::take(&mut self.user_refs) {
            if !self.root.structs.contains(kind) {
                self.errors.push(ValidationError::UnknownType {
                    field: field.to_string(),
                    kind: kind.to_string(),
                });
            }
        }
        self.errors
    }
}

impl<'ast> Visitor<'ast> for Validator<'ast> {
    type Error = Infallible;

    fn visit_identifier(
        &mut self,
        scope: Scope<'ast>,
        decl: &'ast IdentifierDecl,
    ) -> Result<(), Infallible> {
        match scope {
            Scope::Package(p) => {
                self.identifiers += 1;
                if self.identifiers > 1 {
                    self.errors.push(ValidationError::DuplicatedIdentifier);
                } else if parse_identifier(&decl.value).is_none() {
                    self.errors.push(ValidationError::InvalidIdentifier {
                        package: p.name.clone(),
                        value: decl.value.clone(),
                    });
                }
            }
            Scope::Struct(s) => self
                .errors
                .push(ValidationError::ProhibitedIdentifier(s.name.clone())),
        }
        Ok(())
    }

    fn visit_field(&mut self, scope: Scope<'ast>, decl: &'ast FieldDecl) -> Result<(), Infallible> {
        self.member(scope, &decl.name, decl.ty.source, &decl.ty.kind);
        if let Scope::Struct(s) = scope {
            if decl.ty.is_user() {
                self.errors.push(ValidationError::ProhibitedCustomType {
                    container: s.name.clone(),
                    field: decl.name.clone(),
                });
            }
        }
        Ok(())
    }

    fn visit_array(&mut self, scope: Scope<'ast>, decl: &'ast ArrayDecl) -> Result<(), Infallible> {
        self.member(scope, &decl.name, decl.ty.source, &decl.ty.kind);
        self.errors.extend(check_array_size(&decl.name, &decl.size));
        Ok(())
    }

    fn enter_struct(
        &mut self,
        _scope: Scope<'ast>,
        decl: &'ast StructDecl,
    ) -> Result<bool, Infallible> {
        if !self.names().structs.insert(&decl.name) {
            self.errors
                .push(ValidationError::DuplicatedStruct(decl.name.clone()));
            return Ok(false);
        }
        self.nested.push(Names::default());
        Ok(true)
    }

    fn leave_struct(&mut self, _decl: &'ast StructDecl) -> Result<(), Infallible> {
        self.nested.pop();
        Ok(())
    }
}

/// Validate one package. An empty result means it can be converted.
pub fn validate(package: &Package) -> Vec<ValidationError> {
    let mut validator = Validator::new(package);
    if let Err(never) = walk_package(&mut validator, package) {
        match never {}
    }
    validator.finish()
}
