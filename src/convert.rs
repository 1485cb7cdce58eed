//! Lower a validated raw package into the semantic [`model`](crate::model).
//!
//! Conversion assumes [`validate`](crate::validate::validate) returned no
//! errors. Anything it still cannot map is an internal-consistency defect and
//! aborts with a [`ConvertError`]; no partially built package escapes.

use crate::ast::{
    self, walk_package, ArrayDecl, FieldDecl, IdentifierDecl, Scope, StructDecl, TypeRef,
    TypeSource, Visitor,
};
use crate::model::{
    parse_identifier, ArraySize, Attribute, Field, NativeType, Package, Struct, Type,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConvertError {
    #[error("{path}: invalid native type `{tag}'")]
    UnknownNativeType { path: String, tag: String },
    #[error("{path}: invalid attribute `{tag}'")]
    UnknownAttribute { path: String, tag: String },
    #[error("{path}: invalid size `{size}' for array field")]
    InvalidArraySize { path: String, size: String },
    #[error("package `{0}' has no usable identifier")]
    MissingIdentifier(String),
}

#[derive(Default)]
struct Frame {
    name: String,
    fields: Vec<Field>,
    structs: Vec<Struct>,
}

/// `nested` follows the struct nesting path below the package frame.
struct Converter {
    root: Frame,
    nested: Vec<Frame>,
    identifier: Option<u8>,
}

impl Converter {
    fn frame(&mut self) -> &mut Frame {
        self.nested.last_mut().unwrap_or(&mut self.root)
    }

    /// Dotted location used in error messages, e.g. `foo.s.a`.
    fn path(&self, member: &str) -> String {
        let mut parts: Vec<&str> = std::iter::once(&self.root)
            .chain(&self.nested)
            .map(|f| f.name.as_str())
            .collect();
        parts.push(member);
        parts.join(".")
    }

    fn ty(&self, member: &str, ty: &TypeRef) -> Result<Type, ConvertError> {
        match ty.source {
            TypeSource::User => Ok(Type::User(ty.kind.clone())),
            TypeSource::Native => NativeType::from_tag(&ty.kind)
                .map(Type::Native)
                .ok_or_else(|| ConvertError::UnknownNativeType {
                    path: self.path(member),
                    tag: ty.kind.clone(),
                }),
        }
    }

    fn attributes(&self, member: &str, tags: &[String]) -> Result<Vec<Attribute>, ConvertError> {
        let mut attributes: Vec<Attribute> = Vec::with_capacity(tags.len());
        for tag in tags {
            let attribute = Attribute::from_tag(tag).ok_or_else(|| ConvertError::UnknownAttribute {
                path: self.path(member),
                tag: tag.clone(),
            })?;
            if !attributes.contains(&attribute) {
                attributes.push(attribute);
            }
        }
        Ok(attributes)
    }
}

impl<'ast> Visitor<'ast> for Converter {
    type Error = ConvertError;

    fn visit_identifier(
        &mut self,
        scope: Scope<'ast>,
        decl: &'ast IdentifierDecl,
    ) -> Result<(), ConvertError> {
        if scope.is_package() && self.identifier.is_none() {
            self.identifier = Some(
                parse_identifier(&decl.value)
                    .ok_or_else(|| ConvertError::MissingIdentifier(scope.name().to_string()))?,
            );
        }
        Ok(())
    }

    fn visit_field(
        &mut self,
        _scope: Scope<'ast>,
        decl: &'ast FieldDecl,
    ) -> Result<(), ConvertError> {
        let field = Field {
            name: decl.name.clone(),
            ty: self.ty(&decl.name, &decl.ty)?,
            array: None,
            attributes: self.attributes(&decl.name, &decl.attributes)?,
        };
        self.frame().fields.push(field);
        Ok(())
    }

    fn visit_array(
        &mut self,
        _scope: Scope<'ast>,
        decl: &'ast ArrayDecl,
    ) -> Result<(), ConvertError> {
        let size = ArraySize::parse(&decl.size).ok_or_else(|| ConvertError::InvalidArraySize {
            path: self.path(&decl.name),
            size: decl.size.clone(),
        })?;
        let field = Field {
            name: decl.name.clone(),
            ty: self.ty(&decl.name, &decl.ty)?,
            array: Some(size),
            attributes: self.attributes(&decl.name, &decl.attributes)?,
        };
        self.frame().fields.push(field);
        Ok(())
    }

    fn enter_struct(
        &mut self,
        _scope: Scope<'ast>,
        decl: &'ast StructDecl,
    ) -> Result<bool, ConvertError> {
        self.nested.push(Frame {
            name: decl.name.clone(),
            ..Frame::default()
        });
        Ok(true)
    }

    fn leave_struct(&mut self, _decl: &'ast StructDecl) -> Result<(), ConvertError> {
        if let Some(done) = self.nested.pop() {
            let converted = Struct {
                name: done.name,
                fields: done.fields,
                structs: done.structs,
            };
            self.frame().structs.push(converted);
        }
        Ok(())
    }
}

pub fn convert(package: &ast::Package) -> Result<Package, ConvertError> {
    let mut converter = Converter {
        root: Frame {
            name: package.name.clone(),
            ..Frame::default()
        },
        nested: Vec::new(),
        identifier: None,
    };
    walk_package(&mut converter, package)?;
    let identifier = converter
        .identifier
        .ok_or_else(|| ConvertError::MissingIdentifier(package.name.clone()))?;
    let root = converter.root;
    Ok(Package {
        name: root.name,
        identifier,
        fields: root.fields,
        structs: root.structs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Object;
    use crate::parser::parse;

    fn first(src: &str) -> ast::Package {
        parse(src).expect("parse").remove(0)
    }

    #[test]
    fn converts_nested_structs_in_order() {
        let p = convert(&first(
            "package foo { id 0x2a uint64 a \
             struct s { byte x struct t { bool y } uint8[3] z } @s[*] all }",
        ))
        .expect("convert");
        assert_eq!(p.identifier, 0x2a);
        assert_eq!(p.identifier_hex(), "0x2a");
        let names: Vec<&str> = p.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "all"]);
        assert_eq!(p.fields[1].ty, Type::User("s".to_string()));
        assert_eq!(p.fields[1].array, Some(ArraySize::Dynamic));

        let s = &p.structs[0];
        assert_eq!(s.name, "s");
        assert_eq!(s.fields.len(), 2);
        assert_eq!(s.fields[1].array, Some(ArraySize::Fixed(3)));
        assert_eq!(s.structs[0].name, "t");
        assert_eq!(s.structs[0].fields[0].ty, Type::Native(NativeType::Bool));
    }

    #[test]
    fn empty_package_is_legal() {
        let p = convert(&first("package foo { id 0x07 }")).expect("convert");
        assert!(p.is_empty());
        assert_eq!(p.identifier, 7);
    }

    #[test]
    fn attributes_are_deduplicated() {
        let p = convert(&first("package foo { id 0x01 uint8 a !deprecated !deprecated }"))
            .expect("convert");
        assert_eq!(p.fields[0].attributes, [Attribute::Deprecated]);
        assert!(p.fields[0].is_deprecated());
    }

    #[test]
    fn unknown_tags_are_internal_errors() {
        let mut raw = first("package foo { id 0x01 struct s { uint8 a } }");
        if let Object::Struct(s) = &mut raw.contents[1] {
            if let Object::Field(f) = &mut s.contents[0] {
                f.ty.kind = "uint16".to_string();
            }
        }
        assert_eq!(
            convert(&raw),
            Err(ConvertError::UnknownNativeType {
                path: "foo.s.a".to_string(),
                tag: "uint16".to_string(),
            })
        );

        let mut raw = first("package foo { id 0x01 uint8 a }");
        if let Object::Field(f) = &mut raw.contents[1] {
            f.attributes.push("hidden".to_string());
        }
        assert!(matches!(
            convert(&raw),
            Err(ConvertError::UnknownAttribute { tag, .. }) if tag == "hidden"
        ));
    }

    #[test]
    fn missing_identifier_aborts() {
        assert_eq!(
            convert(&first("package foo { uint8 a }")),
            Err(ConvertError::MissingIdentifier("foo".to_string()))
        );
    }
}
