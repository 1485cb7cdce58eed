//! Raw syntax tree for Ludwieg `.lud` sources, plus the [`Visitor`] that both
//! the validator and the converter walk it with.
//!
//! Nothing here is checked: sizes and identifiers are kept as written, and
//! type keywords are plain strings until conversion.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeSource {
    Native,
    User,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRef {
    pub source: TypeSource,
    /// Native keyword (`uint8`) or struct name without the `@`.
    pub kind: String,
}

impl TypeRef {
    pub fn native(kind: &str) -> Self {
        TypeRef {
            source: TypeSource::Native,
            kind: kind.to_string(),
        }
    }

    pub fn user(kind: &str) -> Self {
        TypeRef {
            source: TypeSource::User,
            kind: kind.to_string(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.source == TypeSource::User
    }
}

/// `id 0x01`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierDecl {
    pub value: String,
}

/// `uint8 name !deprecated`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeRef,
    pub attributes: Vec<String>,
}

/// `uint8[*] name` or `@point[4] name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDecl {
    pub name: String,
    pub ty: TypeRef,
    /// `*` or the digits between the brackets.
    pub size: String,
    pub attributes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDecl {
    pub name: String,
    pub contents: Vec<Object>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Identifier(IdentifierDecl),
    Field(FieldDecl),
    Array(ArrayDecl),
    Struct(StructDecl),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Identifier,
    Field,
    Array,
    Struct,
}

impl Object {
    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Identifier(_) => ObjectKind::Identifier,
            Object::Field(_) => ObjectKind::Field,
            Object::Array(_) => ObjectKind::Array,
            Object::Struct(_) => ObjectKind::Struct,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Object::Identifier(_) => None,
            Object::Field(f) => Some(&f.name),
            Object::Array(a) => Some(&a.name),
            Object::Struct(s) => Some(&s.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub contents: Vec<Object>,
}

/// Declaration context handed to [`Visitor`] callbacks.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'ast> {
    Package(&'ast Package),
    Struct(&'ast StructDecl),
}

impl<'ast> Scope<'ast> {
    pub fn name(&self) -> &'ast str {
        match self {
            Scope::Package(p) => &p.name,
            Scope::Struct(s) => &s.name,
        }
    }

    pub fn is_package(&self) -> bool {
        matches!(self, Scope::Package(_))
    }
}

/// Depth-first, declaration-order traversal driven by [`walk_package`].
///
/// Every callback defaults to a no-op so implementors only override what
/// they inspect. Returning `Ok(false)` from [`Visitor::enter_struct`] skips
/// the struct's body and its matching `leave_struct`.
pub trait Visitor<'ast> {
    type Error;

    fn visit_identifier(
        &mut self,
        _scope: Scope<'ast>,
        _decl: &'ast IdentifierDecl,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_field(
        &mut self,
        _scope: Scope<'ast>,
        _decl: &'ast FieldDecl,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn visit_array(
        &mut self,
        _scope: Scope<'ast>,
        _decl: &'ast ArrayDecl,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    fn enter_struct(
        &mut self,
        _scope: Scope<'ast>,
        _decl: &'ast StructDecl,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    fn leave_struct(&mut self, _decl: &'ast StructDecl) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub fn walk_package<'ast, V>(visitor: &mut V, package: &'ast Package) -> Result<(), V::Error>
where
    V: Visitor<'ast> + ?Sized,
{
    walk_contents(visitor, Scope::Package(package), &package.contents)
}

fn walk_contents<'ast, V>(
    visitor: &mut V,
    scope: Scope<'ast>,
    contents: &'ast [Object],
) -> Result<(), V::Error>
where
    V: Visitor<'ast> + ?Sized,
{
    for object in contents {
        match object {
            Object::Identifier(decl) => visitor.visit_identifier(scope, decl)?,
            Object::Field(decl) => visitor.visit_field(scope, decl)?,
            Object::Array(decl) => visitor.visit_array(scope, decl)?,
            Object::Struct(decl) => {
                if visitor.enter_struct(scope, decl)? {
                    walk_contents(visitor, Scope::Struct(decl), &decl.contents)?;
                    visitor.leave_struct(decl)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[derive(Default)]
    struct Trace(Vec<String>);

    impl<'ast> Visitor<'ast> for Trace {
        type Error = Infallible;

        fn visit_field(
            &mut self,
            scope: Scope<'ast>,
            decl: &'ast FieldDecl,
        ) -> Result<(), Infallible> {
            self.0.push(format!("{}.{}", scope.name(), decl.name));
            Ok(())
        }

        fn enter_struct(
            &mut self,
            _: Scope<'ast>,
            decl: &'ast StructDecl,
        ) -> Result<bool, Infallible> {
            self.0.push(format!("enter {}", decl.name));
            Ok(decl.name != "skipped")
        }

        fn leave_struct(&mut self, decl: &'ast StructDecl) -> Result<(), Infallible> {
            self.0.push(format!("leave {}", decl.name));
            Ok(())
        }
    }

    fn field(name: &str) -> Object {
        Object::Field(FieldDecl {
            name: name.to_string(),
            ty: TypeRef::native("uint8"),
            attributes: vec![],
        })
    }

    #[test]
    fn walk_is_depth_first_and_honours_skip() {
        let package = Package {
            name: "p".to_string(),
            contents: vec![
                field("a"),
                Object::Struct(StructDecl {
                    name: "s".to_string(),
                    contents: vec![field("b")],
                }),
                Object::Struct(StructDecl {
                    name: "skipped".to_string(),
                    contents: vec![field("c")],
                }),
                field("d"),
            ],
        };
        let mut trace = Trace::default();
        walk_package(&mut trace, &package).unwrap_or_else(|never| match never {});
        assert_eq!(
            trace.0,
            ["p.a", "enter s", "s.b", "leave s", "enter skipped", "p.d"]
        );
    }

    #[test]
    fn object_kind_and_name() {
        let id = Object::Identifier(IdentifierDecl { value: "0x01".to_string() });
        assert_eq!(id.kind(), ObjectKind::Identifier);
        assert_eq!(id.name(), None);
        assert_eq!(field("x").name(), Some("x"));
    }
}
