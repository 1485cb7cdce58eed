//! Semantic model handed to code generators: typed, validated packages.

use serde::Serialize;
use std::fmt;

/// Largest fixed array size accepted (`u32::MAX - 1`).
pub const MAX_ARRAY_SIZE: u64 = u32::MAX as u64 - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NativeType {
    DynInt,
    Uint8,
    Uint32,
    Uint64,
    Byte,
    Double,
    String,
    Blob,
    Bool,
    Uuid,
    Any,
}

impl NativeType {
    pub const ALL: [NativeType; 11] = [
        NativeType::DynInt,
        NativeType::Uint8,
        NativeType::Uint32,
        NativeType::Uint64,
        NativeType::Byte,
        NativeType::Double,
        NativeType::String,
        NativeType::Blob,
        NativeType::Bool,
        NativeType::Uuid,
        NativeType::Any,
    ];

    /// Keyword used for this type in `.lud` sources.
    pub fn tag(self) -> &'static str {
        match self {
            NativeType::DynInt => "dynint",
            NativeType::Uint8 => "uint8",
            NativeType::Uint32 => "uint32",
            NativeType::Uint64 => "uint64",
            NativeType::Byte => "byte",
            NativeType::Double => "double",
            NativeType::String => "string",
            NativeType::Blob => "blob",
            NativeType::Bool => "bool",
            NativeType::Uuid => "uuid",
            NativeType::Any => "any",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Field type: a built-in scalar or a reference to a package-level struct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "source", content = "name", rename_all = "lowercase")]
pub enum Type {
    Native(NativeType),
    User(String),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Native(t) => write!(f, "{t}"),
            Type::User(name) => write!(f, "@{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribute {
    Deprecated,
}

impl Attribute {
    pub const ALL: [Attribute; 1] = [Attribute::Deprecated];

    pub fn tag(self) -> &'static str {
        match self {
            Attribute::Deprecated => "deprecated",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.tag() == tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArraySize {
    /// `[*]`: length carried on the wire.
    Dynamic,
    Fixed(u32),
}

impl ArraySize {
    /// `*` or a decimal count in `1..=MAX_ARRAY_SIZE`.
    pub fn parse(size: &str) -> Option<Self> {
        if size == "*" {
            return Some(ArraySize::Dynamic);
        }
        let n: u64 = size.parse().ok()?;
        if (1..=MAX_ARRAY_SIZE).contains(&n) {
            u32::try_from(n).ok().map(ArraySize::Fixed)
        } else {
            None
        }
    }
}

impl fmt::Display for ArraySize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArraySize::Dynamic => f.write_str("*"),
            ArraySize::Fixed(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    /// `Some` for array fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub array: Option<ArraySize>,
    pub attributes: Vec<Attribute>,
}

impl Field {
    pub fn is_array(&self) -> bool {
        self.array.is_some()
    }

    pub fn has_attribute(&self, attribute: Attribute) -> bool {
        self.attributes.contains(&attribute)
    }

    pub fn is_deprecated(&self) -> bool {
        self.has_attribute(Attribute::Deprecated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Struct {
    pub name: String,
    pub fields: Vec<Field>,
    pub structs: Vec<Struct>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub name: String,
    pub identifier: u8,
    pub fields: Vec<Field>,
    pub structs: Vec<Struct>,
}

impl Package {
    /// Identifier as written in sources, e.g. `0x0a`.
    pub fn identifier_hex(&self) -> String {
        format!("0x{:02x}", self.identifier)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.structs.is_empty()
    }

    /// Package-level struct by name.
    pub fn find_struct(&self, name: &str) -> Option<&Struct> {
        self.structs.iter().find(|s| s.name == name)
    }
}

/// Parse a `0x`-prefixed hex identifier that must fit one byte.
pub fn parse_identifier(value: &str) -> Option<u8> {
    let digits = value.strip_prefix("0x")?;
    u8::from_str_radix(digits, 16).ok()
}

/// Compiled batch of packages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PackageList(Vec<Package>);

impl PackageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, package: Package) {
        self.0.push(package);
    }

    /// Ascending by identifier; ties keep insertion order.
    pub fn sort_by_identifier(&mut self) {
        self.0.sort_by_key(|p| p.identifier);
    }

    pub fn get(&self, name: &str) -> Option<&Package> {
        self.0.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Package> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Package> {
        self.0
    }
}

impl FromIterator<Package> for PackageList {
    fn from_iter<I: IntoIterator<Item = Package>>(iter: I) -> Self {
        PackageList(iter.into_iter().collect())
    }
}

impl IntoIterator for PackageList {
    type Item = Package;
    type IntoIter = std::vec::IntoIter<Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PackageList {
    type Item = &'a Package;
    type IntoIter = std::slice::Iter<'a, Package>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
