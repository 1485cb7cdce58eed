//! Format compiled packages as text trees (the `show` view).
//!
//! ```text
//! foo (0x01)
//! ├── Fields
//! │   ├── [0] uint8 bar
//! │   └── [1] @point[*] points [Deprecated]
//! └── Structures
//!     └── point
//!         └── Fields
//!             └── [0] double x
//! ```

use crate::model::{Field, Package, PackageList, Struct};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub label: String,
    pub children: Vec<Tree>,
}

impl Tree {
    pub fn new(label: impl Into<String>) -> Self {
        Tree {
            label: label.into(),
            children: Vec::new(),
        }
    }

    pub fn child(mut self, child: Tree) -> Self {
        self.children.push(child);
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.label);
        out.push('\n');
        write_children(&mut out, &self.children, "");
        out
    }
}

fn write_children(out: &mut String, children: &[Tree], prefix: &str) {
    for (i, child) in children.iter().enumerate() {
        let last = i + 1 == children.len();
        let (branch, indent) = if last {
            ("└── ", "    ")
        } else {
            ("├── ", "│   ")
        };
        let _ = writeln!(out, "{prefix}{branch}{}", child.label);
        write_children(out, &child.children, &format!("{prefix}{indent}"));
    }
}

/// `[i] type[size] name [Deprecated]`
pub fn field_line(index: usize, field: &Field) -> String {
    let mut line = format!("[{index}] {}", field.ty);
    if let Some(size) = field.array {
        let _ = write!(line, "[{size}]");
    }
    line.push(' ');
    line.push_str(&field.name);
    if field.is_deprecated() {
        line.push_str(" [Deprecated]");
    }
    line
}

fn fields_tree(fields: &[Field]) -> Tree {
    fields
        .iter()
        .enumerate()
        .fold(Tree::new("Fields"), |t, (i, f)| t.child(Tree::new(field_line(i, f))))
}

fn structs_tree(structs: &[Struct]) -> Tree {
    structs
        .iter()
        .fold(Tree::new("Structures"), |t, s| t.child(struct_tree(s)))
}

fn struct_tree(s: &Struct) -> Tree {
    let mut tree = Tree::new(s.name.clone()).child(fields_tree(&s.fields));
    if !s.structs.is_empty() {
        tree = tree.child(structs_tree(&s.structs));
    }
    tree
}

pub fn package_tree(package: &Package) -> Tree {
    let mut tree = Tree::new(format!("{} ({})", package.name, package.identifier_hex()));
    if package.is_empty() {
        return tree.child(Tree::new("(Empty Package)"));
    }
    if !package.fields.is_empty() {
        tree = tree.child(fields_tree(&package.fields));
    }
    if !package.structs.is_empty() {
        tree = tree.child(structs_tree(&package.structs));
    }
    tree
}

/// Every package in list order, separated by blank lines.
pub fn render(packages: &PackageList) -> String {
    packages
        .iter()
        .map(|p| package_tree(p).render())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArraySize, Attribute, NativeType, Type};

    fn field(name: &str, ty: Type, array: Option<ArraySize>, deprecated: bool) -> Field {
        Field {
            name: name.to_string(),
            ty,
            array,
            attributes: if deprecated { vec![Attribute::Deprecated] } else { vec![] },
        }
    }

    #[test]
    fn field_lines() {
        let f = field("bar", Type::Native(NativeType::Uint8), None, false);
        assert_eq!(field_line(0, &f), "[0] uint8 bar");
        let f = field("pts", Type::User("point".to_string()), Some(ArraySize::Dynamic), true);
        assert_eq!(field_line(3, &f), "[3] @point[*] pts [Deprecated]");
    }

    #[test]
    fn package_tree_layout() {
        let p = Package {
            name: "foo".to_string(),
            identifier: 1,
            fields: vec![
                field("bar", Type::Native(NativeType::Uint8), None, false),
                field("buf", Type::Native(NativeType::Byte), Some(ArraySize::Fixed(4)), false),
            ],
            structs: vec![Struct {
                name: "s".to_string(),
                fields: vec![field("x", Type::Native(NativeType::Double), None, false)],
                structs: vec![],
            }],
        };
        let expected = "\
foo (0x01)
├── Fields
│   ├── [0] uint8 bar
│   └── [1] byte[4] buf
└── Structures
    └── s
        └── Fields
            └── [0] double x
";
        assert_eq!(package_tree(&p).render(), expected);
    }

    #[test]
    fn empty_package() {
        let p = Package {
            name: "nothing".to_string(),
            identifier: 0xff,
            fields: vec![],
            structs: vec![],
        };
        assert_eq!(package_tree(&p).render(), "nothing (0xff)\n└── (Empty Package)\n");
    }
}
