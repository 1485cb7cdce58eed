//! The Ludwieg `.lud` grammar expressed as [`engine`](crate::engine) rules.
//!
//! ```text
//! start        <- skip (package skip)* EOF
//! package      <- "package" ws item_name _ "{" skip (package_item skip)* "}"
//! package_item <- id_decl / field / array_field / struct
//! struct       <- "struct" ws item_name _ "{" skip (struct_item skip)* "}"
//! struct_item  <- id_decl / field / array_field / struct
//! id_decl      <- "id" ws hex_value
//! field        <- type ws item_name attribute_list?
//! array_field  <- type _ array_size _ item_name attribute_list?
//! type         <- native_type / "@" item_name
//! array_size   <- "[" _ ("*" / digits) _ "]"
//! attribute    <- _ "!" "deprecated"
//! skip         <- ([ \t\r\n] / "//" [^\n]*)*
//! ```
//!
//! Identifier declarations are accepted inside structs so that the validator,
//! not the parser, reports them.

use crate::ast::{ArrayDecl, FieldDecl, IdentifierDecl, Object, Package, StructDecl, TypeRef};
use crate::engine::{
    action, any, choice, class, label, lit, not, opt, plus, rule, seq, star, Captures, CharClass,
    Expr, Grammar, GrammarError, Rule, Value,
};
use crate::model::{Attribute, NativeType};

/// Semantic values built by the grammar's actions. Trees are boxed to keep
/// matcher values small.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Type(TypeRef),
    Attribute(String),
    Object(Box<Object>),
    Package(Box<Package>),
}

type Caps<'a> = Captures<'a, Node>;
type Out = Result<Value<Node>, String>;

fn required(c: &mut Caps<'_>, name: &str) -> Result<Value<Node>, String> {
    c.take(name).ok_or_else(|| format!("missing capture `{name}`"))
}

fn text_of(c: &mut Caps<'_>, name: &str) -> Result<String, String> {
    Ok(required(c, name)?.flatten_text())
}

fn type_of(c: &mut Caps<'_>) -> Result<TypeRef, String> {
    match required(c, "type")? {
        Value::Node(Node::Type(ty)) => Ok(ty),
        other => Err(format!("expected a type, found {other:?}")),
    }
}

fn attributes_of(c: &mut Caps<'_>) -> Vec<String> {
    c.take("attrs")
        .map(Value::into_nodes)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|n| match n {
            Node::Attribute(tag) => Some(tag),
            _ => None,
        })
        .collect()
}

fn objects_of(c: &mut Caps<'_>) -> Vec<Object> {
    c.take("items")
        .map(Value::into_nodes)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|n| match n {
            Node::Object(o) => Some(*o),
            _ => None,
        })
        .collect()
}

fn object(o: Object) -> Out {
    Ok(Value::Node(Node::Object(Box::new(o))))
}

fn text(c: &mut Caps<'_>) -> Out {
    Ok(Value::Text(c.text().to_string()))
}

fn pick(c: &mut Caps<'_>) -> Out {
    required(c, "item")
}

fn native_type(c: &mut Caps<'_>) -> Out {
    Ok(Value::Node(Node::Type(TypeRef::native(c.text()))))
}

fn user_type(c: &mut Caps<'_>) -> Out {
    Ok(Value::Node(Node::Type(TypeRef::user(&text_of(c, "name")?))))
}

fn array_size(c: &mut Caps<'_>) -> Out {
    Ok(Value::Text(text_of(c, "size")?))
}

fn attribute(c: &mut Caps<'_>) -> Out {
    Ok(Value::Node(Node::Attribute(text_of(c, "flag")?)))
}

fn id_decl(c: &mut Caps<'_>) -> Out {
    object(Object::Identifier(IdentifierDecl {
        value: text_of(c, "value")?,
    }))
}

fn field(c: &mut Caps<'_>) -> Out {
    object(Object::Field(FieldDecl {
        name: text_of(c, "name")?,
        ty: type_of(c)?,
        attributes: attributes_of(c),
    }))
}

fn array_field(c: &mut Caps<'_>) -> Out {
    object(Object::Array(ArrayDecl {
        name: text_of(c, "name")?,
        ty: type_of(c)?,
        size: text_of(c, "size")?,
        attributes: attributes_of(c),
    }))
}

fn struct_decl(c: &mut Caps<'_>) -> Out {
    object(Object::Struct(StructDecl {
        name: text_of(c, "name")?,
        contents: objects_of(c),
    }))
}

fn package(c: &mut Caps<'_>) -> Out {
    Ok(Value::Node(Node::Package(Box::new(Package {
        name: text_of(c, "name")?,
        contents: objects_of(c),
    }))))
}

fn packages(c: &mut Caps<'_>) -> Out {
    let list = required(c, "packages")?
        .into_nodes()
        .into_iter()
        .map(Value::Node)
        .collect();
    Ok(Value::List(list))
}

fn r(name: &str) -> Expr<Node> {
    rule(name)
}

/// `"keyword" ws name:item_name _ "{" skip items:(item skip)* "}"`
fn block(keyword: &str, item: &str) -> Expr<Node> {
    seq([
        lit(keyword),
        r("ws"),
        label("name", r("item_name")),
        r("_"),
        lit("{"),
        r("skip"),
        label("items", star(action(seq([label("item", r(item)), r("skip")]), pick))),
        lit("}"),
    ])
}

fn items() -> Expr<Node> {
    choice([r("id_decl"), r("field"), r("array_field"), r("struct")])
}

/// Build the `.lud` grammar. The first rule, `start`, yields a list of
/// `Node::Package` values.
pub fn ludwieg() -> Result<Grammar<Node>, GrammarError> {
    let blank = || CharClass::new().chars(" \t");
    Grammar::new(vec![
        Rule::new(
            "start",
            action(
                seq([
                    r("skip"),
                    label(
                        "packages",
                        star(action(seq([label("item", r("package")), r("skip")]), pick)),
                    ),
                    r("EOF"),
                ]),
                packages,
            ),
        ),
        Rule::new("package", action(block("package", "package_item"), package)),
        Rule::new("package_item", items()),
        Rule::new("struct", action(block("struct", "struct_item"), struct_decl)),
        Rule::new("struct_item", items()),
        Rule::new(
            "id_decl",
            action(seq([lit("id"), r("ws"), label("value", r("hex_value"))]), id_decl),
        ),
        Rule::new(
            "field",
            action(
                seq([
                    label("type", r("type")),
                    r("ws"),
                    label("name", r("item_name")),
                    label("attrs", opt(r("attribute_list"))),
                ]),
                field,
            ),
        ),
        Rule::new(
            "array_field",
            action(
                seq([
                    label("type", r("type")),
                    r("_"),
                    label("size", r("array_size")),
                    r("_"),
                    label("name", r("item_name")),
                    label("attrs", opt(r("attribute_list"))),
                ]),
                array_field,
            ),
        ),
        Rule::new("type", choice([r("native_type"), r("user_type")])),
        Rule::new(
            "native_type",
            action(choice(NativeType::ALL.into_iter().map(|t| lit(t.tag()))), native_type),
        )
        .display("type"),
        Rule::new(
            "user_type",
            action(seq([lit("@"), label("name", r("item_name"))]), user_type),
        ),
        Rule::new(
            "array_size",
            action(
                seq([
                    lit("["),
                    r("_"),
                    label("size", choice([lit("*"), r("digits")])),
                    r("_"),
                    lit("]"),
                ]),
                array_size,
            ),
        ),
        Rule::new("attribute_list", plus(r("attribute"))),
        Rule::new(
            "attribute",
            action(
                seq([
                    r("_"),
                    lit("!"),
                    label("flag", choice(Attribute::ALL.into_iter().map(|a| lit(a.tag())))),
                ]),
                attribute,
            ),
        ),
        Rule::new(
            "hex_value",
            action(
                seq([
                    lit("0x"),
                    plus(class(CharClass::new().range('a', 'f').range('A', 'F').range('0', '9'))),
                ]),
                text,
            ),
        )
        .display("hexadecimal value"),
        Rule::new("digits", action(plus(class(CharClass::new().range('0', '9'))), text))
            .display("digits"),
        Rule::new(
            "item_name",
            action(plus(class(CharClass::new().range('a', 'z').chars("_"))), text),
        )
        .display("identifier"),
        Rule::new(
            "skip",
            star(choice([class(blank().chars("\r\n")), r("comment")])),
        )
        .display("blank"),
        Rule::new(
            "comment",
            seq([lit("//"), star(class(CharClass::new().chars("\n").inverted()))]),
        ),
        Rule::new("_", star(class(blank()))).display("whitespace"),
        Rule::new("ws", plus(class(blank()))).display("whitespace"),
        Rule::new("EOF", not(any())),
    ])
}
