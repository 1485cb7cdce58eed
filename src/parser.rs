//! Parse `.lud` source into raw [`ast::Package`](crate::ast::Package) values.

use crate::ast::Package;
use crate::engine::{Grammar, GrammarError, ParseError, ParseOptions, Value};
use crate::grammar::{ludwieg, Node};
use tracing::debug;

/// Built grammar plus the options every parse runs with.
///
/// Building the grammar is the only non-trivial setup cost, so keep one
/// `Parser` around and share it; it is `Send + Sync` and parses never
/// interfere with each other.
#[derive(Debug)]
pub struct Parser {
    grammar: Grammar<Node>,
    options: ParseOptions,
}

impl Parser {
    pub fn new() -> Result<Self, GrammarError> {
        Self::with_options(ParseOptions::default())
    }

    pub fn with_options(options: ParseOptions) -> Result<Self, GrammarError> {
        Ok(Parser {
            grammar: ludwieg()?,
            options,
        })
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    pub fn grammar(&self) -> &Grammar<Node> {
        &self.grammar
    }

    /// Parse raw file contents; the bytes must be UTF-8.
    pub fn parse_bytes(&self, source: &[u8]) -> Result<Vec<Package>, ParseError> {
        let value = self.grammar.parse(source, &self.options)?;
        Ok(into_packages(value))
    }

    pub fn parse(&self, source: &str) -> Result<Vec<Package>, ParseError> {
        let value = self.grammar.parse_str(source, &self.options)?;
        Ok(into_packages(value))
    }
}

fn into_packages(value: Value<Node>) -> Vec<Package> {
    let packages: Vec<Package> = value
        .into_list()
        .into_iter()
        .filter_map(|v| match v.into_node() {
            Some(Node::Package(p)) => Some(*p),
            _ => None,
        })
        .collect();
    debug!(packages = packages.len(), "parsed");
    packages
}

/// Parse with a throwaway [`Parser`] and default options.
pub fn parse(source: &str) -> Result<Vec<Package>, ParseError> {
    Parser::new()?.parse(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_has_no_packages() {
        assert_eq!(parse(""), Ok(vec![]));
        assert_eq!(parse("  // nothing\n\n"), Ok(vec![]));
    }

    #[test]
    fn several_packages_in_one_file() {
        let p = parse("package a { id 0x01 }\npackage b { id 0x02 }").expect("parse");
        let names: Vec<&str> = p.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn memoized_parser_agrees() {
        let src = "package foo { id 0x01 struct s { byte x uint8[4] y } @s[*] all }";
        let memo =
            Parser::with_options(ParseOptions::default().with_memoize(true)).expect("parser");
        assert_eq!(memo.parse(src), parse(src));
    }

    #[test]
    fn one_parser_many_threads() {
        let parser = Parser::new().expect("parser");
        std::thread::scope(|s| {
            for id in 1..=4u8 {
                let parser = &parser;
                s.spawn(move || {
                    let src = format!("package p {{ id 0x0{id} }}");
                    let p = parser.parse(&src).expect("parse");
                    assert_eq!(p.len(), 1);
                });
            }
        });
    }

    #[test]
    fn bytes_must_be_utf8() {
        let parser = Parser::new().expect("parser");
        let err = parser.parse_bytes(b"package \xc3 {}").unwrap_err();
        assert!(matches!(err, ParseError::Encoding { position } if position.offset == 8));
    }
}
