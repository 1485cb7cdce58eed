//! # ludco: Ludwieg IDL compiler front end
//!
//! Reads `.lud` sources describing wire-protocol packages and turns them into
//! a validated, typed model for code generators. The pipeline is:
//!
//! 1. **Parse**: a generic PEG interpreter ([`engine`]) runs the built-in
//!    Ludwieg grammar ([`grammar`]) and yields raw [`ast::Package`] values.
//! 2. **Validate**: [`validate::validate`] collects every structural problem
//!    of a package (duplicate names, bad array sizes, prohibited constructs).
//! 3. **Convert**: [`convert::convert`] lowers a clean package into
//!    [`model::Package`].
//! 4. **Compile**: [`compile::compile`] runs the above over a batch of files,
//!    rejects duplicate package names or identifiers, and sorts the result by
//!    identifier.
//!
//! ## Example DSL
//!
//! ```text
//! // comments run to end of line
//! package telemetry {
//!   id 0x01
//!
//!   struct point {
//!     double x
//!     double y
//!   }
//!
//!   uint64 timestamp
//!   @point[*] track
//!   string label !deprecated
//! }
//! ```
//!
//! Native types: `dynint uint8 uint32 uint64 byte double string blob bool uuid any`.
//! A `@name` type refers to a struct declared at the top of the same package.
//! Array sizes are `*` (dynamic) or a count between 1 and 4294967294.
//!
//! ## Usage
//!
//! ```no_run
//! use ludco::{compile, Parser, Source};
//!
//! let parser = Parser::new()?;
//! let sources = vec![Source::read("telemetry.lud".as_ref())?];
//! let packages = compile(&parser, &sources)?;
//! for package in &packages {
//!     println!("{} {}", package.identifier_hex(), package.name);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod ast;
pub mod compile;
pub mod convert;
pub mod dump;
pub mod engine;
pub mod grammar;
pub mod model;
pub mod parser;
pub mod validate;

pub use compile::{compile, compile_paths, BatchError, CompileError, FileError, Source};
pub use convert::{convert, ConvertError};
pub use engine::{GrammarError, ParseError, ParseOptions, Position, DEFAULT_MAX_DEPTH};
pub use model::{ArraySize, Attribute, Field, NativeType, Package, PackageList, Struct, Type};
pub use parser::{parse, Parser};
pub use validate::{validate, ValidationError};
