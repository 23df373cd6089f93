//! # Graph Text Format
//!
//! Lexer, AST and parser for the textual graph notation, plus the loader
//! that turns documents into a [`Graph`](crate::graph::Graph). Parsing is
//! pure; only the loader touches the graph or the filesystem.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod loader;

use crate::Result;
use ast::Document;

pub use loader::{build_base, load_dir, load_file, load_str};

/// Parse graph text into an AST.
pub fn parse(text: &str) -> Result<Document> {
    let tokens = lexer::tokenize(text)?;
    parser::parse_document(&tokens)
}
