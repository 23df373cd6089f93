//! Graph text recursive descent parser.
//!
//! ```text
//! document := entry ("," entry)* ","?
//! entry    := (IDENT ":")? node
//! node     := head? children? hint*
//! head     := "_" | range | code | proxy | relation | path ("[" INT "]")?
//! range    := "<" INT "," INT ">"
//! proxy    := "$" (path ("[" INT "]")? | node)?
//! relation := "[" path "," path "," path ("," path)? "]"
//! children := "(" (entry ("," entry)* ","?)? ")"
//! hint     := "#" STRING ":" STRING
//! path     := "."? segment ("." segment)* | "."
//! ```

use crate::model::{Instruction, ObjectPath, PROXY_SEGMENT};
use crate::{Error, Result};
use super::ast::*;
use super::lexer::{Token, TokenKind};

/// Parser state: a token slice with a cursor.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_nth_kind(&self, n: usize) -> TokenKind {
        self.tokens
            .get(self.pos + n)
            .map_or(TokenKind::Eof, |t| t.kind)
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        let tok = self.peek();
        if tok.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {:?}, got {:?} '{}'", kind, tok.kind, tok.text)))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, message: String) -> Error {
        Error::Syntax { position: self.peek().span.start, message }
    }

    fn position(&self) -> usize {
        self.peek().span.start
    }

    fn at_head_start(&self) -> bool {
        let kind = self.peek_kind();
        kind.instruction_symbol().is_some()
            || matches!(
                kind,
                TokenKind::Underscore
                    | TokenKind::Dollar
                    | TokenKind::LBracket
                    | TokenKind::Dot
                    | TokenKind::Identifier
            )
    }
}

/// Parse a token stream into a document.
pub fn parse_document(tokens: &[Token]) -> Result<Document> {
    let mut p = Parser::new(tokens);
    let mut entries = Vec::new();
    while !p.at(TokenKind::Eof) {
        entries.push(parse_entry(&mut p)?);
        if !p.eat(TokenKind::Comma) {
            break;
        }
    }
    p.expect(TokenKind::Eof)?;
    Ok(Document { entries })
}

fn parse_entry(p: &mut Parser) -> Result<Entry> {
    let position = p.position();
    let label = if p.at(TokenKind::Identifier) && p.peek_nth_kind(1) == TokenKind::Colon {
        let label = p.advance().text.clone();
        p.advance();
        Some(label)
    } else {
        None
    };
    let node = parse_node(p)?;
    Ok(Entry { label, node, position })
}

fn parse_node(p: &mut Parser) -> Result<AstNode> {
    let mut node = AstNode::nul(p.position());
    if p.at_head_start() {
        node.head = parse_head(p)?;
    }

    if p.eat(TokenKind::LParen) {
        while !p.at(TokenKind::RParen) {
            node.children.push(parse_entry(p)?);
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
        p.expect(TokenKind::RParen)?;
    }

    while p.eat(TokenKind::Hash) {
        let key = p.expect(TokenKind::StringLiteral)?.text.clone();
        p.expect(TokenKind::Colon)?;
        let value = p.expect(TokenKind::StringLiteral)?.text.clone();
        node.hints.push((key, value));
    }

    if matches!(node.head, Head::Reference(_)) && !(node.children.is_empty() && node.hints.is_empty()) {
        return Err(Error::Syntax {
            position: node.position,
            message: "a reference cannot carry children or hints".into(),
        });
    }
    Ok(node)
}

fn parse_head(p: &mut Parser) -> Result<Head> {
    let kind = p.peek_kind();
    match kind {
        TokenKind::Underscore => {
            p.advance();
            Ok(Head::Nul)
        }
        TokenKind::Lt if p.peek_nth_kind(1) == TokenKind::Integer => {
            let position = p.position();
            p.advance();
            let lower = parse_int(p)?;
            p.expect(TokenKind::Comma)?;
            let upper = parse_int(p)?;
            p.expect(TokenKind::Gt)?;
            if lower > upper {
                return Err(Error::Syntax {
                    position,
                    message: format!("range <{lower}, {upper}> is inverted"),
                });
            }
            Ok(Head::Range { lower, upper })
        }
        TokenKind::Dollar => {
            p.advance();
            let target = if matches!(p.peek_kind(), TokenKind::Dot | TokenKind::Identifier) {
                // A path target stops at its head; what follows belongs to the proxy.
                let mut target = AstNode::nul(p.position());
                target.head = parse_head(p)?;
                Some(Box::new(target))
            } else if p.at_head_start() {
                Some(Box::new(parse_node(p)?))
            } else {
                None
            };
            Ok(Head::Proxy(target))
        }
        TokenKind::LBracket => {
            p.advance();
            let relation = parse_path(p)?;
            p.expect(TokenKind::Comma)?;
            let source = parse_path(p)?;
            p.expect(TokenKind::Comma)?;
            let destination = parse_path(p)?;
            let owner = if p.eat(TokenKind::Comma) { Some(parse_path(p)?) } else { None };
            p.expect(TokenKind::RBracket)?;
            Ok(Head::Relation { relation, source, destination, owner })
        }
        TokenKind::Dot | TokenKind::Identifier => {
            let path = parse_path(p)?;
            if p.eat(TokenKind::LBracket) {
                let value = parse_int(p)?;
                p.expect(TokenKind::RBracket)?;
                Ok(Head::Element { ty: path, value })
            } else {
                Ok(Head::Reference(path))
            }
        }
        _ => {
            let code = kind
                .instruction_symbol()
                .and_then(Instruction::from_symbol)
                .ok_or_else(|| p.error(format!("unexpected {kind:?}")))?;
            p.advance();
            Ok(Head::Code(code))
        }
    }
}

fn parse_int(p: &mut Parser) -> Result<i64> {
    let tok = p.expect(TokenKind::Integer)?;
    let position = tok.span.start;
    tok.text.parse().map_err(|e| Error::Syntax {
        position,
        message: format!("bad integer '{}': {e}", tok.text),
    })
}

fn parse_path(p: &mut Parser) -> Result<PathRef> {
    let position = p.position();
    let absolute = p.eat(TokenKind::Dot);
    let mut segments = Vec::new();
    let segment = |p: &mut Parser| -> Option<String> {
        match p.peek_kind() {
            TokenKind::Identifier => Some(p.advance().text.clone()),
            TokenKind::Dollar => {
                p.advance();
                Some(PROXY_SEGMENT.to_string())
            }
            _ => None,
        }
    };
    if let Some(first) = segment(p) {
        segments.push(first);
        while p.at(TokenKind::Dot)
            && matches!(p.peek_nth_kind(1), TokenKind::Identifier | TokenKind::Dollar)
        {
            p.advance();
            segments.extend(segment(p));
        }
    } else if !absolute {
        return Err(p.error("expected a path".into()));
    }
    let path = ObjectPath { absolute, segments };
    Ok(PathRef { path, position })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn parse(input: &str) -> Document {
        parse_document(&tokenize(input).unwrap()).unwrap()
    }

    fn parse_err(input: &str) -> Error {
        parse_document(&tokenize(input).unwrap()).unwrap_err()
    }

    #[test]
    fn nested_entries() {
        let doc = parse("root: (digit: <0, 9>, one: digit[1], (),)");
        assert_eq!(doc.entries.len(), 1);
        let root = &doc.entries[0];
        assert_eq!(root.label.as_deref(), Some("root"));
        let kids = &root.node.children;
        assert_eq!(kids.len(), 3);
        assert_eq!(kids[0].node.head, Head::Range { lower: 0, upper: 9 });
        match &kids[1].node.head {
            Head::Element { ty, value } => {
                assert_eq!(ty.path, ObjectPath::relative(["digit"]));
                assert_eq!(*value, 1);
            }
            other => panic!("unexpected head {other:?}"),
        }
        assert_eq!(kids[2].label, None);
        assert_eq!(kids[2].node.head, Head::Nul);
    }

    #[test]
    fn receive_versus_range() {
        let doc = parse("< (named: ()), <1, 2>");
        assert_eq!(doc.entries[0].node.head, Head::Code(Instruction::Receive));
        assert_eq!(doc.entries[0].node.children.len(), 1);
        assert_eq!(doc.entries[1].node.head, Head::Range { lower: 1, upper: 2 });
    }

    #[test]
    fn proxies() {
        let doc = parse("a: $, b: $ .x.$.y, c: $ _ (q: _), d: $(inner: _)");
        let heads: Vec<&Head> = doc.entries.iter().map(|e| &e.node.head).collect();
        assert_eq!(heads[0], &Head::Proxy(None));
        match heads[1] {
            Head::Proxy(Some(target)) => assert_eq!(
                target.head,
                Head::Reference(PathRef { path: ObjectPath::absolute(["x", "$", "y"]), position: 11 })
            ),
            other => panic!("unexpected head {other:?}"),
        }
        match heads[2] {
            Head::Proxy(Some(target)) => assert_eq!(target.children.len(), 1),
            other => panic!("unexpected head {other:?}"),
        }
        assert_eq!(heads[3], &Head::Proxy(None));
        assert_eq!(doc.entries[3].node.children.len(), 1);

        let doc = parse("e: $ .x (own: _)");
        assert!(matches!(doc.entries[0].node.head, Head::Proxy(Some(_))));
        assert_eq!(doc.entries[0].node.children.len(), 1);
    }

    #[test]
    fn relations_and_patterns() {
        let doc = parse("r: [.rel.next, a, b], p: [.rel.next, a, b, .]");
        assert!(doc.entries[0].node.is_relation_entry());
        match &doc.entries[1].node.head {
            Head::Relation { owner: Some(owner), .. } => assert!(owner.path.is_root()),
            other => panic!("unexpected head {other:?}"),
        }
    }

    #[test]
    fn hints_follow_children() {
        let doc = parse(r#"x: (y: _) #"backend":"file" #"note":"hi""#);
        assert_eq!(
            doc.entries[0].node.hints,
            vec![("backend".into(), "file".into()), ("note".into(), "hi".into())]
        );
    }

    #[test]
    fn code_symbols() {
        let doc = parse("?, *, =, +, -, !, >, ^, ~");
        let codes: Vec<Instruction> = doc
            .entries
            .iter()
            .map(|e| match e.node.head {
                Head::Code(i) => i,
                ref other => panic!("unexpected head {other:?}"),
            })
            .collect();
        assert_eq!(codes.len(), 9);
        assert!(!codes.contains(&Instruction::Receive));
    }

    #[test]
    fn syntax_errors_carry_positions() {
        assert!(matches!(parse_err("a: (b"), Error::Syntax { position: 5, .. }));
        assert!(matches!(parse_err("<3, 1>"), Error::Syntax { position: 0, .. }));
        assert!(matches!(parse_err("a: b (c)"), Error::Syntax { position: 3, .. }));
        assert!(matches!(parse_err("a b"), Error::Syntax { position: 2, .. }));
    }
}
