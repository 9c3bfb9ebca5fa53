//! License expression tokenizer and parser.
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! Expression := AndExpr (OR AndExpr)*
//! AndExpr    := WithExpr (AND WithExpr)*
//! WithExpr   := Primary (WITH Identifier)?
//! Primary    := Identifier | '(' Expression ')'
//! ```
//!
//! Parsing never fails. Stray operators, unmatched parentheses and trailing
//! tokens are skipped, and the reported identifiers are the union of what the
//! strict parse consumed and every raw identifier token, so a malformed
//! expression can over-report but never drops a license.

use std::collections::BTreeSet;

/// Nesting bound for parenthesized groups; deeper groups are flattened.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    And,
    Or,
    With,
    LParen,
    RParen,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '.' | '+' | '_')
}

fn tokenize(expression: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if current.is_empty() {
            return;
        }
        let word = std::mem::take(current);
        let token = if word.eq_ignore_ascii_case("and") {
            Token::And
        } else if word.eq_ignore_ascii_case("or") {
            Token::Or
        } else if word.eq_ignore_ascii_case("with") {
            Token::With
        } else {
            Token::Ident(word)
        };
        tokens.push(token);
    };

    for c in expression.chars() {
        if is_ident_char(c) {
            current.push(c);
            continue;
        }
        flush(&mut current, &mut tokens);
        match c {
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            // Whitespace and any unknown character only separate identifiers
            _ => {}
        }
    }
    flush(&mut current, &mut tokens);

    tokens
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    consumed: BTreeSet<String>,
    skipped: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            consumed: BTreeSet::new(),
            skipped: 0,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn run(&mut self) {
        while self.pos < self.tokens.len() {
            let start = self.pos;
            self.expression(0);
            if self.pos == start {
                // Stray operator or closing paren at top level
                self.pos += 1;
                self.skipped += 1;
            }
        }
    }

    fn expression(&mut self, depth: usize) {
        self.and_expr(depth);
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            self.and_expr(depth);
        }
    }

    fn and_expr(&mut self, depth: usize) {
        self.with_expr(depth);
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            self.with_expr(depth);
        }
    }

    fn with_expr(&mut self, depth: usize) {
        if !self.primary(depth) {
            return;
        }
        if self.peek() == Some(&Token::With) {
            self.pos += 1;
            match self.peek() {
                Some(Token::Ident(exception)) => {
                    self.consumed.insert(exception.clone());
                    self.pos += 1;
                }
                _ => self.skipped += 1,
            }
        }
    }

    /// Returns false when no primary could be read at the current position.
    fn primary(&mut self, depth: usize) -> bool {
        match self.peek() {
            Some(Token::Ident(name)) => {
                self.consumed.insert(name.clone());
                self.pos += 1;
                true
            }
            Some(Token::LParen) if depth < MAX_DEPTH => {
                self.pos += 1;
                self.expression(depth + 1);
                if self.peek() == Some(&Token::RParen) {
                    self.pos += 1;
                } else {
                    self.skipped += 1;
                }
                true
            }
            Some(Token::LParen) => {
                self.pos += 1;
                self.skipped += 1;
                true
            }
            _ => {
                self.skipped += 1;
                false
            }
        }
    }
}

/// Result of scanning one license expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionScan {
    /// Identifiers reported to callers (strict parse plus raw tokens).
    pub identifiers: BTreeSet<String>,
    /// Identifiers in order of first appearance, deduplicated.
    pub ordered: Vec<String>,
    /// True when the strict parse consumed every token without skipping.
    pub well_formed: bool,
}

/// Tokenize and parse a license expression.
pub fn scan(expression: &str) -> ExpressionScan {
    let tokens = tokenize(expression);
    let mut parser = Parser::new(&tokens);
    parser.run();

    let mut ordered: Vec<String> = Vec::new();
    for token in &tokens {
        if let Token::Ident(name) = token {
            if !ordered.contains(name) {
                ordered.push(name.clone());
            }
        }
    }

    let mut identifiers = parser.consumed;
    identifiers.extend(ordered.iter().cloned());

    ExpressionScan {
        identifiers,
        ordered,
        well_formed: parser.skipped == 0,
    }
}

/// Extract every license identifier from an expression.
///
/// Empty or absent input yields an empty set.
pub fn extract_identifiers(expression: Option<&str>) -> BTreeSet<String> {
    match expression {
        Some(expr) => scan(expr).identifiers,
        None => BTreeSet::new(),
    }
}

/// Identifiers in declaration order, deduplicated.
pub fn identifiers_in_order(expression: &str) -> Vec<String> {
    scan(expression).ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(expression: &str) -> Vec<String> {
        extract_identifiers(Some(expression)).into_iter().collect()
    }

    #[test]
    fn test_single_identifier() {
        assert_eq!(ids("MIT"), vec!["MIT"]);
    }

    #[test]
    fn test_or_in_parens() {
        assert_eq!(ids("(MIT OR Apache-2.0)"), vec!["Apache-2.0", "MIT"]);
    }

    #[test]
    fn test_with_exception() {
        assert_eq!(
            ids("MIT AND (Apache-2.0 WITH Classpath-exception-2.0)"),
            vec!["Apache-2.0", "Classpath-exception-2.0", "MIT"]
        );
    }

    #[test]
    fn test_trailing_operator() {
        assert_eq!(ids("MIT AND"), vec!["MIT"]);
        assert!(!scan("MIT AND").well_formed);
    }

    #[test]
    fn test_empty_and_absent() {
        assert!(extract_identifiers(Some("")).is_empty());
        assert!(extract_identifiers(Some("   ")).is_empty());
        assert!(extract_identifiers(None).is_empty());
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(ids("mit or bsd-3-clause"), vec!["bsd-3-clause", "mit"]);
        assert_eq!(ids("GPL-2.0+ with Bison-exception-2.2"), vec!["Bison-exception-2.2", "GPL-2.0+"]);
    }

    #[test]
    fn test_malformed_input_keeps_identifiers() {
        assert_eq!(ids("((MIT"), vec!["MIT"]);
        assert_eq!(ids("MIT) OR ) Apache-2.0"), vec!["Apache-2.0", "MIT"]);
        assert_eq!(ids("OR AND WITH"), Vec::<String>::new());
        assert_eq!(ids("MIT Apache-2.0"), vec!["Apache-2.0", "MIT"]);
        assert_eq!(ids("MIT, BSD-2-Clause; ISC"), vec!["BSD-2-Clause", "ISC", "MIT"]);
    }

    #[test]
    fn test_with_missing_exception() {
        assert_eq!(ids("Apache-2.0 WITH"), vec!["Apache-2.0"]);
        assert_eq!(ids("Apache-2.0 WITH (MIT)"), vec!["Apache-2.0", "MIT"]);
    }

    #[test]
    fn test_well_formed_flag() {
        assert!(scan("(MIT OR Apache-2.0) AND BSD-3-Clause").well_formed);
        assert!(!scan("(MIT OR").well_formed);
    }

    #[test]
    fn test_declaration_order() {
        assert_eq!(
            identifiers_in_order("Zlib OR (MIT AND Zlib) OR Apache-2.0"),
            vec!["Zlib", "MIT", "Apache-2.0"]
        );
    }

    #[test]
    fn test_deep_nesting_does_not_overflow() {
        let expression = format!("{}MIT{}", "(".repeat(500), ")".repeat(500));
        assert_eq!(ids(&expression), vec!["MIT"]);
    }
}
