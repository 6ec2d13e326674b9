//! Tokenizer for expression text.
//!
//! The tokenizer works on a substring of a possibly larger template. It is
//! driven one token at a time by the parser: each call to
//! [`Tokenizer::parse_next_token`] scans a single token starting at a byte
//! offset, remembers its kind and text, and returns the offset just past it.

use super::error::{ParseError, ParseResult};
use std::ops::Range;

/// Default escape character inside string constants
pub const DEFAULT_ESCAPE: char = '\\';

/// Terminator that ends an expression regardless of the enclosing character
pub const STATEMENT_TERMINATOR: char = ';';

/// Kinds of tokens produced by the tokenizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `(`
    ParenOpen,
    /// `)`
    ParenClose,
    /// Run of whitespace
    Separator,
    /// `,` between function arguments
    ArgumentSeparator,
    /// Enclosing quote character or `;`
    Terminator,
    /// Quoted string constant
    Constant,
    /// Bare word or operator symbol (keywords, names, numbers, paths)
    Keyword,
    /// End of input
    End,
}

/// Two-character operator symbols, checked before single characters
const COMPOUND_SYMBOLS: [&str; 6] = ["==", "!=", "<=", ">=", "&&", "||"];

fn is_symbol_char(ch: char) -> bool {
    matches!(ch, '=' | '!' | '<' | '>' | '&' | '|' | '+' | '-' | '*' | '/' | '%')
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '$'
}

/// Whether `keyword` scans as exactly one keyword token
pub(crate) fn is_single_keyword(keyword: &str) -> bool {
    match keyword.chars().next() {
        Some(first) if is_symbol_char(first) => {
            keyword.len() == first.len_utf8() || COMPOUND_SYMBOLS.contains(&keyword)
        }
        Some(first) if is_word_char(first) => keyword.chars().all(is_word_char),
        _ => false,
    }
}

/// Single-use tokenizer holding the most recently scanned token
#[derive(Debug)]
pub struct Tokenizer {
    kind: TokenKind,
    span: Range<usize>,
    text: String,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            kind: TokenKind::End,
            span: 0..0,
            text: String::new(),
        }
    }

    /// Kind of the last scanned token
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Text of the last scanned token. For constants this is the unescaped
    /// content without quotes.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Byte range of the last scanned token in the input
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    /// Scan the token starting at `pos` and return the offset after it.
    ///
    /// `enclosing` is the quote character surrounding the expression in a
    /// larger template; meeting it outside a string constant yields a
    /// [`TokenKind::Terminator`].
    pub fn parse_next_token(
        &mut self,
        code: &str,
        pos: usize,
        escape: char,
        enclosing: Option<char>,
    ) -> ParseResult<usize> {
        self.text.clear();

        let Some(ch) = code.get(pos..).and_then(|rest| rest.chars().next()) else {
            return Ok(self.finish(TokenKind::End, pos, pos));
        };
        let next = pos + ch.len_utf8();

        if Some(ch) == enclosing || ch == STATEMENT_TERMINATOR {
            self.text.push(ch);
            return Ok(self.finish(TokenKind::Terminator, pos, next));
        }

        match ch {
            '(' => Ok(self.finish(TokenKind::ParenOpen, pos, next)),
            ')' => Ok(self.finish(TokenKind::ParenClose, pos, next)),
            ',' => Ok(self.finish(TokenKind::ArgumentSeparator, pos, next)),
            '\'' | '"' => self.read_constant(code, pos, ch, escape, enclosing),
            c if c.is_whitespace() => {
                let end = scan_while(code, pos, char::is_whitespace);
                Ok(self.finish(TokenKind::Separator, pos, end))
            }
            c if is_symbol_char(c) => {
                let rest = &code[pos..];
                let end = COMPOUND_SYMBOLS
                    .iter()
                    .find(|symbol| rest.starts_with(*symbol))
                    .map(|symbol| pos + symbol.len())
                    .unwrap_or(next);
                self.text.push_str(&code[pos..end]);
                Ok(self.finish(TokenKind::Keyword, pos, end))
            }
            c if is_word_char(c) => {
                let end = scan_while(code, pos, is_word_char);
                self.text.push_str(&code[pos..end]);
                Ok(self.finish(TokenKind::Keyword, pos, end))
            }
            other => Err(ParseError::new(
                format!("Unexpected character '{}'", other),
                pos..next,
            )),
        }
    }

    /// Read a quoted constant, resolving escape sequences
    fn read_constant(
        &mut self,
        code: &str,
        start: usize,
        quote: char,
        escape: char,
        enclosing: Option<char>,
    ) -> ParseResult<usize> {
        let mut chars = code[start..].char_indices().skip(1);

        while let Some((offset, ch)) = chars.next() {
            if ch == escape {
                match chars.next() {
                    Some((_, 'n')) => self.text.push('\n'),
                    Some((_, 't')) => self.text.push('\t'),
                    Some((_, 'r')) => self.text.push('\r'),
                    Some((_, escaped)) => self.text.push(escaped),
                    None => break,
                }
            } else if ch == quote {
                let end = start + offset + ch.len_utf8();
                return Ok(self.finish(TokenKind::Constant, start, end));
            } else if Some(ch) == enclosing {
                // The enclosing quote ends the surrounding template, never the constant
                let at = start + offset;
                self.text.clear();
                return Err(ParseError::new("Unterminated string literal", start..at));
            } else {
                self.text.push(ch);
            }
        }

        self.text.clear();
        Err(ParseError::new(
            "Unterminated string literal",
            start..code.len(),
        ))
    }

    fn finish(&mut self, kind: TokenKind, start: usize, end: usize) -> usize {
        self.kind = kind;
        self.span = start..end;
        end
    }
}

fn scan_while(code: &str, pos: usize, predicate: impl Fn(char) -> bool) -> usize {
    code[pos..]
        .char_indices()
        .find(|(_, ch)| !predicate(*ch))
        .map(|(offset, _)| pos + offset)
        .unwrap_or(code.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(code: &str, enclosing: Option<char>) -> ParseResult<Vec<(TokenKind, String)>> {
        let mut tokenizer = Tokenizer::new();
        let mut pos = 0;
        let mut tokens = Vec::new();
        loop {
            pos = tokenizer.parse_next_token(code, pos, DEFAULT_ESCAPE, enclosing)?;
            if tokenizer.kind() == TokenKind::End {
                break;
            }
            tokens.push((tokenizer.kind(), tokenizer.text().to_string()));
            if tokenizer.kind() == TokenKind::Terminator {
                break;
            }
        }
        Ok(tokens)
    }

    #[test]
    fn test_basic_tokens() -> ParseResult<()> {
        let tokens = tokenize("object.age >= 30 and (x,y)", None)?;
        let kinds: Vec<TokenKind> = tokens.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Keyword,
                TokenKind::Separator,
                TokenKind::Keyword,
                TokenKind::Separator,
                TokenKind::Keyword,
                TokenKind::Separator,
                TokenKind::Keyword,
                TokenKind::Separator,
                TokenKind::ParenOpen,
                TokenKind::Keyword,
                TokenKind::ArgumentSeparator,
                TokenKind::Keyword,
                TokenKind::ParenClose,
            ]
        );
        assert_eq!(tokens[0].1, "object.age");
        assert_eq!(tokens[2].1, ">=");
        assert_eq!(tokens[4].1, "30");
        Ok(())
    }

    #[test]
    fn test_symbols_split_from_words() -> ParseResult<()> {
        let tokens = tokenize("a!=b", None)?;
        let texts: Vec<&str> = tokens.iter().map(|(_, text)| text.as_str()).collect();
        assert_eq!(texts, vec!["a", "!=", "b"]);

        let tokens = tokenize("!(a)", None)?;
        assert_eq!(tokens[0], (TokenKind::Keyword, "!".to_string()));
        Ok(())
    }

    #[test]
    fn test_string_constants_and_escapes() -> ParseResult<()> {
        let tokens = tokenize(r#"'it\'s' "tab\there""#, None)?;
        assert_eq!(tokens[0], (TokenKind::Constant, "it's".to_string()));
        assert_eq!(tokens[2], (TokenKind::Constant, "tab\there".to_string()));
        Ok(())
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("name == 'Smith", None).unwrap_err();
        assert_eq!(err.message, "Unterminated string literal");
        assert_eq!(err.span, 8..14);
    }

    #[test]
    fn test_enclosing_character_terminates() -> ParseResult<()> {
        let code = r#"object.a == 'x'" rest"#;
        let tokens = tokenize(code, Some('"'))?;
        assert_eq!(tokens.last(), Some(&(TokenKind::Terminator, "\"".to_string())));

        // An unescaped enclosing quote inside a constant is never content
        let err = tokenize(r#"'ab"c'"#, Some('"')).unwrap_err();
        assert_eq!(err.span, 0..3);

        // Escaped, it is
        let tokens = tokenize(r#"'ab\"c'"#, Some('"'))?;
        assert_eq!(tokens[0], (TokenKind::Constant, "ab\"c".to_string()));
        Ok(())
    }

    #[test]
    fn test_semicolon_terminates() -> ParseResult<()> {
        let tokens = tokenize("a; b", None)?;
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].0, TokenKind::Terminator);
        Ok(())
    }

    #[test]
    fn test_single_keyword() {
        for keyword in ["and", "object.name", "==", "||", "%", "<"] {
            assert!(is_single_keyword(keyword), "{}", keyword);
        }
        for keyword in ["", "=>", "<>", "===", "a+", "+a", "a b", "(", "'x'"] {
            assert!(!is_single_keyword(keyword), "{}", keyword);
        }
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a # b", None).unwrap_err();
        assert_eq!(err.span, 2..3);
    }
}
