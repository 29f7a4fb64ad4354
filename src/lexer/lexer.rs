use super::{SourceLocation, TokenKind};

/// Token cursor over a source stream.
///
/// There is always a valid current token: the constructor scans ahead
/// to the first meaningful symbol (or `Eof` for an empty/comment-only
/// stream), and `advance` re-establishes that state. Characters that
/// aren't one of the eight meaningful symbols are comments and get
/// skipped, though they still advance the source location.
#[derive(Debug, Clone)]
pub struct Lexer<'a> {
    chars: std::str::Chars<'a>,

    current_token: TokenKind,
    current_location: SourceLocation,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Lexer<'a> {
        let mut lexer = Lexer {
            chars: source.chars(),
            current_token: TokenKind::Eof,
            current_location: SourceLocation::default(),
        };
        lexer.advance();
        lexer
    }

    /// The token at the cursor. Doesn't consume anything.
    pub fn current_token(&self) -> TokenKind {
        self.current_token
    }

    /// Where the current token was consumed (or where the stream ended).
    pub fn current_location(&self) -> SourceLocation {
        self.current_location
    }

    /// Consume characters until the next meaningful symbol or the end
    /// of the stream, and make that the current token.
    pub fn advance(&mut self) {
        for c in self.chars.by_ref() {
            self.current_location.advance(c);

            if let Some(token) = TokenKind::classify(c) {
                self.current_token = token;
                return;
            }
        }

        self.current_token = TokenKind::Eof;
    }
}
