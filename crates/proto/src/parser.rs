//! Recursive-descent JSON parser building arena-allocated [`Value`] nodes.
//!
//! The parser works on raw payload bytes, copies string data into the
//! arena (unescaping as it goes), and bounds nesting at [`MAX_DEPTH`] to keep
//! stack usage predictable. Errors carry the byte offset the parser stopped
//! at. A failed parse may leave partial nodes in the arena; they are
//! reclaimed wholesale by the next reset.

use mcpd_memory::Arena;

use crate::error::{ParseErrorKind, ProtoError, ProtoResult};
use crate::value::Value;

/// Hard limit on container nesting.
pub const MAX_DEPTH: u32 = 100;

/// Parses `input` into an arena-backed DOM.
///
/// The whole input must be one JSON document; trailing non-whitespace bytes
/// are an error.
pub fn parse<'a>(arena: &'a Arena, input: &[u8]) -> ProtoResult<&'a Value<'a>> {
    let mut parser = Parser {
        arena,
        bytes: input,
        pos: 0,
        depth: 0,
        scratch: String::new(),
    };
    parser.skip_whitespace();
    let value = parser.parse_value()?;
    parser.skip_whitespace();
    if parser.pos != parser.bytes.len() {
        return Err(ProtoError::parse(parser.pos, ParseErrorKind::TrailingData));
    }
    Ok(value)
}

struct Parser<'a, 'b> {
    arena: &'a Arena,
    bytes: &'b [u8],
    pos: usize,
    depth: u32,
    /// Reused unescape buffer; most strings never touch it.
    scratch: String,
}

impl<'a, 'b> Parser<'a, 'b> {
    fn node(&self, value: Value<'a>) -> ProtoResult<&'a Value<'a>> {
        Ok(self.arena.alloc(value)?)
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&self) -> ProtoResult<u8> {
        self.peek()
            .ok_or(ProtoError::parse(self.pos, ParseErrorKind::UnexpectedEof))
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn parse_value(&mut self) -> ProtoResult<&'a Value<'a>> {
        match self.expect()? {
            b'{' => self.parse_object(),
            b'[' => self.parse_array(),
            b'"' => {
                let s = self.parse_string()?;
                self.node(Value::String(s))
            }
            b't' => {
                self.expect_literal(b"true")?;
                self.node(Value::Bool(true))
            }
            b'f' => {
                self.expect_literal(b"false")?;
                self.node(Value::Bool(false))
            }
            b'n' => {
                self.expect_literal(b"null")?;
                self.node(Value::Null)
            }
            b'-' | b'0'..=b'9' => self.parse_number(),
            _ => Err(ProtoError::parse(self.pos, ParseErrorKind::UnexpectedChar)),
        }
    }

    fn expect_literal(&mut self, literal: &[u8]) -> ProtoResult<()> {
        if self.bytes[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(ProtoError::parse(self.pos, ParseErrorKind::UnexpectedChar))
        }
    }

    fn enter(&mut self) -> ProtoResult<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ProtoError::parse(self.pos, ParseErrorKind::DepthExceeded));
        }
        Ok(())
    }

    fn parse_array(&mut self) -> ProtoResult<&'a Value<'a>> {
        self.enter()?;
        self.pos += 1; // '['
        let mut items: Vec<&'a Value<'a>> = Vec::new();
        self.skip_whitespace();
        if self.expect()? == b']' {
            self.pos += 1;
            self.depth -= 1;
            return self.node(Value::Array(items));
        }
        loop {
            items.push(self.parse_value()?);
            self.skip_whitespace();
            match self.expect()? {
                b',' => {
                    self.pos += 1;
                    self.skip_whitespace();
                }
                b']' => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(ProtoError::parse(self.pos, ParseErrorKind::UnexpectedChar)),
            }
        }
        self.depth -= 1;
        self.node(Value::Array(items))
    }

    fn parse_object(&mut self) -> ProtoResult<&'a Value<'a>> {
        self.enter()?;
        self.pos += 1; // '{'
        let mut members: indexmap::IndexMap<String, &'a Value<'a>> = indexmap::IndexMap::new();
        self.skip_whitespace();
        if self.expect()? == b'}' {
            self.pos += 1;
            self.depth -= 1;
            return self.node(Value::Object(members));
        }
        loop {
            if self.expect()? != b'"' {
                return Err(ProtoError::parse(self.pos, ParseErrorKind::UnexpectedChar));
            }
            let key = self.parse_string()?.to_string();
            self.skip_whitespace();
            if self.expect()? != b':' {
                return Err(ProtoError::parse(self.pos, ParseErrorKind::UnexpectedChar));
            }
            self.pos += 1;
            self.skip_whitespace();
            let value = self.parse_value()?;
            // Duplicate keys: the last occurrence wins.
            members.insert(key, value);
            self.skip_whitespace();
            match self.expect()? {
                b',' => {
                    self.pos += 1;
                    self.skip_whitespace();
                }
                b'}' => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(ProtoError::parse(self.pos, ParseErrorKind::UnexpectedChar)),
            }
        }
        self.depth -= 1;
        self.node(Value::Object(members))
    }

    /// Parses a string token and copies its (unescaped) contents into the
    /// arena. `self.pos` must be at the opening quote.
    fn parse_string(&mut self) -> ProtoResult<&'a str> {
        self.pos += 1; // '"'
        let mut chunk_start = self.pos;
        let mut escaped = false;
        self.scratch.clear();
        loop {
            match self.expect()? {
                b'"' => {
                    let chunk = self.utf8_chunk(chunk_start)?;
                    self.pos += 1;
                    if !escaped {
                        return Ok(self.arena.alloc_str(chunk)?);
                    }
                    let arena = self.arena;
                    self.scratch.push_str(chunk);
                    return Ok(arena.alloc_str(&self.scratch)?);
                }
                b'\\' => {
                    let chunk = self.utf8_chunk(chunk_start)?;
                    self.scratch.push_str(chunk);
                    escaped = true;
                    self.pos += 1;
                    self.parse_escape()?;
                    chunk_start = self.pos;
                }
                0x00..=0x1F => {
                    // Raw control characters must be escaped.
                    return Err(ProtoError::parse(self.pos, ParseErrorKind::UnexpectedChar));
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Validates `bytes[chunk_start..self.pos]` as UTF-8. The returned slice
    /// borrows the input payload, not the parser.
    fn utf8_chunk(&self, chunk_start: usize) -> ProtoResult<&'b str> {
        let bytes = self.bytes;
        std::str::from_utf8(&bytes[chunk_start..self.pos])
            .map_err(|e| ProtoError::parse(chunk_start + e.valid_up_to(), ParseErrorKind::InvalidUtf8))
    }

    /// Decodes one escape sequence (the backslash is already consumed) and
    /// pushes the result onto the scratch buffer.
    fn parse_escape(&mut self) -> ProtoResult<()> {
        let escape_pos = self.pos - 1;
        let b = self.expect()?;
        self.pos += 1;
        let ch = match b {
            b'"' => '"',
            b'\\' => '\\',
            b'/' => '/',
            b'b' => '\u{0008}',
            b'f' => '\u{000C}',
            b'n' => '\n',
            b'r' => '\r',
            b't' => '\t',
            b'u' => {
                let ch = self.parse_unicode_escape(escape_pos)?;
                self.scratch.push(ch);
                return Ok(());
            }
            _ => return Err(ProtoError::parse(escape_pos, ParseErrorKind::InvalidEscape)),
        };
        self.scratch.push(ch);
        Ok(())
    }

    /// Decodes `\uXXXX`, pairing surrogates into supplementary-plane code
    /// points per RFC 8259.
    fn parse_unicode_escape(&mut self, escape_pos: usize) -> ProtoResult<char> {
        let high = self.hex4()?;
        if (0xDC00..=0xDFFF).contains(&high) {
            // A low surrogate with no preceding high surrogate.
            return Err(ProtoError::parse(escape_pos, ParseErrorKind::InvalidUnicode));
        }
        if (0xD800..=0xDBFF).contains(&high) {
            if self.expect()? != b'\\' {
                return Err(ProtoError::parse(escape_pos, ParseErrorKind::InvalidUnicode));
            }
            self.pos += 1;
            if self.expect()? != b'u' {
                return Err(ProtoError::parse(escape_pos, ParseErrorKind::InvalidUnicode));
            }
            self.pos += 1;
            let low = self.hex4()?;
            if !(0xDC00..=0xDFFF).contains(&low) {
                return Err(ProtoError::parse(escape_pos, ParseErrorKind::InvalidUnicode));
            }
            let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
            return char::from_u32(code)
                .ok_or(ProtoError::parse(escape_pos, ParseErrorKind::InvalidUnicode));
        }
        char::from_u32(high).ok_or(ProtoError::parse(escape_pos, ParseErrorKind::InvalidUnicode))
    }

    fn hex4(&mut self) -> ProtoResult<u32> {
        let mut code: u32 = 0;
        for _ in 0..4 {
            let b = self.expect()?;
            let digit = match b {
                b'0'..=b'9' => u32::from(b - b'0'),
                b'a'..=b'f' => u32::from(b - b'a') + 10,
                b'A'..=b'F' => u32::from(b - b'A') + 10,
                _ => return Err(ProtoError::parse(self.pos, ParseErrorKind::InvalidUnicode)),
            };
            code = (code << 4) | digit;
            self.pos += 1;
        }
        Ok(code)
    }

    fn parse_number(&mut self) -> ProtoResult<&'a Value<'a>> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        match self.expect()? {
            b'0' => self.pos += 1,
            b'1'..=b'9' => {
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
            }
            _ => return Err(ProtoError::parse(self.pos, ParseErrorKind::InvalidNumber)),
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            self.digits(ParseErrorKind::InvalidNumber)?;
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            self.digits(ParseErrorKind::InvalidNumber)?;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| ProtoError::parse(start, ParseErrorKind::InvalidNumber))?;
        let number: f64 = text
            .parse()
            .map_err(|_| ProtoError::parse(start, ParseErrorKind::InvalidNumber))?;
        self.node(Value::Number(number))
    }

    /// Consumes one or more digits.
    fn digits(&mut self, kind: ParseErrorKind) -> ProtoResult<()> {
        if !matches!(self.expect()?, b'0'..=b'9') {
            return Err(ProtoError::parse(self.pos, kind));
        }
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        Ok(())
    }
}
