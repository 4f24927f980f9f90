use super::CompileError;
use super::ast::{Combinator, CompareOp, Comparison, TriggerAst, Variable};

/// Parse trigger source text into a [`TriggerAst`].
pub fn parse_trigger(source: &str) -> Result<TriggerAst, CompileError> {
    let mut parser = Parser::new(source);
    parser.skip_ws();
    if parser.eof() {
        return Ok(TriggerAst::Always);
    }

    let head = parser.parse_comparison()?;
    let mut tail = Vec::new();
    loop {
        parser.skip_ws();
        if parser.eof() {
            break;
        }
        let combinator = parser.parse_combinator()?;
        parser.skip_ws();
        if parser.eof() {
            return Err(parser.error("expected a clause after combinator"));
        }
        tail.push((combinator, parser.parse_comparison()?));
    }

    Ok(TriggerAst::Chain { head, tail })
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
}

type ParseResult<T> = Result<T, CompileError>;

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            index: 0,
        }
    }

    fn eof(&self) -> bool {
        self.index >= self.bytes.len()
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek_char(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn advance(&mut self) {
        if self.index < self.bytes.len() {
            self.index += 1;
        }
    }

    fn skip_ws(&mut self) {
        while let Some(ch) = self.current() {
            if ch.is_ascii_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn parse_comparison(&mut self) -> ParseResult<Comparison> {
        let variable = self.parse_variable()?;
        self.skip_ws();
        let op = self.parse_operator()?;
        self.skip_ws();
        let value = self.parse_number()?;
        Ok(Comparison {
            variable,
            op,
            value,
        })
    }

    fn parse_variable(&mut self) -> ParseResult<Variable> {
        let start = self.index;
        let word = self.take_word();
        if word.is_empty() {
            return Err(self.error("expected a variable name"));
        }
        word.parse::<Variable>().map_err(|_| CompileError::UnknownVariable {
            name: word.to_string(),
            offset: start,
        })
    }

    fn parse_operator(&mut self) -> ParseResult<CompareOp> {
        let op = match (self.current(), self.peek_char()) {
            (Some(b'<'), Some(b'=')) => CompareOp::Le,
            (Some(b'>'), Some(b'=')) => CompareOp::Ge,
            (Some(b'='), Some(b'=')) => CompareOp::Eq,
            (Some(b'!'), Some(b'=')) => CompareOp::Ne,
            (Some(b'<'), _) => {
                self.advance();
                return Ok(CompareOp::Lt);
            }
            (Some(b'>'), _) => {
                self.advance();
                return Ok(CompareOp::Gt);
            }
            _ => return Err(self.error("expected one of <, >, <=, >=, ==, !=")),
        };
        self.advance();
        self.advance();
        Ok(op)
    }

    fn parse_number(&mut self) -> ParseResult<f64> {
        let start = self.index;
        if matches!(self.current(), Some(b'-') | Some(b'+')) {
            self.advance();
        }

        let mut has_digit = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                has_digit = true;
                self.advance();
            } else {
                break;
            }
        }
        if self.current() == Some(b'.') {
            self.advance();
            while let Some(ch) = self.current() {
                if ch.is_ascii_digit() {
                    has_digit = true;
                    self.advance();
                } else {
                    break;
                }
            }
        }

        // Reject `20abc`, `1.2.3` and similar.
        if let Some(ch) = self.current() {
            if is_word_char(ch) || ch == b'.' {
                while let Some(ch) = self.current() {
                    if ch.is_ascii_whitespace() {
                        break;
                    }
                    self.advance();
                }
                return Err(self.malformed(start));
            }
        }

        if !has_digit {
            return Err(self.malformed(start));
        }

        let text = &self.src[start..self.index];
        match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => Err(self.malformed(start)),
        }
    }

    fn parse_combinator(&mut self) -> ParseResult<Combinator> {
        match (self.current(), self.peek_char()) {
            (Some(b'&'), Some(b'&')) => {
                self.advance();
                self.advance();
                return Ok(Combinator::And);
            }
            (Some(b'|'), Some(b'|')) => {
                self.advance();
                self.advance();
                return Ok(Combinator::Or);
            }
            _ => {}
        }

        let start = self.index;
        let word = self.take_word();
        if word.eq_ignore_ascii_case("and") {
            Ok(Combinator::And)
        } else if word.eq_ignore_ascii_case("or") {
            Ok(Combinator::Or)
        } else {
            self.index = start;
            Err(self.error("expected AND or OR"))
        }
    }

    fn take_word(&mut self) -> &'a str {
        let start = self.index;
        while let Some(ch) = self.current() {
            if is_word_char(ch) {
                self.advance();
            } else {
                break;
            }
        }
        &self.src[start..self.index]
    }

    fn malformed(&self, start: usize) -> CompileError {
        CompileError::MalformedLiteral {
            literal: self.src[start..self.index].to_string(),
            offset: start,
        }
    }

    fn error(&self, message: &str) -> CompileError {
        CompileError::Syntax {
            message: message.to_string(),
            offset: self.index,
        }
    }
}

fn is_word_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}
