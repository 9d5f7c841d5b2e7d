//! Static Python literal parsing
//!
//! Parses the right-hand side of a top-level `NAME = <literal>` assignment
//! into JSON. Only literals are understood: strings (including
//! triple-quoted), numbers, `True`/`False`/`None`, lists, tuples, and dicts
//! with string keys. Anything requiring evaluation (calls, names,
//! comprehensions) is rejected, which is what keeps extraction static.

use serde_json::{Map, Number, Value};

/// Parse one Python literal into a JSON value
pub fn parse(text: &str) -> Result<Value, String> {
    let mut parser = Parser::new(text);
    parser.skip_trivia();
    let value = parser.value()?;
    parser.skip_trivia();
    if parser.at_end() {
        Ok(value)
    } else {
        Err(format!("trailing characters at offset {}", parser.pos))
    }
}

/// Whether `text` contains a bracket- and quote-balanced literal
///
/// Used when collecting a multi-line literal: lines are appended until the
/// accumulated text balances.
pub fn is_complete(text: &str) -> bool {
    let mut depth = 0i32;
    let mut chars = text.chars().peekable();
    let mut saw_content = false;

    while let Some(c) = chars.next() {
        match c {
            '#' => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '\'' | '"' => {
                saw_content = true;
                if !skip_string(c, &mut chars) {
                    return false;
                }
            }
            '{' | '[' | '(' => {
                saw_content = true;
                depth += 1;
            }
            '}' | ']' | ')' => {
                saw_content = true;
                depth -= 1;
            }
            c if !c.is_whitespace() => saw_content = true,
            _ => {}
        }
    }

    saw_content && depth <= 0
}

/// Consume a string opened by `quote`; returns false if it never closes
fn skip_string(quote: char, chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> bool {
    // Detect triple quotes
    let mut lookahead = chars.clone();
    let triple = lookahead.next() == Some(quote) && lookahead.next() == Some(quote);
    if triple {
        chars.next();
        chars.next();
        let mut run = 0;
        for c in chars.by_ref() {
            if c == quote {
                run += 1;
                if run == 3 {
                    return true;
                }
            } else {
                run = 0;
            }
        }
        return false;
    }

    let mut escaped = false;
    for c in chars.by_ref() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return true;
        } else if c == '\n' {
            return false;
        }
    }
    false
}

struct Parser {
    src: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            src: text.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.src.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn value(&mut self) -> Result<Value, String> {
        match self.peek() {
            Some('{') => self.dict(),
            Some('[') => self.sequence('[', ']'),
            Some('(') => self.sequence('(', ')'),
            Some('\'') | Some('"') => self.string().map(Value::String),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => self.keyword(),
            Some(c) => Err(format!("unexpected character '{}'", c)),
            None => Err("unexpected end of literal".to_string()),
        }
    }

    fn keyword(&mut self) -> Result<Value, String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.src[start..self.pos].iter().collect();
        match word.as_str() {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            other => Err(format!("'{}' is not a literal", other)),
        }
    }

    fn number(&mut self) -> Result<Value, String> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => self.pos += 1,
                '.' | 'e' | 'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some('-') | Some('+')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let text: String = self.src[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let parsed: f64 = text.parse().map_err(|_| format!("bad number '{}'", text))?;
            Number::from_f64(parsed)
                .map(Value::Number)
                .ok_or_else(|| format!("non-finite number '{}'", text))
        } else {
            let parsed: i64 = text.parse().map_err(|_| format!("bad number '{}'", text))?;
            Ok(Value::Number(parsed.into()))
        }
    }

    fn string(&mut self) -> Result<String, String> {
        let quote = self.bump().expect("string start checked by caller");
        let triple = self.peek() == Some(quote) && self.src.get(self.pos + 1) == Some(&quote);
        if triple {
            self.pos += 2;
            return self.triple_string(quote);
        }

        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => out.push(self.escape()?),
                Some(c) if c == quote => return Ok(out),
                Some('\n') | None => return Err("unterminated string".to_string()),
                Some(c) => out.push(c),
            }
        }
    }

    fn triple_string(&mut self, quote: char) -> Result<String, String> {
        let mut out = String::new();
        loop {
            if self.peek() == Some(quote)
                && self.src.get(self.pos + 1) == Some(&quote)
                && self.src.get(self.pos + 2) == Some(&quote)
            {
                self.pos += 3;
                return Ok(out);
            }
            match self.bump() {
                Some('\\') => out.push(self.escape()?),
                Some(c) => out.push(c),
                None => return Err("unterminated triple-quoted string".to_string()),
            }
        }
    }

    fn escape(&mut self) -> Result<char, String> {
        match self.bump() {
            Some('n') => Ok('\n'),
            Some('t') => Ok('\t'),
            Some('r') => Ok('\r'),
            Some('0') => Ok('\0'),
            Some('\\') => Ok('\\'),
            Some('\'') => Ok('\''),
            Some('"') => Ok('"'),
            Some(other) => Ok(other),
            None => Err("dangling escape".to_string()),
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Value, String> {
        debug_assert_eq!(self.peek(), Some(open));
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_trivia();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                Some(c) if c == close => {}
                _ => return Err(format!("expected ',' or '{}'", close)),
            }
        }
    }

    fn dict(&mut self) -> Result<Value, String> {
        debug_assert_eq!(self.peek(), Some('{'));
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_trivia();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.peek() {
                Some('\'') | Some('"') => self.string()?,
                _ => return Err("dict keys must be string literals".to_string()),
            };
            self.skip_trivia();
            if self.bump() != Some(':') {
                return Err(format!("expected ':' after key '{}'", key));
            }
            self.skip_trivia();
            let value = self.value()?;
            map.insert(key, value);
            self.skip_trivia();
            match self.peek() {
                Some(',') => {
                    self.pos += 1;
                }
                Some('}') => {}
                _ => return Err("expected ',' or '}'".to_string()),
            }
        }
    }
}
