//! Parser for gdb's machine interface output records.
//!
//! One line in, one record out. Values are c-strings, `{}` tuples, or `[]`
//! lists; lists may hold bare values or `name=value` results, and gdb mixes
//! both, so a list element that is a result is kept as a one-entry tuple.

use std::fmt;

/// A value on the right-hand side of an MI result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiValue {
    Const(String),
    Tuple(Vec<(String, MiValue)>),
    List(Vec<MiValue>),
}

impl MiValue {
    /// The string payload, if this is a constant.
    pub fn as_const(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }

    /// Look up `name` in a tuple (or single-result list element).
    pub fn lookup(&self, name: &str) -> Option<&MiValue> {
        match self {
            MiValue::Tuple(results) => results
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Shorthand for `lookup(name)` on a constant field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.lookup(name).and_then(MiValue::as_const)
    }
}

/// One line of MI output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiRecord {
    /// `^done`, `^error`, and friends, with their attached results.
    Result {
        token: Option<u64>,
        class: String,
        results: Vec<(String, MiValue)>,
    },
    /// `*stopped`, `=thread-created`, `+download`, and other async records.
    Async {
        kind: char,
        class: String,
        results: Vec<(String, MiValue)>,
    },
    /// `~"..."`, `&"..."`, `@"..."` console/log/target output.
    Stream { kind: char, text: String },
    /// The `(gdb)` ready prompt.
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiParseError {
    pub at: usize,
    pub what: String,
}

impl fmt::Display for MiParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bad MI output at byte {}: {}", self.at, self.what)
    }
}

impl std::error::Error for MiParseError {}

/// Parse one line of MI output (without the trailing newline).
pub fn parse_line(line: &str) -> Result<MiRecord, MiParseError> {
    let mut parser = Parser {
        bytes: line.as_bytes(),
        pos: 0,
    };
    parser.record()
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn record(&mut self) -> Result<MiRecord, MiParseError> {
        if self.rest().trim_end() == "(gdb)" {
            return Ok(MiRecord::Prompt);
        }
        let token = self.token();
        match self.peek() {
            Some(b'^') => {
                self.pos += 1;
                let class = self.class_name()?;
                let results = self.result_tail()?;
                Ok(MiRecord::Result {
                    token,
                    class,
                    results,
                })
            }
            Some(kind @ (b'*' | b'=' | b'+')) => {
                self.pos += 1;
                let class = self.class_name()?;
                let results = self.result_tail()?;
                Ok(MiRecord::Async {
                    kind: kind as char,
                    class,
                    results,
                })
            }
            Some(kind @ (b'~' | b'&' | b'@')) => {
                self.pos += 1;
                let text = self.c_string()?;
                Ok(MiRecord::Stream {
                    kind: kind as char,
                    text,
                })
            }
            _ => Err(self.fail("expected a record marker")),
        }
    }

    fn token(&mut self) -> Option<u64> {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return None;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
    }

    fn class_name(&mut self) -> Result<String, MiParseError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'-')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.fail("expected a class name"));
        }
        Ok(String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned())
    }

    fn result_tail(&mut self) -> Result<Vec<(String, MiValue)>, MiParseError> {
        let mut results = Vec::new();
        while self.peek() == Some(b',') {
            self.pos += 1;
            results.push(self.result()?);
        }
        if self.pos < self.bytes.len() && !self.rest().trim().is_empty() {
            return Err(self.fail("trailing junk after record"));
        }
        Ok(results)
    }

    fn result(&mut self) -> Result<(String, MiValue), MiParseError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.fail("expected a result name"));
        }
        let name = String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned();
        if self.peek() != Some(b'=') {
            return Err(self.fail("expected `=` after result name"));
        }
        self.pos += 1;
        let value = self.value()?;
        Ok((name, value))
    }

    fn value(&mut self) -> Result<MiValue, MiParseError> {
        match self.peek() {
            Some(b'"') => Ok(MiValue::Const(self.c_string()?)),
            Some(b'{') => {
                self.pos += 1;
                let mut results = Vec::new();
                if self.peek() == Some(b'}') {
                    self.pos += 1;
                    return Ok(MiValue::Tuple(results));
                }
                loop {
                    results.push(self.result()?);
                    match self.peek() {
                        Some(b',') => self.pos += 1,
                        Some(b'}') => {
                            self.pos += 1;
                            return Ok(MiValue::Tuple(results));
                        }
                        _ => return Err(self.fail("expected `,` or `}` in tuple")),
                    }
                }
            }
            Some(b'[') => {
                self.pos += 1;
                let mut items = Vec::new();
                if self.peek() == Some(b']') {
                    self.pos += 1;
                    return Ok(MiValue::List(items));
                }
                loop {
                    // List elements are either bare values or name=value
                    // results; fold a result into a one-entry tuple.
                    let item = match self.peek() {
                        Some(b'"') | Some(b'{') | Some(b'[') => self.value()?,
                        _ => {
                            let result = self.result()?;
                            MiValue::Tuple(vec![result])
                        }
                    };
                    items.push(item);
                    match self.peek() {
                        Some(b',') => self.pos += 1,
                        Some(b']') => {
                            self.pos += 1;
                            return Ok(MiValue::List(items));
                        }
                        _ => return Err(self.fail("expected `,` or `]` in list")),
                    }
                }
            }
            _ => Err(self.fail("expected a value")),
        }
    }

    fn c_string(&mut self) -> Result<String, MiParseError> {
        if self.peek() != Some(b'"') {
            return Err(self.fail("expected `\"`"));
        }
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.fail("unterminated string")),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let escaped = self.peek().ok_or_else(|| self.fail("dangling escape"))?;
                    self.pos += 1;
                    match escaped {
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        b'r' => out.push('\r'),
                        b'"' => out.push('"'),
                        b'\\' => out.push('\\'),
                        other => {
                            out.push('\\');
                            out.push(other as char);
                        }
                    }
                }
                Some(_) => {
                    let start = self.pos;
                    while self
                        .peek()
                        .is_some_and(|b| b != b'"' && b != b'\\')
                    {
                        self.pos += 1;
                    }
                    out.push_str(&String::from_utf8_lossy(&self.bytes[start..self.pos]));
                }
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn rest(&self) -> &str {
        std::str::from_utf8(&self.bytes[self.pos..]).unwrap_or("")
    }

    fn fail(&self, what: &str) -> MiParseError {
        MiParseError {
            at: self.pos,
            what: what.to_string(),
        }
    }
}
