use std::fmt;

use crate::region::EvalError;

/// A value in the source language: either an opaque atom or a list with an
/// operator head and ordered children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Object {
    Atom(String),
    List(List),
}

/// The operator is a distinct head field, not the first child. A list whose
/// operator is empty is a pure literal container.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct List {
    pub op: String,
    pub items: Vec<Object>,
}

impl Object {
    pub fn atom(value: impl Into<String>) -> Self {
        Object::Atom(value.into())
    }

    pub(crate) fn as_int(&self) -> Result<i64, EvalError> {
        match self {
            Object::Atom(text) => text
                .parse::<i64>()
                .map_err(|_| EvalError::BadNumber(text.clone())),
            Object::List(_) => Err(EvalError::TypeMismatch("atom")),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Atom(text) => f.write_str(text),
            Object::List(list) => list.fmt(f),
        }
    }
}

impl fmt::Display for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        let mut separate = false;
        if !self.op.is_empty() {
            f.write_str(&self.op)?;
            separate = true;
        }
        for item in &self.items {
            if separate {
                f.write_str(" ")?;
            }
            item.fmt(f)?;
            separate = true;
        }
        f.write_str(")")
    }
}

impl From<List> for Object {
    fn from(list: List) -> Self {
        Object::List(list)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadError {
    UnbalancedClose { line: usize },
    UnclosedList { line: usize },
    Empty,
    Trailing { line: usize },
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::UnbalancedClose { line } => {
                write!(f, "line {line}: ')' without matching '('")
            }
            ReadError::UnclosedList { line } => {
                write!(f, "line {line}: unclosed list at end of input")
            }
            ReadError::Empty => write!(f, "no expression in input"),
            ReadError::Trailing { line } => {
                write!(f, "line {line}: trailing input after expression")
            }
        }
    }
}

impl std::error::Error for ReadError {}

/// Read exactly one object from `source`.
pub fn read_str(source: &str) -> Result<Object, ReadError> {
    let mut reader = Reader::new(source);
    let object = reader.next_object()?.ok_or(ReadError::Empty)?;
    if reader.next_object()?.is_some() {
        return Err(ReadError::Trailing { line: reader.line });
    }
    Ok(object)
}

/// Read every top-level object from `source`, in order.
pub fn read_all(source: &str) -> Result<Vec<Object>, ReadError> {
    let mut reader = Reader::new(source);
    let mut objects = Vec::new();
    while let Some(object) = reader.next_object()? {
        objects.push(object);
    }
    Ok(objects)
}

struct Reader<'s> {
    bytes: &'s [u8],
    pos: usize,
    line: usize,
}

impl<'s> Reader<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            bytes: source.as_bytes(),
            pos: 0,
            line: 1,
        }
    }

    fn next_object(&mut self) -> Result<Option<Object>, ReadError> {
        self.skip_whitespace();
        match self.peek() {
            None => Ok(None),
            Some(b')') => Err(ReadError::UnbalancedClose { line: self.line }),
            Some(b'(') => {
                self.bump();
                self.read_list().map(|list| Some(Object::List(list)))
            }
            Some(_) => Ok(Some(Object::Atom(self.read_atom()))),
        }
    }

    // Iterative so pathological nesting depth cannot overflow the host stack.
    // A list child always occupies the head slot if it is first, so closing a
    // nested list leaves the parent's head taken either way.
    fn read_list(&mut self) -> Result<List, ReadError> {
        let mut current = List::default();
        let mut head_taken = false;
        let mut parents: Vec<List> = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(ReadError::UnclosedList { line: self.line }),
                Some(b'(') => {
                    self.bump();
                    parents.push(current);
                    current = List::default();
                    head_taken = false;
                }
                Some(b')') => {
                    self.bump();
                    match parents.pop() {
                        Some(mut parent) => {
                            parent.items.push(Object::List(current));
                            current = parent;
                            head_taken = true;
                        }
                        None => return Ok(current),
                    }
                }
                Some(_) => {
                    let atom = self.read_atom();
                    if head_taken {
                        current.items.push(Object::Atom(atom));
                    } else {
                        current.op = atom;
                        head_taken = true;
                    }
                }
            }
        }
    }

    fn read_atom(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() || c == b'(' || c == b')' {
                break;
            }
            self.bump();
        }
        String::from_utf8_lossy(&self.bytes[start..self.pos]).into_owned()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_ascii_whitespace() {
                break;
            }
            self.bump();
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) {
        if self.bytes.get(self.pos) == Some(&b'\n') {
            self.line += 1;
        }
        self.pos += 1;
    }
}
