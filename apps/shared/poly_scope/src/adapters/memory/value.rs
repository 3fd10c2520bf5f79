use std::rc::Rc;

use crate::value::{Encoding, ValueKind};

/// String storage as the memory engine keeps it: raw bytes plus their encoding
#[derive(Debug, Clone, PartialEq)]
pub struct MemString {
    bytes: Rc<[u8]>,
    encoding: Encoding,
}

impl MemString {
    pub fn new(bytes: impl Into<Rc<[u8]>>, encoding: Encoding) -> Self {
        Self {
            bytes: bytes.into(),
            encoding,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

/// Values of the memory engine
#[derive(Debug, Clone, PartialEq)]
pub enum MemValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(MemString),
    Array(Rc<Vec<MemValue>>),
}

impl MemValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            MemValue::Undefined => ValueKind::Undefined,
            MemValue::Null => ValueKind::Null,
            MemValue::Bool(_) => ValueKind::Boolean,
            MemValue::Number(_) => ValueKind::Number,
            MemValue::String(_) => ValueKind::String,
            MemValue::Array(_) => ValueKind::Array,
        }
    }
}
