//! Host-owned copies of engine strings

use std::cmp::Ordering;
use std::ffi::{CStr, c_char};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Serialize, Serializer};

use crate::context;
use crate::engine::ScriptEngine;
use crate::error::{Result, ScopeError};
use crate::locals::Local;
use crate::value::{Encoding, NativeStr, ValueKind};

/// Immutable, engine-independent copy of a native string
///
/// Built once under an active engine scope, after which it holds no
/// reference into the engine: it can outlive every scope, frame and the
/// engine itself. The text is stored as UTF-8 followed by a NUL byte so a
/// C string pointer is available without copying.
#[derive(Clone)]
pub struct StringHolder {
    // UTF-8 text plus one trailing '\0'
    buf: String,
}

impl StringHolder {
    /// Copy the string behind `local` out of `engine`
    ///
    /// # Errors
    /// - `EngineNotActive` if `engine` is not current on this thread
    /// - `TypeMismatch` if `local` is not a string (nothing is allocated)
    /// - `StaleReference` if `local` was released with its frame
    /// - `InvalidEncoding` if the engine's bytes do not decode
    pub fn new<E: ScriptEngine>(engine: &E, local: Local) -> Result<Self> {
        context::ensure_current(engine.id())?;

        let found = engine.kind_of(local)?;
        if found != ValueKind::String {
            return Err(ScopeError::TypeMismatch {
                expected: ValueKind::String,
                found,
            });
        }

        let buf = engine.copy_string(local)?;
        debug_assert!(buf.ends_with('\0'), "copy_string must append a NUL");
        Ok(Self { buf })
    }

    /// Length in UTF-8 bytes, terminator excluded
    pub fn len(&self) -> usize {
        self.buf.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_str(&self) -> &str {
        &self.buf[..self.len()]
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.as_str().as_bytes()
    }

    /// UTF-8 bytes including the trailing NUL
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    /// Pointer to NUL-terminated UTF-8, valid as long as `self`
    pub fn as_ptr(&self) -> *const c_char {
        self.buf.as_ptr().cast()
    }

    /// C string view; stops at the first interior NUL if the text has one
    pub fn as_c_str(&self) -> &CStr {
        CStr::from_bytes_until_nul(self.buf.as_bytes()).unwrap_or(c"")
    }

    /// Code points, the equivalent of a 32-bit wide string
    pub fn to_utf32(&self) -> Vec<char> {
        self.as_str().chars().collect()
    }

    pub fn to_utf16(&self) -> Vec<u16> {
        self.as_str().encode_utf16().collect()
    }

    pub fn into_string(mut self) -> String {
        self.buf.pop();
        self.buf
    }
}

/// Decode engine bytes into a NUL-terminated UTF-8 buffer
pub(crate) fn transcode(native: NativeStr<'_>) -> Result<String> {
    let bytes = native.bytes();
    let invalid = |reason: String| ScopeError::InvalidEncoding {
        encoding: native.encoding(),
        reason,
    };

    let mut buf = match native.encoding() {
        Encoding::Utf8 => {
            let text = std::str::from_utf8(bytes).map_err(|e| invalid(e.to_string()))?;
            let mut buf = String::with_capacity(text.len() + 1);
            buf.push_str(text);
            buf
        }
        Encoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
        Encoding::Utf16Le => {
            if bytes.len() % 2 != 0 {
                return Err(invalid(format!("odd byte length {}", bytes.len())));
            }
            let units = bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
            char::decode_utf16(units)
                .collect::<std::result::Result<String, _>>()
                .map_err(|e| invalid(e.to_string()))?
        }
    };

    buf.push('\0');
    Ok(buf)
}

impl PartialEq for StringHolder {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for StringHolder {}

impl PartialEq<str> for StringHolder {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for StringHolder {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl PartialOrd for StringHolder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StringHolder {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for StringHolder {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl std::borrow::Borrow<str> for StringHolder {
    fn borrow(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<str> for StringHolder {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for StringHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for StringHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StringHolder").field(&self.as_str()).finish()
    }
}

impl From<StringHolder> for String {
    fn from(holder: StringHolder) -> Self {
        holder.into_string()
    }
}

impl Serialize for StringHolder {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemValue, MemoryEngine};
    use crate::{EngineScope, ExitEngineScope, StackFrameScope};
    use std::collections::HashSet;

    #[test]
    fn test_utf8_round_trip() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();
        let frame = StackFrameScope::new(&scope).unwrap();

        let text = "héllo, wörld ✓";
        let local = MemoryEngine::new_string(&frame, text).unwrap();
        let holder = StringHolder::new(&engine, local).unwrap();

        assert_eq!(holder.len(), text.len());
        assert_eq!(holder.as_bytes(), text.as_bytes());
        assert_eq!(holder.as_bytes_with_nul().last(), Some(&0));
        assert_eq!(holder.as_c_str().to_str().unwrap(), text);
        assert_eq!(holder, text);
    }

    #[test]
    fn test_latin1_is_transcoded() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();

        let local =
            MemoryEngine::new_raw_string(&scope, &[0x63, 0x61, 0x66, 0xE9], Encoding::Latin1)
                .unwrap();
        let holder = StringHolder::new(&engine, local).unwrap();
        assert_eq!(holder.as_str(), "café");
        assert_eq!(holder.len(), 5);
        assert_eq!(holder.to_utf32(), vec!['c', 'a', 'f', 'é']);
    }

    #[test]
    fn test_utf16_round_trip() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();

        let text = "a😀b";
        let local = MemoryEngine::new_string_in(&scope, text, Encoding::Utf16Le).unwrap();
        let holder = StringHolder::new(&engine, local).unwrap();

        assert_eq!(holder.as_str(), text);
        let units: Vec<u16> = text.encode_utf16().collect();
        assert_eq!(holder.to_utf16(), units);
        assert_eq!(holder.to_utf32().len(), 3);
    }

    #[test]
    fn test_lone_surrogate_rejected() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();

        let local = MemoryEngine::new_raw_string(&scope, &[0x00, 0xD8], Encoding::Utf16Le).unwrap();
        assert!(matches!(
            StringHolder::new(&engine, local),
            Err(ScopeError::InvalidEncoding {
                encoding: Encoding::Utf16Le,
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();

        let local = MemoryEngine::new_raw_string(&scope, &[0xFF, 0xFE], Encoding::Utf8).unwrap();
        assert!(matches!(
            StringHolder::new(&engine, local),
            Err(ScopeError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn test_non_string_is_type_mismatch() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();

        let number = MemoryEngine::new_number(&scope, 42.0).unwrap();
        let before = engine.string_reads();
        assert_eq!(
            StringHolder::new(&engine, number),
            Err(ScopeError::TypeMismatch {
                expected: ValueKind::String,
                found: ValueKind::Number,
            })
        );
        // the string bytes were never requested, so nothing was copied
        assert_eq!(engine.string_reads(), before);
    }

    #[test]
    fn test_holder_outlives_engine() {
        let holder = {
            let engine = MemoryEngine::new();
            let scope = EngineScope::new(&engine).unwrap();
            let local = MemoryEngine::new_string(&scope, "survivor").unwrap();
            StringHolder::new(&engine, local).unwrap()
        };

        assert_eq!(EngineScope::<MemoryEngine>::current(), None);
        assert_eq!(holder.as_str(), "survivor");
        assert_eq!(holder.clone().into_string(), "survivor");
    }

    #[test]
    fn test_requires_active_engine() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();
        let local = MemoryEngine::new_string(&scope, "hidden").unwrap();

        let _exit = ExitEngineScope::new(&scope).unwrap();
        assert_eq!(
            StringHolder::new(&engine, local),
            Err(ScopeError::EngineNotActive(engine.id()))
        );
    }

    #[test]
    fn test_stale_local_rejected() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();
        let local = {
            let frame = StackFrameScope::new(&scope).unwrap();
            MemoryEngine::new_string(&frame, "gone").unwrap()
        };
        assert!(matches!(
            StringHolder::new(&engine, local),
            Err(ScopeError::StaleReference { .. })
        ));
        assert_eq!(engine.get(local).err(), StringHolder::new(&engine, local).err());
    }

    #[test]
    fn test_interior_nul() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();
        let local = MemoryEngine::new_string(&scope, "a\0b").unwrap();
        let holder = StringHolder::new(&engine, local).unwrap();

        assert_eq!(holder.len(), 3);
        assert_eq!(holder.as_c_str().to_bytes(), b"a");
        assert!(matches!(engine.get(local).unwrap(), MemValue::String(_)));
    }

    #[test]
    fn test_holder_traits() {
        let engine = MemoryEngine::new();
        let scope = EngineScope::new(&engine).unwrap();
        let a = StringHolder::new(&engine, MemoryEngine::new_string(&scope, "alpha").unwrap()).unwrap();
        let b = StringHolder::new(&engine, MemoryEngine::new_string(&scope, "beta").unwrap()).unwrap();
        let a2 = StringHolder::new(&engine, MemoryEngine::new_string(&scope, "alpha").unwrap()).unwrap();

        assert_eq!(a, a2);
        assert!(a < b);
        assert_eq!(format!("{}", b), "beta");
        assert_eq!(format!("{:?}", b), "StringHolder(\"beta\")");
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"alpha\"");

        let set: HashSet<StringHolder> = [a, b, a2].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains("beta"));
        assert_eq!(String::from(set.into_iter().max().unwrap()), "beta");
    }
}
