//! Engine values.
//!
//! Values are small and cheap to clone: objects are arena handles, strings
//! and buffers are reference counted.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use libm::{fabs, floor, fmod, trunc};

use crate::object::ObjectId;
use crate::string::JsString;

/// Shared byte buffer.
pub type BufferRef = Rc<RefCell<Vec<u8>>>;

/// An engine value.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(JsString),
    Object(ObjectId),
    /// Fixed-size byte buffer.
    Buffer(BufferRef),
    /// Opaque host pointer, never dereferenced by the engine.
    Pointer(usize),
}

/// Type tag reported by the stack API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value at the given index.
    None,
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Object,
    Buffer,
    Pointer,
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(JsString::new(s))
    }

    pub fn type_tag(&self) -> Type {
        match self {
            Value::Undefined => Type::Undefined,
            Value::Null => Type::Null,
            Value::Boolean(_) => Type::Boolean,
            Value::Number(_) => Type::Number,
            Value::String(_) => Type::String,
            Value::Object(_) => Type::Object,
            Value::Buffer(_) => Type::Buffer,
            Value::Pointer(_) => Type::Pointer,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<ObjectId> {
        match self {
            Value::Object(id) => Some(*id),
            _ => None,
        }
    }

    /// ToBoolean.
    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Number(n) => !(n.is_nan() || *n == 0.0),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Buffer(_) => true,
            Value::Pointer(p) => *p != 0,
        }
    }

    /// ToNumber for primitives. Objects must be converted to a primitive first.
    pub fn primitive_to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(&s.to_rust_string()),
            Value::Object(_) | Value::Buffer(_) | Value::Pointer(_) => f64::NAN,
        }
    }

    /// Strict equality (`===`).
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Buffer(a), Value::Buffer(b)) => Rc::ptr_eq(a, b),
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            _ => false,
        }
    }

    /// SameValue for number-free cases; used by indexOf and friends.
    pub fn same_value_zero(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Undefined
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<JsString> for Value {
    fn from(s: JsString) -> Self {
        Value::String(s)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::Object(id)
    }
}

/// ToNumber on a string.
pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return parse_radix_digits(hex, 16).unwrap_or(f64::NAN);
    }
    if !s
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

/// Parse a run of digits in the given radix; `None` when empty or invalid.
pub fn parse_radix_digits(digits: &str, radix: u32) -> Option<f64> {
    if digits.is_empty() {
        return None;
    }
    let mut result = 0.0;
    for c in digits.chars() {
        let digit = c.to_digit(radix)?;
        result = result * radix as f64 + digit as f64;
    }
    Some(result)
}

/// Number to string conversion.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".into() } else { "-Infinity".into() };
    }
    if n == 0.0 {
        return "0".into();
    }
    let abs = fabs(n);
    if trunc(n) == n && abs < 1e21 {
        return alloc::format!("{}", n);
    }
    if abs >= 1e21 || abs < 1e-6 {
        // "1.5e21" -> "1.5e+21"
        let s = alloc::format!("{:e}", n);
        return match s.find('e') {
            Some(pos) if !s[pos + 1..].starts_with('-') => {
                alloc::format!("{}e+{}", &s[..pos], &s[pos + 1..])
            }
            _ => s,
        };
    }
    alloc::format!("{}", n)
}

/// Integer formatting in an arbitrary radix (2..=36).
pub fn number_to_radix_string(n: f64, radix: u32) -> String {
    if radix == 10 || n.is_nan() || n.is_infinite() {
        return number_to_string(n);
    }
    let negative = n < 0.0;
    let mut int = floor(fabs(n));
    let mut frac = fabs(n) - int;
    let mut digits = Vec::new();
    if int == 0.0 {
        digits.push(b'0');
    }
    while int >= 1.0 {
        let d = fmod(int, radix as f64) as u32;
        digits.push(digit_char(d));
        int = floor(int / radix as f64);
    }
    if negative {
        digits.push(b'-');
    }
    digits.reverse();
    if frac > 0.0 {
        digits.push(b'.');
        let mut count = 0;
        while frac > 0.0 && count < 20 {
            frac *= radix as f64;
            let d = floor(frac) as u32;
            digits.push(digit_char(d));
            frac -= d as f64;
            count += 1;
        }
    }
    String::from_utf8(digits).unwrap_or_default()
}

fn digit_char(d: u32) -> u8 {
    if d < 10 {
        b'0' + d as u8
    } else {
        b'a' + (d - 10) as u8
    }
}

/// ToInt32.
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// ToUint32.
pub fn to_uint32(n: f64) -> u32 {
    if n.is_nan() || n.is_infinite() {
        return 0;
    }
    let int = trunc(n);
    let modulo = fmod(int, 4294967296.0);
    let positive = if modulo < 0.0 { modulo + 4294967296.0 } else { modulo };
    positive as u32
}

/// ToInteger.
pub fn to_integer(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else {
        trunc(n)
    }
}
