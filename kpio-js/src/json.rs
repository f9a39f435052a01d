//! The `JSON` object.
//!
//! Both directions work on UTF-16 code units so lone surrogates survive a
//! stringify/parse cycle unchanged.

use alloc::vec::Vec;
use hashbrown::HashSet;

use crate::api::Engine;
use crate::error::{ErrorKind, JsResult};
use crate::object::{ObjectId, ObjectKind, PropertyKey};
use crate::string::JsString;
use crate::value::{number_to_string, to_integer, Value};

/// Nesting accepted by `JSON.parse` and `JSON.stringify` before giving up.
const MAX_PARSE_DEPTH: usize = 512;

struct Serializer {
    /// Objects on the current path.
    visiting: HashSet<ObjectId>,
    depth: usize,
    gap: Vec<u16>,
    indent: Vec<u16>,
}

/// `JSON.stringify(value, replacer, space)`; replacers are ignored.
pub(crate) fn stringify(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let value = args.first().cloned().unwrap_or_default();
    let gap = match args.get(2) {
        Some(Value::Number(n)) => {
            let width = to_integer(*n).clamp(0.0, 10.0) as usize;
            alloc::vec![b' ' as u16; width]
        }
        Some(Value::String(s)) => s.units().into_iter().take(10).collect(),
        _ => Vec::new(),
    };
    let mut serializer = Serializer {
        visiting: HashSet::new(),
        depth: 0,
        gap,
        indent: Vec::new(),
    };
    let mut out = Vec::new();
    let key = JsString::empty();
    if serializer.value(engine, &key, value, &mut out)? {
        Ok(Value::String(JsString::from_units(&out)))
    } else {
        Ok(Value::Undefined)
    }
}

impl Serializer {
    /// Append the serialization of `value`; `false` when it has none.
    fn value(&mut self, engine: &mut Engine, key: &JsString, mut value: Value, out: &mut Vec<u16>) -> JsResult<bool> {
        if let Value::Object(_) = value {
            let to_json = engine.get_named(&value, "toJSON")?;
            if engine.is_callable_value(&to_json) {
                value = engine.call(&to_json, value, alloc::vec![Value::String(key.clone())])?;
            }
        }
        if let Value::Object(id) = value {
            let primitive = match &engine.obj(id)?.kind {
                ObjectKind::Number(n) => Some(Value::Number(*n)),
                ObjectKind::String(s) => Some(Value::String(s.clone())),
                ObjectKind::Boolean(b) => Some(Value::Boolean(*b)),
                _ => None,
            };
            if let Some(primitive) = primitive {
                value = primitive;
            }
        }
        let callable = engine.is_callable_value(&value);
        match &value {
            Value::Null => push_ascii(out, "null"),
            Value::Boolean(b) => push_ascii(out, if *b { "true" } else { "false" }),
            Value::Number(n) if n.is_finite() => push_ascii(out, &number_to_string(*n)),
            Value::Number(_) => push_ascii(out, "null"),
            Value::String(s) => quote(s, out),
            Value::Object(id) if !callable => {
                let id = *id;
                if !self.visiting.insert(id) {
                    return Err(engine.throw_error(ErrorKind::Type, "cannot stringify cyclic structure"));
                }
                if self.depth >= MAX_PARSE_DEPTH {
                    self.visiting.remove(&id);
                    return Err(engine.throw_error(ErrorKind::Range, "json nesting too deep"));
                }
                self.depth += 1;
                let result = if engine.obj(id)?.is_array() {
                    self.array(engine, &value, out)
                } else {
                    self.object(engine, id, &value, out)
                };
                self.depth -= 1;
                self.visiting.remove(&id);
                result?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn array(&mut self, engine: &mut Engine, value: &Value, out: &mut Vec<u16>) -> JsResult<()> {
        let length = match engine.get_named(value, "length")? {
            Value::Number(n) => n as u32,
            _ => 0,
        };
        if length == 0 {
            push_ascii(out, "[]");
            return Ok(());
        }
        let outer = self.indent.clone();
        self.indent.extend_from_slice(&self.gap.clone());
        out.push(b'[' as u16);
        for i in 0..length {
            if i > 0 {
                out.push(b',' as u16);
            }
            self.newline(out);
            let element = engine.get(value, &PropertyKey::Index(i))?;
            let key = JsString::new(&number_to_string(i as f64));
            if !self.value(engine, &key, element, out)? {
                push_ascii(out, "null");
            }
        }
        self.indent = outer;
        self.newline(out);
        out.push(b']' as u16);
        Ok(())
    }

    fn object(&mut self, engine: &mut Engine, id: ObjectId, value: &Value, out: &mut Vec<u16>) -> JsResult<()> {
        let keys = engine.obj(id)?.own_keys(false, false);
        let outer = self.indent.clone();
        self.indent.extend_from_slice(&self.gap.clone());
        out.push(b'{' as u16);
        let mut first = true;
        for key in keys {
            let member = engine.get(value, &key)?;
            let name = key.to_js_string();
            let mark = out.len();
            if !first {
                out.push(b',' as u16);
            }
            self.newline(out);
            quote(&name, out);
            out.push(b':' as u16);
            if !self.gap.is_empty() {
                out.push(b' ' as u16);
            }
            if self.value(engine, &name, member, out)? {
                first = false;
            } else {
                out.truncate(mark);
            }
        }
        self.indent = outer;
        if !first {
            self.newline(out);
        }
        out.push(b'}' as u16);
        Ok(())
    }

    fn newline(&self, out: &mut Vec<u16>) {
        if !self.gap.is_empty() {
            out.push(b'\n' as u16);
            out.extend_from_slice(&self.indent);
        }
    }
}

fn push_ascii(out: &mut Vec<u16>, s: &str) {
    out.extend(s.bytes().map(u16::from));
}

fn quote(s: &JsString, out: &mut Vec<u16>) {
    out.push(b'"' as u16);
    for unit in s.units() {
        match unit {
            0x22 => push_ascii(out, "\\\""),
            0x5C => push_ascii(out, "\\\\"),
            0x08 => push_ascii(out, "\\b"),
            0x0C => push_ascii(out, "\\f"),
            0x0A => push_ascii(out, "\\n"),
            0x0D => push_ascii(out, "\\r"),
            0x09 => push_ascii(out, "\\t"),
            u if u < 0x20 => push_ascii(out, &alloc::format!("\\u{:04x}", u)),
            u => out.push(u),
        }
    }
    out.push(b'"' as u16);
}

/// `JSON.parse(text)`; revivers are ignored.
pub(crate) fn parse(engine: &mut Engine, _this: &Value, args: &[Value]) -> JsResult<Value> {
    let text = engine.to_js_string(&args.first().cloned().unwrap_or_default())?;
    let mut parser = Parser {
        units: text.units(),
        pos: 0,
        depth: 0,
    };
    parser.skip_whitespace();
    let value = parser.value(engine)?;
    parser.skip_whitespace();
    if parser.pos != parser.units.len() {
        return Err(parser.error(engine));
    }
    Ok(value)
}

struct Parser {
    units: Vec<u16>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn error(&self, engine: &mut Engine) -> crate::error::Fault {
        engine.throw_error(
            ErrorKind::Syntax,
            &alloc::format!("invalid json (offset {})", self.pos),
        )
    }

    fn peek(&self) -> Option<u16> {
        self.units.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(0x20 | 0x09 | 0x0A | 0x0D)) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, engine: &mut Engine, unit: u8) -> JsResult<()> {
        if self.peek() == Some(unit as u16) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(engine))
        }
    }

    fn literal(&mut self, engine: &mut Engine, word: &str, value: Value) -> JsResult<Value> {
        for b in word.bytes() {
            self.expect(engine, b)?;
        }
        Ok(value)
    }

    fn value(&mut self, engine: &mut Engine) -> JsResult<Value> {
        match self.peek().filter(|u| *u < 0x80).map(|u| u as u8 as char) {
            Some('{') | Some('[') => {
                self.depth += 1;
                if self.depth > MAX_PARSE_DEPTH {
                    return Err(engine.throw_error(ErrorKind::Range, "json nesting too deep"));
                }
                let result = if self.peek() == Some(b'{' as u16) {
                    self.object(engine)
                } else {
                    self.array(engine)
                };
                self.depth -= 1;
                result
            }
            Some('"') => Ok(Value::String(self.string(engine)?)),
            Some('t') => self.literal(engine, "true", Value::Boolean(true)),
            Some('f') => self.literal(engine, "false", Value::Boolean(false)),
            Some('n') => self.literal(engine, "null", Value::Null),
            Some('-' | '0'..='9') => self.number(engine),
            _ => Err(self.error(engine)),
        }
    }

    fn object(&mut self, engine: &mut Engine) -> JsResult<Value> {
        self.pos += 1;
        let id = engine.new_object()?;
        self.skip_whitespace();
        if self.peek() == Some(b'}' as u16) {
            self.pos += 1;
            return Ok(Value::Object(id));
        }
        loop {
            self.skip_whitespace();
            if self.peek() != Some(b'"' as u16) {
                return Err(self.error(engine));
            }
            let key = self.string(engine)?;
            self.skip_whitespace();
            self.expect(engine, b':')?;
            self.skip_whitespace();
            let member = self.value(engine)?;
            engine.put(&Value::Object(id), PropertyKey::from_string(key), member)?;
            self.skip_whitespace();
            match self.peek() {
                Some(0x2C) => self.pos += 1,
                Some(0x7D) => {
                    self.pos += 1;
                    return Ok(Value::Object(id));
                }
                _ => return Err(self.error(engine)),
            }
        }
    }

    fn array(&mut self, engine: &mut Engine) -> JsResult<Value> {
        self.pos += 1;
        let mut elements = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(b']' as u16) {
            self.pos += 1;
            return Ok(Value::Object(engine.new_array(elements)?));
        }
        loop {
            self.skip_whitespace();
            elements.push(self.value(engine)?);
            self.skip_whitespace();
            match self.peek() {
                Some(0x2C) => self.pos += 1,
                Some(0x5D) => {
                    self.pos += 1;
                    return Ok(Value::Object(engine.new_array(elements)?));
                }
                _ => return Err(self.error(engine)),
            }
        }
    }

    fn string(&mut self, engine: &mut Engine) -> JsResult<JsString> {
        self.pos += 1;
        let mut out = Vec::new();
        loop {
            let Some(unit) = self.peek() else {
                return Err(self.error(engine));
            };
            self.pos += 1;
            match unit {
                0x22 => return Ok(JsString::from_units(&out)),
                0x5C => {
                    let Some(escape) = self.peek() else {
                        return Err(self.error(engine));
                    };
                    self.pos += 1;
                    if escape >= 0x80 {
                        return Err(self.error(engine));
                    }
                    let decoded = match escape as u8 {
                        b'"' => 0x22,
                        b'\\' => 0x5C,
                        b'/' => 0x2F,
                        b'b' => 0x08,
                        b'f' => 0x0C,
                        b'n' => 0x0A,
                        b'r' => 0x0D,
                        b't' => 0x09,
                        b'u' => self.hex_unit(engine)?,
                        _ => return Err(self.error(engine)),
                    };
                    out.push(decoded);
                }
                u if u < 0x20 => return Err(self.error(engine)),
                u => out.push(u),
            }
        }
    }

    fn hex_unit(&mut self, engine: &mut Engine) -> JsResult<u16> {
        let mut unit: u16 = 0;
        for _ in 0..4 {
            let digit = self
                .peek()
                .and_then(|u| char::from_u32(u as u32))
                .and_then(|c| c.to_digit(16));
            let Some(digit) = digit else {
                return Err(self.error(engine));
            };
            unit = unit * 16 + digit as u16;
            self.pos += 1;
        }
        Ok(unit)
    }

    fn number(&mut self, engine: &mut Engine) -> JsResult<Value> {
        let start = self.pos;
        let is_digit = |u: Option<u16>| matches!(u, Some(0x30..=0x39));
        if self.peek() == Some(b'-' as u16) {
            self.pos += 1;
        }
        match self.peek() {
            Some(0x30) => self.pos += 1,
            u if is_digit(u) => {
                while is_digit(self.peek()) {
                    self.pos += 1;
                }
            }
            _ => return Err(self.error(engine)),
        }
        if self.peek() == Some(b'.' as u16) {
            self.pos += 1;
            if !is_digit(self.peek()) {
                return Err(self.error(engine));
            }
            while is_digit(self.peek()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(0x65 | 0x45)) {
            self.pos += 1;
            if matches!(self.peek(), Some(0x2B | 0x2D)) {
                self.pos += 1;
            }
            if !is_digit(self.peek()) {
                return Err(self.error(engine));
            }
            while is_digit(self.peek()) {
                self.pos += 1;
            }
        }
        let text: alloc::string::String = self.units[start..self.pos]
            .iter()
            .map(|u| *u as u8 as char)
            .collect();
        Ok(Value::Number(text.parse::<f64>().unwrap_or(f64::NAN)))
    }
}

#[cfg(test)]
mod tests {
    use crate::api::{CompileFlags, Engine};
    use alloc::string::String;

    fn run(source: &str) -> (bool, String) {
        let mut engine = Engine::new();
        engine.push_string(source);
        engine.push_string("json.js");
        engine.compile(CompileFlags::EVAL).unwrap();
        let ok = engine.pcall(0).is_ok();
        (ok, engine.safe_to_string(-1))
    }

    #[test]
    fn test_stringify_compact() {
        let (ok, text) = run("JSON.stringify({a: 1, b: [true, null, 'x'], c: undefined, d: function () {}})");
        assert!(ok);
        assert_eq!(text, r#"{"a":1,"b":[true,null,"x"]}"#);
    }

    #[test]
    fn test_stringify_indented() {
        let (ok, text) = run("JSON.stringify({a: [1], b: {}}, null, 2)");
        assert!(ok);
        assert_eq!(text, "{\n  \"a\": [\n    1\n  ],\n  \"b\": {}\n}");
    }

    #[test]
    fn test_stringify_escapes_and_non_finite() {
        let (ok, text) = run(r#"JSON.stringify(["q\"\n", NaN, 1/0])"#);
        assert!(ok);
        assert_eq!(text, r#"["q\"\n",null,null]"#);
    }

    #[test]
    fn test_stringify_to_json_and_cycles() {
        let (ok, text) = run("JSON.stringify({when: {toJSON: function (k) { return 'at ' + k }}})");
        assert!(ok);
        assert_eq!(text, r#"{"when":"at when"}"#);

        let (ok, text) = run("var o = {}; o.self = o; JSON.stringify(o)");
        assert!(!ok);
        assert!(text.starts_with("TypeError"), "{}", text);
    }

    #[test]
    fn test_stringify_depth_limit() {
        let (ok, text) = run("var a = []; for (var i = 0; i < 300; i++) a = [a]; JSON.stringify(a).length");
        assert!(ok);
        assert_eq!(text, "602");

        let (ok, text) = run("var a = []; for (var i = 0; i < 1000; i++) a = [a]; JSON.stringify(a)");
        assert!(!ok);
        assert_eq!(text, "RangeError: json nesting too deep");

        let (ok, text) = run("var o = {}; for (var i = 0; i < 1000; i++) o = {o: o}; var r; try { JSON.stringify(o) } catch (e) { r = e.name } r");
        assert!(ok);
        assert_eq!(text, "RangeError");
    }

    #[test]
    fn test_parse() {
        let (ok, text) = run(r#"var v = JSON.parse(' {"a": [1, 2.5e1, "A"], "b": {"c": null}} '); v.a[1] + v.a[2] + v.b.c"#);
        assert!(ok);
        assert_eq!(text, "25Anull");
    }

    #[test]
    fn test_parse_rejects_invalid_input() {
        for source in ["JSON.parse('{a: 1}')", "JSON.parse('[1,]')", "JSON.parse('01')", "JSON.parse('')"] {
            let (ok, text) = run(source);
            assert!(!ok, "{} parsed", source);
            assert!(text.starts_with("SyntaxError"), "{}", text);
        }
    }
}
