//! Value classification and conversion helpers.

use std::fmt;

use crate::error::Result;
use crate::reference::JsReference;

/// Type of a JS value, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JsValueType {
    Undefined,
    Null,
    Boolean,
    Number,
    String,
    Symbol,
    Object,
    Function,
    External,
    BigInt,
}

impl JsValueType {
    pub fn of(value: v8::Local<v8::Value>) -> Self {
        if value.is_undefined() {
            JsValueType::Undefined
        } else if value.is_null() {
            JsValueType::Null
        } else if value.is_boolean() {
            JsValueType::Boolean
        } else if value.is_number() {
            JsValueType::Number
        } else if value.is_string() {
            JsValueType::String
        } else if value.is_symbol() {
            JsValueType::Symbol
        } else if value.is_big_int() {
            JsValueType::BigInt
        } else if value.is_function() {
            JsValueType::Function
        } else if value.is_external() {
            JsValueType::External
        } else {
            JsValueType::Object
        }
    }

    /// The `typeof`-style name.
    pub fn as_str(self) -> &'static str {
        match self {
            JsValueType::Undefined => "undefined",
            JsValueType::Null => "null",
            JsValueType::Boolean => "boolean",
            JsValueType::Number => "number",
            JsValueType::String => "string",
            JsValueType::Symbol => "symbol",
            JsValueType::Object => "object",
            JsValueType::Function => "function",
            JsValueType::External => "external",
            JsValueType::BigInt => "bigint",
        }
    }
}

impl fmt::Display for JsValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can produce a JS value in the current scope.
pub trait AsJsValue {
    /// The value as a handle of `scope`. `None` means the value is gone
    /// (a collected weak referent).
    fn to_local<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
    ) -> Result<Option<v8::Local<'s, v8::Value>>>;

    /// `===` comparison. A value that is gone compares as `undefined`.
    fn strict_equals(&self, scope: &mut v8::PinScope, other: &dyn AsJsValue) -> Result<bool> {
        let undefined: v8::Local<v8::Value> = v8::undefined(scope).into();
        let lhs = self.to_local(scope)?.unwrap_or(undefined);
        let rhs = other.to_local(scope)?.unwrap_or(undefined);
        Ok(lhs.strict_equals(rhs))
    }

    fn value_type(&self, scope: &mut v8::PinScope) -> Result<JsValueType> {
        Ok(self
            .to_local(scope)?
            .map(JsValueType::of)
            .unwrap_or(JsValueType::Undefined))
    }
}

impl AsJsValue for JsReference {
    fn to_local<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
    ) -> Result<Option<v8::Local<'s, v8::Value>>> {
        self.get_value(scope)
    }
}

impl AsJsValue for v8::Global<v8::Value> {
    fn to_local<'s>(
        &self,
        scope: &mut v8::PinScope<'s, '_>,
    ) -> Result<Option<v8::Local<'s, v8::Value>>> {
        Ok(Some(v8::Local::new(scope, self)))
    }
}
