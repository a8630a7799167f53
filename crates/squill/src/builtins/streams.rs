//! Stream builtins.
//!
//! Streams are opaque reader handles. Wrapping a stream (`gzip`, `zcat`,
//! `xz`, `xzcat`) consumes the source handle: the inner reader moves into
//! the wrapper and the old handle becomes exhausted. Binary data follows the
//! one-char-per-byte string convention.

use std::io::{Cursor, Read};

use flate2::{Compression, read::GzDecoder, read::GzEncoder};
use liblzma::read::{XzDecoder, XzEncoder};

use crate::{
    decl::{Decl, Kind, Registry},
    error::{EvalError, EvalResult},
    value::{OpaqueValue, Value},
};

use super::strings::{binary_bytes, binary_string};

/// Opaque tag for reader handles. Interpreter-internal tags stay below 100;
/// host-defined custom types start there.
pub(crate) const STREAM_TAG: u32 = 3;

/// The boxed reader inside a stream handle; `None` once the handle has been
/// consumed by a wrapping stream.
pub(crate) struct StreamHandle(pub Option<Box<dyn Read>>);

pub(crate) fn install(registry: &mut Registry) {
    registry.add(
        Decl::func("streamString", stream_string)
            .args(1, 1)
            .result(Kind::Stream)
            .doc("a reader over the bytes of a string"),
    );
    registry.add(
        Decl::func("gzip", gzip)
            .args(1, 1)
            .param("stream", Kind::Stream, "source reader, consumed")
            .result(Kind::Stream)
            .doc("a reader producing the gzip compression of the source"),
    );
    registry.add(
        Decl::func("zcat", zcat)
            .args(1, 1)
            .param("stream", Kind::Stream, "source reader, consumed")
            .result(Kind::Stream)
            .doc("a reader producing the gzip decompression of the source"),
    );
    registry.add(
        Decl::func("xz", xz)
            .args(1, 1)
            .param("stream", Kind::Stream, "source reader, consumed")
            .result(Kind::Stream)
            .doc("a reader producing the xz compression of the source"),
    );
    registry.add(
        Decl::func("xzcat", xzcat)
            .args(1, 1)
            .param("stream", Kind::Stream, "source reader, consumed")
            .result(Kind::Stream)
            .doc("a reader producing the xz decompression of the source"),
    );
    registry.add(
        Decl::func("streamToString", stream_to_string)
            .args(1, 1)
            .param("stream", Kind::Stream, "source reader, drained")
            .result(Kind::String)
            .doc("drains a reader into a binary string"),
    );
}

fn wrap(reader: impl Read + 'static) -> Value {
    Value::Opaque(OpaqueValue::new(STREAM_TAG, "stream", StreamHandle(Some(Box::new(reader)))))
}

/// Moves the reader out of a stream handle, leaving it exhausted.
fn take_reader(v: &Value) -> EvalResult<Box<dyn Read>> {
    let Value::Opaque(opaque) = v.peel_source() else {
        return Err(EvalError::type_mismatch(format!(
            "expected a stream, got {}",
            v.tag()
        )));
    };
    if opaque.tag != STREAM_TAG {
        return Err(EvalError::type_mismatch(format!("expected a stream, got {}", opaque.name)));
    }
    let mut data = opaque.data.borrow_mut();
    let handle = data
        .downcast_mut::<StreamHandle>()
        .ok_or_else(|| EvalError::internal("stream handle with foreign payload"))?;
    handle
        .0
        .take()
        .ok_or_else(|| EvalError::type_mismatch("stream handle already consumed"))
}

fn stream_string(args: &[Value]) -> EvalResult<Value> {
    let bytes = binary_bytes(&args[0].coerce_string());
    Ok(wrap(Cursor::new(bytes)))
}

fn gzip(args: &[Value]) -> EvalResult<Value> {
    let source = take_reader(&args[0])?;
    Ok(wrap(GzEncoder::new(source, Compression::default())))
}

fn zcat(args: &[Value]) -> EvalResult<Value> {
    let source = take_reader(&args[0])?;
    Ok(wrap(GzDecoder::new(source)))
}

fn xz(args: &[Value]) -> EvalResult<Value> {
    let source = take_reader(&args[0])?;
    Ok(wrap(XzEncoder::new(source, 6)))
}

fn xzcat(args: &[Value]) -> EvalResult<Value> {
    let source = take_reader(&args[0])?;
    Ok(wrap(XzDecoder::new(source)))
}

fn stream_to_string(args: &[Value]) -> EvalResult<Value> {
    let mut reader = take_reader(&args[0])?;
    let mut bytes = Vec::new();
    reader
        .read_to_end(&mut bytes)
        .map_err(|e| EvalError::type_mismatch(format!("stream read failed: {e}")))?;
    Ok(Value::string(binary_string(&bytes)))
}
