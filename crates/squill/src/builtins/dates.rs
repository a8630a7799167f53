//! Date builtins.
//!
//! Dates are unix epoch seconds with their own value kind so a timestamp
//! never compares equal to a plain integer. Format strings use the MySQL
//! specifiers `%Y %m %d %H %i %s %T`; anything else passes through
//! literally.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::{
    decl::{Decl, Kind, Registry},
    error::EvalResult,
    value::Value,
};

pub(crate) fn install(registry: &mut Registry) {
    registry.add(
        Decl::func("now", now)
            .args(0, 0)
            .result(Kind::Date)
            .doc("current time as epoch seconds"),
    );
    registry.add(
        Decl::func("date", date)
            .args(1, 1)
            .result(Kind::Date)
            .pure()
            .doc("builds a date value from epoch seconds"),
    );
    registry.add(
        Decl::func("parse_date", parse_date)
            .args(2, 2)
            .param("s", Kind::String, "date text")
            .param("format", Kind::String, "MySQL-style format")
            .result(Kind::Date)
            .pure()
            .doc("parses date text; nil when the text does not match the format"),
    );
    registry.add(
        Decl::func("format_date", format_date)
            .args(2, 2)
            .param("date", Kind::Date, "epoch seconds")
            .param("format", Kind::String, "MySQL-style format")
            .result(Kind::String)
            .pure(),
    );
}

/// Translates MySQL format specifiers into chrono's strftime dialect.
fn translate_format(format: &str) -> String {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('Y') => out.push_str("%Y"),
            Some('m') => out.push_str("%m"),
            Some('d') => out.push_str("%d"),
            Some('H') => out.push_str("%H"),
            Some('i') => out.push_str("%M"),
            Some('s') => out.push_str("%S"),
            Some('T') => out.push_str("%H:%M:%S"),
            Some('%') => out.push_str("%%"),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

fn now(_args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Date(chrono::Utc::now().timestamp()))
}

fn date(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Date(args[0].to_i64()))
}

fn parse_date(args: &[Value]) -> EvalResult<Value> {
    let text = args[0].coerce_string();
    let format = translate_format(&args[1].coerce_string());
    if let Ok(dt) = NaiveDateTime::parse_from_str(&text, &format) {
        return Ok(Value::Date(dt.and_utc().timestamp()));
    }
    // date-only formats parse without a time component; midnight applies
    if let Ok(d) = NaiveDate::parse_from_str(&text, &format) {
        let midnight = d.and_hms_opt(0, 0, 0).unwrap_or_default();
        return Ok(Value::Date(midnight.and_utc().timestamp()));
    }
    // time-only formats anchor to the epoch day
    if let Ok(t) = NaiveTime::parse_from_str(&text, &format) {
        return Ok(Value::Date(t.signed_duration_since(NaiveTime::MIN).num_seconds()));
    }
    Ok(Value::Nil)
}

fn format_date(args: &[Value]) -> EvalResult<Value> {
    if args[0].is_nil() {
        return Ok(Value::Nil);
    }
    let secs = args[0].to_i64();
    let format = translate_format(&args[1].coerce_string());
    let Some(dt) = DateTime::from_timestamp(secs, 0) else {
        return Ok(Value::Nil);
    };
    Ok(Value::string(dt.format(&format).to_string()))
}
