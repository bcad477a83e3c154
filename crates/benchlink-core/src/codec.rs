//! Command Codec
//!
//! Builds outgoing command lines and decodes instrument replies. The codec is
//! pure: it never touches the link, so every framing rule is pinned by unit
//! tests on exact strings.
//!
//! # Command formats
//!
//! | Format | Set | Query | Used by |
//! |---|---|---|---|
//! | [`CommandFormat::Addressed`] | `0L128` | `0L?` | RGBW hub |
//! | [`CommandFormat::Postfix`] | `125 !V` | `? !V` | Bartels, openIncubate |
//!
//! # Response shapes
//!
//! - [`ResponseShape::Echoed`]: the reply starts with the command echoed back,
//!   sometimes preceded by one stray character, then the answer.
//! - [`ResponseShape::Sentinel`]: the success sentinel alone is the answer.
//! - [`ResponseShape::Bare`]: the whole line is the answer value.
//!
//! Any line starting with the family's error prefix is reported as
//! [`ProtocolError::DeviceReportedError`] regardless of shape.

use crate::error::ProtocolError;
use std::fmt;

/// Marker placed in the payload slot of a query.
pub const QUERY_FLAG: &str = "?";

/// Reply terminator used by firmware that acknowledges with `ok`.
pub const OK_SENTINEL: &str = "ok\r\n";

/// Line terminator appended to every command written to the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// `\r`
    Cr,
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
}

impl Terminator {
    /// Terminator bytes as a string slice.
    pub const fn as_str(self) -> &'static str {
        match self {
            Terminator::Cr => "\r",
            Terminator::Lf => "\n",
            Terminator::CrLf => "\r\n",
        }
    }
}

/// How a command line is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandFormat {
    /// `<target><code><payload|?>`
    Addressed,
    /// `<payload> !<code>`; sub-units are picked by a separate selection command.
    Postfix,
}

/// How the answer is carried in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Command echoed back, then the answer.
    Echoed,
    /// Success sentinel only, no payload.
    Sentinel,
    /// The line is the answer.
    Bare,
}

/// A parameter value as carried on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integer value, rendered base 10 without leading zeros
    Int(i64),
    /// Floating-point value, rendered with the codec's fixed precision
    Float(f64),
    /// Text value (enum choices, identifiers), rendered verbatim
    Text(String),
}

impl Value {
    /// Integer view of the value, if it is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to `f64`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) => None,
        }
    }

    /// Text view of the value, if it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Decoded answer payload, with echo and sentinel already stripped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answer(String);

impl Answer {
    /// Wrap a payload string.
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    /// Payload text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the reply carried no payload.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the payload as a base-10 integer.
    pub fn to_int(&self) -> Result<i64, ProtocolError> {
        self.0
            .parse::<i64>()
            .map_err(|_| ProtocolError::MalformedValue {
                payload: self.0.clone(),
                expected: "integer",
            })
    }

    /// Parse the payload as a floating-point number.
    pub fn to_float(&self) -> Result<f64, ProtocolError> {
        self.0
            .parse::<f64>()
            .map_err(|_| ProtocolError::MalformedValue {
                payload: self.0.clone(),
                expected: "float",
            })
    }
}

/// Framing and decoding rules for one instrument family.
///
/// Built once per family as a `const`:
///
/// ```rust
/// use benchlink_core::codec::{Codec, CommandFormat, ResponseShape, Terminator, Value, OK_SENTINEL};
///
/// const INCUBATOR: Codec = Codec::new(CommandFormat::Postfix, ResponseShape::Sentinel, Terminator::CrLf)
///     .with_response_end(OK_SENTINEL);
///
/// assert_eq!(INCUBATOR.encode_set(None, "S", &Value::Float(37.0)), "37.000000 !S");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    format: CommandFormat,
    shape: ResponseShape,
    terminator: Terminator,
    response_end: &'static str,
    error_prefix: Option<&'static str>,
    success_token: &'static str,
    float_precision: usize,
}

impl Codec {
    /// Codec whose replies end at the command terminator.
    pub const fn new(format: CommandFormat, shape: ResponseShape, terminator: Terminator) -> Self {
        Self {
            format,
            shape,
            terminator,
            response_end: terminator.as_str(),
            error_prefix: None,
            success_token: "ok",
            float_precision: 6,
        }
    }

    /// Replies are complete once they end with `end` (e.g. [`OK_SENTINEL`]).
    pub const fn with_response_end(mut self, end: &'static str) -> Self {
        self.response_end = end;
        self
    }

    /// Lines starting with `prefix` are device-reported errors.
    pub const fn with_error_prefix(mut self, prefix: &'static str) -> Self {
        self.error_prefix = Some(prefix);
        self
    }

    /// Number of decimals used when rendering floats.
    pub const fn with_float_precision(mut self, digits: usize) -> Self {
        self.float_precision = digits;
        self
    }

    /// Terminator appended to written commands.
    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    /// Response shape of this family.
    pub fn shape(&self) -> ResponseShape {
        self.shape
    }

    /// Byte the transport reads up to before checking for completeness.
    pub fn read_delimiter(&self) -> u8 {
        self.response_end.as_bytes().last().copied().unwrap_or(b'\n')
    }

    /// Render a value the way the instrument expects it.
    pub fn render(&self, value: &Value) -> String {
        match value {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format!("{:.*}", self.float_precision, v),
            Value::Text(s) => s.clone(),
        }
    }

    /// Build a set command. The caller has already range-checked `value`.
    pub fn encode_set(&self, target: Option<u32>, code: &str, value: &Value) -> String {
        self.frame(target, code, &self.render(value))
    }

    /// Build a query command.
    pub fn encode_query(&self, target: Option<u32>, code: &str) -> String {
        self.frame(target, code, QUERY_FLAG)
    }

    fn frame(&self, target: Option<u32>, code: &str, payload: &str) -> String {
        match (self.format, target) {
            (CommandFormat::Addressed, Some(target)) => format!("{}{}{}", target, code, payload),
            (CommandFormat::Addressed, None) => format!("{}{}", code, payload),
            (CommandFormat::Postfix, _) => format!("{} !{}", payload, code),
        }
    }

    /// True once `raw` holds a whole reply: it ends with the response end, or
    /// a complete line carries the error prefix.
    pub fn response_complete(&self, raw: &str) -> bool {
        if raw.ends_with(self.response_end) {
            return true;
        }
        self.error_prefix.is_some_and(|prefix| {
            raw.ends_with('\n') && raw.lines().any(|line| line.starts_with(prefix))
        })
    }

    /// Decode a raw reply to `sent`.
    pub fn decode(&self, raw: &str, sent: &str) -> Result<Answer, ProtocolError> {
        let raw = raw.trim_end_matches(['\r', '\n']);

        if let Some(prefix) = self.error_prefix {
            if let Some(message) = raw.lines().find_map(|line| line.strip_prefix(prefix)) {
                return Err(ProtocolError::DeviceReportedError(message.trim().to_string()));
            }
        }

        match self.shape {
            ResponseShape::Sentinel => Ok(Answer::default()),
            ResponseShape::Bare => Ok(Answer::new(raw.trim())),
            ResponseShape::Echoed => {
                let rest = strip_echo(raw, sent).ok_or_else(|| ProtocolError::UnexpectedEcho {
                    sent: sent.to_string(),
                    response: raw.to_string(),
                })?;
                Ok(Answer::new(self.strip_success(rest)))
            }
        }
    }

    fn strip_success<'a>(&self, rest: &'a str) -> &'a str {
        let rest = rest.trim();
        if rest == self.success_token {
            return "";
        }
        match rest.strip_suffix(self.success_token) {
            Some(head) if head.ends_with(char::is_whitespace) => head.trim_end(),
            _ => rest,
        }
    }
}

/// Remove the echoed command from the front of `raw`.
///
/// The echo is either at offset 0 followed by one separator, or at offset 1
/// (one stray leading character) followed by one separator.
fn strip_echo<'a>(raw: &'a str, sent: &str) -> Option<&'a str> {
    if let Some(rest) = raw.strip_prefix(sent) {
        return Some(skip_chars(rest, 1));
    }

    let mut chars = raw.chars();
    chars.next()?;
    chars
        .as_str()
        .strip_prefix(sent)
        .map(|rest| skip_chars(rest, 1))
}

fn skip_chars(s: &str, n: usize) -> &str {
    s.char_indices().nth(n).map_or("", |(idx, _)| &s[idx..])
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSTFIX_ECHO: Codec =
        Codec::new(CommandFormat::Postfix, ResponseShape::Echoed, Terminator::Cr)
            .with_response_end(OK_SENTINEL);
    const POSTFIX_SENTINEL: Codec =
        Codec::new(CommandFormat::Postfix, ResponseShape::Sentinel, Terminator::CrLf)
            .with_response_end(OK_SENTINEL);
    const ADDRESSED_BARE: Codec =
        Codec::new(CommandFormat::Addressed, ResponseShape::Bare, Terminator::Lf)
            .with_error_prefix("Err:");
    const ADDRESSED_ECHO: Codec =
        Codec::new(CommandFormat::Addressed, ResponseShape::Echoed, Terminator::Lf);

    #[test]
    fn integers_render_without_leading_zeros() {
        assert_eq!(POSTFIX_ECHO.encode_set(None, "V", &Value::Int(125)), "125 !V");
        assert_eq!(POSTFIX_ECHO.encode_set(None, "T", &Value::Int(0)), "0 !T");
        assert_eq!(POSTFIX_ECHO.encode_set(None, "P", &Value::Int(1)), "1 !P");
        assert_eq!(ADDRESSED_BARE.encode_set(Some(3), "R", &Value::Int(7)), "3R7");
    }

    #[test]
    fn floats_render_with_fixed_precision() {
        assert_eq!(
            POSTFIX_SENTINEL.encode_set(None, "S", &Value::Float(37.0)),
            "37.000000 !S"
        );
        assert_eq!(
            POSTFIX_SENTINEL.encode_set(None, "S", &Value::Float(10.25)),
            "10.250000 !S"
        );
        let two = POSTFIX_SENTINEL.with_float_precision(2);
        assert_eq!(two.encode_set(None, "S", &Value::Float(37.456)), "37.46 !S");
    }

    #[test]
    fn addressed_commands_carry_target_and_code() {
        assert_eq!(ADDRESSED_BARE.encode_query(Some(0), "L"), "0L?");
        assert_eq!(ADDRESSED_BARE.encode_query(Some(0), "N"), "0N?");
        assert_eq!(ADDRESSED_BARE.encode_set(Some(0), "L", &Value::Int(255)), "0L255");
        assert_eq!(ADDRESSED_BARE.encode_query(Some(12), "W"), "12W?");
        assert_eq!(ADDRESSED_BARE.encode_query(None, "N"), "N?");
    }

    #[test]
    fn postfix_query_puts_flag_in_payload_slot() {
        assert_eq!(POSTFIX_ECHO.encode_query(Some(2), "V"), "? !V");
    }

    #[test]
    fn terminators() {
        assert_eq!(Terminator::Cr.as_str(), "\r");
        assert_eq!(Terminator::Lf.as_str(), "\n");
        assert_eq!(Terminator::CrLf.as_str(), "\r\n");
        assert_eq!(POSTFIX_SENTINEL.terminator(), Terminator::CrLf);
    }

    #[test]
    fn echoed_value_round_trips() {
        let sent = ADDRESSED_ECHO.encode_set(Some(1), "V", &Value::Int(125));
        let reply = format!("{} 125\n", sent);
        let answer = ADDRESSED_ECHO.decode(&reply, &sent).unwrap();
        assert_eq!(answer.to_int().unwrap(), 125);
    }

    #[test]
    fn echo_tolerates_one_stray_leading_character() {
        let clean = POSTFIX_ECHO.decode("1 !P ok", "1 !P").unwrap();
        let stray = POSTFIX_ECHO.decode(" 1 !P ok", "1 !P").unwrap();
        assert_eq!(clean, stray);
        assert!(clean.is_empty());
    }

    #[test]
    fn echo_strips_multiline_sentinel_reply() {
        let answer = POSTFIX_ECHO.decode("125 !V\r\nok\r\n", "125 !V").unwrap();
        assert!(answer.is_empty());

        let answer = POSTFIX_ECHO.decode("125 !V 125 ok\r\n", "125 !V").unwrap();
        assert_eq!(answer.as_str(), "125");
    }

    #[test]
    fn echo_mismatch_is_unexpected_echo() {
        let err = POSTFIX_ECHO.decode("2 !P ok", "1 !P").unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEcho { .. }));

        // Two stray characters are not tolerated
        let err = POSTFIX_ECHO.decode("  1 !P ok", "1 !P").unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEcho { .. }));

        let err = POSTFIX_ECHO.decode("", "1 !P").unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedEcho { .. }));
    }

    #[test]
    fn success_token_only_stripped_at_word_boundary() {
        let answer = ADDRESSED_ECHO.decode("0X 1book", "0X").unwrap();
        assert_eq!(answer.as_str(), "1book");

        let answer = ADDRESSED_ECHO.decode("0X 1 ok", "0X").unwrap();
        assert_eq!(answer.as_str(), "1");
    }

    #[test]
    fn sentinel_shape_has_empty_payload() {
        let answer = POSTFIX_SENTINEL.decode("37.000000 !S\r\nok\r\n", "37.000000 !S").unwrap();
        assert!(answer.is_empty());
        assert!(POSTFIX_SENTINEL.decode("ok\r\n", "0 !R").unwrap().is_empty());
    }

    #[test]
    fn bare_shape_returns_trimmed_line() {
        let answer = ADDRESSED_BARE.decode("128\r\n", "0L128").unwrap();
        assert_eq!(answer.to_int().unwrap(), 128);
    }

    #[test]
    fn error_prefix_wins_over_any_payload() {
        for raw in ["Err: unknown channel\n", "Err:42\n", "Err:\n"] {
            let err = ADDRESSED_BARE.decode(raw, "0X?").unwrap_err();
            assert!(matches!(err, ProtocolError::DeviceReportedError(_)), "{raw}");
        }
        let err = ADDRESSED_BARE.decode("Err: unknown channel\n", "0X?").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::DeviceReportedError("unknown channel".into())
        );
    }

    #[test]
    fn malformed_numeric_payload() {
        let answer = ADDRESSED_BARE.decode("twelve\n", "0N?").unwrap();
        assert!(matches!(
            answer.to_int(),
            Err(ProtocolError::MalformedValue { expected: "integer", .. })
        ));
        assert!(matches!(
            Answer::new("1.2.3").to_float(),
            Err(ProtocolError::MalformedValue { expected: "float", .. })
        ));
        assert_eq!(Answer::new("2.5").to_float().unwrap(), 2.5);
    }

    #[test]
    fn response_completion() {
        assert!(!POSTFIX_SENTINEL.response_complete("1 !P\r\n"));
        assert!(POSTFIX_SENTINEL.response_complete("1 !P\r\nok\r\n"));
        assert!(ADDRESSED_BARE.response_complete("12\n"));
        assert!(ADDRESSED_BARE.response_complete("Err: nope\n"));
        assert_eq!(POSTFIX_SENTINEL.read_delimiter(), b'\n');
    }

    #[test]
    fn value_views() {
        assert_eq!(Value::Int(3).as_float(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_int(), None);
        assert_eq!(Value::from("Idle").as_text(), Some("Idle"));
        assert_eq!(Value::from(42i64).to_string(), "42");
    }
}
