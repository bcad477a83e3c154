//! Device Parameter Model
//!
//! Each device declares its parameters as a `const` table of [`ParamSpec`]s.
//! A spec says what kind of value the parameter holds, how a write reaches
//! the instrument ([`Write`]) and whether a read asks the instrument
//! ([`Read`]). [`ParameterTable`] owns the cached values and runs the
//! generic get/set logic against a [`CommandExecutor`].
//!
//! # Cache rules
//!
//! - A read of a [`Read::Query`] parameter issues a query and refreshes the
//!   cache; every other read returns the cache.
//! - A write validates first, then talks to the instrument, then updates the
//!   cache. If any round trip fails the cache is untouched, so the visible
//!   value stays exactly what it was before the attempt.
//! - When the instrument replies to a write with a value, that value is what
//!   gets cached.
//!
//! Cached values live in `tokio::sync::watch` channels; [`ParameterTable::subscribe`]
//! hands out receivers that see every change.
//!
//! # Example
//!
//! ```rust
//! use benchlink_core::parameter::ParamSpec;
//!
//! const VOLTAGE: ParamSpec = ParamSpec::integer("Pump 1 voltage [V]", 0, 250, 250)
//!     .command("V")
//!     .selecting("P", 1);
//! ```

use crate::codec::{Answer, Value};
use crate::error::{ExecError, ParameterError, ProtocolError};
use crate::executor::CommandExecutor;
use crate::settle::SettleTimer;
use tokio::sync::watch;

/// Value domain of a parameter, with its initial value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamKind {
    /// Bounded integer
    Integer {
        /// Inclusive lower bound
        min: i64,
        /// Inclusive upper bound
        max: i64,
        /// Value before the first write
        default: i64,
    },
    /// Bounded float
    Float {
        /// Inclusive lower bound
        min: f64,
        /// Inclusive upper bound
        max: f64,
        /// Value before the first write
        default: f64,
    },
    /// One of a fixed set of labels
    Choice {
        /// Allowed labels
        allowed: &'static [&'static str],
        /// Label before the first write
        default: &'static str,
    },
    /// Fixed text such as a device name
    Text {
        /// The text
        value: &'static str,
    },
}

impl ParamKind {
    /// Value a fresh table starts with.
    pub fn initial(&self) -> Value {
        match *self {
            ParamKind::Integer { default, .. } => Value::Int(default),
            ParamKind::Float { default, .. } => Value::Float(default),
            ParamKind::Choice { default, .. } => Value::Text(default.to_string()),
            ParamKind::Text { value } => Value::Text(value.to_string()),
        }
    }

    /// Human-readable constraint, used in error messages and listings.
    pub fn describe(&self) -> String {
        match self {
            ParamKind::Integer { min, max, .. } => format!("integer in [{}, {}]", min, max),
            ParamKind::Float { min, max, .. } => format!("float in [{}, {}]", min, max),
            ParamKind::Choice { allowed, .. } => format!("one of {}", allowed.join(" | ")),
            ParamKind::Text { .. } => "text".to_string(),
        }
    }

    /// Check `value` against the domain, coercing between numeric variants.
    pub fn validate(&self, name: &str, value: Value) -> Result<Value, ParameterError> {
        let reject = |value: &Value| ParameterError::OutOfRange {
            name: name.to_string(),
            value: value.to_string(),
            allowed: self.describe(),
        };

        match (*self, &value) {
            (ParamKind::Integer { min, max, .. }, Value::Int(v)) if (min..=max).contains(v) => {
                Ok(value)
            }
            (ParamKind::Integer { min, max, .. }, Value::Float(v))
                if v.fract() == 0.0 && (min as f64..=max as f64).contains(v) =>
            {
                Ok(Value::Int(*v as i64))
            }
            (ParamKind::Float { min, max, .. }, _) => match value.as_float() {
                Some(v) if (min..=max).contains(&v) => Ok(Value::Float(v)),
                _ => Err(reject(&value)),
            },
            (ParamKind::Choice { allowed, .. }, Value::Text(s)) if allowed.contains(&s.as_str()) => {
                Ok(value)
            }
            _ => Err(reject(&value)),
        }
    }

    /// Interpret an instrument reply as a value of this kind.
    pub fn parse_answer(&self, answer: &Answer) -> Result<Value, ProtocolError> {
        match self {
            ParamKind::Integer { .. } => answer.to_int().map(Value::Int),
            ParamKind::Float { .. } => answer.to_float().map(Value::Float),
            ParamKind::Choice { allowed, .. } => {
                if allowed.contains(&answer.as_str()) {
                    Ok(Value::Text(answer.as_str().to_string()))
                } else {
                    Err(ProtocolError::MalformedValue {
                        payload: answer.as_str().to_string(),
                        expected: "choice",
                    })
                }
            }
            ParamKind::Text { .. } => Ok(Value::Text(answer.as_str().to_string())),
        }
    }

    /// Parse user input (CLI, config) into a value of this kind.
    pub fn parse_input(&self, name: &str, text: &str) -> Result<Value, ParameterError> {
        let parsed = match self {
            ParamKind::Integer { .. } => text.trim().parse::<i64>().ok().map(Value::Int),
            ParamKind::Float { .. } => text.trim().parse::<f64>().ok().map(Value::Float),
            ParamKind::Choice { .. } | ParamKind::Text { .. } => Some(Value::Text(text.to_string())),
        };
        parsed.ok_or_else(|| ParameterError::OutOfRange {
            name: name.to_string(),
            value: text.to_string(),
            allowed: self.describe(),
        })
    }
}

/// Selection command sent before a value command, e.g. `1 !P` before `125 !V`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Select {
    /// Selection code
    pub code: &'static str,
    /// Selected sub-unit
    pub value: i64,
}

/// How a write reaches the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Write {
    /// Writes are rejected with [`ParameterError::Immutable`].
    ReadOnly,
    /// Host-side value, no traffic.
    Local,
    /// Optional selection, then `encode_set(target, code, value)`.
    Command {
        /// Value code
        code: &'static str,
        /// Selection sent first, if any
        select: Option<Select>,
        /// Send floats as truncated integers
        truncate: bool,
    },
    /// Each choice maps to literal lines; the visible value then returns to `rest`.
    Action {
        /// `(choice, lines)` pairs
        sequences: &'static [(&'static str, &'static [&'static str])],
        /// Choice shown after the action ran
        rest: &'static str,
    },
    /// `line` flips the instrument between two modes; sent only on a change.
    Toggle {
        /// Literal toggle command
        line: &'static str,
    },
}

/// How a read is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Read {
    /// Return the cache.
    Cached,
    /// Query the instrument with `encode_query(target, code)`.
    Query {
        /// Query code
        code: &'static str,
    },
}

/// Declarative description of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    /// Parameter name as shown to the host
    pub name: &'static str,
    /// Value domain
    pub kind: ParamKind,
    /// Sub-unit address for addressed command formats
    pub target: Option<u32>,
    /// Write path
    pub write: Write,
    /// Read path
    pub read: Read,
}

impl ParamSpec {
    const fn with_kind(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            target: None,
            write: Write::Local,
            read: Read::Cached,
        }
    }

    /// Integer parameter in `[min, max]`, host-local until bound.
    pub const fn integer(name: &'static str, min: i64, max: i64, default: i64) -> Self {
        Self::with_kind(name, ParamKind::Integer { min, max, default })
    }

    /// Float parameter in `[min, max]`, host-local until bound.
    pub const fn float(name: &'static str, min: f64, max: f64, default: f64) -> Self {
        Self::with_kind(name, ParamKind::Float { min, max, default })
    }

    /// Choice parameter, host-local until bound.
    pub const fn choice(
        name: &'static str,
        allowed: &'static [&'static str],
        default: &'static str,
    ) -> Self {
        Self::with_kind(name, ParamKind::Choice { allowed, default })
    }

    /// Read-only fixed text.
    pub const fn text(name: &'static str, value: &'static str) -> Self {
        Self::with_kind(name, ParamKind::Text { value }).read_only()
    }

    /// Address the parameter at `target`.
    pub const fn at(mut self, target: u32) -> Self {
        self.target = Some(target);
        self
    }

    /// Writes send `code` with the value.
    pub const fn command(mut self, code: &'static str) -> Self {
        self.write = Write::Command {
            code,
            select: None,
            truncate: false,
        };
        self
    }

    /// Send `code` with `value` before the value command. Requires [`command`](Self::command).
    pub const fn selecting(mut self, code: &'static str, value: i64) -> Self {
        if let Write::Command { code: cmd, truncate, .. } = self.write {
            self.write = Write::Command {
                code: cmd,
                select: Some(Select { code, value }),
                truncate,
            };
        }
        self
    }

    /// Send floats truncated to integers. Requires [`command`](Self::command).
    pub const fn truncated(mut self) -> Self {
        if let Write::Command { code, select, .. } = self.write {
            self.write = Write::Command {
                code,
                select,
                truncate: true,
            };
        }
        self
    }

    /// Writes run a literal command sequence per choice.
    pub const fn action(
        mut self,
        sequences: &'static [(&'static str, &'static [&'static str])],
        rest: &'static str,
    ) -> Self {
        self.write = Write::Action { sequences, rest };
        self
    }

    /// Writes send `line` when the choice changes.
    pub const fn toggle(mut self, line: &'static str) -> Self {
        self.write = Write::Toggle { line };
        self
    }

    /// Reads query the instrument with `code`.
    pub const fn queried(mut self, code: &'static str) -> Self {
        self.read = Read::Query { code };
        self
    }

    /// Reject writes.
    pub const fn read_only(mut self) -> Self {
        self.write = Write::ReadOnly;
        self
    }

    /// True if reads go to the instrument.
    pub fn is_hardware_authoritative(&self) -> bool {
        matches!(self.read, Read::Query { .. })
    }

    /// True if writes are rejected.
    pub fn is_read_only(&self) -> bool {
        matches!(self.write, Write::ReadOnly)
    }
}

struct Entry {
    spec: ParamSpec,
    value: watch::Sender<Value>,
}

/// Cached parameter values for one device (or one hub child).
pub struct ParameterTable {
    entries: Vec<Entry>,
}

impl ParameterTable {
    /// Table seeded with each spec's initial value.
    pub fn new(specs: impl IntoIterator<Item = ParamSpec>) -> Self {
        let entries = specs
            .into_iter()
            .map(|spec| Entry {
                value: watch::Sender::new(spec.kind.initial()),
                spec,
            })
            .collect();
        Self { entries }
    }

    /// Parameter names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|e| e.spec.name)
    }

    /// Spec for `name`.
    pub fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.entry(name).ok().map(|e| &e.spec)
    }

    /// Cached value, without touching hardware.
    pub fn cached(&self, name: &str) -> Option<Value> {
        self.entry(name).ok().map(|e| e.value.borrow().clone())
    }

    /// Receiver notified whenever `name`'s cached value changes.
    pub fn subscribe(&self, name: &str) -> Option<watch::Receiver<Value>> {
        self.entry(name).ok().map(|e| e.value.subscribe())
    }

    fn entry(&self, name: &str) -> Result<&Entry, ParameterError> {
        self.entries
            .iter()
            .find(|e| e.spec.name == name)
            .ok_or_else(|| ParameterError::Unknown(name.to_string()))
    }

    /// Read `name`, querying the instrument if it is hardware-authoritative.
    pub async fn get(
        &self,
        name: &str,
        exec: Option<&mut CommandExecutor>,
    ) -> Result<Value, ParameterError> {
        let entry = self.entry(name)?;
        let spec = entry.spec;

        match spec.read {
            Read::Cached => Ok(entry.value.borrow().clone()),
            Read::Query { code } => {
                let exec = exec.ok_or_else(|| ParameterError::NotInitialized(name.to_string()))?;
                let line = exec.codec().encode_query(spec.target, code);
                let answer = exec.execute(&line).await?;
                let value = spec
                    .kind
                    .parse_answer(&answer)
                    .map_err(ExecError::from)?;
                entry.value.send_replace(value.clone());
                Ok(value)
            }
        }
    }

    /// Validate and write `name`, returning the value now cached.
    ///
    /// On success the settle timer is touched.
    pub async fn set(
        &self,
        name: &str,
        value: Value,
        exec: Option<&mut CommandExecutor>,
        settle: &mut SettleTimer,
    ) -> Result<Value, ParameterError> {
        let entry = self.entry(name)?;
        let spec = entry.spec;
        if spec.is_read_only() {
            return Err(ParameterError::Immutable(name.to_string()));
        }
        let value = spec.kind.validate(name, value)?;
        let not_initialized = || ParameterError::NotInitialized(name.to_string());

        let cached = match spec.write {
            Write::ReadOnly => return Err(ParameterError::Immutable(name.to_string())),
            Write::Local => value,
            Write::Command {
                code,
                select,
                truncate,
            } => {
                let exec = exec.ok_or_else(not_initialized)?;
                if let Some(select) = select {
                    let line = exec
                        .codec()
                        .encode_set(spec.target, select.code, &Value::Int(select.value));
                    exec.execute(&line).await?;
                }

                let wire = match (&value, truncate) {
                    (Value::Float(v), true) => Value::Int(v.trunc() as i64),
                    _ => value.clone(),
                };
                let line = exec.codec().encode_set(spec.target, code, &wire);
                let answer = exec.execute(&line).await?;
                if answer.is_empty() {
                    value
                } else {
                    spec.kind
                        .parse_answer(&answer)
                        .map_err(ExecError::from)?
                }
            }
            Write::Action { sequences, rest } => {
                let lines = sequences
                    .iter()
                    .find(|(choice, _)| Some(*choice) == value.as_text())
                    .map(|(_, lines)| *lines)
                    .unwrap_or(&[]);
                if !lines.is_empty() {
                    let exec = exec.ok_or_else(not_initialized)?;
                    for line in lines {
                        exec.execute(line).await?;
                    }
                }
                Value::Text(rest.to_string())
            }
            Write::Toggle { line } => {
                let changed = *entry.value.borrow() != value;
                if changed {
                    let exec = exec.ok_or_else(not_initialized)?;
                    exec.execute(line).await?;
                }
                value
            }
        };

        entry.value.send_replace(cached.clone());
        settle.touch();
        Ok(cached)
    }
}

impl std::fmt::Debug for ParameterTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (e.spec.name, e.value.borrow().clone())))
            .finish()
    }
}
