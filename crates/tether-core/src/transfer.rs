//! Snapshot transfer.
//!
//! Values that carry behavior cannot cross the process boundary as-is. A type
//! implementing [`HasSnapshot`] is replaced by a tagged envelope holding only
//! its snapshot data before it leaves a process:
//!
//! ```text
//! { "kind": "snapshot", "payload": <snapshot> }
//! ```
//!
//! The receiver declares which types it expects ([`SnapshotType`]) and
//! [`prepare_args`] rebuilds instances from envelopes, consuming declared types
//! in call order, one per envelope encountered.

use crate::config::BridgeConfig;
use crate::error::{Result, TetherError};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::any::Any;
use std::fmt;

/// A value that can be reduced to a snapshot and rebuilt from one.
pub trait HasSnapshot {
    /// Extract the transferable state.
    fn take_snapshot(&self) -> Value;

    /// Overwrite this instance's state from a snapshot.
    fn restore_from_snapshot(&mut self, snapshot: Value) -> anyhow::Result<()>;
}

/// Wrap a snapshot-capable value in a transfer envelope.
pub fn to_transferable<T: HasSnapshot + ?Sized>(value: &T) -> Value {
    json!({
        "kind": BridgeConfig::SNAPSHOT_KIND,
        "payload": value.take_snapshot(),
    })
}

/// Whether a received value is a snapshot envelope.
pub fn is_snapshot(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    object.get("kind").and_then(Value::as_str) == Some(BridgeConfig::SNAPSHOT_KIND)
        && object.get("payload").is_some_and(|payload| !payload.is_null())
}

/// Rebuild a `T` from a snapshot envelope.
pub fn restore<T: HasSnapshot + Default>(value: Value) -> Result<T> {
    let type_name = std::any::type_name::<T>();
    let payload = envelope_payload(value).ok_or_else(|| TetherError::Snapshot {
        type_name,
        message: "value is not a snapshot envelope".to_string(),
    })?;

    let mut instance = T::default();
    instance
        .restore_from_snapshot(payload)
        .map_err(|e| TetherError::Snapshot {
            type_name,
            message: format!("{:#}", e),
        })?;
    Ok(instance)
}

fn envelope_payload(value: Value) -> Option<Value> {
    if !is_snapshot(&value) {
        return None;
    }
    match value {
        Value::Object(mut object) => object.remove("payload"),
        _ => None,
    }
}

fn restore_boxed<T>(value: Value) -> Result<Box<dyn Any + Send>>
where
    T: HasSnapshot + Default + Send + 'static,
{
    Ok(Box::new(restore::<T>(value)?))
}

/// A type the receiver expects to reconstruct from a snapshot.
#[derive(Clone, Copy)]
pub struct SnapshotType {
    type_name: &'static str,
    restore: fn(Value) -> Result<Box<dyn Any + Send>>,
}

impl SnapshotType {
    pub fn of<T>() -> Self
    where
        T: HasSnapshot + Default + Send + 'static,
    {
        Self {
            type_name: std::any::type_name::<T>(),
            restore: restore_boxed::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn restore(&self, value: Value) -> Result<Box<dyn Any + Send>> {
        (self.restore)(value)
    }
}

impl fmt::Debug for SnapshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SnapshotType").field(&self.type_name).finish()
    }
}

/// One received argument.
pub enum Arg {
    /// Plain transferable value, including envelopes nobody asked to rebuild.
    Plain(Value),
    /// Instance reconstructed from a snapshot envelope.
    Restored {
        type_name: &'static str,
        value: Box<dyn Any + Send>,
    },
}

impl Arg {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Plain(value) => Some(value),
            Arg::Restored { .. } => None,
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        match self {
            Arg::Plain(_) => None,
            Arg::Restored { value, .. } => value.downcast_ref::<T>(),
        }
    }
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Plain(value) => f.debug_tuple("Plain").field(value).finish(),
            Arg::Restored { type_name, .. } => f.debug_tuple("Restored").field(type_name).finish(),
        }
    }
}

/// Arguments handed to a published implementation.
#[derive(Debug, Default)]
pub struct Args(Vec<Arg>);

impl Args {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn arg(&self, index: usize) -> Option<&Arg> {
        self.0.get(index)
    }

    /// Plain value at `index`, if present and not reconstructed.
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.0.get(index).and_then(Arg::as_value)
    }

    /// Deserialize the plain value at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.value(index).ok_or_else(|| {
            TetherError::Other(format!("missing plain argument at position {}", index))
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Reconstructed instance at `index`.
    pub fn restored<T: 'static>(&self, index: usize) -> Option<&T> {
        self.0.get(index).and_then(Arg::downcast_ref::<T>)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arg> {
        self.0.iter()
    }
}

/// Rebuild one received value, using `expected` when it is an envelope.
pub fn prepare_value(raw: Value, expected: Option<&SnapshotType>) -> Result<Arg> {
    match expected {
        Some(snapshot_type) if is_snapshot(&raw) => Ok(Arg::Restored {
            type_name: snapshot_type.type_name(),
            value: snapshot_type.restore(raw)?,
        }),
        _ => Ok(Arg::Plain(raw)),
    }
}

/// Rebuild a received argument list.
///
/// Declared types are consumed in order, one per envelope. Envelopes beyond
/// the declared types are passed through raw.
pub fn prepare_args(raw: Vec<Value>, receives: &[SnapshotType]) -> Result<Args> {
    let mut expected = receives.iter();
    let mut args = Vec::with_capacity(raw.len());

    for value in raw {
        let arg = if is_snapshot(&value) {
            prepare_value(value, expected.next())?
        } else {
            Arg::Plain(value)
        };
        args.push(arg);
    }

    Ok(Args(args))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Point {
        x: i64,
        y: i64,
    }

    impl HasSnapshot for Point {
        fn take_snapshot(&self) -> Value {
            json!({"x": self.x, "y": self.y})
        }

        fn restore_from_snapshot(&mut self, snapshot: Value) -> anyhow::Result<()> {
            self.x = snapshot["x"].as_i64().ok_or_else(|| anyhow::anyhow!("missing x"))?;
            self.y = snapshot["y"].as_i64().ok_or_else(|| anyhow::anyhow!("missing y"))?;
            Ok(())
        }
    }

    #[derive(Debug, Default, PartialEq)]
    struct Label(String);

    impl HasSnapshot for Label {
        fn take_snapshot(&self) -> Value {
            json!(self.0)
        }

        fn restore_from_snapshot(&mut self, snapshot: Value) -> anyhow::Result<()> {
            self.0 = serde_json::from_value(snapshot)?;
            Ok(())
        }
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = to_transferable(&Point { x: 1, y: 2 });
        assert_eq!(
            envelope,
            json!({"kind": "snapshot", "payload": {"x": 1, "y": 2}})
        );
        assert!(is_snapshot(&envelope));
        assert!(!is_snapshot(&json!({"kind": "snapshot"})));
        assert!(!is_snapshot(&json!({"kind": "other", "payload": 1})));
        assert!(!is_snapshot(&json!(3)));
    }

    #[test]
    fn test_restore_rebuilds_instance() {
        let envelope = to_transferable(&Point { x: 3, y: -4 });
        let point: Point = restore(envelope).unwrap();
        assert_eq!(point, Point { x: 3, y: -4 });
    }

    #[test]
    fn test_restore_rejects_plain_value() {
        let result = restore::<Point>(json!({"x": 1, "y": 2}));
        assert!(matches!(result, Err(TetherError::Snapshot { .. })));
    }

    #[test]
    fn test_prepare_args_consumes_types_in_order() {
        let raw = vec![
            json!(7),
            to_transferable(&Point { x: 1, y: 1 }),
            json!("plain"),
            to_transferable(&Label("hi".into())),
            to_transferable(&Point { x: 9, y: 9 }),
        ];
        let receives = [SnapshotType::of::<Point>(), SnapshotType::of::<Label>()];

        let args = prepare_args(raw, &receives).unwrap();

        assert_eq!(args.len(), 5);
        assert_eq!(args.get::<i64>(0).unwrap(), 7);
        assert_eq!(args.restored::<Point>(1), Some(&Point { x: 1, y: 1 }));
        assert_eq!(args.get::<String>(2).unwrap(), "plain");
        assert_eq!(args.restored::<Label>(3), Some(&Label("hi".into())));
        // No declared type left: the envelope arrives raw.
        assert!(is_snapshot(args.value(4).unwrap()));
    }

    #[test]
    fn test_prepare_value_without_expectation_is_raw() {
        let envelope = to_transferable(&Label("x".into()));
        let arg = prepare_value(envelope.clone(), None).unwrap();
        assert_eq!(arg.as_value(), Some(&envelope));
    }
}
