//! Value and attribute rewriting stages

use super::{numeric, Stage};
use crate::event::ValueEvent;

/// `value * factor`
#[derive(Debug)]
pub struct Scale {
    factor: f64,
}

impl Scale {
    pub fn new(factor: f64) -> Self {
        Self { factor }
    }
}

impl Stage for Scale {
    fn name(&self) -> &'static str {
        "scale"
    }

    fn process(&mut self, mut event: ValueEvent) -> Option<ValueEvent> {
        let v = numeric(self.name(), &event)?;
        event.set_numeric_value(v * self.factor);
        Some(event)
    }
}

/// `value + delta`
#[derive(Debug)]
pub struct Offset {
    delta: f64,
}

impl Offset {
    pub fn new(delta: f64) -> Self {
        Self { delta }
    }
}

impl Stage for Offset {
    fn name(&self) -> &'static str {
        "offset"
    }

    fn process(&mut self, mut event: ValueEvent) -> Option<ValueEvent> {
        let v = numeric(self.name(), &event)?;
        event.set_numeric_value(v + self.delta);
        Some(event)
    }
}

/// Overwrites one attribute on every event
#[derive(Debug)]
pub struct SetAttribute {
    key: &'static str,
    value: String,
}

impl SetAttribute {
    pub fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

impl Stage for SetAttribute {
    fn name(&self) -> &'static str {
        self.key
    }

    fn process(&mut self, mut event: ValueEvent) -> Option<ValueEvent> {
        event.set(self.key, self.value.clone());
        Some(event)
    }
}

/// Overwrites `precision` and re-renders `char_value`
#[derive(Debug)]
pub struct SetPrecision {
    digits: u32,
}

impl SetPrecision {
    pub fn new(digits: u32) -> Self {
        Self { digits }
    }
}

impl Stage for SetPrecision {
    fn name(&self) -> &'static str {
        "precision"
    }

    fn process(&mut self, mut event: ValueEvent) -> Option<ValueEvent> {
        numeric(self.name(), &event)?;
        event.set_precision(self.digits);
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::{CHAR_VALUE, NAME, PRECISION, UNITS};

    #[test]
    fn test_scale_keeps_precision() {
        let mut scale = Scale::new(0.5);
        let event = ValueEvent::new().with(PRECISION, 2).with("value", 3);

        let out = scale.process(event).unwrap();
        assert_eq!(out.numeric_value().unwrap(), 1.5);
        assert_eq!(out.char_value(), Some("1.50"));
    }

    #[test]
    fn test_offset_negative() {
        let mut offset = Offset::new(-10.0);
        let out = offset.process(ValueEvent::from_number(4.0)).unwrap();

        assert_eq!(out.numeric_value().unwrap(), -6.0);
    }

    #[test]
    fn test_numeric_stages_drop_strings() {
        let event = ValueEvent::new().with("value", "FAULT");

        assert!(Scale::new(2.0).process(event.clone()).is_none());
        assert!(Offset::new(2.0).process(event.clone()).is_none());
        assert!(SetPrecision::new(2).process(event).is_none());
    }

    #[test]
    fn test_set_attribute_overwrites() {
        let mut name = SetAttribute::new(NAME, "Beam Current");
        let mut units = SetAttribute::new(UNITS, "mA");
        let event = ValueEvent::new().with("value", "FAULT").with(NAME, "PCT:fbk");

        let out = units.process(name.process(event).unwrap()).unwrap();
        assert_eq!(out.name(), Some("Beam Current"));
        assert_eq!(out.get(UNITS), Some(&json!("mA")));
        assert_eq!(out.get("value"), Some(&json!("FAULT")));
    }

    #[test]
    fn test_set_precision_rounds() {
        let mut precision = SetPrecision::new(1);
        let out = precision.process(ValueEvent::from_number(2.46)).unwrap();

        assert_eq!(out.get(PRECISION), Some(&json!(1)));
        assert_eq!(out.get(CHAR_VALUE), Some(&json!("2.5")));
        assert_eq!(out.numeric_value().unwrap(), 2.46);
    }
}
