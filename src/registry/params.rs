//! Declarative parameter table
//!
//! Each recognized request parameter is one row: its name and the rule that
//! turns the raw string into a [`StageSpec`]. Row order is the order stages
//! are stacked, innermost first, so later stages see the output of earlier
//! ones. Adding a stage kind means adding a row.

use std::time::Duration;

use crate::stage::StageSpec;

/// Largest accepted `buffer` size
pub const MAX_BUFFER: usize = 100_000;

/// Largest accepted `precision`
pub const MAX_PRECISION: u32 = 100;

/// One recognized parameter
#[derive(Debug)]
pub struct ParamRule {
    pub name: &'static str,
    pub parse: fn(&str) -> Result<StageSpec, String>,
}

/// Recognized parameters, in stacking order
pub const PARAMETERS: &[ParamRule] = &[
    ParamRule { name: "rate", parse: parse_rate },
    ParamRule { name: "ratelimit", parse: parse_ratelimit },
    ParamRule { name: "scale", parse: parse_scale },
    ParamRule { name: "offset", parse: parse_offset },
    ParamRule { name: "lowedge", parse: parse_lowedge },
    ParamRule { name: "highedge", parse: parse_highedge },
    ParamRule { name: "threshold", parse: parse_threshold },
    ParamRule { name: "name", parse: parse_name },
    ParamRule { name: "units", parse: parse_units },
    ParamRule { name: "precision", parse: parse_precision },
    ParamRule { name: "buffer", parse: parse_buffer },
];

/// Pairs that may not appear together
pub const EXCLUSIVE: &[(&str, &str)] = &[("rate", "ratelimit")];

/// Look up a parameter rule by (lower-case) name
pub fn rule(name: &str) -> Option<&'static ParamRule> {
    PARAMETERS.iter().find(|r| r.name == name)
}

/// Canonical string form of a stage's parameter value
///
/// Used when deriving subscription keys, so `2`, `2.0` and `2e0` all key
/// the same way.
pub fn render(spec: &StageSpec) -> String {
    match spec {
        StageSpec::Passthrough => String::new(),
        StageSpec::Buffer(size) => size.to_string(),
        StageSpec::Rate(period) | StageSpec::RateLimit(period) => {
            format!("{}", period.as_secs_f64())
        }
        StageSpec::LowEdge(v)
        | StageSpec::HighEdge(v)
        | StageSpec::Threshold(v)
        | StageSpec::Scale(v)
        | StageSpec::Offset(v) => format!("{}", v),
        StageSpec::Name(s) | StageSpec::Units(s) => s.clone(),
        StageSpec::Precision(p) => p.to_string(),
    }
}

fn parse_float(raw: &str) -> Result<f64, String> {
    let v: f64 = raw
        .trim()
        .parse()
        .map_err(|_| "expected a number".to_string())?;
    if !v.is_finite() {
        return Err("expected a finite number".into());
    }
    Ok(v)
}

fn parse_interval(raw: &str) -> Result<Duration, String> {
    let secs = parse_float(raw)?;
    if secs <= 0.0 {
        return Err("interval must be greater than zero".into());
    }
    match Duration::try_from_secs_f64(secs) {
        Ok(period) if !period.is_zero() => Ok(period),
        Ok(_) => Err("interval is too small".into()),
        Err(_) => Err("interval is too large".into()),
    }
}

fn parse_rate(raw: &str) -> Result<StageSpec, String> {
    parse_interval(raw).map(StageSpec::Rate)
}

fn parse_ratelimit(raw: &str) -> Result<StageSpec, String> {
    parse_interval(raw).map(StageSpec::RateLimit)
}

fn parse_scale(raw: &str) -> Result<StageSpec, String> {
    parse_float(raw).map(StageSpec::Scale)
}

fn parse_offset(raw: &str) -> Result<StageSpec, String> {
    parse_float(raw).map(StageSpec::Offset)
}

fn parse_lowedge(raw: &str) -> Result<StageSpec, String> {
    parse_float(raw).map(StageSpec::LowEdge)
}

fn parse_highedge(raw: &str) -> Result<StageSpec, String> {
    parse_float(raw).map(StageSpec::HighEdge)
}

fn parse_threshold(raw: &str) -> Result<StageSpec, String> {
    parse_float(raw).map(StageSpec::Threshold)
}

fn parse_name(raw: &str) -> Result<StageSpec, String> {
    Ok(StageSpec::Name(raw.to_string()))
}

fn parse_units(raw: &str) -> Result<StageSpec, String> {
    Ok(StageSpec::Units(raw.to_string()))
}

fn parse_precision(raw: &str) -> Result<StageSpec, String> {
    let digits: u32 = raw
        .trim()
        .parse()
        .map_err(|_| "expected a non-negative integer".to_string())?;
    if digits > MAX_PRECISION {
        return Err(format!("must be at most {}", MAX_PRECISION));
    }
    Ok(StageSpec::Precision(digits))
}

fn parse_buffer(raw: &str) -> Result<StageSpec, String> {
    let size: usize = raw
        .trim()
        .parse()
        .map_err(|_| "expected a positive integer".to_string())?;
    if !(1..=MAX_BUFFER).contains(&size) {
        return Err(format!("must be between 1 and {}", MAX_BUFFER));
    }
    Ok(StageSpec::Buffer(size))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(name: &str, raw: &str) -> Result<StageSpec, String> {
        (rule(name).unwrap().parse)(raw)
    }

    #[test]
    fn test_table_order() {
        let names: Vec<_> = PARAMETERS.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "rate", "ratelimit", "scale", "offset", "lowedge", "highedge", "threshold",
                "name", "units", "precision", "buffer"
            ]
        );
    }

    #[test]
    fn test_exclusive_pairs_are_known() {
        for (a, b) in EXCLUSIVE {
            assert!(rule(a).is_some());
            assert!(rule(b).is_some());
        }
    }

    #[test]
    fn test_interval_rules() {
        assert_eq!(parse("rate", "0.5"), Ok(StageSpec::Rate(Duration::from_millis(500))));
        assert!(parse("rate", "-1").is_err());
        assert!(parse("rate", "0").is_err());
        assert!(parse("ratelimit", "inf").is_err());
        assert!(parse("ratelimit", "1e-12").is_err());
        assert!(parse("ratelimit", "fast").is_err());
    }

    #[test]
    fn test_buffer_bounds() {
        assert_eq!(parse("buffer", "100000"), Ok(StageSpec::Buffer(100_000)));
        assert!(parse("buffer", "200000").is_err());
        assert!(parse("buffer", "0").is_err());
        assert!(parse("buffer", "2.5").is_err());
    }

    #[test]
    fn test_precision_bounds() {
        assert_eq!(parse("precision", "3"), Ok(StageSpec::Precision(3)));
        assert!(parse("precision", "-1").is_err());
        assert!(parse("precision", "101").is_err());
    }

    #[test]
    fn test_floats_must_be_finite() {
        assert_eq!(parse("scale", "-2.5"), Ok(StageSpec::Scale(-2.5)));
        assert!(parse("offset", "NaN").is_err());
        assert!(parse("threshold", "").is_err());
    }

    #[test]
    fn test_render_is_canonical() {
        assert_eq!(render(&parse("scale", "2.0").unwrap()), "2");
        assert_eq!(render(&parse("scale", "2e0").unwrap()), "2");
        assert_eq!(render(&parse("rate", "0.5").unwrap()), "0.5");
        assert_eq!(render(&parse("name", "Beam Current").unwrap()), "Beam Current");
    }
}
