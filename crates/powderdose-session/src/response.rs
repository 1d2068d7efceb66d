use std::fmt;

use powderdose_frame::{Command, FilterType};
use serde::Serialize;

/// Which measurement a reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MeasurementKind {
    /// Filtered raw ADC counts, tagged `ADC`.
    Raw,
    /// Filtered weight in grams, tagged `Weight`.
    Weight,
}

impl MeasurementKind {
    /// The reply tag preceding the `:`.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Raw => "ADC",
            Self::Weight => "Weight",
        }
    }

    /// The command that asks the firmware for this measurement.
    pub fn command(self, samples: u32, filter: FilterType) -> Command {
        match self {
            Self::Raw => Command::Adc { samples, filter },
            Self::Weight => Command::Meas { samples, filter },
        }
    }
}

impl fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Why a measurement value could not be read from a reply.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unavailable {
    #[error("tag not present")]
    MissingTag,
    #[error("no value after tag")]
    MissingValue,
    #[error("value {0:?} is not a number")]
    NotNumeric(String),
    #[error("value is not finite")]
    NotFinite,
}

/// Extract the first value of a `<tag>:<v1>,<v2>,...` reply.
///
/// The tag must be followed directly by `:`. The first comma-separated field
/// after it is parsed as `f64`.
pub fn parse_measurement(body: &str, tag: &str) -> Result<f64, Unavailable> {
    let marker = format!("{tag}:");
    let start = body.find(&marker).ok_or(Unavailable::MissingTag)? + marker.len();
    let first = body[start..].split(',').next().unwrap_or_default().trim();
    if first.is_empty() {
        return Err(Unavailable::MissingValue);
    }
    let value: f64 = first
        .parse()
        .map_err(|_| Unavailable::NotNumeric(first.to_string()))?;
    if !value.is_finite() {
        return Err(Unavailable::NotFinite);
    }
    Ok(value)
}

/// A decoded reply body.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// A tagged measurement with a usable value.
    Measurement { kind: MeasurementKind, value: f64 },
    /// A tagged measurement whose value could not be read.
    Unavailable {
        kind: MeasurementKind,
        reason: Unavailable,
    },
    /// Anything else: acknowledgements, banners, firmware chatter.
    Ack(String),
}

/// Decode a reply body without knowing which reply was expected.
pub fn classify(body: &str) -> Response {
    for kind in [MeasurementKind::Raw, MeasurementKind::Weight] {
        match parse_measurement(body, kind.tag()) {
            Ok(value) => return Response::Measurement { kind, value },
            Err(Unavailable::MissingTag) => {}
            Err(reason) => return Response::Unavailable { kind, reason },
        }
    }
    Response::Ack(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_field_after_tag() {
        assert_eq!(parse_measurement("Weight:4.97,4.96,5", "Weight"), Ok(4.97));
        assert_eq!(parse_measurement("ADC:421737", "ADC"), Ok(421_737.0));
        assert_eq!(parse_measurement("Weight: -0.02 ,1", "Weight"), Ok(-0.02));
    }

    #[test]
    fn garbage_is_unavailable() {
        assert_eq!(
            parse_measurement("garbage", "Weight"),
            Err(Unavailable::MissingTag)
        );
        assert_eq!(
            parse_measurement("Weight:garbage", "Weight"),
            Err(Unavailable::NotNumeric("garbage".to_string()))
        );
    }

    #[test]
    fn tag_without_separator_is_missing() {
        assert_eq!(
            parse_measurement("Msg Weight Time 3", "Weight"),
            Err(Unavailable::MissingTag)
        );
    }

    #[test]
    fn empty_and_non_finite_values() {
        assert_eq!(
            parse_measurement("Weight:", "Weight"),
            Err(Unavailable::MissingValue)
        );
        assert_eq!(
            parse_measurement("Weight:,1", "Weight"),
            Err(Unavailable::MissingValue)
        );
        assert_eq!(
            parse_measurement("ADC:inf", "ADC"),
            Err(Unavailable::NotFinite)
        );
        assert_eq!(
            parse_measurement("Weight:NaN", "Weight"),
            Err(Unavailable::NotFinite)
        );
    }

    #[test]
    fn classify_replies() {
        assert_eq!(
            classify("ADC:12.5,3"),
            Response::Measurement {
                kind: MeasurementKind::Raw,
                value: 12.5
            }
        );
        assert_eq!(
            classify("Weight:off"),
            Response::Unavailable {
                kind: MeasurementKind::Weight,
                reason: Unavailable::NotNumeric("off".to_string()),
            }
        );
        assert_eq!(
            classify("Msg Tare Time 9"),
            Response::Ack("Msg Tare Time 9".to_string())
        );
    }

    #[test]
    fn kinds_map_to_commands() {
        assert_eq!(
            MeasurementKind::Weight.command(5, FilterType::Sma),
            Command::Meas {
                samples: 5,
                filter: FilterType::Sma
            }
        );
        assert_eq!(MeasurementKind::Raw.to_string(), "ADC");
    }
}
